//! Session credential state
//!
//! # Module Layout
//!
//! - [`credentials`] -- the credential pair, its persistence backends, and
//!   the atomic [`credentials::CredentialStore`].
//! - [`lifecycle`] -- [`lifecycle::TokenLifecycle`], the only writer of the
//!   store: login, logout, and single-flight refresh.

pub mod credentials;
pub mod lifecycle;

pub use credentials::{CredentialBackend, CredentialPair, CredentialStore};
pub use lifecycle::{AuthEndpoints, SessionEvent, TokenLifecycle};
