//! Client-side response cache
//!
//! # Module Layout
//!
//! - [`keys`] -- structured [`keys::ResourceKey`]s and the
//!   [`keys::QueryKeys`] registry.
//! - [`store`] -- the generic [`store::ResponseCache`].
//! - [`invalidation`] -- the [`invalidation::InvalidationCoordinator`] that
//!   keeps the cache consistent with mutations and remote events.

pub mod invalidation;
pub mod keys;
pub mod store;

pub use invalidation::{InvalidationCoordinator, Mutation, ParentRef, RemoteEvent};
pub use keys::{Filters, ItemId, KeyPattern, QueryKeys, ResourceKey, ResourceKind};
pub use store::{CacheEntry, CacheEvent, FetchEpoch, FetchOutcome, ResponseCache};
