//! Workdesk - authenticated request pipeline for the business console
//!
//! This library provides the client side of the Workdesk console backend:
//! credential handling with silent single-flight refresh, a dispatcher that
//! survives one credential rejection per call, and a response cache kept
//! consistent with mutations.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: credential store and token lifecycle (login, logout, refresh)
//! - `transport`: the `Transport` seam, the reqwest-backed HTTP transport
//! - `dispatch`: the request dispatcher and its refresh-and-replay state machine
//! - `cache`: structured cache keys, the response cache, invalidation
//! - `resources`: resource kinds and their endpoints
//! - `client`: the `WorkdeskClient` facade
//! - `notifications`: bridge from live notifications to cache invalidation
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use workdesk::cache::keys::{Filters, ResourceKind};
//! use workdesk::{Config, WorkdeskClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let client = WorkdeskClient::from_config(&config)?;
//!     client.login("ada@example.com", "secret").await?;
//!     let tasks = client.resource(&ResourceKind::TASKS).expect("known kind");
//!     let open = tasks.list(Filters::new().with("status", "open")).await?;
//!     println!("{}", open);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod notifications;
pub mod resources;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use client::{Resource, WorkdeskClient};
pub use config::Config;
pub use dispatch::{ApiCall, RequestDispatcher};
pub use error::{ApiError, ApiResult, Result, WorkdeskError};
pub use session::{SessionEvent, TokenLifecycle};
