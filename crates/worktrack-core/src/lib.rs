//! worktrack-core: the work item access layer.
//!
//! Entry point is [`app::Service`], which runs units of work against a
//! [`store::TransactionProvider`] and shares one [`type_cache::TypeCache`]
//! across them.
//!
//! # Conventions
//!
//! - **Errors**: repositories return [`error::AccessError`]; store code uses
//!   `anyhow::Result` with context and surfaces as `AccessError::Internal`.
//! - **Logging**: `tracing` macros only; installing a subscriber is the
//!   binary's job.

pub mod app;
pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod iteration;
pub mod model;
pub mod page;
pub mod repository;
pub mod store;
pub mod type_cache;
pub mod view;

pub use app::{Application, Service};
pub use cancel::CancellationToken;
pub use config::ServiceConfig;
pub use error::{AccessError, ErrorCode};
pub use filter::FilterExpression;
pub use identity::Identity;
pub use page::{PageLink, PageLinks, PageRequest, PageWindow};
pub use repository::WorkItemPage;
pub use type_cache::TypeCache;
