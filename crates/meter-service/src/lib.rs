//! Metered-access HTTP service.
//!
//! This crate provides the two stateful components and their HTTP surface:
//!
//! - [`QuotaLedger`] - atomic consume-if-under-limit for free-tier calls
//! - [`SubscriptionReconciler`] - idempotent merge of billing-provider events
//!
//! Both sit on a shared [`meter_store::Store`] and never call each other.
//!
//! # Authentication
//!
//! Quota and billing endpoints require the service API key (`X-API-Key`);
//! quota resets require the admin key (`X-Admin-Key`). Unconfigured keys
//! reject every request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod backend;
pub mod config;
pub mod crypto;
mod deadline;
pub mod error;
pub mod handlers;
pub mod quota;
pub mod reconciler;
pub mod routes;
pub mod state;

pub use backend::{open_store, BackendError};
pub use config::{ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use quota::QuotaLedger;
pub use reconciler::{SubscriptionReconciler, SubscriptionStatus};
pub use routes::create_router;
pub use state::AppState;
