//! Meter Client SDK.
//!
//! This crate provides a client library for services to ask the meter service
//! for quota decisions and to forward normalized billing events.
//!
//! # Example
//!
//! ```no_run
//! use meter_client::MeterClient;
//! use meter_core::UserId;
//!
//! # async fn example() -> Result<(), meter_client::ClientError> {
//! let client = MeterClient::new("http://meter.internal:8080", "your-service-api-key")?;
//! let user_id: UserId = "user-123".parse().expect("valid id");
//!
//! // Deny on any error: an unverifiable quota is an exhausted quota.
//! if !client.is_allowed(&user_id, Some(100)).await {
//!     return Ok(());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, MeterClient};
pub use error::ClientError;
pub use types::*;
