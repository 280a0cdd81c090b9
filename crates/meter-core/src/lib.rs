//! Core types and rules for meter.
//!
//! This crate provides the foundational types shared by the store backends,
//! the HTTP service and the client SDK:
//!
//! - **Identifiers**: `UserId`, `BillingCustomerId`, `BillingSubscriptionId`
//! - **Quota**: `QuotaRecord`, `QuotaLimit`, `QuotaDecision`
//! - **Subscriptions**: `SubscriptionRecord`, `BillingEvent`, `ApplyOutcome`,
//!   and the [`reconcile`] merge rule
//!
//! Nothing in this crate performs I/O or synchronization. Storage backends
//! evaluate these rules inside their own atomic sections so that every backend
//! agrees on admission and merge semantics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod quota;
pub mod subscription;

pub use error::{MeterError, Result};
pub use ids::{BillingCustomerId, BillingSubscriptionId, IdError, UserId, MAX_ID_LEN};
pub use quota::{QuotaDecision, QuotaLimit, QuotaRecord};
pub use subscription::{
    reconcile, ApplyOutcome, ApplyReason, BillingEvent, EventSequence, IdentityConflict,
    IdentityField, Reconciliation, SubscriptionChange, SubscriptionRecord, SubscriptionState,
};
