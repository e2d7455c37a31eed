//! # storefront API
//!
//! JSON REST surface over the storefront store, vector indexes and
//! recommendation service, plus the named capability registry used by
//! orchestrating agents.
//!
//! Failures are rendered as `{"error": {"kind", "id", "message"}}` with a
//! status derived from the error kind.

pub mod capabilities;
pub mod error;
pub mod rest;
pub mod state;

pub use capabilities::{Capability, CapabilityInfo, CapabilityRegistry, TypedCapability};
pub use error::{ApiError, ApiResult};
pub use rest::{configure, RestApi};
pub use state::AppState;
