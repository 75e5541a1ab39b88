//! # Courier SDK
//!
//! Typed client for the courier node HTTP API.

pub mod client;

pub use client::{CourierClient, SubmitRequest};

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::{CourierClient, SubmitRequest};
    pub use courier_core::prelude::*;
    pub use courier_core::{IntentHistory, IntentSnapshot};
}
