//! Pipeline use-case services.
//!
//! # Responsibility
//! - Keep the local deal snapshot and its derived board views.
//! - Orchestrate repository calls with optimistic local mutation.
//! - Keep UI layers decoupled from persistence details.

pub mod observer;
pub mod pipeline_error;
pub mod pipeline_store;
