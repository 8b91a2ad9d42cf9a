//! Deal persistence contract and its implementations.
//!
//! # Responsibility
//! - Define the async contract the pipeline store consumes.
//! - Provide in-memory and SQLite-backed implementations.
//!
//! # Invariants
//! - Repository writes validate inputs before persisting.
//! - Repository APIs return semantic errors (`NotFound`) in addition to
//!   transport and database errors.

pub mod deal_repo;
pub mod memory_deal_repo;
pub mod sqlite_deal_repo;
