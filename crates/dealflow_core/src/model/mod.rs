//! Deal pipeline domain model.
//!
//! # Responsibility
//! - Define the canonical deal record and its create/update inputs.
//! - Define derived, non-persisted views over a deal collection.
//!
//! # Invariants
//! - Every deal is identified by a positive, server-assigned `DealId`.
//! - Derived views are recomputed from the collection, never edited.

pub mod deal;
pub mod stage_group;
