//! Core domain logic for the dealflow CRM pipeline.
//! This crate is the single source of truth for deal invariants and the
//! board's optimistic stage moves.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod report;
pub mod service;

pub use config::CoreConfig;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::deal::{
    ContactId, Deal, DealDraft, DealId, DealPatch, DealValidationError, Stage,
};
pub use model::stage_group::{group_by_stage, StageGroup};
pub use repo::deal_repo::{DealRepository, RepoError, RepoResult};
pub use repo::memory_deal_repo::InMemoryDealRepository;
pub use repo::sqlite_deal_repo::SqliteDealRepository;
pub use report::{summarize, PipelineSummary};
pub use service::observer::{PipelineEvent, SubscriptionId};
pub use service::pipeline_error::{PipelineError, PipelineResult, RollbackOutcome};
pub use service::pipeline_store::{MoveOutcome, PipelineStore};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
