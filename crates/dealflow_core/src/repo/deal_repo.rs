//! Deal persistence contract consumed by the pipeline store.
//!
//! # Responsibility
//! - Define the async CRUD contract of the remote deal store.
//! - Define transport-agnostic repository errors.
//!
//! # Invariants
//! - Implementations return validated `Deal` records only.
//! - Field naming and wire format stay inside implementations.

use crate::db::DbError;
use crate::model::deal::{Deal, DealDraft, DealId, DealPatch, DealValidationError, Stage};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for deal persistence calls.
#[derive(Debug)]
pub enum RepoError {
    /// Transport failure before a response was received.
    Network(String),
    /// Remote store answered with an error status.
    Server { status: u16, message: String },
    NotFound(DealId),
    Validation(DealValidationError),
    Db(DbError),
    /// Stored or returned data violates deal invariants.
    InvalidData(String),
    /// Blocking storage task panicked or was cancelled.
    TaskFailed(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(message) => write!(f, "network error: {message}"),
            Self::Server { status, message } => write!(f, "server error {status}: {message}"),
            Self::NotFound(id) => write!(f, "deal not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid deal data: {message}"),
            Self::TaskFailed(message) => write!(f, "storage task failed: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Network(_)
            | Self::Server { .. }
            | Self::NotFound(_)
            | Self::InvalidData(_)
            | Self::TaskFailed(_) => None,
        }
    }
}

impl From<DealValidationError> for RepoError {
    fn from(value: DealValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Remote deal store operations.
#[async_trait]
pub trait DealRepository: Send + Sync {
    /// Lists every deal, newest first.
    async fn fetch_all_deals(&self) -> RepoResult<Vec<Deal>>;
    async fn fetch_deal(&self, id: DealId) -> RepoResult<Option<Deal>>;
    /// Persists a stage change and returns the authoritative record.
    async fn update_deal_stage(&self, id: DealId, stage: Stage) -> RepoResult<Deal>;
    async fn create_deal(&self, draft: &DealDraft) -> RepoResult<Deal>;
    async fn update_deal(&self, id: DealId, patch: &DealPatch) -> RepoResult<Deal>;
    async fn delete_deal(&self, id: DealId) -> RepoResult<()>;
}

#[async_trait]
impl<R: DealRepository + ?Sized> DealRepository for Arc<R> {
    async fn fetch_all_deals(&self) -> RepoResult<Vec<Deal>> {
        (**self).fetch_all_deals().await
    }

    async fn fetch_deal(&self, id: DealId) -> RepoResult<Option<Deal>> {
        (**self).fetch_deal(id).await
    }

    async fn update_deal_stage(&self, id: DealId, stage: Stage) -> RepoResult<Deal> {
        (**self).update_deal_stage(id, stage).await
    }

    async fn create_deal(&self, draft: &DealDraft) -> RepoResult<Deal> {
        (**self).create_deal(draft).await
    }

    async fn update_deal(&self, id: DealId, patch: &DealPatch) -> RepoResult<Deal> {
        (**self).update_deal(id, patch).await
    }

    async fn delete_deal(&self, id: DealId) -> RepoResult<()> {
        (**self).delete_deal(id).await
    }
}
