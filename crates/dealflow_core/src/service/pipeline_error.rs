//! Pipeline store errors.

use crate::model::deal::{DealId, DealValidationError, Stage};
use crate::repo::deal_repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PipelineResult<T> = Result<T, PipelineError>;

/// What the automatic rollback did after a failed stage confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Local stage was restored to its pre-move value.
    Restored,
    /// The entry was replaced while the call was pending; newer state kept.
    Superseded,
    /// The deal left the local snapshot while the call was pending.
    DealRemoved,
}

impl Display for RollbackOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restored => f.write_str("restored"),
            Self::Superseded => f.write_str("superseded"),
            Self::DealRemoved => f.write_str("deal_removed"),
        }
    }
}

/// Errors surfaced by `PipelineStore` operations.
#[derive(Debug)]
pub enum PipelineError {
    /// Fetching the deal collection failed; previous snapshot kept.
    Load(RepoError),
    /// Optimistic move could not be confirmed and was rolled back.
    StageUpdate {
        deal_id: DealId,
        target_stage: Stage,
        rollback: RollbackOutcome,
        source: RepoError,
    },
    /// Another move for the same deal is still pending.
    ConcurrentMove(DealId),
    /// Id is absent from the local snapshot.
    NotFound(DealId),
    Validation(DealValidationError),
    /// Create/update/delete/refresh call failed; snapshot untouched.
    Remote(RepoError),
}

impl PipelineError {
    /// Short text suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::Load(_) => "Failed to load deals".to_string(),
            Self::StageUpdate { .. } => "Failed to move deal".to_string(),
            Self::ConcurrentMove(_) => "Deal is already being moved".to_string(),
            Self::NotFound(_) => "Deal not found".to_string(),
            Self::Validation(err) => format!("Invalid deal: {err}"),
            Self::Remote(_) => "Failed to save deal".to_string(),
        }
    }

    /// Stable code used in log records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Load(_) => "load_failed",
            Self::StageUpdate { .. } => "stage_update_failed",
            Self::ConcurrentMove(_) => "concurrent_move",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::Remote(_) => "remote_failed",
        }
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(err) => write!(f, "failed to load deals: {err}"),
            Self::StageUpdate {
                deal_id,
                target_stage,
                rollback,
                source,
            } => write!(
                f,
                "failed to move deal {deal_id} to {target_stage} (rollback: {rollback}): {source}"
            ),
            Self::ConcurrentMove(id) => write!(f, "deal {id} already has a move in flight"),
            Self::NotFound(id) => write!(f, "deal not found in pipeline: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Remote(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Load(err) | Self::Remote(err) => Some(err),
            Self::StageUpdate { source, .. } => Some(source),
            Self::Validation(err) => Some(err),
            Self::ConcurrentMove(_) | Self::NotFound(_) => None,
        }
    }
}

impl From<DealValidationError> for PipelineError {
    fn from(value: DealValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for PipelineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Remote(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineError, RollbackOutcome};
    use crate::model::deal::Stage;
    use crate::repo::deal_repo::RepoError;
    use std::error::Error;

    #[test]
    fn stage_update_error_names_deal_target_and_rollback() {
        let err = PipelineError::StageUpdate {
            deal_id: 4,
            target_stage: Stage::ClosedWon,
            rollback: RollbackOutcome::Restored,
            source: RepoError::Network("connection reset".into()),
        };

        let text = err.to_string();
        assert!(text.contains("deal 4"));
        assert!(text.contains("Closed Won"));
        assert!(text.contains("rollback: restored"));
        assert_eq!(err.user_message(), "Failed to move deal");
        assert!(err.source().is_some());
    }

    #[test]
    fn repo_not_found_maps_to_pipeline_not_found() {
        let err = PipelineError::from(RepoError::NotFound(12));
        assert!(matches!(err, PipelineError::NotFound(12)));
    }
}
