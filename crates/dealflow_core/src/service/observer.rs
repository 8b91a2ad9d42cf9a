//! Change notification for pipeline snapshot mutations.

use crate::model::deal::{DealId, Stage};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handle returned by `subscribe`, used to unsubscribe.
pub type SubscriptionId = u64;

/// Callback invoked after every snapshot mutation.
pub type PipelineObserver = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Snapshot mutation that observers are told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Snapshot replaced by a successful load.
    Loaded { count: usize },
    /// Optimistic stage change applied locally.
    MoveApplied {
        deal_id: DealId,
        from: Stage,
        to: Stage,
    },
    /// Remote store confirmed the move; entry replaced with its record.
    MoveConfirmed { deal_id: DealId, stage: Stage },
    /// Optimistic change reverted.
    MoveRolledBack { deal_id: DealId, restored: Stage },
    Created { deal_id: DealId },
    Updated { deal_id: DealId },
    Deleted { deal_id: DealId },
}

impl PipelineEvent {
    /// Stable event name for log records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loaded { .. } => "loaded",
            Self::MoveApplied { .. } => "move_applied",
            Self::MoveConfirmed { .. } => "move_confirmed",
            Self::MoveRolledBack { .. } => "move_rolled_back",
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }

    /// Deal the event refers to, if it is about a single deal.
    pub fn deal_id(&self) -> Option<DealId> {
        match self {
            Self::Loaded { .. } => None,
            Self::MoveApplied { deal_id, .. }
            | Self::MoveConfirmed { deal_id, .. }
            | Self::MoveRolledBack { deal_id, .. }
            | Self::Created { deal_id }
            | Self::Updated { deal_id }
            | Self::Deleted { deal_id } => Some(*deal_id),
        }
    }
}

/// Registered observers, delivered in subscription order.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: BTreeMap<SubscriptionId, PipelineObserver>,
    last_id: SubscriptionId,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one observer and returns its subscription handle.
    pub fn register(&mut self, observer: PipelineObserver) -> SubscriptionId {
        self.last_id += 1;
        self.observers.insert(self.last_id, observer);
        self.last_id
    }

    /// Removes one observer. Returns `false` for unknown handles.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Clones current observer handles so callers can deliver without
    /// holding the registry borrow.
    pub fn snapshot(&self) -> Vec<PipelineObserver> {
        self.observers.values().cloned().collect()
    }
}
