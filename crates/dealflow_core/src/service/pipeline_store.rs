//! Deal pipeline store.
//!
//! # Responsibility
//! - Mirror the remote deal collection as a local snapshot.
//! - Derive per-stage groupings and totals for the board.
//! - Move deals between stages optimistically, reconciling with the remote
//!   store and rolling back on failure.
//! - Pass create/update/delete through to the remote store and mirror the
//!   result locally.
//!
//! # Invariants
//! - The snapshot is only mutated by this store; readers get clones.
//! - Failed loads and failed CRUD calls leave the snapshot untouched.
//! - At most one move is in flight per deal; overlapping moves are rejected
//!   with `PipelineError::ConcurrentMove`.
//! - The snapshot lock is never held across a remote call or while
//!   observers run.

use crate::model::deal::{now_epoch_ms, Deal, DealDraft, DealId, DealPatch, Stage};
use crate::model::stage_group::{self, StageGroup};
use crate::repo::deal_repo::{DealRepository, RepoError};
use crate::report::{summarize, PipelineSummary};
use crate::service::observer::{ObserverRegistry, PipelineEvent, SubscriptionId};
use crate::service::pipeline_error::{PipelineError, PipelineResult, RollbackOutcome};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Result of a successful `move_deal` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Deal already was in the target stage; nothing happened.
    Unchanged,
    /// Move confirmed; carries the record returned by the remote store.
    Moved(Deal),
}

#[derive(Debug, Default)]
struct PipelineState {
    deals: Vec<Deal>,
    in_flight: HashSet<DealId>,
    loaded: bool,
}

impl PipelineState {
    fn position(&self, id: DealId) -> Option<usize> {
        self.deals.iter().position(|deal| deal.id == id)
    }

    fn find_mut(&mut self, id: DealId) -> Option<&mut Deal> {
        self.deals.iter_mut().find(|deal| deal.id == id)
    }

    /// Replaces the entry with the same id, or inserts at the front.
    ///
    /// Returns `true` when an existing entry was replaced.
    fn upsert_front(&mut self, deal: Deal) -> bool {
        match self.find_mut(deal.id) {
            Some(slot) => {
                *slot = deal;
                true
            }
            None => {
                self.deals.insert(0, deal);
                false
            }
        }
    }
}

/// Local deal snapshot with optimistic stage moves.
pub struct PipelineStore<R: DealRepository> {
    repo: R,
    state: Mutex<PipelineState>,
    observers: Mutex<ObserverRegistry>,
}

impl<R: DealRepository> PipelineStore<R> {
    /// Creates an empty, not-yet-loaded store over `repo`.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            state: Mutex::new(PipelineState::default()),
            observers: Mutex::new(ObserverRegistry::new()),
        }
    }

    /// Persistence collaborator backing this store.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Replaces the local snapshot with the remote collection.
    ///
    /// On failure the previous snapshot is kept unchanged.
    ///
    /// # Errors
    /// - `PipelineError::Load` when the fetch fails or the fetched
    ///   collection holds invalid records or duplicate ids.
    pub async fn load(&self) -> PipelineResult<Vec<Deal>> {
        let started_at = Instant::now();
        info!("event=pipeline_load module=pipeline status=start");

        let fetched = match self
            .repo
            .fetch_all_deals()
            .await
            .and_then(|deals| check_collection(&deals).map(|()| deals))
        {
            Ok(deals) => deals,
            Err(err) => {
                error!(
                    "event=pipeline_load module=pipeline status=error duration_ms={} error_code=load_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(PipelineError::Load(err));
            }
        };

        let count = fetched.len();
        {
            let mut state = self.lock_state();
            state.deals = fetched.clone();
            state.loaded = true;
        }

        info!(
            "event=pipeline_load module=pipeline status=ok count={count} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        self.notify(&PipelineEvent::Loaded { count });
        Ok(fetched)
    }

    /// Re-reads one deal from the remote store and mirrors it locally.
    ///
    /// Returns `None` (and drops the local entry) when the remote store no
    /// longer has the deal.
    pub async fn refresh_deal(&self, deal_id: DealId) -> PipelineResult<Option<Deal>> {
        let fetched = match self.repo.fetch_deal(deal_id).await {
            Ok(Some(deal)) => match check_returned(deal_id, deal) {
                Ok(deal) => Some(deal),
                Err(err) => return Err(self.remote_failure("refresh", Some(deal_id), err)),
            },
            Ok(None) => None,
            Err(err) => return Err(self.remote_failure("refresh", Some(deal_id), err)),
        };

        let event = {
            let mut state = self.lock_state();
            match &fetched {
                Some(deal) => {
                    if state.upsert_front(deal.clone()) {
                        Some(PipelineEvent::Updated { deal_id })
                    } else {
                        Some(PipelineEvent::Created { deal_id })
                    }
                }
                None => state.position(deal_id).map(|index| {
                    state.deals.remove(index);
                    PipelineEvent::Deleted { deal_id }
                }),
            }
        };

        debug!(
            "event=deal_refresh module=pipeline status=ok deal_id={deal_id} present={}",
            fetched.is_some()
        );
        if let Some(event) = event {
            self.notify(&event);
        }
        Ok(fetched)
    }

    /// Moves a deal to `target`, optimistically.
    ///
    /// The local snapshot reflects the move (and observers are notified)
    /// before the remote call is issued. On remote failure the prior stage is
    /// restored and `PipelineError::StageUpdate` is returned. Dropping the
    /// returned future before it resolves also restores the prior stage.
    ///
    /// # Errors
    /// - `NotFound` when `deal_id` is not in the snapshot.
    /// - `ConcurrentMove` when a move for `deal_id` is still pending.
    /// - `StageUpdate` when the remote store rejects the move.
    pub async fn move_deal(
        &self,
        deal_id: DealId,
        target: Stage,
    ) -> PipelineResult<MoveOutcome> {
        let started_at = Instant::now();

        let (from, ticket) = {
            let mut state = self.lock_state();
            let Some(index) = state.position(deal_id) else {
                warn!(
                    "event=deal_move module=pipeline status=error deal_id={deal_id} to={target:?} error_code=not_found"
                );
                return Err(PipelineError::NotFound(deal_id));
            };
            if state.in_flight.contains(&deal_id) {
                warn!(
                    "event=deal_move module=pipeline status=rejected deal_id={deal_id} to={target:?} error_code=concurrent_move"
                );
                return Err(PipelineError::ConcurrentMove(deal_id));
            }

            let deal = &mut state.deals[index];
            let from = deal.stage;
            if from == target {
                debug!(
                    "event=deal_move module=pipeline status=noop deal_id={deal_id} stage={target:?}"
                );
                return Ok(MoveOutcome::Unchanged);
            }

            let prior_updated_at = deal.updated_at;
            deal.stage = target;
            deal.updated_at = now_epoch_ms().max(prior_updated_at);
            let optimistic_updated_at = deal.updated_at;
            state.in_flight.insert(deal_id);

            let ticket = MoveTicket {
                store: self,
                deal_id,
                prior_stage: from,
                prior_updated_at,
                target,
                optimistic_updated_at,
                settled: false,
            };
            (from, ticket)
        };

        info!(
            "event=deal_move module=pipeline status=optimistic deal_id={deal_id} from={from:?} to={target:?}"
        );
        self.notify(&PipelineEvent::MoveApplied {
            deal_id,
            from,
            to: target,
        });

        let confirmed = self
            .repo
            .update_deal_stage(deal_id, target)
            .await
            .and_then(|deal| check_returned(deal_id, deal));

        match confirmed {
            Ok(deal) => {
                ticket.confirm(deal.clone());
                info!(
                    "event=deal_move module=pipeline status=ok deal_id={deal_id} from={from:?} to={target:?} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(MoveOutcome::Moved(deal))
            }
            Err(source) => {
                let rollback = ticket.roll_back();
                error!(
                    "event=deal_move module=pipeline status=error deal_id={deal_id} from={from:?} to={target:?} rollback={rollback} duration_ms={} error_code=stage_update_failed error={}",
                    started_at.elapsed().as_millis(),
                    source
                );
                Err(PipelineError::StageUpdate {
                    deal_id,
                    target_stage: target,
                    rollback,
                    source,
                })
            }
        }
    }

    /// Like `move_deal`, with the target stage given as a label.
    ///
    /// # Errors
    /// - `Validation` for unknown stage labels; the snapshot is untouched.
    pub async fn move_deal_to(
        &self,
        deal_id: DealId,
        stage: &str,
    ) -> PipelineResult<MoveOutcome> {
        let target = Stage::parse(stage)?;
        self.move_deal(deal_id, target).await
    }

    /// Creates a deal remotely and inserts it at the front of the snapshot.
    pub async fn create_deal(&self, draft: &DealDraft) -> PipelineResult<Deal> {
        draft.validate()?;

        let created = match self.repo.create_deal(draft).await {
            Ok(deal) => match deal.validate() {
                Ok(()) => deal,
                Err(err) => {
                    let err = RepoError::InvalidData(format!("created deal {}: {err}", deal.id));
                    return Err(self.remote_failure("create", Some(deal.id), err));
                }
            },
            Err(err) => return Err(self.remote_failure("create", None, err)),
        };

        let deal_id = created.id;
        self.lock_state().upsert_front(created.clone());
        info!("event=deal_create module=pipeline status=ok deal_id={deal_id}");
        self.notify(&PipelineEvent::Created { deal_id });
        Ok(created)
    }

    /// Applies `patch` remotely and replaces the local entry with the result.
    ///
    /// # Errors
    /// - `Validation` for empty or invalid patches.
    /// - `NotFound` when `deal_id` is not in the snapshot.
    /// - `ConcurrentMove` while a move for `deal_id` is pending.
    pub async fn update_deal(&self, deal_id: DealId, patch: &DealPatch) -> PipelineResult<Deal> {
        patch.validate()?;
        self.ensure_mutable(deal_id)?;

        let updated = match self
            .repo
            .update_deal(deal_id, patch)
            .await
            .and_then(|deal| check_returned(deal_id, deal))
        {
            Ok(deal) => deal,
            Err(err) => return Err(self.remote_failure("update", Some(deal_id), err)),
        };

        let replaced = {
            let mut state = self.lock_state();
            match state.find_mut(deal_id) {
                Some(slot) => {
                    *slot = updated.clone();
                    true
                }
                None => false,
            }
        };

        info!(
            "event=deal_update module=pipeline status=ok deal_id={deal_id} mirrored={replaced}"
        );
        if replaced {
            self.notify(&PipelineEvent::Updated { deal_id });
        }
        Ok(updated)
    }

    /// Deletes a deal remotely and removes it from the snapshot.
    pub async fn delete_deal(&self, deal_id: DealId) -> PipelineResult<()> {
        self.ensure_mutable(deal_id)?;

        if let Err(err) = self.repo.delete_deal(deal_id).await {
            return Err(self.remote_failure("delete", Some(deal_id), err));
        }

        let removed = {
            let mut state = self.lock_state();
            state
                .position(deal_id)
                .map(|index| state.deals.remove(index))
                .is_some()
        };

        info!("event=deal_delete module=pipeline status=ok deal_id={deal_id}");
        if removed {
            self.notify(&PipelineEvent::Deleted { deal_id });
        }
        Ok(())
    }

    /// Groups the current snapshot by stage. Recomputed on every call.
    pub fn group_by_stage(&self) -> BTreeMap<Stage, StageGroup> {
        stage_group::group_by_stage(&self.lock_state().deals)
    }

    /// Clone of the current snapshot, in snapshot order.
    pub fn deals(&self) -> Vec<Deal> {
        self.lock_state().deals.clone()
    }

    pub fn deal(&self, deal_id: DealId) -> Option<Deal> {
        self.lock_state()
            .deals
            .iter()
            .find(|deal| deal.id == deal_id)
            .cloned()
    }

    pub fn deals_in_stage(&self, stage: Stage) -> Vec<Deal> {
        self.lock_state()
            .deals
            .iter()
            .filter(|deal| deal.stage == stage)
            .cloned()
            .collect()
    }

    pub fn stage_total(&self, stage: Stage) -> f64 {
        stage_group::stage_total(&self.lock_state().deals, stage)
    }

    /// Summary metrics over the current snapshot.
    pub fn summary(&self) -> PipelineSummary {
        summarize(&self.lock_state().deals)
    }

    pub fn len(&self) -> usize {
        self.lock_state().deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().deals.is_empty()
    }

    /// Whether at least one `load()` has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.lock_state().loaded
    }

    pub fn is_move_in_flight(&self, deal_id: DealId) -> bool {
        self.lock_state().in_flight.contains(&deal_id)
    }

    /// Registers a change observer.
    ///
    /// Observers run synchronously after each snapshot mutation, outside the
    /// snapshot lock, so they may read the store.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let id = self.lock_observers().register(Arc::new(observer));
        debug!("event=pipeline_subscribe module=pipeline status=ok subscription_id={id}");
        id
    }

    /// Removes a change observer. Returns `false` for unknown handles.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock_observers().remove(id);
        debug!(
            "event=pipeline_unsubscribe module=pipeline status=ok subscription_id={id} removed={removed}"
        );
        removed
    }

    fn ensure_mutable(&self, deal_id: DealId) -> PipelineResult<()> {
        let state = self.lock_state();
        if state.position(deal_id).is_none() {
            return Err(PipelineError::NotFound(deal_id));
        }
        if state.in_flight.contains(&deal_id) {
            return Err(PipelineError::ConcurrentMove(deal_id));
        }
        Ok(())
    }

    /// Converts and logs a failed remote call. `deal_id` is `None` when the
    /// remote store never assigned one (failed create).
    fn remote_failure(
        &self,
        action: &'static str,
        deal_id: Option<DealId>,
        err: RepoError,
    ) -> PipelineError {
        let err = PipelineError::from(err);
        match deal_id {
            Some(deal_id) => error!(
                "event=deal_{action} module=pipeline status=error deal_id={deal_id} error_code={} error={}",
                err.code(),
                err
            ),
            None => error!(
                "event=deal_{action} module=pipeline status=error error_code={} error={}",
                err.code(),
                err
            ),
        }
        err
    }

    fn notify(&self, event: &PipelineEvent) {
        let observers = self.lock_observers().snapshot();
        debug!(
            "event=pipeline_notify module=pipeline kind={} observers={}",
            event.name(),
            observers.len()
        );
        for observer in observers {
            observer(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, ObserverRegistry> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pending optimistic move for one deal.
///
/// Holds the in-flight marker and the values needed to undo the move.
/// Dropping an unsettled ticket rolls the move back.
struct MoveTicket<'a, R: DealRepository> {
    store: &'a PipelineStore<R>,
    deal_id: DealId,
    prior_stage: Stage,
    prior_updated_at: i64,
    target: Stage,
    optimistic_updated_at: i64,
    settled: bool,
}

impl<R: DealRepository> MoveTicket<'_, R> {
    fn confirm(mut self, deal: Deal) {
        self.settled = true;
        let stage = deal.stage;
        let mirrored = {
            let mut state = self.store.lock_state();
            state.in_flight.remove(&self.deal_id);
            match state.find_mut(self.deal_id) {
                Some(slot) => {
                    *slot = deal;
                    true
                }
                None => false,
            }
        };

        if mirrored {
            self.store.notify(&PipelineEvent::MoveConfirmed {
                deal_id: self.deal_id,
                stage,
            });
        }
    }

    fn roll_back(mut self) -> RollbackOutcome {
        self.settled = true;
        self.restore()
    }

    fn restore(&self) -> RollbackOutcome {
        let outcome = {
            let mut state = self.store.lock_state();
            state.in_flight.remove(&self.deal_id);
            match state.find_mut(self.deal_id) {
                None => RollbackOutcome::DealRemoved,
                Some(deal)
                    if deal.stage == self.target
                        && deal.updated_at == self.optimistic_updated_at =>
                {
                    deal.stage = self.prior_stage;
                    deal.updated_at = self.prior_updated_at;
                    RollbackOutcome::Restored
                }
                Some(_) => RollbackOutcome::Superseded,
            }
        };

        if outcome == RollbackOutcome::Restored {
            self.store.notify(&PipelineEvent::MoveRolledBack {
                deal_id: self.deal_id,
                restored: self.prior_stage,
            });
        }
        outcome
    }
}

impl<R: DealRepository> Drop for MoveTicket<'_, R> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let outcome = self.restore();
        warn!(
            "event=deal_move module=pipeline status=cancelled deal_id={} to={:?} rollback={outcome}",
            self.deal_id, self.target
        );
    }
}

/// Rejects collections with invalid records or duplicate ids.
fn check_collection(deals: &[Deal]) -> Result<(), RepoError> {
    let mut seen = HashSet::with_capacity(deals.len());
    for deal in deals {
        deal.validate()
            .map_err(|err| RepoError::InvalidData(format!("deal {}: {err}", deal.id)))?;
        if !seen.insert(deal.id) {
            return Err(RepoError::InvalidData(format!(
                "duplicate deal id {} in fetched collection",
                deal.id
            )));
        }
    }
    Ok(())
}

/// Rejects a returned record that is invalid or belongs to another deal.
fn check_returned(expected_id: DealId, deal: Deal) -> Result<Deal, RepoError> {
    if deal.id != expected_id {
        return Err(RepoError::InvalidData(format!(
            "expected deal {expected_id}, remote returned deal {}",
            deal.id
        )));
    }
    deal.validate()
        .map_err(|err| RepoError::InvalidData(format!("deal {expected_id}: {err}")))?;
    Ok(deal)
}
