//! In-memory deal repository.
//!
//! # Responsibility
//! - Back the pipeline store without a database (demo runs and tests).
//!
//! # Invariants
//! - Ids are assigned monotonically and never reused.
//! - Listing order is newest first (`id DESC`).

use crate::model::deal::{now_epoch_ms, Deal, DealDraft, DealId, DealPatch, Stage};
use crate::repo::deal_repo::{DealRepository, RepoError, RepoResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    deals: Vec<Deal>,
    next_id: DealId,
}

/// Deal repository holding records in process memory.
#[derive(Debug)]
pub struct InMemoryDealRepository {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryDealRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDealRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                deals: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Creates a repository pre-populated with `deals`.
    ///
    /// Rejects invalid records and duplicate ids. New ids continue after the
    /// largest seeded id.
    pub fn with_deals(deals: Vec<Deal>) -> RepoResult<Self> {
        let mut seen = HashSet::new();
        for deal in &deals {
            deal.validate()?;
            if !seen.insert(deal.id) {
                return Err(RepoError::InvalidData(format!(
                    "duplicate deal id {} in seed data",
                    deal.id
                )));
            }
        }

        let next_id = deals.iter().map(|deal| deal.id).max().unwrap_or(0) + 1;
        Ok(Self {
            state: Mutex::new(MemoryState { deals, next_id }),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().deals.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn modify(
        &self,
        id: DealId,
        change: impl FnOnce(&Deal) -> RepoResult<Deal>,
    ) -> RepoResult<Deal> {
        let mut state = self.lock();
        let slot = state
            .deals
            .iter_mut()
            .find(|deal| deal.id == id)
            .ok_or(RepoError::NotFound(id))?;
        let updated = change(slot)?;
        updated.validate()?;
        *slot = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl DealRepository for InMemoryDealRepository {
    async fn fetch_all_deals(&self) -> RepoResult<Vec<Deal>> {
        let mut deals = self.lock().deals.clone();
        deals.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(deals)
    }

    async fn fetch_deal(&self, id: DealId) -> RepoResult<Option<Deal>> {
        Ok(self.lock().deals.iter().find(|deal| deal.id == id).cloned())
    }

    async fn update_deal_stage(&self, id: DealId, stage: Stage) -> RepoResult<Deal> {
        self.modify(id, |current| {
            let mut updated = current.clone();
            updated.stage = stage;
            updated.updated_at = now_epoch_ms().max(current.updated_at);
            Ok(updated)
        })
    }

    async fn create_deal(&self, draft: &DealDraft) -> RepoResult<Deal> {
        draft.validate()?;

        let mut state = self.lock();
        let deal = Deal::from_draft(state.next_id, draft, now_epoch_ms());
        state.next_id += 1;
        state.deals.push(deal.clone());
        Ok(deal)
    }

    async fn update_deal(&self, id: DealId, patch: &DealPatch) -> RepoResult<Deal> {
        patch.validate()?;
        self.modify(id, |current| {
            Ok(patch.apply_to(current, now_epoch_ms()))
        })
    }

    async fn delete_deal(&self, id: DealId) -> RepoResult<()> {
        let mut state = self.lock();
        let before = state.deals.len();
        state.deals.retain(|deal| deal.id != id);
        if state.deals.len() == before {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}
