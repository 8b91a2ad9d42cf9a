#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use dealflow_core::{
    Deal, DealDraft, DealId, DealPatch, DealRepository, InMemoryDealRepository, PipelineEvent,
    PipelineStore, RepoError, RepoResult, Stage,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub fn close_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 12, 15).unwrap()
}

pub fn deal(id: DealId, stage: Stage, value: f64) -> Deal {
    let mut draft = DealDraft::new(format!("deal-{id}"), value, close_date());
    draft.stage = stage;
    Deal::from_draft(id, &draft, 1_700_000_000_000)
}

/// `[{1, Lead, 100}, {2, Qualified, 200}]`
pub fn lead_and_qualified() -> Vec<Deal> {
    vec![deal(1, Stage::Lead, 100.0), deal(2, Stage::Qualified, 200.0)]
}

/// Handles for a stage update held open by `ScriptedRepository`.
pub struct StageGate {
    /// Resolves once the store has issued the remote call.
    pub started: oneshot::Receiver<()>,
    /// Send to let the remote call finish.
    pub release: oneshot::Sender<()>,
}

struct PendingGate {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-memory repository with failure injection and call counting.
pub struct ScriptedRepository {
    inner: InMemoryDealRepository,
    fetch_override: Mutex<Option<Vec<Deal>>>,
    gate: Mutex<Option<PendingGate>>,
    fail_fetch: AtomicBool,
    fail_stage_updates: AtomicBool,
    fail_writes: AtomicBool,
    stage_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl ScriptedRepository {
    pub fn new(deals: Vec<Deal>) -> Self {
        Self {
            inner: InMemoryDealRepository::with_deals(deals).unwrap(),
            fetch_override: Mutex::new(None),
            gate: Mutex::new(None),
            fail_fetch: AtomicBool::new(false),
            fail_stage_updates: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            stage_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stage_updates(&self, fail: bool) {
        self.fail_stage_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `fetch_all_deals` return `deals` verbatim.
    pub fn override_next_fetch(&self, deals: Vec<Deal>) {
        *self.fetch_override.lock().unwrap() = Some(deals);
    }

    /// Holds the next `update_deal_stage` call until released.
    pub fn hold_next_stage_update(&self) -> StageGate {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(PendingGate {
            started: started_tx,
            release: release_rx,
        });
        StageGate {
            started: started_rx,
            release: release_tx,
        }
    }

    pub fn stage_calls(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryDealRepository {
        &self.inner
    }

    fn check_writes(&self) -> RepoResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Server {
                status: 500,
                message: "write rejected".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DealRepository for ScriptedRepository {
    async fn fetch_all_deals(&self) -> RepoResult<Vec<Deal>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(RepoError::Network("connection refused".into()));
        }
        let override_deals = self.fetch_override.lock().unwrap().take();
        match override_deals {
            Some(deals) => Ok(deals),
            None => self.inner.fetch_all_deals().await,
        }
    }

    async fn fetch_deal(&self, id: DealId) -> RepoResult<Option<Deal>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(RepoError::Network("connection refused".into()));
        }
        self.inner.fetch_deal(id).await
    }

    async fn update_deal_stage(&self, id: DealId, stage: Stage) -> RepoResult<Deal> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);

        let pending = self.gate.lock().unwrap().take();
        if let Some(pending) = pending {
            let _ = pending.started.send(());
            let _ = pending.release.await;
        }

        if self.fail_stage_updates.load(Ordering::SeqCst) {
            return Err(RepoError::Server {
                status: 503,
                message: "stage update unavailable".into(),
            });
        }
        self.inner.update_deal_stage(id, stage).await
    }

    async fn create_deal(&self, draft: &DealDraft) -> RepoResult<Deal> {
        self.check_writes()?;
        self.inner.create_deal(draft).await
    }

    async fn update_deal(&self, id: DealId, patch: &DealPatch) -> RepoResult<Deal> {
        self.check_writes()?;
        self.inner.update_deal(id, patch).await
    }

    async fn delete_deal(&self, id: DealId) -> RepoResult<()> {
        self.check_writes()?;
        self.inner.delete_deal(id).await
    }
}

pub type TestStore = PipelineStore<Arc<ScriptedRepository>>;

/// Builds a store over `deals` and loads it.
pub async fn loaded_store(deals: Vec<Deal>) -> (TestStore, Arc<ScriptedRepository>) {
    let repo = Arc::new(ScriptedRepository::new(deals));
    let store = PipelineStore::new(Arc::clone(&repo));
    store.load().await.unwrap();
    (store, repo)
}

/// Records every event the store emits from now on.
pub fn record_events(store: &TestStore) -> Arc<Mutex<Vec<PipelineEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    store.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

pub fn taken(events: &Arc<Mutex<Vec<PipelineEvent>>>) -> Vec<PipelineEvent> {
    std::mem::take(&mut *events.lock().unwrap())
}
