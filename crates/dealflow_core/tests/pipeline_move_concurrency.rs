mod common;

use common::{deal, lead_and_qualified, loaded_store, record_events, taken};
use dealflow_core::{
    DealDraft, MoveOutcome, PipelineError, PipelineEvent, RollbackOutcome, Stage,
};

#[tokio::test]
async fn optimistic_stage_is_visible_while_remote_call_is_pending() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    let gate = repo.hold_next_stage_update();

    let moving = store.move_deal(1, Stage::Qualified);
    let observe = async {
        gate.started.await.unwrap();
        assert_eq!(store.deal(1).unwrap().stage, Stage::Qualified);
        assert_eq!(store.stage_total(Stage::Qualified), 300.0);
        assert!(store.group_by_stage()[&Stage::Lead].is_empty());
        assert!(store.is_move_in_flight(1));
        gate.release.send(()).unwrap();
    };

    let (outcome, ()) = tokio::join!(moving, observe);

    assert!(matches!(outcome.unwrap(), MoveOutcome::Moved(_)));
    assert!(!store.is_move_in_flight(1));
}

#[tokio::test]
async fn overlapping_move_for_same_deal_is_rejected() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    let gate = repo.hold_next_stage_update();

    let first = store.move_deal(1, Stage::Qualified);
    let second = async {
        gate.started.await.unwrap();
        let rejected = store.move_deal(1, Stage::Proposal).await;
        gate.release.send(()).unwrap();
        rejected
    };

    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first.unwrap(), MoveOutcome::Moved(_)));
    let err = second.unwrap_err();
    assert!(matches!(err, PipelineError::ConcurrentMove(1)));
    assert_eq!(err.user_message(), "Deal is already being moved");
    assert_eq!(store.deal(1).unwrap().stage, Stage::Qualified);
    assert_eq!(repo.stage_calls(), 1);
}

#[tokio::test]
async fn moves_for_different_deals_proceed_independently() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    let gate = repo.hold_next_stage_update();

    let first = store.move_deal(1, Stage::Proposal);
    let second = async {
        gate.started.await.unwrap();
        let moved = store.move_deal(2, Stage::Negotiation).await;
        gate.release.send(()).unwrap();
        moved
    };

    let (first, second) = tokio::join!(first, second);

    first.unwrap();
    second.unwrap();
    assert_eq!(store.deal(1).unwrap().stage, Stage::Proposal);
    assert_eq!(store.deal(2).unwrap().stage, Stage::Negotiation);
}

#[tokio::test]
async fn crud_on_deal_with_pending_move_is_rejected() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    let gate = repo.hold_next_stage_update();

    let moving = store.move_deal(1, Stage::Qualified);
    let edits = async {
        gate.started.await.unwrap();
        let deleted = store.delete_deal(1).await;
        gate.release.send(()).unwrap();
        deleted
    };

    let (moved, deleted) = tokio::join!(moving, edits);

    moved.unwrap();
    assert!(matches!(deleted.unwrap_err(), PipelineError::ConcurrentMove(1)));
    assert_eq!(repo.write_calls(), 0);
    assert!(store.deal(1).is_some());
}

#[tokio::test]
async fn dropping_pending_move_rolls_back() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    let before = store.deal(1).unwrap();
    let events = record_events(&store);
    let gate = repo.hold_next_stage_update();

    tokio::select! {
        _ = store.move_deal(1, Stage::ClosedWon) => panic!("move resolved while held"),
        _ = gate.started => {}
    }

    assert_eq!(store.deal(1).unwrap(), before);
    assert!(!store.is_move_in_flight(1));
    assert_eq!(
        taken(&events),
        vec![
            PipelineEvent::MoveApplied {
                deal_id: 1,
                from: Stage::Lead,
                to: Stage::ClosedWon,
            },
            PipelineEvent::MoveRolledBack {
                deal_id: 1,
                restored: Stage::Lead,
            },
        ]
    );

    store.move_deal(1, Stage::Qualified).await.unwrap();
    assert_eq!(store.deal(1).unwrap().stage, Stage::Qualified);
}

#[tokio::test]
async fn rollback_keeps_state_loaded_during_pending_move() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    repo.fail_stage_updates(true);
    let gate = repo.hold_next_stage_update();

    let moving = store.move_deal(1, Stage::Negotiation);
    let reload = async {
        gate.started.await.unwrap();
        let mut newer = deal(1, Stage::Proposal, 150.0);
        newer.updated_at += 60_000;
        repo.override_next_fetch(vec![newer, deal(2, Stage::Qualified, 200.0)]);
        store.load().await.unwrap();
        gate.release.send(()).unwrap();
    };

    let (moved, ()) = tokio::join!(moving, reload);

    match moved.unwrap_err() {
        PipelineError::StageUpdate { rollback, .. } => {
            assert_eq!(rollback, RollbackOutcome::Superseded)
        }
        other => panic!("unexpected error: {other}"),
    }
    let current = store.deal(1).unwrap();
    assert_eq!(current.stage, Stage::Proposal);
    assert_eq!(current.value, 150.0);
    assert!(!store.is_move_in_flight(1));
}

#[tokio::test]
async fn rollback_reports_deal_removed_by_reload() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    repo.fail_stage_updates(true);
    let gate = repo.hold_next_stage_update();

    let moving = store.move_deal(1, Stage::Qualified);
    let reload = async {
        gate.started.await.unwrap();
        repo.override_next_fetch(vec![deal(2, Stage::Qualified, 200.0)]);
        store.load().await.unwrap();
        gate.release.send(()).unwrap();
    };

    let (moved, ()) = tokio::join!(moving, reload);

    match moved.unwrap_err() {
        PipelineError::StageUpdate { rollback, .. } => {
            assert_eq!(rollback, RollbackOutcome::DealRemoved)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.deal(1).is_none());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn create_during_pending_move_does_not_disturb_rollback() {
    let (store, repo) = loaded_store(lead_and_qualified()).await;
    repo.fail_stage_updates(true);
    let gate = repo.hold_next_stage_update();

    let moving = store.move_deal(2, Stage::Proposal);
    let create = async {
        gate.started.await.unwrap();
        let created = store
            .create_deal(&DealDraft::new("Umbrella", 75.0, common::close_date()))
            .await;
        gate.release.send(()).unwrap();
        created
    };

    let (moved, created) = tokio::join!(moving, create);

    assert!(matches!(
        moved.unwrap_err(),
        PipelineError::StageUpdate {
            rollback: RollbackOutcome::Restored,
            ..
        }
    ));
    assert_eq!(created.unwrap().id, 3);
    assert_eq!(store.deal(2).unwrap().stage, Stage::Qualified);
    assert_eq!(store.stage_total(Stage::Lead), 175.0);
}
