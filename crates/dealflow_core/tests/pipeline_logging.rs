mod common;

use common::{lead_and_qualified, loaded_store};
use dealflow_core::DealDraft;
use log::{LevelFilter, Log, Metadata, Record};
use std::sync::Mutex;

static RECORDS: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        RECORDS.lock().unwrap().push(record.args().to_string());
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

fn records_for(event: &str) -> Vec<String> {
    let needle = format!("event={event} ");
    RECORDS
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.starts_with(&needle))
        .cloned()
        .collect()
}

#[tokio::test]
async fn failed_remote_calls_log_only_known_deal_ids() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let (store, repo) = loaded_store(lead_and_qualified()).await;
    repo.fail_writes(true);

    store
        .create_deal(&DealDraft::new("Stark", 40.0, common::close_date()))
        .await
        .unwrap_err();
    store.delete_deal(2).await.unwrap_err();

    let create = records_for("deal_create");
    assert_eq!(create.len(), 1);
    assert!(create[0].contains("status=error"));
    assert!(create[0].contains("error_code=remote_failed"));
    assert!(!create[0].contains("deal_id="));

    let delete = records_for("deal_delete");
    assert_eq!(delete.len(), 1);
    assert!(delete[0].contains("deal_id=2"));
}
