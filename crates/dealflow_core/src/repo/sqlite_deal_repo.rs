//! SQLite-backed deal repository.
//!
//! # Responsibility
//! - Persist deals in the `deals` table of a migrated database.
//! - Keep SQL and column naming inside the persistence boundary.
//! - Run every statement on tokio's blocking pool, off the async executor.
//!
//! # Invariants
//! - Write paths validate drafts, patches and resulting records before SQL.
//! - Read paths reject invalid persisted rows instead of masking them.
//! - Listing order is `id DESC`.

use crate::db::migrations::ensure_current;
use crate::db::{open_db, open_db_in_memory};
use crate::model::deal::{now_epoch_ms, Deal, DealDraft, DealId, DealPatch, Stage};
use crate::repo::deal_repo::{DealRepository, RepoError, RepoResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

const DEAL_SELECT_SQL: &str = "SELECT
    id,
    name,
    value,
    stage,
    contact_id,
    expected_close_date,
    probability,
    description,
    created_at,
    updated_at
FROM deals";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Deal repository over one shared SQLite connection.
#[derive(Clone)]
pub struct SqliteDealRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDealRepository {
    /// Wraps a connection whose deal schema is already current.
    ///
    /// Use `db::open_db` (or `open`) to obtain a migrated connection.
    pub fn try_new(conn: Connection) -> RepoResult<Self> {
        ensure_current(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::try_new(open_db(path)?)
    }

    /// Opens a migrated in-memory database.
    pub fn open_in_memory() -> RepoResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> RepoResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> RepoResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            op(&conn)
        })
        .await
        .map_err(|err| RepoError::TaskFailed(err.to_string()))?
    }
}

#[async_trait]
impl DealRepository for SqliteDealRepository {
    async fn fetch_all_deals(&self) -> RepoResult<Vec<Deal>> {
        self.with_conn(list_all).await
    }

    async fn fetch_deal(&self, id: DealId) -> RepoResult<Option<Deal>> {
        self.with_conn(move |conn| get_with(conn, id)).await
    }

    async fn update_deal_stage(&self, id: DealId, stage: Stage) -> RepoResult<Deal> {
        self.with_conn(move |conn| {
            replace(conn, id, |current| {
                let mut updated = current.clone();
                updated.stage = stage;
                updated.updated_at = now_epoch_ms().max(current.updated_at);
                updated
            })
        })
        .await
    }

    async fn create_deal(&self, draft: &DealDraft) -> RepoResult<Deal> {
        draft.validate()?;
        let draft = draft.clone();
        self.with_conn(move |conn| insert(conn, &draft)).await
    }

    async fn update_deal(&self, id: DealId, patch: &DealPatch) -> RepoResult<Deal> {
        patch.validate()?;
        let patch = patch.clone();
        self.with_conn(move |conn| {
            replace(conn, id, |current| patch.apply_to(current, now_epoch_ms()))
        })
        .await
    }

    async fn delete_deal(&self, id: DealId) -> RepoResult<()> {
        self.with_conn(move |conn| remove(conn, id)).await
    }
}

fn list_all(conn: &Connection) -> RepoResult<Vec<Deal>> {
    let mut stmt = conn.prepare(&format!("{DEAL_SELECT_SQL} ORDER BY id DESC;"))?;
    let mut rows = stmt.query([])?;
    let mut deals = Vec::new();

    while let Some(row) = rows.next()? {
        deals.push(parse_deal_row(row)?);
    }

    Ok(deals)
}

fn insert(conn: &Connection, draft: &DealDraft) -> RepoResult<Deal> {
    let now = now_epoch_ms();
    conn.execute(
        "INSERT INTO deals (
            name,
            value,
            stage,
            contact_id,
            expected_close_date,
            probability,
            description,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8);",
        params![
            draft.name.trim(),
            draft.value,
            stage_to_db(draft.stage),
            draft.contact_id,
            draft.expected_close_date.format(DATE_FORMAT).to_string(),
            draft.probability,
            draft.description.as_deref(),
            now,
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_with(conn, id)?.ok_or_else(|| {
        RepoError::InvalidData(format!("inserted deal {id} could not be read back"))
    })
}

fn replace(
    conn: &Connection,
    id: DealId,
    change: impl FnOnce(&Deal) -> Deal,
) -> RepoResult<Deal> {
    let current = get_with(conn, id)?.ok_or(RepoError::NotFound(id))?;
    let updated = change(&current);
    updated.validate()?;

    let changed = conn.execute(
        "UPDATE deals
         SET
            name = ?1,
            value = ?2,
            stage = ?3,
            contact_id = ?4,
            expected_close_date = ?5,
            probability = ?6,
            description = ?7,
            updated_at = ?8
         WHERE id = ?9;",
        params![
            updated.name.as_str(),
            updated.value,
            stage_to_db(updated.stage),
            updated.contact_id,
            updated.expected_close_date.format(DATE_FORMAT).to_string(),
            updated.probability,
            updated.description.as_deref(),
            updated.updated_at,
            id,
        ],
    )?;

    if changed == 0 {
        return Err(RepoError::NotFound(id));
    }

    Ok(updated)
}

fn remove(conn: &Connection, id: DealId) -> RepoResult<()> {
    let changed = conn.execute("DELETE FROM deals WHERE id = ?1;", [id])?;

    if changed == 0 {
        return Err(RepoError::NotFound(id));
    }

    Ok(())
}

fn get_with(conn: &Connection, id: DealId) -> RepoResult<Option<Deal>> {
    let mut stmt = conn.prepare(&format!("{DEAL_SELECT_SQL} WHERE id = ?1;"))?;
    let raw = stmt.query_row([id], parse_deal_row_raw).optional()?;
    raw.map(finish_deal_row).transpose()
}

fn parse_deal_row(row: &Row<'_>) -> RepoResult<Deal> {
    finish_deal_row(parse_deal_row_raw(row)?)
}

struct DealRow {
    id: DealId,
    name: String,
    value: f64,
    stage: String,
    contact_id: Option<i64>,
    expected_close_date: String,
    probability: i64,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn parse_deal_row_raw(row: &Row<'_>) -> rusqlite::Result<DealRow> {
    Ok(DealRow {
        id: row.get("id")?,
        name: row.get("name")?,
        value: row.get("value")?,
        stage: row.get("stage")?,
        contact_id: row.get("contact_id")?,
        expected_close_date: row.get("expected_close_date")?,
        probability: row.get("probability")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn finish_deal_row(row: DealRow) -> RepoResult<Deal> {
    let stage = parse_stage(&row.stage).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid stage `{}` in deals.stage for id {}",
            row.stage, row.id
        ))
    })?;

    let expected_close_date = NaiveDate::parse_from_str(&row.expected_close_date, DATE_FORMAT)
        .map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid date `{}` in deals.expected_close_date for id {}",
                row.expected_close_date, row.id
            ))
        })?;

    let probability = u8::try_from(row.probability).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid probability `{}` in deals.probability for id {}",
            row.probability, row.id
        ))
    })?;

    let deal = Deal {
        id: row.id,
        name: row.name,
        value: row.value,
        stage,
        contact_id: row.contact_id,
        expected_close_date,
        probability,
        description: row.description,
        created_at: row.created_at,
        updated_at: row.updated_at,
    };
    deal.validate()
        .map_err(|err| RepoError::InvalidData(format!("deal {}: {err}", deal.id)))?;
    Ok(deal)
}

fn stage_to_db(stage: Stage) -> &'static str {
    match stage {
        Stage::Lead => "lead",
        Stage::Qualified => "qualified",
        Stage::Proposal => "proposal",
        Stage::Negotiation => "negotiation",
        Stage::ClosedWon => "closed_won",
    }
}

fn parse_stage(value: &str) -> Option<Stage> {
    match value {
        "lead" => Some(Stage::Lead),
        "qualified" => Some(Stage::Qualified),
        "proposal" => Some(Stage::Proposal),
        "negotiation" => Some(Stage::Negotiation),
        "closed_won" => Some(Stage::ClosedWon),
        _ => None,
    }
}
