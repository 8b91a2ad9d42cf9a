//! Deal schema steps and the runner that applies them.
//!
//! # Invariants
//! - Step versions start at 1 and increase by one.
//! - All pending steps apply in one transaction; `user_version` follows
//!   each step inside it.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "deals",
        sql: include_str!("0001_deals.sql"),
    },
    SchemaStep {
        version: 2,
        name: "deal_stage_index",
        sql: include_str!("0002_deal_stage_index.sql"),
    },
];

/// Deal schema version this build writes.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.len() as u32
}

/// Reads the schema version recorded in `conn`.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Fails unless `conn` holds exactly the schema this build writes.
pub fn ensure_current(conn: &Connection) -> DbResult<()> {
    let found = schema_version(conn)?;
    reject_newer(found)?;
    if found < latest_version() {
        return Err(DbError::SchemaOutdated {
            found,
            expected: latest_version(),
        });
    }
    Ok(())
}

/// Applies every pending schema step and returns how many ran.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let from = schema_version(conn)?;
    reject_newer(from)?;

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > from)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)
            .map_err(|source| DbError::SchemaStep {
                version: step.version,
                name: step.name,
                source,
            })?;
        tx.pragma_update(None, "user_version", step.version)?;
        debug!(
            "event=db_schema_step module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={from} to_version={} steps={}",
        latest_version(),
        pending.len()
    );
    Ok(pending.len())
}

fn reject_newer(found: u32) -> DbResult<()> {
    let supported = latest_version();
    if found > supported {
        return Err(DbError::SchemaTooNew { found, supported });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{latest_version, SCHEMA_STEPS};

    #[test]
    fn step_versions_are_contiguous_from_one() {
        for (index, step) in SCHEMA_STEPS.iter().enumerate() {
            assert_eq!(step.version as usize, index + 1, "step {}", step.name);
        }
        assert_eq!(latest_version(), 2);
    }
}
