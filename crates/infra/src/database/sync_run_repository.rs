//! Sync run log repository

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::sync::ports::SyncRunRepository;
use calsync_domain::{CalSyncError, Result as DomainResult, SyncCounts, SyncRun, TimeWindow};
use rusqlite::{params, Connection, Row};
use tokio::task;

use super::columns::{
    decode_label, decode_optional_time, decode_time, decode_uuid, encode_optional_time,
    encode_time,
};
use super::manager::{map_join_error, map_sql_error, DbManager};

const SELECT_COLUMNS: &str = "id, config_id, status, direction, window_start, window_end,
     created_count, updated_count, deleted_count, error_message, started_at, finished_at";

/// SQLite-backed run log
pub struct SqliteSyncRunRepository {
    db: Arc<DbManager>,
}

impl SqliteSyncRunRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    async fn record_run(&self, run: &SyncRun) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let run = run.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            insert_run(&conn, &run).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn finish_run(&self, run: &SyncRun) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let run = run.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let changed = update_run(&conn, &run).map_err(map_sql_error)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("sync run {}", run.id)));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn recent_runs(&self, config_id: i64, limit: usize) -> DomainResult<Vec<SyncRun>> {
        let db = Arc::clone(&self.db);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        task::spawn_blocking(move || -> DomainResult<Vec<SyncRun>> {
            let conn = db.get_connection()?;
            query_recent(&conn, config_id, limit).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn insert_run(conn: &Connection, run: &SyncRun) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sync_runs (
            id, config_id, status, direction, window_start, window_end, created_count,
            updated_count, deleted_count, error_message, started_at, finished_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            run.id.to_string(),
            run.config_id,
            run.status.to_string(),
            run.direction.to_string(),
            encode_optional_time(run.window.as_ref().map(|window| &window.start)),
            encode_optional_time(run.window.as_ref().map(|window| &window.end)),
            run.counts.created,
            run.counts.updated,
            run.counts.deleted,
            &run.error_message,
            encode_time(&run.started_at),
            encode_optional_time(run.finished_at.as_ref()),
        ],
    )?;
    Ok(())
}

fn update_run(conn: &Connection, run: &SyncRun) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE sync_runs SET status = ?1, created_count = ?2, updated_count = ?3,
            deleted_count = ?4, error_message = ?5, finished_at = ?6
         WHERE id = ?7",
        params![
            run.status.to_string(),
            run.counts.created,
            run.counts.updated,
            run.counts.deleted,
            &run.error_message,
            encode_optional_time(run.finished_at.as_ref()),
            run.id.to_string(),
        ],
    )
}

fn query_recent(conn: &Connection, config_id: i64, limit: i64) -> rusqlite::Result<Vec<SyncRun>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM sync_runs WHERE config_id = ?1
         ORDER BY started_at DESC, id DESC LIMIT ?2"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![config_id, limit], map_run_row)?;
    rows.collect()
}

fn map_run_row(row: &Row<'_>) -> rusqlite::Result<SyncRun> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let direction: String = row.get(3)?;
    let started_at: String = row.get(10)?;

    let window_start = decode_optional_time(4, row.get(4)?)?;
    let window_end = decode_optional_time(5, row.get(5)?)?;
    let window = match (window_start, window_end) {
        (Some(start), Some(end)) => Some(TimeWindow { start, end }),
        _ => None,
    };

    Ok(SyncRun {
        id: decode_uuid(0, &id)?,
        config_id: row.get(1)?,
        status: decode_label(2, &status)?,
        direction: decode_label(3, &direction)?,
        window,
        counts: SyncCounts {
            created: row.get(6)?,
            updated: row.get(7)?,
            deleted: row.get(8)?,
        },
        error_message: row.get(9)?,
        started_at: decode_time(10, &started_at)?,
        finished_at: decode_optional_time(11, row.get(11)?)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
