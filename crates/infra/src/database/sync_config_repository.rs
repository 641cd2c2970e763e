//! Sync configuration repository
//!
//! Stores [`SyncConfiguration`] rows. Deleting a configuration cascades to its
//! mappings and run log, and unlinks its bidirectional partner through
//! `ON DELETE SET NULL`; the partner falls back to a one-way direction.
//! A configuration belongs to at most one pair at a time.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::sync::ports::ConfigurationStore;
use calsync_domain::{
    AutoSyncSettings, CalSyncError, PrivacySettings, Result as DomainResult, SyncConfiguration,
    SyncDirection,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::task;
use tracing::debug;

use super::columns::{
    decode_label, decode_optional_time, decode_time, encode_optional_time, encode_time,
};
use super::manager::{map_join_error, map_sql_error, DbManager};

const SELECT_COLUMNS: &str = "id, user_id, source_calendar_id, dest_calendar_id, lookahead_days,
     direction, paired_config_id, privacy_enabled, privacy_placeholder, auto_sync_enabled,
     auto_sync_cron, auto_sync_timezone, destination_color_id, is_active, last_synced_at,
     created_at, updated_at";

/// SQLite-backed configuration store
pub struct SqliteConfigurationRepository {
    db: Arc<DbManager>,
}

impl SqliteConfigurationRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Persist a new configuration and return its assigned id. The `id` field
    /// of the argument is ignored.
    pub async fn insert(&self, config: &SyncConfiguration) -> DomainResult<i64> {
        let db = Arc::clone(&self.db);
        let config = config.clone();

        task::spawn_blocking(move || -> DomainResult<i64> {
            let conn = db.get_connection()?;
            insert_config(&conn, &config).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Overwrite every mutable column of an existing configuration.
    pub async fn update(&self, config: &SyncConfiguration) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let config = config.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let changed = update_config(&conn, &config).map_err(map_sql_error)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("sync configuration {}", config.id)));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    /// Delete a configuration. Returns `false` if it did not exist.
    pub async fn delete(&self, config_id: i64) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<bool> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;
            let now = encode_time(&Utc::now());
            let orphaned = tx
                .execute(
                    "UPDATE sync_configs SET paired_config_id = NULL, direction = ?1, updated_at = ?2
                     WHERE paired_config_id = ?3",
                    params![SyncDirection::OneWay.to_string(), now, config_id],
                )
                .map_err(map_sql_error)?;
            let removed = tx
                .execute("DELETE FROM sync_configs WHERE id = ?1", params![config_id])
                .map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;
            debug!(config_id, removed, orphaned, "sync configuration deleted");
            Ok(removed > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Link two configurations as the forward and reverse halves of a
    /// bidirectional pair. Their calendars must be swapped, and neither may
    /// already be paired with a third configuration. Relinking the same two
    /// configurations is allowed and may swap their roles.
    pub async fn link_pair(&self, forward_id: i64, reverse_id: i64) -> DomainResult<()> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<()> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;

            let forward = query_config(&tx, forward_id)
                .map_err(map_sql_error)?
                .ok_or_else(|| CalSyncError::NotFound(format!("sync configuration {forward_id}")))?;
            let reverse = query_config(&tx, reverse_id)
                .map_err(map_sql_error)?
                .ok_or_else(|| CalSyncError::NotFound(format!("sync configuration {reverse_id}")))?;

            if forward.id == reverse.id
                || forward.source_calendar_id != reverse.dest_calendar_id
                || forward.dest_calendar_id != reverse.source_calendar_id
            {
                return Err(CalSyncError::InvalidInput(format!(
                    "configurations {forward_id} and {reverse_id} do not mirror each other's calendars"
                )));
            }
            for (config, partner_id) in [(&forward, reverse_id), (&reverse, forward_id)] {
                if let Some(current) = config.paired_config_id.filter(|id| *id != partner_id) {
                    return Err(CalSyncError::InvalidInput(format!(
                        "sync configuration {} is already paired with {current}",
                        config.id
                    )));
                }
            }

            let now = encode_time(&Utc::now());
            set_pairing(&tx, forward_id, reverse_id, SyncDirection::BidirectionalForward, &now)
                .map_err(map_sql_error)?;
            set_pairing(&tx, reverse_id, forward_id, SyncDirection::BidirectionalReverse, &now)
                .map_err(map_sql_error)?;
            tx.commit().map_err(map_sql_error)?;

            debug!(forward_id, reverse_id, "bidirectional pair linked");
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    pub async fn list_for_user(&self, user_id: &str) -> DomainResult<Vec<SyncConfiguration>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Vec<SyncConfiguration>> {
            let conn = db.get_connection()?;
            query_configs_for_user(&conn, &user_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl ConfigurationStore for SqliteConfigurationRepository {
    async fn get_configuration(&self, config_id: i64) -> DomainResult<Option<SyncConfiguration>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Option<SyncConfiguration>> {
            let conn = db.get_connection()?;
            query_config(&conn, config_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_schedulable(&self) -> DomainResult<Vec<SyncConfiguration>> {
        let db = Arc::clone(&self.db);

        let rows = task::spawn_blocking(move || -> DomainResult<Vec<SyncConfiguration>> {
            let conn = db.get_connection()?;
            query_auto_sync_candidates(&conn).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)??;

        // Whitespace-only cron strings pass the SQL filter.
        Ok(rows.into_iter().filter(SyncConfiguration::is_schedulable).collect())
    }

    async fn mark_synced(&self, config_id: i64, synced_at: DateTime<Utc>) -> DomainResult<()> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let stamp = encode_time(&synced_at);
            let changed = conn
                .execute(
                    "UPDATE sync_configs SET last_synced_at = ?1, updated_at = ?2 WHERE id = ?3",
                    params![stamp, encode_time(&Utc::now()), config_id],
                )
                .map_err(map_sql_error)?;
            if changed == 0 {
                return Err(CalSyncError::NotFound(format!("sync configuration {config_id}")));
            }
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn insert_config(conn: &Connection, config: &SyncConfiguration) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO sync_configs (
            user_id, source_calendar_id, dest_calendar_id, lookahead_days, direction,
            paired_config_id, privacy_enabled, privacy_placeholder, auto_sync_enabled,
            auto_sync_cron, auto_sync_timezone, destination_color_id, is_active,
            last_synced_at, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            &config.user_id,
            &config.source_calendar_id,
            &config.dest_calendar_id,
            config.lookahead_days,
            config.direction.to_string(),
            config.paired_config_id,
            config.privacy.enabled,
            &config.privacy.placeholder_text,
            config.auto_sync.enabled,
            &config.auto_sync.cron_expression,
            &config.auto_sync.timezone,
            &config.destination_color_id,
            config.is_active,
            encode_optional_time(config.last_synced_at.as_ref()),
            encode_time(&config.created_at),
            encode_time(&config.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_config(conn: &Connection, config: &SyncConfiguration) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE sync_configs SET
            user_id = ?1, source_calendar_id = ?2, dest_calendar_id = ?3, lookahead_days = ?4,
            direction = ?5, paired_config_id = ?6, privacy_enabled = ?7,
            privacy_placeholder = ?8, auto_sync_enabled = ?9, auto_sync_cron = ?10,
            auto_sync_timezone = ?11, destination_color_id = ?12, is_active = ?13,
            last_synced_at = ?14, updated_at = ?15
         WHERE id = ?16",
        params![
            &config.user_id,
            &config.source_calendar_id,
            &config.dest_calendar_id,
            config.lookahead_days,
            config.direction.to_string(),
            config.paired_config_id,
            config.privacy.enabled,
            &config.privacy.placeholder_text,
            config.auto_sync.enabled,
            &config.auto_sync.cron_expression,
            &config.auto_sync.timezone,
            &config.destination_color_id,
            config.is_active,
            encode_optional_time(config.last_synced_at.as_ref()),
            encode_time(&Utc::now()),
            config.id,
        ],
    )
}

fn set_pairing(
    conn: &Connection,
    config_id: i64,
    partner_id: i64,
    direction: SyncDirection,
    now: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE sync_configs SET paired_config_id = ?1, direction = ?2, updated_at = ?3
         WHERE id = ?4",
        params![partner_id, direction.to_string(), now, config_id],
    )
}

fn query_config(conn: &Connection, config_id: i64) -> rusqlite::Result<Option<SyncConfiguration>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM sync_configs WHERE id = ?1");

    match conn.query_row(&sql, params![config_id], map_config_row) {
        Ok(config) => Ok(Some(config)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err),
    }
}

fn query_auto_sync_candidates(conn: &Connection) -> rusqlite::Result<Vec<SyncConfiguration>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM sync_configs
         WHERE is_active = 1 AND auto_sync_enabled = 1 AND auto_sync_cron IS NOT NULL
         ORDER BY id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], map_config_row)?;
    rows.collect()
}

fn query_configs_for_user(
    conn: &Connection,
    user_id: &str,
) -> rusqlite::Result<Vec<SyncConfiguration>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM sync_configs WHERE user_id = ?1 ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], map_config_row)?;
    rows.collect()
}

fn map_config_row(row: &Row<'_>) -> rusqlite::Result<SyncConfiguration> {
    let direction: String = row.get(5)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    Ok(SyncConfiguration {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source_calendar_id: row.get(2)?,
        dest_calendar_id: row.get(3)?,
        lookahead_days: row.get(4)?,
        direction: decode_label(5, &direction)?,
        paired_config_id: row.get(6)?,
        privacy: PrivacySettings { enabled: row.get(7)?, placeholder_text: row.get(8)? },
        auto_sync: AutoSyncSettings {
            enabled: row.get(9)?,
            cron_expression: row.get(10)?,
            timezone: row.get(11)?,
        },
        destination_color_id: row.get(12)?,
        is_active: row.get(13)?,
        last_synced_at: decode_optional_time(14, row.get(14)?)?,
        created_at: decode_time(15, &created_at)?,
        updated_at: decode_time(16, &updated_at)?,
    })
}

// ============================================================================
// Tests
// ============================================================================
