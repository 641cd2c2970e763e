//! Event mapping repository
//!
//! One row per `(sync_config_id, source_event_id)`; writes are upserts so a
//! re-applied mutation converges on the same row.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::sync::ports::MappingStore;
use calsync_domain::{EventMapping, Result as DomainResult};
use rusqlite::{params, Connection, Row};
use tokio::task;

use super::columns::{
    decode_optional_time, decode_time, decode_uuid, encode_optional_time, encode_time,
};
use super::manager::{map_join_error, map_sql_error, DbManager};

const SELECT_COLUMNS: &str = "sync_config_id, source_event_id, dest_event_id, sync_cluster_id,
     source_last_modified, dest_last_modified, content_hash, origin_calendar_id,
     privacy_applied, last_synced_at";

/// SQLite-backed mapping store
pub struct SqliteMappingRepository {
    db: Arc<DbManager>,
}

impl SqliteMappingRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MappingStore for SqliteMappingRepository {
    async fn find_mapping(
        &self,
        config_id: i64,
        source_event_id: &str,
    ) -> DomainResult<Option<EventMapping>> {
        let db = Arc::clone(&self.db);
        let source_event_id = source_event_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<EventMapping>> {
            let conn = db.get_connection()?;
            query_single(&conn, "source_event_id", config_id, &source_event_id)
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_by_dest_event(
        &self,
        config_id: i64,
        dest_event_id: &str,
    ) -> DomainResult<Option<EventMapping>> {
        let db = Arc::clone(&self.db);
        let dest_event_id = dest_event_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<EventMapping>> {
            let conn = db.get_connection()?;
            query_single(&conn, "dest_event_id", config_id, &dest_event_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert_mapping(&self, mapping: &EventMapping) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let mapping = mapping.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            upsert(&conn, &mapping).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete_mapping(&self, config_id: i64, source_event_id: &str) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let source_event_id = source_event_id.to_string();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = db.get_connection()?;
            let removed = conn
                .execute(
                    "DELETE FROM event_mappings WHERE sync_config_id = ?1 AND source_event_id = ?2",
                    params![config_id, source_event_id],
                )
                .map_err(map_sql_error)?;
            Ok(removed > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_mappings(&self, config_id: i64) -> DomainResult<Vec<EventMapping>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<EventMapping>> {
            let conn = db.get_connection()?;
            query_for_config(&conn, config_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn upsert(conn: &Connection, mapping: &EventMapping) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO event_mappings (
            sync_config_id, source_event_id, dest_event_id, sync_cluster_id,
            source_last_modified, dest_last_modified, content_hash, origin_calendar_id,
            privacy_applied, last_synced_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (sync_config_id, source_event_id) DO UPDATE SET
            dest_event_id = excluded.dest_event_id,
            sync_cluster_id = excluded.sync_cluster_id,
            source_last_modified = excluded.source_last_modified,
            dest_last_modified = excluded.dest_last_modified,
            content_hash = excluded.content_hash,
            origin_calendar_id = excluded.origin_calendar_id,
            privacy_applied = excluded.privacy_applied,
            last_synced_at = excluded.last_synced_at",
        params![
            mapping.sync_config_id,
            &mapping.source_event_id,
            &mapping.dest_event_id,
            mapping.sync_cluster_id.to_string(),
            encode_optional_time(mapping.source_last_modified.as_ref()),
            encode_optional_time(mapping.dest_last_modified.as_ref()),
            &mapping.content_hash,
            &mapping.origin_calendar_id,
            mapping.privacy_applied,
            encode_time(&mapping.last_synced_at),
        ],
    )?;
    Ok(())
}

/// Look a mapping up by one of its two event-id columns.
fn query_single(
    conn: &Connection,
    column: &'static str,
    config_id: i64,
    event_id: &str,
) -> rusqlite::Result<Option<EventMapping>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM event_mappings
         WHERE sync_config_id = ?1 AND {column} = ?2
         ORDER BY last_synced_at DESC LIMIT 1"
    );

    match conn.query_row(&sql, params![config_id, event_id], map_mapping_row) {
        Ok(mapping) => Ok(Some(mapping)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err),
    }
}

fn query_for_config(conn: &Connection, config_id: i64) -> rusqlite::Result<Vec<EventMapping>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM event_mappings WHERE sync_config_id = ?1
         ORDER BY source_event_id ASC"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![config_id], map_mapping_row)?;
    rows.collect()
}

fn map_mapping_row(row: &Row<'_>) -> rusqlite::Result<EventMapping> {
    let cluster: String = row.get(3)?;
    let last_synced_at: String = row.get(9)?;

    Ok(EventMapping {
        sync_config_id: row.get(0)?,
        source_event_id: row.get(1)?,
        dest_event_id: row.get(2)?,
        sync_cluster_id: decode_uuid(3, &cluster)?,
        source_last_modified: decode_optional_time(4, row.get(4)?)?,
        dest_last_modified: decode_optional_time(5, row.get(5)?)?,
        content_hash: row.get(6)?,
        origin_calendar_id: row.get(7)?,
        privacy_applied: row.get(8)?,
        last_synced_at: decode_time(9, &last_synced_at)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use calsync_domain::SyncConfiguration;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::database::SqliteConfigurationRepository;

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_then_find_by_either_side() {
        let (repo, _configs, config_id, _dir) = setup_repository().await;

        let mapping = sample_mapping(config_id, "s1", "d1");
        repo.upsert_mapping(&mapping).await.expect("mapping stored");

        let by_source =
            repo.find_mapping(config_id, "s1").await.expect("query").expect("found by source");
        assert_eq!(by_source, mapping);

        let by_dest = repo
            .find_by_dest_event(config_id, "d1")
            .await
            .expect("query")
            .expect("found by destination");
        assert_eq!(by_dest.source_event_id, "s1");

        assert!(repo.find_mapping(config_id, "missing").await.expect("query").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_replaces_the_existing_row() {
        let (repo, _configs, config_id, _dir) = setup_repository().await;

        let mut mapping = sample_mapping(config_id, "s1", "d1");
        repo.upsert_mapping(&mapping).await.expect("first write");

        mapping.dest_event_id = "d2".into();
        mapping.content_hash = "changed".into();
        mapping.last_synced_at += Duration::minutes(5);
        repo.upsert_mapping(&mapping).await.expect("second write");

        let all = repo.list_mappings(config_id).await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].dest_event_id, "d2");
        assert_eq!(all[0].content_hash, "changed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_reports_whether_a_row_existed() {
        let (repo, _configs, config_id, _dir) = setup_repository().await;
        repo.upsert_mapping(&sample_mapping(config_id, "s1", "d1")).await.expect("stored");

        assert!(repo.delete_mapping(config_id, "s1").await.expect("delete"));
        assert!(!repo.delete_mapping(config_id, "s1").await.expect("second delete"));
        assert!(repo.list_mappings(config_id).await.expect("list").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mappings_are_scoped_per_configuration() {
        let (repo, configs, config_id, _dir) = setup_repository().await;
        let other = configs
            .insert(&SyncConfiguration::new("user-1", "home", "work"))
            .await
            .expect("second config");

        repo.upsert_mapping(&sample_mapping(config_id, "s1", "d1")).await.expect("stored");
        repo.upsert_mapping(&sample_mapping(other, "s1", "d9")).await.expect("stored");

        let mine = repo.find_mapping(config_id, "s1").await.expect("query").expect("found");
        let theirs = repo.find_mapping(other, "s1").await.expect("query").expect("found");
        assert_eq!(mine.dest_event_id, "d1");
        assert_eq!(theirs.dest_event_id, "d9");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_configuration_cascades_to_mappings() {
        let (repo, configs, config_id, _dir) = setup_repository().await;
        repo.upsert_mapping(&sample_mapping(config_id, "s1", "d1")).await.expect("stored");
        repo.upsert_mapping(&sample_mapping(config_id, "s2", "d2")).await.expect("stored");

        assert!(configs.delete(config_id).await.expect("config deleted"));
        assert!(repo.list_mappings(config_id).await.expect("list").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mapping_for_unknown_configuration_is_rejected() {
        let (repo, _configs, _config_id, _dir) = setup_repository().await;

        let result = repo.upsert_mapping(&sample_mapping(9_999, "s1", "d1")).await;
        assert!(matches!(result, Err(calsync_domain::CalSyncError::Database(_))));
    }

    // ========================================================================
    // Test Helpers
    // ========================================================================

    async fn setup_repository(
    ) -> (SqliteMappingRepository, SqliteConfigurationRepository, i64, TempDir) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("mappings.db");

        let manager = Arc::new(DbManager::new(&db_path, 4).expect("db manager created"));
        manager.run_migrations().expect("migrations run");

        let configs = SqliteConfigurationRepository::new(Arc::clone(&manager));
        let config_id = configs
            .insert(&SyncConfiguration::new("user-1", "work", "home"))
            .await
            .expect("config inserted");

        (SqliteMappingRepository::new(manager), configs, config_id, temp_dir)
    }

    fn sample_mapping(config_id: i64, source: &str, dest: &str) -> EventMapping {
        let synced = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).single().expect("valid");
        EventMapping {
            sync_config_id: config_id,
            source_event_id: source.to_string(),
            dest_event_id: dest.to_string(),
            sync_cluster_id: Uuid::new_v4(),
            source_last_modified: Some(synced - Duration::hours(1)),
            dest_last_modified: None,
            content_hash: "abc123".into(),
            origin_calendar_id: "work".into(),
            privacy_applied: false,
            last_synced_at: synced,
        }
    }
}
