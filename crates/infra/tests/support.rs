//! Shared helpers for `calsync-infra` integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::CredentialProvider;
use calsync_domain::{AccountSide, Credentials, Result as DomainResult, SyncConfiguration};
use calsync_infra::database::DbManager;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

pub const SOURCE_TOKEN: &str = "source-token";
pub const DEST_TOKEN: &str = "dest-token";

/// Temporary database wrapper that keeps the underlying file alive for the
/// duration of a test run.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a migrated database in a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("calsync.db");

        let manager = DbManager::new(&db_path, 4).expect("db manager should be created");
        manager.run_migrations().expect("migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }
}

/// One-way configuration between two plain calendar ids.
pub fn configuration(user_id: &str, source: &str, dest: &str) -> SyncConfiguration {
    SyncConfiguration::new(user_id, source, dest)
}

/// Credential provider with a distinct bearer token per account side.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    pub missing_destination: bool,
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_credentials(
        &self,
        _user_id: &str,
        side: AccountSide,
    ) -> DomainResult<Option<Credentials>> {
        Ok(match side {
            AccountSide::Source => Some(Credentials::bearer(SOURCE_TOKEN)),
            AccountSide::Destination if self.missing_destination => None,
            AccountSide::Destination => Some(Credentials::bearer(DEST_TOKEN)),
        })
    }
}

pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Google Calendar JSON for a timed event.
pub fn google_event(id: &str, summary: &str, start: DateTime<Utc>, updated: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "status": "confirmed",
        "summary": summary,
        "start": { "dateTime": rfc3339(start) },
        "end": { "dateTime": rfc3339(start + chrono::Duration::hours(1)) },
        "updated": rfc3339(updated),
        "etag": format!("\"{id}-etag\""),
    })
}

pub fn listing(items: Vec<Value>, next_page_token: Option<&str>) -> Value {
    match next_page_token {
        Some(token) => json!({ "items": items, "nextPageToken": token }),
        None => json!({ "items": items }),
    }
}
