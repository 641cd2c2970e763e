//! In-memory mocks for the storage and credential ports
//!
//! Deterministic stand-ins for the SQLite adapters so orchestrator and
//! service tests run without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calsync_core::{Clock, ConfigurationStore, CredentialProvider, MappingStore, SyncRunRepository};
use calsync_domain::{
    AccountSide, Credentials, EventMapping, Result as DomainResult, SyncConfiguration, SyncRun,
};
use chrono::{DateTime, Duration, Utc};

/// Mapping store keyed by `(config_id, source_event_id)`.
#[derive(Default, Clone)]
pub struct InMemoryMappingStore {
    rows: Arc<Mutex<HashMap<(i64, String), EventMapping>>>,
    pub writes: Arc<Mutex<usize>>,
}

impl InMemoryMappingStore {
    pub fn get(&self, config_id: i64, source_event_id: &str) -> Option<EventMapping> {
        self.rows.lock().unwrap().get(&(config_id, source_event_id.to_string())).cloned()
    }

    pub fn insert(&self, mapping: EventMapping) {
        self.rows
            .lock()
            .unwrap()
            .insert((mapping.sync_config_id, mapping.source_event_id.clone()), mapping);
    }

    pub fn len(&self, config_id: i64) -> usize {
        self.rows.lock().unwrap().keys().filter(|(id, _)| *id == config_id).count()
    }

    pub fn clear(&self) {
        self.rows.lock().unwrap().clear();
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn find_mapping(
        &self,
        config_id: i64,
        source_event_id: &str,
    ) -> DomainResult<Option<EventMapping>> {
        Ok(self.get(config_id, source_event_id))
    }

    async fn find_by_dest_event(
        &self,
        config_id: i64,
        dest_event_id: &str,
    ) -> DomainResult<Option<EventMapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|m| m.sync_config_id == config_id && m.dest_event_id == dest_event_id)
            .cloned())
    }

    async fn upsert_mapping(&self, mapping: &EventMapping) -> DomainResult<()> {
        *self.writes.lock().unwrap() += 1;
        self.insert(mapping.clone());
        Ok(())
    }

    async fn delete_mapping(&self, config_id: i64, source_event_id: &str) -> DomainResult<bool> {
        Ok(self.rows.lock().unwrap().remove(&(config_id, source_event_id.to_string())).is_some())
    }

    async fn list_mappings(&self, config_id: i64) -> DomainResult<Vec<EventMapping>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.sync_config_id == config_id)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryConfigStore {
    configs: Arc<Mutex<HashMap<i64, SyncConfiguration>>>,
}

impl InMemoryConfigStore {
    pub fn with(self, config: SyncConfiguration) -> Self {
        self.configs.lock().unwrap().insert(config.id, config);
        self
    }

    pub fn get(&self, config_id: i64) -> Option<SyncConfiguration> {
        self.configs.lock().unwrap().get(&config_id).cloned()
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryConfigStore {
    async fn get_configuration(&self, config_id: i64) -> DomainResult<Option<SyncConfiguration>> {
        Ok(self.get(config_id))
    }

    async fn list_schedulable(&self) -> DomainResult<Vec<SyncConfiguration>> {
        Ok(self.configs.lock().unwrap().values().filter(|c| c.is_schedulable()).cloned().collect())
    }

    async fn mark_synced(&self, config_id: i64, synced_at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(config) = self.configs.lock().unwrap().get_mut(&config_id) {
            config.last_synced_at = Some(synced_at);
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRunRepository {
    runs: Arc<Mutex<Vec<SyncRun>>>,
}

impl InMemoryRunRepository {
    pub fn all(&self) -> Vec<SyncRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncRunRepository for InMemoryRunRepository {
    async fn record_run(&self, run: &SyncRun) -> DomainResult<()> {
        self.runs.lock().unwrap().push(run.clone());
        Ok(())
    }

    async fn finish_run(&self, run: &SyncRun) -> DomainResult<()> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(slot) = runs.iter_mut().find(|r| r.id == run.id) {
            *slot = run.clone();
        }
        Ok(())
    }

    async fn recent_runs(&self, config_id: i64, limit: usize) -> DomainResult<Vec<SyncRun>> {
        let mut runs: Vec<SyncRun> =
            self.runs.lock().unwrap().iter().filter(|r| r.config_id == config_id).cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// Credentials keyed by `(user_id, side)`; lookups are counted so tests
/// can assert credentials are resolved per run.
#[derive(Default, Clone)]
pub struct StaticCredentials {
    entries: Arc<Mutex<HashMap<(String, AccountSide), Credentials>>>,
    pub lookups: Arc<Mutex<usize>>,
}

impl StaticCredentials {
    pub fn for_user(user_id: &str) -> Self {
        let creds = Self::default();
        creds.set(user_id, AccountSide::Source, Credentials::bearer("source-token"));
        creds.set(user_id, AccountSide::Destination, Credentials::bearer("dest-token"));
        creds
    }

    pub fn set(&self, user_id: &str, side: AccountSide, credentials: Credentials) {
        self.entries.lock().unwrap().insert((user_id.to_string(), side), credentials);
    }

    pub fn revoke(&self, user_id: &str, side: AccountSide) {
        self.entries.lock().unwrap().remove(&(user_id.to_string(), side));
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_credentials(
        &self,
        user_id: &str,
        side: AccountSide,
    ) -> DomainResult<Option<Credentials>> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self.entries.lock().unwrap().get(&(user_id.to_string(), side)).cloned())
    }
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
