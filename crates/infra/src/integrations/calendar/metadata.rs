//! Translation between [`SyncMetadata`] and Google's
//! `extendedProperties.shared` string map.

use std::collections::BTreeMap;

use calsync_domain::constants::{
    META_CONFIG_ID, META_CREATED_BY_SYNC, META_DEST_EVENT_ID, META_LAST_SYNC,
    META_ORIGIN_CALENDAR_ID, META_PRIVACY_APPLIED, META_SOURCE_EVENT_ID, META_SYNC_CLUSTER_ID,
};
use calsync_domain::SyncMetadata;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;
use uuid::Uuid;

/// Parse shared properties. Unknown keys and reserved keys with unparseable
/// values are kept in `extra`.
pub(crate) fn decode_shared(shared: BTreeMap<String, String>) -> SyncMetadata {
    let mut metadata = SyncMetadata::default();

    for (key, value) in shared {
        let consumed = match key.as_str() {
            META_SOURCE_EVENT_ID => {
                metadata.source_event_id = Some(value.clone()).filter(|v| !v.is_empty());
                true
            }
            META_CREATED_BY_SYNC => {
                metadata.created_by_sync = is_truthy(&value);
                true
            }
            META_PRIVACY_APPLIED => {
                metadata.privacy_applied = is_truthy(&value);
                true
            }
            META_DEST_EVENT_ID => {
                metadata.dest_event_id = Some(value.clone()).filter(|v| !v.is_empty());
                true
            }
            META_ORIGIN_CALENDAR_ID => {
                metadata.origin_calendar_id = Some(value.clone()).filter(|v| !v.is_empty());
                true
            }
            META_SYNC_CLUSTER_ID => Uuid::parse_str(&value)
                .map(|cluster| metadata.sync_cluster_id = Some(cluster))
                .is_ok(),
            META_CONFIG_ID => {
                value.parse::<i64>().map(|id| metadata.config_id = Some(id)).is_ok()
            }
            META_LAST_SYNC => DateTime::parse_from_rfc3339(&value)
                .map(|ts| metadata.last_sync_timestamp = Some(ts.with_timezone(&Utc)))
                .is_ok(),
            _ => false,
        };

        if !consumed {
            if key.starts_with(calsync_domain::constants::METADATA_KEY_PREFIX) {
                debug!(key = %key, value = %value, "unreadable sync tag kept verbatim");
            }
            metadata.extra.insert(key, value);
        }
    }

    metadata
}

/// Render metadata as shared properties, `extra` first so the engine's own
/// tags always win on key collisions.
pub(crate) fn encode_shared(metadata: &SyncMetadata) -> BTreeMap<String, String> {
    let mut shared = metadata.extra.clone();

    if let Some(source_id) = &metadata.source_event_id {
        shared.insert(META_SOURCE_EVENT_ID.to_string(), source_id.clone());
    }
    if metadata.created_by_sync {
        shared.insert(META_CREATED_BY_SYNC.to_string(), "true".to_string());
    }
    if let Some(cluster) = metadata.sync_cluster_id {
        shared.insert(META_SYNC_CLUSTER_ID.to_string(), cluster.to_string());
    }
    if let Some(dest_id) = &metadata.dest_event_id {
        shared.insert(META_DEST_EVENT_ID.to_string(), dest_id.clone());
    }
    if let Some(origin) = &metadata.origin_calendar_id {
        shared.insert(META_ORIGIN_CALENDAR_ID.to_string(), origin.clone());
    }
    if let Some(config_id) = metadata.config_id {
        shared.insert(META_CONFIG_ID.to_string(), config_id.to_string());
    }
    if let Some(synced_at) = metadata.last_sync_timestamp {
        shared.insert(
            META_LAST_SYNC.to_string(),
            synced_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }
    if metadata.privacy_applied {
        shared.insert(META_PRIVACY_APPLIED.to_string(), "true".to_string());
    }

    shared
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
