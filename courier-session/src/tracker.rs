//! Per-correlation-id activity tracking.
//!
//! External event sources (ticket systems, business rules) deliver
//! notifications with no ordering guarantee. The tracker keeps, per
//! correlation id, the last rendered message identity and a per-field
//! last-update timestamp map, so a delayed webhook can never overwrite
//! newer host-reported state: staleness is rejected per field, not per
//! notification.
//!
//! Activity records are persisted through the [`ReferenceStore`] as
//! they change and hydrated on first touch, so staleness history and
//! the last sent message id survive a process restart. The tracker
//! holds no copy of the conversation endpoint; [`ActivityTracker::reference`]
//! re-reads it from the store so an endpoint migration takes effect
//! for sessions that are already active.
//!
//! Concurrent `apply` calls for the same correlation id are serialized
//! through a per-key mutex; different correlation ids proceed
//! independently. Store reads happen before the per-key lock is taken.

use crate::reference::ReferenceStore;
use crate::ConversationReference;
use chrono::{DateTime, Utc};
use courier_common::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Record of the last message sent for a correlation id plus
/// per-field freshness timestamps.
///
/// This is the persisted activity reference document
/// (`{id, lastActivityId, fields, propertyUpdatedTime}`). The
/// conversation endpoint is not part of it; the store owns the
/// reference and it is looked up separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityReference {
    /// Stable external correlation id (e.g. ticket id)
    #[serde(rename = "id")]
    pub correlation_id: String,
    /// Identity of the last successfully sent message. None until the
    /// first send succeeds; once set it is only replaced, never cleared.
    pub last_activity_id: Option<String>,
    /// Last accepted value per field
    pub fields: HashMap<String, String>,
    /// Last-write time per field, monotonically non-decreasing
    pub property_updated_time: HashMap<String, DateTime<Utc>>,
}

impl ActivityReference {
    fn new(correlation_id: String) -> Self {
        Self {
            correlation_id,
            last_activity_id: None,
            fields: HashMap::new(),
            property_updated_time: HashMap::new(),
        }
    }
}

/// Incoming external event, webhook-style.
///
/// Transient; nothing beyond what `apply` folds into the activity
/// reference is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalNotification {
    /// Correlation id this event belongs to
    pub correlation_id: String,
    /// Optional assertion of the channel the session lives on; a
    /// mismatch against the stored endpoint rejects the notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_hint: Option<String>,
    /// Reported field values
    pub fields: HashMap<String, String>,
    /// Event timestamp as reported by the source (ISO-8601)
    pub timestamp: DateTime<Utc>,
}

/// Outcome of applying a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// At least one field was newer than the stored state; the record
    /// is dirty and should be dispatched.
    Accepted {
        /// Fields merged into the record
        accepted: Vec<String>,
        /// Fields dropped as stale
        stale: Vec<String>,
    },
    /// Every field in the notification was stale. Not an error; the
    /// notification is discarded.
    AllStale,
}

impl ApplyOutcome {
    /// Whether the record changed and a dispatch is warranted.
    pub const fn is_dirty(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Tracks activity references per correlation id, backed by a
/// [`ReferenceStore`] for endpoint resolution and activity document
/// persistence.
pub struct ActivityTracker {
    store: Arc<dyn ReferenceStore>,
    records: DashMap<String, Arc<Mutex<ActivityReference>>>,
}

impl ActivityTracker {
    /// Create a tracker over the given reference store.
    pub fn new(store: Arc<dyn ReferenceStore>) -> Self {
        Self {
            store,
            records: DashMap::new(),
        }
    }

    /// Current conversation endpoint for a correlation id, read from
    /// the store so endpoint migrations are always visible.
    pub async fn reference(&self, correlation_id: &str) -> Result<ConversationReference> {
        self.store
            .get(correlation_id)
            .await?
            .ok_or_else(|| Error::SessionUnknown(correlation_id.to_string()))
    }

    /// Snapshot the activity reference for a correlation id.
    ///
    /// Falls back to the persisted activity document when no
    /// in-memory record exists yet (e.g. after a restart); fails with
    /// `SessionUnknown` when neither exists.
    pub async fn resolve(&self, correlation_id: &str) -> Result<ActivityReference> {
        let entry = match self.records.get(correlation_id) {
            Some(entry) => entry.value().clone(),
            None => {
                let persisted = self
                    .store
                    .get_activity(correlation_id)
                    .await?
                    .ok_or_else(|| Error::SessionUnknown(correlation_id.to_string()))?;
                self.records
                    .entry(correlation_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(persisted)))
                    .value()
                    .clone()
            }
        };
        let record = entry.lock().await;
        Ok(record.clone())
    }

    /// Apply an external notification to the record for its
    /// correlation id.
    ///
    /// Fields whose stored `property_updated_time` is at or after the
    /// notification timestamp are dropped individually; the rest are
    /// merged, stamped with the notification timestamp, and the
    /// updated document is written back to the store. Fails with
    /// `SessionUnknown` when no conversation reference exists for the
    /// id and with `InvalidInput` when the channel hint contradicts
    /// the stored endpoint.
    pub async fn apply(&self, notification: ExternalNotification) -> Result<ApplyOutcome> {
        let correlation_id = notification.correlation_id.clone();

        if let Some(hint) = &notification.channel_hint {
            let reference = self.reference(&correlation_id).await?;
            if *hint != reference.channel_id {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    hint = %hint,
                    channel_id = %reference.channel_id,
                    "Notification channel hint contradicts session endpoint"
                );
                return Err(Error::InvalidInput(format!(
                    "channel hint '{hint}' does not match session channel '{}'",
                    reference.channel_id
                )));
            }
        }

        let entry = self.record_for(&correlation_id).await?;

        // Per-key critical section: staleness check, merge, and
        // write-back must be atomic with respect to other
        // notifications for this id.
        let mut record = entry.lock().await;

        let mut accepted = Vec::new();
        let mut stale = Vec::new();

        for (field, value) in notification.fields {
            let is_stale = record
                .property_updated_time
                .get(&field)
                .is_some_and(|last| *last >= notification.timestamp);

            if is_stale {
                stale.push(field);
                continue;
            }

            record.fields.insert(field.clone(), value);
            record
                .property_updated_time
                .insert(field.clone(), notification.timestamp);
            accepted.push(field);
        }

        if accepted.is_empty() {
            tracing::debug!(
                correlation_id = %correlation_id,
                stale_fields = stale.len(),
                timestamp = %notification.timestamp,
                "Notification discarded, all fields stale"
            );
            return Ok(ApplyOutcome::AllStale);
        }

        self.store
            .put_activity(&correlation_id, record.clone())
            .await?;

        if !stale.is_empty() {
            tracing::debug!(
                correlation_id = %correlation_id,
                stale = ?stale,
                "Dropped stale fields from notification"
            );
        }

        Ok(ApplyOutcome::Accepted { accepted, stale })
    }

    /// Record the message id of a successful send for a correlation id.
    ///
    /// Called by the channel adapter's caller after a `Send`
    /// instruction was executed. The updated document is written back
    /// to the store.
    pub async fn record_sent(&self, correlation_id: &str, activity_id: &str) -> Result<()> {
        let entry = self.record_for(correlation_id).await?;

        let mut record = entry.lock().await;
        record.last_activity_id = Some(activity_id.to_string());
        self.store
            .put_activity(correlation_id, record.clone())
            .await?;

        tracing::debug!(
            correlation_id = %correlation_id,
            activity_id = %activity_id,
            "Recorded sent activity"
        );
        Ok(())
    }

    /// Get or initialize the record entry for a correlation id,
    /// hydrating from the persisted activity document when one exists.
    ///
    /// The store reads run before any per-key lock exists; the entry
    /// insertion itself is atomic, so a racing initialization keeps a
    /// single record.
    async fn record_for(&self, correlation_id: &str) -> Result<Arc<Mutex<ActivityReference>>> {
        if let Some(entry) = self.records.get(correlation_id) {
            return Ok(entry.value().clone());
        }

        if self.store.get(correlation_id).await?.is_none() {
            return Err(Error::SessionUnknown(correlation_id.to_string()));
        }

        let record = match self.store.get_activity(correlation_id).await? {
            Some(persisted) => persisted,
            None => ActivityReference::new(correlation_id.to_string()),
        };

        Ok(self
            .records
            .entry(correlation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(record)))
            .value()
            .clone())
    }
}
