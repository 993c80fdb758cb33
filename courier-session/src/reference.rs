//! Conversation reference storage.
//!
//! A [`ConversationReference`] describes where and how to reach a
//! session. References are created on the first turn of a
//! conversation, never mutated, and looked up by a stable external
//! correlation id (e.g. a ticket id) when an out-of-band notification
//! arrives later.

use crate::tracker::ActivityReference;
use async_trait::async_trait;
use courier_common::{Error, Result};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Immutable descriptor of a session endpoint.
///
/// Serialized with the wire field names used by the persisted
/// conversation reference document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    /// Transport channel the conversation lives on (e.g. "msteams")
    pub channel_id: String,
    /// Channel service endpoint for proactive delivery
    pub service_url: String,
    /// Conversation identifier within the channel
    pub conversation_id: String,
    /// User the conversation belongs to
    pub user_id: String,
    /// Bot identity within the conversation
    pub bot_id: String,
}

/// Durable key/value persistence of session documents, keyed by
/// correlation id: the conversation reference and the activity
/// reference document the tracker maintains.
///
/// `put` is idempotent: writing the same descriptor for the same id
/// is a no-op, while a different descriptor overwrites (a session
/// endpoint may migrate on reconnection). Implementations must be
/// safe for concurrent use across distinct keys; callers needing
/// read-then-write atomicity go through the activity tracker instead.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Store the conversation reference for a correlation id.
    async fn put(&self, correlation_id: &str, reference: ConversationReference) -> Result<()>;

    /// Look up the conversation reference for a correlation id.
    async fn get(&self, correlation_id: &str) -> Result<Option<ConversationReference>>;

    /// Persist the activity reference document for a correlation id.
    async fn put_activity(&self, correlation_id: &str, record: ActivityReference) -> Result<()>;

    /// Load the persisted activity reference document, if any.
    async fn get_activity(&self, correlation_id: &str) -> Result<Option<ActivityReference>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory reference store.
///
/// Default when no store path is configured; also the store used by
/// tests.
#[derive(Default)]
pub struct MemoryReferenceStore {
    entries: DashMap<String, ConversationReference>,
    activities: DashMap<String, ActivityReference>,
}

impl MemoryReferenceStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn put(&self, correlation_id: &str, reference: ConversationReference) -> Result<()> {
        self.entries.insert(correlation_id.to_string(), reference);
        Ok(())
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<ConversationReference>> {
        Ok(self.entries.get(correlation_id).map(|r| r.value().clone()))
    }

    async fn put_activity(&self, correlation_id: &str, record: ActivityReference) -> Result<()> {
        self.activities.insert(correlation_id.to_string(), record);
        Ok(())
    }

    async fn get_activity(&self, correlation_id: &str) -> Result<Option<ActivityReference>> {
        Ok(self
            .activities
            .get(correlation_id)
            .map(|r| r.value().clone()))
    }
}

// ============================================================================
// SQLite-backed store
// ============================================================================

/// SQLite-backed reference store.
///
/// Conversation references and activity reference documents are
/// stored as JSON keyed by correlation id, so tracker state survives
/// a process restart. Lifetime is tied to the external entity (e.g.
/// ticket lifetime); retention is a collaborator concern, so no
/// deletion API exists.
#[derive(Clone)]
pub struct SqliteReferenceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReferenceStore {
    /// Open (or create) a reference store at the given database path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Internal(format!("failed to open reference store: {e}")))?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS conversation_references (
                correlation_id TEXT PRIMARY KEY,
                document       TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS activity_references (
                correlation_id TEXT PRIMARY KEY,
                document       TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| Error::Internal(format!("failed to initialize reference schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl ReferenceStore for SqliteReferenceStore {
    async fn put(&self, correlation_id: &str, reference: ConversationReference) -> Result<()> {
        let document = serde_json::to_string(&reference)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("reference store lock poisoned: {e}")))?;

        conn.execute(
            r"
            INSERT INTO conversation_references (correlation_id, document, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(correlation_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            ",
            params![
                correlation_id,
                document,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| {
            Error::Internal(format!(
                "failed to store reference for '{correlation_id}': {e}"
            ))
        })?;

        Ok(())
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<ConversationReference>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("reference store lock poisoned: {e}")))?;

        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM conversation_references WHERE correlation_id = ?1",
                params![correlation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| {
                Error::Internal(format!(
                    "failed to load reference for '{correlation_id}': {e}"
                ))
            })?;

        match document {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_activity(&self, correlation_id: &str, record: ActivityReference) -> Result<()> {
        let document = serde_json::to_string(&record)?;
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("reference store lock poisoned: {e}")))?;

        conn.execute(
            r"
            INSERT INTO activity_references (correlation_id, document, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(correlation_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            ",
            params![
                correlation_id,
                document,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| {
            Error::Internal(format!(
                "failed to store activity record for '{correlation_id}': {e}"
            ))
        })?;

        Ok(())
    }

    async fn get_activity(&self, correlation_id: &str) -> Result<Option<ActivityReference>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("reference store lock poisoned: {e}")))?;

        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM activity_references WHERE correlation_id = ?1",
                params![correlation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| {
                Error::Internal(format!(
                    "failed to load activity record for '{correlation_id}': {e}"
                ))
            })?;

        match document {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reference(channel: &str) -> ConversationReference {
        ConversationReference {
            channel_id: channel.to_string(),
            service_url: "https://smba.example.com/teams".to_string(),
            conversation_id: "conv-1".to_string(),
            user_id: "user-1".to_string(),
            bot_id: "bot-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryReferenceStore::new();
        let reference = sample_reference("msteams");

        store.put("TICKET-1", reference.clone()).await.unwrap();
        assert_eq!(store.get("TICKET-1").await.unwrap(), Some(reference));
        assert_eq!(store.get("TICKET-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites_on_endpoint_migration() {
        let store = MemoryReferenceStore::new();
        store.put("TICKET-1", sample_reference("msteams")).await.unwrap();

        let mut migrated = sample_reference("msteams");
        migrated.service_url = "https://smba.example.com/teams-eu".to_string();
        store.put("TICKET-1", migrated.clone()).await.unwrap();

        assert_eq!(store.get("TICKET-1").await.unwrap(), Some(migrated));
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteReferenceStore::open(&dir.path().join("refs.db")).unwrap();
        let reference = sample_reference("slack");

        store.put("TICKET-7", reference.clone()).await.unwrap();
        assert_eq!(store.get("TICKET-7").await.unwrap(), Some(reference));

        // Idempotent re-put of the same descriptor
        store
            .put("TICKET-7", sample_reference("slack"))
            .await
            .unwrap();
        assert_eq!(
            store.get("TICKET-7").await.unwrap(),
            Some(sample_reference("slack"))
        );
    }

    #[tokio::test]
    async fn test_sqlite_activity_document_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteReferenceStore::open(&dir.path().join("refs.db")).unwrap();
        assert!(store.get_activity("TICKET-1").await.unwrap().is_none());

        let record = ActivityReference {
            correlation_id: "TICKET-1".to_string(),
            last_activity_id: Some("msg-1".to_string()),
            fields: [("status".to_string(), "open".to_string())].into(),
            property_updated_time: std::collections::HashMap::new(),
        };
        store.put_activity("TICKET-1", record.clone()).await.unwrap();

        let loaded = store.get_activity("TICKET-1").await.unwrap().unwrap();
        assert_eq!(loaded.correlation_id, "TICKET-1");
        assert_eq!(loaded.last_activity_id, record.last_activity_id);
        assert_eq!(loaded.fields, record.fields);
    }

    #[test]
    fn test_reference_document_field_names() {
        let json = serde_json::to_value(sample_reference("msteams")).unwrap();
        assert!(json.get("channelId").is_some());
        assert!(json.get("serviceUrl").is_some());
        assert!(json.get("conversationId").is_some());
    }
}
