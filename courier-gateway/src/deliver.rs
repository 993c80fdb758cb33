//! Outbound delivery execution.
//!
//! The dispatcher decides edit-vs-append; this module executes the
//! instruction against the channel adapter registered for the
//! session's channel, retrying transport failures with bounded
//! backoff. After exhausting retries the failure is surfaced as
//! `ChannelSend` for the dead-letter collaborator; no retry state is
//! persisted here.

use async_trait::async_trait;
use courier_common::{config::DeliveryConfig, Error, Result};
use courier_session::{
    ActivityTracker, ConversationReference, DispatchInstruction, Dispatcher,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Transport adapter for one channel.
///
/// Implementations wrap the concrete channel API (Teams connector,
/// Slack web API, ...). They are collaborators; courier only calls
/// them with a resolved conversation reference and the merged fields
/// to render.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel this adapter serves (e.g. "msteams").
    fn channel_id(&self) -> &'static str;

    /// Append a new message; returns the channel's message id.
    async fn send(
        &self,
        reference: &ConversationReference,
        fields: &HashMap<String, String>,
    ) -> Result<String>;

    /// Edit a previously sent message in place.
    async fn update(
        &self,
        reference: &ConversationReference,
        activity_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<()>;
}

/// Result of a completed delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Message id the content now lives under
    pub activity_id: String,
    /// Whether an existing message was edited rather than appended
    pub updated: bool,
}

/// Executes dispatch instructions with bounded retry.
pub struct DeliveryExecutor {
    adapters: HashMap<&'static str, Arc<dyn ChannelAdapter>>,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<ActivityTracker>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl DeliveryExecutor {
    /// Create an executor over the dispatcher and tracker.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        tracker: Arc<ActivityTracker>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            adapters: HashMap::new(),
            dispatcher,
            tracker,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Register a channel adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel_id(), adapter);
        self
    }

    /// Execute a dispatch instruction for a correlation id.
    ///
    /// On a successful `Send` the resulting message id is reported
    /// back through the dispatcher so the next dispatch can update in
    /// place.
    pub async fn execute(
        &self,
        correlation_id: &str,
        instruction: DispatchInstruction,
    ) -> Result<DeliveryReceipt> {
        // Endpoint read at delivery time; migrations must be visible here
        let reference = &self.tracker.reference(correlation_id).await?;

        let adapter = self
            .adapters
            .get(reference.channel_id.as_str())
            .ok_or_else(|| {
                Error::ChannelSend(format!(
                    "no adapter registered for channel '{}'",
                    reference.channel_id
                ))
            })?;

        let mut last_error = None;
        for attempt in 1..=self.max_retries + 1 {
            let result = self
                .attempt(adapter.as_ref(), correlation_id, reference, &instruction)
                .await;

            match result {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        channel_id = %reference.channel_id,
                        attempt,
                        max_attempts = self.max_retries + 1,
                        error = %e,
                        "Channel delivery attempt failed"
                    );
                    last_error = Some(e);
                    if attempt <= self.max_retries {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        // Exhausted: hand the failure to the dead-letter collaborator
        let error = last_error.unwrap_or_else(|| Error::ChannelSend("delivery failed".into()));
        tracing::error!(
            correlation_id = %correlation_id,
            channel_id = %reference.channel_id,
            error = %error,
            "Delivery failed after retries, surfacing to dead-letter path"
        );
        Err(Error::ChannelSend(error.to_string()))
    }

    async fn attempt(
        &self,
        adapter: &dyn ChannelAdapter,
        correlation_id: &str,
        reference: &ConversationReference,
        instruction: &DispatchInstruction,
    ) -> Result<DeliveryReceipt> {
        match instruction {
            DispatchInstruction::Send { fields } => {
                let activity_id = adapter.send(reference, fields).await?;
                self.dispatcher
                    .record_sent(correlation_id, &activity_id)
                    .await?;
                Ok(DeliveryReceipt {
                    activity_id,
                    updated: false,
                })
            }
            DispatchInstruction::Update {
                activity_id,
                fields,
            } => {
                adapter.update(reference, activity_id, fields).await?;
                Ok(DeliveryReceipt {
                    activity_id: activity_id.clone(),
                    updated: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use courier_session::tracker::ExternalNotification;
    use courier_session::{
        CapabilityTable, LifecycleController, MemoryReferenceStore, ReferenceStore,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        failures_before_success: AtomicU32,
        sends: AtomicU32,
    }

    impl FlakyAdapter {
        fn new(failures: u32) -> Self {
            Self {
                failures_before_success: AtomicU32::new(failures),
                sends: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChannelAdapter for FlakyAdapter {
        fn channel_id(&self) -> &'static str {
            "msteams"
        }

        async fn send(
            &self,
            _reference: &ConversationReference,
            _fields: &HashMap<String, String>,
        ) -> Result<String> {
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::ChannelSend("transient transport failure".into()));
            }
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok("msg-42".to_string())
        }

        async fn update(
            &self,
            _reference: &ConversationReference,
            _activity_id: &str,
            _fields: &HashMap<String, String>,
        ) -> Result<()> {
            Ok(())
        }
    }

    async fn executor_with(adapter: Arc<FlakyAdapter>) -> (DeliveryExecutor, Arc<Dispatcher>) {
        let store = Arc::new(MemoryReferenceStore::new());
        store
            .put(
                "TICKET-1",
                ConversationReference {
                    channel_id: "msteams".into(),
                    service_url: "https://smba.example.com/teams".into(),
                    conversation_id: "conv-1".into(),
                    user_id: "user-1".into(),
                    bot_id: "bot-1".into(),
                },
            )
            .await
            .unwrap();

        let tracker = Arc::new(ActivityTracker::new(store));
        tracker
            .apply(ExternalNotification {
                correlation_id: "TICKET-1".into(),
                channel_hint: None,
                fields: [("status".to_string(), "open".to_string())].into(),
                timestamp: Utc.timestamp_opt(1, 0).unwrap(),
            })
            .await
            .unwrap();

        let dispatcher = Arc::new(Dispatcher::new(
            tracker.clone(),
            CapabilityTable::new(),
            Arc::new(LifecycleController::new(Duration::from_secs(30))),
        ));
        let config = DeliveryConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
        };
        let executor =
            DeliveryExecutor::new(dispatcher.clone(), tracker, &config).with_adapter(adapter);
        (executor, dispatcher)
    }

    #[tokio::test]
    async fn test_send_records_activity_id() {
        let adapter = Arc::new(FlakyAdapter::new(0));
        let (executor, dispatcher) = executor_with(adapter.clone()).await;

        let instruction = dispatcher.dispatch("TICKET-1").await.unwrap();
        let receipt = executor.execute("TICKET-1", instruction).await.unwrap();
        assert_eq!(receipt.activity_id, "msg-42");
        assert!(!receipt.updated);

        // Next dispatch sees the recorded id and updates in place
        let next = dispatcher.dispatch("TICKET-1").await.unwrap();
        let receipt = executor.execute("TICKET-1", next).await.unwrap();
        assert!(receipt.updated);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let adapter = Arc::new(FlakyAdapter::new(2));
        let (executor, dispatcher) = executor_with(adapter.clone()).await;

        let instruction = dispatcher.dispatch("TICKET-1").await.unwrap();
        let receipt = executor.execute("TICKET-1", instruction).await.unwrap();
        assert_eq!(receipt.activity_id, "msg-42");
        assert_eq!(adapter.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_channel_send() {
        // More failures than max_retries + 1 attempts can absorb
        let adapter = Arc::new(FlakyAdapter::new(10));
        let (executor, dispatcher) = executor_with(adapter).await;

        let instruction = dispatcher.dispatch("TICKET-1").await.unwrap();
        let err = executor.execute("TICKET-1", instruction).await.unwrap_err();
        assert!(matches!(err, Error::ChannelSend(_)));
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_without_retry() {
        let adapter = Arc::new(FlakyAdapter::new(0));
        let (executor, dispatcher) = executor_with(adapter).await;
        // Rebuild the executor without any adapter
        let executor = DeliveryExecutor {
            adapters: HashMap::new(),
            ..executor
        };

        let instruction = dispatcher.dispatch("TICKET-1").await.unwrap();
        let err = executor.execute("TICKET-1", instruction).await.unwrap_err();
        assert!(matches!(err, Error::ChannelSend(_)));
    }
}
