//! Proactive dispatch: the edit-vs-append decision.
//!
//! Given a correlation id with merged notification state, the
//! dispatcher decides whether the outbound message should update the
//! previously sent message in place or append a new one. It performs
//! no I/O itself; the returned instruction is executed by an external
//! channel adapter, which reports new message ids back through
//! [`Dispatcher::record_sent`].

use crate::capability::CapabilityTable;
use crate::lifecycle::LifecycleController;
use crate::tracker::ActivityTracker;
use courier_common::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Outbound instruction produced by a dispatch decision.
///
/// Rendering of content from the field map is delegated to the
/// template/rule collaborator; the instruction only carries the data
/// to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchInstruction {
    /// Append a new message to the conversation.
    Send {
        /// Merged notification state to render
        fields: HashMap<String, String>,
    },
    /// Edit the previously sent message in place.
    Update {
        /// Identity of the message to edit
        activity_id: String,
        /// Merged notification state to render
        fields: HashMap<String, String>,
    },
}

impl DispatchInstruction {
    /// The merged field map carried by the instruction.
    pub fn fields(&self) -> &HashMap<String, String> {
        match self {
            Self::Send { fields } | Self::Update { fields, .. } => fields,
        }
    }
}

/// Decides edit-vs-append for proactive messages.
pub struct Dispatcher {
    tracker: Arc<ActivityTracker>,
    capabilities: CapabilityTable,
    lifecycle: Arc<LifecycleController>,
}

impl Dispatcher {
    /// Create a dispatcher over the given tracker, capability table,
    /// and lifecycle controller.
    pub fn new(
        tracker: Arc<ActivityTracker>,
        capabilities: CapabilityTable,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            tracker,
            capabilities,
            lifecycle,
        }
    }

    /// Produce the dispatch instruction for a correlation id.
    ///
    /// Fails with `SessionClosed` after lifecycle closure and
    /// `SessionUnknown` when no activity reference exists. Returns
    /// `Update` when a previous send was recorded and the channel
    /// supports editing; `Send` otherwise.
    pub async fn dispatch(&self, correlation_id: &str) -> Result<DispatchInstruction> {
        self.lifecycle.ensure_open(correlation_id)?;

        let record = self.tracker.resolve(correlation_id).await?;
        let channel_id = &self.tracker.reference(correlation_id).await?.channel_id;

        match record.last_activity_id {
            Some(activity_id) if self.capabilities.supports_edit(channel_id) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    channel_id = %channel_id,
                    activity_id = %activity_id,
                    "Dispatching in-place update"
                );
                Ok(DispatchInstruction::Update {
                    activity_id,
                    fields: record.fields,
                })
            }
            _ => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    channel_id = %channel_id,
                    "Dispatching new message"
                );
                Ok(DispatchInstruction::Send {
                    fields: record.fields,
                })
            }
        }
    }

    /// Record the message id produced by a successful `Send`.
    pub async fn record_sent(&self, correlation_id: &str, activity_id: &str) -> Result<()> {
        self.tracker.record_sent(correlation_id, activity_id).await
    }
}
