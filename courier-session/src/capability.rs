//! Channel edit-capability classification.
//!
//! Whether a previously sent message can be edited in place is a
//! channel-dependent fact. Unknown channels default to append-only,
//! which prevents attempting unsupported edit operations on
//! unfamiliar transports.

use std::collections::HashMap;

/// Channels known to support updating a previously sent message.
const EDIT_CAPABLE_CHANNELS: &[&str] = &[
    "msteams",
    "slack",
    "telegram",
    "webchat",
    "directline",
    "emulator",
];

/// Static channel capability table with optional per-channel
/// configuration overrides.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    overrides: HashMap<String, bool>,
}

impl CapabilityTable {
    /// Create a table with the built-in channel set only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with configured per-channel overrides.
    pub fn with_overrides(overrides: HashMap<String, bool>) -> Self {
        Self { overrides }
    }

    /// Whether the channel supports editing a sent message.
    pub fn supports_edit(&self, channel_id: &str) -> bool {
        if let Some(&value) = self.overrides.get(channel_id) {
            return value;
        }
        EDIT_CAPABLE_CHANNELS.contains(&channel_id)
    }
}
