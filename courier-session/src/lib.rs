//! Conversation correlation core for courier.
//!
//! This crate maps external correlation keys (ticket ids, rule names)
//! to conversation endpoints and decides how an asynchronous external
//! notification reaches the right session:
//!
//! - [`reference`] — durable conversation reference store
//! - [`tracker`] — per-correlation-id activity record with per-field
//!   freshness timestamps, tolerant of out-of-order webhook delivery
//! - [`capability`] — which channels support editing a sent message
//! - [`dispatch`] — the edit-vs-append decision
//! - [`claims`] — skill caller validation against the allow-list
//! - [`lifecycle`] — session teardown between a skill and its host
//!
//! The crate performs no channel I/O; executing the returned
//! [`dispatch::DispatchInstruction`] is the caller's concern.

pub mod capability;
pub mod claims;
pub mod dispatch;
pub mod lifecycle;
pub mod reference;
pub mod tracker;

pub use capability::CapabilityTable;
pub use claims::{CallerClaims, CallerValidator};
pub use dispatch::{DispatchInstruction, Dispatcher};
pub use lifecycle::{CompletionCode, EndOfConversation, LifecycleController, SessionPhase};
pub use reference::{ConversationReference, MemoryReferenceStore, ReferenceStore, SqliteReferenceStore};
pub use tracker::{ActivityReference, ActivityTracker, ApplyOutcome, ExternalNotification};
