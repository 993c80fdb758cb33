//! Shared foundations for the courier services.
//!
//! Contains the unified error taxonomy, process-start configuration,
//! and logging initialization used by `courier-session` and
//! `courier-gateway`.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result, ResultExt};
