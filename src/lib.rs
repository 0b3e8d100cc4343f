//! motion-warden
//!
//! This crate implements the core of a remote-controllable motion-detection
//! capture service.
//!
//! # Architecture
//!
//! - `supervisor`: owns the external detector process (start/stop, single
//!   tracked handle, tolerant of the process dying outside our control)
//! - `store`: the capture pipeline — decodes submitted stills, derives a
//!   preview, persists both halves atomically, and evicts the oldest
//!   captures past a fixed retention window
//! - `auth`: the credential gate — password login minting signed bearer
//!   tokens, and token verification that every gated operation passes
//!   through first
//! - `api`: the control surface — a small HTTP dispatcher composing the
//!   three components above
//! - `config`: wardend daemon configuration (file + env overrides)

use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod auth;
pub mod config;
pub mod store;
pub mod supervisor;

pub use auth::{AuthError, Gate, GateConfig, Principal};
pub use store::{CaptureStore, StoreConfig, StoreError, Variant, RETENTION_WINDOW};
pub use supervisor::{
    DetectorConfig, DetectorState, StopAck, Supervisor, SupervisorError,
};

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

pub(crate) fn now_ms() -> Result<u128> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())
}
