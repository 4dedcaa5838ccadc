//! IS23 Recserver Library
//!
//! mobes AIcam recording Tower (mArT)
//!
//! ## Architecture (7 Components)
//!
//! 1. DeviceDirectory - Camera connection attribute resolution
//! 2. SettingsStore - Recording config persistence (SSoT)
//! 3. MetadataRecorder - Recording metadata persistence
//! 4. SessionRegistry - Per-device single-flight
//! 5. ChunkScheduler - Continuous recording supervisors
//! 6. SettingsReconciler - Config diff application
//! 7. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - SSoT: the persisted RecorderConfig is the single source of truth
//! - SOLID: Single responsibility per module
//! - Failures stay local: one camera's trouble never stops another

pub mod device_directory;
pub mod encoder;
pub mod error;
pub mod metadata;
pub mod models;
pub mod recorder;
pub mod settings_store;
pub mod state;
pub mod web_api;

#[cfg(test)]
pub mod testutil;

pub use error::{Error, Result};
pub use state::AppState;
