//! Configuration types shared across crates.
//!
//! Configuration is stored as JSON on disk. This module holds the error type
//! and the cache correction settings; the multiplexer layout lives in
//! `nmea-mux`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested configuration was not found.
    #[error("Configuration not found: {0}")]
    NotFound(String),
    /// Failed to read configuration.
    #[error("Read error: {0}")]
    ReadError(String),
    /// Configuration data is invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Load a JSON configuration document from disk.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| ConfigError::InvalidData(e.to_string()))
}

// ============================================================================
// Cache Settings
// ============================================================================

/// Instrument calibration applied by the recompute pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Multiplier applied to boat speed through water.
    pub bsp_factor: f64,

    /// Multiplier applied to apparent wind speed.
    pub aws_factor: f64,

    /// Offset (degrees) added to apparent wind angle.
    pub awa_offset: f64,

    /// Offset (degrees) added to heading.
    pub hdg_offset: f64,

    /// Maximum leeway (degrees), reached close-hauled.
    pub max_leeway: f64,

    /// Declination used until a sentence provides one. East positive.
    pub default_declination: f64,

    /// Compass deviation used when no HDG sentence provides one.
    pub deviation: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            bsp_factor: 1.0,
            aws_factor: 1.0,
            awa_offset: 0.0,
            hdg_offset: 0.0,
            max_leeway: 0.0,
            default_declination: 0.0,
            deviation: 0.0,
        }
    }
}

impl CacheSettings {
    /// Reject settings that would make every derived value meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bsp_factor.is_finite() && self.bsp_factor > 0.0) {
            return Err(ConfigError::InvalidData(format!(
                "bspFactor must be positive, got {}",
                self.bsp_factor
            )));
        }
        if !(self.aws_factor.is_finite() && self.aws_factor > 0.0) {
            return Err(ConfigError::InvalidData(format!(
                "awsFactor must be positive, got {}",
                self.aws_factor
            )));
        }
        if !(0.0..90.0).contains(&self.max_leeway) {
            return Err(ConfigError::InvalidData(format!(
                "maxLeeway must be in [0, 90), got {}",
                self.max_leeway
            )));
        }
        Ok(())
    }
}
