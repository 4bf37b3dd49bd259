use std::path::Path;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Slowest supported speech rate.
pub const MIN_RATE: f32 = 0.5;
/// Fastest supported speech rate.
pub const MAX_RATE: f32 = 2.0;
/// Largest sync offset magnitude, in seconds.
pub const MAX_OFFSET_SECS: f32 = 2.0;

/// How long a chunk waits for its first native word boundary before
/// falling back to estimated timing.
pub const DEFAULT_BOUNDARY_DEADLINE_MS: u64 = 500;

/// Reference speaking speed at rate 1.0.
pub const DEFAULT_BASELINE_WPM: f32 = 150.0;

/// Playback and synchronization settings.
///
/// ```rust
/// use floatywords::config::SyncConfigBuilder;
///
/// let config = SyncConfigBuilder::default()
///     .rate(1.5)
///     .offset_secs(-0.25)
///     .build()?;
/// assert_eq!(config.offset_ms(), -250);
/// # Ok::<(), floatywords::SyncError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, build_fn(validate = "Self::validate", error = "SyncError"))]
#[serde(default)]
pub struct SyncConfig {
    /// Speech rate multiplier. Range: 0.5–2.0, default 1.0.
    pub rate: f32,
    /// Constant delay applied to every revealed word. Range: -2.0–2.0 seconds.
    pub offset_secs: f32,
    /// Per-chunk wait for a native boundary before estimating.
    pub boundary_deadline_ms: u64,
    /// Words per minute at rate 1.0, used by the estimator.
    pub baseline_wpm: f32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            offset_secs: 0.0,
            boundary_deadline_ms: DEFAULT_BOUNDARY_DEADLINE_MS,
            baseline_wpm: DEFAULT_BASELINE_WPM,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json_str(content: &str) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        log::info!("Loading sync config from {}", path.display());
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        validate_rate(self.rate)?;
        validate_offset(self.offset_secs)?;
        if !(self.baseline_wpm.is_finite() && self.baseline_wpm > 0.0) {
            return Err(SyncError::Config(format!(
                "baseline_wpm must be positive, got {}",
                self.baseline_wpm
            )));
        }
        Ok(())
    }

    /// The sync offset in whole milliseconds.
    pub fn offset_ms(&self) -> i64 {
        offset_secs_to_ms(self.offset_secs)
    }
}

impl SyncConfigBuilder {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(rate) = self.rate {
            validate_rate(rate)?;
        }
        if let Some(offset) = self.offset_secs {
            validate_offset(offset)?;
        }
        if let Some(wpm) = self.baseline_wpm {
            if !(wpm.is_finite() && wpm > 0.0) {
                return Err(SyncError::Config(format!(
                    "baseline_wpm must be positive, got {wpm}"
                )));
            }
        }
        Ok(())
    }
}

impl From<derive_builder::UninitializedFieldError> for SyncError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        SyncError::Config(e.to_string())
    }
}

pub fn validate_rate(rate: f32) -> Result<(), SyncError> {
    if (MIN_RATE..=MAX_RATE).contains(&rate) {
        Ok(())
    } else {
        Err(SyncError::RateOutOfRange(rate))
    }
}

pub fn validate_offset(offset_secs: f32) -> Result<(), SyncError> {
    if (-MAX_OFFSET_SECS..=MAX_OFFSET_SECS).contains(&offset_secs) {
        Ok(())
    } else {
        Err(SyncError::OffsetOutOfRange(offset_secs))
    }
}

pub fn offset_secs_to_ms(offset_secs: f32) -> i64 {
    (f64::from(offset_secs) * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_speed() {
        let config = SyncConfig::default();
        assert_eq!(config.rate, 1.0);
        assert_eq!(config.boundary_deadline_ms, 500);
        assert_eq!(config.baseline_wpm, 150.0);
        assert_eq!(config.offset_ms(), 0);
    }

    #[test]
    fn builder_rejects_out_of_range_rate() {
        let err = SyncConfigBuilder::default().rate(2.5).build().unwrap_err();
        assert!(matches!(err, SyncError::RateOutOfRange(r) if r == 2.5));
    }

    #[test]
    fn builder_rejects_out_of_range_offset() {
        let err = SyncConfigBuilder::default()
            .offset_secs(-2.1)
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncError::OffsetOutOfRange(_)));
    }

    #[test]
    fn builder_fills_unset_fields_with_defaults() {
        let config = SyncConfigBuilder::default().rate(0.5).build().unwrap();
        assert_eq!(config.rate, 0.5);
        assert_eq!(config.boundary_deadline_ms, DEFAULT_BOUNDARY_DEADLINE_MS);
    }

    #[test]
    fn parses_partial_json() {
        let config = SyncConfig::from_json_str(r#"{ "rate": 1.25, "offset_secs": 0.5 }"#).unwrap();
        assert_eq!(config.rate, 1.25);
        assert_eq!(config.offset_ms(), 500);
        assert_eq!(config.baseline_wpm, DEFAULT_BASELINE_WPM);
    }

    #[test]
    fn json_is_validated() {
        let err = SyncConfig::from_json_str(r#"{ "rate": 0.1 }"#).unwrap_err();
        assert!(matches!(err, SyncError::RateOutOfRange(_)));

        let err = SyncConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn offset_rounds_to_nearest_millisecond() {
        assert_eq!(offset_secs_to_ms(-0.75), -750);
        assert_eq!(offset_secs_to_ms(0.0004), 0);
        assert_eq!(offset_secs_to_ms(2.0), 2000);
    }
}
