//! Executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::DirtyMode;

/// Settings fixed for the lifetime of an executor.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```rust,ignore
/// let config = ExecutorConfig::from_json_str(r#"{ "target_fps": 30 }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Passes per second the frame scheduler aims for.
    pub target_fps: u32,

    /// Rate of the underlying repeating timer. The scheduler throttles this
    /// down to `target_fps`.
    pub display_refresh_hz: u32,

    pub dirty_mode: DirtyMode,

    /// Debounce delay of the batched dirty mode, in milliseconds.
    pub batch_delay_ms: u64,

    /// Pull roots concurrently instead of one after another.
    pub concurrent_roots: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            display_refresh_hz: 120,
            dirty_mode: DirtyMode::Immediate,
            batch_delay_ms: 16,
            concurrent_roots: true,
        }
    }
}

impl ExecutorConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| EngineError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            return Err(EngineError::InvalidConfig("target_fps must be positive".into()));
        }
        if self.display_refresh_hz == 0 {
            return Err(EngineError::InvalidConfig(
                "display_refresh_hz must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Time between two passes at the target rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }

    /// Period of the underlying timer.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(1) / self.display_refresh_hz.max(1)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_sixty_frames() {
        let config = ExecutorConfig::default();
        assert_eq!(config.target_fps, 60);
        assert_eq!(config.frame_interval(), Duration::from_nanos(16_666_666));
        assert_eq!(config.dirty_mode, DirtyMode::Immediate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ExecutorConfig::from_json_str(r#"{ "target_fps": 30, "dirty_mode": "batched" }"#)
                .unwrap();
        assert_eq!(config.target_fps, 30);
        assert_eq!(config.dirty_mode, DirtyMode::Batched);
        assert_eq!(config.batch_delay_ms, 16);
        assert!(config.concurrent_roots);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let err = ExecutorConfig::from_json_str(r#"{ "target_fps": 0 }"#).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        let err = ExecutorConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
