//! Configuration for the audio port
//!
//! Loaded from the `[audio]` and `[logging]` tables of the TOML config file
//! (see `tsport_common::config` for path resolution). Every key has a
//! built-in default, so an absent file or table yields a working port.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tsport_common::config::{invalid, load_toml, LoggingConfig};
use tsport_common::timing::{ms_to_reftime, RefTime};

/// Top-level config file layout
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub audio: AudioSettings,
}

impl PortConfig {
    /// Load and validate the config file at `path` (None → defaults)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: PortConfig = load_toml(path)?;
        config.audio.validate()?;
        Ok(config)
    }
}

/// Audio port settings (`[audio]` table)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSettings {
    /// Stretch timestamps after a channel change to mask the audio gap
    pub slow_motion_on_zap: bool,

    /// Number of delivered buffers the compensation lasts
    pub slow_motion_window_buffers: u32,

    /// Initial stretch factor; decays linearly to 1.0 over the window
    pub slow_motion_stretch: f64,

    /// Largest access unit the codec can produce, in bytes
    pub max_frame_size: u32,

    /// Minimum buffers in the pool (one in flight, one filling)
    pub min_buffer_count: u32,

    /// Buffer count requested when the allocator proposes none
    pub default_buffer_count: u32,

    /// Slowest accepted playback rate magnitude
    pub rate_min: f64,

    /// Fastest accepted playback rate magnitude
    pub rate_max: f64,

    /// Accept negative rates (reverse playback)
    pub allow_reverse: bool,

    /// Upper bound on a single wait for upstream data or a free buffer
    pub starvation_poll_ms: u64,

    /// Lateness at or above which a quality report counts toward dropping
    pub late_drop_threshold_ms: i64,

    /// Consecutive late reports before non-essential units are dropped
    pub late_reports_before_drop: u32,

    /// Event bus channel capacity
    pub event_capacity: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            slow_motion_on_zap: true,
            slow_motion_window_buffers: 8,
            slow_motion_stretch: 1.25,
            max_frame_size: 8192,
            min_buffer_count: 2,
            default_buffer_count: 30,
            rate_min: 0.25,
            rate_max: 4.0,
            allow_reverse: false,
            starvation_poll_ms: 10,
            late_drop_threshold_ms: 100,
            late_reports_before_drop: 3,
            event_capacity: 64,
        }
    }
}

impl AudioSettings {
    /// Reject values the port cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.slow_motion_window_buffers == 0 {
            return Err(invalid("slow_motion_window_buffers must be > 0").into());
        }
        if !(self.slow_motion_stretch >= 1.0 && self.slow_motion_stretch.is_finite()) {
            return Err(invalid(format!(
                "slow_motion_stretch must be >= 1.0, got {}",
                self.slow_motion_stretch
            ))
            .into());
        }
        if self.max_frame_size == 0 {
            return Err(invalid("max_frame_size must be > 0").into());
        }
        if self.min_buffer_count < 2 {
            return Err(invalid(format!(
                "min_buffer_count must be >= 2, got {}",
                self.min_buffer_count
            ))
            .into());
        }
        if !(self.rate_min > 0.0 && self.rate_min < self.rate_max && self.rate_max.is_finite()) {
            return Err(invalid(format!(
                "rate range must satisfy 0 < rate_min < rate_max, got [{}, {}]",
                self.rate_min, self.rate_max
            ))
            .into());
        }
        if self.starvation_poll_ms == 0 {
            return Err(invalid("starvation_poll_ms must be > 0").into());
        }
        Ok(())
    }

    pub fn starvation_poll(&self) -> Duration {
        Duration::from_millis(self.starvation_poll_ms)
    }

    pub fn late_drop_threshold(&self) -> RefTime {
        ms_to_reftime(self.late_drop_threshold_ms)
    }
}
