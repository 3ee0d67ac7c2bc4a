//! Seek state and the `Seekable` capability
//!
//! `SeekState` is plain data plus pure transition functions. It never
//! mutates in place: every transition returns a new state or an error, so a
//! rejected request leaves the prior state untouched. The live state is held
//! by the `SharedSection` so both ports of a filter observe the same window.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tsport_common::timing::{format_reftime, RefTime};

/// How a position argument of `set_positions` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionFlag {
    /// Value is the new position
    Absolute,
    /// Value is added to the current position
    Relative,
    /// Stop only: value is added to the new start position
    Incremental,
    /// Position is left unchanged
    NoPositioning,
}

/// Accepted playback rates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRange {
    /// Slowest accepted magnitude (> 0)
    pub min: f64,
    /// Fastest accepted magnitude
    pub max: f64,
    /// Whether negative (reverse) rates are accepted
    pub allow_reverse: bool,
}

impl RateRange {
    pub fn contains(&self, rate: f64) -> bool {
        if rate == 0.0 || !rate.is_finite() {
            return false;
        }
        if rate < 0.0 && !self.allow_reverse {
            return false;
        }
        let magnitude = rate.abs();
        magnitude >= self.min && magnitude <= self.max
    }
}

impl Default for RateRange {
    fn default() -> Self {
        Self {
            min: 0.25,
            max: 4.0,
            allow_reverse: false,
        }
    }
}

/// What the port can do in response to seek requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekCapabilities {
    pub can_seek_absolute: bool,
    pub can_seek_forwards: bool,
    pub can_seek_backwards: bool,
    pub can_get_current_pos: bool,
    pub can_get_stop_pos: bool,
    pub can_get_duration: bool,
}

/// Current playback window and rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekState {
    pub start: RefTime,
    /// None = open (play until the stream ends)
    pub stop: Option<RefTime>,
    pub rate: f64,
}

impl Default for SeekState {
    fn default() -> Self {
        Self {
            start: 0,
            stop: None,
            rate: 1.0,
        }
    }
}

impl SeekState {
    /// Compute the state after a `set_positions` request
    ///
    /// Start is clamped at zero. A bounded stop that ends up before start is
    /// rejected. `Incremental` is only meaningful for stop.
    pub fn with_positions(
        &self,
        start: RefTime,
        start_flag: PositionFlag,
        stop: Option<RefTime>,
        stop_flag: PositionFlag,
    ) -> Result<SeekState> {
        let new_start = match start_flag {
            PositionFlag::Absolute => start,
            PositionFlag::Relative => self.start.saturating_add(start),
            PositionFlag::NoPositioning => self.start,
            PositionFlag::Incremental => {
                return Err(Error::InvalidArgument(
                    "incremental positioning is only valid for the stop position".to_string(),
                ))
            }
        }
        .max(0);

        let new_stop = match stop_flag {
            PositionFlag::Absolute => stop,
            PositionFlag::Relative => match (self.stop, stop) {
                (Some(current), Some(delta)) => Some(current.saturating_add(delta)),
                (None, _) => None,
                (Some(current), None) => Some(current),
            },
            PositionFlag::Incremental => Some(new_start.saturating_add(stop.unwrap_or(0))),
            PositionFlag::NoPositioning => self.stop,
        };

        if let Some(stop) = new_stop {
            if new_start > stop {
                return Err(Error::InvalidArgument(format!(
                    "start {} is after stop {}",
                    format_reftime(new_start),
                    format_reftime(stop)
                )));
            }
        }

        Ok(SeekState {
            start: new_start,
            stop: new_stop,
            rate: self.rate,
        })
    }

    /// Compute the state after a rate change
    pub fn with_rate(&self, rate: f64, range: &RateRange) -> Result<SeekState> {
        if rate == 0.0 {
            return Err(Error::InvalidArgument("rate must not be zero".to_string()));
        }
        if !range.contains(rate) {
            return Err(Error::InvalidArgument(format!(
                "rate {} outside supported range [{}, {}]{}",
                rate,
                range.min,
                range.max,
                if range.allow_reverse { " (either direction)" } else { "" }
            )));
        }
        Ok(SeekState { rate, ..*self })
    }

    /// True if `pts` lies inside [start, stop]
    pub fn contains(&self, pts: RefTime) -> bool {
        pts >= self.start && self.stop.map_or(true, |stop| pts <= stop)
    }

    /// True if `pts` is beyond a bounded stop
    pub fn is_past_stop(&self, pts: RefTime) -> bool {
        self.stop.is_some_and(|stop| pts > stop)
    }

    pub fn is_reverse(&self) -> bool {
        self.rate < 0.0
    }
}

/// Seeking capability of a port
///
/// Mirrors the pipeline's seek interface: positions are in reference time,
/// errors are reported synchronously and never disturb delivery.
pub trait Seekable {
    fn capabilities(&self) -> SeekCapabilities;

    /// Update start and stop honouring `PositionFlag`s
    fn set_positions(
        &self,
        start: RefTime,
        start_flag: PositionFlag,
        stop: Option<RefTime>,
        stop_flag: PositionFlag,
    ) -> Result<()>;

    /// Change the playback rate; zero or out-of-range rates fail with
    /// `InvalidArgument` and leave the state unchanged
    fn change_rate(&self, rate: f64) -> Result<()>;

    /// Current (start, stop)
    fn positions(&self) -> (RefTime, Option<RefTime>);

    fn rate(&self) -> f64;

    /// Earliest and latest seekable timestamps as reported upstream
    fn available(&self) -> (Option<RefTime>, Option<RefTime>);

    /// Total duration, None when unknown (live stream)
    fn duration(&self) -> Option<RefTime>;

    /// Timestamp of the most recently delivered buffer of the current segment
    fn current_position(&self) -> RefTime;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(start: RefTime, stop: Option<RefTime>) -> SeekState {
        SeekState {
            start,
            stop,
            rate: 1.0,
        }
    }

    #[test]
    fn test_absolute_positions() {
        let next = state(0, None)
            .with_positions(500, PositionFlag::Absolute, Some(900), PositionFlag::Absolute)
            .unwrap();
        assert_eq!(next, state(500, Some(900)));
    }

    #[test]
    fn test_relative_start_and_stop() {
        let next = state(1000, Some(5000))
            .with_positions(-200, PositionFlag::Relative, Some(1000), PositionFlag::Relative)
            .unwrap();
        assert_eq!(next, state(800, Some(6000)));
    }

    #[test]
    fn test_relative_stop_on_open_window_stays_open() {
        let next = state(0, None)
            .with_positions(0, PositionFlag::NoPositioning, Some(100), PositionFlag::Relative)
            .unwrap();
        assert_eq!(next.stop, None);
    }

    #[test]
    fn test_incremental_stop_relative_to_new_start() {
        let next = state(0, None)
            .with_positions(300, PositionFlag::Absolute, Some(700), PositionFlag::Incremental)
            .unwrap();
        assert_eq!(next, state(300, Some(1000)));
    }

    #[test]
    fn test_incremental_start_rejected() {
        let result =
            state(0, None).with_positions(1, PositionFlag::Incremental, None, PositionFlag::NoPositioning);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_no_positioning_keeps_values() {
        let before = state(10, Some(20));
        let next = before
            .with_positions(999, PositionFlag::NoPositioning, Some(999), PositionFlag::NoPositioning)
            .unwrap();
        assert_eq!(next, before);
    }

    #[test]
    fn test_start_after_stop_rejected() {
        let result = state(0, None).with_positions(
            900,
            PositionFlag::Absolute,
            Some(100),
            PositionFlag::Absolute,
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_start_clamped_at_zero() {
        let next = state(100, None)
            .with_positions(-500, PositionFlag::Relative, None, PositionFlag::NoPositioning)
            .unwrap();
        assert_eq!(next.start, 0);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let before = state(0, None);
        let result = before.with_rate(0.0, &RateRange::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(before.rate, 1.0);
    }

    #[test]
    fn test_rate_outside_range_rejected() {
        let range = RateRange::default();
        assert!(state(0, None).with_rate(8.0, &range).is_err());
        assert!(state(0, None).with_rate(0.1, &range).is_err());
        assert!(state(0, None).with_rate(-1.0, &range).is_err());
        assert!(state(0, None).with_rate(f64::NAN, &range).is_err());
    }

    #[test]
    fn test_reverse_rate_when_allowed() {
        let range = RateRange {
            allow_reverse: true,
            ..Default::default()
        };
        let next = state(0, None).with_rate(-2.0, &range).unwrap();
        assert!(next.is_reverse());
    }

    #[test]
    fn test_contains_and_past_stop() {
        let window = state(100, Some(200));
        assert!(!window.contains(99));
        assert!(window.contains(100));
        assert!(window.contains(200));
        assert!(!window.contains(201));
        assert!(window.is_past_stop(201));
        assert!(!state(100, None).is_past_stop(i64::MAX));
    }
}
