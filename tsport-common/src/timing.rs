//! Stream time units for transport-stream delivery
//!
//! All positions, durations and presentation timestamps handled by the ports
//! are expressed in reference time: signed 64-bit counts of 100 ns units
//! (10,000,000 per second). This is the unit the downstream pipeline expects
//! for sample timestamps and seek positions.
//!
//! # Time Representations
//!
//! 1. **Reference time (Internal)**: `i64` at 10 MHz - seek state, buffer stamps
//! 2. **Milliseconds (Logs/CLI)**: `i64` values for human-facing output
//! 3. **PTS (Upstream)**: 33-bit counters at 90 kHz as carried in PES headers
//!
//! ## PTS Conversion
//!
//! 90 kHz does not divide 10 MHz evenly (one PTS tick is 111.1 reference
//! units), so PTS → reference time multiplies before dividing:
//! `reftime = pts × 1000 ÷ 9`. The PTS counter wraps every 2^33 ticks
//! (~26.5 hours); [`pts_delta`] returns the shortest signed distance across
//! the wrap.
//!
//! # Examples
//!
//! ```rust
//! use tsport_common::timing::*;
//!
//! assert_eq!(ms_to_reftime(40), 400_000);
//! assert_eq!(reftime_to_ms(10_000_000), 1000);
//! assert_eq!(pts_to_reftime(90_000), REFTIME_PER_SECOND);
//! ```

/// Reference time: 100 ns units
pub type RefTime = i64;

/// Reference time units per second (10 MHz)
pub const REFTIME_PER_SECOND: RefTime = 10_000_000;

/// Reference time units per millisecond
pub const REFTIME_PER_MS: RefTime = 10_000;

/// Transport-stream PTS/DTS clock rate
pub const PTS_CLOCK_HZ: i64 = 90_000;

/// PTS counters are 33 bits wide and wrap at this value
pub const PTS_WRAP: u64 = 1 << 33;

/// Convert milliseconds to reference time
///
/// ```rust
/// use tsport_common::timing::ms_to_reftime;
///
/// assert_eq!(ms_to_reftime(0), 0);
/// assert_eq!(ms_to_reftime(1000), 10_000_000);
/// assert_eq!(ms_to_reftime(-24), -240_000);
/// ```
pub fn ms_to_reftime(milliseconds: i64) -> RefTime {
    milliseconds.saturating_mul(REFTIME_PER_MS)
}

/// Convert reference time to milliseconds (truncating division)
pub fn reftime_to_ms(reftime: RefTime) -> i64 {
    reftime / REFTIME_PER_MS
}

/// Convert a 90 kHz PTS value to reference time
///
/// The input is masked to 33 bits first, so callers may pass raw counter
/// values straight from a PES header.
pub fn pts_to_reftime(pts: u64) -> RefTime {
    let pts = (pts % PTS_WRAP) as i64;
    pts * 1000 / 9
}

/// Convert reference time to a 90 kHz PTS value (wrapped to 33 bits)
///
/// Negative inputs wrap the same way the counter does.
pub fn reftime_to_pts(reftime: RefTime) -> u64 {
    let pts = reftime * 9 / 1000;
    pts.rem_euclid(PTS_WRAP as i64) as u64
}

/// Shortest signed distance `to - from` between two PTS values, in PTS ticks
///
/// Accounts for the 33-bit wrap, so a counter that rolls over from
/// `2^33 - 1` to `0` yields `+1`, not `-(2^33 - 1)`.
pub fn pts_delta(from: u64, to: u64) -> i64 {
    let wrap = PTS_WRAP as i64;
    let raw = (to % PTS_WRAP) as i64 - (from % PTS_WRAP) as i64;
    if raw > wrap / 2 {
        raw - wrap
    } else if raw < -wrap / 2 {
        raw + wrap
    } else {
        raw
    }
}

/// Duration of `frames` audio frames at `sample_rate`, in reference time
///
/// # Panics
///
/// Panics if `sample_rate` is 0
pub fn frames_to_reftime(frames: u64, sample_rate: u32) -> RefTime {
    assert!(sample_rate > 0, "sample_rate must be > 0");
    (frames as i128 * REFTIME_PER_SECOND as i128 / sample_rate as i128) as RefTime
}

/// Scale a duration by a floating point factor, rounding to the nearest unit
pub fn scale_reftime(duration: RefTime, factor: f64) -> RefTime {
    (duration as f64 * factor).round() as RefTime
}

/// Format reference time as `h:mm:ss.mmm` for log output
pub fn format_reftime(reftime: RefTime) -> String {
    let sign = if reftime < 0 { "-" } else { "" };
    let total_ms = reftime_to_ms(reftime).unsigned_abs();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{sign}{hours}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
