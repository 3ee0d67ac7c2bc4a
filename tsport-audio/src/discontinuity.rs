//! Discontinuity and timestamp rebase controller
//!
//! Decides, for each buffer the delivery loop produces, whether it carries a
//! discontinuity flag, whether its timestamps are stretched by slow-motion
//! compensation, and which origin its timestamps are relative to.
//!
//! ```text
//!              request()                 stamp()
//!   Normal ───────────────► Pending ──────────────► Normal
//!                              │
//!                              │ stamp() (zap, slow motion enabled)
//!                              ▼
//!                      SlowMotionActive ── window exhausted ──► Pending(exit)
//! ```
//!
//! Pending state is a single slot: requests that arrive before the next
//! `stamp()` collapse into one flagged buffer.
//!
//! # Slow motion on zap
//!
//! After a channel change the first `window` buffers are stretched. Buffer k
//! of the window (k = 0..window-1) uses factor
//! `1 + (stretch - 1) * (window - k) / window`, so the stretch decays
//! linearly toward 1.0. Output timestamps are `pts + offset`, where the
//! offset accumulates the extra duration of every stretched buffer. When the
//! window is exhausted the offset is dropped and the next buffer is flagged
//! as a discontinuity, rebasing the timeline back onto stream time.

use tsport_common::events::DiscontinuityCause;
use tsport_common::timing::{scale_reftime, RefTime};

/// Slow-motion-on-zap parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowMotionPolicy {
    pub enabled: bool,
    /// Buffers the compensation lasts (> 0)
    pub window: u32,
    /// Initial stretch factor (>= 1.0)
    pub stretch: f64,
}

impl SlowMotionPolicy {
    /// Stretch factor for the buffer at `index` within the window
    pub fn factor(&self, index: u32) -> f64 {
        let window = self.window.max(1);
        let remaining = window.saturating_sub(index) as f64;
        1.0 + (self.stretch - 1.0) * remaining / window as f64
    }
}

impl Default for SlowMotionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 8,
            stretch: 1.25,
        }
    }
}

/// Delivery mode for the next buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeliveryMode {
    Normal,
    PendingDiscontinuity {
        cause: DiscontinuityCause,
        /// Begin slow-motion compensation with the flagged buffer
        enter_slow_motion: bool,
    },
    SlowMotionActive {
        /// Index within the window of the next buffer
        index: u32,
        /// Accumulated timestamp offset
        offset: RefTime,
    },
}

/// Timestamps and flags for one delivered buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp {
    pub start: RefTime,
    pub stop: Option<RefTime>,
    pub discontinuity: Option<DiscontinuityCause>,
    pub slow_motion: bool,
}

#[derive(Debug, Clone)]
pub struct RebaseController {
    mode: DeliveryMode,
    policy: SlowMotionPolicy,
}

impl RebaseController {
    pub fn new(policy: SlowMotionPolicy) -> Self {
        Self {
            mode: DeliveryMode::Normal,
            policy,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn policy(&self) -> SlowMotionPolicy {
        self.policy
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.mode, DeliveryMode::PendingDiscontinuity { .. })
    }

    /// Enable or disable slow motion on zap
    ///
    /// Disabling while a window is active ends it: the next buffer is
    /// flagged and rebased.
    pub fn set_slow_motion_enabled(&mut self, enabled: bool) {
        self.policy.enabled = enabled;
        if enabled {
            return;
        }
        match self.mode {
            DeliveryMode::SlowMotionActive { .. } => {
                self.mode = DeliveryMode::PendingDiscontinuity {
                    cause: DiscontinuityCause::SlowMotionExit,
                    enter_slow_motion: false,
                };
            }
            DeliveryMode::PendingDiscontinuity { cause, .. } => {
                self.mode = DeliveryMode::PendingDiscontinuity {
                    cause,
                    enter_slow_motion: false,
                };
            }
            DeliveryMode::Normal => {}
        }
    }

    /// Arm a discontinuity for the next buffer
    ///
    /// Idempotent while pending. A channel zap (`Requested`) takes precedence
    /// over other causes and starts slow motion when enabled. A request that
    /// arrives during an active window abandons it.
    pub fn request(&mut self, cause: DiscontinuityCause) {
        let enter = cause == DiscontinuityCause::Requested && self.policy.enabled;
        self.mode = match self.mode {
            DeliveryMode::PendingDiscontinuity {
                cause: pending,
                enter_slow_motion,
            } => DeliveryMode::PendingDiscontinuity {
                cause: if cause == DiscontinuityCause::Requested {
                    cause
                } else {
                    pending
                },
                enter_slow_motion: enter_slow_motion || enter,
            },
            DeliveryMode::Normal | DeliveryMode::SlowMotionActive { .. } => {
                DeliveryMode::PendingDiscontinuity {
                    cause,
                    enter_slow_motion: enter,
                }
            }
        };
    }

    /// Withdraw a pending zap request that has not been consumed yet
    ///
    /// Discontinuities armed for other causes (start, seek, upstream, slow
    /// motion exit) are required for correct timestamps and stay armed.
    pub fn cancel(&mut self) -> bool {
        if let DeliveryMode::PendingDiscontinuity {
            cause: DiscontinuityCause::Requested,
            ..
        } = self.mode
        {
            self.mode = DeliveryMode::Normal;
            return true;
        }
        false
    }

    /// Start time the next `stamp()` would give a unit at `pts`
    pub fn output_start(&self, pts: RefTime) -> RefTime {
        match self.mode {
            DeliveryMode::SlowMotionActive { offset, .. } => pts.saturating_add(offset),
            DeliveryMode::Normal | DeliveryMode::PendingDiscontinuity { .. } => pts,
        }
    }

    /// Return to Normal, dropping any pending flag or active window
    pub fn reset(&mut self) {
        self.mode = DeliveryMode::Normal;
    }

    /// Produce timestamps and flags for a unit and advance the state machine
    ///
    /// Consumes the pending flag, if any, so exactly one buffer per
    /// discontinuity event carries it.
    pub fn stamp(&mut self, pts: RefTime, duration: Option<RefTime>) -> Stamp {
        match self.mode {
            DeliveryMode::Normal => Stamp {
                start: pts,
                stop: duration.map(|d| pts.saturating_add(d)),
                discontinuity: None,
                slow_motion: false,
            },
            DeliveryMode::PendingDiscontinuity {
                cause,
                enter_slow_motion: true,
            } => {
                let (stretched, extra) = self.stretch(duration, 0);
                self.advance(1, extra);
                Stamp {
                    start: pts,
                    stop: stretched.map(|d| pts.saturating_add(d)),
                    discontinuity: Some(cause),
                    slow_motion: true,
                }
            }
            DeliveryMode::PendingDiscontinuity {
                cause,
                enter_slow_motion: false,
            } => {
                self.mode = DeliveryMode::Normal;
                Stamp {
                    start: pts,
                    stop: duration.map(|d| pts.saturating_add(d)),
                    discontinuity: Some(cause),
                    slow_motion: false,
                }
            }
            DeliveryMode::SlowMotionActive { index, offset } => {
                let start = pts.saturating_add(offset);
                let (stretched, extra) = self.stretch(duration, index);
                self.advance(index + 1, offset.saturating_add(extra));
                Stamp {
                    start,
                    stop: stretched.map(|d| start.saturating_add(d)),
                    discontinuity: None,
                    slow_motion: false,
                }
            }
        }
    }

    /// Stretched duration and the extra time it adds
    fn stretch(&self, duration: Option<RefTime>, index: u32) -> (Option<RefTime>, RefTime) {
        match duration {
            Some(d) => {
                let stretched = scale_reftime(d, self.policy.factor(index));
                (Some(stretched), stretched - d)
            }
            None => (None, 0),
        }
    }

    fn advance(&mut self, next_index: u32, offset: RefTime) {
        self.mode = if next_index >= self.policy.window {
            DeliveryMode::PendingDiscontinuity {
                cause: DiscontinuityCause::SlowMotionExit,
                enter_slow_motion: false,
            }
        } else {
            DeliveryMode::SlowMotionActive {
                index: next_index,
                offset,
            }
        };
    }
}
