//! Cross-port synchronisation
//!
//! A filter owns one `SharedSection` and hands a clone to each of its ports
//! (this audio port and the sibling video port). The section holds the seek
//! state both ports deliver against, plus a flush generation that a seek
//! bumps so every port discards in-flight data and restarts at the new
//! position.
//!
//! Lock order: section, then any per-port control state. The section lock is
//! never held while waiting for upstream data.
//!
//! `Wakeup` is the interruptible wait primitive used by the delivery loop: a
//! generation counter behind a `Condvar`. Upstream data arrival, flushes, and
//! stop requests all call `notify`.

use crate::seeking::SeekState;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::debug;

/// Generation-counting wake handle
#[derive(Debug, Default)]
pub struct Wakeup {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation; pass it to `wait_timeout` to avoid missed wakeups
    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every waiter
    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Wait until the generation moves past `seen` or `timeout` elapses
    ///
    /// Returns true if woken by `notify`.
    pub fn wait_timeout(&self, seen: u64, timeout: Duration) -> bool {
        let generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *generation != seen {
            return true;
        }
        let (generation, _) = self
            .cond
            .wait_timeout_while(generation, timeout, |g| *g == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *generation != seen
    }
}

/// State guarded by the section lock
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionState {
    pub seek: SeekState,
    /// Bumped by every flush; ports compare it against the generation their
    /// in-flight fetch started under
    pub flush_generation: u64,
    /// Bumped by every accepted seek or rate change, flushing or not; ports
    /// announce a new segment when it moves
    pub segment: u64,
}

#[derive(Debug, Default)]
struct SectionInner {
    state: Mutex<SectionState>,
    members: Mutex<Vec<Weak<Wakeup>>>,
}

/// Shared exclusion handle for the ports of one filter
#[derive(Debug, Clone, Default)]
pub struct SharedSection {
    inner: Arc<SectionInner>,
}

/// Guard over the section state; flushing goes through the guard so it
/// happens under the same lock as the seek mutation it belongs to
pub struct SectionGuard<'a> {
    section: &'a SharedSection,
    state: MutexGuard<'a, SectionState>,
}

impl SharedSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the section lock
    pub fn lock(&self) -> SectionGuard<'_> {
        SectionGuard {
            section: self,
            state: self.inner.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Point-in-time copy of the section state
    pub fn snapshot(&self) -> SectionState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a port's wake handle so flushes unblock its fetch
    pub fn register(&self, wakeup: &Arc<Wakeup>) {
        let mut members = self.inner.members.lock().unwrap_or_else(PoisonError::into_inner);
        members.retain(|member| member.strong_count() > 0);
        members.push(Arc::downgrade(wakeup));
    }

    /// Number of live registered ports
    pub fn member_count(&self) -> usize {
        let members = self.inner.members.lock().unwrap_or_else(PoisonError::into_inner);
        members.iter().filter(|member| member.strong_count() > 0).count()
    }

    fn wake_members(&self) {
        let members = self.inner.members.lock().unwrap_or_else(PoisonError::into_inner);
        for wakeup in members.iter().filter_map(Weak::upgrade) {
            wakeup.notify();
        }
    }
}

impl SectionGuard<'_> {
    pub fn state(&self) -> &SectionState {
        &self.state
    }

    pub fn seek(&self) -> SeekState {
        self.state.seek
    }

    pub fn set_seek(&mut self, seek: SeekState) {
        self.state.seek = seek;
    }

    pub fn flush_generation(&self) -> u64 {
        self.state.flush_generation
    }

    /// Mark the segment parameters as changed without discarding data
    pub fn new_segment(&mut self) -> u64 {
        self.state.segment = self.state.segment.wrapping_add(1);
        self.state.segment
    }

    /// Start a new flush generation and unblock every member port
    pub fn flush(&mut self) -> u64 {
        self.new_segment();
        self.state.flush_generation = self.state.flush_generation.wrapping_add(1);
        debug!(
            generation = self.state.flush_generation,
            "Flushing shared section"
        );
        self.section.wake_members();
        self.state.flush_generation
    }
}
