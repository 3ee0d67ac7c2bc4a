//! Upstream demultiplexer interface
//!
//! The port pulls access units through `Demultiplexer`. Each request carries
//! the current seek window, the rate, and the flush generation; a
//! demultiplexer repositions whenever the generation differs from the one it
//! last served. `MemoryDemux` is an in-memory implementation fed by the
//! binary and by tests.

use crate::media::{AccessUnit, MediaType};
use crate::section::Wakeup;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};
use tsport_common::timing::RefTime;

/// Where and how fast the port wants data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchRequest {
    pub start: RefTime,
    pub stop: Option<RefTime>,
    pub rate: f64,
    /// Flush generation of the shared section when the request was issued
    pub generation: u64,
}

/// Result of one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Unit(AccessUnit),
    /// Nothing available yet; the caller waits and retries
    Starved,
    EndOfStream,
}

/// Transport-stream demultiplexer as seen by the audio port
pub trait Demultiplexer: Send + Sync {
    /// Next access unit for `request`; never blocks
    fn next_access_unit(&self, request: &FetchRequest) -> Fetch;

    fn earliest_timestamp(&self) -> Option<RefTime>;

    fn latest_timestamp(&self) -> Option<RefTime>;

    /// None for live or unbounded streams
    fn total_duration(&self) -> Option<RefTime>;

    /// Format of the selected audio stream, None if the stream has no audio
    fn audio_format(&self) -> Option<MediaType>;

    /// Register a handle to notify when new data arrives
    fn set_data_notify(&self, _wakeup: Arc<Wakeup>) {}
}

#[derive(Debug, Default)]
struct DemuxState {
    units: Vec<AccessUnit>,
    cursor: usize,
    served_generation: Option<u64>,
    last_request: Option<FetchRequest>,
    finished: bool,
    notify: Option<Arc<Wakeup>>,
}

/// In-memory demultiplexer
///
/// Units are appended with `push`/`extend` and served in order. `finish`
/// marks the end of the stream; until then an exhausted queue reports
/// `Starved`. On reposition the cursor lands on the first unit whose pts is
/// at or after the requested start. Playback direction is always forward.
#[derive(Debug)]
pub struct MemoryDemux {
    format: Option<MediaType>,
    state: Mutex<DemuxState>,
}

impl MemoryDemux {
    pub fn new(format: Option<MediaType>) -> Self {
        Self {
            format,
            state: Mutex::new(DemuxState::default()),
        }
    }

    /// Demux already holding a complete stream
    pub fn with_units(format: MediaType, units: Vec<AccessUnit>) -> Self {
        let demux = Self::new(Some(format));
        demux.extend(units);
        demux.finish();
        demux
    }

    pub fn push(&self, unit: AccessUnit) {
        self.extend(std::iter::once(unit));
    }

    pub fn extend(&self, units: impl IntoIterator<Item = AccessUnit>) {
        let mut state = self.lock();
        state.units.extend(units);
        Self::wake(&state);
    }

    /// Mark the end of the stream
    pub fn finish(&self) {
        let mut state = self.lock();
        state.finished = true;
        Self::wake(&state);
    }

    /// Replace everything not yet served with the units of a new channel
    ///
    /// Models a channel change: the queue continues with the new content
    /// without a reposition. The first new unit is marked discontinuous
    /// only if `mark_break` is set.
    pub fn retune(&self, units: Vec<AccessUnit>, mark_break: bool) {
        let mut state = self.lock();
        let cursor = state.cursor;
        state.units.truncate(cursor);
        let mut units = units.into_iter();
        if let Some(first) = units.next() {
            state.units.push(if mark_break {
                first.with_discontinuity()
            } else {
                first
            });
        }
        state.units.extend(units);
        state.finished = false;
        debug!(queued = state.units.len() - cursor, "Demux retuned");
        Self::wake(&state);
    }

    /// Units not yet served
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.units.len().saturating_sub(state.cursor)
    }

    /// Most recent request seen, for inspection
    pub fn last_request(&self) -> Option<FetchRequest> {
        self.lock().last_request
    }

    fn lock(&self) -> MutexGuard<'_, DemuxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(state: &DemuxState) {
        if let Some(notify) = &state.notify {
            notify.notify();
        }
    }
}

impl Demultiplexer for MemoryDemux {
    fn next_access_unit(&self, request: &FetchRequest) -> Fetch {
        let mut state = self.lock();
        state.last_request = Some(*request);

        if state.served_generation != Some(request.generation) {
            let cursor = state.units.partition_point(|unit| unit.pts < request.start);
            trace!(
                generation = request.generation,
                start = request.start,
                cursor,
                "Demux repositioned"
            );
            state.cursor = cursor;
            state.served_generation = Some(request.generation);
        }

        match state.units.get(state.cursor).cloned() {
            Some(unit) => {
                state.cursor += 1;
                Fetch::Unit(unit)
            }
            None if state.finished => Fetch::EndOfStream,
            None => Fetch::Starved,
        }
    }

    fn earliest_timestamp(&self) -> Option<RefTime> {
        self.lock().units.first().map(|unit| unit.pts)
    }

    fn latest_timestamp(&self) -> Option<RefTime> {
        self.lock().units.last().map(|unit| unit.pts)
    }

    fn total_duration(&self) -> Option<RefTime> {
        let state = self.lock();
        if !state.finished {
            return None;
        }
        let first = state.units.first()?;
        let last = state.units.last()?;
        Some(last.pts + last.duration.unwrap_or(0) - first.pts)
    }

    fn audio_format(&self) -> Option<MediaType> {
        self.format
    }

    fn set_data_notify(&self, wakeup: Arc<Wakeup>) {
        self.lock().notify = Some(wakeup);
    }
}

/// Evenly spaced units with a recognisable payload
///
/// Payload byte `i` of unit `n` is `(n + i) as u8`.
pub fn synthetic_units(
    count: usize,
    first_pts: RefTime,
    frame: RefTime,
    payload_len: usize,
) -> Vec<AccessUnit> {
    (0..count)
        .map(|n| {
            let payload = (0..payload_len).map(|i| (n + i) as u8).collect();
            AccessUnit::new(payload, first_pts + n as RefTime * frame, Some(frame))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AudioFormat;

    const FRAME: RefTime = 240_000;

    fn request(start: RefTime, generation: u64) -> FetchRequest {
        FetchRequest {
            start,
            stop: None,
            rate: 1.0,
            generation,
        }
    }

    fn format() -> MediaType {
        MediaType::new(AudioFormat::Aac, 48_000, 2)
    }

    #[test]
    fn test_serves_units_in_order_then_end_of_stream() {
        let demux = MemoryDemux::with_units(format(), synthetic_units(3, 0, FRAME, 4));

        let pts: Vec<RefTime> = std::iter::from_fn(|| match demux.next_access_unit(&request(0, 0)) {
            Fetch::Unit(unit) => Some(unit.pts),
            _ => None,
        })
        .collect();

        assert_eq!(pts, vec![0, FRAME, 2 * FRAME]);
        assert_eq!(demux.next_access_unit(&request(0, 0)), Fetch::EndOfStream);
    }

    #[test]
    fn test_unfinished_stream_reports_starved() {
        let demux = MemoryDemux::new(Some(format()));
        assert_eq!(demux.next_access_unit(&request(0, 0)), Fetch::Starved);
        assert_eq!(demux.total_duration(), None);
    }

    #[test]
    fn test_new_generation_repositions() {
        let demux = MemoryDemux::with_units(format(), synthetic_units(10, 0, FRAME, 4));
        demux.next_access_unit(&request(0, 0));

        match demux.next_access_unit(&request(5 * FRAME - 1, 1)) {
            Fetch::Unit(unit) => assert_eq!(unit.pts, 5 * FRAME),
            other => panic!("Expected unit, got {:?}", other),
        }
        assert_eq!(demux.pending(), 4);
    }

    #[test]
    fn test_push_notifies_registered_wakeup() {
        let demux = MemoryDemux::new(Some(format()));
        let wakeup = Arc::new(Wakeup::new());
        demux.set_data_notify(Arc::clone(&wakeup));
        let seen = wakeup.generation();

        demux.push(AccessUnit::new(vec![1], 0, Some(FRAME)));

        assert_ne!(wakeup.generation(), seen);
    }

    #[test]
    fn test_retune_replaces_unserved_units() {
        let demux = MemoryDemux::new(Some(format()));
        demux.extend(synthetic_units(5, 0, FRAME, 4));
        demux.next_access_unit(&request(0, 0));
        demux.next_access_unit(&request(0, 0));

        demux.retune(synthetic_units(2, 100 * FRAME, FRAME, 4), true);

        match demux.next_access_unit(&request(0, 0)) {
            Fetch::Unit(unit) => {
                assert_eq!(unit.pts, 100 * FRAME);
                assert!(unit.discontinuity);
            }
            other => panic!("Expected unit, got {:?}", other),
        }
        assert_eq!(demux.pending(), 1);
    }

    #[test]
    fn test_bounds_and_duration() {
        let demux = MemoryDemux::with_units(format(), synthetic_units(4, FRAME, FRAME, 1));
        assert_eq!(demux.earliest_timestamp(), Some(FRAME));
        assert_eq!(demux.latest_timestamp(), Some(4 * FRAME));
        assert_eq!(demux.total_duration(), Some(4 * FRAME));
    }

    #[test]
    fn test_synthetic_payload_pattern() {
        let units = synthetic_units(2, 0, FRAME, 3);
        assert_eq!(units[0].payload, vec![0, 1, 2]);
        assert_eq!(units[1].payload, vec![1, 2, 3]);
    }
}
