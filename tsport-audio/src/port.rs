//! The audio delivery port
//!
//! `AudioPort` composes the two capabilities the pipeline talks to:
//! `Seekable` (position and rate control, shared with the sibling video port
//! through the `SharedSection`) and `PullSource` (media type, buffer
//! negotiation, the per-buffer fill, quality feedback).
//!
//! Control operations arrive on the pipeline's control thread; `fill_buffer`
//! runs on the port's delivery thread (see `worker`). Control state lives
//! behind one mutex, always taken after the section lock, and neither lock
//! is held while waiting for upstream data.

use crate::allocator::{self, Allocator, AllocatorProperties, BufferRequirements};
use crate::config::AudioSettings;
use crate::connection::{Connection, ConnectionState, PeerInfo};
use crate::discontinuity::{RebaseController, SlowMotionPolicy};
use crate::error::{Error, Result};
use crate::media::{AccessUnit, BufferFlags, MediaBuffer, MediaType};
use crate::quality::{PacingPolicy, QualityHint, QualityReport};
use crate::section::{SharedSection, Wakeup};
use crate::seeking::{PositionFlag, RateRange, SeekCapabilities, SeekState, Seekable};
use crate::upstream::{Demultiplexer, Fetch, FetchRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, trace, warn};
use tsport_common::events::{DiscontinuityCause, EventBus, PortEvent, PortKind};
use tsport_common::timing::{format_reftime, RefTime};
use uuid::Uuid;

/// The filter that owns the port
///
/// The port keeps only a weak reference; once the filter is gone or
/// stopping, delivery ends with `Interrupted`.
pub trait FilterContext: Send + Sync {
    fn name(&self) -> &str;

    fn is_stopping(&self) -> bool;
}

/// Minimal `FilterContext` with a settable stopping flag
#[derive(Debug)]
pub struct FilterHandle {
    name: String,
    stopping: AtomicBool,
}

impl FilterHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn set_stopping(&self, stopping: bool) {
        self.stopping.store(stopping, Ordering::SeqCst);
    }
}

impl FilterContext for FilterHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Streaming capability of a port
pub trait PullSource {
    /// Format the port can produce
    fn media_type(&self) -> Result<MediaType>;

    /// Negotiate pool properties with the downstream allocator
    fn decide_buffer_size(&self, allocator: &dyn Allocator) -> Result<AllocatorProperties>;

    /// Fill one lent buffer with the next access unit
    ///
    /// Blocks (bounded by stop and flush) while upstream has no data.
    fn fill_buffer(&self, buffer: &mut MediaBuffer) -> Result<()>;

    /// Advisory quality report from downstream; never blocks
    fn notify(&self, report: QualityReport);
}

/// Per-port state guarded by the control lock
struct PortControl {
    connection: Connection,
    rebase: RebaseController,
    quality: QualityHint,
    /// Flush generation the delivery loop last delivered under
    observed_generation: u64,
    /// Section segment last published as `NewSegment`
    announced_segment: u64,
    last_raw_pts: Option<RefTime>,
    /// Spacing of the last two units, used when a unit has no duration
    estimated_duration: Option<RefTime>,
    last_delivered: Option<RefTime>,
    delivered: u64,
    eos_reported: bool,
    allocator: Option<Arc<dyn Allocator>>,
    media_type: Option<MediaType>,
}

impl PortControl {
    fn restart_segment(&mut self, generation: u64) {
        self.observed_generation = generation;
        self.last_raw_pts = None;
        self.estimated_duration = None;
        self.last_delivered = None;
        self.eos_reported = false;
        self.quality.reset();
    }
}

pub struct AudioPort {
    id: Uuid,
    filter: Weak<dyn FilterContext>,
    section: SharedSection,
    demux: Arc<dyn Demultiplexer>,
    control: Mutex<PortControl>,
    wake: Arc<Wakeup>,
    stop_requested: AtomicBool,
    settings: AudioSettings,
    rate_range: RateRange,
    pacing: PacingPolicy,
    requirements: BufferRequirements,
    events: EventBus,
}

impl AudioPort {
    /// Create a port and register it with the shared section and upstream
    pub fn new(
        filter: Weak<dyn FilterContext>,
        section: SharedSection,
        demux: Arc<dyn Demultiplexer>,
        settings: AudioSettings,
    ) -> Self {
        let wake = Arc::new(Wakeup::new());
        section.register(&wake);
        demux.set_data_notify(Arc::clone(&wake));

        let policy = SlowMotionPolicy {
            enabled: settings.slow_motion_on_zap,
            window: settings.slow_motion_window_buffers,
            stretch: settings.slow_motion_stretch,
        };
        let initial = section.snapshot();

        Self {
            id: Uuid::new_v4(),
            filter,
            section,
            demux,
            control: Mutex::new(PortControl {
                connection: Connection::default(),
                rebase: RebaseController::new(policy),
                quality: QualityHint::default(),
                observed_generation: initial.flush_generation,
                announced_segment: initial.segment,
                last_raw_pts: None,
                estimated_duration: None,
                last_delivered: None,
                delivered: 0,
                eos_reported: false,
                allocator: None,
                media_type: None,
            }),
            wake,
            stop_requested: AtomicBool::new(false),
            rate_range: RateRange {
                min: settings.rate_min,
                max: settings.rate_max,
                allow_reverse: settings.allow_reverse,
            },
            pacing: PacingPolicy {
                late_threshold: settings.late_drop_threshold(),
                reports_before_drop: settings.late_reports_before_drop,
            },
            requirements: BufferRequirements {
                max_frame_size: settings.max_frame_size,
                min_buffer_count: settings.min_buffer_count,
                default_buffer_count: settings.default_buffer_count,
            },
            events: EventBus::new(settings.event_capacity),
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    pub fn section(&self) -> &SharedSection {
        &self.section
    }

    fn lock_control(&self) -> MutexGuard<'_, PortControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Discontinuity control
    // ------------------------------------------------------------------

    /// Signal (true) or withdraw (false) a channel change
    ///
    /// Repeated `true` calls before the next delivered buffer flag a single
    /// buffer. `false` only withdraws a zap that has not been consumed yet.
    pub fn set_discontinuity(&self, discontinuity: bool) {
        let mut control = self.lock_control();
        if discontinuity {
            control.rebase.request(DiscontinuityCause::Requested);
            debug!(port = %self.id, "Discontinuity requested");
        } else if control.rebase.cancel() {
            debug!(port = %self.id, "Pending discontinuity withdrawn");
        }
    }

    pub fn set_slow_motion_on_zap(&self, enabled: bool) {
        self.lock_control().rebase.set_slow_motion_enabled(enabled);
        info!(port = %self.id, enabled, "Slow motion on zap");
    }

    pub fn slow_motion_on_zap(&self) -> bool {
        self.lock_control().rebase.policy().enabled
    }

    /// Move the start position (the owning filter repositions both ports on
    /// zap); always flushes
    pub fn set_start(&self, start: RefTime) -> Result<()> {
        self.set_positions(
            start,
            PositionFlag::Absolute,
            None,
            PositionFlag::NoPositioning,
        )
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Validate that a connection can be attempted and enter `Connecting`
    pub fn check_connect(&self, peer: &PeerInfo) -> Result<()> {
        let mut control = self.lock_control();
        control.connection.begin(peer)?;
        if self.demux.audio_format().is_none() {
            control.connection.abort();
            warn!(port = %self.id, peer = %peer.name, "Connect refused: no audio stream");
            return Err(Error::NoAudioStream);
        }
        debug!(port = %self.id, peer = %peer.name, "Connecting");
        Ok(())
    }

    /// Finish a connection started by `check_connect`
    ///
    /// Matches the media type against the peer, negotiates the buffer pool,
    /// and arms a discontinuity so the first buffer is a sync point. Any
    /// failure returns the port to `Unconnected`.
    pub fn complete_connect(
        &self,
        peer: &PeerInfo,
        allocator: Arc<dyn Allocator>,
    ) -> Result<AllocatorProperties> {
        let section = self.section.snapshot();
        let mut control = self.lock_control();
        match control.connection.state() {
            ConnectionState::Connecting => {}
            ConnectionState::Connected => return Err(Error::AlreadyConnected),
            ConnectionState::Unconnected => return Err(Error::NotConnected),
        }

        let negotiated = self
            .media_type()
            .and_then(|media_type| {
                if peer.accepts(media_type.format) {
                    Ok(media_type)
                } else {
                    Err(Error::InvalidArgument(format!(
                        "{} does not accept {}",
                        peer.name, media_type.format
                    )))
                }
            })
            .and_then(|media_type| {
                allocator::decide_buffer_size(allocator.as_ref(), &self.requirements)
                    .map(|properties| (media_type, properties))
            });

        let (media_type, properties) = match negotiated {
            Ok(agreed) => agreed,
            Err(e) => {
                control.connection.abort();
                warn!(port = %self.id, peer = %peer.name, "Connect failed: {}", e);
                return Err(e);
            }
        };

        allocator.commit();
        control.connection.complete()?;
        control.allocator = Some(allocator);
        control.media_type = Some(media_type);
        control.rebase.request(DiscontinuityCause::Start);
        control.delivered = 0;
        control.restart_segment(section.flush_generation);
        control.announced_segment = section.segment;
        drop(control);

        info!(
            port = %self.id,
            peer = %peer.name,
            "Connected: {} ({} x {} bytes)",
            media_type, properties.buffer_count, properties.buffer_size
        );
        self.events.emit_lossy(PortEvent::Connected {
            port_id: self.id,
            kind: PortKind::Audio,
            peer: peer.name.clone(),
            buffer_count: properties.buffer_count,
            buffer_size: properties.buffer_size,
            timestamp: chrono::Utc::now(),
        });
        Ok(properties)
    }

    /// Tear down the connection
    ///
    /// Decommits the allocator (failing any wait for a buffer), wakes the
    /// delivery loop, and resets to `Unconnected`.
    pub fn break_connect(&self) -> Result<()> {
        let mut control = self.lock_control();
        if !control.connection.disconnect() {
            return Err(Error::NotConnected);
        }
        if let Some(allocator) = control.allocator.take() {
            allocator.decommit();
        }
        control.media_type = None;
        control.rebase.reset();
        control.quality.reset();
        drop(control);

        self.wake.notify();
        info!(port = %self.id, "Disconnected");
        self.events.emit_lossy(PortEvent::Disconnected {
            port_id: self.id,
            kind: PortKind::Audio,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.lock_control().connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock_control().connection.state()
    }

    /// Negotiated allocator, None while unconnected
    pub fn allocator(&self) -> Option<Arc<dyn Allocator>> {
        self.lock_control().allocator.clone()
    }

    // ------------------------------------------------------------------
    // Delivery thread hooks
    // ------------------------------------------------------------------

    /// Called by the delivery thread before its first fill
    ///
    /// Publishes the segment and arms a discontinuity for its first buffer.
    pub fn on_thread_start_play(&self) {
        let section = self.section.snapshot();
        {
            let mut control = self.lock_control();
            control.rebase.request(DiscontinuityCause::Start);
            control.restart_segment(section.flush_generation);
            control.announced_segment = section.segment;
        }
        self.announce_segment(&section.seek);
    }

    fn announce_segment(&self, seek: &SeekState) {
        debug!(
            port = %self.id,
            start = %format_reftime(seek.start),
            rate = seek.rate,
            "New segment"
        );
        self.events.emit_lossy(PortEvent::NewSegment {
            port_id: self.id,
            start: seek.start,
            stop: seek.stop,
            rate: seek.rate,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Ask the delivery loop to return `Interrupted`
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify();
    }

    pub fn reset_stop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// True if `generation` is still the current flush generation
    pub fn is_current_segment(&self, generation: u64) -> bool {
        self.section.snapshot().flush_generation == generation
    }

    /// Record end of stream; returns true only the first time per segment
    pub fn mark_end_of_stream(&self) -> bool {
        let mut control = self.lock_control();
        if control.eos_reported {
            return false;
        }
        control.eos_reported = true;
        let delivered = control.delivered;
        drop(control);

        info!(port = %self.id, delivered, "End of stream");
        self.events.emit_lossy(PortEvent::EndOfStream {
            port_id: self.id,
            buffers_delivered: delivered,
            timestamp: chrono::Utc::now(),
        });
        true
    }

    /// Buffers delivered since connect
    pub fn delivered(&self) -> u64 {
        self.lock_control().delivered
    }

    /// Units skipped by the quality drop policy
    pub fn dropped(&self) -> u64 {
        self.lock_control().quality.dropped()
    }

    /// Next unit from upstream; starvation surfaces as `UpstreamStarved`
    fn fetch(&self, request: &FetchRequest) -> Result<AccessUnit> {
        match self.demux.next_access_unit(request) {
            Fetch::Unit(unit) => Ok(unit),
            Fetch::Starved => Err(Error::UpstreamStarved),
            Fetch::EndOfStream => Err(Error::UpstreamEndOfStream),
        }
    }

    fn check_running(&self) -> Result<()> {
        if self.is_stop_requested() {
            return Err(Error::Interrupted);
        }
        match self.filter.upgrade() {
            Some(filter) if !filter.is_stopping() => Ok(()),
            Some(filter) => {
                debug!(port = %self.id, filter = filter.name(), "Filter stopping");
                Err(Error::Interrupted)
            }
            None => Err(Error::Interrupted),
        }
    }
}

impl Seekable for AudioPort {
    fn capabilities(&self) -> SeekCapabilities {
        SeekCapabilities {
            can_seek_absolute: true,
            can_seek_forwards: true,
            can_seek_backwards: true,
            can_get_current_pos: true,
            can_get_stop_pos: true,
            can_get_duration: self.demux.total_duration().is_some(),
        }
    }

    fn set_positions(
        &self,
        start: RefTime,
        start_flag: PositionFlag,
        stop: Option<RefTime>,
        stop_flag: PositionFlag,
    ) -> Result<()> {
        let mut section = self.section.lock();
        let current = section.seek();
        let next = current.with_positions(start, start_flag, stop, stop_flag)?;
        section.set_seek(next);
        match start_flag {
            PositionFlag::Absolute | PositionFlag::Relative => {
                section.flush();
            }
            PositionFlag::Incremental | PositionFlag::NoPositioning => {
                section.new_segment();
            }
        }
        info!(
            port = %self.id,
            start = %format_reftime(next.start),
            stop = ?next.stop.map(format_reftime),
            "Positions set"
        );
        Ok(())
    }

    fn change_rate(&self, rate: f64) -> Result<()> {
        let mut section = self.section.lock();
        let current = section.seek();
        let next = current.with_rate(rate, &self.rate_range)?;
        section.set_seek(next);
        if next.is_reverse() != current.is_reverse() {
            section.flush();
        } else {
            section.new_segment();
        }
        info!(port = %self.id, rate, "Rate changed");
        Ok(())
    }

    fn positions(&self) -> (RefTime, Option<RefTime>) {
        let SeekState { start, stop, .. } = self.section.snapshot().seek;
        (start, stop)
    }

    fn rate(&self) -> f64 {
        self.section.snapshot().seek.rate
    }

    fn available(&self) -> (Option<RefTime>, Option<RefTime>) {
        (self.demux.earliest_timestamp(), self.demux.latest_timestamp())
    }

    fn duration(&self) -> Option<RefTime> {
        self.demux.total_duration()
    }

    fn current_position(&self) -> RefTime {
        let section = self.section.snapshot();
        let control = self.lock_control();
        match control.last_delivered {
            Some(pts) if control.observed_generation == section.flush_generation => pts,
            _ => section.seek.start,
        }
    }
}

impl PullSource for AudioPort {
    fn media_type(&self) -> Result<MediaType> {
        self.demux.audio_format().ok_or(Error::NoAudioStream)
    }

    fn decide_buffer_size(&self, allocator: &dyn Allocator) -> Result<AllocatorProperties> {
        allocator::decide_buffer_size(allocator, &self.requirements)
    }

    fn fill_buffer(&self, buffer: &mut MediaBuffer) -> Result<()> {
        loop {
            self.check_running()?;
            if !self.is_connected() {
                return Err(Error::NotConnected);
            }

            let snapshot = self.section.snapshot();
            let seen = self.wake.generation();
            let request = FetchRequest {
                start: snapshot.seek.start,
                stop: snapshot.seek.stop,
                rate: snapshot.seek.rate,
                generation: snapshot.flush_generation,
            };

            let unit = match self.fetch(&request) {
                Ok(unit) => unit,
                Err(Error::UpstreamStarved) => {
                    trace!(port = %self.id, "Upstream starved, waiting");
                    self.wake.wait_timeout(seen, self.settings.starvation_poll());
                    continue;
                }
                Err(e) => return Err(e),
            };

            let section = self.section.lock();
            if section.flush_generation() != snapshot.flush_generation {
                debug!(port = %self.id, pts = unit.pts, "Flushed during fetch, discarding unit");
                continue;
            }
            let seek = section.seek();
            let mut control = self.lock_control();
            if !control.connection.is_connected() {
                return Err(Error::NotConnected);
            }

            if control.observed_generation != snapshot.flush_generation {
                control.restart_segment(snapshot.flush_generation);
                control.rebase.request(DiscontinuityCause::Seek);
            }
            let segment = section.state().segment;
            if control.announced_segment != segment {
                control.announced_segment = segment;
                self.announce_segment(&seek);
            }

            if unit.pts < seek.start {
                trace!(port = %self.id, pts = unit.pts, "Before start, skipping");
                continue;
            }

            if let Some(last) = control.last_raw_pts {
                if unit.pts < last {
                    debug!(port = %self.id, pts = unit.pts, last, "Timestamps went backwards");
                    control.rebase.request(DiscontinuityCause::Upstream);
                } else if unit.pts > last {
                    control.estimated_duration = Some(unit.pts - last);
                }
            }
            if unit.discontinuity {
                control.rebase.request(DiscontinuityCause::Upstream);
            }

            // Slow motion shifts output time past stream time
            let output_start = control.rebase.output_start(unit.pts);
            if seek.is_past_stop(output_start) {
                debug!(port = %self.id, pts = unit.pts, output_start, "Past stop position");
                return Err(Error::UpstreamEndOfStream);
            }

            let essential = control.rebase.is_pending();
            if control.quality.should_drop(essential, &self.pacing) {
                control.last_raw_pts = Some(unit.pts);
                let late_by = control.quality.late_by();
                trace!(port = %self.id, pts = unit.pts, late_by, "Dropping late unit");
                self.events.emit_lossy(PortEvent::QualityDrop {
                    port_id: self.id,
                    pts: unit.pts,
                    late_by,
                    timestamp: chrono::Utc::now(),
                });
                continue;
            }

            if let Err(e) = buffer.set_payload(&unit.payload) {
                error!(port = %self.id, pts = unit.pts, "Buffer sizing defect: {}", e);
                return Err(e);
            }

            let duration = unit.duration.or(control.estimated_duration);
            let stamp = control.rebase.stamp(unit.pts, duration);
            let stop = match (stamp.stop, seek.stop) {
                (Some(stop), Some(limit)) => Some(stop.min(limit.max(stamp.start))),
                (stop, _) => stop,
            };
            let discontinuity = stamp.discontinuity.is_some();

            buffer.set_times(stamp.start, stop);
            buffer.set_flags(BufferFlags {
                discontinuity,
                sync_point: discontinuity,
                slow_motion: stamp.slow_motion,
            });
            buffer.set_segment(snapshot.flush_generation);

            control.last_raw_pts = Some(unit.pts);
            control.last_delivered = Some(stamp.start);
            control.delivered += 1;
            drop(control);
            drop(section);

            if let Some(cause) = stamp.discontinuity {
                debug!(
                    port = %self.id,
                    pts = stamp.start,
                    ?cause,
                    slow_motion = stamp.slow_motion,
                    "Discontinuity delivered"
                );
                self.events.emit_lossy(PortEvent::DiscontinuityDelivered {
                    port_id: self.id,
                    pts: stamp.start,
                    cause,
                    timestamp: chrono::Utc::now(),
                });
            }
            return Ok(());
        }
    }

    fn notify(&self, report: QualityReport) {
        let mut control = self.lock_control();
        control.quality.record(report, &self.pacing);
        trace!(
            port = %self.id,
            late = report.late,
            streak = control.quality.late_streak(),
            "Quality report"
        );
    }
}

impl std::fmt::Debug for AudioPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPort")
            .field("id", &self.id)
            .field("connection", &self.connection_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::MemoryAllocator;
    use crate::media::{AccessUnit, AudioFormat};
    use crate::upstream::{synthetic_units, MemoryDemux};
    use std::time::Duration;

    const FRAME: RefTime = 240_000;

    struct Fixture {
        _filter: Arc<dyn FilterContext>,
        demux: Arc<MemoryDemux>,
        port: AudioPort,
    }

    fn fixture(units: Vec<AccessUnit>) -> Fixture {
        let filter: Arc<dyn FilterContext> = Arc::new(FilterHandle::new("test"));
        let demux = Arc::new(MemoryDemux::with_units(
            MediaType::new(AudioFormat::Ac3, 48_000, 6),
            units,
        ));
        let port = AudioPort::new(
            Arc::downgrade(&filter),
            SharedSection::new(),
            demux.clone(),
            AudioSettings {
                slow_motion_on_zap: false,
                ..Default::default()
            },
        );
        Fixture {
            _filter: filter,
            demux,
            port,
        }
    }

    fn connect(port: &AudioPort) {
        let peer = PeerInfo::new("renderer");
        port.check_connect(&peer).unwrap();
        port.complete_connect(&peer, Arc::new(MemoryAllocator::new(4, 8192)))
            .unwrap();
    }

    #[test]
    fn test_fill_requires_connection() {
        let f = fixture(synthetic_units(2, 0, FRAME, 16));
        let mut buffer = MediaBuffer::with_capacity(8192);
        assert!(matches!(
            f.port.fill_buffer(&mut buffer),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_first_buffer_after_connect_is_sync_point() {
        let f = fixture(synthetic_units(3, 0, FRAME, 16));
        connect(&f.port);

        let mut buffer = MediaBuffer::with_capacity(8192);
        f.port.fill_buffer(&mut buffer).unwrap();
        assert!(buffer.is_discontinuity());
        assert!(buffer.is_sync_point());
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.start_time(), Some(0));
        assert_eq!(buffer.stop_time(), Some(FRAME));

        f.port.fill_buffer(&mut buffer).unwrap();
        assert!(!buffer.is_discontinuity());
        assert_eq!(f.port.delivered(), 2);
    }

    #[test]
    fn test_oversize_unit_reports_buffer_too_small() {
        let f = fixture(vec![AccessUnit::new(vec![0; 100], 0, Some(FRAME))]);
        connect(&f.port);

        let mut buffer = MediaBuffer::with_capacity(64);
        assert!(matches!(
            f.port.fill_buffer(&mut buffer),
            Err(Error::BufferTooSmall { needed: 100, capacity: 64 })
        ));
    }

    #[test]
    fn test_check_connect_without_audio_fails() {
        let filter: Arc<dyn FilterContext> = Arc::new(FilterHandle::new("test"));
        let port = AudioPort::new(
            Arc::downgrade(&filter),
            SharedSection::new(),
            Arc::new(MemoryDemux::new(None)),
            AudioSettings::default(),
        );
        assert!(matches!(
            port.check_connect(&PeerInfo::new("renderer")),
            Err(Error::NoAudioStream)
        ));
        assert_eq!(port.connection_state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_peer_refusing_format_aborts_connect() {
        let f = fixture(synthetic_units(1, 0, FRAME, 4));
        let peer = PeerInfo::new("aac-only").accepting(&[AudioFormat::Aac]);
        f.port.check_connect(&peer).unwrap();

        let result = f
            .port
            .complete_connect(&peer, Arc::new(MemoryAllocator::new(4, 8192)));

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(f.port.connection_state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_upstream_break_flags_buffer() {
        let mut units = synthetic_units(3, 0, FRAME, 4);
        units[2].discontinuity = true;
        let f = fixture(units);
        connect(&f.port);

        let mut buffer = MediaBuffer::with_capacity(8192);
        let flags: Vec<bool> = (0..3)
            .map(|_| {
                f.port.fill_buffer(&mut buffer).unwrap();
                buffer.is_discontinuity()
            })
            .collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_backwards_timestamps_flag_buffer() {
        let units = vec![
            AccessUnit::new(vec![1], 10 * FRAME, Some(FRAME)),
            AccessUnit::new(vec![2], 11 * FRAME, Some(FRAME)),
            AccessUnit::new(vec![3], 2 * FRAME, Some(FRAME)),
        ];
        let f = fixture(units);
        connect(&f.port);

        let mut buffer = MediaBuffer::with_capacity(8192);
        f.port.fill_buffer(&mut buffer).unwrap();
        f.port.fill_buffer(&mut buffer).unwrap();
        f.port.fill_buffer(&mut buffer).unwrap();
        assert!(buffer.is_discontinuity());
        assert_eq!(buffer.start_time(), Some(2 * FRAME));
    }

    #[test]
    fn test_missing_duration_estimated_from_spacing() {
        let units = vec![
            AccessUnit::new(vec![1], 0, None),
            AccessUnit::new(vec![2], FRAME, None),
            AccessUnit::new(vec![3], 2 * FRAME, None),
        ];
        let f = fixture(units);
        connect(&f.port);

        let mut buffer = MediaBuffer::with_capacity(8192);
        f.port.fill_buffer(&mut buffer).unwrap();
        assert_eq!(buffer.stop_time(), None);
        f.port.fill_buffer(&mut buffer).unwrap();
        assert_eq!(buffer.stop_time(), Some(2 * FRAME));
    }

    #[test]
    fn test_stop_request_interrupts_starved_fill() {
        let filter: Arc<dyn FilterContext> = Arc::new(FilterHandle::new("test"));
        let demux = Arc::new(MemoryDemux::new(Some(MediaType::new(
            AudioFormat::Aac,
            48_000,
            2,
        ))));
        let port = Arc::new(AudioPort::new(
            Arc::downgrade(&filter),
            SharedSection::new(),
            demux,
            AudioSettings::default(),
        ));
        connect(&port);

        let stopper = {
            let port = Arc::clone(&port);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                port.request_stop();
            })
        };

        let mut buffer = MediaBuffer::with_capacity(8192);
        assert!(matches!(
            port.fill_buffer(&mut buffer),
            Err(Error::Interrupted)
        ));
        stopper.join().unwrap();
    }

    #[test]
    fn test_dropped_filter_interrupts() {
        let f = fixture(synthetic_units(2, 0, FRAME, 4));
        connect(&f.port);
        let Fixture { _filter, port, .. } = f;
        drop(_filter);

        let mut buffer = MediaBuffer::with_capacity(8192);
        assert!(matches!(port.fill_buffer(&mut buffer), Err(Error::Interrupted)));
    }

    #[test]
    fn test_current_position_follows_delivery() {
        let f = fixture(synthetic_units(5, 0, FRAME, 4));
        connect(&f.port);
        assert_eq!(f.port.current_position(), 0);

        let mut buffer = MediaBuffer::with_capacity(8192);
        f.port.fill_buffer(&mut buffer).unwrap();
        f.port.fill_buffer(&mut buffer).unwrap();
        assert_eq!(f.port.current_position(), FRAME);

        f.port.set_start(3 * FRAME).unwrap();
        assert_eq!(f.port.current_position(), 3 * FRAME);
        assert_eq!(f.demux.pending(), 3);
    }

    #[test]
    fn test_end_of_stream_marked_once() {
        let f = fixture(Vec::new());
        connect(&f.port);
        assert!(f.port.mark_end_of_stream());
        assert!(!f.port.mark_end_of_stream());
    }
}
