//! Test helpers for tsport-audio integration tests
//!
//! Builds a filter, shared section, in-memory demux and port wired together
//! the way a host filter would, with shortcuts for connecting and filling.

#![allow(dead_code)]

use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tsport_audio::allocator::MemoryAllocator;
use tsport_audio::config::AudioSettings;
use tsport_audio::connection::PeerInfo;
use tsport_audio::media::{AccessUnit, AudioFormat, MediaBuffer, MediaType};
use tsport_audio::upstream::{synthetic_units, MemoryDemux};
use tsport_audio::{AudioPort, FilterContext, FilterHandle, PullSource, Result, SharedSection};
use tsport_common::events::PortEvent;
use tsport_common::timing::RefTime;

/// 24 ms, one AC-3 frame at 48 kHz
pub const FRAME: RefTime = 240_000;

pub const BUFFER_SIZE: u32 = 8192;

pub struct Harness {
    pub filter: Arc<FilterHandle>,
    pub section: SharedSection,
    pub demux: Arc<MemoryDemux>,
    pub port: Arc<AudioPort>,
}

pub fn format() -> MediaType {
    MediaType::new(AudioFormat::Ac3, 48_000, 2)
}

pub fn settings(slow_motion_on_zap: bool) -> AudioSettings {
    AudioSettings {
        slow_motion_on_zap,
        ..Default::default()
    }
}

/// `count` evenly spaced units starting at pts 0
pub fn units(count: usize) -> Vec<AccessUnit> {
    synthetic_units(count, 0, FRAME, 64)
}

impl Harness {
    /// Port over a finished stream
    pub fn new(units: Vec<AccessUnit>, settings: AudioSettings) -> Self {
        Self::with_demux(Arc::new(MemoryDemux::with_units(format(), units)), settings)
    }

    /// Port over a live stream that has not ended
    pub fn live(units: Vec<AccessUnit>, settings: AudioSettings) -> Self {
        let demux = Arc::new(MemoryDemux::new(Some(format())));
        demux.extend(units);
        Self::with_demux(demux, settings)
    }

    pub fn with_demux(demux: Arc<MemoryDemux>, settings: AudioSettings) -> Self {
        Self::in_section(SharedSection::new(), demux, settings)
    }

    /// Port joining an existing section (sibling of another port)
    pub fn in_section(
        section: SharedSection,
        demux: Arc<MemoryDemux>,
        settings: AudioSettings,
    ) -> Self {
        let filter = Arc::new(FilterHandle::new("test-filter"));
        let weak: Weak<dyn FilterContext> = Arc::downgrade(&filter) as Weak<dyn FilterContext>;
        let port = Arc::new(AudioPort::new(weak, section.clone(), demux.clone(), settings));
        Self {
            filter,
            section,
            demux,
            port,
        }
    }

    /// Connect to a renderer backed by a pool of `count` buffers
    pub fn connect(&self, count: u32) -> Result<()> {
        let peer = PeerInfo::new("test-renderer");
        self.port.check_connect(&peer)?;
        self.port
            .complete_connect(&peer, Arc::new(MemoryAllocator::new(count, BUFFER_SIZE)))?;
        Ok(())
    }

    pub fn connected(units: Vec<AccessUnit>, settings: AudioSettings) -> Self {
        let harness = Self::new(units, settings);
        harness.connect(4).unwrap();
        harness
    }

    pub fn fill(&self) -> Result<MediaBuffer> {
        let mut buffer = MediaBuffer::with_capacity(BUFFER_SIZE as usize);
        self.port.fill_buffer(&mut buffer)?;
        Ok(buffer)
    }

    /// Fill until end of stream (or `limit` buffers)
    pub fn fill_all(&self, limit: usize) -> Vec<MediaBuffer> {
        let mut buffers = Vec::new();
        while buffers.len() < limit {
            match self.fill() {
                Ok(buffer) => buffers.push(buffer),
                Err(_) => break,
            }
        }
        buffers
    }
}

/// Events received so far, without waiting
pub fn drain_events(rx: &mut broadcast::Receiver<PortEvent>) -> Vec<PortEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Start times of delivered buffers
pub fn starts(buffers: &[MediaBuffer]) -> Vec<RefTime> {
    buffers.iter().filter_map(MediaBuffer::start_time).collect()
}

/// Assert start times never decrease except at a flagged buffer
pub fn assert_monotonic_regions(buffers: &[MediaBuffer]) {
    for pair in buffers.windows(2) {
        if pair[1].is_discontinuity() {
            continue;
        }
        assert!(
            pair[1].start_time() >= pair[0].start_time(),
            "timestamps went backwards without a discontinuity: {:?} -> {:?}",
            pair[0].start_time(),
            pair[1].start_time()
        );
    }
}
