//! Core media data types
//!
//! Defines the access units received from the demultiplexer, the media type
//! the port advertises during negotiation, and the pipeline-owned buffers the
//! delivery loop fills.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tsport_common::timing::RefTime;

/// Audio elementary stream formats carried in a transport stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// MPEG-1/2 layer I-III
    MpegAudio,
    /// AAC in ADTS framing
    Aac,
    /// AAC in LATM/LOAS framing
    LatmAac,
    Ac3,
    EAc3,
    Dts,
    /// Blu-ray/DVD style linear PCM
    Lpcm,
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AudioFormat::MpegAudio => "mpeg-audio",
            AudioFormat::Aac => "aac",
            AudioFormat::LatmAac => "latm-aac",
            AudioFormat::Ac3 => "ac3",
            AudioFormat::EAc3 => "eac3",
            AudioFormat::Dts => "dts",
            AudioFormat::Lpcm => "lpcm",
        };
        write!(f, "{}", name)
    }
}

/// Media type advertised to the downstream consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaType {
    pub fn new(format: AudioFormat, sample_rate: u32, channels: u16) -> Self {
        Self {
            format,
            sample_rate,
            channels,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}Hz {}ch", self.format, self.sample_rate, self.channels)
    }
}

/// One decodable chunk of audio as produced by the demultiplexer
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnit {
    pub payload: Vec<u8>,

    /// Presentation timestamp
    pub pts: RefTime,

    /// Decode timestamp (usually equal to pts for audio)
    pub dts: Option<RefTime>,

    /// Presentation duration, when the demultiplexer knows it
    pub duration: Option<RefTime>,

    /// The demultiplexer saw a timeline break before this unit (PCR jump,
    /// continuity counter error)
    pub discontinuity: bool,
}

impl AccessUnit {
    pub fn new(payload: Vec<u8>, pts: RefTime, duration: Option<RefTime>) -> Self {
        Self {
            payload,
            pts,
            dts: None,
            duration,
            discontinuity: false,
        }
    }

    /// Mark this unit as following an upstream timeline break
    pub fn with_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }
}

/// Per-buffer flags set by the delivery loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Timeline break: the consumer must resynchronise
    pub discontinuity: bool,
    /// Buffer can be decoded without prior buffers
    pub sync_point: bool,
    /// Timestamps are stretched by slow-motion-on-zap compensation
    pub slow_motion: bool,
}

/// Pipeline-owned memory region lent to the port for one fill operation
#[derive(Debug)]
pub struct MediaBuffer {
    data: Vec<u8>,
    length: usize,
    start: Option<RefTime>,
    stop: Option<RefTime>,
    flags: BufferFlags,
    segment: u64,
}

impl MediaBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            length: 0,
            start: None,
            stop: None,
            flags: BufferFlags::default(),
            segment: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Copy `payload` into the buffer
    ///
    /// Fails with `BufferTooSmall` (leaving the buffer untouched) if the
    /// payload exceeds capacity.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.data.len() {
            return Err(Error::BufferTooSmall {
                needed: payload.len(),
                capacity: self.data.len(),
            });
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.length = payload.len();
        Ok(())
    }

    pub fn set_times(&mut self, start: RefTime, stop: Option<RefTime>) {
        self.start = Some(start);
        self.stop = stop;
    }

    /// Presentation start time (None until stamped)
    pub fn start_time(&self) -> Option<RefTime> {
        self.start
    }

    pub fn stop_time(&self) -> Option<RefTime> {
        self.stop
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags = flags;
    }

    pub fn is_discontinuity(&self) -> bool {
        self.flags.discontinuity
    }

    pub fn is_sync_point(&self) -> bool {
        self.flags.sync_point
    }

    pub fn is_slow_motion(&self) -> bool {
        self.flags.slow_motion
    }

    /// Flush generation the buffer was filled under
    pub fn segment(&self) -> u64 {
        self.segment
    }

    pub(crate) fn set_segment(&mut self, segment: u64) {
        self.segment = segment;
    }

    /// Clear payload, timestamps and flags before the buffer is reused
    pub fn reset(&mut self) {
        self.length = 0;
        self.start = None;
        self.stop = None;
        self.flags = BufferFlags::default();
        self.segment = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_payload_within_capacity() {
        let mut buffer = MediaBuffer::with_capacity(16);
        buffer.set_payload(&[1, 2, 3]).unwrap();

        assert_eq!(buffer.payload(), &[1, 2, 3]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_set_payload_too_large_leaves_buffer_untouched() {
        let mut buffer = MediaBuffer::with_capacity(4);
        buffer.set_payload(&[9, 9]).unwrap();

        let result = buffer.set_payload(&[1, 2, 3, 4, 5]);

        match result {
            Err(Error::BufferTooSmall { needed, capacity }) => {
                assert_eq!(needed, 5);
                assert_eq!(capacity, 4);
            }
            other => panic!("Expected BufferTooSmall, got {:?}", other),
        }
        assert_eq!(buffer.payload(), &[9, 9]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut buffer = MediaBuffer::with_capacity(8);
        buffer.set_payload(&[1]).unwrap();
        buffer.set_times(100, Some(200));
        buffer.set_flags(BufferFlags {
            discontinuity: true,
            sync_point: true,
            slow_motion: true,
        });
        buffer.set_segment(3);

        buffer.reset();

        assert!(buffer.is_empty());
        assert_eq!(buffer.start_time(), None);
        assert_eq!(buffer.flags(), BufferFlags::default());
        assert_eq!(buffer.segment(), 0);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn test_media_type_display() {
        let media_type = MediaType::new(AudioFormat::Ac3, 48_000, 6);
        assert_eq!(media_type.to_string(), "ac3 48000Hz 6ch");
    }
}
