//! Error types for tsport-audio
//!
//! One variant per failure the port can report. `UpstreamStarved` never
//! leaves the delivery loop (it is absorbed by blocking); `UpstreamEndOfStream`
//! ends a segment cleanly.

use thiserror::Error;

/// Main error type for the audio port
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires an active downstream connection
    #[error("Port is not connected")]
    NotConnected,

    /// Connect attempted on a port that is connecting or connected
    #[error("Port is already connected")]
    AlreadyConnected,

    /// Malformed seek or rate parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Downstream allocator cannot satisfy the buffer requirements
    #[error("Allocator rejected: {0}")]
    AllocatorRejected(String),

    /// Access unit larger than the lent buffer (sizing defect)
    #[error("Buffer too small: payload {needed} bytes, capacity {capacity} bytes")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// Demultiplexer has no data yet
    #[error("Upstream has no data available")]
    UpstreamStarved,

    /// Demultiplexer reached the end of the current segment
    #[error("Upstream end of stream")]
    UpstreamEndOfStream,

    /// Demultiplexer reports no audio stream
    #[error("No audio stream available")]
    NoAudioStream,

    /// Delivery stopped by a stop signal or decommitted allocator
    #[error("Delivery interrupted")]
    Interrupted,

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] tsport_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the tsport-audio Error
pub type Result<T> = std::result::Result<T, Error>;
