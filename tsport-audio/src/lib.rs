//! # tsport Audio Port Library (tsport-audio)
//!
//! Audio delivery port for a transport-stream playback pipeline.
//!
//! **Purpose:** Pull demultiplexed, timestamped audio access units from an
//! upstream demultiplexer and deliver them one buffer at a time to a
//! downstream consumer, honouring seek and rate requests shared with the
//! sibling video port, discontinuity signalling across channel changes, and
//! quality feedback.
//!
//! **Architecture:** `AudioPort` (`Seekable` + `PullSource`) driven by a
//! `DeliveryWorker` thread, synchronised with other ports through a
//! `SharedSection`.

pub mod allocator;
pub mod config;
pub mod connection;
pub mod discontinuity;
pub mod error;
pub mod media;
pub mod port;
pub mod quality;
pub mod section;
pub mod seeking;
pub mod upstream;
pub mod worker;

pub use error::{Error, Result};
pub use port::{AudioPort, FilterContext, FilterHandle, PullSource};
pub use section::SharedSection;
pub use seeking::Seekable;
pub use worker::DeliveryWorker;
