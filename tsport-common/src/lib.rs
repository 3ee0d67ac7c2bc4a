//! # tsport Common Library
//!
//! Shared code for the transport-stream delivery ports:
//! - Stream time units and transport-stream PTS conversion
//! - Configuration file resolution and logging settings
//! - Port event types and the broadcast EventBus
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod timing;

pub use error::{Error, Result};
pub use timing::RefTime;
