//! Connection state of the port
//!
//! ```text
//!   Unconnected ── begin ──► Connecting ── complete ──► Connected
//!        ▲                       │                          │
//!        └──────── abort ────────┘                          │
//!        └──────────────────── disconnect ──────────────────┘
//! ```

use crate::error::{Error, Result};
use crate::media::AudioFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
}

/// Downstream consumer asking to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub name: String,
    /// Formats the consumer can take; empty accepts anything
    pub accepts: Vec<AudioFormat>,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accepts: Vec::new(),
        }
    }

    pub fn accepting(mut self, formats: &[AudioFormat]) -> Self {
        self.accepts = formats.to_vec();
        self
    }

    pub fn accepts(&self, format: AudioFormat) -> bool {
        self.accepts.is_empty() || self.accepts.contains(&format)
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    state: ConnectionState,
    peer: Option<PeerInfo>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Unconnected,
            peer: None,
        }
    }
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    /// Unconnected → Connecting
    pub fn begin(&mut self, peer: &PeerInfo) -> Result<()> {
        if self.state != ConnectionState::Unconnected {
            return Err(Error::AlreadyConnected);
        }
        self.state = ConnectionState::Connecting;
        self.peer = Some(peer.clone());
        Ok(())
    }

    /// Connecting → Connected
    pub fn complete(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            ConnectionState::Connected => Err(Error::AlreadyConnected),
            ConnectionState::Unconnected => Err(Error::NotConnected),
        }
    }

    /// Connecting → Unconnected; no-op in other states
    pub fn abort(&mut self) {
        if self.state == ConnectionState::Connecting {
            *self = Self::default();
        }
    }

    /// Any state → Unconnected; returns false if already unconnected
    pub fn disconnect(&mut self) -> bool {
        let was_connected = self.state != ConnectionState::Unconnected;
        *self = Self::default();
        was_connected
    }
}
