//! Capability surface of the peer connection engine.
//!
//! The signaling core never talks to a concrete WebRTC stack. It drives a
//! [`PeerEngine`], which creates the local description, applies the remote
//! one and remote candidates, and reports connection state changes through
//! an [`EngineEvent`] channel created alongside it.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use super::candidates::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        })
    }
}

/// An offer or answer with its SDP text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connection state notifications from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The media path is connected. Informational only.
    Connected,
    /// The media path disconnected or failed. Fatal.
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },

    #[error("local candidate gathering was already awaited")]
    GatheringAlreadyAwaited,

    #[error("no local offer has been created")]
    NoLocalOffer,

    #[error("engine has no local description")]
    NoLocalDescription,
}

impl EngineError {
    pub fn operation(op: &'static str, reason: impl fmt::Display) -> Self {
        Self::Operation {
            op,
            reason: reason.to_string(),
        }
    }
}

/// Operations the call negotiator needs from the peer connection engine.
///
/// Implementations are driven from a single task; none of these calls
/// happen concurrently.
#[async_trait]
pub trait PeerEngine: Send + Sync {
    /// Caller side: attach the outgoing video track.
    async fn add_send_track(&self) -> Result<(), EngineError>;

    /// Callee side: ask to receive one video stream.
    async fn add_receive_transceiver(&self) -> Result<(), EngineError>;

    /// Creates an offer and installs it as the local description, which
    /// starts local candidate gathering.
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    /// Blocks until local candidate gathering is complete and returns the
    /// final local description. The gate opens once; a second call fails.
    async fn wait_gathering_complete(&self) -> Result<SessionDescription, EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_remote_candidate(&self, candidate: &Candidate) -> Result<(), EngineError>;

    /// Ends the engine's part of the session; media goes to the external
    /// media engine from here on.
    async fn finalize(&self) -> Result<(), EngineError>;
}
