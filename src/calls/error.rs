//! Call-related error types.

use thiserror::Error;

use super::candidates::FlushError;
use super::engine::EngineError;
use super::sdp::SdpError;
use super::state::InvalidTransition;

/// Failure to decode a signaling message. Never fatal: the message is
/// logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("field {field} has the wrong type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown message id: {0}")]
    UnknownId(String),
}

/// Broad class of a fatal call error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The signaling connection failed or closed.
    Transport,
    /// The server or the peer refused, or the exchange was incomplete.
    Negotiation,
    /// The peer connection engine misbehaved or the local SDP was unusable.
    Engine,
}

/// Fatal errors of a call session. Any of these terminates the session.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("signaling connection closed")]
    ConnectionClosed,

    #[error("signaling transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("call rejected: {0}")]
    CallRejected(String),

    #[error("{0} carried no remote session description")]
    MissingRemoteDescription(&'static str),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("peer connection engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("session description error: {0}")]
    Sdp(#[from] SdpError),

    #[error("remote candidate flush failed: {0}")]
    CandidateFlush(#[from] FlushError<EngineError>),

    #[error("media connection lost: {0}")]
    MediaConnectionLost(String),
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionClosed | Self::Transport(_) => ErrorKind::Transport,
            Self::RegistrationRejected(_)
            | Self::CallRejected(_)
            | Self::MissingRemoteDescription(_) => ErrorKind::Negotiation,
            Self::InvalidTransition(_)
            | Self::Engine(_)
            | Self::Sdp(_)
            | Self::CandidateFlush(_)
            | Self::MediaConnectionLost(_) => ErrorKind::Engine,
        }
    }
}
