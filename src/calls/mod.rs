//! Call signaling for one-to-one RTP calls.
//!
//! This module registers with the signaling server, runs the caller or
//! callee handshake and hands the negotiated session over to the media
//! engine.
//!
//! # Architecture
//!
//! - [`Message`]: the JSON messages exchanged with the signaling server
//! - [`CandidateCache`]: remote ICE candidates held until the remote
//!   description is in place
//! - [`CallState`] & [`CallStateMachine`]: call lifecycle
//! - [`sdp`]: rewriting local descriptions to the plain RTP profile
//! - [`PeerEngine`]: what the negotiator needs from the peer connection
//! - [`CallSession`]: owns all of the above and drives the handshake
//!
//! # Protocol Overview
//!
//! Both sides register first. The caller sends `call` with its offer and
//! waits for `callResponse`; the callee waits for `incomingCall`, answers
//! with `incomingCallResponse` and waits for `startCommunication`.
//! `iceCandidate` messages may arrive at any time and are cached until the
//! remote description is applied.

mod candidates;
mod engine;
mod error;
mod manager;
pub mod media;
mod pump;
pub mod sdp;
mod signaling;
mod state;

#[cfg(test)]
mod protocol_tests;

pub use candidates::{Candidate, CandidateCache, FlushError, parse_candidate_endpoint};
pub use engine::{EngineError, EngineEvent, PeerEngine, SdpKind, SessionDescription};
pub use error::{CallError, DecodeError, ErrorKind};
pub use manager::{CallSession, EstablishedCall, SessionParams};
pub use media::{RtpPlan, WebRtcEngine, WebRtcEngineConfig};
pub use pump::{inbound_pump, outbound_pump};
pub use signaling::{
    ACCEPT, ACCEPTED, CallRequest, CallResponse, IncomingCallRequest, IncomingCallResponse,
    Message, MessageId, RegisterRequest, RegisterResponse, StartCommunication,
};
pub use state::{CallState, CallStateMachine, CallTransition, InvalidTransition};
