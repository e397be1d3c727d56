//! Media side of a call.
//!
//! - [`WebRtcEngine`]: the peer connection engine used during negotiation
//! - [`RtpPlan`]: resolved RTP endpoints handed to the external media engine
//!   once the call is active

mod handoff;
mod peer_connection;

pub use handoff::RtpPlan;
pub use peer_connection::{WebRtcEngine, WebRtcEngineConfig};
