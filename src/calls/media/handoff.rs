//! What the external media engine needs once signaling is done.

use std::fmt;

use crate::calls::manager::EstablishedCall;
use crate::calls::sdp::{self, MediaEndpoint, SdpError};
use crate::config::{Role, VideoCodec};

/// Resolved RTP parameters for one established call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPlan {
    pub role: Role,
    /// Where our RTP goes out from (caller) or arrives at (callee).
    pub local: MediaEndpoint,
    /// The peer's RTP address.
    pub remote: MediaEndpoint,
    pub codec: VideoCodec,
    pub payload_type: u8,
}

impl RtpPlan {
    /// Reads both endpoints from the exchanged descriptions.
    ///
    /// The payload type comes from the remote description when it maps the
    /// codec, since that is what the peer expects on the wire, and from the
    /// local one otherwise.
    pub fn resolve(call: &EstablishedCall, codec: VideoCodec) -> Result<Self, SdpError> {
        let local = sdp::media_endpoint(&call.local.sdp)?;
        let remote = sdp::media_endpoint(&call.remote.sdp)?;

        let payload_type = match sdp::payload_type_for(&call.remote.sdp, codec.encoding_name())? {
            Some(pt) => pt,
            None => sdp::payload_type_for(&call.local.sdp, codec.encoding_name())?
                .ok_or_else(|| SdpError::CodecNotOffered(codec.to_string()))?,
        };

        Ok(Self {
            role: call.role,
            local,
            remote,
            codec,
            payload_type,
        })
    }
}

impl fmt::Display for RtpPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (from, to) = match self.role {
            Role::Caller => (self.local, self.remote),
            Role::Callee => (self.remote, self.local),
        };
        write!(
            f,
            "{} pt={} {}:{} -> {}:{}",
            self.codec, self.payload_type, from.address, from.port, to.address, to.port
        )
    }
}
