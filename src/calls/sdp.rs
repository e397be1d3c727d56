//! Session description rewriting.
//!
//! The peer connection engine always produces ICE and DTLS-SRTP ready
//! descriptions (`UDP/TLS/RTP/SAVPF`). The lab setup this client talks to
//! speaks plain RTP, so the first media section's transport protocol is
//! replaced with `RTP/AVP` before the description leaves the process.

use std::io::Cursor;
use std::net::IpAddr;
use thiserror::Error;
use webrtc::sdp::MediaDescription;
use webrtc::sdp::SessionDescription as SdpDocument;
use webrtc::sdp::description::common::Attribute;

use super::candidates::parse_candidate_endpoint;
use super::engine::SessionDescription;

/// Transport protocol tokens of the plain RTP/AVP profile.
pub const BASELINE_RTP_PROTOS: [&str; 2] = ["RTP", "AVP"];

/// Transport attributes the peer connection insists on in a remote answer.
const TRANSPORT_ATTRIBUTES: [&str; 4] = ["ice-ufrag", "ice-pwd", "fingerprint", "mid"];

/// Plain RTP peers never run DTLS; the engine answers as server.
const ANSWER_SETUP: &str = "active";

/// `m=` port placeholder engines use until a candidate is known.
const DISCARD_PORT: u16 = 9;

#[derive(Debug, Error)]
pub enum SdpError {
    #[error("cannot parse SDP: {0}")]
    Parse(String),

    #[error("SDP has no media section")]
    NoMediaSection,

    #[error("SDP media section has no usable address")]
    NoMediaAddress,

    #[error("no payload type is mapped to {0}")]
    CodecNotOffered(String),
}

fn parse(sdp: &str) -> Result<SdpDocument, SdpError> {
    let mut reader = Cursor::new(sdp.as_bytes());
    SdpDocument::unmarshal(&mut reader).map_err(|e| SdpError::Parse(e.to_string()))
}

/// Rewrites the first media section's transport protocol to `RTP/AVP`.
///
/// A description without media sections is re-serialized unchanged.
/// Unparsable SDP is an error; the engine produced it, so this points at a
/// defect rather than bad input from the network.
pub fn rewrite_transport_profile(
    desc: &SessionDescription,
) -> Result<SessionDescription, SdpError> {
    let mut parsed = parse(&desc.sdp)?;
    if let Some(media) = parsed.media_descriptions.first_mut() {
        media.media_name.protos = BASELINE_RTP_PROTOS.iter().map(|p| p.to_string()).collect();
    }
    Ok(SessionDescription {
        kind: desc.kind,
        sdp: parsed.marshal(),
    })
}

/// Transport protocol tokens of the first media section.
pub fn first_media_protos(sdp: &str) -> Result<Vec<String>, SdpError> {
    let parsed = parse(sdp)?;
    let media = parsed
        .media_descriptions
        .first()
        .ok_or(SdpError::NoMediaSection)?;
    Ok(media.media_name.protos.clone())
}

/// Whether the first media section uses the plain `RTP/AVP` profile.
pub fn is_plain_rtp(sdp: &str) -> bool {
    first_media_protos(sdp).is_ok_and(|protos| protos == BASELINE_RTP_PROTOS)
}

fn find_attribute<'a>(doc: &'a SdpDocument, key: &str) -> Option<&'a str> {
    doc.attribute(key).map(String::as_str).or_else(|| {
        doc.media_descriptions
            .first()
            .and_then(|media| media.attribute(key).flatten())
    })
}

/// Turns a plain RTP answer into one the peer connection accepts.
///
/// The peer speaks neither ICE nor DTLS, so its answer has no credentials
/// and no fingerprint. Those are copied from our own `local` offer, the
/// first media section gets the offer's transport profile back and the
/// DTLS setup role is fixed to `active`. Addresses, ports and codecs of the
/// answer are left alone, and attributes the answer already has win.
pub fn adapt_plain_rtp_answer(local: &str, answer: &str) -> Result<String, SdpError> {
    let local = parse(local)?;
    let mut adapted = parse(answer)?;
    let local_media = local
        .media_descriptions
        .first()
        .ok_or(SdpError::NoMediaSection)?;

    let mut missing: Vec<Attribute> = TRANSPORT_ATTRIBUTES
        .iter()
        .filter(|key| find_attribute(&adapted, key).is_none())
        .filter_map(|key| {
            find_attribute(&local, key)
                .map(|value| Attribute::new((*key).to_owned(), Some(value.to_owned())))
        })
        .collect();
    if find_attribute(&adapted, "setup").is_none() {
        missing.push(Attribute::new(
            "setup".to_owned(),
            Some(ANSWER_SETUP.to_owned()),
        ));
    }

    let media = adapted
        .media_descriptions
        .first_mut()
        .ok_or(SdpError::NoMediaSection)?;
    media.media_name.protos = local_media.media_name.protos.clone();
    media.attributes.extend(missing);
    Ok(adapted.marshal())
}

/// Where RTP for the first media section goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaEndpoint {
    pub address: IpAddr,
    pub port: u16,
}

/// Resolves the RTP endpoint of the first media section.
///
/// Without ICE the first candidate of the section is taken as the media
/// address. Descriptions without candidates fall back to the `c=` line
/// (media level first, then session level) and the `m=` port; an
/// unspecified address or the discard port there means no address is known.
pub fn media_endpoint(sdp: &str) -> Result<MediaEndpoint, SdpError> {
    let parsed = parse(sdp)?;
    let media = parsed
        .media_descriptions
        .first()
        .ok_or(SdpError::NoMediaSection)?;

    let first_candidate = media
        .attributes
        .iter()
        .filter(|a| a.key == "candidate")
        .find_map(|a| a.value.as_deref().and_then(parse_candidate_endpoint));
    if let Some((address, port)) = first_candidate {
        return Ok(MediaEndpoint { address, port });
    }

    let address = media
        .connection_information
        .as_ref()
        .or(parsed.connection_information.as_ref())
        .and_then(|c| c.address.as_ref())
        .and_then(|a| a.address.parse::<IpAddr>().ok())
        .filter(|address| !address.is_unspecified())
        .ok_or(SdpError::NoMediaAddress)?;
    let port = u16::try_from(media.media_name.port.value)
        .ok()
        .filter(|port| *port != 0 && *port != DISCARD_PORT)
        .ok_or(SdpError::NoMediaAddress)?;
    Ok(MediaEndpoint { address, port })
}

/// Payload type the first media section maps to `encoding` (e.g. "VP8").
pub fn payload_type_for(sdp: &str, encoding: &str) -> Result<Option<u8>, SdpError> {
    let parsed = parse(sdp)?;
    let media = parsed
        .media_descriptions
        .first()
        .ok_or(SdpError::NoMediaSection)?;
    Ok(rtpmap_payload_type(media, encoding))
}

fn rtpmap_payload_type(media: &MediaDescription, encoding: &str) -> Option<u8> {
    media
        .attributes
        .iter()
        .filter(|a| a.key == "rtpmap")
        .filter_map(|a| a.value.as_deref())
        .find_map(|value| {
            // "96 VP8/90000"
            let (pt, format) = value.split_once(' ')?;
            let name = format.split('/').next()?;
            if name.eq_ignore_ascii_case(encoding) {
                pt.parse().ok()
            } else {
                None
            }
        })
}
