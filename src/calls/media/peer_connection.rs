//! [`PeerEngine`] backed by a webrtc-rs peer connection.
//!
//! The connection is only used to produce a local description with real
//! host candidates and to watch the ICE connection state. It is set up for
//! a closed lab network: IPv4 UDP only, no multicast DNS, no ICE servers and
//! exactly one video codec, so the peer cannot pick anything the media
//! engine would have to transcode.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use webrtc::api::APIBuilder;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::dtls_transport::dtls_role::DTLSRole;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::calls::candidates::Candidate;
use crate::calls::engine::{EngineError, EngineEvent, PeerEngine, SdpKind, SessionDescription};
use crate::calls::sdp;
use crate::config::VideoCodec;

const VIDEO_CLOCK_RATE: u32 = 90000;
const VP8_PAYLOAD_TYPE: u8 = 96;
const H264_PAYLOAD_TYPE: u8 = 102;
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

#[derive(Debug, Clone)]
pub struct WebRtcEngineConfig {
    pub codec: VideoCodec,
    /// Restrict local candidates to this address.
    pub ice_addr: Option<IpAddr>,
}

/// Where local candidate gathering stands.
enum Gathering {
    NotStarted,
    Pending(mpsc::Receiver<()>),
    Done,
}

pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    codec: VideoCodec,
    gathering: Mutex<Gathering>,
}

impl WebRtcEngine {
    /// Builds the peer connection and returns it with its event stream.
    pub async fn new(
        config: WebRtcEngineConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EngineEvent>), EngineError> {
        let api = create_api(&config)?;

        // No ICE servers: every address involved is known up front.
        let rtc_config = RTCConfiguration::default();
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| EngineError::operation("create peer connection", e))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        install_handlers(&peer_connection, events_tx);

        let engine = Self {
            peer_connection,
            codec: config.codec,
            gathering: Mutex::new(Gathering::NotStarted),
        };
        Ok((engine, events_rx))
    }

    fn codec_capability(&self) -> RTCRtpCodecCapability {
        codec_parameters(self.codec).capability
    }
}

fn codec_parameters(codec: VideoCodec) -> RTCRtpCodecParameters {
    let (mime_type, payload_type, fmtp) = match codec {
        VideoCodec::Vp8 => (MIME_TYPE_VP8, VP8_PAYLOAD_TYPE, ""),
        VideoCodec::H264 => (MIME_TYPE_H264, H264_PAYLOAD_TYPE, H264_FMTP),
    };
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate: VIDEO_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line: fmtp.to_owned(),
            rtcp_feedback: vec![],
        },
        payload_type,
        ..Default::default()
    }
}

fn create_api(config: &WebRtcEngineConfig) -> Result<webrtc::api::API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_codec(codec_parameters(config.codec), RTPCodecType::Video)
        .map_err(|e| EngineError::operation("register codec", e))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_network_types(vec![NetworkType::Udp4]);
    setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
    if let Some(ice_addr) = config.ice_addr {
        info!("Using ICE address: {ice_addr}");
        setting_engine.set_ip_filter(Box::new(move |ip: IpAddr| ip == ice_addr));
    }
    setting_engine
        .set_answering_dtls_role(DTLSRole::Server)
        .map_err(|e| EngineError::operation("set DTLS role", e))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_setting_engine(setting_engine)
        .build())
}

fn install_handlers(
    peer_connection: &RTCPeerConnection,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    peer_connection.on_signaling_state_change(Box::new(|state: RTCSignalingState| {
        Box::pin(async move {
            info!("Signaling state change: {state}");
        })
    }));

    peer_connection.on_ice_connection_state_change(Box::new(
        move |state: RTCIceConnectionState| {
            let events = events.clone();
            Box::pin(async move {
                info!("Connection state change: {state}");
                let event = match state {
                    RTCIceConnectionState::Connected => EngineEvent::Connected,
                    RTCIceConnectionState::Disconnected | RTCIceConnectionState::Failed => {
                        EngineEvent::ConnectionLost(state.to_string())
                    }
                    _ => return,
                };
                let _ = events.send(event);
            })
        },
    ));

    // Local candidates stay in the local description; nothing is trickled.
    peer_connection.on_ice_candidate(Box::new(|candidate| {
        Box::pin(async move {
            if let Some(c) = candidate {
                debug!(
                    "Found new ICE candidate: {:?}",
                    c.to_json().map(|j| j.candidate)
                );
            }
        })
    }));
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
}

fn from_rtc_description(desc: RTCSessionDescription) -> SessionDescription {
    match desc.sdp_type {
        RTCSdpType::Answer | RTCSdpType::Pranswer => SessionDescription::answer(desc.sdp),
        _ => SessionDescription::offer(desc.sdp),
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn add_send_track(&self) -> Result<(), EngineError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            self.codec_capability(),
            "video".to_owned(),
            "pion".to_owned(),
        ));
        self.peer_connection
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::operation("add track", e))?;
        Ok(())
    }

    async fn add_receive_transceiver(&self) -> Result<(), EngineError> {
        self.peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| EngineError::operation("add transceiver", e))?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| EngineError::operation("create offer", e))?;

        // The promise has to exist before gathering starts.
        let gathered = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| EngineError::operation("set local description", e))?;
        *self.gathering.lock().await = Gathering::Pending(gathered);

        Ok(from_rtc_description(offer))
    }

    async fn wait_gathering_complete(&self) -> Result<SessionDescription, EngineError> {
        let mut gathering = self.gathering.lock().await;
        match std::mem::replace(&mut *gathering, Gathering::Done) {
            Gathering::NotStarted => {
                *gathering = Gathering::NotStarted;
                return Err(EngineError::NoLocalOffer);
            }
            Gathering::Done => return Err(EngineError::GatheringAlreadyAwaited),
            Gathering::Pending(mut gathered) => {
                let _ = gathered.recv().await;
            }
        }

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or(EngineError::NoLocalDescription)?;
        Ok(from_rtc_description(local))
    }

    async fn set_remote_description(
        &self,
        mut desc: SessionDescription,
    ) -> Result<(), EngineError> {
        // A plain RTP answer carries no ICE or DTLS parameters the peer
        // connection could use; it is given ours instead.
        if desc.kind == SdpKind::Answer && sdp::is_plain_rtp(&desc.sdp) {
            let local = self
                .peer_connection
                .local_description()
                .await
                .ok_or(EngineError::NoLocalDescription)?;
            desc.sdp = sdp::adapt_plain_rtp_answer(&local.sdp, &desc.sdp)
                .map_err(|e| EngineError::operation("adapt remote description", e))?;
            debug!("Adapted remote description:\n{}", desc.sdp);
        }

        let desc = to_rtc_description(desc)
            .map_err(|e| EngineError::operation("parse remote description", e))?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| EngineError::operation("set remote description", e))
    }

    async fn add_remote_candidate(&self, candidate: &Candidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate().to_owned(),
            sdp_mid: Some(candidate.sdp_mid().to_owned()),
            sdp_mline_index: Some(candidate.sdp_mline_index()),
            username_fragment: None,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| EngineError::operation("add remote candidate", e))
    }

    async fn finalize(&self) -> Result<(), EngineError> {
        if let Err(e) = self.peer_connection.close().await {
            warn!("Closing peer connection: {e}");
        }
        Ok(())
    }
}
