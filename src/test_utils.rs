use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::calls::{Candidate, EngineError, EngineEvent, Message, PeerEngine, SessionDescription};
use crate::transport::{Transport, TransportEvent};

/// SDP in the shape the engine hands out: ICE/DTLS profile plus a gathered
/// host candidate.
pub const ENGINE_OFFER_SDP: &str = "v=0\r\n\
    o=- 8406123473638459134 2 IN IP4 0.0.0.0\r\n\
    s=-\r\n\
    t=0 0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    c=IN IP4 0.0.0.0\r\n\
    a=mid:0\r\n\
    a=rtpmap:96 VP8/90000\r\n\
    a=candidate:167090039 1 udp 2130706431 192.168.1.20 51234 typ host\r\n";

/// What a lab peer answers with.
pub const PEER_ANSWER_SDP: &str = "v=0\r\n\
    o=- 4611731400430051336 2 IN IP4 10.0.0.2\r\n\
    s=-\r\n\
    c=IN IP4 10.0.0.2\r\n\
    t=0 0\r\n\
    m=video 40000 RTP/AVP 96\r\n\
    a=rtpmap:96 VP8/90000\r\n";

pub fn frame(message: &Message) -> TransportEvent {
    TransportEvent::FrameReceived(Bytes::from(message.to_frame()))
}

/// A transport that records every frame sent through it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    fail_sends: bool,
    disconnected: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every send fails.
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| Message::from_slice(f).expect("sent frames decode"))
            .collect()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        if self.fail_sends || self.is_disconnected() {
            return Err(anyhow::anyhow!("Socket is closed"));
        }
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    AddSendTrack,
    AddReceiveTransceiver,
    CreateOffer,
    WaitGathering,
    SetRemoteDescription(SessionDescription),
    AddRemoteCandidate(Candidate),
    Finalize,
}

/// An engine that records calls and hands out canned descriptions.
///
/// Applying a candidate before the remote description fails, as it would
/// in a real engine.
pub struct ScriptedEngine {
    calls: Mutex<Vec<EngineCall>>,
    offered: AtomicBool,
    gathered: AtomicBool,
    remote_set: AtomicBool,
    reject_candidates: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl ScriptedEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        Self::build(false)
    }

    /// An engine that refuses every remote candidate.
    pub fn rejecting_candidates() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        Self::build(true)
    }

    fn build(reject_candidates: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            calls: Mutex::new(Vec::new()),
            offered: AtomicBool::new(false),
            gathered: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            reject_candidates,
            events,
        };
        (Arc::new(engine), events_rx)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerEngine for ScriptedEngine {
    async fn add_send_track(&self) -> Result<(), EngineError> {
        self.record(EngineCall::AddSendTrack);
        Ok(())
    }

    async fn add_receive_transceiver(&self) -> Result<(), EngineError> {
        self.record(EngineCall::AddReceiveTransceiver);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::CreateOffer);
        self.offered.store(true, Ordering::SeqCst);
        Ok(SessionDescription::offer(ENGINE_OFFER_SDP))
    }

    async fn wait_gathering_complete(&self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::WaitGathering);
        if !self.offered.load(Ordering::SeqCst) {
            return Err(EngineError::NoLocalOffer);
        }
        if self.gathered.swap(true, Ordering::SeqCst) {
            return Err(EngineError::GatheringAlreadyAwaited);
        }
        Ok(SessionDescription::offer(ENGINE_OFFER_SDP))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.record(EngineCall::SetRemoteDescription(desc));
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &Candidate) -> Result<(), EngineError> {
        self.record(EngineCall::AddRemoteCandidate(candidate.clone()));
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(EngineError::operation(
                "add remote candidate",
                "remote description not set",
            ));
        }
        if self.reject_candidates {
            return Err(EngineError::operation("add remote candidate", "rejected"));
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Finalize);
        Ok(())
    }
}
