//! End-to-end handshake tests against a scripted server and engine.
//!
//! The server side is a channel of transport events fed before or while the
//! session negotiates; everything the client sends is captured by a
//! [`RecordingTransport`].

use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::calls::sdp;
use crate::calls::{
    CallError, CallResponse, CallSession, CallState, Candidate, EngineEvent, ErrorKind,
    IncomingCallRequest, Message, RegisterResponse, SessionDescription, SessionParams,
    StartCommunication,
};
use crate::config::Role;
use crate::test_utils::{
    ENGINE_OFFER_SDP, EngineCall, PEER_ANSWER_SDP, RecordingTransport, ScriptedEngine, frame,
};
use crate::transport::mock::MockTransportFactory;
use crate::transport::{TransportEvent, TransportFactory};

struct Harness {
    session: CallSession,
    engine: Arc<ScriptedEngine>,
    transport: Arc<RecordingTransport>,
    server: mpsc::Sender<TransportEvent>,
}

impl Harness {
    async fn start(role: Role) -> Self {
        Self::with_engine(role, ScriptedEngine::new()).await
    }

    async fn with_engine(
        role: Role,
        (engine, engine_events): (Arc<ScriptedEngine>, mpsc::UnboundedReceiver<EngineEvent>),
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let factory = MockTransportFactory::new();
        let server = factory.events();
        let (connection, transport_events) = factory.create_transport().await.unwrap();
        let params = SessionParams {
            role,
            user: "test1".into(),
            peer: "test2".into(),
        };
        let session = CallSession::start(
            params,
            engine.clone(),
            engine_events,
            connection,
            transport_events,
        );
        Self {
            session,
            engine,
            transport: factory.transport(),
            server,
        }
    }

    async fn push(&self, message: Message) {
        self.server.send(frame(&message)).await.unwrap();
    }

    async fn push_raw(&self, value: serde_json::Value) {
        self.server
            .send(TransportEvent::FrameReceived(Bytes::from(value.to_string())))
            .await
            .unwrap();
    }

    /// Closes the session and returns everything that reached the wire.
    async fn finish(self) -> (Vec<Message>, Vec<EngineCall>) {
        self.session.close().await;
        (self.transport.sent_messages(), self.engine.calls())
    }
}

fn register_response(response: &str, message: Option<&str>) -> Message {
    Message::RegisterResponse(RegisterResponse {
        response: response.into(),
        message: message.map(Into::into),
    })
}

fn call_response(response: &str, sdp_answer: Option<&str>, message: Option<&str>) -> Message {
    Message::CallResponse(CallResponse {
        response: response.into(),
        sdp_answer: sdp_answer.map(Into::into),
        message: message.map(Into::into),
    })
}

fn incoming_call(from: &str) -> Message {
    Message::IncomingCall(IncomingCallRequest { from: from.into() })
}

fn start_communication(sdp_answer: &str) -> Message {
    Message::StartCommunication(StartCommunication {
        sdp_answer: sdp_answer.into(),
    })
}

fn remote_candidate() -> Candidate {
    Candidate::new(
        "candidate:842163049 1 udp 1677729535 10.0.0.2 40000 typ host",
        "0",
        0,
    )
}

fn offered_sdp(message: &Message) -> &str {
    match message {
        Message::Call(call) => &call.sdp_offer,
        Message::IncomingCallResponse(response) => &response.sdp_offer,
        other => panic!("no offer in {}", other.id()),
    }
}

#[tokio::test]
async fn test_caller_happy_path() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;

    let call = h.session.negotiate().await.unwrap();
    assert_eq!(call.role, Role::Caller);
    assert_eq!(call.remote, SessionDescription::answer(PEER_ANSWER_SDP));
    assert_eq!(
        h.session.state_history(),
        &[CallState::Idle, CallState::Negotiating, CallState::Active]
    );

    let (sent, calls) = h.finish().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], Message::register("test1"));
    let Message::Call(request) = &sent[1] else {
        panic!("expected call, got {}", sent[1].id());
    };
    assert_eq!(request.from, "test1");
    assert_eq!(request.to, "test2");
    assert_eq!(
        sdp::first_media_protos(&request.sdp_offer).unwrap(),
        vec!["RTP", "AVP"]
    );
    assert_eq!(request.sdp_offer, call.local.sdp);

    assert_eq!(
        calls,
        vec![
            EngineCall::AddSendTrack,
            EngineCall::CreateOffer,
            EngineCall::WaitGathering,
            EngineCall::SetRemoteDescription(SessionDescription::answer(PEER_ANSWER_SDP)),
            EngineCall::Finalize,
        ]
    );
}

#[tokio::test]
async fn test_callee_happy_path() {
    let mut h = Harness::start(Role::Callee).await;
    h.push(register_response("accepted", None)).await;
    h.push(incoming_call("test2")).await;
    h.push(start_communication(PEER_ANSWER_SDP)).await;

    let call = h.session.negotiate().await.unwrap();
    assert_eq!(call.role, Role::Callee);
    assert!(h.session.state().is_active());

    let (sent, calls) = h.finish().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], Message::register("test1"));
    let Message::IncomingCallResponse(response) = &sent[1] else {
        panic!("expected incomingCallResponse, got {}", sent[1].id());
    };
    assert_eq!(response.from, "test1");
    assert_eq!(response.call_response, "accept");
    assert_eq!(
        sdp::first_media_protos(offered_sdp(&sent[1])).unwrap(),
        vec!["RTP", "AVP"]
    );

    assert_eq!(calls[0], EngineCall::AddReceiveTransceiver);
    assert_eq!(calls.last(), Some(&EngineCall::Finalize));
}

#[tokio::test]
async fn test_malformed_incoming_call_is_skipped() {
    let mut h = Harness::start(Role::Callee).await;
    h.push(register_response("accepted", None)).await;
    // No "from": dropped by the inbound pump.
    h.push_raw(json!({ "id": "incomingCall" })).await;
    h.push_raw(json!({ "id": "incomingCall", "from": 42 })).await;

    let waiting = tokio::time::timeout(Duration::from_millis(100), h.session.negotiate()).await;
    assert!(waiting.is_err(), "negotiation should still be waiting");
    assert_eq!(h.session.state(), CallState::Idle);
    assert_eq!(h.engine.calls(), vec![EngineCall::AddReceiveTransceiver]);

    let (sent, _) = h.finish().await;
    assert_eq!(sent, vec![Message::register("test1")]);
}

#[tokio::test]
async fn test_valid_incoming_call_after_malformed_one() {
    let mut h = Harness::start(Role::Callee).await;
    h.push(register_response("accepted", None)).await;
    h.push_raw(json!({ "id": "incomingCall" })).await;
    h.push(incoming_call("test2")).await;
    h.push(start_communication(PEER_ANSWER_SDP)).await;

    h.session.negotiate().await.unwrap();
    assert_eq!(
        h.session.state_history(),
        &[CallState::Idle, CallState::Negotiating, CallState::Active]
    );
    let (sent, calls) = h.finish().await;
    assert_eq!(sent.len(), 2);
    let offers = calls
        .iter()
        .filter(|c| **c == EngineCall::CreateOffer)
        .count();
    assert_eq!(offers, 1);
}

#[tokio::test]
async fn test_early_candidate_applied_after_remote_description() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(Message::IceCandidate(remote_candidate())).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;

    h.session.negotiate().await.unwrap();
    let cache = h.session.candidate_cache().clone();
    assert!(cache.is_flushed().await);
    assert!(cache.is_empty().await);

    let (_, calls) = h.finish().await;
    assert_eq!(
        &calls[3..],
        &[
            EngineCall::SetRemoteDescription(SessionDescription::answer(PEER_ANSWER_SDP)),
            EngineCall::AddRemoteCandidate(remote_candidate()),
            EngineCall::Finalize,
        ]
    );
}

#[tokio::test]
async fn test_registration_rejected() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("rejected", Some("User test1 is already registered")))
        .await;

    let err = h.session.negotiate().await.unwrap_err();
    assert!(
        matches!(&err, CallError::RegistrationRejected(reason) if reason.contains("already registered"))
    );
    assert_eq!(err.kind(), ErrorKind::Negotiation);
    assert_eq!(h.session.state(), CallState::Terminated);
    assert_eq!(
        h.session.state_history(),
        &[CallState::Idle, CallState::Terminated]
    );
    assert!(h.session.termination_reason().is_some());

    let (sent, calls) = h.finish().await;
    assert_eq!(sent, vec![Message::register("test1")]);
    assert!(calls.is_empty());
}

#[tokio::test]
async fn test_call_rejected() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(call_response("rejected", None, Some("user test2 is not registered")))
        .await;

    let err = h.session.negotiate().await.unwrap_err();
    assert!(matches!(err, CallError::CallRejected(_)));
    assert_eq!(
        h.session.state_history(),
        &[CallState::Idle, CallState::Negotiating, CallState::Terminated]
    );

    let (_, calls) = h.finish().await;
    assert!(
        !calls
            .iter()
            .any(|c| matches!(c, EngineCall::SetRemoteDescription(_)))
    );
}

#[tokio::test]
async fn test_accepted_without_answer() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(call_response("accepted", None, None)).await;

    let err = h.session.negotiate().await.unwrap_err();
    assert!(matches!(err, CallError::MissingRemoteDescription(_)));
    assert!(h.session.state().is_terminated());
}

#[tokio::test]
async fn test_unrelated_messages_skipped_while_waiting() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(incoming_call("someone")).await;
    h.push(start_communication(PEER_ANSWER_SDP)).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;

    h.session.negotiate().await.unwrap();
    assert!(h.session.state().is_active());
}

#[tokio::test]
async fn test_candidate_rejected_by_engine() {
    let mut h = Harness::with_engine(Role::Caller, ScriptedEngine::rejecting_candidates()).await;
    h.push(register_response("accepted", None)).await;
    h.push(Message::IceCandidate(remote_candidate())).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;

    let err = h.session.negotiate().await.unwrap_err();
    assert!(matches!(err, CallError::CandidateFlush(_)));
    assert_eq!(err.kind(), ErrorKind::Engine);
    assert!(h.session.state().is_terminated());

    let (_, calls) = h.finish().await;
    assert!(!calls.contains(&EngineCall::Finalize));
}

#[tokio::test]
async fn test_connection_lost_during_negotiation() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.engine.emit(EngineEvent::ConnectionLost("failed".into()));

    let err = h.session.negotiate().await.unwrap_err();
    assert!(matches!(&err, CallError::MediaConnectionLost(state) if state == "failed"));
    assert!(h.session.state().is_terminated());
}

#[tokio::test]
async fn test_connected_event_is_informational() {
    let mut h = Harness::start(Role::Caller).await;
    h.engine.emit(EngineEvent::Connected);
    h.push(register_response("accepted", None)).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;

    h.session.negotiate().await.unwrap();
    assert!(h.session.state().is_active());
}

#[tokio::test]
async fn test_signaling_connection_closed() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.server.send(TransportEvent::Disconnected).await.unwrap();

    let err = h.session.negotiate().await.unwrap_err();
    assert!(matches!(err, CallError::ConnectionClosed));
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(
        h.session.state_history(),
        &[CallState::Idle, CallState::Negotiating, CallState::Terminated]
    );
}

#[tokio::test]
async fn test_run_until_shutdown_returns_on_signal() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;
    h.session.negotiate().await.unwrap();

    // Late candidate: cache is already flushed, so it is never applied.
    h.push(Message::IceCandidate(remote_candidate())).await;
    h.server.send(TransportEvent::Disconnected).await.unwrap();

    h.session
        .run_until_shutdown(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(h.session.state().is_active());

    let (_, calls) = h.finish().await;
    assert!(
        !calls
            .iter()
            .any(|c| matches!(c, EngineCall::AddRemoteCandidate(_)))
    );
}

#[tokio::test]
async fn test_run_until_shutdown_connection_lost() {
    let mut h = Harness::start(Role::Caller).await;
    h.push(register_response("accepted", None)).await;
    h.push(call_response("accepted", Some(PEER_ANSWER_SDP), None))
        .await;
    h.session.negotiate().await.unwrap();

    h.engine
        .emit(EngineEvent::ConnectionLost("disconnected".into()));
    let err = h
        .session
        .run_until_shutdown(std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::MediaConnectionLost(_)));
    assert_eq!(
        h.session.state_history(),
        &[
            CallState::Idle,
            CallState::Negotiating,
            CallState::Active,
            CallState::Terminated,
        ]
    );
}

#[test]
fn test_engine_offer_is_savpf() {
    // The rewrite has something to do on the canned offer.
    assert_eq!(
        sdp::first_media_protos(ENGINE_OFFER_SDP).unwrap(),
        vec!["UDP", "TLS", "RTP", "SAVPF"]
    );
}
