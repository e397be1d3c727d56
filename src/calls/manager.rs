//! Call session: owns the call state and drives the caller or callee
//! handshake over the signaling connection.

use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::candidates::CandidateCache;
use super::engine::{EngineEvent, PeerEngine, SessionDescription};
use super::error::CallError;
use super::pump::{inbound_pump, outbound_pump};
use super::sdp;
use super::signaling::{ACCEPT, Message, MessageId};
use super::state::{CallState, CallStateMachine, CallTransition};
use crate::config::Role;
use crate::transport::{Transport, TransportEvent};

/// Who this session is and whom it calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub role: Role,
    pub user: String,
    pub peer: String,
}

/// Result of a successful negotiation, handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedCall {
    pub role: Role,
    /// Local description as sent to the peer (plain RTP profile).
    pub local: SessionDescription,
    pub remote: SessionDescription,
}

/// One signaling session: the call state, the candidate cache, the engine
/// and the two message queues bridged to the transport by the pumps.
pub struct CallSession {
    params: SessionParams,
    state: CallStateMachine,
    engine: Arc<dyn PeerEngine>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    cache: Arc<CandidateCache>,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    transport: Arc<dyn Transport>,
    inbound_task: JoinHandle<()>,
    outbound_task: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Spawns the inbound and outbound pumps for `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        params: SessionParams,
        engine: Arc<dyn PeerEngine>,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let cache = Arc::new(CandidateCache::new());
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let inbound_task = tokio::spawn(inbound_pump(transport_events, cache.clone(), inbound_tx));
        let outbound_task = tokio::spawn(outbound_pump(outbound_rx, transport.clone()));

        Self {
            params,
            state: CallStateMachine::new(),
            engine,
            engine_events,
            cache,
            inbound,
            outbound: Some(outbound),
            transport,
            inbound_task,
            outbound_task: Some(outbound_task),
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn state(&self) -> CallState {
        self.state.state()
    }

    pub fn state_history(&self) -> &[CallState] {
        self.state.history()
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.state.termination_reason()
    }

    pub fn candidate_cache(&self) -> &Arc<CandidateCache> {
        &self.cache
    }

    /// Runs the handshake for the configured role.
    ///
    /// Any error is fatal for the session: the state moves to `Terminated`
    /// and the error is returned for the caller to act on.
    pub async fn negotiate(&mut self) -> Result<EstablishedCall, CallError> {
        let result = match self.params.role {
            Role::Caller => self.run_caller().await,
            Role::Callee => self.run_callee().await,
        };
        if let Err(e) = &result {
            self.terminate(e);
        }
        result
    }

    async fn run_caller(&mut self) -> Result<EstablishedCall, CallError> {
        let user = self.params.user.clone();
        let peer = self.params.peer.clone();

        self.register(&user).await?;

        info!(target: "Session/Negotiator", "Starting call: {user} -> {peer}");
        self.engine.add_send_track().await?;
        let local = self.prepare_local_description().await?;

        self.transition(CallTransition::NegotiationStarted)?;
        self.send(Message::call(&user, &peer, local.sdp.clone()))?;

        let response = self
            .wait_for(MessageId::CallResponse, |m| match m {
                Message::CallResponse(r) => Ok(r),
                other => Err(other),
            })
            .await?;
        info!(target: "Session/Negotiator", "Call response: {}", response.outcome());
        if !response.is_accepted() {
            return Err(CallError::CallRejected(response.outcome()));
        }
        let answer = response
            .sdp_answer
            .ok_or(CallError::MissingRemoteDescription("callResponse"))?;

        let remote = self.establish(answer).await?;
        Ok(EstablishedCall {
            role: Role::Caller,
            local,
            remote,
        })
    }

    async fn run_callee(&mut self) -> Result<EstablishedCall, CallError> {
        let user = self.params.user.clone();

        self.register(&user).await?;

        self.engine.add_receive_transceiver().await?;
        let request = self
            .wait_for(MessageId::IncomingCall, |m| match m {
                Message::IncomingCall(r) => Ok(r),
                other => Err(other),
            })
            .await?;
        info!(target: "Session/Negotiator", "New call from: {}", request.from);

        let local = self.prepare_local_description().await?;

        self.transition(CallTransition::NegotiationStarted)?;
        self.send(Message::incoming_call_response(&user, ACCEPT, local.sdp.clone()))?;

        let start = self
            .wait_for(MessageId::StartCommunication, |m| match m {
                Message::StartCommunication(s) => Ok(s),
                other => Err(other),
            })
            .await?;
        info!(target: "Session/Negotiator", "Start communication");

        let remote = self.establish(start.sdp_answer).await?;
        Ok(EstablishedCall {
            role: Role::Callee,
            local,
            remote,
        })
    }

    async fn register(&mut self, user: &str) -> Result<(), CallError> {
        info!(target: "Session/Negotiator", "Registering user: {user}");
        self.send(Message::register(user))?;

        let reply = self
            .wait_for(MessageId::RegisterResponse, |m| match m {
                Message::RegisterResponse(r) => Ok(r),
                other => Err(other),
            })
            .await?;
        if !reply.is_accepted() {
            return Err(CallError::RegistrationRejected(reply.outcome()));
        }
        debug!(target: "Session/Negotiator", "Registered as {user}");
        Ok(())
    }

    /// Offer, gather, then rewrite to the plain RTP profile.
    async fn prepare_local_description(&mut self) -> Result<SessionDescription, CallError> {
        self.engine.create_offer().await?;
        debug!(target: "Session/Negotiator", "Waiting for local ICE gathering to complete");
        let gathered = self.engine.wait_gathering_complete().await?;
        Ok(sdp::rewrite_transport_profile(&gathered)?)
    }

    /// Applies the peer's answer, flushes cached candidates, goes active and
    /// releases the engine.
    async fn establish(&mut self, answer_sdp: String) -> Result<SessionDescription, CallError> {
        let remote = SessionDescription::answer(answer_sdp);
        debug!(target: "Session/Negotiator", "Remote session description received:\n{}", remote.sdp);
        self.engine.set_remote_description(remote.clone()).await?;

        let engine = self.engine.clone();
        let applied = self
            .cache
            .flush(move |candidate| {
                let engine = engine.clone();
                async move { engine.add_remote_candidate(&candidate).await }
            })
            .await?;
        debug!(target: "Session/Negotiator", "Applied {applied} cached remote ICE candidates");

        self.transition(CallTransition::Established)?;
        info!(target: "Session/Negotiator", "Connection setup ready");
        self.engine.finalize().await?;
        Ok(remote)
    }

    fn transition(&mut self, transition: CallTransition) -> Result<(), CallError> {
        let state = self.state.apply_transition(transition)?;
        info!(target: "Session/Negotiator", "New state: {state}");
        Ok(())
    }

    fn terminate(&mut self, reason: &CallError) {
        if self.state().is_terminated() {
            return;
        }
        error!(target: "Session/Negotiator", "Call terminated: {reason}");
        // Terminated is reachable from every live state.
        let _ = self.state.apply_transition(CallTransition::Terminated {
            reason: reason.to_string(),
        });
    }

    fn send(&self, message: Message) -> Result<(), CallError> {
        let outbound = self.outbound.as_ref().ok_or(CallError::ConnectionClosed)?;
        outbound
            .send(message)
            .map_err(|_| CallError::ConnectionClosed)
    }

    /// Waits for the next message that `pick` accepts, logging and dropping
    /// everything else. Engine failures and a closed connection end the
    /// wait with an error.
    async fn wait_for<T>(
        &mut self,
        expected: MessageId,
        mut pick: impl FnMut(Message) -> Result<T, Message>,
    ) -> Result<T, CallError> {
        loop {
            tokio::select! {
                message = self.inbound.recv() => {
                    let message = message.ok_or(CallError::ConnectionClosed)?;
                    match pick(message) {
                        Ok(value) => return Ok(value),
                        Err(other) => {
                            warn!(target: "Session/Negotiator", "Waiting for {expected}, ignoring {}", other.id());
                        }
                    }
                }
                Some(event) = self.engine_events.recv() => check_engine_event(event)?,
            }
        }
    }

    /// Keeps the session alive after hand-off until `shutdown` completes.
    ///
    /// Returns an error, and terminates the session, if the engine reports
    /// that the media connection was lost first.
    pub async fn run_until_shutdown<F>(&mut self, shutdown: F) -> Result<(), CallError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut signaling_open = true;
        let mut engine_open = true;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "Session/Negotiator", "Shutdown requested");
                    return Ok(());
                }
                event = self.engine_events.recv(), if engine_open => match event {
                    Some(event) => {
                        if let Err(e) = check_engine_event(event) {
                            self.terminate(&e);
                            return Err(e);
                        }
                    }
                    None => engine_open = false,
                },
                message = self.inbound.recv(), if signaling_open => match message {
                    Some(message) => {
                        debug!(target: "Session/Negotiator", "Ignoring {} after call setup", message.id());
                    }
                    None => {
                        info!(target: "Session/Negotiator", "Signaling connection closed");
                        signaling_open = false;
                    }
                },
            }
        }
    }

    /// Flushes pending outbound messages and closes the signaling connection.
    pub async fn close(mut self) {
        // Dropping the sender lets the outbound pump drain and exit.
        self.outbound.take();
        if let Some(task) = self.outbound_task.take() {
            if let Err(e) = task.await {
                warn!(target: "Session/Outbound", "Outbound pump panicked: {e}");
            }
        }
        self.transport.disconnect().await;
        self.inbound_task.abort();
    }
}

fn check_engine_event(event: EngineEvent) -> Result<(), CallError> {
    match event {
        EngineEvent::Connected => {
            info!(target: "Session/Negotiator", "Media connection established");
            Ok(())
        }
        EngineEvent::ConnectionLost(state) => Err(CallError::MediaConnectionLost(state)),
    }
}
