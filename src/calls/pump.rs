//! Background tasks bridging the signaling transport and the negotiator.
//!
//! The inbound pump decodes frames and routes them: remote ICE candidates go
//! to the [`CandidateCache`], every other message goes to the negotiator's
//! queue in arrival order. The outbound pump writes the negotiator's
//! messages to the transport in the order they were queued.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::candidates::CandidateCache;
use super::signaling::Message;
use crate::transport::{Transport, TransportEvent};

/// Reads transport events until the connection is lost.
///
/// Returning drops `messages`, which is how the negotiator learns that the
/// signaling connection is gone.
pub async fn inbound_pump(
    mut events: mpsc::Receiver<TransportEvent>,
    cache: Arc<CandidateCache>,
    messages: mpsc::UnboundedSender<Message>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => {
                debug!(target: "Session/Inbound", "Signaling transport connected");
            }
            TransportEvent::FrameReceived(frame) => {
                let message = match Message::from_slice(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(target: "Session/Inbound", "Discarding signaling message: {e}");
                        continue;
                    }
                };
                debug!(target: "Session/Inbound", "recv: {}", message.id());

                match message {
                    Message::IceCandidate(candidate) => {
                        cache.add(candidate).await;
                    }
                    message => {
                        if messages.send(message).is_err() {
                            debug!(target: "Session/Inbound", "Message queue closed, stopping");
                            return;
                        }
                    }
                }
            }
            TransportEvent::Disconnected => {
                info!(target: "Session/Inbound", "Signaling transport disconnected");
                return;
            }
        }
    }
    debug!(target: "Session/Inbound", "Transport event stream ended");
}

/// Writes queued messages to the transport until the queue closes.
///
/// A failed write is not retried: the transport is torn down, which in turn
/// stops the inbound pump and closes the negotiator's queue.
pub async fn outbound_pump(mut queue: mpsc::UnboundedReceiver<Message>, transport: Arc<dyn Transport>) {
    while let Some(message) = queue.recv().await {
        let id = message.id();
        if let Err(e) = transport.send_frame(&message.to_frame()).await {
            warn!(target: "Session/Outbound", "Failed to send {id}: {e}");
            transport.disconnect().await;
            return;
        }
        debug!(target: "Session/Outbound", "send: {id}");
    }
    debug!(target: "Session/Outbound", "Outbound queue closed");
}
