pub use rtp_client_tokio_transport::{
    DEFAULT_URL, TlsOptions, TokioWebSocketTransportFactory, Transport, TransportEvent,
    TransportFactory,
};

#[cfg(test)]
pub mod mock {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    use crate::test_utils::RecordingTransport;

    /// A factory handing out a [`RecordingTransport`] whose inbound events
    /// are fed by the test through [`MockTransportFactory::events`].
    pub struct MockTransportFactory {
        pending: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
        events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        transport: Arc<RecordingTransport>,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self {
                pending: Mutex::new(Some(rx)),
                events: Mutex::new(Some(tx)),
                transport: Arc::new(RecordingTransport::new()),
            }
        }

        /// Sender for frames the fake server pushes to the client. Can be
        /// taken once.
        pub fn events(&self) -> mpsc::Sender<TransportEvent> {
            self.events
                .lock()
                .unwrap()
                .take()
                .expect("event sender already taken")
        }

        pub fn transport(&self) -> Arc<RecordingTransport> {
            self.transport.clone()
        }
    }

    impl Default for MockTransportFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let rx = self
                .pending
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("mock transport already connected"))?;
            Ok((self.transport.clone(), rx))
        }
    }
}
