use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use crate::configuration::types::ProxyEndpoint;
use crate::data_capture::types::Flow;
use crate::error_handling::types::EngineError;

/// Callbacks an engine invokes from its own execution context.
///
/// Implementations must return promptly and must not touch resources owned
/// by another runtime directly.
pub trait FlowHooks: Send + Sync {
    /// Request head and body have been read.
    fn on_request_start(&self, flow: &Flow);

    /// `flow.response` is complete.
    fn on_response_complete(&self, flow: &Flow);

    /// The exchange failed; `flow.error` holds the detail.
    fn on_flow_error(&self, flow: &Flow);
}

/// One-shot notification that the engine is accepting connections.
pub struct ReadySignal {
    tx: Option<oneshot::Sender<SocketAddr>>,
}

impl ReadySignal {
    pub fn channel() -> (Self, oneshot::Receiver<SocketAddr>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Reports the bound address. Later calls are ignored.
    pub fn notify(&mut self, addr: SocketAddr) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(addr);
        }
    }
}

/// Level-triggered stop request shared with the controlling side.
///
/// A dropped sender counts as a stop request.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn triggered(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// An interception engine driven by the lifecycle manager.
///
/// `run` executes on a dedicated runtime. It binds `endpoint`, calls
/// `ready.notify` once listening, dispatches flows to `hooks`, and returns
/// after `shutdown` fires and its listener is closed. A bind failure is
/// returned immediately.
#[async_trait]
pub trait InterceptionEngine: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn run(
        &self,
        endpoint: ProxyEndpoint,
        hooks: Arc<dyn FlowHooks>,
        ready: ReadySignal,
        shutdown: ShutdownSignal,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_ready_signal_fires_once() {
        let (mut ready, rx) = ReadySignal::channel();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        ready.notify(addr);
        ready.notify("127.0.0.1:10".parse().unwrap());
        assert_eq!(rx.await.unwrap(), addr);
    }

    #[test]
    fn test_shutdown_signal_on_send_and_on_drop() {
        let (tx, rx) = watch::channel(false);
        let mut signal = ShutdownSignal::new(rx);
        assert!(!signal.is_triggered());
        {
            let mut triggered = task::spawn(signal.triggered());
            assert_pending!(triggered.poll());
            tx.send_replace(true);
            assert!(triggered.is_woken());
            assert_ready!(triggered.poll());
        }
        assert!(signal.is_triggered());

        let (tx, rx) = watch::channel(false);
        let mut signal = ShutdownSignal::new(rx);
        let mut triggered = task::spawn(signal.triggered());
        assert_pending!(triggered.poll());
        drop(tx);
        assert_ready!(triggered.poll());
    }
}
