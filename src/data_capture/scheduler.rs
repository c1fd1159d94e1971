use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    fn acquire(pending: &Arc<Pending>) -> Self {
        pending.count.fetch_add(1, Ordering::AcqRel);
        Self(pending.clone())
    }
}

type QueuedAction = (Pin<Box<dyn Future<Output = ()> + Send>>, PendingGuard);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Hands work from any thread to the host runtime.
///
/// `submit` never blocks and never fails the caller: the action runs later on
/// the host runtime and is responsible for logging its own errors.
#[derive(Clone)]
pub struct HostScheduler {
    handle: Handle,
    pending: Arc<Pending>,
}

impl HostScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            pending: Arc::new(Pending::default()),
        }
    }

    /// Binds to the runtime the caller is running on.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    pub fn submit<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = PendingGuard::acquire(&self.pending);
        self.handle.spawn(async move {
            let _guard = guard;
            action.await;
        });
    }

    /// Opens a lane whose actions run one at a time in submission order, with
    /// at most `capacity` waiting. The lane's worker task ends once every
    /// clone of the lane is dropped.
    pub fn serial_lane(&self, capacity: usize) -> SerialLane {
        let (tx, mut rx) = mpsc::channel::<QueuedAction>(capacity.max(1));
        self.handle.spawn(async move {
            while let Some((action, _guard)) = rx.recv().await {
                action.await;
            }
        });
        SerialLane {
            tx,
            pending: self.pending.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for every submitted action to finish.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.pending.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                idle.await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => {
                debug!("Host scheduler drained");
                true
            }
            Err(_) => {
                warn!(
                    "{} scheduled capture actions still pending after {:?}",
                    self.pending(),
                    timeout
                );
                false
            }
        }
    }
}

/// Ordered counterpart of [`HostScheduler::submit`]. Actions queued here
/// count towards the owning scheduler's `pending` and `drain`.
#[derive(Clone)]
pub struct SerialLane {
    tx: mpsc::Sender<QueuedAction>,
    pending: Arc<Pending>,
}

impl SerialLane {
    /// Queues `action` without blocking. Returns `false` when it was dropped
    /// because the lane is full or its worker is gone.
    pub fn submit<F>(&self, action: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = PendingGuard::acquire(&self.pending);
        let action: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(action);
        match self.tx.try_send((action, guard)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Serial lane is full ({} queued), dropping action",
                    self.tx.max_capacity()
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Serial lane worker is gone, dropping action");
                false
            }
        }
    }
}
