//! Lifecycle Manager
//!
//! Owns the interception engine's execution context: one OS thread per
//! attempt, running its own current-thread tokio runtime. The host side and
//! the engine thread synchronize only through a `watch` channel carrying the
//! worker status (booting, listening, exited) and a per-start stop flag.
//!
//! Retry rule: an attempt that exits before reporting ready and within
//! `min_viable_runtime` is treated as a bind failure (typically the port still
//! in `TIME_WAIT`), and is retried after `retry_backoff` up to `max_attempts`
//! in total. `stop` raises the stop flag before queueing for the operation
//! lock, so a backoff in progress ends immediately.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::configuration::types::{LifecyclePolicy, ProxyEndpoint};
use crate::engine::types::{FlowHooks, InterceptionEngine, ReadySignal, ShutdownSignal};
use crate::error_handling::types::EngineError;
use crate::lifecycle::state::LifecycleState;

/// Reported by the engine thread.
#[derive(Debug, Clone, PartialEq)]
enum WorkerStatus {
    Booting,
    Listening(SocketAddr),
    /// Published only after the engine's runtime has been dropped.
    Exited {
        elapsed: Duration,
        error: Option<String>,
    },
}

impl WorkerStatus {
    fn is_booting(&self) -> bool {
        matches!(self, WorkerStatus::Booting)
    }

    fn is_exited(&self) -> bool {
        matches!(self, WorkerStatus::Exited { .. })
    }
}

struct Worker {
    thread: JoinHandle<()>,
    status: watch::Receiver<WorkerStatus>,
}

#[derive(Default)]
struct Control {
    state: LifecycleState,
    /// Incremented on every start; stale monitors compare against it.
    generation: u64,
    endpoint: Option<ProxyEndpoint>,
    bound: Option<SocketAddr>,
    cancel: Option<watch::Sender<bool>>,
    worker: Option<Worker>,
}

impl Control {
    fn cancel_requested(&self) -> bool {
        self.cancel.as_ref().map_or(true, |tx| *tx.borrow())
    }
}

fn lock(control: &Mutex<Control>) -> MutexGuard<'_, Control> {
    control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_state(control: &mut Control, next: LifecycleState) {
    if control.state != next {
        debug!("Capture lifecycle {} -> {}", control.state, next);
        control.state = next;
    }
}

async fn join_worker(thread: JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || thread.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("Capture engine thread panicked"),
        Err(e) => error!("Unable to join capture engine thread: {}", e),
    }
}

/// What a start attempt observed within the ready window.
enum Observed {
    Ready(SocketAddr),
    Exited {
        elapsed: Duration,
        error: Option<String>,
    },
    TimedOut,
}

pub struct LifecycleManager {
    engine: Arc<dyn InterceptionEngine>,
    policy: LifecyclePolicy,
    /// Serializes `start` and `stop`.
    op_lock: tokio::sync::Mutex<()>,
    control: Arc<Mutex<Control>>,
}

impl LifecycleManager {
    pub fn new(engine: Arc<dyn InterceptionEngine>, policy: LifecyclePolicy) -> Self {
        Self {
            engine,
            policy,
            op_lock: tokio::sync::Mutex::new(()),
            control: Arc::new(Mutex::new(Control::default())),
        }
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.control).state
    }

    /// True while an execution context exists and is not unwinding.
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Endpoint of the current or pending run.
    pub fn endpoint(&self) -> Option<ProxyEndpoint> {
        lock(&self.control).endpoint.clone()
    }

    /// Address the engine reported once listening.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        lock(&self.control).bound
    }

    /// Starts the engine on `endpoint` unless it is already active.
    ///
    /// Returns once the engine is listening, the retry budget is spent, the
    /// ready wait times out (state stays `Starting`), or `stop` intervenes.
    pub async fn start(&self, endpoint: ProxyEndpoint, hooks: Arc<dyn FlowHooks>) {
        let _op = self.op_lock.lock().await;

        let (generation, cancel_rx) = {
            let mut control = lock(&self.control);
            if control.state.is_active() {
                debug!(
                    "Capture engine already {}, ignoring start on {}",
                    control.state, endpoint
                );
                return;
            }
            let (cancel_tx, cancel_rx) = watch::channel(false);
            control.generation += 1;
            control.cancel = Some(cancel_tx);
            control.endpoint = Some(endpoint.clone());
            control.bound = None;
            (control.generation, cancel_rx)
        };

        info!("Starting capture engine {} on {}", self.engine.name(), endpoint);

        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            if *cancel_rx.borrow() {
                break;
            }
            if !self.transition(generation, LifecycleState::Starting) {
                return;
            }

            let mut worker = match self.spawn_worker(attempt, &endpoint, &hooks, &cancel_rx) {
                Ok(worker) => worker,
                Err(e) => {
                    error!("Unable to spawn capture engine thread: {}", e);
                    break;
                }
            };

            match self.await_ready(&mut worker.status).await {
                Observed::Ready(addr) => {
                    {
                        let mut control = lock(&self.control);
                        if control.generation == generation {
                            set_state(&mut control, LifecycleState::Running);
                            control.bound = Some(addr);
                        }
                    }
                    info!("Capture engine listening on {}", addr);
                    self.install_worker(generation, worker);
                    return;
                }
                Observed::TimedOut => {
                    warn!(
                        "Capture engine did not report ready within {:?}; still starting",
                        self.policy.ready_timeout
                    );
                    self.install_worker(generation, worker);
                    return;
                }
                Observed::Exited { elapsed, error } => {
                    join_worker(worker.thread).await;
                    let detail = error.unwrap_or_else(|| "exited without error".to_string());

                    if *cancel_rx.borrow() {
                        debug!("Capture engine attempt {} ended by stop", attempt);
                        break;
                    }
                    if elapsed >= self.policy.min_viable_runtime {
                        error!(
                            "Capture engine exited after {:?} before becoming ready: {}",
                            elapsed, detail
                        );
                        break;
                    }
                    if attempt == attempts {
                        error!(
                            "Capture engine failed to start after {} attempts, last error: {}",
                            attempts, detail
                        );
                        break;
                    }

                    warn!(
                        "Capture engine attempt {}/{} exited after {:?} ({}), retrying in {:?}",
                        attempt, attempts, elapsed, detail, self.policy.retry_backoff
                    );
                    if !self.transition(generation, LifecycleState::Retrying) {
                        return;
                    }
                    if !self.backoff(cancel_rx.clone()).await {
                        debug!("Capture engine retry cancelled");
                        break;
                    }
                }
            }
        }

        let mut control = lock(&self.control);
        if control.generation == generation {
            set_state(&mut control, LifecycleState::Stopped);
            control.cancel = None;
            control.endpoint = None;
            control.bound = None;
        }
    }

    /// Stops the engine and waits, bounded by `shutdown_timeout`, until its
    /// runtime is gone. No-op when already stopped.
    pub async fn stop(&self) {
        self.request_cancel();
        let _op = self.op_lock.lock().await;

        let (generation, worker) = {
            let mut control = lock(&self.control);
            if control.state == LifecycleState::Stopped {
                debug!("Capture engine already stopped");
                return;
            }
            set_state(&mut control, LifecycleState::Stopping);
            if let Some(cancel) = control.cancel.take() {
                cancel.send_replace(true);
            }
            (control.generation, control.worker.take())
        };

        if let Some(worker) = worker {
            self.await_exit(worker).await;
        }

        let mut control = lock(&self.control);
        if control.generation == generation {
            set_state(&mut control, LifecycleState::Stopped);
            control.endpoint = None;
            control.bound = None;
        }
        info!("Capture engine stopped");
    }

    fn request_cancel(&self) {
        if let Some(cancel) = lock(&self.control).cancel.as_ref() {
            cancel.send_replace(true);
        }
    }

    /// Applies `next` if `generation` is still current.
    fn transition(&self, generation: u64, next: LifecycleState) -> bool {
        let mut control = lock(&self.control);
        if control.generation != generation {
            return false;
        }
        set_state(&mut control, next);
        true
    }

    fn spawn_worker(
        &self,
        attempt: u32,
        endpoint: &ProxyEndpoint,
        hooks: &Arc<dyn FlowHooks>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> std::io::Result<Worker> {
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Booting);
        let engine = self.engine.clone();
        let endpoint = endpoint.clone();
        let hooks = hooks.clone();
        let shutdown = ShutdownSignal::new(cancel_rx.clone());

        let thread = std::thread::Builder::new()
            .name(format!("capture-engine-{}", attempt))
            .spawn(move || run_engine(engine, endpoint, hooks, shutdown, status_tx))?;

        Ok(Worker {
            thread,
            status: status_rx,
        })
    }

    async fn await_ready(&self, status: &mut watch::Receiver<WorkerStatus>) -> Observed {
        let waited = tokio::time::timeout(
            self.policy.ready_timeout,
            status.wait_for(|s| !s.is_booting()),
        )
        .await
        .map(|seen| seen.map(|s| s.clone()));

        match waited {
            Ok(Ok(WorkerStatus::Listening(addr))) => Observed::Ready(addr),
            Ok(Ok(WorkerStatus::Exited { elapsed, error })) => Observed::Exited { elapsed, error },
            Ok(Ok(WorkerStatus::Booting)) => Observed::TimedOut,
            Ok(Err(_)) => Observed::Exited {
                elapsed: Duration::ZERO,
                error: Some("engine thread ended without reporting".to_string()),
            },
            Err(_) => Observed::TimedOut,
        }
    }

    /// Parks the worker in the control block and watches it for a late ready
    /// or an exit nobody asked for.
    fn install_worker(&self, generation: u64, worker: Worker) {
        let status = worker.status.clone();
        {
            let mut control = lock(&self.control);
            if control.generation != generation {
                return;
            }
            control.worker = Some(worker);
        }
        tokio::spawn(monitor(self.control.clone(), generation, status));
    }

    async fn backoff(&self, mut cancel_rx: watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.policy.retry_backoff) => true,
            _ = cancel_rx.wait_for(|stop| *stop) => false,
        }
    }

    async fn await_exit(&self, mut worker: Worker) {
        let exited = tokio::time::timeout(
            self.policy.shutdown_timeout,
            worker.status.wait_for(|s| s.is_exited()),
        )
        .await
        .map(|seen| seen.map(|_| ()));

        match exited {
            Ok(_) => join_worker(worker.thread).await,
            Err(_) => warn!(
                "Capture engine did not confirm shutdown within {:?}; releasing it anyway",
                self.policy.shutdown_timeout
            ),
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.request_cancel();
    }
}

/// Body of the engine thread.
fn run_engine(
    engine: Arc<dyn InterceptionEngine>,
    endpoint: ProxyEndpoint,
    hooks: Arc<dyn FlowHooks>,
    shutdown: ShutdownSignal,
    status_tx: watch::Sender<WorkerStatus>,
) {
    let started = Instant::now();
    let status_tx = Arc::new(status_tx);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            status_tx.send_replace(WorkerStatus::Exited {
                elapsed: started.elapsed(),
                error: Some(EngineError::Runtime(format!("build failed: {}", e)).to_string()),
            });
            return;
        }
    };

    let (ready, ready_rx) = ReadySignal::channel();
    let listening_tx = status_tx.clone();
    let result = runtime.block_on(async move {
        let forward = tokio::spawn(async move {
            if let Ok(addr) = ready_rx.await {
                listening_tx.send_replace(WorkerStatus::Listening(addr));
            }
        });
        let result = engine.run(endpoint, hooks, ready, shutdown).await;
        let _ = forward.await;
        result
    });
    drop(runtime);

    status_tx.send_replace(WorkerStatus::Exited {
        elapsed: started.elapsed(),
        error: result.err().map(|e| e.to_string()),
    });
}

async fn monitor(
    control: Arc<Mutex<Control>>,
    generation: u64,
    mut status: watch::Receiver<WorkerStatus>,
) {
    loop {
        let current = if status.changed().await.is_ok() {
            status.borrow_and_update().clone()
        } else {
            WorkerStatus::Exited {
                elapsed: Duration::ZERO,
                error: Some("engine thread ended without reporting".to_string()),
            }
        };

        match current {
            WorkerStatus::Booting => {}
            WorkerStatus::Listening(addr) => {
                let mut control = lock(&control);
                if control.generation != generation {
                    return;
                }
                if control.state == LifecycleState::Starting {
                    set_state(&mut control, LifecycleState::Running);
                    control.bound = Some(addr);
                    info!("Capture engine listening on {} after a slow start", addr);
                }
            }
            WorkerStatus::Exited { error, .. } => {
                let thread = {
                    let mut control = lock(&control);
                    if control.generation != generation || !control.state.is_active() {
                        return;
                    }
                    if control.cancel_requested() {
                        debug!("Capture engine exited on request");
                    } else {
                        error!(
                            "Capture engine exited unexpectedly: {}",
                            error.as_deref().unwrap_or("no error reported")
                        );
                    }
                    set_state(&mut control, LifecycleState::Stopped);
                    control.cancel = None;
                    control.endpoint = None;
                    control.bound = None;
                    control.worker.take().map(|w| w.thread)
                };
                if let Some(thread) = thread {
                    join_worker(thread).await;
                }
                return;
            }
        }
    }
}
