//! Execution Gate
//!
//! The only owner of the robot connection. The hardware link has no
//! concurrency protection of its own, so every execution is handed to a single
//! dedicated worker thread through a bounded FIFO queue:
//!
//! - at most one control loop runs at any time, system-wide;
//! - callers are served in arrival order;
//! - at most `max_queue_depth` callers may wait behind the running execution,
//!   anyone beyond that gets [`ExecutionError::Overloaded`];
//! - a caller that stops waiting does not cancel its execution, because a
//!   motion cannot be aborted halfway.
//!
//! Callers interact by message passing only: [`ExecutionGate::submit`] hands
//! over a request and returns an [`ExecutionTicket`] that resolves to the
//! outcome.

use crate::registry::{PolicyDescriptor, RegistryHandle};
use crate::robot::{RobotController, RobotError};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn};

/// What the gate does with the connection after a failed control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Assume the link is still usable. It is only re-established once the
    /// controller itself reports being disconnected.
    #[default]
    KeepConnection,
    /// Disconnect and connect again after every failure.
    ReconnectOnFailure,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub max_queue_depth: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 8,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Why an execution did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Unknown policy '{0}'")]
    UnknownPolicy(String),
    #[error("Execution queue is full ({depth} requests already waiting)")]
    Overloaded { depth: usize },
    #[error("Policy '{policy}' failed: {message}")]
    ControlLoopFailure { policy: String, message: String },
    #[error("Robot connection failed: {0}")]
    ConnectionFailure(String),
    #[error("Execution gate is shut down")]
    GateClosed,
}

impl ExecutionError {
    /// Whether the robot can no longer be driven through this gate.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ExecutionError::ConnectionFailure(_) | ExecutionError::GateClosed
        )
    }
}

/// A resolved policy plus the caller's correlation token.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub policy: PolicyDescriptor,
    pub correlation: String,
}

/// A completed execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub policy: String,
    pub correlation: String,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn status(&self) -> String {
        format!("executed {}", self.policy)
    }
}

pub type ExecutionOutcome = Result<ExecutionReport, ExecutionError>;

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub connected: bool,
    pub active: bool,
    pub queued: usize,
    pub max_queue_depth: usize,
}

enum GateCommand {
    Execute {
        request: ExecutionRequest,
        reply: oneshot::Sender<ExecutionOutcome>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Flags mirrored out of the worker for status reporting.
#[derive(Debug, Default)]
struct GateFlags {
    connected: AtomicBool,
    active: AtomicBool,
}

/// Pending outcome of an admitted execution.
#[derive(Debug)]
pub struct ExecutionTicket {
    policy: String,
    rx: oneshot::Receiver<ExecutionOutcome>,
}

impl ExecutionTicket {
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Waits for the execution to finish. Dropping the ticket instead leaves
    /// the execution running.
    pub async fn wait(self) -> ExecutionOutcome {
        self.rx.await.unwrap_or(Err(ExecutionError::GateClosed))
    }
}

pub struct ExecutionGate {
    registry: RegistryHandle,
    tx: mpsc::Sender<GateCommand>,
    flags: Arc<GateFlags>,
    max_queue_depth: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionGate {
    /// Connects `controller` and starts the worker that owns it.
    pub fn start<C: RobotController>(
        mut controller: C,
        registry: RegistryHandle,
        config: GateConfig,
    ) -> Result<Self, ExecutionError> {
        let max_queue_depth = config.max_queue_depth.max(1);
        controller
            .connect()
            .map_err(|e| ExecutionError::ConnectionFailure(e.to_string()))?;

        let flags = Arc::new(GateFlags::default());
        flags.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(max_queue_depth);
        let connection = RobotConnection {
            controller,
            active: false,
            reconnect: config.reconnect,
            flags: flags.clone(),
        };
        let worker = std::thread::Builder::new()
            .name("robot-gate".into())
            .spawn(move || run_worker(connection, rx))
            .map_err(|e| ExecutionError::ConnectionFailure(e.to_string()))?;

        info!(max_queue_depth, reconnect = ?config.reconnect, "Execution gate started");
        Ok(Self {
            registry,
            tx,
            flags,
            max_queue_depth,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Admits an execution of `policy_name` without waiting for it.
    ///
    /// Fails immediately for unknown policies, a full queue, or a gate that
    /// has been shut down.
    pub fn submit(
        &self,
        policy_name: &str,
        correlation: impl Into<String>,
    ) -> Result<ExecutionTicket, ExecutionError> {
        let registry = self.registry.snapshot();
        let policy = registry
            .lookup(policy_name)
            .map_err(|_| ExecutionError::UnknownPolicy(policy_name.to_string()))?
            .clone();

        let (reply, rx) = oneshot::channel();
        let request = ExecutionRequest {
            policy,
            correlation: correlation.into(),
        };
        self.tx
            .try_send(GateCommand::Execute { request, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(policy = policy_name, "Execution queue full; rejecting");
                    ExecutionError::Overloaded {
                        depth: self.max_queue_depth,
                    }
                }
                mpsc::error::TrySendError::Closed(_) => ExecutionError::GateClosed,
            })?;

        debug!(policy = policy_name, "Execution admitted");
        Ok(ExecutionTicket {
            policy: policy_name.to_string(),
            rx,
        })
    }

    /// Admits an execution and waits for its outcome.
    pub async fn execute(&self, policy_name: &str, correlation: impl Into<String>) -> ExecutionOutcome {
        self.submit(policy_name, correlation)?.wait().await
    }

    pub fn status(&self) -> GateStatus {
        let queued = if self.tx.is_closed() {
            0
        } else {
            self.max_queue_depth.saturating_sub(self.tx.capacity())
        };
        GateStatus {
            connected: self.flags.connected.load(Ordering::SeqCst),
            active: self.flags.active.load(Ordering::SeqCst),
            queued,
            max_queue_depth: self.max_queue_depth,
        }
    }

    /// Stops admitting work, lets already-admitted executions finish, then
    /// disconnects the robot. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (done, done_rx) = oneshot::channel();
        if self.tx.send(GateCommand::Shutdown { done }).await.is_ok() {
            let _ = done_rx.await;
        }

        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("Execution gate worker did not exit cleanly");
            }
        }
        info!("Execution gate shut down");
    }
}

/// The robot controller plus the `active` marker. Lives on the worker thread.
struct RobotConnection<C> {
    controller: C,
    active: bool,
    reconnect: ReconnectPolicy,
    flags: Arc<GateFlags>,
}

impl<C: RobotController> RobotConnection<C> {
    fn execute(&mut self, request: &ExecutionRequest) -> ExecutionOutcome {
        let policy = &request.policy;
        let span = info_span!(
            "execution",
            policy = %policy.name,
            correlation = %request.correlation
        );
        let _entered = span.enter();

        if !self.controller.is_connected() {
            info!("Robot not connected; connecting");
            if let Err(e) = self.controller.connect() {
                self.sync_connected();
                error!(error = %e, "Robot connect failed");
                return Err(ExecutionError::ConnectionFailure(e.to_string()));
            }
            self.sync_connected();
        }

        self.set_active(true);
        let started = Instant::now();
        let model_reference = policy.model_reference.as_str();
        let duration = policy.control_duration;
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.controller.run_control_loop(model_reference, duration)
        }))
        .unwrap_or_else(|_| Err(RobotError::ControlLoop("control loop panicked".into())));
        self.set_active(false);
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                info!(?elapsed, "Policy executed");
                Ok(ExecutionReport {
                    policy: policy.name.clone(),
                    correlation: request.correlation.clone(),
                    elapsed,
                })
            }
            Err(e) => {
                warn!(error = %e, ?elapsed, "Policy execution failed");
                if self.reconnect == ReconnectPolicy::ReconnectOnFailure {
                    self.reconnect();
                }
                self.sync_connected();
                match e {
                    RobotError::Connection(message) if !self.controller.is_connected() => {
                        Err(ExecutionError::ConnectionFailure(message))
                    }
                    other => Err(ExecutionError::ControlLoopFailure {
                        policy: policy.name.clone(),
                        message: other.to_string(),
                    }),
                }
            }
        }
    }

    fn reconnect(&mut self) {
        info!("Reconnecting robot after failure");
        if let Err(e) = self.controller.disconnect() {
            warn!(error = %e, "Disconnect before reconnect failed");
        }
        if let Err(e) = self.controller.connect() {
            error!(error = %e, "Reconnect failed");
        }
    }

    fn disconnect(&mut self) {
        debug_assert!(!self.active);
        if self.controller.is_connected() {
            if let Err(e) = self.controller.disconnect() {
                warn!(error = %e, "Robot disconnect failed");
            }
        }
        self.sync_connected();
        info!("Robot disconnected");
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
        self.flags.active.store(active, Ordering::SeqCst);
    }

    fn sync_connected(&self) {
        self.flags
            .connected
            .store(self.controller.is_connected(), Ordering::SeqCst);
    }
}

fn run_worker<C: RobotController>(
    mut connection: RobotConnection<C>,
    mut rx: mpsc::Receiver<GateCommand>,
) {
    let mut waiting_for_shutdown = Vec::new();

    while let Some(command) = rx.blocking_recv() {
        match command {
            GateCommand::Execute { request, reply } => {
                let outcome = connection.execute(&request);
                if reply.send(outcome).is_err() {
                    debug!(correlation = %request.correlation, "Caller stopped waiting; outcome dropped");
                }
            }
            GateCommand::Shutdown { done } => {
                // Refuse new work; whatever is already queued still runs.
                rx.close();
                waiting_for_shutdown.push(done);
            }
        }
    }

    connection.disconnect();
    for done in waiting_for_shutdown {
        let _ = done.send(());
    }
}
