//! Shared fixtures for the dispatch integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use llami_core::{
    completion::{CompletionClient, CompletionError},
    gate::{ExecutionGate, GateConfig, ReconnectPolicy},
    intent::IntentResolver,
    registry::{PolicyDescriptor, PolicyRegistry, RegistryHandle},
    robot::{RobotController, RobotError},
};
use llami_dispatch::{router::create_router, state::AppState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;

pub const KITCHEN: [&str; 4] = ["grab_cup", "grab_pills", "grab_pen", "grab_banana"];

/// Completion service stand-in with a fixed answer.
pub enum CannedCompletion {
    Text(&'static str),
    Unreachable,
    Malformed,
    /// Answers with the text and keeps every prompt it was sent.
    Recording(&'static str, Arc<Mutex<Vec<String>>>),
}

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        match self {
            CannedCompletion::Recording(text, prompts) => {
                prompts.lock().unwrap().push(prompt.to_string());
                Ok(text.to_string())
            }
            CannedCompletion::Text(text) => Ok(text.to_string()),
            CannedCompletion::Unreachable => {
                Err(CompletionError::Transport("connection refused".into()))
            }
            CannedCompletion::Malformed => {
                Err(CompletionError::Malformed("missing field `content`".into()))
            }
        }
    }
}

#[derive(Default)]
pub struct ArmProbe {
    in_section: AtomicBool,
    pub overlaps: AtomicUsize,
    runs: Mutex<Vec<String>>,
}

impl ArmProbe {
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

/// Controller that records runs and counts overlapping control loops.
pub struct RecordingArm {
    pub probe: Arc<ArmProbe>,
    connected: bool,
    pub run_time: Duration,
    pub fail_on: Option<&'static str>,
    pub drop_link_on_failure: bool,
    /// When set, each run blocks until a release is sent or the sender drops.
    pub hold: Option<std_mpsc::Receiver<()>>,
}

impl RecordingArm {
    pub fn new(probe: Arc<ArmProbe>) -> Self {
        Self {
            probe,
            connected: false,
            run_time: Duration::from_millis(5),
            fail_on: None,
            drop_link_on_failure: false,
            hold: None,
        }
    }

    /// An arm whose runs stay in progress until released.
    pub fn held(probe: Arc<ArmProbe>) -> (Self, std_mpsc::Sender<()>) {
        let (release, hold) = std_mpsc::channel();
        let mut arm = Self::new(probe);
        arm.hold = Some(hold);
        (arm, release)
    }
}

impl RobotController for RecordingArm {
    fn connect(&mut self) -> Result<(), RobotError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RobotError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn run_control_loop(
        &mut self,
        model_reference: &str,
        _duration: Duration,
    ) -> Result<(), RobotError> {
        if self.probe.in_section.swap(true, Ordering::SeqCst) {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(self.run_time);
        self.probe.runs.lock().unwrap().push(model_reference.to_string());
        if let Some(hold) = &self.hold {
            let _ = hold.recv();
        }
        self.probe.in_section.store(false, Ordering::SeqCst);

        if self.fail_on == Some(model_reference) {
            if self.drop_link_on_failure {
                self.connected = false;
                return Err(RobotError::Connection("serial port vanished".into()));
            }
            return Err(RobotError::ControlLoop("gripper stalled".into()));
        }
        Ok(())
    }
}

pub fn kitchen_registry() -> RegistryHandle {
    let policies = KITCHEN
        .iter()
        .map(|name| {
            PolicyDescriptor::new(
                *name,
                format!("Can {}", name.replace('_', " ")),
                format!("lab/{}", name),
                Duration::from_secs(30),
            )
            .unwrap()
        })
        .collect();
    RegistryHandle::fixed(PolicyRegistry::from_descriptors(policies).unwrap())
}

pub fn app_state(
    registry: RegistryHandle,
    completion: CannedCompletion,
    arm: RecordingArm,
    max_queue_depth: usize,
) -> Arc<AppState> {
    let gate = ExecutionGate::start(
        arm,
        registry.clone(),
        GateConfig {
            max_queue_depth,
            reconnect: ReconnectPolicy::KeepConnection,
        },
    )
    .unwrap();
    Arc::new(AppState {
        registry,
        resolver: Arc::new(IntentResolver::with_keywords(Arc::new(completion))),
        gate: Arc::new(gate),
    })
}

/// Polls until the gate reports a run in progress.
pub async fn wait_until_active(gate: &ExecutionGate) {
    for _ in 0..500 {
        if gate.status().active {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("gate never became active");
}

pub fn router(state: Arc<AppState>) -> axum::Router {
    create_router(state)
}

/// Serves the router on an ephemeral port and returns its address.
pub async fn serve(state: Arc<AppState>) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
