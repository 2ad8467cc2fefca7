//! Main Entrypoint for the Llami Dispatch Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the policy registry (refusing to start without policies).
//! 3. Connecting the robot and starting the execution gate.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Serving until Ctrl+C, then draining the gate and disconnecting the robot.

use anyhow::Context;
use llami_core::{
    completion::LlamaCppClient,
    gate::{ExecutionGate, GateConfig},
    intent::IntentResolver,
    registry::RegistryHandle,
    robot::{ProcessController, SimulatedArm},
};
use llami_dispatch::{
    config::{Config, RobotBackend},
    router::create_router,
    state::AppState,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn start_gate(config: &Config, registry: RegistryHandle) -> anyhow::Result<ExecutionGate> {
    let gate_config = GateConfig {
        max_queue_depth: config.gate_queue_depth,
        reconnect: config.reconnect,
    };
    let gate = match &config.robot_backend {
        RobotBackend::Simulated { time_scale } => {
            info!(time_scale, "Using simulated arm.");
            ExecutionGate::start(SimulatedArm::new(*time_scale), registry, gate_config)
        }
        RobotBackend::Process { command, grace } => {
            info!(%command, ?grace, "Using external control program.");
            let controller = ProcessController::from_command_line(command)
                .context("ROBOT_COMMAND is empty")?
                .with_grace(*grace);
            ExecutionGate::start(controller, registry, gate_config)
        }
    };
    gate.context("Failed to connect the robot")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Policies ---
    let registry = RegistryHandle::load(&config.policies_path).with_context(|| {
        format!(
            "Failed to load policies from {}",
            config.policies_path.display()
        )
    })?;

    // --- 4. Initialize Shared Services ---
    let gate = Arc::new(start_gate(&config, registry.clone())?);
    let completion = LlamaCppClient::new(
        &config.completion_url,
        config.completion_n_predict,
        config.completion_timeout,
    )
    .context("Failed to build completion client")?;
    info!(endpoint = completion.endpoint(), "Completion client ready.");
    let resolver = Arc::new(IntentResolver::with_keywords(Arc::new(completion)));

    let app_state = Arc::new(AppState {
        registry,
        resolver,
        gate: gate.clone(),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // --- 6. Start Server ---
    info!(
        bind_address = %config.bind_address,
        queue_depth = config.gate_queue_depth,
        reconnect = ?config.reconnect,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // --- 7. Release the Robot ---
    gate.shutdown().await;
    info!("Server has shut down.");
    Ok(())
}
