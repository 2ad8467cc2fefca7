//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared
//! resources every handler needs: the policy registry, the intent resolver
//! and the execution gate.

use llami_core::{gate::ExecutionGate, intent::IntentResolver, registry::RegistryHandle};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
///
/// The robot connection itself is not reachable from here; handlers can only
/// submit work to the gate that owns it.
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub resolver: Arc<IntentResolver>,
    pub gate: Arc<ExecutionGate>,
}
