//! Room-redesign projects: state, signal contract, activity contracts and the
//! lifecycle orchestration that ties them together.

use std::sync::Arc;

pub mod activities;
pub mod client;
pub mod lifecycle;
pub mod signals;
pub mod state;

pub use activities::{ActivityKind, ProjectActivities, activity_registry, register_activities};
pub use client::ProjectClient;
pub use lifecycle::{PROJECT_ORCHESTRATION, ProjectInput, project_lifecycle};
pub use signals::{ProjectSignal, SignalError};
pub use state::{Phase, ProjectState};

use crate::config::RuntimeConfig;
use crate::providers::HistoryStore;
use crate::runtime::OrchestrationRegistry;
use crate::Runtime;

/// Registry with the project lifecycle registered under `PROJECT_ORCHESTRATION`.
pub fn orchestration_registry() -> OrchestrationRegistry {
    OrchestrationRegistry::builder()
        .register_typed(PROJECT_ORCHESTRATION, project_lifecycle)
        .build()
}

/// Start a runtime hosting projects backed by `adapters`.
pub async fn start_runtime(
    store: Arc<dyn HistoryStore>,
    adapters: Arc<dyn ProjectActivities>,
    config: RuntimeConfig,
) -> Arc<Runtime> {
    Runtime::start_with_config(store, Arc::new(activity_registry(adapters)), orchestration_registry(), config).await
}
