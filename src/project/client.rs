//! Thin client used by the gateway: create projects, deliver signals and read
//! the state projection.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::lifecycle::{PROJECT_ORCHESTRATION, ProjectInput};
use super::signals::ProjectSignal;
use super::state::ProjectState;
use crate::_typed_codec::{Codec, Json};
use crate::config::LifecycleConfig;
use crate::{OrchestrationStatus, Runtime, RuntimeError};

#[derive(Clone)]
pub struct ProjectClient {
    runtime: Arc<Runtime>,
    config: LifecycleConfig,
}

impl ProjectClient {
    /// `config` applies to projects started through this client.
    pub fn new(runtime: Arc<Runtime>, config: LifecycleConfig) -> Self {
        Self { runtime, config }
    }

    fn input(&self, project_id: &str) -> Result<String, RuntimeError> {
        Json::encode(&ProjectInput {
            project_id: project_id.to_string(),
            config: self.config,
        })
        .map_err(RuntimeError::Codec)
    }

    /// Start a project. Fails with `AlreadyExists` while one with the same id
    /// is still running.
    pub async fn create_project(&self, project_id: &str) -> Result<(), RuntimeError> {
        let input = self.input(project_id)?;
        self.runtime
            .start_orchestration(project_id, PROJECT_ORCHESTRATION, input)
            .await
    }

    /// Deliver a signal. An unknown id starts a new project first; a finished
    /// project keeps its final record and the signal is dropped. Cancellation
    /// never starts a project.
    pub async fn send(&self, project_id: &str, signal: ProjectSignal) -> Result<(), RuntimeError> {
        let cancels = matches!(signal, ProjectSignal::Cancel | ProjectSignal::Terminate { .. });
        match self.runtime.get_orchestration_status(project_id).await {
            OrchestrationStatus::NotFound if !cancels => {
                let input = self.input(project_id)?;
                self.runtime
                    .signal_with_start(
                        project_id,
                        PROJECT_ORCHESTRATION,
                        input,
                        signal.name(),
                        signal.payload(),
                    )
                    .await
            }
            OrchestrationStatus::Completed { .. } | OrchestrationStatus::Failed { .. } => {
                warn!(project_id, signal = signal.name(), "signal for finished project dropped");
                Ok(())
            }
            _ => {
                self.runtime
                    .raise_event(project_id, signal.name(), signal.payload())
                    .await
            }
        }
    }

    /// Operator cancellation; the project ends in `cancelled`.
    pub async fn cancel(&self, project_id: &str, reason: impl Into<String>) -> Result<(), RuntimeError> {
        self.runtime.cancel_instance(project_id, reason).await
    }

    pub async fn get_state(&self, project_id: &str) -> Result<ProjectState, RuntimeError> {
        self.runtime
            .query_status_typed::<ProjectState>(project_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(project_id.to_string()))
    }

    /// Poll the projection until `done` holds or `timeout` elapses.
    pub async fn wait_for_state(
        &self,
        project_id: &str,
        timeout: Duration,
        done: impl Fn(&ProjectState) -> bool,
    ) -> Result<ProjectState, RuntimeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.get_state(project_id).await {
                Ok(state) if done(&state) => return Ok(state),
                Ok(_) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RuntimeError::Timeout(project_id.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
