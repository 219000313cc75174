#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use roomflow::ActivityError;
use roomflow::config::{LifecycleConfig, RuntimeConfig};
use roomflow::project::activities::{
    ActivityKind, BuildShoppingListInput, EditImageInput, EditedImage, GenerateOptionsInput, GeneratedOptions,
    ProjectActivities, PurgeAck, PurgeProjectDataInput, ValidateContentInput, ValidationVerdict,
    register_activities_with,
};
use roomflow::project::state::{GeneratedOption, Phase, ProductMatch, ProjectState, ShoppingList};
use roomflow::project::{ProjectClient, orchestration_registry};
use roomflow::providers::HistoryStore;
use roomflow::providers::in_memory::InMemoryHistoryStore;
use roomflow::runtime::{ActivityOptions, ActivityRegistry, RetryPolicy};
use roomflow::{Event, Runtime};

pub const WAIT: Duration = Duration::from_secs(10);

/// Adapters with deterministic outputs, per-activity call counters and
/// scripted failures.
#[derive(Default)]
pub struct ScriptedActivities {
    calls: Mutex<HashMap<&'static str, u32>>,
    queued_failures: Mutex<HashMap<&'static str, VecDeque<ActivityError>>>,
    permanent_failures: Mutex<HashMap<&'static str, ActivityError>>,
    option_count: Mutex<Option<usize>>,
}

impl ScriptedActivities {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, kind: ActivityKind) -> u32 {
        self.calls.lock().unwrap().get(kind.name()).copied().unwrap_or(0)
    }

    /// Fail the next `times` attempts of `kind` with `err`.
    pub fn fail_next(&self, kind: ActivityKind, times: usize, err: ActivityError) {
        let mut q = self.queued_failures.lock().unwrap();
        let entry = q.entry(kind.name()).or_default();
        for _ in 0..times {
            entry.push_back(err.clone());
        }
    }

    pub fn fail_always(&self, kind: ActivityKind, err: ActivityError) {
        self.permanent_failures.lock().unwrap().insert(kind.name(), err);
    }

    /// Make generation return this many options instead of two.
    pub fn set_option_count(&self, count: usize) {
        *self.option_count.lock().unwrap() = Some(count);
    }

    fn attempt(&self, kind: ActivityKind) -> Result<u32, ActivityError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(kind.name()).or_default();
            *n += 1;
            *n
        };
        if let Some(err) = self.permanent_failures.lock().unwrap().get(kind.name()) {
            return Err(err.clone());
        }
        if let Some(err) = self
            .queued_failures
            .lock()
            .unwrap()
            .get_mut(kind.name())
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(n)
    }
}

#[async_trait]
impl ProjectActivities for ScriptedActivities {
    async fn validate_content(&self, input: ValidateContentInput) -> Result<ValidationVerdict, ActivityError> {
        self.attempt(ActivityKind::ValidateContent)?;
        if input.reference.contains("blurry") {
            return Ok(ValidationVerdict {
                passed: false,
                failure_codes: vec!["BLURRY".into()],
            });
        }
        Ok(ValidationVerdict {
            passed: true,
            failure_codes: Vec::new(),
        })
    }

    async fn generate_options(&self, input: GenerateOptionsInput) -> Result<GeneratedOptions, ActivityError> {
        let n = self.attempt(ActivityKind::GenerateOptions)?;
        let count = self.option_count.lock().unwrap().unwrap_or(2);
        let options = (0..count)
            .map(|i| GeneratedOption {
                image: format!("blob://{}/gen{n}-opt{i}", input.project_id),
                description: format!("option {i} from {} room photo(s)", input.room_photos.len()),
            })
            .collect();
        Ok(GeneratedOptions { options })
    }

    async fn edit_image(&self, input: EditImageInput) -> Result<EditedImage, ActivityError> {
        self.attempt(ActivityKind::EditImage)?;
        Ok(EditedImage {
            image: format!("{}/rev{}", input.base_image, input.history.len() + 1),
        })
    }

    async fn build_shopping_list(&self, input: BuildShoppingListInput) -> Result<ShoppingList, ActivityError> {
        self.attempt(ActivityKind::BuildShoppingList)?;
        Ok(ShoppingList {
            items: vec![ProductMatch {
                name: "Oak side table".into(),
                url: format!("https://shop.example/{}", input.project_id),
                price_cents: Some(12_900),
                retailer: Some("Example Home".into()),
            }],
        })
    }

    async fn purge_project_data(&self, input: PurgeProjectDataInput) -> Result<PurgeAck, ActivityError> {
        self.attempt(ActivityKind::PurgeProjectData)?;
        Ok(PurgeAck {
            project_id: input.project_id,
        })
    }
}

/// Default attempt counts with millisecond backoff.
pub fn fast_options(kind: ActivityKind) -> ActivityOptions {
    let attempts = kind.default_options().retry.max_attempts;
    ActivityOptions::new(
        Duration::from_secs(5),
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(4)),
    )
}

pub fn quick_config() -> LifecycleConfig {
    LifecycleConfig::default().with_grace_period(Duration::from_millis(100))
}

pub struct Harness {
    pub rt: Arc<Runtime>,
    pub client: ProjectClient,
    pub acts: Arc<ScriptedActivities>,
}

pub async fn start(config: LifecycleConfig) -> Harness {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    start_with(store, ScriptedActivities::new(), config).await
}

pub async fn start_with(
    store: Arc<dyn HistoryStore>,
    acts: Arc<ScriptedActivities>,
    config: LifecycleConfig,
) -> Harness {
    let adapters: Arc<dyn ProjectActivities> = acts.clone();
    let registry = register_activities_with(ActivityRegistry::builder(), adapters, fast_options).build();
    let rt = Runtime::start_with_config(store, Arc::new(registry), orchestration_registry(), RuntimeConfig::default()).await;
    let client = ProjectClient::new(rt.clone(), config);
    Harness { rt, client, acts }
}

pub async fn wait_for_phase(client: &ProjectClient, project: &str, phase: Phase) -> ProjectState {
    client
        .wait_for_state(project, WAIT, |s| s.phase == phase)
        .await
        .unwrap_or_else(|e| panic!("project {project} never reached {phase}: {e}"))
}

pub async fn wait_until(client: &ProjectClient, project: &str, done: impl Fn(&ProjectState) -> bool) -> ProjectState {
    client
        .wait_for_state(project, WAIT, done)
        .await
        .unwrap_or_else(|e| panic!("project {project} never reached the expected state: {e}"))
}

/// Poll the store until `done` holds for the instance history.
pub async fn wait_for_history(store: &Arc<dyn HistoryStore>, instance: &str, done: impl Fn(&[Event]) -> bool) -> Vec<Event> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let history = store.read(instance).await;
        if done(&history) {
            return history;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("history for {instance} never matched: {history:#?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
