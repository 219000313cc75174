//! The five external capabilities a project calls, their contracts, and
//! their execution policies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::state::{DesignBrief, EditRequest, GeneratedOption, PhotoKind, RevisionRecord, ScanData, ShoppingList};
use crate::ActivityError;
use crate::runtime::{ActivityOptions, ActivityRegistry, ActivityRegistryBuilder, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    ValidateContent,
    GenerateOptions,
    EditImage,
    BuildShoppingList,
    PurgeProjectData,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::ValidateContent,
        ActivityKind::GenerateOptions,
        ActivityKind::EditImage,
        ActivityKind::BuildShoppingList,
        ActivityKind::PurgeProjectData,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActivityKind::ValidateContent => "validateContent",
            ActivityKind::GenerateOptions => "generateOptions",
            ActivityKind::EditImage => "editImage",
            ActivityKind::BuildShoppingList => "buildShoppingList",
            ActivityKind::PurgeProjectData => "purgeProjectData",
        }
    }

    pub fn default_options(self) -> ActivityOptions {
        let backoff = |attempts, base_ms, max_secs| {
            RetryPolicy::new(attempts, Duration::from_millis(base_ms), Duration::from_secs(max_secs))
        };
        match self {
            ActivityKind::ValidateContent => ActivityOptions::new(Duration::from_secs(30), backoff(3, 1_000, 10)),
            ActivityKind::GenerateOptions => ActivityOptions::new(Duration::from_secs(180), backoff(3, 2_000, 30)),
            ActivityKind::EditImage => ActivityOptions::new(Duration::from_secs(120), backoff(3, 2_000, 30)),
            ActivityKind::BuildShoppingList => ActivityOptions::new(Duration::from_secs(60), backoff(4, 1_000, 30)),
            // Idempotent, so it is retried hard
            ActivityKind::PurgeProjectData => ActivityOptions::new(Duration::from_secs(30), backoff(8, 500, 60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateContentInput {
    pub project_id: String,
    pub reference: String,
    pub kind: PhotoKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub passed: bool,
    #[serde(default)]
    pub failure_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptionsInput {
    pub project_id: String,
    pub room_photos: Vec<String>,
    pub inspiration_photos: Vec<String>,
    pub brief: Option<DesignBrief>,
    pub scan_data: Option<ScanData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedOptions {
    pub options: Vec<GeneratedOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditImageInput {
    pub project_id: String,
    pub base_image: String,
    pub edit: EditRequest,
    pub history: Vec<RevisionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditedImage {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildShoppingListInput {
    pub project_id: String,
    pub image: String,
    pub brief: Option<DesignBrief>,
    pub revision_history: Vec<RevisionRecord>,
    pub scan_data: Option<ScanData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeProjectDataInput {
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeAck {
    pub project_id: String,
}

/// Adapter implementations for the five capabilities. Implementations are
/// stateless from the project's point of view and classify failures through
/// `ActivityError::category`.
#[async_trait]
pub trait ProjectActivities: Send + Sync + 'static {
    async fn validate_content(&self, input: ValidateContentInput) -> Result<ValidationVerdict, ActivityError>;
    async fn generate_options(&self, input: GenerateOptionsInput) -> Result<GeneratedOptions, ActivityError>;
    async fn edit_image(&self, input: EditImageInput) -> Result<EditedImage, ActivityError>;
    async fn build_shopping_list(&self, input: BuildShoppingListInput) -> Result<ShoppingList, ActivityError>;
    /// Must succeed when the data is already gone.
    async fn purge_project_data(&self, input: PurgeProjectDataInput) -> Result<PurgeAck, ActivityError>;
}

/// Register all five adapters with their default options.
pub fn register_activities(builder: ActivityRegistryBuilder, adapters: Arc<dyn ProjectActivities>) -> ActivityRegistryBuilder {
    register_activities_with(builder, adapters, |kind| kind.default_options())
}

/// Register all five adapters, choosing options per kind.
pub fn register_activities_with(
    builder: ActivityRegistryBuilder,
    adapters: Arc<dyn ProjectActivities>,
    options: impl Fn(ActivityKind) -> ActivityOptions,
) -> ActivityRegistryBuilder {
    let a = adapters.clone();
    let builder = builder.register_typed(
        ActivityKind::ValidateContent.name(),
        options(ActivityKind::ValidateContent),
        move |input: ValidateContentInput| {
            let a = a.clone();
            async move { a.validate_content(input).await }
        },
    );
    let a = adapters.clone();
    let builder = builder.register_typed(
        ActivityKind::GenerateOptions.name(),
        options(ActivityKind::GenerateOptions),
        move |input: GenerateOptionsInput| {
            let a = a.clone();
            async move { a.generate_options(input).await }
        },
    );
    let a = adapters.clone();
    let builder = builder.register_typed(
        ActivityKind::EditImage.name(),
        options(ActivityKind::EditImage),
        move |input: EditImageInput| {
            let a = a.clone();
            async move { a.edit_image(input).await }
        },
    );
    let a = adapters.clone();
    let builder = builder.register_typed(
        ActivityKind::BuildShoppingList.name(),
        options(ActivityKind::BuildShoppingList),
        move |input: BuildShoppingListInput| {
            let a = a.clone();
            async move { a.build_shopping_list(input).await }
        },
    );
    let a = adapters;
    builder.register_typed(
        ActivityKind::PurgeProjectData.name(),
        options(ActivityKind::PurgeProjectData),
        move |input: PurgeProjectDataInput| {
            let a = a.clone();
            async move { a.purge_project_data(input).await }
        },
    )
}

/// Registry holding only the project activities.
pub fn activity_registry(adapters: Arc<dyn ProjectActivities>) -> ActivityRegistry {
    register_activities(ActivityRegistry::builder(), adapters).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_camel_case() {
        let names: std::collections::HashSet<_> = ActivityKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.chars().next().is_some_and(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn purge_is_retried_hardest() {
        let purge = ActivityKind::PurgeProjectData.default_options().retry.max_attempts;
        for kind in ActivityKind::ALL {
            assert!(kind.default_options().retry.max_attempts <= purge);
        }
    }
}
