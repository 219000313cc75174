//! The project aggregate and its named transitions.
//!
//! `ProjectState` is owned by exactly one lifecycle instance and serialized
//! whole as the query projection. Every mutation goes through a method here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Photos,
    Scan,
    Intake,
    Generating,
    Selecting,
    Iterating,
    Approving,
    Shopping,
    Completed,
    Abandoned,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Abandoned | Phase::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Photos => "photos",
            Phase::Scan => "scan",
            Phase::Intake => "intake",
            Phase::Generating => "generating",
            Phase::Selecting => "selecting",
            Phase::Iterating => "iterating",
            Phase::Approving => "approving",
            Phase::Shopping => "shopping",
            Phase::Completed => "completed",
            Phase::Abandoned => "abandoned",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PhotoKind {
    Room,
    Inspiration,
}

/// Outcome of content validation for one photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PhotoValidation {
    Passed,
    #[serde(rename_all = "camelCase")]
    Rejected { failure_codes: Vec<String> },
    /// Validation could not complete; a `retry` in the photos phase re-runs it.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub reference: String,
    pub kind: PhotoKind,
    pub validation: PhotoValidation,
}

/// Spatial summary from the optional room scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanData {
    pub width_m: f64,
    pub length_m: f64,
    pub height_m: f64,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Structured style description produced by the intake conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesignBrief {
    pub room_type: Option<String>,
    pub styles: Vec<String>,
    pub colors: Vec<String>,
    pub keep: Vec<String>,
    pub budget: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedOption {
    pub image: String,
    pub description: String,
}

/// A marked region of the current image with an instruction for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub instruction: String,
}

/// What the user asked to change in one refinement round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditRequest {
    Annotation { annotations: Vec<Annotation> },
    Feedback { text: String },
}

impl EditRequest {
    /// Edits with nothing to apply never reach the edit activity.
    pub fn is_well_formed(&self) -> bool {
        match self {
            EditRequest::Annotation { annotations } => {
                !annotations.is_empty() && annotations.iter().all(|a| !a.instruction.trim().is_empty())
            }
            EditRequest::Feedback { text } => !text.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    /// 1-based position within the current cycle.
    pub revision: u32,
    pub base_image: String,
    pub result_image: String,
    pub edit: EditRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMatch {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retailer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingList {
    pub items: Vec<ProductMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectError {
    pub message: String,
    pub retryable: bool,
}

/// The user-requested action currently being worked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingAction {
    Edit { request: EditRequest },
    Regenerate,
    Approve,
    Cancel,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("option {index} does not exist; choose an index from 0 to {}", .available.saturating_sub(1))]
    OutOfRange { index: i64, available: usize },
    #[error("no generated options to select from")]
    NoOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub project_id: String,
    pub phase: Phase,
    pub photos: Vec<Photo>,
    pub photos_confirmed: bool,
    pub scan_data: Option<ScanData>,
    pub design_brief: Option<DesignBrief>,
    pub generated_options: Vec<GeneratedOption>,
    pub selected_option: Option<usize>,
    pub current_image: Option<String>,
    pub revision_history: Vec<RevisionRecord>,
    pub iteration_count: u32,
    pub shopping_list: Option<ShoppingList>,
    pub error: Option<ProjectError>,
    pub pending_action: Option<PendingAction>,
    /// Design cycle number; incremented by every start-over.
    pub cycle: u32,
    pub data_purged: bool,
}

impl ProjectState {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            phase: Phase::Photos,
            photos: Vec::new(),
            photos_confirmed: false,
            scan_data: None,
            design_brief: None,
            generated_options: Vec::new(),
            selected_option: None,
            current_image: None,
            revision_history: Vec::new(),
            iteration_count: 0,
            shopping_list: None,
            error: None,
            pending_action: None,
            cycle: 1,
            data_purged: false,
        }
    }

    pub fn add_photo(&mut self, reference: String, kind: PhotoKind, validation: PhotoValidation) {
        self.photos.push(Photo {
            reference,
            kind,
            validation,
        });
    }

    pub fn set_photo_validation(&mut self, index: usize, validation: PhotoValidation) {
        if let Some(photo) = self.photos.get_mut(index) {
            photo.validation = validation;
        }
    }

    /// Room photos that passed validation.
    pub fn room_photo_count(&self) -> usize {
        self.photos
            .iter()
            .filter(|p| p.kind == PhotoKind::Room && p.validation == PhotoValidation::Passed)
            .count()
    }

    pub fn unverified_photos(&self) -> Vec<usize> {
        self.photos
            .iter()
            .enumerate()
            .filter(|(_, p)| p.validation == PhotoValidation::Unverified)
            .map(|(i, _)| i)
            .collect()
    }

    /// Guard for leaving the photos phase.
    pub fn photos_ready(&self) -> bool {
        self.photos_confirmed && self.room_photo_count() >= 2
    }

    pub fn confirm_photos(&mut self) {
        self.photos_confirmed = true;
    }

    pub fn record_scan(&mut self, data: Option<ScanData>) {
        if data.is_some() {
            self.scan_data = data;
        }
        self.phase = Phase::Intake;
    }

    pub fn record_brief(&mut self, brief: Option<DesignBrief>) {
        self.design_brief = brief;
        self.phase = Phase::Generating;
    }

    pub fn set_error(&mut self, message: impl Into<String>, retryable: bool) {
        self.error = Some(ProjectError {
            message: message.into(),
            retryable,
        });
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn can_retry(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }

    pub fn apply_options(&mut self, options: Vec<GeneratedOption>) {
        self.generated_options = options;
        self.selected_option = None;
        self.error = None;
        self.pending_action = None;
        self.phase = Phase::Selecting;
    }

    /// Bounds-check and apply a selection. The selected image becomes the
    /// base of the first revision.
    pub fn select_option(&mut self, index: i64) -> Result<(), SelectionError> {
        if self.generated_options.is_empty() {
            return Err(SelectionError::NoOptions);
        }
        let available = self.generated_options.len();
        let idx = usize::try_from(index)
            .ok()
            .filter(|i| *i < available)
            .ok_or(SelectionError::OutOfRange { index, available })?;
        self.selected_option = Some(idx);
        self.current_image = Some(self.generated_options[idx].image.clone());
        self.error = None;
        self.phase = Phase::Iterating;
        Ok(())
    }

    /// Record a completed edit. The new record chains from the current image.
    pub fn apply_revision(&mut self, edit: EditRequest, result_image: String) {
        let base_image = self
            .current_image
            .clone()
            .expect("current image is set before any revision");
        self.iteration_count += 1;
        self.revision_history.push(RevisionRecord {
            revision: self.iteration_count,
            base_image,
            result_image: result_image.clone(),
            edit,
        });
        self.current_image = Some(result_image);
        self.pending_action = None;
        self.error = None;
    }

    pub fn iterations_exhausted(&self, max_iterations: u32) -> bool {
        self.iteration_count >= max_iterations
    }

    pub fn complete_shopping(&mut self, list: ShoppingList) {
        self.shopping_list = Some(list);
        self.error = None;
        self.pending_action = None;
        self.phase = Phase::Shopping;
    }

    /// Reset everything derived from the brief and jump back to intake.
    /// Photos and scan data are kept.
    pub fn start_over(&mut self) {
        self.design_brief = None;
        self.generated_options.clear();
        self.selected_option = None;
        self.current_image = None;
        self.revision_history.clear();
        self.iteration_count = 0;
        self.shopping_list = None;
        self.error = None;
        self.pending_action = None;
        self.cycle += 1;
        self.phase = Phase::Intake;
    }

    /// Every record's base is the previous record's result, and the first
    /// record's base is the selected option's image.
    pub fn revision_chain_is_valid(&self) -> bool {
        let Some(first) = self.revision_history.first() else {
            return true;
        };
        let selected = self
            .selected_option
            .and_then(|i| self.generated_options.get(i))
            .map(|o| o.image.as_str());
        if selected != Some(first.base_image.as_str()) {
            return false;
        }
        self.revision_history
            .windows(2)
            .all(|w| w[1].base_image == w[0].result_image)
    }
}
