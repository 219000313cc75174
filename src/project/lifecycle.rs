//! The project lifecycle orchestration.
//!
//! Each phase is a method that waits on signals and calls activities until
//! it moves the state to another phase or stops. Every wait races the next
//! signal against an inactivity timer, and cancellation is recognized inside
//! every wait, error-recovery waits included.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::activities::{
    ActivityKind, BuildShoppingListInput, EditImageInput, EditedImage, GenerateOptionsInput, GeneratedOptions,
    PurgeAck, PurgeProjectDataInput, ValidateContentInput, ValidationVerdict,
};
use super::signals::ProjectSignal;
use super::state::{EditRequest, PendingAction, Phase, PhotoKind, PhotoValidation, ProjectState, ShoppingList};
use crate::config::LifecycleConfig;
use crate::{ActivityError, DurableOutput, ErrorCategory, OrchestrationContext};

/// Registered orchestration name.
pub const PROJECT_ORCHESTRATION: &str = "ProjectLifecycle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub project_id: String,
    #[serde(default)]
    pub config: LifecycleConfig,
}

/// Why the phase loop ended.
#[derive(Debug)]
enum Stop {
    Inactive,
    Cancelled,
    Terminated(String),
    GraceExpired,
}

enum Recovery {
    Retry,
    StartOver,
}

enum EditOutcome {
    Applied,
    Discarded,
    Restarted,
}

/// Orchestration entry point. Returns the final state.
pub async fn project_lifecycle(ctx: OrchestrationContext, input: ProjectInput) -> Result<ProjectState, String> {
    Lifecycle::new(ctx, input).run().await
}

struct Lifecycle {
    ctx: OrchestrationContext,
    config: LifecycleConfig,
    state: ProjectState,
    approved: bool,
}

impl Lifecycle {
    fn new(ctx: OrchestrationContext, input: ProjectInput) -> Self {
        Self {
            ctx,
            config: input.config,
            state: ProjectState::new(input.project_id),
            approved: false,
        }
    }

    fn publish(&self) {
        self.ctx.set_custom_status_typed(&self.state);
    }

    async fn run(mut self) -> Result<ProjectState, String> {
        self.ctx.trace_info(format!("project {} created", self.state.project_id));
        self.publish();
        let stop = loop {
            let phase = self.state.phase;
            let step = match phase {
                Phase::Photos => self.photos().await,
                Phase::Scan => self.scan().await,
                Phase::Intake => self.intake().await,
                Phase::Generating => self.generate().await,
                Phase::Selecting => self.select().await,
                Phase::Iterating => self.iterate().await,
                Phase::Approving => self.approve().await,
                Phase::Shopping => {
                    self.state.phase = Phase::Completed;
                    Ok(())
                }
                Phase::Completed => Err(self.grace_period().await),
                Phase::Abandoned | Phase::Cancelled => unreachable!("phase loop entered terminal phase {phase}"),
            };
            if let Err(stop) = step {
                break stop;
            }
            if self.state.phase != phase {
                self.ctx.trace_info(format!("phase {phase} -> {}", self.state.phase));
            }
            self.publish();
        };
        self.finish(stop).await;
        Ok(self.state)
    }

    // ---------------- waiting

    /// Next actionable signal. Photos are recorded here in every phase and
    /// only surface to the caller in the photos phase. Cancellation and
    /// inactivity end the wait with a `Stop`.
    async fn wait_signal(&mut self) -> Result<ProjectSignal, Stop> {
        loop {
            let signal = self.ctx.next_signal();
            let inactivity = self.ctx.schedule_timer(self.config.inactivity_timeout_ms);
            let (_, output) = self.ctx.select2(signal, inactivity).await;
            let DurableOutput::Signal { name, data } = output else {
                return Err(Stop::Inactive);
            };
            self.ctx.trace_debug(format!("signal {name} in phase {}", self.state.phase));
            match ProjectSignal::parse(&name, &data) {
                Ok(ProjectSignal::Cancel) => return Err(Stop::Cancelled),
                Ok(ProjectSignal::Terminate { reason }) => return Err(Stop::Terminated(reason)),
                Ok(ProjectSignal::PhotoAdded { reference, kind }) => {
                    self.add_photo(reference.clone(), kind).await;
                    self.publish();
                    if self.state.phase == Phase::Photos {
                        return Ok(ProjectSignal::PhotoAdded { reference, kind });
                    }
                }
                Ok(signal) => return Ok(signal),
                Err(e) => self.ctx.trace_warn(format!("ignoring signal: {e}")),
            }
        }
    }

    /// Wait after an error until the user retries or starts over.
    async fn await_recovery(&mut self) -> Result<Recovery, Stop> {
        loop {
            match self.wait_signal().await? {
                ProjectSignal::Retry if self.state.can_retry() => {
                    self.state.clear_error();
                    return Ok(Recovery::Retry);
                }
                ProjectSignal::Retry => self
                    .ctx
                    .trace_warn("retry ignored: the last error is not retryable; start over instead"),
                ProjectSignal::StartOver => return Ok(Recovery::StartOver),
                other => self
                    .ctx
                    .trace_warn(format!("{} ignored while an error is pending", other.name())),
            }
        }
    }

    fn ignore(&self, signal: &ProjectSignal) {
        self.ctx
            .trace_warn(format!("{} ignored in phase {}", signal.name(), self.state.phase));
    }

    fn restart(&mut self) {
        self.state.start_over();
        self.approved = false;
        self.ctx
            .trace_info(format!("starting over; design cycle {}", self.state.cycle));
    }

    // ---------------- activities

    async fn call<I: Serialize, O: DeserializeOwned>(&self, kind: ActivityKind, input: &I) -> Result<O, ActivityError> {
        self.ctx
            .schedule_activity_typed(kind.name(), input)
            .into_activity_typed::<O>()
            .await
    }

    fn fail(&mut self, kind: ActivityKind, err: &ActivityError) {
        let retryable = err.is_retryable();
        self.ctx.trace_warn(format!(
            "{} failed after {} attempt(s): {err}",
            kind.name(),
            err.attempts
        ));
        self.state.set_error(format!("{} failed: {}", kind.name(), err.message), retryable);
        if !retryable {
            self.state.pending_action = None;
        }
    }

    async fn validate(&self, reference: String, kind: PhotoKind) -> PhotoValidation {
        let input = ValidateContentInput {
            project_id: self.state.project_id.clone(),
            reference,
            kind,
        };
        match self
            .call::<_, ValidationVerdict>(ActivityKind::ValidateContent, &input)
            .await
        {
            Ok(verdict) if verdict.passed => PhotoValidation::Passed,
            Ok(verdict) => PhotoValidation::Rejected {
                failure_codes: verdict.failure_codes,
            },
            Err(e) if e.is_retryable() => PhotoValidation::Unverified,
            Err(e) => PhotoValidation::Rejected {
                failure_codes: vec![e.code],
            },
        }
    }

    async fn add_photo(&mut self, reference: String, kind: PhotoKind) {
        let validation = self.validate(reference.clone(), kind).await;
        if validation != PhotoValidation::Passed {
            self.ctx
                .trace_warn(format!("photo {reference} did not pass validation: {validation:?}"));
        }
        self.state.add_photo(reference, kind, validation);
    }

    async fn revalidate_photos(&mut self) {
        let pending = self.state.unverified_photos();
        if pending.is_empty() {
            self.ctx.trace_warn("retry ignored: no photos awaiting validation");
            return;
        }
        for idx in pending {
            let photo = &self.state.photos[idx];
            let validation = self.validate(photo.reference.clone(), photo.kind).await;
            self.state.set_photo_validation(idx, validation);
        }
    }

    // ---------------- phases

    async fn photos(&mut self) -> Result<(), Stop> {
        while !self.state.photos_ready() {
            match self.wait_signal().await? {
                ProjectSignal::PhotosConfirmed => {
                    self.state.confirm_photos();
                    if !self.state.photos_ready() {
                        self.ctx.trace_info(format!(
                            "photos confirmed with {} validated room photo(s); waiting for two",
                            self.state.room_photo_count()
                        ));
                    }
                }
                ProjectSignal::Retry => self.revalidate_photos().await,
                // Already recorded
                ProjectSignal::PhotoAdded { .. } => {}
                other => self.ignore(&other),
            }
            self.publish();
        }
        self.state.phase = Phase::Scan;
        Ok(())
    }

    async fn scan(&mut self) -> Result<(), Stop> {
        loop {
            match self.wait_signal().await? {
                ProjectSignal::ScanCompleted(data) => {
                    self.state.record_scan(Some(data));
                    return Ok(());
                }
                ProjectSignal::ScanSkipped => {
                    self.state.record_scan(None);
                    return Ok(());
                }
                other => self.ignore(&other),
            }
        }
    }

    async fn intake(&mut self) -> Result<(), Stop> {
        loop {
            match self.wait_signal().await? {
                ProjectSignal::IntakeCompleted(brief) => {
                    self.state.record_brief(Some(brief));
                    return Ok(());
                }
                ProjectSignal::IntakeSkipped => {
                    self.state.record_brief(None);
                    return Ok(());
                }
                other => self.ignore(&other),
            }
        }
    }

    async fn generate(&mut self) -> Result<(), Stop> {
        loop {
            self.state.pending_action = Some(PendingAction::Regenerate);
            self.publish();
            let (room_photos, inspiration_photos) = self.state.photos.iter().fold(
                (Vec::new(), Vec::new()),
                |(mut room, mut inspo), p| {
                    if p.validation == PhotoValidation::Passed {
                        match p.kind {
                            PhotoKind::Room => room.push(p.reference.clone()),
                            PhotoKind::Inspiration => inspo.push(p.reference.clone()),
                        }
                    }
                    (room, inspo)
                },
            );
            let input = GenerateOptionsInput {
                project_id: self.state.project_id.clone(),
                room_photos,
                inspiration_photos,
                brief: self.state.design_brief.clone(),
                scan_data: self.state.scan_data.clone(),
            };
            match self
                .call::<_, GeneratedOptions>(ActivityKind::GenerateOptions, &input)
                .await
            {
                Ok(out) if out.options.len() == 2 => {
                    self.state.apply_options(out.options);
                    return Ok(());
                }
                Ok(out) => {
                    self.ctx.trace_warn(format!(
                        "generation returned {} options instead of 2",
                        out.options.len()
                    ));
                    self.state.set_error(
                        format!("generation returned {} options instead of 2", out.options.len()),
                        true,
                    );
                }
                Err(e) => self.fail(ActivityKind::GenerateOptions, &e),
            }
            self.publish();
            match self.await_recovery().await? {
                Recovery::Retry => continue,
                Recovery::StartOver => {
                    self.restart();
                    return Ok(());
                }
            }
        }
    }

    async fn select(&mut self) -> Result<(), Stop> {
        loop {
            match self.wait_signal().await? {
                ProjectSignal::OptionSelected { index } => match self.state.select_option(index) {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        self.ctx.trace_warn(format!("rejected selection {index}: {e}"));
                        self.state.set_error(format!("invalid selection: {e}"), true);
                    }
                },
                ProjectSignal::StartOver => {
                    self.restart();
                    return Ok(());
                }
                ProjectSignal::Retry if self.state.can_retry() => self.state.clear_error(),
                other => self.ignore(&other),
            }
            self.publish();
        }
    }

    async fn iterate(&mut self) -> Result<(), Stop> {
        while !self.state.iterations_exhausted(self.config.max_iterations) {
            let request = match self.wait_signal().await? {
                ProjectSignal::AnnotationEdit { annotations } => EditRequest::Annotation { annotations },
                ProjectSignal::TextFeedback { text } => EditRequest::Feedback { text },
                ProjectSignal::Approve => {
                    self.approved = true;
                    self.state.phase = Phase::Approving;
                    return Ok(());
                }
                ProjectSignal::StartOver => {
                    self.restart();
                    return Ok(());
                }
                other => {
                    self.ignore(&other);
                    continue;
                }
            };
            match self.edit(request).await? {
                EditOutcome::Restarted => return Ok(()),
                EditOutcome::Applied | EditOutcome::Discarded => self.publish(),
            }
        }
        self.ctx.trace_info(format!(
            "iteration cap of {} reached; waiting for approval",
            self.config.max_iterations
        ));
        self.state.phase = Phase::Approving;
        Ok(())
    }

    async fn edit(&mut self, request: EditRequest) -> Result<EditOutcome, Stop> {
        if !request.is_well_formed() {
            self.ctx.trace_warn("discarding edit with nothing to apply");
            return Ok(EditOutcome::Discarded);
        }
        self.state.pending_action = Some(PendingAction::Edit {
            request: request.clone(),
        });
        loop {
            self.publish();
            let input = EditImageInput {
                project_id: self.state.project_id.clone(),
                base_image: self
                    .state
                    .current_image
                    .clone()
                    .expect("current image is set while iterating"),
                edit: request.clone(),
                history: self.state.revision_history.clone(),
            };
            match self.call::<_, EditedImage>(ActivityKind::EditImage, &input).await {
                Ok(out) => {
                    self.state.apply_revision(request, out.image);
                    self.ctx.trace_info(format!(
                        "revision {} of {} applied",
                        self.state.iteration_count, self.config.max_iterations
                    ));
                    return Ok(EditOutcome::Applied);
                }
                Err(e) if e.category == ErrorCategory::InvalidInput => {
                    self.ctx
                        .trace_warn(format!("edit rejected as malformed, iteration not consumed: {e}"));
                    self.state.pending_action = None;
                    return Ok(EditOutcome::Discarded);
                }
                Err(e) => self.fail(ActivityKind::EditImage, &e),
            }
            self.publish();
            match self.await_recovery().await? {
                Recovery::Retry => continue,
                Recovery::StartOver => {
                    self.restart();
                    return Ok(EditOutcome::Restarted);
                }
            }
        }
    }

    async fn approve(&mut self) -> Result<(), Stop> {
        while !self.approved {
            match self.wait_signal().await? {
                ProjectSignal::Approve => self.approved = true,
                ProjectSignal::StartOver => {
                    self.restart();
                    return Ok(());
                }
                other => self.ignore(&other),
            }
        }
        loop {
            self.state.pending_action = Some(PendingAction::Approve);
            self.publish();
            let input = BuildShoppingListInput {
                project_id: self.state.project_id.clone(),
                image: self
                    .state
                    .current_image
                    .clone()
                    .expect("current image is set before approval"),
                brief: self.state.design_brief.clone(),
                revision_history: self.state.revision_history.clone(),
                scan_data: self.state.scan_data.clone(),
            };
            match self
                .call::<_, ShoppingList>(ActivityKind::BuildShoppingList, &input)
                .await
            {
                Ok(list) => {
                    self.ctx
                        .trace_info(format!("shopping list ready with {} item(s)", list.items.len()));
                    self.state.complete_shopping(list);
                    return Ok(());
                }
                Err(e) => self.fail(ActivityKind::BuildShoppingList, &e),
            }
            self.publish();
            match self.await_recovery().await? {
                Recovery::Retry => continue,
                Recovery::StartOver => {
                    self.restart();
                    return Ok(());
                }
            }
        }
    }

    /// One grace timer; signals arriving meanwhile stay unconsumed.
    async fn grace_period(&mut self) -> Stop {
        self.ctx.trace_info(format!(
            "project completed; purging data in {}ms",
            self.config.grace_period_ms
        ));
        self.ctx
            .schedule_timer(self.config.grace_period_ms)
            .into_timer()
            .await;
        Stop::GraceExpired
    }

    /// Record how the project ended and purge its data. Purge failures are
    /// logged and never keep the instance alive.
    async fn finish(&mut self, stop: Stop) {
        match &stop {
            Stop::Inactive => {
                self.ctx.trace_warn(format!(
                    "no activity for {}ms in phase {}; abandoning",
                    self.config.inactivity_timeout_ms, self.state.phase
                ));
                self.state.phase = Phase::Abandoned;
            }
            Stop::Cancelled => {
                self.ctx
                    .trace_info(format!("cancelled by user in phase {}", self.state.phase));
                self.state.phase = Phase::Abandoned;
                self.state.pending_action = Some(PendingAction::Cancel);
            }
            Stop::Terminated(reason) => {
                self.ctx
                    .trace_info(format!("cancelled by operator in phase {}: {reason}", self.state.phase));
                self.state.phase = Phase::Cancelled;
                self.state.pending_action = Some(PendingAction::Cancel);
            }
            Stop::GraceExpired => self.ctx.trace_info("grace period elapsed"),
        }
        self.publish();

        let input = PurgeProjectDataInput {
            project_id: self.state.project_id.clone(),
        };
        match self
            .call::<_, PurgeAck>(ActivityKind::PurgeProjectData, &input)
            .await
        {
            Ok(_) => {
                self.state.data_purged = true;
                self.ctx.trace_info("project data purged");
            }
            Err(e) => self.ctx.trace_error(format!(
                "purge failed after {} attempt(s), terminating anyway: {e}",
                e.attempts
            )),
        }
        self.state.pending_action = None;
        self.publish();
    }
}
