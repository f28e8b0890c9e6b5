use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;

use nalgebra::Matrix4;
use tracing::{error, info, warn};

use crate::consts::{PROGRESS_LINEAR_END, PROGRESS_TOTAL};
use crate::error::{Result, VolregError};
use crate::field::{CompositeMapping, DisplacementField};
use crate::filters::intensity::{correlation, normalize};
use crate::filters::label::is_label_image;
use crate::interpolation::Interpolation;
use crate::pyramid::PyramidLevels;
use crate::register::linear::run_linear_stage;
use crate::register::nonlinear::{run_nonlinear_stage, NonlinearInputs};
use crate::register::resolution::match_resolution;
use crate::transform::{AffineTransform, Space};
use crate::volume::Volume;

use super::config::RegistrationConfig;
use super::context::{CancelToken, JobContext};
use super::types::{JobState, NoOpReporter, ProgressReporter, RegistrationStage};

/// Volumes for one registration run.
#[derive(Clone, Debug)]
pub struct RegistrationInputs {
    pub template: Volume,
    pub template2: Option<Volume>,
    pub subject: Volume,
    pub subject2: Option<Volume>,
    /// Template voxel-to-world matrix; scaling-only when unset.
    pub template_world: Option<Matrix4<f32>>,
}

impl RegistrationInputs {
    pub fn new(template: Volume, subject: Volume) -> Self {
        Self {
            template,
            template2: None,
            subject,
            subject2: None,
            template_world: None,
        }
    }
}

/// Immutable view of a job, replaced whole whenever the worker publishes.
#[derive(Clone, Debug, Default)]
pub struct JobSnapshot {
    pub state: JobState,
    pub status: String,
    /// Subject after the linear stage, at working template resolution.
    pub linear_preview: Option<Arc<Volume>>,
    /// Subject warped through the final mapping, at full template resolution.
    pub nonlinear_preview: Option<Arc<Volume>>,
    pub linear_correlation: Option<f32>,
    pub nonlinear_correlation: Option<f32>,
    pub error: Option<String>,
    /// Present exactly when `state` is [`JobState::Done`].
    pub result: Option<Arc<RegistrationResult>>,
}

/// Everything a finished run produces.
#[derive(Clone, Debug)]
pub struct RegistrationResult {
    /// Linear transform between the full-resolution template and subject.
    pub transform: AffineTransform,
    /// Nonlinear field at the resolution it was solved at.
    pub field: Arc<DisplacementField>,
    pub mapping: Arc<CompositeMapping>,
    pub linear_correlation: f32,
    pub nonlinear_correlation: f32,
}

struct Shared {
    snapshot: RwLock<Arc<JobSnapshot>>,
    status: Arc<RwLock<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(JobSnapshot::default())),
            status: Arc::new(RwLock::new(String::new())),
        }
    }

    fn snapshot(&self) -> Arc<JobSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build the next snapshot from the current one and swap it in.
    fn publish(&self, update: impl FnOnce(&mut JobSnapshot)) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = JobSnapshot::clone(&guard);
        update(&mut next);
        next.status = self.status.read().unwrap_or_else(PoisonError::into_inner).clone();
        *guard = Arc::new(next);
    }

    fn reset(&self) {
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(JobSnapshot::default());
    }
}

/// Runs registration jobs on a background thread, one at a time.
///
/// The controller polls [`status`](Self::status) or
/// [`snapshot`](Self::snapshot) and never blocks unless it calls
/// [`wait`](Self::wait).
pub struct RegistrationEngine {
    shared: Arc<Shared>,
    cancel: CancelToken,
    reporter: Arc<dyn ProgressReporter>,
    handle: Option<JoinHandle<()>>,
}

impl Default for RegistrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationEngine {
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(NoOpReporter))
    }

    pub fn with_reporter(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            cancel: CancelToken::new(),
            reporter,
            handle: None,
        }
    }

    /// Validate the inputs and start a run on the worker thread.
    pub fn start(&mut self, inputs: RegistrationInputs, config: RegistrationConfig) -> Result<()> {
        if self.is_running() {
            return Err(VolregError::JobRunning);
        }
        if inputs.template.is_empty() {
            return Err(VolregError::EmptyVolume("template"));
        }
        if inputs.subject.is_empty() {
            return Err(VolregError::EmptyVolume("subject"));
        }
        let pool = match config.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| VolregError::Config(e.to_string()))?,
            ),
            None => None,
        };

        // Reap a finished worker before reusing the shared state.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.reset();
        self.cancel.reset();
        self.shared.publish(|s| s.state = JobState::LinearRunning);

        let shared = Arc::clone(&self.shared);
        let ctx = JobContext::with_status(
            self.cancel.clone(),
            Arc::clone(&self.reporter),
            Arc::clone(&self.shared.status),
        );
        let handle = std::thread::Builder::new()
            .name("volreg-worker".into())
            .spawn(move || {
                let outcome = match pool {
                    Some(pool) => pool.install(|| run_job(&inputs, &config, &ctx, &shared)),
                    None => run_job(&inputs, &config, &ctx, &shared),
                };
                match outcome {
                    Ok(state) => shared.publish(|s| s.state = state),
                    Err(e) => {
                        error!(error = %e, "Registration failed");
                        shared.publish(|s| {
                            s.state = JobState::Failed;
                            s.error = Some(e.to_string());
                            s.result = None;
                        });
                    }
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// True while the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn state(&self) -> JobState {
        self.shared.snapshot().state
    }

    /// Status label of the last published snapshot.
    pub fn status(&self) -> String {
        self.shared.snapshot().status.clone()
    }

    pub fn snapshot(&self) -> Arc<JobSnapshot> {
        self.shared.snapshot()
    }

    /// Request cooperative cancellation; the worker stops at its next
    /// iteration boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the worker finishes and return the final state.
    pub fn wait(&mut self) -> Result<JobState> {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                self.shared.publish(|s| {
                    s.state = JobState::Failed;
                    s.result = None;
                });
                return Err(VolregError::WorkerPanicked);
            }
        }
        Ok(self.state())
    }

    /// Drop all results and return to idle.
    pub fn clear(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(VolregError::JobRunning);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.reset();
        Ok(())
    }

    pub fn result(&self) -> Result<Arc<RegistrationResult>> {
        self.shared
            .snapshot()
            .result
            .clone()
            .ok_or(VolregError::NotReady("registration has not completed"))
    }

    pub fn transform(&self) -> Result<AffineTransform> {
        Ok(self.result()?.transform.clone())
    }

    pub fn field(&self) -> Result<Arc<DisplacementField>> {
        Ok(Arc::clone(&self.result()?.field))
    }

    pub fn mapping(&self) -> Result<Arc<CompositeMapping>> {
        Ok(Arc::clone(&self.result()?.mapping))
    }

    /// Warp `volume` from subject space into template space. Label volumes
    /// are always sampled with nearest neighbor.
    pub fn warp(&self, volume: &Volume, interpolation: Interpolation) -> Result<Volume> {
        if volume.is_empty() {
            return Err(VolregError::EmptyVolume("input"));
        }
        Ok(self.mapping()?.warp(volume, interpolation))
    }
}

impl Drop for RegistrationEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}

fn normalized(volume: &Volume) -> Volume {
    let mut v = volume.clone();
    normalize(&mut v.data, 1.0);
    v
}

/// Worker body. Cancellation returns `Ok(Cancelled)` with nothing stored.
fn run_job(
    inputs: &RegistrationInputs,
    config: &RegistrationConfig,
    ctx: &JobContext,
    shared: &Shared,
) -> Result<JobState> {
    ctx.set_stage(RegistrationStage::Linear);
    shared.publish(|s| s.state = JobState::LinearRunning);
    info!(
        template = %inputs.template.geometry(),
        subject = %inputs.subject.geometry(),
        config = %config,
        "Registration started"
    );

    let template = normalized(&inputs.template);
    let subject = normalized(&inputs.subject);
    let template2 = inputs.template2.as_ref().map(normalized);
    let subject2 = inputs.subject2.as_ref().map(normalized);
    let matched = match_resolution(&template, template2.as_ref(), &subject, subject2.as_ref());

    let edge = config
        .edge
        .unwrap_or_else(|| is_label_image(&inputs.subject.data));

    let linear = run_linear_stage(
        &matched.template,
        &matched.subject,
        matched.subject2.as_ref(),
        &config.linear_options(),
        &ctx.in_span(0..PROGRESS_LINEAR_END),
    )?;
    if ctx.is_cancelled() {
        info!("Registration cancelled during linear stage");
        return Ok(JobState::Cancelled);
    }
    let linear_preview = Arc::new(linear.resampled.clone());
    shared.publish(|s| {
        s.linear_preview = Some(linear_preview);
        s.linear_correlation = Some(linear.correlation);
    });

    ctx.set_stage(RegistrationStage::Nonlinear);
    shared.publish(|s| s.state = JobState::NonlinearRunning);
    let nonlinear_inputs = NonlinearInputs {
        template: &matched.template,
        template2: matched.template2.as_ref(),
        subject: &linear.resampled,
        subject2: linear.resampled2.as_ref(),
    };
    if matched.subject2.is_some() && linear.resampled2.is_none() {
        warn!("Secondary subject does not match the primary subject geometry");
    }
    let field = run_nonlinear_stage(
        &nonlinear_inputs,
        &config.nonlinear,
        edge,
        &ctx.in_span(PROGRESS_LINEAR_END..PROGRESS_TOTAL),
    )?;
    if ctx.is_cancelled() {
        info!("Registration cancelled during nonlinear stage");
        return Ok(JobState::Cancelled);
    }

    // Carry the linear transform to the full-resolution grids. The working
    // subject voxel size was rescaled by the linear stage; apply the same
    // factor to the original.
    let ratio = linear.transform.to.voxel_size.x() / matched.subject.voxel_size.x();
    let full_subject = Space::new(
        inputs.subject.geometry(),
        inputs.subject.voxel_size.scaled(ratio),
    );
    let full_template = Space::of(&inputs.template);
    let transform = linear.transform.rederive(full_template, full_subject);

    let levels = PyramidLevels::between(full_template.geometry, field.geometry())?;
    let full_field = field.promote(&levels)?;
    let world = inputs
        .template_world
        .unwrap_or_else(|| inputs.template.voxel_size.to_world());
    let mapping = CompositeMapping::from_field(&full_field, &transform, world)?;

    let warped = mapping.apply(&inputs.subject, Interpolation::Linear);
    let nonlinear_correlation = correlation(&warped.data, &inputs.template.data)?;
    info!(
        linear = linear.correlation,
        nonlinear = nonlinear_correlation,
        "Registration complete"
    );

    let result = Arc::new(RegistrationResult {
        transform,
        field: Arc::new(field),
        mapping: Arc::new(mapping),
        linear_correlation: linear.correlation,
        nonlinear_correlation,
    });
    let preview = Arc::new(warped);
    ctx.set_stage(RegistrationStage::Done);
    shared.publish(|s| {
        s.state = JobState::Done;
        s.result = Some(result);
        s.nonlinear_preview = Some(preview);
        s.nonlinear_correlation = Some(nonlinear_correlation);
    });
    Ok(JobState::Done)
}
