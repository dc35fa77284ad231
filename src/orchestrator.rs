//! Sequential, approval-gated generation of step assets.
//!
//! Exactly one step is in flight at a time. Each request is tagged with a
//! [`Ticket`] (step index plus per-step attempt counter); outcomes carrying any
//! other ticket are stale and get dropped, which is how a regenerate supersedes
//! a request that is still running.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    error::{GenerationError, WizardError},
    models::{GenerationResult, ProcessStep, StepAssets, VisualizationStyle},
    provider::AssetGenerator,
    results::ResultsCollector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub index: usize,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum GenerationState {
    Idle,
    Generating { index: usize, attempt: u32 },
    AwaitingApproval { index: usize, attempt: u32, assets: StepAssets },
    Failed { index: usize, attempt: u32, error: String },
    Complete,
}

impl GenerationState {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationState::Idle => "idle",
            GenerationState::Generating { .. } => "generating",
            GenerationState::AwaitingApproval { .. } => "awaiting approval",
            GenerationState::Failed { .. } => "failed",
            GenerationState::Complete => "complete",
        }
    }

    pub fn current_ticket(&self) -> Option<Ticket> {
        match *self {
            GenerationState::Generating { index, attempt }
            | GenerationState::AwaitingApproval { index, attempt, .. }
            | GenerationState::Failed { index, attempt, .. } => Some(Ticket { index, attempt }),
            GenerationState::Idle | GenerationState::Complete => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Start,
    AssetsReady { ticket: Ticket, assets: StepAssets },
    AssetsFailed { ticket: Ticket, error: String },
    Regenerate,
    Approve { attempt: Option<u32> },
}

/// Pure transition function. `Ok(None)` means the event was a stale outcome and is ignored.
pub fn transition(
    state: &GenerationState,
    event: GenerationEvent,
    step_count: usize,
) -> Result<Option<GenerationState>, WizardError> {
    use GenerationState as S;

    let next = match (state, event) {
        (S::Idle, GenerationEvent::Start) if step_count == 0 => S::Idle,
        (S::Idle, GenerationEvent::Start) => S::Generating { index: 0, attempt: 0 },

        (S::Generating { index, attempt }, GenerationEvent::AssetsReady { ticket, assets })
            if ticket == (Ticket { index: *index, attempt: *attempt }) =>
        {
            S::AwaitingApproval { index: *index, attempt: *attempt, assets }
        }
        (S::Generating { index, attempt }, GenerationEvent::AssetsFailed { ticket, error })
            if ticket == (Ticket { index: *index, attempt: *attempt }) =>
        {
            S::Failed { index: *index, attempt: *attempt, error }
        }
        (_, GenerationEvent::AssetsReady { .. } | GenerationEvent::AssetsFailed { .. }) => return Ok(None),

        (
            S::Generating { index, attempt }
            | S::AwaitingApproval { index, attempt, .. }
            | S::Failed { index, attempt, .. },
            GenerationEvent::Regenerate,
        ) => S::Generating { index: *index, attempt: attempt + 1 },

        (S::AwaitingApproval { attempt, .. }, GenerationEvent::Approve { attempt: Some(expected) })
            if expected != *attempt =>
        {
            return Err(WizardError::InvalidAction { action: "approve a superseded attempt", stage: state.name() });
        }
        (S::AwaitingApproval { index, .. }, GenerationEvent::Approve { .. }) if index + 1 >= step_count => S::Complete,
        (S::AwaitingApproval { index, .. }, GenerationEvent::Approve { .. }) => S::Generating { index: index + 1, attempt: 0 },

        (_, GenerationEvent::Start) => return Err(WizardError::InvalidAction { action: "start generation", stage: state.name() }),
        (_, GenerationEvent::Regenerate) => return Err(WizardError::InvalidAction { action: "regenerate", stage: state.name() }),
        (_, GenerationEvent::Approve { .. }) => return Err(WizardError::InvalidAction { action: "approve", stage: state.name() }),
    };
    Ok(Some(next))
}

/// Everything the asset generator needs for one attempt at one step.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub ticket: Ticket,
    pub step: ProcessStep,
    pub style: VisualizationStyle,
    pub previous_image: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Approval {
    Next(AssetRequest),
    Complete(Vec<GenerationResult>),
}

#[derive(Debug)]
pub struct Orchestrator {
    steps: Vec<ProcessStep>,
    style: VisualizationStyle,
    state: GenerationState,
    results: ResultsCollector,
}

impl Orchestrator {
    pub fn new(steps: Vec<ProcessStep>, style: VisualizationStyle) -> Self {
        Self { steps, style, state: GenerationState::Idle, results: ResultsCollector::new() }
    }

    pub fn state(&self) -> &GenerationState { &self.state }

    pub fn steps(&self) -> &[ProcessStep] { &self.steps }

    pub fn results(&self) -> &ResultsCollector { &self.results }

    /// Begins at step 0. An empty step list stays idle and yields no request.
    pub fn start(&mut self) -> Result<Option<AssetRequest>, WizardError> {
        self.apply(GenerationEvent::Start)?;
        if self.steps.is_empty() {
            warn!("⚠️ Generation started with no steps, nothing to do");
        }
        Ok(self.pending_request())
    }

    /// Discards whatever the current step has (in-flight, awaiting, or failed) and asks again.
    pub fn regenerate(&mut self) -> Result<AssetRequest, WizardError> {
        self.apply(GenerationEvent::Regenerate)?;
        let request = self.pending_request().ok_or(WizardError::InvalidAction { action: "regenerate", stage: self.state.name() })?;
        info!("🔄 Regenerating step {} (attempt {})", request.ticket.index + 1, request.ticket.attempt);
        Ok(request)
    }

    /// Records the awaiting result, then moves to the next step or completes.
    pub fn approve(&mut self, attempt: Option<u32>) -> Result<Approval, WizardError> {
        let GenerationState::AwaitingApproval { index, assets, .. } = self.state.clone() else {
            return Err(WizardError::InvalidAction { action: "approve", stage: self.state.name() });
        };
        let next = transition(&self.state, GenerationEvent::Approve { attempt }, self.steps.len())?
            .ok_or(WizardError::InvalidAction { action: "approve", stage: self.state.name() })?;

        self.results.push(GenerationResult {
            step: self.steps[index].clone(),
            image_base64: assets.image_base64,
            audio_script: assets.audio_script,
            approved_at: Utc::now(),
        });
        self.state = next;
        info!("✅ Approved step {}/{} ({})", index + 1, self.steps.len(), self.steps[index].title);

        match self.pending_request() {
            Some(request) => Ok(Approval::Next(request)),
            None => {
                info!("🏁 All {} steps approved", self.results.len());
                Ok(Approval::Complete(self.results.clone().into_vec()))
            }
        }
    }

    /// Feeds an asset outcome back in. Returns `false` when the ticket is stale and the outcome was dropped.
    pub fn resolve(&mut self, ticket: Ticket, outcome: Result<StepAssets, GenerationError>) -> bool {
        let (event, detail) = match outcome {
            Ok(assets) => (GenerationEvent::AssetsReady { ticket, assets }, None),
            // The operator sees the friendly message; provider detail goes to the log only
            Err(e) => {
                let detail = e.to_string();
                (GenerationEvent::AssetsFailed { ticket, error: WizardError::from(e).to_string() }, Some(detail))
            }
        };
        match transition(&self.state, event, self.steps.len()) {
            Ok(Some(next)) => {
                match detail {
                    Some(detail) => error!("❌ Step {} failed: {}", ticket.index + 1, detail),
                    None => info!("🖼️ Step {} ready for review (attempt {})", ticket.index + 1, ticket.attempt),
                }
                self.state = next;
                true
            }
            _ => {
                info!("🗑️ Discarding stale outcome for step {} attempt {}", ticket.index + 1, ticket.attempt);
                false
            }
        }
    }

    fn apply(&mut self, event: GenerationEvent) -> Result<(), WizardError> {
        if let Some(next) = transition(&self.state, event, self.steps.len())? {
            self.state = next;
        }
        Ok(())
    }

    fn pending_request(&self) -> Option<AssetRequest> {
        let GenerationState::Generating { index, attempt } = self.state else { return None };
        debug_assert_eq!(self.results.len(), index);
        Some(AssetRequest {
            ticket: Ticket { index, attempt },
            step: self.steps[index].clone(),
            style: self.style,
            previous_image: self.results.last_image().map(str::to_owned),
        })
    }
}

/// Runs the image and script requests for one step concurrently and joins them.
/// Either failing fails the whole step, so no partial result ever reaches review.
pub async fn generate_assets<G>(generator: &G, request: &AssetRequest) -> Result<StepAssets, GenerationError>
where
    G: AssetGenerator + ?Sized,
{
    info!(
        "🎯 Generating step {} '{}' (attempt {}, reference image: {})",
        request.ticket.index + 1,
        request.step.title,
        request.ticket.attempt,
        request.previous_image.is_some()
    );
    let (image, script) = tokio::join!(
        generator.generate_image(&request.step, request.style, request.previous_image.as_deref()),
        generator.generate_script(&request.step)
    );
    Ok(StepAssets { image_base64: image?, audio_script: script? })
}
