//! The wizard: configuration, step editing, generation, results.
//!
//! A [`Session`] is plain synchronous state. Anything slow (decomposition,
//! asset generation) happens outside it; callers take a ticket, do the work,
//! and hand the outcome back, where stale tickets are dropped.

use serde::Serialize;
use serde_with::skip_serializing_none;
use tracing::{info, warn};

use crate::{
    error::{DecompositionError, GenerationError, WizardError},
    models::{GenerationResult, ProcessStep, RunSettings, StepAssets, StepStub},
    orchestrator::{Approval, AssetRequest, GenerationState, Orchestrator, Ticket},
    provider::{ApiKey, DecompositionRequest},
    repository::{StepField, StepRepository},
};

pub const DECOMPOSITION_FAILED: &str = "Failed to decompose the process. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Config,
    EditingSteps,
    Generating,
    Results,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Config => "configuring",
            Stage::EditingSteps => "editing steps",
            Stage::Generating => "generating",
            Stage::Results => "showing results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompositionTicket(u64);

/// An asset request tagged with the run it belongs to, plus the key to send it with.
#[derive(Debug, Clone)]
pub struct PendingAssets {
    pub run: u64,
    pub key: ApiKey,
    pub request: AssetRequest,
}

#[derive(Debug)]
pub struct Session {
    api_key: Option<ApiKey>,
    stage: Stage,
    settings: Option<RunSettings>,
    repository: StepRepository,
    orchestrator: Option<Orchestrator>,
    results: Vec<GenerationResult>,
    error: Option<String>,
    pending_decomposition: Option<DecompositionTicket>,
    run: u64,
}

impl Default for Session {
    fn default() -> Self { Self::new() }
}

impl Session {
    pub fn new() -> Self {
        Self {
            api_key: None,
            stage: Stage::Config,
            settings: None,
            repository: StepRepository::new(),
            orchestrator: None,
            results: Vec::new(),
            error: None,
            pending_decomposition: None,
            run: 0,
        }
    }

    pub fn stage(&self) -> Stage { self.stage }

    pub fn api_key(&self) -> Option<&ApiKey> { self.api_key.as_ref() }

    pub fn settings(&self) -> Option<&RunSettings> { self.settings.as_ref() }

    pub fn steps(&self) -> &[ProcessStep] { self.repository.steps() }

    pub fn results(&self) -> &[GenerationResult] { &self.results }

    pub fn error(&self) -> Option<&str> { self.error.as_deref() }

    pub fn orchestrator(&self) -> Option<&Orchestrator> { self.orchestrator.as_ref() }

    fn require(&self, stage: Stage, action: &'static str) -> Result<(), WizardError> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(WizardError::InvalidAction { action, stage: self.stage.name() })
        }
    }

    fn require_key_change(&self) -> Result<(), WizardError> {
        self.require(Stage::Config, "change the API key")?;
        if self.pending_decomposition.is_some() {
            return Err(WizardError::InvalidAction { action: "change the API key", stage: "analyzing the process" });
        }
        Ok(())
    }

    /// The key every provider request goes out with. Missing keys block the action and leave state alone.
    fn require_key(&mut self) -> Result<ApiKey, WizardError> {
        match &self.api_key {
            Some(key) => Ok(key.clone()),
            None => {
                self.error = Some(WizardError::MissingCredential.to_string());
                Err(WizardError::MissingCredential)
            }
        }
    }

    pub fn set_api_key(&mut self, raw: &str) -> Result<(), WizardError> {
        self.require_key_change()?;
        let key = ApiKey::new(raw).ok_or_else(|| WizardError::Validation("API key must not be empty".into()))?;
        self.api_key = Some(key);
        self.error = None;
        info!("🔑 API key provided for this session");
        Ok(())
    }

    pub fn clear_api_key(&mut self) -> Result<(), WizardError> {
        self.require_key_change()?;
        self.api_key = None;
        Ok(())
    }

    /// Validates and freezes the form, and hands back what the description provider needs.
    pub fn begin_decomposition(
        &mut self,
        settings: RunSettings,
    ) -> Result<(DecompositionTicket, ApiKey, DecompositionRequest), WizardError> {
        self.require(Stage::Config, "decompose a process")?;
        let key = self.require_key()?;
        if self.pending_decomposition.is_some() {
            return Err(WizardError::InvalidAction { action: "start another decomposition", stage: "analyzing the process" });
        }
        settings.validate()?;

        let request = DecompositionRequest {
            description: settings.decomposition_text().to_string(),
            image: settings.input_image().cloned(),
            complexity: settings.complexity,
        };
        self.run += 1;
        let ticket = DecompositionTicket(self.run);
        self.pending_decomposition = Some(ticket);
        self.settings = Some(settings);
        self.error = None;
        Ok((ticket, key, request))
    }

    pub fn finish_decomposition(
        &mut self,
        ticket: DecompositionTicket,
        outcome: Result<Vec<StepStub>, DecompositionError>,
    ) -> Result<&[ProcessStep], WizardError> {
        if self.pending_decomposition != Some(ticket) || self.stage != Stage::Config {
            warn!("⚠️ Dropping decomposition result from a superseded request");
            return Err(WizardError::InvalidAction { action: "apply a superseded decomposition", stage: self.stage.name() });
        }
        self.pending_decomposition = None;
        match outcome {
            Ok(stubs) => {
                self.repository.initialize(stubs.into_iter().map(ProcessStep::from_stub).collect());
                self.stage = Stage::EditingSteps;
                info!("📝 {} steps ready for review", self.repository.len());
                Ok(self.repository.steps())
            }
            Err(e) => {
                warn!("❌ Decomposition failed: {}", e);
                self.error = Some(DECOMPOSITION_FAILED.to_string());
                Err(e.into())
            }
        }
    }

    /// Clears a decomposition whose task died without producing an outcome.
    pub fn abandon_decomposition(&mut self, ticket: DecompositionTicket) {
        if self.pending_decomposition == Some(ticket) {
            warn!("❌ Decomposition task ended without a result");
            self.pending_decomposition = None;
            self.error = Some(DECOMPOSITION_FAILED.to_string());
        }
    }

    pub fn is_decomposing(&self) -> bool { self.pending_decomposition.is_some() }

    pub fn update_step(&mut self, index: usize, field: StepField, value: String) -> Result<&ProcessStep, WizardError> {
        self.require(Stage::EditingSteps, "edit steps")?;
        self.repository.update(index, field, value)
    }

    pub fn insert_step(&mut self, after: Option<usize>) -> Result<&ProcessStep, WizardError> {
        self.require(Stage::EditingSteps, "add a step")?;
        self.repository.insert_after(after)
    }

    pub fn remove_step(&mut self, index: usize) -> Result<ProcessStep, WizardError> {
        self.require(Stage::EditingSteps, "remove a step")?;
        self.repository.remove(index)
    }

    /// Freezes the edited list and starts generating step 0.
    pub fn confirm_steps(&mut self) -> Result<Option<PendingAssets>, WizardError> {
        self.require(Stage::EditingSteps, "confirm steps")?;
        let key = self.require_key()?;
        let steps = self.repository.confirm()?;
        let style = self
            .settings
            .as_ref()
            .map(|s| s.visualization_style)
            .ok_or(WizardError::InvalidAction { action: "confirm steps", stage: "missing run settings" })?;

        let mut orchestrator = Orchestrator::new(steps, style);
        let request = orchestrator.start()?;
        info!("🚀 Generation started for {} steps in {} style", orchestrator.steps().len(), style.label());
        self.orchestrator = Some(orchestrator);
        self.stage = Stage::Generating;
        self.error = None;
        Ok(request.map(|request| PendingAssets { run: self.run, key, request }))
    }

    fn orchestrator_mut(&mut self, action: &'static str) -> Result<&mut Orchestrator, WizardError> {
        self.require(Stage::Generating, action)?;
        let stage = self.stage.name();
        self.orchestrator.as_mut().ok_or(WizardError::InvalidAction { action, stage })
    }

    pub fn regenerate(&mut self) -> Result<PendingAssets, WizardError> {
        let run = self.run;
        let key = self.require_key()?;
        let request = self.orchestrator_mut("regenerate")?.regenerate()?;
        Ok(PendingAssets { run, key, request })
    }

    /// Approves the step under review. `None` means the run is complete.
    pub fn approve(&mut self, attempt: Option<u32>) -> Result<Option<PendingAssets>, WizardError> {
        let run = self.run;
        let key = self.require_key()?;
        let approval = self.orchestrator_mut("approve")?.approve(attempt)?;
        match approval {
            Approval::Next(request) => Ok(Some(PendingAssets { run, key, request })),
            Approval::Complete(results) => {
                self.results = results;
                self.stage = Stage::Results;
                Ok(None)
            }
        }
    }

    /// Returns `false` if the outcome belonged to an earlier run or a superseded attempt.
    pub fn resolve(&mut self, run: u64, ticket: Ticket, outcome: Result<StepAssets, GenerationError>) -> bool {
        if run != self.run || self.stage != Stage::Generating {
            info!("🗑️ Discarding asset outcome from a finished run");
            return false;
        }
        match self.orchestrator.as_mut() {
            Some(orchestrator) => orchestrator.resolve(ticket, outcome),
            None => false,
        }
    }

    /// Back to the configuration form. The API key stays.
    pub fn restart(&mut self) {
        let api_key = self.api_key.take();
        let run = self.run + 1;
        *self = Self { api_key, run, ..Self::new() };
        info!("🔁 Session restarted");
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            stage: self.stage,
            api_key_set: self.api_key.is_some(),
            decomposing: self.is_decomposing(),
            settings: self.settings.as_ref(),
            steps: self.repository.steps(),
            error: self.error.as_deref(),
        }
    }

    pub fn generation_view(&self) -> Option<GenerationView<'_>> {
        let orchestrator = self.orchestrator.as_ref()?;
        let total = orchestrator.steps().len();
        let approved = orchestrator.results().len();
        let current_step = orchestrator.state().current_ticket().and_then(|t| orchestrator.steps().get(t.index));
        Some(GenerationView {
            total,
            approved,
            progress_percent: if total > 0 { (approved * 100 / total) as u8 } else { 0 },
            current_step,
            state: orchestrator.state(),
        })
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView<'a> {
    pub stage: Stage,
    pub api_key_set: bool,
    pub decomposing: bool,
    pub settings: Option<&'a RunSettings>,
    pub steps: &'a [ProcessStep],
    pub error: Option<&'a str>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationView<'a> {
    pub total: usize,
    pub approved: usize,
    pub progress_percent: u8,
    pub current_step: Option<&'a ProcessStep>,
    pub state: &'a GenerationState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Complexity, ProcessInput, VisualizationStyle};
    use pretty_assertions::assert_eq;

    fn settings(complexity: Complexity) -> RunSettings {
        RunSettings {
            project_title: "Water treatment".into(),
            project_description: "Municipal plant".into(),
            input: ProcessInput::Text { text: "intake, coagulation, filtration".into() },
            complexity,
            visualization_style: VisualizationStyle::Schematic,
        }
    }

    fn stubs(n: usize) -> Vec<StepStub> {
        (0..n).map(|i| StepStub { title: format!("Step {i}"), description: format!("desc {i}") }).collect()
    }

    fn assets(tag: &str) -> StepAssets {
        StepAssets { image_base64: format!("img-{tag}"), audio_script: format!("script-{tag}") }
    }

    fn editing_session(n: usize) -> Session {
        let mut session = Session::new();
        session.set_api_key("key").unwrap();
        let (ticket, _, _) = session.begin_decomposition(settings(Complexity::Simple)).unwrap();
        session.finish_decomposition(ticket, Ok(stubs(n))).unwrap();
        session
    }

    #[test]
    fn decomposition_requires_a_key() {
        let mut session = Session::new();
        let err = session.begin_decomposition(settings(Complexity::Standard)).unwrap_err();
        assert_eq!(err, WizardError::MissingCredential);
        assert_eq!(session.stage(), Stage::Config);
        assert!(session.error().is_some());
        assert!(session.set_api_key("   ").is_err());
    }

    #[test]
    fn decomposition_request_carries_hint_and_assigns_ids() {
        let mut session = Session::new();
        session.set_api_key("key").unwrap();
        let (ticket, key, request) = session.begin_decomposition(settings(Complexity::Complex)).unwrap();
        assert_eq!(key.expose(), "key");
        assert_eq!(request.complexity.target_step_count(), 8);
        assert!(session.begin_decomposition(settings(Complexity::Complex)).is_err());

        let steps = session.finish_decomposition(ticket, Ok(stubs(3))).unwrap().to_vec();
        assert_eq!(steps.len(), 3);
        assert_ne!(steps[0].id, steps[1].id);
        assert_eq!(session.stage(), Stage::EditingSteps);
    }

    #[test]
    fn failed_decomposition_stays_on_config_and_can_resubmit() {
        let mut session = Session::new();
        session.set_api_key("key").unwrap();
        let (ticket, _, _) = session.begin_decomposition(settings(Complexity::Simple)).unwrap();
        let err = session
            .finish_decomposition(ticket, Err(DecompositionError::Malformed("not json".into())))
            .unwrap_err();
        assert!(matches!(err, WizardError::Decomposition(_)));
        assert_eq!(session.stage(), Stage::Config);
        assert_eq!(session.error(), Some(DECOMPOSITION_FAILED));
        assert!(session.begin_decomposition(settings(Complexity::Simple)).is_ok());
    }

    #[test]
    fn key_is_locked_while_decomposing() {
        let mut session = Session::new();
        session.set_api_key("key").unwrap();
        let (ticket, _, _) = session.begin_decomposition(settings(Complexity::Simple)).unwrap();
        assert!(matches!(session.clear_api_key(), Err(WizardError::InvalidAction { .. })));
        assert!(matches!(session.set_api_key("other"), Err(WizardError::InvalidAction { .. })));
        assert_eq!(session.api_key().map(ApiKey::expose), Some("key"));

        session.finish_decomposition(ticket, Ok(stubs(2))).unwrap();
        let pending = session.confirm_steps().unwrap().unwrap();
        assert_eq!(pending.key.expose(), "key");
        assert_eq!(session.stage(), Stage::Generating);
    }

    #[test]
    fn confirming_without_a_key_is_blocked() {
        let mut session = editing_session(2);
        session.api_key = None;
        assert_eq!(session.confirm_steps().unwrap_err(), WizardError::MissingCredential);
        assert_eq!(session.stage(), Stage::EditingSteps);
        assert!(session.orchestrator().is_none());
        assert!(session.error().is_some());
    }

    #[test]
    fn abandoned_decomposition_can_be_resubmitted() {
        let mut session = Session::new();
        session.set_api_key("key").unwrap();
        let (ticket, _, _) = session.begin_decomposition(settings(Complexity::Simple)).unwrap();
        session.abandon_decomposition(ticket);
        assert!(!session.is_decomposing());
        assert_eq!(session.error(), Some(DECOMPOSITION_FAILED));
        assert!(session.clear_api_key().is_ok());
        session.set_api_key("key").unwrap();
        assert!(session.begin_decomposition(settings(Complexity::Simple)).is_ok());
    }

    #[test]
    fn restart_drops_late_decomposition() {
        let mut session = Session::new();
        session.set_api_key("key").unwrap();
        let (ticket, _, _) = session.begin_decomposition(settings(Complexity::Simple)).unwrap();
        session.restart();
        assert!(session.finish_decomposition(ticket, Ok(stubs(2))).is_err());
        assert!(session.steps().is_empty());
        assert!(session.api_key().is_some());
    }

    #[test]
    fn simple_three_step_run_completes_in_order() {
        let mut session = editing_session(3);
        let expected: Vec<_> = session.steps().iter().map(|s| s.id).collect();
        let mut pending = session.confirm_steps().unwrap().unwrap();
        assert_eq!(pending.request.ticket, Ticket { index: 0, attempt: 0 });
        assert!(pending.request.previous_image.is_none());

        for i in 0..3 {
            assert!(session.resolve(pending.run, pending.request.ticket, Ok(assets(&i.to_string()))));
            match session.approve(None).unwrap() {
                Some(next) => pending = next,
                None => assert_eq!(i, 2),
            }
        }
        assert_eq!(session.stage(), Stage::Results);
        let ids: Vec<_> = session.results().iter().map(|r| r.step.id).collect();
        assert_eq!(ids, expected);
        assert_eq!(session.generation_view().unwrap().progress_percent, 100);
    }

    #[test]
    fn edits_before_confirm_are_snapshotted() {
        let mut session = editing_session(2);
        session.update_step(0, StepField::Title, "Raw water intake".into()).unwrap();
        session.insert_step(Some(1)).unwrap();
        session.remove_step(1).unwrap();
        let pending = session.confirm_steps().unwrap().unwrap();
        assert_eq!(pending.request.step.title, "Raw water intake");
        assert!(session.update_step(0, StepField::Title, "late".into()).is_err());
    }

    #[test]
    fn confirming_an_empty_list_is_refused() {
        let mut session = editing_session(1);
        session.remove_step(0).unwrap();
        assert!(matches!(session.confirm_steps(), Err(WizardError::Validation(_))));
        assert_eq!(session.stage(), Stage::EditingSteps);
    }

    #[test]
    fn outcomes_from_a_previous_run_are_ignored() {
        let mut session = editing_session(2);
        let old = session.confirm_steps().unwrap().unwrap();
        session.restart();
        session.set_api_key("key").unwrap();
        let (ticket, _, _) = session.begin_decomposition(settings(Complexity::Simple)).unwrap();
        session.finish_decomposition(ticket, Ok(stubs(2))).unwrap();
        let fresh = session.confirm_steps().unwrap().unwrap();

        assert_eq!(old.request.ticket, fresh.request.ticket);
        assert!(!session.resolve(old.run, old.request.ticket, Ok(assets("old"))));
        assert!(session.resolve(fresh.run, fresh.request.ticket, Ok(assets("new"))));
    }

    #[test]
    fn generation_view_reports_current_step() {
        let mut session = editing_session(4);
        let pending = session.confirm_steps().unwrap().unwrap();
        session.resolve(pending.run, pending.request.ticket, Err(GenerationError::NoImage));
        let view = session.generation_view().unwrap();
        assert_eq!(view.total, 4);
        assert_eq!(view.approved, 0);
        assert_eq!(view.current_step.map(|s| s.title.as_str()), Some("Step 0"));
        assert!(matches!(view.state, GenerationState::Failed { index: 0, .. }));
    }
}
