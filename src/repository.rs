use serde::Deserialize;

use crate::{error::WizardError, models::{ProcessStep, StepId}};

pub const NEW_STEP_TITLE: &str = "New Step";
pub const NEW_STEP_DESCRIPTION: &str = "Detailed description of the new step.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepField {
    Title,
    Description,
}

/// Editable, ordered step list used between decomposition and generation.
#[derive(Debug, Default, Clone)]
pub struct StepRepository {
    steps: Vec<ProcessStep>,
}

impl StepRepository {
    pub fn new() -> Self { Self::default() }

    pub fn initialize(&mut self, steps: Vec<ProcessStep>) {
        self.steps = steps;
    }

    pub fn steps(&self) -> &[ProcessStep] { &self.steps }

    pub fn len(&self) -> usize { self.steps.len() }

    pub fn is_empty(&self) -> bool { self.steps.is_empty() }

    pub fn update(&mut self, index: usize, field: StepField, value: String) -> Result<&ProcessStep, WizardError> {
        let len = self.steps.len();
        let step = self.steps.get_mut(index).ok_or(WizardError::IndexOutOfRange { index, len })?;
        match field {
            StepField::Title => step.title = value,
            StepField::Description => step.description = value,
        }
        Ok(step)
    }

    /// Inserts a placeholder step right after `after`, or first when `after` is `None`.
    pub fn insert_after(&mut self, after: Option<usize>) -> Result<&ProcessStep, WizardError> {
        let position = match after {
            None => 0,
            Some(index) if index < self.steps.len() => index + 1,
            Some(index) => return Err(WizardError::IndexOutOfRange { index, len: self.steps.len() }),
        };
        self.steps.insert(
            position,
            ProcessStep { id: StepId::new(), title: NEW_STEP_TITLE.into(), description: NEW_STEP_DESCRIPTION.into() },
        );
        Ok(&self.steps[position])
    }

    pub fn remove(&mut self, index: usize) -> Result<ProcessStep, WizardError> {
        if index >= self.steps.len() {
            return Err(WizardError::IndexOutOfRange { index, len: self.steps.len() });
        }
        Ok(self.steps.remove(index))
    }

    /// Hands the list over to generation. An empty list cannot be confirmed.
    pub fn confirm(&self) -> Result<Vec<ProcessStep>, WizardError> {
        if self.steps.is_empty() {
            return Err(WizardError::Validation("add at least one step before starting generation".into()));
        }
        Ok(self.steps.clone())
    }
}
