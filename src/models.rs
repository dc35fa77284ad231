use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WizardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(Uuid);

impl StepId {
    pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for StepId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// A step as returned by the description provider, before it has an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStub {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: StepId,
    pub title: String,
    pub description: String,
}

impl ProcessStep {
    pub fn from_stub(stub: StepStub) -> Self {
        Self { id: StepId::new(), title: stub.title, description: stub.description }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Complexity {
    Simple,
    Standard,
    Complex,
}

impl Complexity {
    pub const ALL: [Complexity; 3] = [Complexity::Simple, Complexity::Standard, Complexity::Complex];

    /// Step count requested from the description provider. Only a hint.
    pub fn target_step_count(self) -> usize {
        match self {
            Complexity::Simple => 4,
            Complexity::Standard => 6,
            Complexity::Complex => 8,
        }
    }

    pub fn step_range_label(self) -> &'static str {
        match self {
            Complexity::Simple => "3-5 steps",
            Complexity::Standard => "5-7 steps",
            Complexity::Complex => "7-10 steps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisualizationStyle {
    #[serde(rename = "CAD")]
    Cad,
    Schematic,
    #[serde(rename = "Photorealistic 3D")]
    Realistic,
}

impl VisualizationStyle {
    pub const ALL: [VisualizationStyle; 3] =
        [VisualizationStyle::Cad, VisualizationStyle::Schematic, VisualizationStyle::Realistic];

    pub fn label(self) -> &'static str {
        match self {
            VisualizationStyle::Cad => "CAD",
            VisualizationStyle::Schematic => "Schematic",
            VisualizationStyle::Realistic => "Photorealistic 3D",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            VisualizationStyle::Cad => "Precise 2D technical drawings with clean lines and standard symbols.",
            VisualizationStyle::Schematic => "Clear, intuitive diagrams emphasizing process flow and equipment labeling.",
            VisualizationStyle::Realistic => "High-quality 3D renderings with realistic textures, lighting, and depth.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub base64: String,
    pub mime_type: String,
    pub name: String,
}

impl ImageInput {
    fn validate(&self) -> Result<(), WizardError> {
        if !self.mime_type.starts_with("image/") {
            return Err(WizardError::Validation(format!("{} is not an image ({})", self.name, self.mime_type)));
        }
        let raw = base64::engine::general_purpose::STANDARD
            .decode(self.base64.trim())
            .map_err(|e| WizardError::Validation(format!("{} is not valid base64: {}", self.name, e)))?;
        image::guess_format(&raw)
            .map_err(|_| WizardError::Validation(format!("{} could not be recognised as an image", self.name)))?;
        Ok(())
    }
}

/// How the process is described: free text or an uploaded diagram/photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ProcessInput {
    Text { text: String },
    Image { image: ImageInput },
}

/// Snapshot of the configuration form, frozen when decomposition is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    pub project_title: String,
    #[serde(default)]
    pub project_description: String,
    pub input: ProcessInput,
    pub complexity: Complexity,
    pub visualization_style: VisualizationStyle,
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), WizardError> {
        if self.project_title.trim().is_empty() {
            return Err(WizardError::Validation("project title is required".into()));
        }
        match &self.input {
            ProcessInput::Text { text } if text.trim().is_empty() => {
                Err(WizardError::Validation("process description is required".into()))
            }
            ProcessInput::Text { .. } => Ok(()),
            ProcessInput::Image { image } => image.validate(),
        }
    }

    pub fn decomposition_text(&self) -> &str {
        match &self.input {
            ProcessInput::Text { text } => text,
            ProcessInput::Image { .. } => "Process described in the provided image",
        }
    }

    pub fn input_image(&self) -> Option<&ImageInput> {
        match &self.input {
            ProcessInput::Image { image } => Some(image),
            ProcessInput::Text { .. } => None,
        }
    }
}

/// Image and narration produced for one step, not yet approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAssets {
    pub image_base64: String,
    pub audio_script: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub step: ProcessStep,
    pub image_base64: String,
    pub audio_script: String,
    pub approved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn text_settings(text: &str) -> RunSettings {
        RunSettings {
            project_title: "Water plant".into(),
            project_description: String::new(),
            input: ProcessInput::Text { text: text.into() },
            complexity: Complexity::Standard,
            visualization_style: VisualizationStyle::Schematic,
        }
    }

    #[test]
    fn complexity_maps_to_step_hint() {
        assert_eq!(Complexity::Simple.target_step_count(), 4);
        assert_eq!(Complexity::Standard.target_step_count(), 6);
        assert_eq!(Complexity::Complex.target_step_count(), 8);
    }

    #[test]
    fn style_uses_display_names_on_the_wire() {
        assert_eq!(serde_json::to_string(&VisualizationStyle::Realistic).unwrap(), "\"Photorealistic 3D\"");
        let style: VisualizationStyle = serde_json::from_str("\"CAD\"").unwrap();
        assert_eq!(style, VisualizationStyle::Cad);
    }

    #[test]
    fn blank_text_input_is_rejected() {
        assert!(matches!(text_settings("   ").validate(), Err(WizardError::Validation(_))));
        assert!(text_settings("raw water intake, coagulation, filtration").validate().is_ok());
    }

    #[test]
    fn image_input_must_decode_to_an_image() {
        let mut settings = text_settings("");
        settings.input = ProcessInput::Image {
            image: ImageInput { base64: PNG_1X1.into(), mime_type: "image/png".into(), name: "flow.png".into() },
        };
        assert!(settings.validate().is_ok());
        assert_eq!(settings.decomposition_text(), "Process described in the provided image");

        settings.input = ProcessInput::Image {
            image: ImageInput { base64: "aGVsbG8=".into(), mime_type: "image/png".into(), name: "hello.png".into() },
        };
        assert!(matches!(settings.validate(), Err(WizardError::Validation(_))));
    }

    #[test]
    fn settings_parse_from_form_json() {
        let json = r#"{
            "projectTitle": "Brewery",
            "input": { "method": "text", "text": "mash, boil, ferment" },
            "complexity": "Simple",
            "visualizationStyle": "CAD"
        }"#;
        let settings: RunSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.complexity, Complexity::Simple);
        assert_eq!(settings.decomposition_text(), "mash, boil, ferment");
        assert!(settings.input_image().is_none());
    }
}
