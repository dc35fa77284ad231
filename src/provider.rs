use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    error::{DecompositionError, GenerationError},
    models::{Complexity, ImageInput, ProcessStep, StepStub, VisualizationStyle},
};

/// Secret API key. Lives only in memory and never prints.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("ApiKey(***)") }
}

#[derive(Debug, Clone)]
pub struct DecompositionRequest {
    pub description: String,
    pub image: Option<ImageInput>,
    pub complexity: Complexity,
}

#[async_trait]
pub trait DescriptionProvider: Send + Sync {
    async fn decompose(&self, request: &DecompositionRequest) -> Result<Vec<StepStub>, DecompositionError>;
}

#[async_trait]
pub trait AssetGenerator: Send + Sync {
    /// Returns the generated image as base64.
    async fn generate_image(
        &self,
        step: &ProcessStep,
        style: VisualizationStyle,
        previous_image: Option<&str>,
    ) -> Result<String, GenerationError>;

    async fn generate_script(&self, step: &ProcessStep) -> Result<String, GenerationError>;
}

pub trait GenAiBackend: DescriptionProvider + AssetGenerator {}

impl<T: DescriptionProvider + AssetGenerator> GenAiBackend for T {}

/// Builds a backend bound to the key the operator entered for this session.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, key: &ApiKey) -> Arc<dyn GenAiBackend>;
}

#[derive(Deserialize)]
struct WireStub {
    title: String,
    description: String,
}

/// Validates decomposition output. The model is asked for JSON, but the text is
/// still untrusted: it has to be a non-empty array of `{title, description}`.
pub fn parse_step_stubs(raw: &str) -> Result<Vec<StepStub>, DecompositionError> {
    let text = strip_code_fence(raw.trim());
    let stubs: Vec<WireStub> = serde_json::from_str(text)
        .map_err(|e| DecompositionError::Malformed(format!("expected a JSON array of steps: {}", e)))?;
    if stubs.is_empty() {
        return Err(DecompositionError::Malformed("the response contained no steps".into()));
    }
    Ok(stubs
        .into_iter()
        .map(|s| StepStub { title: s.title.trim().to_string(), description: s.description.trim().to_string() })
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else { return text };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_well_formed_arrays() {
        let stubs = parse_step_stubs(r#"[{"title":" Intake ","description":"Raw water enters."},{"title":"Screening","description":"Debris removed."}]"#).unwrap();
        assert_eq!(
            stubs,
            vec![
                StepStub { title: "Intake".into(), description: "Raw water enters.".into() },
                StepStub { title: "Screening".into(), description: "Debris removed.".into() },
            ]
        );
    }

    #[test]
    fn tolerates_fenced_json() {
        let stubs = parse_step_stubs("```json\n[{\"title\":\"A\",\"description\":\"B\"}]\n```").unwrap();
        assert_eq!(stubs.len(), 1);
    }

    #[test]
    fn rejects_wrong_shapes() {
        for raw in [
            r#"{"title":"A","description":"B"}"#,
            r#"[{"title":"A"}]"#,
            r#"[{"title":1,"description":"B"}]"#,
            "[]",
            "Here are your steps: 1. Intake",
        ] {
            assert!(matches!(parse_step_stubs(raw), Err(DecompositionError::Malformed(_))), "accepted {raw}");
        }
    }

    #[test]
    fn api_key_is_redacted_and_trimmed() {
        let key = ApiKey::new("  AIzaSecret ").unwrap();
        assert_eq!(key.expose(), "AIzaSecret");
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
        assert!(ApiKey::new("   ").is_none());
    }
}
