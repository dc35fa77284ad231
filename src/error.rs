use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompositionError {
    #[error("request failed: {0}")] Transport(String),
    #[error("malformed provider response: {0}")] Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")] Transport(String),
    #[error("no image was returned")] NoImage,
    #[error("no narration text was returned")] NoScript,
    #[error("malformed provider response: {0}")] Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WizardError {
    #[error("Please enter and save your Gemini API key before proceeding.")]
    MissingCredential,
    #[error("Failed to decompose the process: {0}")]
    Decomposition(#[from] DecompositionError),
    #[error("An error occurred during generation for this step. You can try again.")]
    Generation(#[from] GenerationError),
    #[error("{0}")]
    Validation(String),
    #[error("step index {index} is out of range for {len} steps")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("cannot {action} while {stage}")]
    InvalidAction { action: &'static str, stage: &'static str },
    #[error("could not export results: {0}")]
    Export(String),
}

impl WizardError {
    pub fn kind(&self) -> &'static str {
        match self {
            WizardError::MissingCredential => "missing_credential",
            WizardError::Decomposition(_) => "decomposition",
            WizardError::Generation(_) => "generation",
            WizardError::Validation(_) => "validation",
            WizardError::IndexOutOfRange { .. } => "index_out_of_range",
            WizardError::InvalidAction { .. } => "invalid_action",
            WizardError::Export(_) => "export",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            WizardError::MissingCredential => StatusCode::UNAUTHORIZED,
            WizardError::Decomposition(_) | WizardError::Generation(_) => StatusCode::BAD_GATEWAY,
            WizardError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WizardError::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
            WizardError::InvalidAction { .. } => StatusCode::CONFLICT,
            WizardError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WizardError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "kind": self.kind(), "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_message_hides_provider_detail() {
        let err = WizardError::from(GenerationError::Transport("status=503 body={\"error\":{}}".into()));
        assert_eq!(err.to_string(), "An error occurred during generation for this step. You can try again.");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn export_failures_are_server_errors() {
        let err = WizardError::Export("font missing".into());
        assert_eq!(err.kind(), "export");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
