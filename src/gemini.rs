use std::{io::Cursor, sync::Arc};

use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::{GeminiConfig, ImageBackend},
    error::{DecompositionError, GenerationError},
    models::{ProcessStep, StepStub, VisualizationStyle},
    prompts::{self, IMAGE_ASPECT_RATIO},
    provider::{parse_step_stubs, ApiKey, AssetGenerator, BackendConnector, DecompositionRequest, DescriptionProvider, GenAiBackend},
};

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("Other: {0}")] Other(String),
}

impl From<GeminiError> for DecompositionError {
    fn from(e: GeminiError) -> Self {
        match e {
            GeminiError::Http(msg) => DecompositionError::Transport(msg),
            GeminiError::Other(msg) => DecompositionError::Malformed(msg),
        }
    }
}

impl From<GeminiError> for GenerationError {
    fn from(e: GeminiError) -> Self {
        match e {
            GeminiError::Http(msg) => GenerationError::Transport(msg),
            GeminiError::Other(msg) => GenerationError::Malformed(msg),
        }
    }
}

// Shortens base64 blobs so request/response bodies stay readable in logs
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let is_blob_key = key == "data" || key == "bytesBase64Encoded";
                match val {
                    Value::String(s) if is_blob_key && s.len() > 100 && s.is_ascii() => {
                        *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                    }
                    _ => truncate_base64_in_json(val),
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(body: &Value) -> String {
    let mut copy = body.clone();
    truncate_base64_in_json(&mut copy);
    serde_json::to_string(&copy).unwrap_or_default()
}

pub(crate) fn preview(data: &str) -> String {
    match data.char_indices().nth(50) {
        Some((cut, _)) => format!("{}...[{} chars total]", &data[..cut], data.len()),
        None => data.to_string(),
    }
}

/// Hands out clients that share one connection pool but carry the session's key.
#[derive(Clone)]
pub struct GeminiConnector {
    client: Client,
    config: GeminiConfig,
}

impl GeminiConnector {
    pub fn new(config: GeminiConfig) -> Self { Self { client: Client::new(), config } }
}

impl BackendConnector for GeminiConnector {
    fn connect(&self, key: &ApiKey) -> Arc<dyn GenAiBackend> {
        Arc::new(GeminiClient { client: self.client.clone(), api_key: key.clone(), config: self.config.clone() })
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: ApiKey,
    config: GeminiConfig,
}

impl GeminiClient {
    async fn perform_api_call(&self, model: &str, method: &str, body: &Value) -> Result<String, GeminiError> {
        let url = format!("{}/models/{}:{}?key={}", self.config.base_url, model, method, self.api_key.expose());
        info!("🔗 Making request to: {}", url.replace(self.api_key.expose(), "***"));
        debug!("📤 Request body: {}", loggable(body));

        let response = self.client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GeminiError::Http(e.to_string().replace(self.api_key.expose(), "***")))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return Err(GeminiError::Http(format!("status={} body={}", status, error_body)));
        }

        let response_text = response.text().await.map_err(|e| GeminiError::Http(e.to_string()))?;
        if let Ok(parsed) = serde_json::from_str::<Value>(&response_text) {
            debug!("📥 Raw Gemini API response: {}", loggable(&parsed));
        }
        Ok(response_text)
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<GeminiResponse, GeminiError> {
        let text = self.perform_api_call(model, "generateContent", body).await?;
        serde_json::from_str(&text).map_err(|e| GeminiError::Other(format!("parse error: {}", e)))
    }

    async fn generate_text(&self, body: &Value) -> Result<String, GeminiError> {
        let parsed = self.generate_content(&self.config.text_model, body).await?;
        extract_first_text(&parsed).ok_or_else(|| GeminiError::Other("no text content found in response".into()))
    }

    async fn imagen_predict(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": IMAGE_ASPECT_RATIO,
                "outputOptions": { "mimeType": "image/png" }
            }
        });
        let text = self.perform_api_call(&self.config.image_model, "predict", &body).await?;
        let parsed: PredictResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("parse error: {}", e)))?;
        parsed
            .predictions
            .into_iter()
            .find_map(|p| p.bytes_base64_encoded)
            .ok_or(GenerationError::NoImage)
    }

    async fn gemini_image(&self, prompt: &str, previous_image: Option<&str>) -> Result<String, GenerationError> {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(reference) = previous_image {
            parts.push(json!({ "inlineData": { "mimeType": "image/png", "data": reference } }));
        }
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": IMAGE_ASPECT_RATIO },
                "temperature": 0.4,
                "candidateCount": 1
            }
        });
        let parsed = self.generate_content(&self.config.image_model, &body).await?;
        extract_first_image_b64(&parsed).ok_or(GenerationError::NoImage)
    }
}

#[async_trait]
impl DescriptionProvider for GeminiClient {
    async fn decompose(&self, request: &DecompositionRequest) -> Result<Vec<StepStub>, DecompositionError> {
        let prompt = prompts::build_decomposition_prompt(&request.description, request.complexity);
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(image) = &request.image {
            parts.push(json!({ "inlineData": { "mimeType": image.mime_type, "data": image.base64 } }));
        }
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "title": { "type": "STRING" },
                            "description": { "type": "STRING" }
                        },
                        "required": ["title", "description"]
                    }
                }
            }
        });

        info!("🧩 Decomposing process into {} steps", request.complexity.target_step_count());
        let text = self.generate_text(&body).await?;
        let stubs = parse_step_stubs(&text).map_err(|e| {
            error!("❌ Failed to parse Gemini response: {}", text);
            e
        })?;
        info!("✅ Decomposition returned {} steps", stubs.len());
        Ok(stubs)
    }
}

#[async_trait]
impl AssetGenerator for GeminiClient {
    async fn generate_image(
        &self,
        step: &ProcessStep,
        style: VisualizationStyle,
        previous_image: Option<&str>,
    ) -> Result<String, GenerationError> {
        let prompt = prompts::build_image_prompt(step, style, previous_image.is_some());
        info!("🎨 Generating {} image for '{}' via {:?}", style.label(), step.title, self.config.image_backend);

        let raw = match self.config.image_backend {
            ImageBackend::Imagen => self.imagen_predict(&prompt).await,
            ImageBackend::Gemini => self.gemini_image(&prompt, previous_image).await,
        };
        let image_data = raw.map_err(|e| {
            error!("❌ Failed to generate image for '{}': {}", step.title, e);
            e
        })?;
        let png = ensure_png(&image_data)?;
        info!("✅ Successfully generated image: {}", preview(&png));
        Ok(png)
    }

    async fn generate_script(&self, step: &ProcessStep) -> Result<String, GenerationError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompts::build_script_prompt(step) }] }]
        });
        let script = self.generate_text(&body).await?.trim().to_string();
        if script.is_empty() {
            return Err(GenerationError::NoScript);
        }
        info!("✅ Narration for '{}' generated ({} chars)", step.title, script.len());
        Ok(script)
    }
}

/// Accepts the provider's image only if it decodes to a known format; anything
/// that is not PNG already is re-encoded so exports stay PNG.
fn ensure_png(image_data: &str) -> Result<String, GenerationError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let raw = engine
        .decode(image_data.trim())
        .map_err(|e| GenerationError::Malformed(format!("image payload is not base64: {}", e)))?;
    let format = image::guess_format(&raw)
        .map_err(|_| GenerationError::Malformed("image payload is not a recognised image".into()))?;
    if format == ImageFormat::Png {
        return Ok(image_data.trim().to_string());
    }

    warn!("⚠️ Provider returned {:?}, re-encoding as PNG", format);
    let decoded = image::load_from_memory_with_format(&raw, format)
        .map_err(|e| GenerationError::Malformed(format!("could not decode {:?} image: {}", format, e)))?;
    let mut png = Cursor::new(Vec::new());
    decoded
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| GenerationError::Malformed(format!("could not re-encode image as PNG: {}", e)))?;
    Ok(engine.encode(png.into_inner()))
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
}

fn extract_first_image_b64(resp: &GeminiResponse) -> Option<String> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                return Some(inline_data.data.clone());
            }
        }
    }
    warn!("⚠️ No inline image data found in response structure");
    None
}

fn extract_first_text(resp: &GeminiResponse) -> Option<String> {
    resp.candidates
        .iter()
        .flat_map(|c| c.content.parts.iter())
        .find_map(|p| match p {
            Part::Text { text } => Some(text.clone()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn extracts_text_and_inline_image_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"text":"Here is the diagram"},
            {"inlineData":{"mimeType":"image/png","data":"iVBORw0KGgo="}}
        ]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_first_text(&parsed).as_deref(), Some("Here is the diagram"));
        assert_eq!(extract_first_image_b64(&parsed).as_deref(), Some("iVBORw0KGgo="));
    }

    #[test]
    fn empty_candidates_yield_nothing() {
        let parsed: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(extract_first_text(&parsed).is_none());
        assert!(extract_first_image_b64(&parsed).is_none());
        let predict: PredictResponse = serde_json::from_str("{}").unwrap();
        assert!(predict.predictions.is_empty());
    }

    #[test]
    fn png_payloads_pass_through() {
        assert_eq!(ensure_png(PNG_1X1).unwrap(), PNG_1X1);
    }

    #[test]
    fn non_image_payloads_are_rejected() {
        assert!(matches!(ensure_png("aGVsbG8gd29ybGQ="), Err(GenerationError::Malformed(_))));
        assert!(matches!(ensure_png("%%%"), Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn log_truncation_hides_blobs() {
        let blob = "A".repeat(400);
        let body = json!({ "contents": [{ "parts": [{ "inlineData": { "data": blob } }] }], "predictions": [{ "bytesBase64Encoded": blob }] });
        let line = loggable(&body);
        assert!(line.contains("[truncated 350 chars]"));
        assert!(!line.contains(&blob));
    }

    #[test]
    fn gemini_errors_map_onto_domain_errors() {
        assert_eq!(GenerationError::from(GeminiError::Http("status=403".into())), GenerationError::Transport("status=403".into()));
        assert_eq!(DecompositionError::from(GeminiError::Other("parse".into())), DecompositionError::Malformed("parse".into()));
    }
}
