use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    error::{DecompositionError, WizardError},
    gemini::preview,
    models::{Complexity, RunSettings, VisualizationStyle},
    orchestrator::generate_assets,
    pdf::generate_pdf,
    provider::{BackendConnector, DescriptionProvider},
    repository::StepField,
    results::export_png,
    session::{PendingAssets, Session},
};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<Session>>,
    pub connector: Arc<dyn BackendConnector>,
}

impl AppState {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self { session: Arc::default(), connector }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/catalog", get(catalog))
        .route("/api/session", get(get_session))
        .route("/api/key", post(set_key).delete(clear_key))
        .route("/api/decompose", post(decompose))
        .route("/api/steps/insert", post(insert_step))
        .route("/api/steps/confirm", post(confirm_steps))
        .route("/api/steps/:index", put(update_step).delete(remove_step))
        .route("/api/generation", get(get_generation))
        .route("/api/generation/regenerate", post(regenerate))
        .route("/api/generation/approve", post(approve))
        .route("/api/results", get(get_results))
        .route("/api/results/pdf", get(export_results_pdf))
        .route("/api/results/:index/image", get(download_image))
        .route("/api/restart", post(restart))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StepUpdate {
    pub field: StepField,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct InsertRequest {
    #[serde(default)]
    pub after: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub attempt: Option<u32>,
}

pub async fn catalog() -> Json<Value> {
    let styles: Vec<Value> = VisualizationStyle::ALL
        .iter()
        .map(|s| json!({ "value": s, "label": s.label(), "description": s.summary() }))
        .collect();
    let complexities: Vec<Value> = Complexity::ALL
        .iter()
        .map(|c| json!({ "value": c, "stepRange": c.step_range_label(), "targetSteps": c.target_step_count() }))
        .collect();
    Json(json!({ "styles": styles, "complexities": complexities }))
}

pub async fn get_session(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.session.lock().view()))
}

pub async fn set_key(State(state): State<AppState>, Json(body): Json<KeyRequest>) -> Result<Json<Value>, WizardError> {
    let mut session = state.session.lock();
    session.set_api_key(&body.api_key)?;
    Ok(Json(json!(session.view())))
}

pub async fn clear_key(State(state): State<AppState>) -> Result<Json<Value>, WizardError> {
    let mut session = state.session.lock();
    session.clear_api_key()?;
    Ok(Json(json!(session.view())))
}

pub async fn decompose(State(state): State<AppState>, Json(settings): Json<RunSettings>) -> Result<Json<Value>, WizardError> {
    tracing::info!("🚀 Decomposing process for project: {}", settings.project_title);
    let (ticket, key, request) = state.session.lock().begin_decomposition(settings)?;

    // Finish on a task so a dropped client connection cannot leave the session stuck mid-decomposition
    let backend = state.connector.connect(&key);
    let session = state.session.clone();
    let task = tokio::spawn(async move {
        let outcome = backend.decompose(&request).await;
        let mut session = session.lock();
        session.finish_decomposition(ticket, outcome)?;
        Ok::<_, WizardError>(json!(session.view()))
    });
    let view = match task.await {
        Ok(outcome) => outcome?,
        Err(e) => {
            tracing::error!("❌ Decomposition task failed: {}", e);
            state.session.lock().abandon_decomposition(ticket);
            return Err(WizardError::Decomposition(DecompositionError::Transport(e.to_string())));
        }
    };
    Ok(Json(view))
}

pub async fn update_step(
    Path(index): Path<usize>,
    State(state): State<AppState>,
    Json(body): Json<StepUpdate>,
) -> Result<Json<Value>, WizardError> {
    let mut session = state.session.lock();
    let step = session.update_step(index, body.field, body.value)?;
    Ok(Json(json!(step)))
}

pub async fn insert_step(State(state): State<AppState>, body: Option<Json<InsertRequest>>) -> Result<Json<Value>, WizardError> {
    let after = body.map(|Json(b)| b.after).unwrap_or_default();
    let mut session = state.session.lock();
    session.insert_step(after)?;
    Ok(Json(json!(session.view())))
}

pub async fn remove_step(Path(index): Path<usize>, State(state): State<AppState>) -> Result<Json<Value>, WizardError> {
    let mut session = state.session.lock();
    session.remove_step(index)?;
    Ok(Json(json!(session.view())))
}

pub async fn confirm_steps(State(state): State<AppState>) -> Result<Json<Value>, WizardError> {
    let (pending, view) = {
        let mut session = state.session.lock();
        let pending = session.confirm_steps()?;
        (pending, json!(session.generation_view()))
    };
    if let Some(pending) = pending {
        spawn_generation(&state, pending);
    }
    Ok(Json(view))
}

pub async fn get_generation(State(state): State<AppState>) -> Result<Json<Value>, WizardError> {
    let session = state.session.lock();
    let view = session
        .generation_view()
        .ok_or(WizardError::InvalidAction { action: "show generation progress", stage: session.stage().name() })?;
    Ok(Json(json!(view)))
}

pub async fn regenerate(State(state): State<AppState>) -> Result<Json<Value>, WizardError> {
    let (pending, view) = {
        let mut session = state.session.lock();
        let pending = session.regenerate()?;
        (pending, json!(session.generation_view()))
    };
    spawn_generation(&state, pending);
    Ok(Json(view))
}

pub async fn approve(State(state): State<AppState>, body: Option<Json<ApproveRequest>>) -> Result<Json<Value>, WizardError> {
    let attempt = body.and_then(|Json(b)| b.attempt);
    let (pending, view) = {
        let mut session = state.session.lock();
        let pending = session.approve(attempt)?;
        (pending, json!(session.generation_view()))
    };
    if let Some(pending) = pending {
        spawn_generation(&state, pending);
    }
    Ok(Json(view))
}

/// Runs one attempt in the background and feeds the outcome back into the session.
fn spawn_generation(state: &AppState, pending: PendingAssets) {
    let session = state.session.clone();
    let ticket = pending.request.ticket;
    let backend = state.connector.connect(&pending.key);
    tokio::spawn(async move {
        let outcome = generate_assets(&*backend, &pending.request).await;
        if let Ok(assets) = &outcome {
            tracing::info!("✅ Step {} assets ready: {}", ticket.index + 1, preview(&assets.image_base64));
        }
        session.lock().resolve(pending.run, ticket, outcome);
    });
}

pub async fn get_results(State(state): State<AppState>) -> Json<Value> {
    let session = state.session.lock();
    let settings = session.settings();
    Json(json!({
        "projectTitle": settings.map(|s| s.project_title.as_str()),
        "projectDescription": settings.map(|s| s.project_description.as_str()),
        "results": session.results(),
    }))
}

pub async fn download_image(Path(index): Path<usize>, State(state): State<AppState>) -> Result<Response, WizardError> {
    let download = export_png(state.session.lock().results(), index)?;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok((StatusCode::OK, headers, download.bytes).into_response())
}

pub async fn export_results_pdf(State(state): State<AppState>) -> Result<Response, WizardError> {
    let pdf_bytes = {
        let session = state.session.lock();
        let settings = session
            .settings()
            .filter(|_| !session.results().is_empty())
            .ok_or(WizardError::InvalidAction { action: "export a storyboard", stage: session.stage().name() })?;
        generate_pdf(settings, session.results())?
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"process_storyboard.pdf\""));
    Ok((StatusCode::OK, headers, pdf_bytes).into_response())
}

pub async fn restart(State(state): State<AppState>) -> Json<Value> {
    let mut session = state.session.lock();
    session.restart();
    Json(json!(session.view()))
}
