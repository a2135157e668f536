//! External Interface Shim (C6): the HTTP surface over the Session
//! Orchestrator. Thin by design — every handler just validates its input
//! shape and hands off to [`Orchestrator`]; all policy (liveness,
//! collisions, keystroke timing) lives there.

use std::sync::Arc;

use axum::extract::{Multipart, Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mime::{IMAGE_JPEG, IMAGE_PNG};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agents::AgentKind;
use crate::error::CoreError;
use crate::html::terminal_to_html;
use crate::orchestrator::{Orchestrator, SessionInfo};

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/api/v1/sessions/slash-commands", get(list_slash_commands))
        .route("/api/v1/sessions/recent-dirs", get(list_recent_dirs))
        .route("/api/v1/sessions/{session_id}", get(get_session).delete(kill_session))
        .route("/api/v1/sessions/{session_id}/input", post(send_input))
        .route("/api/v1/sessions/{session_id}/select", post(send_selection))
        .route("/api/v1/sessions/{session_id}/debug", post(debug_session))
        .route("/api/v1/sessions/{session_id}/image", post(paste_image))
        .route("/api/v1/sessions/{session_id}/output", get(get_output))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

fn core_error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::BadInput(_) => StatusCode::BAD_REQUEST,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "internal error");
    }
    (status, Json(ErrorBody { detail: err.to_string() })).into_response()
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    working_dir: String,
    agent_type: String,
    title: Option<String>,
}

async fn create_session(
    State(orch): State<Arc<Orchestrator>>,
    Json(body): Json<CreateSessionRequest>,
) -> Response {
    let kind = match AgentKind::from_str_opt(&body.agent_type) {
        Some(k) => k,
        None => {
            return core_error_response(CoreError::BadInput(format!(
                "unknown agent_type '{}'",
                body.agent_type
            )))
        }
    };
    match orch
        .create_session(kind, &body.working_dir, body.title.as_deref())
        .await
    {
        Ok(info) => (StatusCode::CREATED, Json(info)).into_response(),
        Err(err) => core_error_response(err),
    }
}

async fn list_sessions(State(orch): State<Arc<Orchestrator>>) -> Json<Vec<SessionInfo>> {
    Json(orch.list_sessions())
}

#[derive(Deserialize)]
struct SlashCommandsQuery {
    session_id: Option<String>,
}

#[derive(Serialize)]
struct SlashCommandView {
    text: &'static str,
    enter: bool,
    confirm: bool,
    nav: bool,
}

async fn list_slash_commands(
    State(orch): State<Arc<Orchestrator>>,
    Query(q): Query<SlashCommandsQuery>,
) -> Json<Vec<SlashCommandView>> {
    let kind = q
        .session_id
        .as_deref()
        .map(AgentKind::from_session_id)
        .unwrap_or(AgentKind::Claude);
    let commands = orch
        .slash_commands(kind)
        .iter()
        .map(|c| SlashCommandView {
            text: c.text,
            enter: c.send_enter,
            confirm: c.need_confirmation,
            nav: c.show_nav,
        })
        .collect();
    Json(commands)
}

async fn list_recent_dirs(State(orch): State<Arc<Orchestrator>>) -> Json<Vec<String>> {
    Json(orch.recent_dirs().await)
}

async fn get_session(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
) -> Response {
    match orch.get_session(&session_id) {
        Ok(info) => Json(info).into_response(),
        Err(err) => core_error_response(err),
    }
}

#[derive(Deserialize)]
struct SendInputRequest {
    text: String,
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

async fn send_input(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
    Json(body): Json<SendInputRequest>,
) -> Response {
    match orch.send_input(&session_id, &body.text).await {
        Ok(()) => Json(StatusBody { status: "sent" }).into_response(),
        Err(err) => core_error_response(err),
    }
}

#[derive(Deserialize)]
struct SendSelectionRequest {
    item_number: u32,
    freeform_text: Option<String>,
}

async fn send_selection(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
    Json(body): Json<SendSelectionRequest>,
) -> Response {
    match orch
        .send_selection(&session_id, body.item_number, body.freeform_text.as_deref())
        .await
    {
        Ok(()) => Json(StatusBody { status: "selected" }).into_response(),
        Err(err) => core_error_response(err),
    }
}

#[derive(Deserialize)]
struct DebugRequest {
    #[serde(default)]
    description: String,
}

async fn debug_session(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
    Json(body): Json<DebugRequest>,
) -> Response {
    match orch.debug_session(&session_id, &body.description).await {
        Ok(info) => (StatusCode::CREATED, Json(info)).into_response(),
        Err(err) => core_error_response(err),
    }
}

async fn paste_image(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
    mut multipart: Multipart,
) -> Response {
    let field = match multipart.next_field().await {
        Ok(Some(f)) => f,
        Ok(None) => {
            return core_error_response(CoreError::BadInput("missing image file".to_string()))
        }
        Err(err) => {
            return core_error_response(CoreError::BadInput(format!("invalid upload: {err}")))
        }
    };
    let content_type: mime::Mime = match field.content_type().unwrap_or("").parse() {
        Ok(m) => m,
        Err(_) => {
            return core_error_response(CoreError::BadInput(
                "unrecognized content type".to_string(),
            ))
        }
    };
    let ext = if content_type == IMAGE_PNG {
        "png"
    } else if content_type == IMAGE_JPEG {
        "jpg"
    } else {
        return core_error_response(CoreError::BadInput(format!(
            "unsupported image type: {content_type}"
        )));
    };
    let data = match field.bytes().await {
        Ok(d) => d,
        Err(err) => {
            return core_error_response(CoreError::BadInput(format!("failed to read upload: {err}")))
        }
    };

    let tmp_file = match write_paste_tempfile(ext, &data) {
        Ok(f) => f,
        Err(err) => return core_error_response(CoreError::Internal(err)),
    };

    // Pasting an image is just sending its path as a literal line; most
    // terminal agents treat an `@`-prefixed path as an attachment.
    let result = orch
        .send_input(&session_id, &format!("@{}", tmp_file.path().display()))
        .await;

    match result {
        Ok(()) => Json(StatusBody { status: "pasted" }).into_response(),
        Err(err) => core_error_response(err),
    }
}

/// Stage an uploaded image under a named temp file; dropped (and thus
/// deleted) once the handler returns.
fn write_paste_tempfile(ext: &str, data: &[u8]) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::Builder::new()
        .prefix("agentdeck-paste-")
        .suffix(&format!(".{ext}"))
        .tempfile()?;
    std::io::Write::write_all(&mut tmp, data)?;
    Ok(tmp)
}

async fn kill_session(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
) -> Response {
    let info = match orch.get_session(&session_id) {
        Ok(info) => info,
        Err(err) => return core_error_response(err),
    };
    if info.is_alive {
        match orch.kill_session(&session_id).await {
            Ok(()) => Json(StatusBody { status: "killed" }).into_response(),
            Err(err) => core_error_response(err),
        }
    } else {
        match orch.remove_dead_session(&session_id) {
            Ok(()) => Json(StatusBody { status: "removed" }).into_response(),
            Err(err) => core_error_response(err),
        }
    }
}

#[derive(Deserialize)]
struct OutputQuery {
    #[serde(default)]
    force: bool,
    #[serde(default = "default_mode")]
    mode: String,
    before: Option<f64>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_mode() -> String {
    "live".to_string()
}

fn default_limit() -> usize {
    50
}

async fn get_output(
    State(orch): State<Arc<Orchestrator>>,
    AxPath(session_id): AxPath<String>,
    Query(q): Query<OutputQuery>,
) -> Response {
    if q.mode == "history" {
        return get_history(orch, session_id, q.before, q.limit).await;
    }

    let info = match orch.get_session(&session_id) {
        Ok(info) => info,
        Err(err) => return core_error_response(err),
    };
    if !info.is_alive {
        return Html("<div class=\"text-center text-base-content/50 py-8\">Session ended</div>")
            .into_response();
    }

    let (content, changed) = match orch.capture_output(&session_id) {
        Ok(result) => result,
        Err(err) => return core_error_response(err),
    };

    if !q.force && !changed {
        return StatusCode::NO_CONTENT.into_response();
    }

    let safe_content = terminal_to_html(&content);
    let parsed = crate::detector::parse(&content);

    if let Some(auto_response) = &parsed.auto_response {
        info!(session_id, response = %auto_response, "auto_response");
        if let Err(err) = orch.send_input(&session_id, auto_response).await {
            warn!(session_id, error = %err, "auto_response failed");
        }
    }

    let state_json = serde_json::to_string(&parsed).unwrap_or_default();
    let escaped_state = state_json
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let html_str = format!(
        "<pre id=\"terminal-output\">{safe_content}</pre>\
         <div id=\"ui-state-data\" hx-swap-oob=\"true\" data-state=\"{escaped_state}\" style=\"display:none\"></div>"
    );

    Html(html_str).into_response()
}

async fn get_history(
    orch: Arc<Orchestrator>,
    session_id: String,
    before: Option<f64>,
    limit: usize,
) -> Response {
    let limit = limit.min(200);
    match orch.output_log().read(&session_id, before, limit) {
        Ok(page) => {
            let chunks: Vec<_> = page
                .chunks
                .iter()
                .map(|c| serde_json::json!({ "ts": c.ts, "content": terminal_to_html(&c.content) }))
                .collect();
            Json(serde_json::json!({ "chunks": chunks, "earliest_ts": page.earliest_ts }))
                .into_response()
        }
        Err(err) => core_error_response(CoreError::Internal(err)),
    }
}
