use axum::{Json, extract::State, http::StatusCode};
use memory_bridge::{SUPPORTED_APPS, is_supported_chat_url};
use tracing::info;

use crate::core::state::AppState;
use crate::models::bridge::{
    CredentialRequest, HealthResponse, MemoryToggleBody, OkResponse, PendingContext, SaveRequest,
    SaveResponse,
};
use crate::models::error::{ApiError, ApiResult};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        worker_alive: state.runtime.is_worker_alive(),
        evictions: state.runtime.eviction_count(),
        providers: state.session.interceptor().providers().names(),
        pending: state
            .session
            .bridge()
            .pending_requests()
            .into_iter()
            .map(|pending| PendingContext {
                id: pending.id.to_string(),
                state: pending.state(),
                age_ms: pending.created_at.elapsed().as_millis(),
                query: pending.query,
            })
            .collect(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

pub async fn set_credential(
    State(state): State<AppState>,
    Json(request): Json<CredentialRequest>,
) -> ApiResult<Json<OkResponse>> {
    state.profile.set_api_key(&request.api_key).await?;
    info!("API key saved");
    Ok(Json(OkResponse { ok: true }))
}

pub async fn clear_credential(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.profile.clear_api_key().await?;
    info!("API key cleared");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_memory(State(state): State<AppState>) -> ApiResult<Json<MemoryToggleBody>> {
    let enabled = state.profile.memory_enabled().await?;
    Ok(Json(MemoryToggleBody { enabled }))
}

pub async fn set_memory(
    State(state): State<AppState>,
    Json(request): Json<MemoryToggleBody>,
) -> ApiResult<Json<MemoryToggleBody>> {
    state.session.set_memory_enabled(request.enabled).await?;
    info!("Memory {}", if request.enabled { "enabled" } else { "disabled" });
    Ok(Json(MemoryToggleBody {
        enabled: request.enabled,
    }))
}

pub async fn save(
    State(state): State<AppState>,
    Json(request): Json<SaveRequest>,
) -> ApiResult<Json<SaveResponse>> {
    if !is_supported_chat_url(&request.url) {
        return Err(ApiError::BadRequest(format!(
            "Please open a {SUPPORTED_APPS} conversation first!"
        )));
    }

    let ack = match request.memory_id.as_deref().map(str::trim) {
        Some(memory_id) if !memory_id.is_empty() => {
            let contents = request
                .transcript
                .iter()
                .map(|entry| entry.to_content_item())
                .collect();
            state.saver.save(memory_id, contents).await?
        },
        _ => {
            state
                .saver
                .save_transcript(&request.url, &request.transcript)
                .await?
        },
    };

    Ok(Json(SaveResponse {
        ok: true,
        memory_id: ack.memory_id,
        count: ack.count,
    }))
}
