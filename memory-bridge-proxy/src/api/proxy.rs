use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, header},
    response::Response,
};
use memory_bridge::{OutgoingRequest, RequestKind};
use tracing::{debug, error};

use crate::core::state::AppState;
use crate::models::error::{ApiError, ApiResult};

// Connection-level headers that must not be forwarded
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHORIZATION,
];

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out.remove("keep-alive");
    out
}

/// Forward any request to the upstream chat provider, enriching chat
/// submissions on the way out and mirroring event streams on the way back
pub async fn forward(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream.base, path_and_query);

    let body = axum::body::to_bytes(body, state.upstream.max_body_bytes)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {e}")))?;

    let outgoing = state
        .session
        .intercept(OutgoingRequest {
            kind: RequestKind::Fetch,
            method: parts.method.to_string(),
            url: url.clone(),
            body: (!body.is_empty()).then_some(body),
        })
        .await;

    debug!("Forwarding {} {}", parts.method, url);
    let mut upstream = state
        .upstream
        .client
        .request(parts.method.clone(), &url)
        .headers(forwardable(&parts.headers));
    if let Some(body) = outgoing.body {
        upstream = upstream.body(body);
    }

    let response = upstream.send().await.map_err(|e| {
        error!("Upstream request to {} failed: {}", url, e);
        ApiError::Upstream(e.to_string())
    })?;

    let status = response.status();
    let headers = forwardable(response.headers());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    let stream = state.session.interceptor().mirror_response(
        &url,
        content_type.as_deref(),
        response.bytes_stream(),
    );

    let mut builder = Response::builder().status(status);
    if let Some(target) = builder.headers_mut() {
        target.extend(headers);
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
