use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Tag every request with an id, reusing the caller's when it is valid
pub async fn add_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        });

    req.headers_mut()
        .insert(X_REQUEST_ID.clone(), request_id.clone());

    let span = tracing::debug_span!(
        "request",
        id = request_id.to_str().unwrap_or_default()
    );
    let mut response = next.run(req).instrument(span).await;

    response
        .headers_mut()
        .insert(X_REQUEST_ID.clone(), request_id);

    response
}
