use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, warn};

pub async fn handle_errors(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        error!(
            "Server error: {} {} - Status: {} - Duration: {:?}",
            method, path, status, elapsed
        );
    } else if status.is_client_error() && status != StatusCode::NOT_FOUND {
        warn!(
            "Client error: {} {} - Status: {} - Duration: {:?}",
            method, path, status, elapsed
        );
    }

    response
}
