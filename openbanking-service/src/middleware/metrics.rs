use axum::{extract::Request, middleware::Next, response::Response};

use crate::services::metrics::record_http_request;

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();

    let response = next.run(req).await;

    record_http_request(&method, response.status().as_str());

    response
}
