use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Longest client-supplied request id that is propagated as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request id attached to request extensions by [`request_id`].
#[derive(Debug, Clone)]
pub struct RequestId(pub HeaderValue);

impl RequestId {
    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or("")
    }
}

// Ensures each request has an X-Request-Id and mirrors it on the response
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    // Keep a well-formed incoming id; otherwise generate one
    let value = req
        .headers()
        .get(&REQUEST_ID)
        .filter(|v| is_acceptable_request_id(v))
        .cloned()
        .unwrap_or_else(generate_request_id);

    req.extensions_mut().insert(RequestId(value.clone()));

    let mut res = next.run(req).await;
    res.headers_mut().insert(REQUEST_ID.clone(), value);
    res
}

fn generate_request_id() -> HeaderValue {
    HeaderValue::try_from(Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

fn is_acceptable_request_id(value: &HeaderValue) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_REQUEST_ID_LEN
        && bytes.iter().all(|b| b.is_ascii_graphic())
}

/// Path safe to write into logs: control characters are dropped.
pub fn sanitize_path(path: &str) -> String {
    path.chars().filter(|c| !c.is_control()).collect()
}
