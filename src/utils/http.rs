//! HTTP utility functions

use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use hyper::{Body, HeaderMap, Response, StatusCode, Version};
use std::collections::HashMap;
use tracing::debug;

/// Decode a query string into multi-valued parameters
pub fn parse_query(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_default().push(value.into_owned());
    }

    debug!("Decoded {} query parameters", params.len());
    params
}

/// HTTP/1.1 defaults to keep-alive, HTTP/1.0 needs it spelled out
pub fn is_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let connection = headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase());

    match connection.as_deref() {
        Some(value) if value.contains("close") => false,
        Some(value) if value.contains("keep-alive") => true,
        _ => version != Version::HTTP_10,
    }
}

/// Build a JSON response with the given status
pub fn build_json_response(status: StatusCode, body: impl Into<Body>, keep_alive: bool) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    set_connection_header(&mut response, keep_alive);
    response
}

/// Build error response
pub fn build_error_response(status: StatusCode, message: &str, keep_alive: bool) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    set_connection_header(&mut response, keep_alive);
    response
}

fn set_connection_header(response: &mut Response<Body>, keep_alive: bool) {
    let value = if keep_alive { "keep-alive" } else { "close" };
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static(value));
}
