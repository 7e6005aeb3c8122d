//! Stateless helpers for HTTP request processing.

use axum::http::HeaderMap;

use crate::api::error::ApiError;

/// Header carrying the caller's API key, when they have one.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Identity used for callers without an API key.
pub const ANONYMOUS: &str = "anonymous";

/// Parses and validates a Content-Type header for application/json.
///
/// Accepts `application/json` with or without parameters; rejects lookalikes
/// such as `application/jsonp`, `application/json-patch+json` and `text/json`.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(ApiError::InvalidPayload(format!(
            "Content-Type must be application/json, got: {}/{}",
            media_type.type_(),
            media_type.subtype()
        )));
    }

    Ok(media_type)
}

/// Validates that body size does not exceed the maximum allowed size.
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}

/// API key from the request headers, if present and non-empty.
pub fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .filter(|value| !value.is_empty())
}

/// Caller identity for ownership and cache variance: the API key when one is
/// presented, a shared anonymous identity otherwise.
pub fn caller_identity(headers: &HeaderMap) -> String {
    api_key(headers).unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Best-effort client IP: first entry of `X-Forwarded-For` when present.
///
/// Falls back to the value recorded by the connect-info middleware, then to a
/// shared "unknown" bucket so the limiter still applies behind broken proxies.
pub fn client_ip(headers: &HeaderMap, peer: Option<std::net::SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("X-Forwarded-For")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
