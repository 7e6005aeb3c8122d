//! Request-path middleware: tiered rate limiting and response caching.
//!
//! Both are applied ahead of routing so every endpoint gets the same
//! treatment; per-path opt-outs come from configuration, not from handlers.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Duration;
use http_body_util::BodyExt;
use std::net::SocketAddr;
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;
use super::utils;
use crate::cache::{CacheEntry, HeadersMap, fingerprint};

const X_CACHE: &str = "X-Cache";
const X_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
const X_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
const X_RATELIMIT_RESET: &str = "X-RateLimit-Reset";

/// Headers that only make sense for the original hop and must not be replayed
/// from the cache.
const UNCACHEABLE_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection", "date"];

/// Sliding-window admission check for every request outside the exclude list.
///
/// Admitted responses carry `X-RateLimit-*` headers for the most specific
/// bucket that applied; rejections become 429s with a `Retry-After` hint.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if state
        .config
        .rate_limit
        .exclude_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = utils::client_ip(request.headers(), peer);
    let api_key = utils::api_key(request.headers());

    match state.limiter.check(&ip, api_key.as_deref()) {
        Ok(headers) => {
            let mut response = next.run(request).await;
            let response_headers = response.headers_mut();
            insert_numeric(response_headers, X_RATELIMIT_REMAINING, headers.remaining as i64);
            insert_numeric(response_headers, X_RATELIMIT_LIMIT, headers.limit as i64);
            insert_numeric(response_headers, X_RATELIMIT_RESET, headers.reset);
            response
        }
        Err(exceeded) => {
            state.metrics.request_rate_limited();
            let mut response = ApiError::RateLimited {
                tier: exceeded.tier.as_str(),
                wait_secs: exceeded.wait_secs,
            }
            .into_response();
            insert_numeric(response.headers_mut(), X_RATELIMIT_REMAINING, 0);
            response
        }
    }
}

/// Serve eligible GET requests from the response cache.
///
/// Responses are stored only when the path is in the include list, the status
/// is a success and the response does not opt out via `Cache-Control`.
pub async fn response_cache(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() != Method::GET || !path_is_cacheable(&state, &path) {
        return next.run(request).await;
    }

    let cache_config = &state.config.cache;
    let query = if cache_config.vary_by_query {
        request.uri().query().map(str::to_owned)
    } else {
        None
    };
    let identity = if cache_config.vary_by_api_key {
        Some(utils::caller_identity(request.headers()))
    } else {
        None
    };
    let key = fingerprint("GET", &path, query.as_deref(), identity.as_deref());

    if let Some(entry) = state.cache.get(&key) {
        state.metrics.cache_hit();
        debug!(%path, "Cache hit");
        return replay_cached(&entry, entry.age_seconds(state.clock.now()));
    }
    state.metrics.cache_miss();

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let payload = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return ApiError::Internal(format!("failed to read response body: {err}"))
                .into_response();
        }
    };

    if response_allows_caching(&parts.headers) {
        let mut stored_headers = HeadersMap::new();
        for (name, value) in &parts.headers {
            let name = name.as_str();
            if UNCACHEABLE_HEADERS.contains(&name) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                stored_headers.insert(name.to_string(), value.to_string());
            }
        }
        let ttl = ttl_from_headers(&parts.headers);
        state
            .cache
            .set(&key, payload.clone(), stored_headers, parts.status.as_u16(), ttl);
    }

    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(payload))
}

fn path_is_cacheable(state: &AppState, path: &str) -> bool {
    let cache = &state.config.cache;
    if cache
        .exclude_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return false;
    }
    cache
        .include_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

fn response_allows_caching(headers: &axum::http::HeaderMap) -> bool {
    match headers.get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
        Some(value) => {
            let value = value.to_ascii_lowercase();
            !value.contains("no-store") && !value.contains("no-cache")
        }
        None => true,
    }
}

/// Per-response TTL override from `Cache-Control: max-age=N`.
fn ttl_from_headers(headers: &axum::http::HeaderMap) -> Option<Duration> {
    let value = headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
    value
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .filter_map(|secs| secs.parse::<i64>().ok())
        .next()
        .map(Duration::seconds)
}

fn replay_cached(entry: &CacheEntry, age_secs: i64) -> Response {
    let mut response = Response::new(Body::from(Bytes::clone(&entry.payload)));
    *response.status_mut() = axum::http::StatusCode::from_u16(entry.status_code)
        .unwrap_or(axum::http::StatusCode::OK);

    let headers = response.headers_mut();
    for (name, value) in &entry.headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    insert_numeric(headers, header::AGE.as_str(), age_secs);
    response
}

fn insert_numeric(headers: &mut axum::http::HeaderMap, name: &str, value: i64) {
    if let (Ok(name), Ok(value)) = (
        axum::http::HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(&value.to_string()),
    ) {
        headers.insert(name, value);
    }
}
