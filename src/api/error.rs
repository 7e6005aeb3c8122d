use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;
use thiserror::Error;

use crate::dispatch::DispatchError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("rate limit exceeded, retry in {wait_secs} seconds")]
    RateLimited { tier: &'static str, wait_secs: i64 },
    #[error("model {model} is temporarily unavailable and no alternative is available")]
    ModelUnavailable {
        model: String,
        model_type: String,
        retry_after_secs: u64,
    },
    #[error("all available models have failed")]
    FailoverExhausted {
        original: String,
        alternate: String,
        retry_after_secs: u64,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ModelUnavailable { .. } | ApiError::FailoverExhausted { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            ApiError::FailoverExhausted { .. } => "FAILOVER_EXHAUSTED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Retry hint carried in the `Retry-After` header, if any.
    fn retry_after(&self) -> Option<i64> {
        match self {
            ApiError::RateLimited { wait_secs, .. } => Some(*wait_secs),
            ApiError::ModelUnavailable {
                retry_after_secs, ..
            }
            | ApiError::FailoverExhausted {
                retry_after_secs, ..
            } => Some(*retry_after_secs as i64),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let retry_after = self.retry_after();

        let mut body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        match &self {
            ApiError::RateLimited { tier, .. } => {
                body["limiter"] = json!(tier);
            }
            ApiError::ModelUnavailable {
                model, model_type, ..
            } => {
                body["model"] = json!(model);
                body["type"] = json!(model_type);
            }
            ApiError::FailoverExhausted {
                original,
                alternate,
                ..
            } => {
                body["original_model"] = json!(original);
                body["alternative_model"] = json!(alternate);
            }
            _ => {}
        }
        if let Some(wait) = retry_after {
            body["retry_after"] = json!(wait);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(wait) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&wait.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::ModelUnavailable {
                model,
                model_type,
                retry_after_secs,
            } => ApiError::ModelUnavailable {
                model,
                model_type,
                retry_after_secs,
            },
            DispatchError::FailoverExhausted {
                original,
                alternate,
                retry_after_secs,
            } => ApiError::FailoverExhausted {
                original,
                alternate,
                retry_after_secs,
            },
        }
    }
}
