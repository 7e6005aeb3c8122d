use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use http_body_util::BodyExt;
use tracing::info;

use super::{
    models::{
        HealthResponse, InferenceResponse, InvalidateCacheRequest, InvalidateCacheResponse,
        ListTasksQuery, SuccessResponse, TaskAcceptedResponse, TaskListResponse,
        TaskStatusResponse,
    },
    state::AppState,
    utils,
};
use crate::api::error::ApiError;
use crate::dispatch::{invoke_with_failover, run_background_job};
use crate::progress::NullProgress;
use crate::registry::{TaskFilter, TaskParams, TaskStatus};

// TODO: move to config once anyone needs to tune it per deployment
const MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024; // 5MB

const X_MODEL_FAILOVER: &str = "X-Model-Failover";

/// Synchronous inference endpoint (POST /api/inference)
///
/// Invokes the requested model inline and returns its output in the response
/// body. On primary failure one alternate of the same class is tried; a
/// successful failover is flagged to the client via the `X-Model-Failover`
/// header so it can adjust expectations about the output.
pub async fn submit_inference(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let params = read_params(&headers, body).await?;
    state.metrics.sync_inference();

    let model = params.model().to_string();
    let model_type = params.task_type().failover_class();

    let outcome = invoke_with_failover(
        &state.failover,
        state.invoker.as_ref(),
        model_type,
        &model,
        &params,
        &NullProgress,
    )
    .await?;

    let mut response = Json(InferenceResponse {
        model: outcome.served_by.clone(),
        output: outcome.payload,
    })
    .into_response();

    if let Some((original, alternate)) = &outcome.failover {
        let note = format!("Original: {original}, Alternative: {alternate}");
        if let Ok(value) = HeaderValue::from_str(&note) {
            response.headers_mut().insert(X_MODEL_FAILOVER, value);
        }
    }

    Ok(response)
}

/// Task submission endpoint (POST /api/tasks)
///
/// Registers the task and detaches a background job for it; returns 202 with
/// the id the client polls. The job runs the same failover-guarded dispatch
/// as the synchronous path and checks for cancellation between steps.
pub async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let params = read_params(&headers, body).await?;
    let owner = utils::caller_identity(&headers);

    let task_id = state.registry.create(&owner, params);
    state.metrics.task_created();

    let registry = state.registry.clone();
    let failover = state.failover.clone();
    let invoker = state.invoker.clone();
    let metrics = state.metrics.clone();
    let job_id = task_id.clone();
    tokio::spawn(async move {
        run_background_job(registry.clone(), failover, invoker, job_id.clone()).await;
        match registry.get(&job_id).map(|task| task.status) {
            Some(TaskStatus::Completed) => metrics.task_completed(),
            Some(TaskStatus::Failed) => metrics.task_failed(),
            _ => {}
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskAcceptedResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    ))
}

/// Task status endpoint (GET /api/tasks/{task_id})
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .registry
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))?;

    Ok(Json(TaskStatusResponse::from(task)))
}

/// Task listing endpoint (GET /api/tasks)
///
/// Scoped to the caller's identity; supports status/type filters plus
/// limit/offset pagination, newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListTasksQuery>,
) -> impl IntoResponse {
    let filter = TaskFilter {
        owner: Some(utils::caller_identity(&headers)),
        task_type: query.task_type,
        status: query.status,
    };

    let page = state.registry.list(&filter, query.limit, query.offset);
    Json(TaskListResponse {
        total: page.total,
        limit: query.limit,
        offset: query.offset,
        tasks: page.tasks.into_iter().map(TaskStatusResponse::from).collect(),
    })
}

/// Cancellation endpoint (DELETE /api/tasks/{task_id})
///
/// Cancelling an already-finished task is not an error; the response just
/// says it had no effect.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.registry.get(&task_id).is_none() {
        return Err(ApiError::NotFound(format!("task {task_id}")));
    }

    if state.registry.cancel(&task_id) {
        state.metrics.task_cancelled();
        Ok(Json(SuccessResponse {
            success: true,
            message: format!("task {task_id} cancelled"),
        }))
    } else {
        Ok(Json(SuccessResponse {
            success: false,
            message: format!("task {task_id} already finished"),
        }))
    }
}

/// Record removal endpoint (DELETE /api/tasks/{task_id}/record)
///
/// Drops the task record entirely, independent of its state. Normally the
/// retention sweeper does this; the endpoint exists for clients that want
/// their results gone immediately.
pub async fn purge_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.registry.delete(&task_id) {
        return Err(ApiError::NotFound(format!("task {task_id}")));
    }
    info!(%task_id, "Task record purged");

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("task {task_id} removed"),
    }))
}

/// Service health endpoint (GET /api/health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("registry".to_string(), "healthy".to_string());
    components.insert("cache".to_string(), "healthy".to_string());
    components.insert("failover".to_string(), "healthy".to_string());

    // In-process components have no failure mode short of the process dying,
    // so reachability is the health check.
    Json(HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
    })
}

/// Model health endpoint (GET /api/models/health)
pub async fn models_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.failover.health_report())
}

/// Manual model reset endpoint (POST /api/models/{model_id}/reset)
///
/// Operator escape hatch: marks the model healthy again without waiting for
/// a successful request.
pub async fn reset_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> impl IntoResponse {
    if state.failover.reset(&model_id) {
        Json(SuccessResponse {
            success: true,
            message: format!("model {model_id} reset"),
        })
    } else {
        Json(SuccessResponse {
            success: false,
            message: format!("model {model_id} is not tracked"),
        })
    }
}

/// Cache invalidation endpoint (POST /api/admin/cache/invalidate)
pub async fn invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let payload = read_body(&headers, body).await?;
    let request: InvalidateCacheRequest = serde_json::from_slice(&payload)?;

    let invalidated = state.cache.invalidate(&request.prefix);
    info!(prefix = %request.prefix, invalidated, "Cache invalidated");

    Ok(Json(InvalidateCacheResponse { invalidated }))
}

/// Validates headers, reads the body and deserializes the typed task params.
async fn read_params(
    headers: &HeaderMap,
    body: axum::body::Body,
) -> Result<TaskParams, ApiError> {
    let payload = read_body(headers, body).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Reads a JSON request body, enforcing Content-Type and the size limit.
///
/// Decompression is handled transparently by RequestDecompressionLayer, so
/// the bytes here are already plain JSON.
async fn read_body(
    headers: &HeaderMap,
    body: axum::body::Body,
) -> Result<Vec<u8>, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    utils::parse_content_type(content_type)?;

    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();
    utils::validate_body_size(&data, MAX_PAYLOAD_SIZE)?;

    Ok(data)
}
