use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dialflow_core::dispatch::{BatchDispatchResponse, DispatchOrchestrator};
use dialflow_core::domain::call::CallResult;
use dialflow_core::domain::context::{ContextBundle, ContextBundleId};
use dialflow_core::domain::job::{CallJob, JobId, JobStatus};
use dialflow_core::domain::submission::SubmissionRequest;
use dialflow_core::errors::{ApplicationError, DomainError, InterfaceError};
use dialflow_core::registry::RegistryError;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::rate_limit::{CallRateLimiter, RateDecision};

#[derive(Clone)]
pub struct CallsState {
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub limiter: Arc<CallRateLimiter>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallStatusResponse {
    #[serde(flatten)]
    pub job: CallJob,
    pub expires_in_seconds: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// HTTP face of [`InterfaceError`].
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn from_domain(error: impl Into<DomainError>, correlation_id: &str) -> Self {
        Self(ApplicationError::Domain(error.into()).into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::NotFound { message, .. }
            | InterfaceError::Conflict { message, .. }
            | InterfaceError::TooManyRequests { message, .. }
            | InterfaceError::ServiceUnavailable { message, .. }
            | InterfaceError::Internal { message, .. } => message.clone(),
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let InterfaceError::TooManyRequests { retry_after_secs, .. } = &self.0 {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }
}

pub fn router(orchestrator: Arc<DispatchOrchestrator>, limiter: Arc<CallRateLimiter>) -> Router {
    Router::new()
        .route("/calls", post(create_calls))
        .route("/calls/{job_id}", get(call_status))
        .route("/calls/{job_id}/start", post(start_call))
        .route("/calls/{job_id}/result", post(record_result))
        .route("/contexts/{context_id}", get(context_bundle))
        .with_state(CallsState { orchestrator, limiter })
}

/// Validates the submission as a whole, applies the per-client rate limit, then
/// dispatches every lead. Per-lead failures are reported in the body; the response is
/// 200 whenever validation and the rate limit passed.
pub async fn create_calls(
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    State(state): State<CallsState>,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<Json<BatchDispatchResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let Json(request) = payload
        .map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;

    let submission = request.validate().map_err(|error| {
        warn!(
            event_name = "http.calls.rejected",
            correlation_id = %correlation_id,
            error = %error,
            "submission failed validation"
        );
        ApiError::from_domain(error, &correlation_id)
    })?;

    if let RateDecision::Limited { retry_after } = state.limiter.check(client.ip()).await {
        return Err(ApiError(InterfaceError::TooManyRequests {
            message: format!(
                "at most {} call requests per {}s from one address",
                state.limiter.max_requests(),
                state.limiter.window().as_secs()
            ),
            correlation_id,
            retry_after_secs: retry_after.as_secs().max(1),
        }));
    }

    info!(
        event_name = "http.calls.accepted",
        correlation_id = %correlation_id,
        submission_id = %submission.id,
        leads = submission.leads.len(),
        "submission accepted"
    );
    Ok(Json(state.orchestrator.dispatch(&submission).await))
}

pub async fn call_status(
    Path(job_id): Path<String>,
    State(state): State<CallsState>,
) -> Result<Json<CallStatusResponse>, ApiError> {
    let job_id = JobId(job_id);
    let registry = state.orchestrator.registry();
    let job = registry
        .get(&job_id)
        .await
        .map_err(|error| ApiError::from_domain(error, &job_id.0))?;

    let expires_in_seconds = job.seconds_until_expiry(registry.ttl(), registry.now()).max(0.0);
    Ok(Json(CallStatusResponse { job, expires_in_seconds }))
}

/// Reported by the agent worker once the lead picks up.
pub async fn start_call(
    Path(job_id): Path<String>,
    State(state): State<CallsState>,
) -> Result<Json<CallJob>, ApiError> {
    let job_id = JobId(job_id);
    let job = state
        .orchestrator
        .registry()
        .update_status(&job_id, JobStatus::InProgress)
        .await
        .map_err(|error| registry_failure(error, &job_id))?;
    Ok(Json(job))
}

/// Reported by the agent worker when the call ends.
pub async fn record_result(
    Path(job_id): Path<String>,
    State(state): State<CallsState>,
    payload: Result<Json<CallResult>, JsonRejection>,
) -> Result<Json<CallJob>, ApiError> {
    let job_id = JobId(job_id);
    let Json(result) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &job_id.0))?;
    if result.job_id != job_id {
        return Err(ApiError::bad_request(
            format!("result belongs to job {}, not {}", result.job_id, job_id),
            &job_id.0,
        ));
    }

    let job = state
        .orchestrator
        .registry()
        .set_result(&job_id, result)
        .await
        .map_err(|error| registry_failure(error, &job_id))?;
    info!(
        event_name = "http.calls.result_recorded",
        correlation_id = %job_id,
        job_id = %job_id,
        status = job.status.as_str(),
        "call result recorded"
    );
    Ok(Json(job))
}

pub async fn context_bundle(
    Path(context_id): Path<String>,
    State(state): State<CallsState>,
) -> Result<Json<ContextBundle>, ApiError> {
    let id = ContextBundleId(context_id);
    match state.orchestrator.contexts().get(&id).await {
        Some(bundle) => Ok(Json(bundle.as_ref().clone())),
        None => Err(ApiError(InterfaceError::NotFound {
            message: format!("context bundle {id} not found or expired"),
            correlation_id: id.0,
        })),
    }
}

fn registry_failure(error: RegistryError, job_id: &JobId) -> ApiError {
    if let RegistryError::InvalidTransition { .. } = &error {
        error!(
            event_name = "http.calls.invalid_transition",
            correlation_id = %job_id,
            job_id = %job_id,
            error = %error,
            "job status change rejected"
        );
    }
    ApiError::from_domain(error, &job_id.0)
}
