use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use dialflow_core::registry::JobRegistry;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    registry: Arc<JobRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub active_jobs: usize,
    pub ttl_seconds: i64,
}

pub fn router(registry: Arc<JobRegistry>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { registry })
}

pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        active_jobs: state.registry.len().await,
        ttl_seconds: state.registry.ttl().num_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, Json};
    use chrono::Duration;
    use dialflow_core::domain::context::ContextBundleId;
    use dialflow_core::domain::lead::{Lead, LeadRef};
    use dialflow_core::domain::submission::SubmissionId;
    use dialflow_core::registry::JobRegistry;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_reports_active_jobs_and_ttl() {
        let registry = Arc::new(JobRegistry::new(Duration::seconds(600)));
        registry
            .create(
                LeadRef::new(SubmissionId("sub-1".into()), 1, &Lead::new("+14155550001")),
                ContextBundleId("ctx-1".into()),
                None,
            )
            .await;

        let Json(payload) = health(State(HealthState { registry })).await;

        assert_eq!(payload.status, "healthy");
        assert_eq!(payload.active_jobs, 1);
        assert_eq!(payload.ttl_seconds, 600);
    }
}
