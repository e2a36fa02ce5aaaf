use async_trait::async_trait;
use dialflow_core::config::TelephonyConfig;
use dialflow_core::dispatch::{DialRequest, DispatchError, TelephonyDialer};
use dialflow_core::domain::context::ContextBundle;
use dialflow_core::domain::job::DispatchHandle;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Body posted to the telephony provider. The agent worker dials `phone` after joining
/// `room` and reads its script from `metadata`.
#[derive(Debug, Serialize)]
struct AgentDispatchRequest<'a> {
    agent_name: &'a str,
    room: &'a str,
    job_id: &'a str,
    context_bundle_id: &'a str,
    phone: &'a str,
    metadata: &'a ContextBundle,
}

#[derive(Debug, Default, Deserialize)]
struct AgentDispatchResponse {
    #[serde(default, alias = "id")]
    dispatch_id: Option<String>,
}

/// Creates agent dispatches over HTTP.
pub struct WebhookDialer {
    client: Client,
    dial_url: String,
    api_token: Option<SecretString>,
    agent_name: String,
}

impl WebhookDialer {
    pub fn from_config(config: &TelephonyConfig) -> Result<Self, DispatchError> {
        let dial_url = config
            .dial_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| DispatchError::NotConfigured("telephony.dial_url".to_string()))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| DispatchError::Setup(error.to_string()))?;

        Ok(Self {
            client,
            dial_url,
            api_token: config.api_token.clone(),
            agent_name: config.agent_name.clone(),
        })
    }
}

#[async_trait]
impl TelephonyDialer for WebhookDialer {
    async fn dial(&self, request: DialRequest) -> Result<DispatchHandle, DispatchError> {
        let body = AgentDispatchRequest {
            agent_name: &self.agent_name,
            room: &request.room_name,
            job_id: &request.job_id.0,
            context_bundle_id: &request.context_bundle_id.0,
            phone: &request.lead.phone,
            metadata: &request.bundle,
        };

        let mut call = self.client.post(&self.dial_url).json(&body);
        if let Some(token) = &self.api_token {
            call = call.bearer_auth(token.expose_secret());
        }

        let response = call.send().await.map_err(|error| {
            error!(
                event_name = "telephony.dispatch.transport_error",
                correlation_id = %request.job_id,
                job_id = %request.job_id,
                error = %error,
                "agent dispatch request failed"
            );
            DispatchError::Transport(error.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message: message.trim().chars().take(200).collect(),
            });
        }

        // An empty or non-JSON body still means the dispatch was accepted.
        let payload = response.json::<AgentDispatchResponse>().await.unwrap_or_default();
        info!(
            event_name = "telephony.dispatch.created",
            correlation_id = %request.job_id,
            job_id = %request.job_id,
            room_name = %request.room_name,
            dispatch_id = payload.dispatch_id.as_deref().unwrap_or("unknown"),
            "agent dispatch created"
        );

        Ok(DispatchHandle { room_name: request.room_name, dispatch_id: payload.dispatch_id })
    }
}

/// Used when no telephony endpoint is configured. Every dial fails, so each lead gets a
/// failed entry instead of the batch being rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableDialer;

#[async_trait]
impl TelephonyDialer for UnavailableDialer {
    async fn dial(&self, _request: DialRequest) -> Result<DispatchHandle, DispatchError> {
        Err(DispatchError::NotConfigured(
            "set telephony.dial_url or DIALFLOW_TELEPHONY_DIAL_URL".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use dialflow_core::builder::{ContextBundleBuilder, TemplateContextBuilder};
    use dialflow_core::config::TelephonyConfig;
    use dialflow_core::dispatch::{DialRequest, DispatchError, TelephonyDialer};
    use dialflow_core::domain::job::JobId;
    use dialflow_core::domain::lead::Lead;
    use dialflow_core::domain::submission::{CallGoal, Campaign};
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{UnavailableDialer, WebhookDialer};

    #[derive(Clone, Default)]
    struct Received {
        calls: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn accept(
        State(received): State<Received>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        received.calls.lock().expect("lock").push((auth, body));
        Json(json!({ "id": "AD_123" }))
    }

    async fn reject() -> (StatusCode, &'static str) {
        (StatusCode::UNAUTHORIZED, "invalid token")
    }

    async fn provider(received: Received) -> String {
        let app = Router::new()
            .route("/dispatch", post(accept))
            .route("/reject", post(reject))
            .with_state(received);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{address}")
    }

    fn request() -> DialRequest {
        let lead = Lead::new("+14155550123").with_name("Dana");
        let bundle = TemplateContextBuilder::new("Alex")
            .expect("templates")
            .build(&lead, &Campaign::new("Acme", CallGoal::QualifyInterest), "owner@example.com")
            .expect("bundle");
        DialRequest {
            job_id: JobId("job-1".to_string()),
            lead,
            context_bundle_id: bundle.id().clone(),
            room_name: format!("call-{}", bundle.id()),
            bundle: Arc::new(bundle),
        }
    }

    fn config(dial_url: String) -> TelephonyConfig {
        TelephonyConfig {
            dial_url: Some(dial_url),
            api_token: Some(SecretString::from("tok-123".to_string())),
            agent_name: "dialflow-agent".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn webhook_dialer_posts_bundle_with_bearer_token() {
        let received = Received::default();
        let base = provider(received.clone()).await;
        let dialer =
            WebhookDialer::from_config(&config(format!("{base}/dispatch"))).expect("dialer");
        let request = request();
        let room_name = request.room_name.clone();

        let handle = dialer.dial(request).await.expect("dispatched");

        assert_eq!(handle.room_name, room_name);
        assert_eq!(handle.dispatch_id.as_deref(), Some("AD_123"));
        let calls = received.calls.lock().expect("lock").clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("Bearer tok-123"));
        assert_eq!(calls[0].1["phone"], "+14155550123");
        assert_eq!(calls[0].1["agent_name"], "dialflow-agent");
        assert!(calls[0].1["metadata"].is_object());
    }

    #[tokio::test]
    async fn provider_rejection_surfaces_status() {
        let base = provider(Received::default()).await;
        let dialer = WebhookDialer::from_config(&config(format!("{base}/reject"))).expect("dialer");

        let error = dialer.dial(request()).await.expect_err("rejected");

        assert_eq!(
            error,
            DispatchError::Rejected { status: 401, message: "invalid token".to_string() }
        );
    }

    #[test]
    fn webhook_dialer_requires_dial_url() {
        let result = WebhookDialer::from_config(&TelephonyConfig {
            dial_url: None,
            api_token: None,
            agent_name: "dialflow-agent".to_string(),
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(DispatchError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn unavailable_dialer_always_fails() {
        let error = UnavailableDialer.dial(request()).await.expect_err("not configured");
        assert!(matches!(error, DispatchError::NotConfigured(_)));
    }
}
