use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use dialflow_core::audit::TracingAuditSink;
use dialflow_core::builder::{ContextBuildError, TemplateContextBuilder};
use dialflow_core::config::{AppConfig, ConfigError, LoadOptions};
use dialflow_core::dispatch::{DispatchError, DispatchOrchestrator, TelephonyDialer};
use dialflow_core::registry::{spawn_sweeper, ContextStore, JobRegistry};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::rate_limit::CallRateLimiter;
use crate::telephony::{UnavailableDialer, WebhookDialer};
use crate::{calls, health};

pub struct Application {
    pub config: AppConfig,
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub rate_limiter: Arc<CallRateLimiter>,
    pub shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("script templates failed to load: {0}")]
    Templates(#[source] ContextBuildError),
    #[error("telephony dialer could not be created: {0}")]
    Telephony(#[source] DispatchError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let builder = TemplateContextBuilder::new(config.conversation.agent_persona.clone())
        .map_err(BootstrapError::Templates)?;
    let dialer: Arc<dyn TelephonyDialer> = if config.telephony.is_configured() {
        Arc::new(WebhookDialer::from_config(&config.telephony).map_err(BootstrapError::Telephony)?)
    } else {
        warn!(
            event_name = "system.bootstrap.telephony_unconfigured",
            correlation_id = "bootstrap",
            "no telephony dial_url configured; every dispatch will fail"
        );
        Arc::new(UnavailableDialer)
    };

    let registry = Arc::new(JobRegistry::new(config.registry.ttl()));
    let contexts = Arc::new(ContextStore::new());
    let orchestrator = Arc::new(DispatchOrchestrator::new(
        Arc::new(builder),
        dialer,
        registry.clone(),
        contexts.clone(),
        Arc::new(TracingAuditSink),
    ));

    let rate_limiter = Arc::new(CallRateLimiter::new(&config.rate_limit));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        registry.clone(),
        contexts,
        config.registry.sweep_interval(),
        shutdown.child_token(),
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        ttl_secs = config.registry.ttl_secs,
        sweep_interval_secs = config.registry.sweep_interval_secs,
        rate_limit = config.rate_limit.max_requests,
        rate_limit_window_secs = config.rate_limit.window_secs,
        telephony = if config.telephony.is_configured() { "webhook" } else { "unavailable" },
        "application bootstrapped"
    );

    Ok(Application { config, registry, orchestrator, rate_limiter, shutdown, sweeper })
}

impl Application {
    pub fn router(&self) -> Router {
        calls::router(self.orchestrator.clone(), self.rate_limiter.clone())
            .merge(health::router(self.registry.clone()))
            .layer(TraceLayer::new_for_http())
    }

    /// Stops the sweeper, waiting at most the configured grace period.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let grace = Duration::from_secs(self.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, self.sweeper).await.is_err() {
            warn!(
                event_name = "system.shutdown.sweeper_timeout",
                correlation_id = "shutdown",
                "sweeper did not stop within the grace period"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use dialflow_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_telephony_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                telephony_dial_url: Some("ftp://dialer.example.com".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("telephony.dial_url"));
    }

    #[tokio::test]
    async fn bootstrap_without_telephony_still_serves() {
        let app = bootstrap(LoadOptions::default()).await.expect("bootstrap");

        assert_eq!(app.registry.ttl().num_seconds(), 600);
        assert_eq!(app.rate_limiter.max_requests(), 5);
        assert_eq!(app.rate_limiter.window().as_secs(), 60);
        assert!(app.registry.is_empty().await);
        let _router = app.router();
        app.stop().await;
    }
}
