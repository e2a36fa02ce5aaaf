use std::sync::Arc;

use async_trait::async_trait;
use dialflow_core::dispatch::{DialRequest, DispatchError, TelephonyDialer};
use dialflow_core::domain::job::DispatchHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::channel::CallConnector;
use crate::runtime::ConversationExecutor;

/// Runs every dispatched call in-process: one spawned task per call, connected through a
/// [`CallConnector`] and driven by the shared executor.
pub struct LocalCallDialer {
    executor: Arc<ConversationExecutor>,
    connector: Arc<dyn CallConnector>,
    tasks: TaskTracker,
}

impl LocalCallDialer {
    pub fn new(executor: Arc<ConversationExecutor>, connector: Arc<dyn CallConnector>) -> Self {
        Self { executor, connector, tasks: TaskTracker::new() }
    }

    /// Waits until every call spawned so far has written its result.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

#[async_trait]
impl TelephonyDialer for LocalCallDialer {
    async fn dial(&self, request: DialRequest) -> Result<DispatchHandle, DispatchError> {
        if self.tasks.is_closed() {
            return Err(DispatchError::NotConfigured("local dialer is shutting down".to_string()));
        }

        let handle = DispatchHandle {
            room_name: request.room_name.clone(),
            dispatch_id: Some(format!("local-{}", request.job_id)),
        };
        let executor = self.executor.clone();
        let connector = self.connector.clone();

        self.tasks.spawn(async move {
            let job_id = request.job_id.clone();
            match connector.connect(&request).await {
                Ok(mut channel) => {
                    let result = executor.run(&job_id, &request.bundle, channel.as_mut()).await;
                    info!(
                        event_name = "agent.local_call.finished",
                        correlation_id = %job_id,
                        job_id = %job_id,
                        outcome = result.outcome.as_str(),
                        "local call finished"
                    );
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.local_call.connect_failed",
                        correlation_id = %job_id,
                        job_id = %job_id,
                        error = %error,
                        "call could not be connected"
                    );
                    let marked = executor
                        .registry()
                        .mark_failed(&job_id, format!("call could not be connected: {error}"))
                        .await;
                    if let Err(error) = marked {
                        warn!(
                            event_name = "agent.local_call.mark_failed_rejected",
                            correlation_id = %job_id,
                            job_id = %job_id,
                            error = %error,
                            "connect failure could not be recorded"
                        );
                    }
                }
            }
        });

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Duration;
    use dialflow_core::audit::InMemoryAuditSink;
    use dialflow_core::builder::TemplateContextBuilder;
    use dialflow_core::dispatch::{DialRequest, DispatchEntryStatus, DispatchOrchestrator};
    use dialflow_core::domain::call::CallOutcome;
    use dialflow_core::domain::job::JobStatus;
    use dialflow_core::domain::lead::Lead;
    use dialflow_core::domain::submission::{CallGoal, Campaign, SubmissionRequest};
    use dialflow_core::registry::{ContextStore, JobRegistry};

    use super::LocalCallDialer;
    use crate::channel::{
        CallConnector, CallerChannel, ChannelError, ScriptedConnector, ScriptedTurn,
    };
    use crate::runtime::{ConversationExecutor, ExecutorSettings};
    use crate::tools::{LinkOutbox, ToolRegistry};

    struct RefusingConnector;

    #[async_trait]
    impl CallConnector for RefusingConnector {
        async fn connect(
            &self,
            _: &DialRequest,
        ) -> Result<Box<dyn CallerChannel>, ChannelError> {
            Err(ChannelError::Transport("sip trunk busy".to_string()))
        }
    }

    fn setup(connector: Arc<dyn CallConnector>) -> (DispatchOrchestrator, Arc<LocalCallDialer>) {
        let registry = Arc::new(JobRegistry::new(Duration::seconds(600)));
        let executor = Arc::new(ConversationExecutor::new(
            registry.clone(),
            Arc::new(ToolRegistry::standard(LinkOutbox::default())),
            ExecutorSettings::default(),
        ));
        let dialer = Arc::new(LocalCallDialer::new(executor, connector));
        let orchestrator = DispatchOrchestrator::new(
            Arc::new(TemplateContextBuilder::new("Sam").expect("templates")),
            dialer.clone(),
            registry,
            Arc::new(ContextStore::new()),
            Arc::new(InMemoryAuditSink::default()),
        );
        (orchestrator, dialer)
    }

    fn submission() -> dialflow_core::domain::submission::Submission {
        SubmissionRequest {
            owner_email: "owner@example.com".to_string(),
            leads: vec![
                Lead::new("+14155550001").with_name("Ana"),
                Lead::new("+14155550002").with_name("Ben"),
            ],
            campaign: Campaign::new("Acme Dialer", CallGoal::QualifyInterest),
            consent: true,
            idempotency_key: None,
        }
        .validate()
        .expect("valid submission")
    }

    #[tokio::test]
    async fn dispatched_calls_run_to_a_stored_result() {
        let connector = ScriptedConnector::new(vec![ScriptedTurn::say("No thanks")])
            .with_script("+14155550002", vec![ScriptedTurn::Silence]);
        let (orchestrator, dialer) = setup(Arc::new(connector.clone()));

        let response = orchestrator.dispatch(&submission()).await;
        dialer.wait_idle().await;

        assert_eq!(response.dispatched, 2);
        let outcomes = [CallOutcome::NotInterested, CallOutcome::NoAnswer];
        for (entry, expected) in response.entries.iter().zip(outcomes) {
            assert_eq!(entry.status, DispatchEntryStatus::Dispatched);
            let job_id = entry.job_id.as_ref().expect("job id");
            let job = orchestrator.registry().get(job_id).await.expect("job");
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.result.map(|result| result.outcome), Some(expected));
        }

        let spoken = connector.spoken_to("+14155550001").expect("first call connected");
        assert!(spoken[0].contains("Ana") && !spoken[0].contains("Ben"));
    }

    #[tokio::test]
    async fn connect_failure_marks_the_job_failed() {
        let (orchestrator, dialer) = setup(Arc::new(RefusingConnector));

        let response = orchestrator.dispatch(&submission()).await;
        dialer.wait_idle().await;

        for entry in &response.entries {
            let job_id = entry.job_id.as_ref().expect("job id");
            let job = orchestrator.registry().get(job_id).await.expect("job");
            assert_eq!(job.status, JobStatus::Failed);
            assert!(job.error.as_deref().is_some_and(|error| error.contains("sip trunk busy")));
        }
    }
}
