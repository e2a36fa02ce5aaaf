use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::builder::ContextBundleBuilder;
use crate::domain::context::{ContextBundle, ContextBundleId};
use crate::domain::job::{DispatchHandle, JobId, JobStatus};
use crate::domain::lead::{Lead, LeadRef};
use crate::domain::submission::{Submission, SubmissionId};
use crate::registry::{ContextStore, JobRegistry};

const ACTOR: &str = "dispatch-orchestrator";

/// Everything the telephony side needs to place one call.
#[derive(Clone, Debug)]
pub struct DialRequest {
    pub job_id: JobId,
    pub lead: Lead,
    pub context_bundle_id: ContextBundleId,
    pub room_name: String,
    pub bundle: Arc<ContextBundle>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("telephony is not configured: {0}")]
    NotConfigured(String),
    #[error("telephony request failed: {0}")]
    Transport(String),
    #[error("telephony provider rejected the call with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("call setup failed: {0}")]
    Setup(String),
}

/// Places an outbound call. Returns once the call is dispatched, not once it connects.
#[async_trait]
pub trait TelephonyDialer: Send + Sync {
    async fn dial(&self, request: DialRequest) -> Result<DispatchHandle, DispatchError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchEntryStatus {
    Dispatched,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    ContextBuild,
    Registry,
    Dispatch,
}

impl DispatchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextBuild => "context_build",
            Self::Registry => "registry",
            Self::Dispatch => "dispatch",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub stage: DispatchStage,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEntry {
    pub position: usize,
    pub phone: String,
    pub lead_name: Option<String>,
    pub job_id: Option<JobId>,
    pub context_bundle_id: Option<ContextBundleId>,
    pub room_name: Option<String>,
    pub status: DispatchEntryStatus,
    pub error: Option<DispatchFailure>,
}

impl DispatchEntry {
    fn pending(position: usize, lead: &Lead) -> Self {
        Self {
            position,
            phone: lead.phone.clone(),
            lead_name: lead.name.clone(),
            job_id: None,
            context_bundle_id: None,
            room_name: None,
            status: DispatchEntryStatus::Failed,
            error: None,
        }
    }

    fn failed(mut self, stage: DispatchStage, message: impl Into<String>) -> Self {
        self.status = DispatchEntryStatus::Failed;
        self.error = Some(DispatchFailure { stage, message: message.into() });
        self
    }
}

/// One entry per submitted lead, in submission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDispatchResponse {
    pub submission_id: SubmissionId,
    pub entries: Vec<DispatchEntry>,
    pub total: usize,
    pub dispatched: usize,
    pub failed: usize,
}

pub struct DispatchOrchestrator {
    builder: Arc<dyn ContextBundleBuilder>,
    dialer: Arc<dyn TelephonyDialer>,
    registry: Arc<JobRegistry>,
    contexts: Arc<ContextStore>,
    audit: Arc<dyn AuditSink>,
}

impl DispatchOrchestrator {
    pub fn new(
        builder: Arc<dyn ContextBundleBuilder>,
        dialer: Arc<dyn TelephonyDialer>,
        registry: Arc<JobRegistry>,
        contexts: Arc<ContextStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { builder, dialer, registry, contexts, audit }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// Dispatches every lead of an already validated submission. A failure for one lead is
    /// recorded on its entry and never stops the others.
    pub async fn dispatch(&self, submission: &Submission) -> BatchDispatchResponse {
        info!(
            event_name = "dispatch.batch.start",
            correlation_id = %submission.id,
            leads = submission.leads.len(),
            goal = submission.campaign.goal.as_str(),
            "dispatching submission"
        );

        let mut entries = Vec::with_capacity(submission.leads.len());
        for (position, lead) in submission.leads.iter().enumerate() {
            entries.push(self.dispatch_lead(submission, position, lead).await);
        }

        let dispatched =
            entries.iter().filter(|entry| entry.status == DispatchEntryStatus::Dispatched).count();
        let response = BatchDispatchResponse {
            submission_id: submission.id.clone(),
            total: entries.len(),
            dispatched,
            failed: entries.len() - dispatched,
            entries,
        };

        info!(
            event_name = "dispatch.batch.complete",
            correlation_id = %submission.id,
            total = response.total,
            dispatched = response.dispatched,
            failed = response.failed,
            "submission dispatched"
        );
        response
    }

    async fn dispatch_lead(
        &self,
        submission: &Submission,
        position: usize,
        lead: &Lead,
    ) -> DispatchEntry {
        let mut entry = DispatchEntry::pending(position, lead);

        let bundle =
            match self.builder.build(lead, &submission.campaign, &submission.owner_email) {
                Ok(bundle) => bundle,
                Err(build_error) => {
                    let entry = entry.failed(DispatchStage::ContextBuild, build_error.to_string());
                    self.record_failure(submission, &entry);
                    return entry;
                }
            };

        let bundle = self.contexts.insert(bundle).await;
        let bundle_id = bundle.id().clone();
        entry.context_bundle_id = Some(bundle_id.clone());

        let job_id = self
            .registry
            .create(
                LeadRef::new(submission.id.clone(), position, lead),
                bundle_id.clone(),
                Some(format!("/contexts/{bundle_id}")),
            )
            .await;
        entry.job_id = Some(job_id.clone());

        if let Err(registry_error) = self.registry.update_status(&job_id, JobStatus::Dialing).await
        {
            let entry = entry.failed(DispatchStage::Registry, registry_error.to_string());
            self.record_failure(submission, &entry);
            return entry;
        }

        let room_name = format!("call-{bundle_id}");
        let request = DialRequest {
            job_id: job_id.clone(),
            lead: lead.clone(),
            context_bundle_id: bundle_id,
            room_name: room_name.clone(),
            bundle,
        };

        match self.dialer.dial(request).await {
            Ok(handle) => {
                entry.room_name = Some(handle.room_name.clone());
                if let Err(attach_error) = self.registry.attach_dispatch(&job_id, handle).await {
                    warn!(
                        event_name = "dispatch.lead.attach_failed",
                        correlation_id = %submission.id,
                        job_id = %job_id,
                        error = %attach_error,
                        "dispatch handle could not be recorded"
                    );
                }
                entry.status = DispatchEntryStatus::Dispatched;

                info!(
                    event_name = "dispatch.lead.dispatched",
                    correlation_id = %submission.id,
                    job_id = %job_id,
                    position,
                    room_name = %room_name,
                    "lead dispatched"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(job_id),
                        submission.id.to_string(),
                        "dispatch.lead_dispatched",
                        AuditCategory::Dispatch,
                        ACTOR,
                        AuditOutcome::Success,
                    )
                    .with_metadata("position", position.to_string()),
                );
                entry
            }
            Err(dial_error) => {
                if let Err(mark_error) =
                    self.registry.mark_failed(&job_id, dial_error.to_string()).await
                {
                    warn!(
                        event_name = "dispatch.lead.mark_failed_rejected",
                        correlation_id = %submission.id,
                        job_id = %job_id,
                        error = %mark_error,
                        "failed dispatch could not be recorded on the job"
                    );
                }
                let entry = entry.failed(DispatchStage::Dispatch, dial_error.to_string());
                self.record_failure(submission, &entry);
                entry
            }
        }
    }

    fn record_failure(&self, submission: &Submission, entry: &DispatchEntry) {
        let (stage, message) = match &entry.error {
            Some(failure) => (failure.stage.as_str(), failure.message.as_str()),
            None => ("unknown", ""),
        };

        error!(
            event_name = "dispatch.lead.failed",
            correlation_id = %submission.id,
            job_id = entry.job_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            position = entry.position,
            stage,
            error = message,
            "lead dispatch failed"
        );
        self.audit.emit(
            AuditEvent::new(
                entry.job_id.clone(),
                submission.id.to_string(),
                "dispatch.lead_failed",
                AuditCategory::Dispatch,
                ACTOR,
                AuditOutcome::Failed,
            )
            .with_metadata("position", entry.position.to_string())
            .with_metadata("stage", stage)
            .with_metadata("error", message),
        );
    }
}
