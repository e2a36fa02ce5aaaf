//! Ephemeral, TTL-bound store of call jobs and the context bundles they were dialed with.
//!
//! The registry is created once at startup and injected wherever jobs are read or
//! mutated. Nothing here survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::call::{CallOutcome, CallResult};
use crate::domain::context::{ContextBundle, ContextBundleId};
use crate::domain::job::{CallJob, DispatchHandle, JobId, JobStatus};
use crate::domain::lead::LeadRef;

pub const DEFAULT_JOB_TTL_SECS: u64 = 600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: StdMutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        match self.now.lock() {
            Ok(mut now) => *now += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut now) => *now = to,
            Err(poisoned) => *poisoned.into_inner() = to,
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("call job {0} not found or expired")]
    JobNotFound(JobId),
    #[error("invalid status transition for job {job_id}: {} -> {}", .from.as_str(), .to.as_str())]
    InvalidTransition { job_id: JobId, from: JobStatus, to: JobStatus },
}

struct JobSlot {
    created_at: DateTime<Utc>,
    job: Mutex<CallJob>,
}

/// In-memory job store. The map lock is only held for lookup, insert and eviction;
/// mutations of one job are serialized by that job's own mutex.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { jobs: RwLock::new(HashMap::new()), clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create(
        &self,
        lead: LeadRef,
        context_bundle_id: ContextBundleId,
        context_path: Option<String>,
    ) -> JobId {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;

        let mut id = JobId::generate();
        while jobs.contains_key(&id) {
            id = JobId::generate();
        }

        let job = CallJob {
            id: id.clone(),
            lead,
            context_bundle_id,
            context_path,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            dispatch: None,
            result: None,
            error: None,
        };
        jobs.insert(id.clone(), Arc::new(JobSlot { created_at: now, job: Mutex::new(job) }));
        drop(jobs);

        debug!(
            event_name = "registry.job_created",
            correlation_id = %id,
            job_id = %id,
            "call job created"
        );
        id
    }

    pub async fn get(&self, job_id: &JobId) -> Result<CallJob, RegistryError> {
        let slot = self.live_slot(job_id).await?;
        let job = slot.job.lock().await;
        Ok(job.clone())
    }

    pub async fn update_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
    ) -> Result<CallJob, RegistryError> {
        self.mutate(job_id, |job, now| {
            transition(job, status)?;
            job.updated_at = now;
            Ok(())
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        job_id: &JobId,
        error: impl Into<String>,
    ) -> Result<CallJob, RegistryError> {
        let error = error.into();
        self.mutate(job_id, move |job, now| {
            transition(job, JobStatus::Failed)?;
            job.error = Some(error);
            job.updated_at = now;
            Ok(())
        })
        .await
    }

    pub async fn attach_dispatch(
        &self,
        job_id: &JobId,
        handle: DispatchHandle,
    ) -> Result<CallJob, RegistryError> {
        self.mutate(job_id, move |job, now| {
            job.dispatch = Some(handle);
            job.updated_at = now;
            Ok(())
        })
        .await
    }

    /// Records the final result. The job must be `in_progress`; it ends `completed`, or
    /// `failed` when the call ended in error.
    pub async fn set_result(
        &self,
        job_id: &JobId,
        result: CallResult,
    ) -> Result<CallJob, RegistryError> {
        self.mutate(job_id, move |job, now| {
            let target = if result.outcome == CallOutcome::Error {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            if job.status != JobStatus::InProgress {
                return Err(RegistryError::InvalidTransition {
                    job_id: job.id.clone(),
                    from: job.status,
                    to: target,
                });
            }

            job.status = target;
            if target == JobStatus::Failed {
                job.error =
                    Some(result.error.clone().unwrap_or_else(|| "call ended in error".to_string()));
            }
            job.result = Some(result);
            job.updated_at = now;
            Ok(())
        })
        .await
    }

    /// Evicts every job whose age reached the TTL, whatever its status. Returns the
    /// evicted snapshots marked `expired`.
    pub async fn sweep(&self) -> Vec<CallJob> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let evicted: Vec<Arc<JobSlot>> = {
            let mut jobs = self.jobs.write().await;
            let expired_ids: Vec<JobId> = jobs
                .iter()
                .filter(|(_, slot)| now - slot.created_at >= ttl)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        let mut snapshots = Vec::with_capacity(evicted.len());
        for slot in evicted {
            let mut job = slot.job.lock().await.clone();
            job.status = JobStatus::Expired;
            job.updated_at = now;
            snapshots.push(job);
        }

        if !snapshots.is_empty() {
            info!(
                event_name = "registry.sweep",
                correlation_id = "sweeper",
                evicted = snapshots.len(),
                "expired call jobs evicted"
            );
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn live_slot(&self, job_id: &JobId) -> Result<Arc<JobSlot>, RegistryError> {
        let slot = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id).cloned()
        };

        match slot {
            Some(slot) if self.clock.now() - slot.created_at < self.ttl => Ok(slot),
            _ => Err(RegistryError::JobNotFound(job_id.clone())),
        }
    }

    async fn mutate<F>(&self, job_id: &JobId, apply: F) -> Result<CallJob, RegistryError>
    where
        F: FnOnce(&mut CallJob, DateTime<Utc>) -> Result<(), RegistryError>,
    {
        let slot = self.live_slot(job_id).await?;
        let mut job = slot.job.lock().await;

        // Work on a copy so a rejected change never leaves a partial write behind.
        let mut next = job.clone();
        apply(&mut next, self.clock.now())?;
        *job = next;
        Ok(job.clone())
    }
}

fn transition(job: &mut CallJob, status: JobStatus) -> Result<(), RegistryError> {
    if !job.status.can_transition_to(status) {
        return Err(RegistryError::InvalidTransition {
            job_id: job.id.clone(),
            from: job.status,
            to: status,
        });
    }
    job.status = status;
    Ok(())
}

/// Context bundles by id, kept exactly as long as the job that was dialed with them.
#[derive(Default)]
pub struct ContextStore {
    bundles: RwLock<HashMap<ContextBundleId, Arc<ContextBundle>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bundle: ContextBundle) -> Arc<ContextBundle> {
        let bundle = Arc::new(bundle);
        self.bundles.write().await.insert(bundle.id().clone(), Arc::clone(&bundle));
        bundle
    }

    pub async fn get(&self, id: &ContextBundleId) -> Option<Arc<ContextBundle>> {
        self.bundles.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &ContextBundleId) -> Option<Arc<ContextBundle>> {
        self.bundles.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.bundles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bundles.read().await.is_empty()
    }
}

/// Runs [`JobRegistry::sweep`] on a fixed interval until `cancel` fires. Bundles of evicted
/// jobs are dropped from `contexts` in the same pass.
pub fn spawn_sweeper(
    registry: Arc<JobRegistry>,
    contexts: Arc<ContextStore>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            event_name = "registry.sweeper.start",
            correlation_id = "sweeper",
            interval_secs = interval.as_secs(),
            "job sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for job in registry.sweep().await {
                        if contexts.remove(&job.context_bundle_id).await.is_none() {
                            warn!(
                                event_name = "registry.sweeper.bundle_missing",
                                correlation_id = "sweeper",
                                job_id = %job.id,
                                context_bundle_id = %job.context_bundle_id,
                                "evicted job had no stored context bundle"
                            );
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!(
                        event_name = "registry.sweeper.stop",
                        correlation_id = "sweeper",
                        "job sweeper shutting down"
                    );
                    break;
                }
            }
        }
    })
}
