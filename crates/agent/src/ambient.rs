use std::sync::{Arc, Mutex};

use dialflow_core::domain::job::JobId;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suspension {
    /// Waiting for the caller to speak.
    Listening,
    /// Waiting on a phase action to finish.
    Thinking,
}

impl Suspension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Thinking => "thinking",
        }
    }
}

/// Side-effect hook around every point where a call waits. Typically starts and stops
/// background or thinking audio; it never changes conversation state.
pub trait SuspensionHook: Send + Sync {
    fn suspended(&self, job_id: &JobId, suspension: Suspension);
    fn resumed(&self, job_id: &JobId, suspension: Suspension);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSuspensionHook;

impl SuspensionHook for NoopSuspensionHook {
    fn suspended(&self, _job_id: &JobId, _suspension: Suspension) {}
    fn resumed(&self, _job_id: &JobId, _suspension: Suspension) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSuspensionHook;

impl SuspensionHook for TracingSuspensionHook {
    fn suspended(&self, job_id: &JobId, suspension: Suspension) {
        debug!(
            event_name = "agent.ambient.start",
            correlation_id = %job_id,
            job_id = %job_id,
            suspension = suspension.as_str(),
            "ambient audio started"
        );
    }

    fn resumed(&self, job_id: &JobId, suspension: Suspension) {
        debug!(
            event_name = "agent.ambient.stop",
            correlation_id = %job_id,
            job_id = %job_id,
            suspension = suspension.as_str(),
            "ambient audio stopped"
        );
    }
}

/// Keeps every hook call in order. Useful for asserting that suspensions are balanced.
#[derive(Clone, Debug, Default)]
pub struct RecordingSuspensionHook {
    calls: Arc<Mutex<Vec<(Suspension, bool)>>>,
}

impl RecordingSuspensionHook {
    /// `(suspension, started)` pairs in call order.
    pub fn calls(&self) -> Vec<(Suspension, bool)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, suspension: Suspension, started: bool) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push((suspension, started)),
            Err(poisoned) => poisoned.into_inner().push((suspension, started)),
        }
    }
}

impl SuspensionHook for RecordingSuspensionHook {
    fn suspended(&self, _job_id: &JobId, suspension: Suspension) {
        self.record(suspension, true);
    }

    fn resumed(&self, _job_id: &JobId, suspension: Suspension) {
        self.record(suspension, false);
    }
}
