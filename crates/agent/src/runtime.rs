use std::sync::Arc;
use std::time::Duration;

use dialflow_core::audit::{AuditContext, AuditSink, TracingAuditSink};
use dialflow_core::config::ConversationConfig;
use dialflow_core::domain::call::{CallOutcome, CallResult, Speaker};
use dialflow_core::domain::context::ContextBundle;
use dialflow_core::domain::job::{JobId, JobStatus};
use dialflow_core::flows::{
    CallState, CallerSignal, CallerTurn, ConversationEngine, ConversationLimits,
    FlowTransitionError, NextStep, PhaseAction, SignalDetector, TurnPlan,
};
use dialflow_core::registry::JobRegistry;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ambient::{NoopSuspensionHook, Suspension, SuspensionHook};
use crate::channel::{CallerChannel, CallerInput, ChannelError};
use crate::tools::{ActionError, ActionInvoker};

/// Attempts allowed for one turn before the call is forced to Close.
const TURN_ATTEMPTS: u32 = 2;

#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    pub limits: ConversationLimits,
    pub max_turns: u32,
    pub max_call_duration: Duration,
    pub listen_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            limits: ConversationLimits::default(),
            max_turns: 40,
            max_call_duration: Duration::from_secs(900),
            listen_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&ConversationConfig> for ExecutorSettings {
    fn from(config: &ConversationConfig) -> Self {
        Self {
            limits: config.limits(),
            max_turns: config.max_turns,
            max_call_duration: config.max_call_duration(),
            listen_timeout: config.listen_timeout(),
        }
    }
}

#[derive(Debug, Error)]
enum TurnError {
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

enum Pending {
    Enter,
    Respond(CallerTurn),
    Listen,
}

/// How the conversation loop stopped. `forced` ends skip the phase rules.
struct CallEnd {
    outcome: CallOutcome,
    error: Option<String>,
    forced: bool,
}

impl CallEnd {
    fn finished(outcome: CallOutcome) -> Self {
        Self { outcome, error: None, forced: false }
    }

    fn forced(outcome: CallOutcome) -> Self {
        Self { outcome, error: None, forced: true }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self { outcome: CallOutcome::Error, error: Some(error.into()), forced: true }
    }
}

/// Drives one connected call from Greeting to a written result. Every call ends with a
/// result, whatever fails along the way.
pub struct ConversationExecutor {
    engine: ConversationEngine,
    detector: SignalDetector,
    registry: Arc<JobRegistry>,
    invoker: Arc<dyn ActionInvoker>,
    hook: Arc<dyn SuspensionHook>,
    audit: Arc<dyn AuditSink>,
    settings: ExecutorSettings,
}

impl ConversationExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        invoker: Arc<dyn ActionInvoker>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            engine: ConversationEngine::new(settings.limits),
            detector: SignalDetector::new(),
            registry,
            invoker,
            hook: Arc::new(NoopSuspensionHook),
            audit: Arc::new(TracingAuditSink),
            settings,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn SuspensionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub async fn run<C>(
        &self,
        job_id: &JobId,
        bundle: &ContextBundle,
        channel: &mut C,
    ) -> CallResult
    where
        C: CallerChannel + ?Sized,
    {
        let started_at = self.registry.now();
        if let Err(error) = self.registry.update_status(job_id, JobStatus::InProgress).await {
            warn!(
                event_name = "conversation.start_unrecorded",
                correlation_id = %job_id,
                job_id = %job_id,
                error = %error,
                "call started without an in-progress job"
            );
        }

        let mut state = CallState::new(job_id.clone(), bundle.goal(), bundle.lead().name.clone());
        state.lead_email = bundle.lead().email.clone();

        info!(
            event_name = "conversation.start",
            correlation_id = %job_id,
            job_id = %job_id,
            goal = bundle.goal().as_str(),
            "conversation started"
        );

        let end = match tokio::time::timeout(
            self.settings.max_call_duration,
            self.converse(&mut state, bundle, channel),
        )
        .await
        {
            Ok(end) => end,
            Err(_) => CallEnd::failed(format!(
                "call exceeded the maximum duration of {}s",
                self.settings.max_call_duration.as_secs()
            )),
        };

        if end.forced {
            self.force_close(&mut state, bundle, channel, &end).await;
        }
        if let Err(error) = channel.hang_up().await {
            debug!(
                event_name = "conversation.hang_up_failed",
                correlation_id = %job_id,
                job_id = %job_id,
                error = %error,
                "hang up after call end failed"
            );
        }

        let result =
            CallResult::from_state(&state, end.outcome, started_at, self.registry.now(), end.error);
        match self.registry.set_result(job_id, result.clone()).await {
            Ok(job) => info!(
                event_name = "conversation.complete",
                correlation_id = %job_id,
                job_id = %job_id,
                outcome = result.outcome.as_str(),
                status = job.status.as_str(),
                duration_secs = result.duration_secs,
                "conversation finished"
            ),
            Err(error) => warn!(
                event_name = "conversation.result_dropped",
                correlation_id = %job_id,
                job_id = %job_id,
                outcome = result.outcome.as_str(),
                error = %error,
                "call result could not be stored"
            ),
        }
        result
    }

    async fn converse<C>(
        &self,
        state: &mut CallState,
        bundle: &ContextBundle,
        channel: &mut C,
    ) -> CallEnd
    where
        C: CallerChannel + ?Sized,
    {
        let job_id = state.job_id.clone();
        let audit = AuditContext::new(Some(job_id.clone()), job_id.to_string(), "conversation");
        let mut pending = Pending::Enter;
        let mut failures = 0;
        // Actions of the pending plan that already ran; a retry resumes after them.
        let mut actions_done = 0;
        let mut caller_turns = 0;
        let mut heard_caller = false;

        loop {
            if let Pending::Listen = pending {
                if caller_turns >= self.settings.max_turns {
                    return CallEnd::failed(format!(
                        "call exceeded {} caller turns",
                        self.settings.max_turns
                    ));
                }

                self.hook.suspended(&job_id, Suspension::Listening);
                let heard = channel.listen(self.settings.listen_timeout).await;
                self.hook.resumed(&job_id, Suspension::Listening);

                match heard {
                    Ok(CallerInput::Utterance(text)) => {
                        caller_turns += 1;
                        heard_caller = true;
                        state.record_utterance(Speaker::Caller, text.trim(), self.registry.now());
                        pending = Pending::Respond(self.detector.turn(bundle, &text));
                    }
                    Ok(CallerInput::Silence) if !heard_caller => {
                        return CallEnd::forced(CallOutcome::NoAnswer);
                    }
                    Ok(CallerInput::Silence) => {
                        caller_turns += 1;
                        pending = Pending::Respond(CallerTurn::new("", CallerSignal::Neutral));
                    }
                    Ok(CallerInput::HungUp) | Err(ChannelError::Disconnected) => {
                        return CallEnd::forced(CallOutcome::Disconnected);
                    }
                    Err(error) => {
                        failures += 1;
                        self.log_failure(state, &error.to_string(), failures);
                        if failures >= TURN_ATTEMPTS {
                            return CallEnd::failed(error.to_string());
                        }
                        continue;
                    }
                }
            }

            let turn = match &pending {
                Pending::Respond(turn) => Some(turn),
                Pending::Enter | Pending::Listen => None,
            };
            match self.run_turn(state, bundle, channel, turn, &mut actions_done, &audit).await {
                Ok(plan) => {
                    failures = 0;
                    actions_done = 0;
                    match plan.next {
                        NextStep::End(outcome) => return CallEnd::finished(outcome),
                        NextStep::Advance(_) | NextStep::Regress(_) => pending = Pending::Enter,
                        NextStep::Stay => pending = Pending::Listen,
                    }
                }
                Err(TurnError::Channel(ChannelError::Disconnected)) => {
                    return CallEnd::forced(CallOutcome::Disconnected);
                }
                Err(error) => {
                    failures += 1;
                    self.log_failure(state, &error.to_string(), failures);
                    if failures >= TURN_ATTEMPTS {
                        return CallEnd::failed(error.to_string());
                    }
                }
            }
        }
    }

    /// Plans one step, runs its actions, speaks the reply, then commits it to `state`.
    /// Nothing is committed unless every step succeeded. Actions counted in `actions_done`
    /// are not run again.
    async fn run_turn<C>(
        &self,
        state: &mut CallState,
        bundle: &ContextBundle,
        channel: &mut C,
        turn: Option<&CallerTurn>,
        actions_done: &mut usize,
        audit: &AuditContext,
    ) -> Result<TurnPlan, TurnError>
    where
        C: CallerChannel + ?Sized,
    {
        let plan = match turn {
            Some(turn) => {
                self.engine.apply_with_audit(state, bundle, turn, self.audit.as_ref(), audit)?
            }
            None => self.engine.enter(state, bundle)?,
        };

        if plan.actions.len() > *actions_done {
            self.hook.suspended(&state.job_id, Suspension::Thinking);
            let invoked = self.invoke_from(&state.job_id, &plan.actions, actions_done).await;
            self.hook.resumed(&state.job_id, Suspension::Thinking);
            invoked?;
        }

        if !plan.reply.text.trim().is_empty() {
            channel.speak(&plan.reply).await?;
            state.record_utterance(Speaker::Agent, plan.reply.text.clone(), self.registry.now());
        }

        let from = state.phase;
        state.commit(&plan);
        if state.phase != from {
            debug!(
                event_name = "conversation.phase_changed",
                correlation_id = %state.job_id,
                job_id = %state.job_id,
                from = from.as_str(),
                to = state.phase.as_str(),
                "conversation phase changed"
            );
        }
        Ok(plan)
    }

    async fn invoke_all(&self, job_id: &JobId, actions: &[PhaseAction]) -> Result<(), ActionError> {
        self.invoke_from(job_id, actions, &mut 0).await
    }

    async fn invoke_from(
        &self,
        job_id: &JobId,
        actions: &[PhaseAction],
        done: &mut usize,
    ) -> Result<(), ActionError> {
        for action in actions.iter().skip(*done) {
            self.invoker.invoke(job_id, action).await?;
            *done += 1;
        }
        Ok(())
    }

    async fn force_close<C>(
        &self,
        state: &mut CallState,
        bundle: &ContextBundle,
        channel: &mut C,
        end: &CallEnd,
    ) where
        C: CallerChannel + ?Sized,
    {
        warn!(
            event_name = "conversation.forced_close",
            correlation_id = %state.job_id,
            job_id = %state.job_id,
            phase = state.phase.as_str(),
            outcome = end.outcome.as_str(),
            error = end.error.as_deref().unwrap_or(""),
            "conversation forced to close"
        );
        state.force_close(end.outcome);

        // Nobody is left on the line to hear a closing.
        if matches!(end.outcome, CallOutcome::NoAnswer | CallOutcome::Disconnected) {
            return;
        }

        let plan = self.engine.forced_close(bundle, end.outcome);
        if let Err(error) = self.invoke_all(&state.job_id, &plan.actions).await {
            warn!(
                event_name = "conversation.forced_close.action_failed",
                correlation_id = %state.job_id,
                job_id = %state.job_id,
                error = %error,
                "closing action failed"
            );
        }

        match tokio::time::timeout(self.settings.listen_timeout, channel.speak(&plan.reply)).await {
            Ok(Ok(())) => {
                state.record_utterance(Speaker::Agent, plan.reply.text.clone(), self.registry.now())
            }
            Ok(Err(error)) => debug!(
                event_name = "conversation.forced_close.unspoken",
                correlation_id = %state.job_id,
                job_id = %state.job_id,
                error = %error,
                "closing line could not be spoken"
            ),
            Err(_) => debug!(
                event_name = "conversation.forced_close.unspoken",
                correlation_id = %state.job_id,
                job_id = %state.job_id,
                "closing line timed out"
            ),
        }
        state.commit(&plan);
    }

    fn log_failure(&self, state: &CallState, error: &str, attempt: u32) {
        warn!(
            event_name = "conversation.turn_failed",
            correlation_id = %state.job_id,
            job_id = %state.job_id,
            phase = state.phase.as_str(),
            attempt,
            error,
            "conversation turn failed"
        );
    }
}
