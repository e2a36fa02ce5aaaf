use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::call::CallOutcome;
use crate::domain::context::ContextBundle;
use crate::flows::phases::{behavior_for, PhaseBehavior};
use crate::flows::states::{
    CallState, CallerTurn, NextStep, Phase, PhaseAction, PlanTrigger, SpokenAction, StateEffect,
    TurnPlan,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversationLimits {
    pub max_objection_cycles: u32,
    pub max_close_turns: u32,
}

impl Default for ConversationLimits {
    fn default() -> Self {
        Self { max_objection_cycles: 3, max_close_turns: 3 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("plan produced by {plan:?} cannot be applied while the call is in {state:?}")]
    PhaseMismatch { state: Phase, plan: Phase },
    #[error("cannot advance from {from:?} to {to:?}: phases may not be skipped")]
    PhaseSkipped { from: Phase, to: Phase },
    #[error("cannot regress from {from:?} to {to:?}: regression is limited to one step back")]
    RegressionNotAllowed { from: Phase, to: Phase },
    #[error("only the close phase may end a call, not {phase:?}")]
    EndOutsideClose { phase: Phase },
    #[error("action `{action}` is not available in {phase:?}")]
    ActionNotAllowed { phase: Phase, action: String },
}

/// Pure conversation transition function. Holds no per-call state: the same engine
/// can drive any number of concurrent calls.
#[derive(Clone, Debug, Default)]
pub struct ConversationEngine {
    limits: ConversationLimits,
}

impl ConversationEngine {
    pub fn new(limits: ConversationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ConversationLimits {
        &self.limits
    }

    /// Plan for the moment the call enters its current phase.
    pub fn enter(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
    ) -> Result<TurnPlan, FlowTransitionError> {
        let behavior = behavior_for(state.phase);
        let plan = behavior.on_enter(state, bundle, &self.limits);
        validate(state.phase, behavior, plan)
    }

    pub fn apply(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
    ) -> Result<TurnPlan, FlowTransitionError> {
        let behavior = behavior_for(state.phase);
        let plan = behavior.handle_turn(state, bundle, turn, &self.limits);
        validate(state.phase, behavior, plan)
    }

    pub fn apply_with_audit<S>(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TurnPlan, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(state, bundle, turn);
        match &result {
            Ok(plan) => {
                sink.emit(
                    AuditEvent::new(
                        audit.job_id.clone(),
                        audit.correlation_id.clone(),
                        "conversation.transition_applied",
                        AuditCategory::Conversation,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", plan.phase.as_str())
                    .with_metadata("next", format!("{:?}", plan.next))
                    .with_metadata("signal", format!("{:?}", turn.signal))
                    .with_metadata(
                        "actions",
                        plan.actions.iter().map(PhaseAction::name).collect::<Vec<_>>().join(","),
                    ),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.job_id.clone(),
                        audit.correlation_id.clone(),
                        "conversation.transition_rejected",
                        AuditCategory::Conversation,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("phase", state.phase.as_str())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    /// Early termination plan used on the failure path. Skips the ordering checks.
    pub fn forced_close(&self, bundle: &ContextBundle, outcome: CallOutcome) -> TurnPlan {
        TurnPlan::new(Phase::Close, PlanTrigger::Entry, SpokenAction::say(bundle.closing_script()))
            .with_action(PhaseAction::EndCall { outcome })
            .with_effect(StateEffect::SetOutcome(outcome))
            .then(NextStep::End(outcome))
    }
}

fn validate(
    current: Phase,
    behavior: &dyn PhaseBehavior,
    plan: TurnPlan,
) -> Result<TurnPlan, FlowTransitionError> {
    if plan.phase != current {
        return Err(FlowTransitionError::PhaseMismatch { state: current, plan: plan.phase });
    }

    if let Some(action) =
        plan.actions.iter().find(|action| !behavior.allowed_actions().contains(&action.name()))
    {
        return Err(FlowTransitionError::ActionNotAllowed {
            phase: current,
            action: action.name().to_string(),
        });
    }

    match plan.next {
        NextStep::Stay => {}
        NextStep::Advance(to) if current.successor() == Some(to) => {}
        NextStep::Advance(to) => {
            return Err(FlowTransitionError::PhaseSkipped { from: current, to })
        }
        NextStep::Regress(to) if current.predecessor() == Some(to) => {}
        NextStep::Regress(to) => {
            return Err(FlowTransitionError::RegressionNotAllowed { from: current, to })
        }
        NextStep::End(_) if current == Phase::Close => {}
        NextStep::End(_) => return Err(FlowTransitionError::EndOutsideClose { phase: current }),
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::call::CallOutcome;
    use crate::domain::context::{ContextBundle, ScriptLines};
    use crate::domain::job::JobId;
    use crate::domain::lead::Lead;
    use crate::domain::submission::{CallGoal, Campaign};
    use crate::flows::engine::{validate, ConversationEngine, FlowTransitionError};
    use crate::flows::phases::{behavior_for, PhaseBehavior};
    use crate::flows::states::{
        CallState, CallerSignal, CallerTurn, NextStep, Phase, PhaseAction, PlanTrigger,
        SpokenAction, TurnPlan,
    };

    fn bundle() -> ContextBundle {
        let mut campaign = Campaign::new("Acme Analytics", CallGoal::BookMeeting);
        campaign.booking_link = Some("https://cal.example.com/acme".to_string());
        ContextBundle::new(
            "owner@example.com",
            Lead::new("+14155551234").with_name("Alice"),
            campaign,
            ScriptLines {
                agent_instructions: String::new(),
                opening_line: "Hi Alice, this is Sam from Acme.".to_string(),
                qualification_questions: vec!["How do you report today?".to_string()],
                objection_handlers: BTreeMap::from([(
                    "too_expensive".to_string(),
                    "It pays for itself.".to_string(),
                )]),
                pitch_line: "Acme halves your reporting time.".to_string(),
                closing_script: "Thanks for your time.".to_string(),
            },
        )
        .expect("bundle")
    }

    /// Drives one call through the engine, committing every plan the way the executor does.
    fn drive(engine: &ConversationEngine, turns: &[CallerTurn]) -> (CallState, Vec<Phase>) {
        let bundle = bundle();
        let mut state = CallState::new(JobId("job-1".to_string()), CallGoal::BookMeeting, None);
        let mut observed = vec![state.phase];

        let mut plan = engine.enter(&state, &bundle).expect("enter greeting");
        state.commit(&plan);
        let mut turns = turns.iter();

        while !plan.ends_call() {
            if matches!(plan.next, NextStep::Advance(_) | NextStep::Regress(_)) {
                observed.push(state.phase);
                plan = engine.enter(&state, &bundle).expect("enter phase");
                state.commit(&plan);
                continue;
            }
            let Some(turn) = turns.next() else { break };
            plan = engine.apply(&state, &bundle, turn).expect("apply turn");
            state.commit(&plan);
        }

        (state, observed)
    }

    #[test]
    fn happy_path_visits_phases_in_order() {
        let engine = ConversationEngine::default();
        let (state, observed) = drive(
            &engine,
            &[
                CallerTurn::new("Hi, sure", CallerSignal::Affirm),
                CallerTurn::new("Spreadsheets", CallerSignal::Neutral),
                CallerTurn::new("Sounds great", CallerSignal::BuyingIntent),
                CallerTurn::new("a@b.co", CallerSignal::ProvidedEmail("a@b.co".to_string())),
            ],
        );

        assert_eq!(observed, vec![Phase::Greeting, Phase::Discovery, Phase::Pitch, Phase::Close]);
        assert_eq!(state.outcome, Some(CallOutcome::MeetingBooked));
        assert_eq!(
            state.answers.get("How do you report today?").map(String::as_str),
            Some("Spreadsheets")
        );
        assert_eq!(state.lead_email.as_deref(), Some("a@b.co"));
    }

    #[test]
    fn objections_never_loop_forever() {
        let engine = ConversationEngine::default();
        let objection =
            CallerTurn::new("too expensive", CallerSignal::Objection("too_expensive".into()));
        let mut turns = vec![
            CallerTurn::new("Hello", CallerSignal::Neutral),
            CallerTurn::new("Spreadsheets", CallerSignal::Neutral),
        ];
        turns.extend(std::iter::repeat(objection).take(10));

        let (state, observed) = drive(&engine, &turns);

        assert_eq!(state.objection_cycles, 3);
        assert_eq!(observed.last(), Some(&Phase::Close));
        assert_eq!(state.outcome, Some(CallOutcome::FailedGoal));
    }

    #[test]
    fn regression_returns_to_pitch_with_accumulated_state() {
        let engine = ConversationEngine::default();
        let (state, observed) = drive(
            &engine,
            &[
                CallerTurn::new("Hello", CallerSignal::Neutral),
                CallerTurn::new("Spreadsheets", CallerSignal::Neutral),
                CallerTurn::new("Actually, one more thing", CallerSignal::ReopenDiscovery),
                CallerTurn::new("We also use Excel macros", CallerSignal::Neutral),
                CallerTurn::new("Sign me up", CallerSignal::BuyingIntent),
                CallerTurn::new("no", CallerSignal::Decline),
            ],
        );

        assert_eq!(
            observed,
            vec![
                Phase::Greeting,
                Phase::Discovery,
                Phase::Pitch,
                Phase::Discovery,
                Phase::Pitch,
                Phase::Close
            ]
        );
        assert_eq!(state.answers.len(), 2);
        assert_eq!(state.outcome, Some(CallOutcome::NotInterested));
    }

    #[test]
    fn validation_rejects_skips_and_foreign_actions() {
        let greeting = behavior_for(Phase::Greeting);
        let skip = TurnPlan::new(Phase::Greeting, PlanTrigger::CallerTurn, SpokenAction::say("x"))
            .then(NextStep::Advance(Phase::Pitch));
        assert_eq!(
            validate(Phase::Greeting, greeting, skip),
            Err(FlowTransitionError::PhaseSkipped { from: Phase::Greeting, to: Phase::Pitch })
        );

        let discovery = behavior_for(Phase::Discovery);
        let foreign =
            TurnPlan::new(Phase::Discovery, PlanTrigger::CallerTurn, SpokenAction::say("x"))
                .with_action(PhaseAction::EndCall { outcome: CallOutcome::Qualified });
        assert!(matches!(
            validate(Phase::Discovery, discovery, foreign),
            Err(FlowTransitionError::ActionNotAllowed { phase: Phase::Discovery, .. })
        ));

        let end = TurnPlan::new(Phase::Pitch, PlanTrigger::CallerTurn, SpokenAction::say("x"))
            .then(NextStep::End(CallOutcome::Qualified));
        assert_eq!(
            validate(Phase::Pitch, behavior_for(Phase::Pitch), end),
            Err(FlowTransitionError::EndOutsideClose { phase: Phase::Pitch })
        );
        assert_eq!(behavior_for(Phase::Close).phase(), Phase::Close);
    }

    #[test]
    fn audited_apply_records_applied_transitions() {
        let engine = ConversationEngine::default();
        let bundle = bundle();
        let state = CallState::new(JobId("job-7".to_string()), CallGoal::BookMeeting, None);
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(JobId("job-7".to_string())), "req-1", "executor");

        let plan = engine
            .apply_with_audit(
                &state,
                &bundle,
                &CallerTurn::new("hello", CallerSignal::Neutral),
                &sink,
                &audit,
            )
            .expect("greeting turn");

        assert_eq!(plan.next, NextStep::Advance(Phase::Discovery));
        let events = sink.events_of_type("conversation.transition_applied");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata.get("from").map(String::as_str), Some("greeting"));
    }
}
