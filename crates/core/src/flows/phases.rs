use crate::domain::call::CallOutcome;
use crate::domain::context::ContextBundle;
use crate::domain::submission::CallGoal;
use crate::flows::engine::ConversationLimits;
use crate::flows::states::{
    CallState, CallerSignal, CallerTurn, NextStep, Phase, PhaseAction, PlanTrigger, SpokenAction,
    StateEffect, TurnPlan,
};

/// Shared capability set of the four conversation phases. Implementations are pure:
/// they read the state and propose a plan, the engine validates it and the executor commits it.
pub trait PhaseBehavior: Send + Sync {
    fn phase(&self) -> Phase;

    fn allowed_actions(&self) -> &'static [&'static str];

    fn on_enter(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        limits: &ConversationLimits,
    ) -> TurnPlan;

    fn handle_turn(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
        limits: &ConversationLimits,
    ) -> TurnPlan;
}

pub fn behavior_for(phase: Phase) -> &'static dyn PhaseBehavior {
    match phase {
        Phase::Greeting => &GreetingPhase,
        Phase::Discovery => &DiscoveryPhase,
        Phase::Pitch => &PitchPhase,
        Phase::Close => &ClosePhase,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GreetingPhase;

impl PhaseBehavior for GreetingPhase {
    fn phase(&self) -> Phase {
        Phase::Greeting
    }

    fn allowed_actions(&self) -> &'static [&'static str] {
        &[]
    }

    fn on_enter(&self, _: &CallState, bundle: &ContextBundle, _: &ConversationLimits) -> TurnPlan {
        TurnPlan::new(
            Phase::Greeting,
            PlanTrigger::Entry,
            SpokenAction::uninterruptible(bundle.opening_line()),
        )
    }

    fn handle_turn(
        &self,
        _: &CallState,
        _: &ContextBundle,
        turn: &CallerTurn,
        _: &ConversationLimits,
    ) -> TurnPlan {
        let plan = |text: &str| {
            TurnPlan::new(Phase::Greeting, PlanTrigger::CallerTurn, SpokenAction::say(text))
                .then(NextStep::Advance(Phase::Discovery))
        };

        match &turn.signal {
            CallerSignal::Decline => plan("I understand. I'll keep this very short.")
                .with_effect(StateEffect::SetDeclined { reason: "not_interested".to_string() }),
            CallerSignal::Affirm | CallerSignal::BuyingIntent => plan("Great to hear."),
            CallerSignal::ProvidedEmail(email) => {
                plan("Thanks for that.").with_effect(StateEffect::SetLeadEmail(email.clone()))
            }
            _ => plan("Thanks for taking my call."),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DiscoveryPhase;

impl DiscoveryPhase {
    fn next_unasked(
        state: &CallState,
        bundle: &ContextBundle,
        skip: Option<usize>,
    ) -> Option<usize> {
        (0..bundle.qualification_questions().len())
            .find(|index| !state.asked_questions.contains(index) && Some(*index) != skip)
    }
}

impl PhaseBehavior for DiscoveryPhase {
    fn phase(&self) -> Phase {
        Phase::Discovery
    }

    fn allowed_actions(&self) -> &'static [&'static str] {
        &["record_answer"]
    }

    fn on_enter(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        _: &ConversationLimits,
    ) -> TurnPlan {
        let plan = |text: &str| {
            TurnPlan::new(Phase::Discovery, PlanTrigger::Entry, SpokenAction::say(text))
        };

        if state.flags.reopened_discovery {
            return plan("Of course. What would you like to add?");
        }
        if state.flags.declined {
            return plan("No problem.").then(NextStep::Advance(Phase::Pitch));
        }

        match Self::next_unasked(state, bundle, None) {
            Some(index) => plan(&bundle.qualification_questions()[index])
                .with_effect(StateEffect::AskQuestion(index)),
            None => plan("Thanks, that gives me a good picture.")
                .then(NextStep::Advance(Phase::Pitch)),
        }
    }

    fn handle_turn(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
        _: &ConversationLimits,
    ) -> TurnPlan {
        let plan = |text: &str| {
            TurnPlan::new(Phase::Discovery, PlanTrigger::CallerTurn, SpokenAction::say(text))
        };

        if state.flags.reopened_discovery {
            let question = "additional_context".to_string();
            return plan("Thanks for adding that.")
                .with_action(PhaseAction::RecordAnswer {
                    question: question.clone(),
                    answer: turn.text.clone(),
                })
                .with_effect(StateEffect::RecordAnswer { question, answer: turn.text.clone() })
                .with_effect(StateEffect::SetReopenedDiscovery(false))
                .then(NextStep::Advance(Phase::Pitch));
        }

        if turn.signal == CallerSignal::Decline {
            return plan("No problem, I'll be brief.")
                .with_effect(StateEffect::SetDeclined { reason: "declined_discovery".to_string() })
                .then(NextStep::Advance(Phase::Pitch));
        }

        let Some(current) = state.current_question else {
            return plan("Thanks.").then(NextStep::Advance(Phase::Pitch));
        };

        let question = bundle.qualification_questions().get(current).cloned().unwrap_or_default();
        let recorded = |plan: TurnPlan| {
            let mut plan = plan
                .with_action(PhaseAction::RecordAnswer {
                    question: question.clone(),
                    answer: turn.text.clone(),
                })
                .with_effect(StateEffect::RecordAnswer {
                    question: question.clone(),
                    answer: turn.text.clone(),
                });
            if let CallerSignal::ProvidedEmail(email) = &turn.signal {
                plan = plan.with_effect(StateEffect::SetLeadEmail(email.clone()));
            }
            plan
        };

        match Self::next_unasked(state, bundle, Some(current)) {
            Some(next) => recorded(plan(&bundle.qualification_questions()[next]))
                .with_effect(StateEffect::AskQuestion(next)),
            None => recorded(plan("Thanks, that's really helpful."))
                .then(NextStep::Advance(Phase::Pitch)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PitchPhase;

impl PhaseBehavior for PitchPhase {
    fn phase(&self) -> Phase {
        Phase::Pitch
    }

    fn allowed_actions(&self) -> &'static [&'static str] {
        &["record_objection", "send_objection_response"]
    }

    fn on_enter(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        _: &ConversationLimits,
    ) -> TurnPlan {
        let plan =
            |text: &str| TurnPlan::new(Phase::Pitch, PlanTrigger::Entry, SpokenAction::say(text));

        if state.flags.declined {
            return plan("I understand.").then(NextStep::Advance(Phase::Close));
        }
        if state.flags.pitch_delivered {
            return plan(
                "Thanks, that helps. With that in mind, does this sound like it could work for you?",
            );
        }
        plan(bundle.pitch_line()).with_effect(StateEffect::MarkPitchDelivered)
    }

    fn handle_turn(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
        limits: &ConversationLimits,
    ) -> TurnPlan {
        let plan = |text: String| {
            TurnPlan::new(Phase::Pitch, PlanTrigger::CallerTurn, SpokenAction::say(text))
        };

        match &turn.signal {
            CallerSignal::BuyingIntent | CallerSignal::Affirm => {
                plan("Great, let's talk about next steps.".to_string())
                    .with_effect(StateEffect::SetBuyingIntent)
                    .then(NextStep::Advance(Phase::Close))
            }
            CallerSignal::ProvidedEmail(email) => plan("Perfect, thank you.".to_string())
                .with_effect(StateEffect::SetLeadEmail(email.clone()))
                .with_effect(StateEffect::SetBuyingIntent)
                .then(NextStep::Advance(Phase::Close)),
            CallerSignal::Decline => plan("I understand, thanks for hearing me out.".to_string())
                .with_effect(StateEffect::SetDeclined { reason: "not_interested".to_string() })
                .then(NextStep::Advance(Phase::Close)),
            CallerSignal::ReopenDiscovery => plan("Sure, go ahead.".to_string())
                .with_effect(StateEffect::SetReopenedDiscovery(true))
                .then(NextStep::Regress(Phase::Discovery)),
            CallerSignal::Objection(key) => {
                let response = bundle.objection_handler(key).map(str::to_string).unwrap_or_else(|| {
                    format!(
                        "I hear you. A lot of teams felt the same before trying {}.",
                        bundle.product()
                    )
                });
                let cycles = state.objection_cycles + 1;
                let capped = cycles >= limits.max_objection_cycles;
                let reply = if capped {
                    format!("{response} Let me suggest a simple next step.")
                } else {
                    response
                };

                plan(reply)
                    .with_action(PhaseAction::RecordObjection {
                        key: key.clone(),
                        caller_text: turn.text.clone(),
                    })
                    .with_action(PhaseAction::SendObjectionResponse { key: key.clone() })
                    .with_effect(StateEffect::RecordObjection {
                        key: key.clone(),
                        caller_text: turn.text.clone(),
                    })
                    .with_effect(StateEffect::IncrementObjectionCycle)
                    .then(if capped { NextStep::Advance(Phase::Close) } else { NextStep::Stay })
            }
            CallerSignal::Neutral => {
                if state.phase_turns + 1 >= limits.max_objection_cycles {
                    plan("Let me suggest a simple next step.".to_string())
                        .then(NextStep::Advance(Phase::Close))
                } else {
                    plan("Does that sound like something that could help?".to_string())
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClosePhase;

impl ClosePhase {
    fn ending(bundle: &ContextBundle, outcome: CallOutcome) -> TurnPlan {
        TurnPlan::new(
            Phase::Close,
            PlanTrigger::CallerTurn,
            SpokenAction::say(bundle.closing_script()),
        )
        .with_action(PhaseAction::EndCall { outcome })
        .with_effect(StateEffect::SetOutcome(outcome))
        .then(NextStep::End(outcome))
    }

    fn opening_ask(bundle: &ContextBundle) -> String {
        let campaign = bundle.campaign();
        match bundle.goal() {
            CallGoal::BookMeeting => "Would you be open to a short follow-up meeting? \
                I can send you a link to pick a time that works."
                .to_string(),
            CallGoal::CloseSale => {
                let ask =
                    format!("Would you like to move forward with {} today?", campaign.product);
                match campaign.pricing_summary.as_deref().map(str::trim) {
                    Some(pricing) if !pricing.is_empty() => format!("{pricing} {ask}"),
                    _ => ask,
                }
            }
            CallGoal::QualifyInterest => format!(
                "Based on what you've shared, {} sounds like it could be a fit. \
                 Would you like us to follow up?",
                campaign.product
            ),
            CallGoal::CollectInfo => {
                "Just to confirm, is there anything else you'd like to add?".to_string()
            }
        }
    }

    fn link_goal(
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
    ) -> Option<TurnPlan> {
        let email = match &turn.signal {
            CallerSignal::ProvidedEmail(email) => Some(email.clone()),
            CallerSignal::Affirm | CallerSignal::BuyingIntent => {
                state.lead_email.clone().or_else(|| bundle.lead().email.clone())
            }
            _ => None,
        }?;

        let campaign = bundle.campaign();
        let outcome = CallOutcome::success_for(bundle.goal());
        let (link_key, link, action, noun) = match bundle.goal() {
            CallGoal::BookMeeting => {
                let link = campaign.booking_link.clone()?;
                let action = PhaseAction::BookMeeting {
                    booking_link: link.clone(),
                    email: Some(email.clone()),
                };
                ("booking_link", link, action, "booking link")
            }
            CallGoal::CloseSale => {
                let link = campaign.payment_link.clone()?;
                let action = PhaseAction::SendPaymentLink {
                    payment_link: link.clone(),
                    email: Some(email.clone()),
                };
                ("payment_link", link, action, "payment link")
            }
            CallGoal::QualifyInterest | CallGoal::CollectInfo => return None,
        };

        let reply =
            format!("Perfect, I'll send the {noun} to {email}. {}", bundle.closing_script());
        Some(
            TurnPlan::new(Phase::Close, PlanTrigger::CallerTurn, SpokenAction::say(reply))
                .with_action(PhaseAction::RecordEmail { email: email.clone() })
                .with_action(action)
                .with_action(PhaseAction::EndCall { outcome })
                .with_effect(StateEffect::SetLeadEmail(email))
                .with_effect(StateEffect::Collect { key: link_key.to_string(), value: link })
                .with_effect(StateEffect::SetOutcome(outcome))
                .then(NextStep::End(outcome)),
        )
    }

    fn confirm(state: &CallState, bundle: &ContextBundle, outcome: CallOutcome) -> TurnPlan {
        let mut plan = Self::ending(bundle, outcome);
        plan.actions.insert(0, PhaseAction::ConfirmInfo { fields: state.answers.clone() });
        plan
    }
}

impl PhaseBehavior for ClosePhase {
    fn phase(&self) -> Phase {
        Phase::Close
    }

    fn allowed_actions(&self) -> &'static [&'static str] {
        &["book_meeting", "record_email", "send_payment_link", "confirm_info", "end_call"]
    }

    fn on_enter(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        _: &ConversationLimits,
    ) -> TurnPlan {
        if state.flags.declined {
            let mut plan = Self::ending(bundle, CallOutcome::NotInterested);
            plan.trigger = PlanTrigger::Entry;
            return plan;
        }

        TurnPlan::new(
            Phase::Close,
            PlanTrigger::Entry,
            SpokenAction::say(Self::opening_ask(bundle)),
        )
    }

    fn handle_turn(
        &self,
        state: &CallState,
        bundle: &ContextBundle,
        turn: &CallerTurn,
        limits: &ConversationLimits,
    ) -> TurnPlan {
        if turn.signal == CallerSignal::Decline {
            let mut plan = Self::ending(bundle, CallOutcome::NotInterested);
            if !state.flags.declined {
                plan = plan
                    .with_effect(StateEffect::SetDeclined { reason: "not_interested".to_string() });
            }
            return plan;
        }

        let positive = matches!(turn.signal, CallerSignal::Affirm | CallerSignal::BuyingIntent);
        let proposed = match bundle.goal() {
            CallGoal::BookMeeting | CallGoal::CloseSale => {
                if let Some(plan) = Self::link_goal(state, bundle, turn) {
                    Some(plan)
                } else if positive {
                    Some(
                        TurnPlan::new(
                            Phase::Close,
                            PlanTrigger::CallerTurn,
                            SpokenAction::say("Great. What's the best email to send the link to?"),
                        )
                        .with_effect(StateEffect::SetGoalAgreed),
                    )
                } else {
                    None
                }
            }
            CallGoal::QualifyInterest if positive => {
                Some(Self::confirm(state, bundle, CallOutcome::Qualified))
            }
            CallGoal::QualifyInterest => None,
            CallGoal::CollectInfo => {
                let mut plan = if state.answers.is_empty()
                    && state.lead_email.is_none()
                    && !matches!(turn.signal, CallerSignal::ProvidedEmail(_))
                {
                    Self::ending(bundle, CallOutcome::FailedGoal)
                } else {
                    Self::confirm(state, bundle, CallOutcome::InfoCollected)
                };
                match &turn.signal {
                    CallerSignal::ProvidedEmail(email) => {
                        plan = plan.with_effect(StateEffect::SetLeadEmail(email.clone()));
                    }
                    CallerSignal::Neutral if !turn.text.trim().is_empty() => {
                        plan = plan.with_effect(StateEffect::Collect {
                            key: "additional_notes".to_string(),
                            value: turn.text.trim().to_string(),
                        });
                    }
                    _ => {}
                }
                Some(plan)
            }
        };

        let turn_number = state.phase_turns + 1;
        match proposed {
            Some(plan) if plan.ends_call() => plan,
            Some(plan) if turn_number < limits.max_close_turns => plan,
            None if turn_number < limits.max_close_turns => {
                let prompt = match &turn.signal {
                    CallerSignal::Objection(key) => bundle
                        .objection_handler(key)
                        .map(str::to_string)
                        .unwrap_or_else(|| "I understand.".to_string()),
                    _ => Self::opening_ask(bundle),
                };
                TurnPlan::new(Phase::Close, PlanTrigger::CallerTurn, SpokenAction::say(prompt))
            }
            _ => Self::ending(bundle, CallOutcome::FailedGoal),
        }
    }
}
