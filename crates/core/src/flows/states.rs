use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::call::{CallOutcome, Speaker, TranscriptEntry};
use crate::domain::job::JobId;
use crate::domain::submission::CallGoal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    Discovery,
    Pitch,
    Close,
}

impl Phase {
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Self::Greeting => Some(Self::Discovery),
            Self::Discovery => Some(Self::Pitch),
            Self::Pitch => Some(Self::Close),
            Self::Close => None,
        }
    }

    pub fn predecessor(&self) -> Option<Phase> {
        match self {
            Self::Greeting => None,
            Self::Discovery => Some(Self::Greeting),
            Self::Pitch => Some(Self::Discovery),
            Self::Close => Some(Self::Pitch),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Discovery => "discovery",
            Self::Pitch => "pitch",
            Self::Close => "close",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFlags {
    pub buying_intent: bool,
    pub declined: bool,
    pub decline_reason: Option<String>,
    pub goal_agreed: bool,
    pub pitch_delivered: bool,
    pub reopened_discovery: bool,
    pub sentiment: Sentiment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedObjection {
    pub key: String,
    pub caller_text: String,
}

/// Mutable state of one call. Owned by the task driving that call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallState {
    pub job_id: JobId,
    pub goal: CallGoal,
    pub phase: Phase,
    pub lead_name: Option<String>,
    pub asked_questions: BTreeSet<usize>,
    pub current_question: Option<usize>,
    pub answers: BTreeMap<String, String>,
    pub objections: Vec<DetectedObjection>,
    pub objection_cycles: u32,
    pub flags: CallFlags,
    pub phase_turns: u32,
    pub lead_email: Option<String>,
    pub collected: BTreeMap<String, String>,
    pub outcome: Option<CallOutcome>,
    pub transcript: Vec<TranscriptEntry>,
}

impl CallState {
    pub fn new(job_id: JobId, goal: CallGoal, lead_name: Option<String>) -> Self {
        Self {
            job_id,
            goal,
            phase: Phase::Greeting,
            lead_name,
            asked_questions: BTreeSet::new(),
            current_question: None,
            answers: BTreeMap::new(),
            objections: Vec::new(),
            objection_cycles: 0,
            flags: CallFlags::default(),
            phase_turns: 0,
            lead_email: None,
            collected: BTreeMap::new(),
            outcome: None,
            transcript: Vec::new(),
        }
    }

    pub fn record_utterance(
        &mut self,
        speaker: Speaker,
        text: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.transcript.push(TranscriptEntry { speaker, phase: self.phase, text: text.into(), at });
    }

    pub fn apply_effect(&mut self, effect: &StateEffect) {
        match effect {
            StateEffect::AskQuestion(index) => {
                self.asked_questions.insert(*index);
                self.current_question = Some(*index);
            }
            StateEffect::RecordAnswer { question, answer } => {
                self.answers.insert(question.clone(), answer.clone());
                self.current_question = None;
            }
            StateEffect::RecordObjection { key, caller_text } => {
                self.objections
                    .push(DetectedObjection { key: key.clone(), caller_text: caller_text.clone() });
                self.collected.insert(format!("objection_{key}"), caller_text.clone());
            }
            StateEffect::IncrementObjectionCycle => self.objection_cycles += 1,
            StateEffect::SetBuyingIntent => {
                self.flags.buying_intent = true;
                self.flags.sentiment = Sentiment::Positive;
            }
            StateEffect::SetDeclined { reason } => {
                self.flags.declined = true;
                self.flags.decline_reason = Some(reason.clone());
                self.flags.sentiment = Sentiment::Negative;
            }
            StateEffect::SetGoalAgreed => self.flags.goal_agreed = true,
            StateEffect::MarkPitchDelivered => self.flags.pitch_delivered = true,
            StateEffect::SetReopenedDiscovery(value) => self.flags.reopened_discovery = *value,
            StateEffect::SetLeadEmail(email) => {
                self.lead_email = Some(email.clone());
                self.collected.insert("email".to_string(), email.clone());
            }
            StateEffect::Collect { key, value } => {
                self.collected.insert(key.clone(), value.clone());
            }
            StateEffect::SetOutcome(outcome) => self.outcome = Some(*outcome),
        }
    }

    /// Commits a plan whose actions all succeeded: effects first, then the phase step.
    pub fn commit(&mut self, plan: &TurnPlan) {
        for effect in &plan.effects {
            self.apply_effect(effect);
        }

        match plan.next {
            NextStep::Advance(phase) | NextStep::Regress(phase) => {
                self.phase = phase;
                self.phase_turns = 0;
            }
            NextStep::Stay => {
                if plan.trigger == PlanTrigger::CallerTurn {
                    self.phase_turns += 1;
                }
            }
            NextStep::End(outcome) => {
                self.outcome = Some(outcome);
            }
        }
    }

    /// Jumps straight to Close with a fixed outcome. Only used on the failure path.
    pub fn force_close(&mut self, outcome: CallOutcome) {
        self.phase = Phase::Close;
        self.phase_turns = 0;
        self.outcome = Some(outcome);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallerSignal {
    Affirm,
    Decline,
    BuyingIntent,
    Objection(String),
    ReopenDiscovery,
    ProvidedEmail(String),
    Neutral,
}

/// One caller utterance together with the signal detected in it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerTurn {
    pub text: String,
    pub signal: CallerSignal,
}

impl CallerTurn {
    pub fn new(text: impl Into<String>, signal: CallerSignal) -> Self {
        Self { text: text.into(), signal }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpokenAction {
    pub text: String,
    pub interruptible: bool,
}

impl SpokenAction {
    pub fn say(text: impl Into<String>) -> Self {
        Self { text: text.into(), interruptible: true }
    }

    pub fn uninterruptible(text: impl Into<String>) -> Self {
        Self { text: text.into(), interruptible: false }
    }
}

/// Named tool invocation requested by a phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PhaseAction {
    RecordAnswer { question: String, answer: String },
    RecordObjection { key: String, caller_text: String },
    SendObjectionResponse { key: String },
    BookMeeting { booking_link: String, email: Option<String> },
    RecordEmail { email: String },
    SendPaymentLink { payment_link: String, email: Option<String> },
    ConfirmInfo { fields: BTreeMap<String, String> },
    EndCall { outcome: CallOutcome },
}

impl PhaseAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecordAnswer { .. } => "record_answer",
            Self::RecordObjection { .. } => "record_objection",
            Self::SendObjectionResponse { .. } => "send_objection_response",
            Self::BookMeeting { .. } => "book_meeting",
            Self::RecordEmail { .. } => "record_email",
            Self::SendPaymentLink { .. } => "send_payment_link",
            Self::ConfirmInfo { .. } => "confirm_info",
            Self::EndCall { .. } => "end_call",
        }
    }
}

/// Pure mutation of [`CallState`], applied only after a plan's actions succeeded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateEffect {
    AskQuestion(usize),
    RecordAnswer { question: String, answer: String },
    RecordObjection { key: String, caller_text: String },
    IncrementObjectionCycle,
    SetBuyingIntent,
    SetDeclined { reason: String },
    SetGoalAgreed,
    MarkPitchDelivered,
    SetReopenedDiscovery(bool),
    SetLeadEmail(String),
    Collect { key: String, value: String },
    SetOutcome(CallOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextStep {
    Stay,
    Advance(Phase),
    Regress(Phase),
    End(CallOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanTrigger {
    Entry,
    CallerTurn,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnPlan {
    pub phase: Phase,
    pub trigger: PlanTrigger,
    pub reply: SpokenAction,
    pub actions: Vec<PhaseAction>,
    pub effects: Vec<StateEffect>,
    pub next: NextStep,
}

impl TurnPlan {
    pub fn new(phase: Phase, trigger: PlanTrigger, reply: SpokenAction) -> Self {
        Self {
            phase,
            trigger,
            reply,
            actions: Vec::new(),
            effects: Vec::new(),
            next: NextStep::Stay,
        }
    }

    pub fn with_action(mut self, action: PhaseAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_effect(mut self, effect: StateEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn then(mut self, next: NextStep) -> Self {
        self.next = next;
        self
    }

    pub fn ends_call(&self) -> bool {
        matches!(self.next, NextStep::End(_))
    }
}
