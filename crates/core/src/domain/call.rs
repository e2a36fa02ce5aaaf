use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::JobId;
use crate::domain::submission::CallGoal;
use crate::flows::states::{CallState, Phase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    Caller,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Agent => "Agent",
            Self::Caller => "Caller",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub phase: Phase,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    MeetingBooked,
    Qualified,
    InfoCollected,
    SaleCommitted,
    NotInterested,
    FailedGoal,
    NoAnswer,
    Disconnected,
    Error,
}

impl CallOutcome {
    /// Outcome recorded when the goal of the call was reached.
    pub fn success_for(goal: CallGoal) -> Self {
        match goal {
            CallGoal::BookMeeting => Self::MeetingBooked,
            CallGoal::QualifyInterest => Self::Qualified,
            CallGoal::CollectInfo => Self::InfoCollected,
            CallGoal::CloseSale => Self::SaleCommitted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeetingBooked => "meeting_booked",
            Self::Qualified => "qualified",
            Self::InfoCollected => "info_collected",
            Self::SaleCommitted => "sale_committed",
            Self::NotInterested => "not_interested",
            Self::FailedGoal => "failed_goal",
            Self::NoAnswer => "no_answer",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "meeting_booked" => Some(Self::MeetingBooked),
            "qualified" => Some(Self::Qualified),
            "info_collected" => Some(Self::InfoCollected),
            "sale_committed" => Some(Self::SaleCommitted),
            "not_interested" => Some(Self::NotInterested),
            "failed_goal" => Some(Self::FailedGoal),
            "no_answer" => Some(Self::NoAnswer),
            "disconnected" => Some(Self::Disconnected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_goal_met(&self) -> bool {
        matches!(
            self,
            Self::MeetingBooked | Self::Qualified | Self::InfoCollected | Self::SaleCommitted
        )
    }
}

/// Structured output of one finished call. Written once, at call end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub job_id: JobId,
    pub goal: CallGoal,
    pub outcome: CallOutcome,
    pub objection_reason: Option<String>,
    pub collected: BTreeMap<String, String>,
    pub lead_email: Option<String>,
    pub transcript: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub error: Option<String>,
}

impl CallResult {
    pub fn from_state(
        state: &CallState,
        outcome: CallOutcome,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Self {
        let mut collected = state.collected.clone();
        for (question, answer) in &state.answers {
            collected.entry(question.clone()).or_insert_with(|| answer.clone());
        }

        let objection_reason = state
            .flags
            .decline_reason
            .clone()
            .or_else(|| state.objections.last().map(|objection| objection.key.clone()));

        Self {
            job_id: state.job_id.clone(),
            goal: state.goal,
            outcome,
            objection_reason,
            collected,
            lead_email: state.lead_email.clone(),
            transcript: render_transcript(&state.transcript),
            started_at,
            ended_at,
            duration_secs: (ended_at - started_at).num_milliseconds().max(0) as f64 / 1000.0,
            error,
        }
    }
}

pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}: {}", entry.speaker.label(), entry.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{CallOutcome, CallResult, Speaker};
    use crate::domain::job::JobId;
    use crate::domain::submission::CallGoal;
    use crate::flows::states::{CallState, Phase};

    #[test]
    fn goal_success_outcomes_are_goal_specific() {
        assert_eq!(CallOutcome::success_for(CallGoal::BookMeeting), CallOutcome::MeetingBooked);
        assert_eq!(CallOutcome::success_for(CallGoal::CloseSale), CallOutcome::SaleCommitted);
        assert!(CallOutcome::Qualified.is_goal_met());
        assert!(!CallOutcome::FailedGoal.is_goal_met());
        assert_eq!(CallOutcome::parse("no_answer"), Some(CallOutcome::NoAnswer));
    }

    #[test]
    fn result_carries_answers_and_rendered_transcript() {
        let started = Utc::now();
        let mut state = CallState::new(JobId("job-1".to_string()), CallGoal::QualifyInterest, None);
        state.answers.insert("How big is your team?".to_string(), "About 40 people".to_string());
        state.record_utterance(Speaker::Agent, "Hi there", started);
        state.record_utterance(Speaker::Caller, "Hello", started);

        let result = CallResult::from_state(
            &state,
            CallOutcome::Qualified,
            started,
            started + Duration::seconds(95),
            None,
        );

        assert_eq!(result.transcript, "Agent: Hi there\nCaller: Hello");
        assert_eq!(
            result.collected.get("How big is your team?").map(String::as_str),
            Some("About 40 people")
        );
        assert_eq!(result.duration_secs, 95.0);
        assert_eq!(state.transcript[1].phase, Phase::Greeting);
    }
}
