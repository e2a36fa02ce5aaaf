use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::lead::Lead;
use crate::domain::submission::{Campaign, CallGoal};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextBundleId(pub String);

impl ContextBundleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ContextBundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadEmailTemplate {
    Booking,
    Payment,
}

/// Generated script material the script lines are rendered from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptLines {
    pub agent_instructions: String,
    pub opening_line: String,
    pub qualification_questions: Vec<String>,
    pub objection_handlers: BTreeMap<String, String>,
    pub pitch_line: String,
    pub closing_script: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextBundleError {
    #[error("context bundle field `{0}` must not be empty")]
    EmptyField(&'static str),
    #[error("objection handler `{0}` has no response text")]
    EmptyObjectionHandler(String),
}

/// Per-lead script bundle generated once before dialing. Immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    id: ContextBundleId,
    created_at: DateTime<Utc>,
    owner_email: String,
    lead: Lead,
    campaign: Campaign,
    agent_instructions: String,
    opening_line: String,
    qualification_questions: Vec<String>,
    objection_handlers: BTreeMap<String, String>,
    pitch_line: String,
    closing_script: String,
    should_email_lead: bool,
    lead_email_template: Option<LeadEmailTemplate>,
}

impl ContextBundle {
    pub fn new(
        owner_email: impl Into<String>,
        lead: Lead,
        campaign: Campaign,
        lines: ScriptLines,
    ) -> Result<Self, ContextBundleError> {
        if lines.opening_line.trim().is_empty() {
            return Err(ContextBundleError::EmptyField("opening_line"));
        }
        if lines.pitch_line.trim().is_empty() {
            return Err(ContextBundleError::EmptyField("pitch_line"));
        }
        if lines.closing_script.trim().is_empty() {
            return Err(ContextBundleError::EmptyField("closing_script"));
        }
        if let Some((key, _)) =
            lines.objection_handlers.iter().find(|(_, handler)| handler.trim().is_empty())
        {
            return Err(ContextBundleError::EmptyObjectionHandler(key.clone()));
        }

        let questions = lines
            .qualification_questions
            .into_iter()
            .map(|question| question.trim().to_string())
            .filter(|question| !question.is_empty())
            .collect();

        let lead_email_template = match campaign.goal {
            CallGoal::BookMeeting => Some(LeadEmailTemplate::Booking),
            CallGoal::CloseSale => Some(LeadEmailTemplate::Payment),
            CallGoal::QualifyInterest | CallGoal::CollectInfo => None,
        };

        Ok(Self {
            id: ContextBundleId::generate(),
            created_at: Utc::now(),
            owner_email: owner_email.into(),
            lead,
            campaign,
            agent_instructions: lines.agent_instructions,
            opening_line: lines.opening_line,
            qualification_questions: questions,
            objection_handlers: lines.objection_handlers,
            pitch_line: lines.pitch_line,
            closing_script: lines.closing_script,
            should_email_lead: lead_email_template.is_some(),
            lead_email_template,
        })
    }

    pub fn id(&self) -> &ContextBundleId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn owner_email(&self) -> &str {
        &self.owner_email
    }

    pub fn lead(&self) -> &Lead {
        &self.lead
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn goal(&self) -> CallGoal {
        self.campaign.goal
    }

    pub fn product(&self) -> &str {
        &self.campaign.product
    }

    pub fn agent_instructions(&self) -> &str {
        &self.agent_instructions
    }

    pub fn opening_line(&self) -> &str {
        &self.opening_line
    }

    pub fn qualification_questions(&self) -> &[String] {
        &self.qualification_questions
    }

    pub fn objection_handlers(&self) -> &BTreeMap<String, String> {
        &self.objection_handlers
    }

    pub fn objection_handler(&self, key: &str) -> Option<&str> {
        self.objection_handlers.get(key).map(String::as_str)
    }

    pub fn pitch_line(&self) -> &str {
        &self.pitch_line
    }

    pub fn closing_script(&self) -> &str {
        &self.closing_script
    }

    pub fn should_email_lead(&self) -> bool {
        self.should_email_lead
    }

    pub fn lead_email_template(&self) -> Option<LeadEmailTemplate> {
        self.lead_email_template
    }
}
