use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::lead::{is_e164, Lead};

pub const MAX_LEADS_PER_SUBMISSION: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallGoal {
    BookMeeting,
    QualifyInterest,
    CollectInfo,
    CloseSale,
}

impl CallGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookMeeting => "book_meeting",
            Self::QualifyInterest => "qualify_interest",
            Self::CollectInfo => "collect_info",
            Self::CloseSale => "close_sale",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "book_meeting" => Some(Self::BookMeeting),
            "qualify_interest" => Some(Self::QualifyInterest),
            "collect_info" => Some(Self::CollectInfo),
            "close_sale" => Some(Self::CloseSale),
            _ => None,
        }
    }
}

/// Campaign parameters shared by every lead of one submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub product: String,
    pub goal: CallGoal,
    #[serde(default)]
    pub product_context: String,
    #[serde(default)]
    pub booking_link: Option<String>,
    #[serde(default)]
    pub payment_link: Option<String>,
    #[serde(default)]
    pub pricing_summary: Option<String>,
    #[serde(default)]
    pub urgency_hook: Option<String>,
    #[serde(default)]
    pub goal_criteria: Option<String>,
}

impl Campaign {
    pub fn new(product: impl Into<String>, goal: CallGoal) -> Self {
        Self {
            product: product.into(),
            goal,
            product_context: String::new(),
            booking_link: None,
            payment_link: None,
            pricing_summary: None,
            urgency_hook: None,
            goal_criteria: None,
        }
    }
}

/// Raw form payload, validated into a [`Submission`] before anything is dispatched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub owner_email: String,
    pub leads: Vec<Lead>,
    #[serde(flatten)]
    pub campaign: Campaign,
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub owner_email: String,
    pub leads: Vec<Lead>,
    pub campaign: Campaign,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("consent checkbox must be checked to proceed")]
    ConsentMissing,
    #[error("owner_email must be a valid email address")]
    InvalidOwnerEmail,
    #[error("product description is required")]
    MissingProduct,
    #[error("at least one lead is required")]
    NoLeads,
    #[error("maximum 5 leads allowed per submission, got {0}")]
    TooManyLeads(usize),
    /// `position` is zero-based, matching `LeadRef::position` and dispatch entries.
    #[error(
        "lead at position {position}: phone must be in E.164 format (e.g. +14155551234), \
         got `{phone}`"
    )]
    InvalidPhone { position: usize, phone: String },
    #[error("duplicate phone number: {0}")]
    DuplicatePhone(String),
    #[error("{field} is required when goal is {goal}")]
    MissingGoalField { field: &'static str, goal: &'static str },
}

impl SubmissionRequest {
    pub fn validate(self) -> Result<Submission, SubmissionError> {
        if !self.consent {
            return Err(SubmissionError::ConsentMissing);
        }
        if !looks_like_email(&self.owner_email) {
            return Err(SubmissionError::InvalidOwnerEmail);
        }
        if self.campaign.product.trim().is_empty() {
            return Err(SubmissionError::MissingProduct);
        }
        if self.leads.is_empty() {
            return Err(SubmissionError::NoLeads);
        }
        if self.leads.len() > MAX_LEADS_PER_SUBMISSION {
            return Err(SubmissionError::TooManyLeads(self.leads.len()));
        }

        validate_phones(&self.leads)?;
        validate_goal_fields(&self.campaign)?;

        Ok(Submission {
            id: SubmissionId::generate(),
            owner_email: self.owner_email.trim().to_string(),
            leads: self.leads,
            campaign: self.campaign,
            idempotency_key: self.idempotency_key,
            created_at: Utc::now(),
        })
    }
}

fn validate_phones(leads: &[Lead]) -> Result<(), SubmissionError> {
    let mut seen = BTreeSet::new();
    for (index, lead) in leads.iter().enumerate() {
        if !is_e164(&lead.phone) {
            return Err(SubmissionError::InvalidPhone {
                position: index,
                phone: lead.phone.clone(),
            });
        }
        if !seen.insert(lead.phone.as_str()) {
            return Err(SubmissionError::DuplicatePhone(lead.phone.clone()));
        }
    }
    Ok(())
}

fn validate_goal_fields(campaign: &Campaign) -> Result<(), SubmissionError> {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

    match campaign.goal {
        CallGoal::BookMeeting if !present(&campaign.booking_link) => {
            Err(SubmissionError::MissingGoalField { field: "booking_link", goal: "book_meeting" })
        }
        CallGoal::CloseSale if !present(&campaign.payment_link) => {
            Err(SubmissionError::MissingGoalField { field: "payment_link", goal: "close_sale" })
        }
        _ => Ok(()),
    }
}

fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
