use serde::{Deserialize, Serialize};

use crate::domain::submission::SubmissionId;

/// One person to call. Only the phone number is required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl Lead {
    pub fn new(phone: impl Into<String>) -> Self {
        Self { phone: phone.into(), name: None, company: None, email: None, title: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }
}

/// Reference from a call job back to the lead it was created for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRef {
    pub submission_id: SubmissionId,
    pub position: usize,
    pub phone: String,
    pub name: Option<String>,
}

impl LeadRef {
    pub fn new(submission_id: SubmissionId, position: usize, lead: &Lead) -> Self {
        Self { submission_id, position, phone: lead.phone.clone(), name: lead.name.clone() }
    }
}

/// E.164: a `+`, a non-zero leading digit, and 7 to 15 digits in total.
pub fn is_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };

    let mut chars = digits.chars();
    let leading_ok = matches!(chars.next(), Some('1'..='9'));
    leading_ok && (7..=15).contains(&digits.len()) && digits.chars().all(|ch| ch.is_ascii_digit())
}
