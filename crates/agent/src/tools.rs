use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dialflow_core::domain::context::LeadEmailTemplate;
use dialflow_core::domain::job::JobId;
use dialflow_core::flows::PhaseAction;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("no tool is registered for action `{0}`")]
    UnknownAction(String),
    #[error("invalid input for action `{action}`: {message}")]
    InvalidInput { action: String, message: String },
    #[error("action `{action}` failed: {message}")]
    Failed { action: String, message: String },
}

/// Runs the named actions a phase plan asks for.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, job_id: &JobId, action: &PhaseAction) -> Result<Value, ActionError>;
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, job_id: &JobId, input: Value) -> Result<Value, ActionError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Every phase action backed by its default tool. Links go to `outbox`.
    pub fn standard(outbox: LinkOutbox) -> Self {
        let mut registry = Self::default();
        for name in [
            "record_answer",
            "record_objection",
            "send_objection_response",
            "record_email",
            "confirm_info",
            "end_call",
        ] {
            registry.register(AcknowledgeTool { name });
        }
        registry.register(LinkDeliveryTool {
            name: "book_meeting",
            link_field: "booking_link",
            template: LeadEmailTemplate::Booking,
            outbox: outbox.clone(),
        });
        registry.register(LinkDeliveryTool {
            name: "send_payment_link",
            link_field: "payment_link",
            template: LeadEmailTemplate::Payment,
            outbox,
        });
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ActionInvoker for ToolRegistry {
    async fn invoke(&self, job_id: &JobId, action: &PhaseAction) -> Result<Value, ActionError> {
        let name = action.name();
        let tool = self.tools.get(name).ok_or_else(|| ActionError::UnknownAction(name.into()))?;
        let input = serde_json::to_value(action).map_err(|error| ActionError::InvalidInput {
            action: name.to_string(),
            message: error.to_string(),
        })?;
        tool.execute(job_id, input).await
    }
}

/// Accepts the action and echoes it back. Record-keeping actions only need the call
/// state, which the executor updates once the plan succeeds.
struct AcknowledgeTool {
    name: &'static str,
}

#[async_trait]
impl Tool for AcknowledgeTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, job_id: &JobId, input: Value) -> Result<Value, ActionError> {
        info!(
            event_name = "agent.tool.executed",
            correlation_id = %job_id,
            job_id = %job_id,
            tool = self.name,
            "phase action acknowledged"
        );
        Ok(json!({ "ok": true, "action": self.name, "input": input }))
    }
}

/// A booking or payment link queued for delivery to the lead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundLink {
    pub job_id: JobId,
    pub template: LeadEmailTemplate,
    pub email: String,
    pub link: String,
}

/// Links waiting for the email collaborator. Shared between tools and the caller.
#[derive(Clone, Debug, Default)]
pub struct LinkOutbox {
    links: Arc<Mutex<Vec<OutboundLink>>>,
}

impl LinkOutbox {
    pub fn links(&self) -> Vec<OutboundLink> {
        match self.links.lock() {
            Ok(links) => links.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, link: OutboundLink) {
        match self.links.lock() {
            Ok(mut links) => links.push(link),
            Err(poisoned) => poisoned.into_inner().push(link),
        }
    }
}

struct LinkDeliveryTool {
    name: &'static str,
    link_field: &'static str,
    template: LeadEmailTemplate,
    outbox: LinkOutbox,
}

#[async_trait]
impl Tool for LinkDeliveryTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, job_id: &JobId, input: Value) -> Result<Value, ActionError> {
        let field = |key: &str| {
            input
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let link = field(self.link_field).ok_or_else(|| ActionError::InvalidInput {
            action: self.name.to_string(),
            message: format!("`{}` is required", self.link_field),
        })?;
        let email = field("email").ok_or_else(|| ActionError::Failed {
            action: self.name.to_string(),
            message: "no email address to send the link to".to_string(),
        })?;

        self.outbox.push(OutboundLink {
            job_id: job_id.clone(),
            template: self.template,
            email: email.clone(),
            link: link.clone(),
        });
        info!(
            event_name = "agent.tool.link_queued",
            correlation_id = %job_id,
            job_id = %job_id,
            tool = self.name,
            "link queued for delivery"
        );
        Ok(json!({ "ok": true, "action": self.name, "email": email, "link": link }))
    }
}

#[cfg(test)]
mod tests {
    use dialflow_core::domain::call::CallOutcome;
    use dialflow_core::domain::context::LeadEmailTemplate;
    use dialflow_core::domain::job::JobId;
    use dialflow_core::flows::PhaseAction;

    use super::{ActionError, ActionInvoker, LinkOutbox, ToolRegistry};

    #[tokio::test]
    async fn standard_registry_covers_every_phase_action() {
        let registry = ToolRegistry::standard(LinkOutbox::default());
        for name in [
            "record_answer",
            "record_objection",
            "send_objection_response",
            "book_meeting",
            "record_email",
            "send_payment_link",
            "confirm_info",
            "end_call",
        ] {
            assert!(registry.contains(name), "missing tool {name}");
        }

        let action = PhaseAction::EndCall { outcome: CallOutcome::Qualified };
        let value = registry.invoke(&JobId("job-1".into()), &action).await.expect("end_call");
        assert_eq!(value["action"], "end_call");
    }

    #[tokio::test]
    async fn booking_link_is_queued_for_the_lead() {
        let outbox = LinkOutbox::default();
        let registry = ToolRegistry::standard(outbox.clone());

        registry
            .invoke(
                &JobId("job-1".into()),
                &PhaseAction::BookMeeting {
                    booking_link: "https://cal.example.com/demo".into(),
                    email: Some("lead@example.com".into()),
                },
            )
            .await
            .expect("book");

        let links = outbox.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].template, LeadEmailTemplate::Booking);
        assert_eq!(links[0].email, "lead@example.com");
    }

    #[tokio::test]
    async fn link_without_email_fails() {
        let registry = ToolRegistry::standard(LinkOutbox::default());
        let error = registry
            .invoke(
                &JobId("job-1".into()),
                &PhaseAction::SendPaymentLink {
                    payment_link: "https://pay.example.com".into(),
                    email: None,
                },
            )
            .await
            .expect_err("no email");
        assert!(matches!(error, ActionError::Failed { .. }));
    }

    #[tokio::test]
    async fn unknown_actions_are_rejected() {
        let registry = ToolRegistry::default();
        let error = registry
            .invoke(&JobId("job-1".into()), &PhaseAction::RecordEmail { email: "a@b.co".into() })
            .await
            .expect_err("empty registry");
        assert_eq!(error, ActionError::UnknownAction("record_email".into()));
    }
}
