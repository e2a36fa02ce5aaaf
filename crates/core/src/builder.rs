use std::collections::BTreeMap;

use tera::{Context, Tera};
use thiserror::Error;

use crate::domain::context::{ContextBundle, ContextBundleError, ScriptLines};
use crate::domain::lead::Lead;
use crate::domain::submission::{CallGoal, Campaign};

/// Produces the per-lead script bundle before a call is dialed. Never called mid-call.
pub trait ContextBundleBuilder: Send + Sync {
    fn build(
        &self,
        lead: &Lead,
        campaign: &Campaign,
        owner_email: &str,
    ) -> Result<ContextBundle, ContextBuildError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextBuildError {
    #[error("script template setup failed: {0}")]
    Template(String),
    #[error("script template `{template}` failed to render: {message}")]
    Render { template: &'static str, message: String },
    #[error(transparent)]
    InvalidBundle(#[from] ContextBundleError),
    #[error("context provider failed: {0}")]
    Provider(String),
}

const INSTRUCTIONS: &str = "instructions";
const OPENING: &str = "opening";
const PITCH: &str = "pitch";
const CLOSING: &str = "closing";

const TEMPLATES: &[(&str, &str)] = &[
    (
        INSTRUCTIONS,
        "You are {{ persona }}, a professional and friendly sales representative calling \
{% if name %}{{ name }}{% else %}a prospect{% endif %}{% if title %} ({{ title }}){% endif %}\
{% if company %} at {{ company }}{% endif %} about {{ product }} on behalf of {{ owner_email }}. \
Keep every reply short and conversational. \
{% if goal == \"close_sale\" %}Be confident and lead with value: your aim is to close the sale today.\
{% if pricing_summary %} Pricing: {{ pricing_summary }}.{% endif %}\
{% if urgency_hook %} {{ urgency_hook }}.{% endif %}\
{% elif goal == \"book_meeting\" %}Your aim is to book a short follow-up meeting.\
{% elif goal == \"collect_info\" %}Your aim is to collect accurate information.\
{% else %}Your aim is to find out whether this is a good fit.{% endif %}\
{% if goal_criteria %} Success means: {{ goal_criteria }}.{% endif %}\
{% if product_context %} Product details: {{ product_context }}{% endif %}",
    ),
    (
        OPENING,
        "{% if goal == \"close_sale\" %}Hi{% if name %} {{ name }}{% endif %}, this is {{ persona }} \
with {{ product }}. Give me 2 minutes and I'll show you what {{ product }} can help \
{% if company %}{{ company }}{% else %}your team{% endif %} achieve.\
{% else %}Hi{% if name %} {{ name }}{% endif %}, this is {{ persona }} calling about {{ product }}\
{% if company %} for {{ company }}{% endif %}. Do you have a quick minute?{% endif %}",
    ),
    (
        PITCH,
        "{{ product }} helps {% if company %}teams like {{ company }}{% else %}teams like yours{% endif %} \
get more done with less effort.{% if product_context %} {{ product_context }}{% endif %}\
{% if goal == \"close_sale\" and pricing_summary %} It's {{ pricing_summary }}.{% endif %}\
{% if goal == \"close_sale\" and urgency_hook %} {{ urgency_hook }}.{% endif %}",
    ),
    (
        CLOSING,
        "{% if goal == \"close_sale\" %}Thanks{% if name %} {{ name }}{% endif %}! You'll get the \
payment link by email in a moment so you can get started right away.\
{% elif goal == \"book_meeting\" %}Thanks{% if name %} {{ name }}{% endif %}! Watch for the \
booking link so you can pick a time that works.\
{% else %}Thanks so much for your time today{% if name %}, {{ name }}{% endif %}. Have a great day!\
{% endif %}",
    ),
];

/// Deterministic builder that renders goal-specific scripts from tera templates.
pub struct TemplateContextBuilder {
    tera: Tera,
    persona: String,
}

impl TemplateContextBuilder {
    pub fn new(persona: impl Into<String>) -> Result<Self, ContextBuildError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())
            .map_err(|error| ContextBuildError::Template(error.to_string()))?;
        Ok(Self { tera, persona: persona.into() })
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    fn render(
        &self,
        template: &'static str,
        context: &Context,
    ) -> Result<String, ContextBuildError> {
        self.tera
            .render(template, context)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|error| ContextBuildError::Render { template, message: error.to_string() })
    }

    fn template_context(&self, lead: &Lead, campaign: &Campaign, owner_email: &str) -> Context {
        let optional =
            |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or("").to_string();

        let mut context = Context::new();
        context.insert("persona", &self.persona);
        context.insert("name", lead.display_name().unwrap_or(""));
        context.insert("company", &optional(&lead.company));
        context.insert("title", &optional(&lead.title));
        context.insert("owner_email", owner_email);
        context.insert("product", campaign.product.trim());
        context.insert("product_context", campaign.product_context.trim());
        context.insert("goal", campaign.goal.as_str());
        context.insert("pricing_summary", &optional(&campaign.pricing_summary));
        context.insert("urgency_hook", &optional(&campaign.urgency_hook));
        context.insert("goal_criteria", &optional(&campaign.goal_criteria));
        context
    }
}

impl ContextBundleBuilder for TemplateContextBuilder {
    fn build(
        &self,
        lead: &Lead,
        campaign: &Campaign,
        owner_email: &str,
    ) -> Result<ContextBundle, ContextBuildError> {
        let context = self.template_context(lead, campaign, owner_email);

        let lines = ScriptLines {
            agent_instructions: self.render(INSTRUCTIONS, &context)?,
            opening_line: self.render(OPENING, &context)?,
            qualification_questions: qualification_questions(campaign),
            objection_handlers: objection_handlers(campaign),
            pitch_line: self.render(PITCH, &context)?,
            closing_script: self.render(CLOSING, &context)?,
        };

        Ok(ContextBundle::new(owner_email, lead.clone(), campaign.clone(), lines)?)
    }
}

fn qualification_questions(campaign: &Campaign) -> Vec<String> {
    let product = campaign.product.trim();
    match campaign.goal {
        CallGoal::BookMeeting => vec![
            "What's your biggest challenge in this area right now?".to_string(),
            format!("Have you looked at tools like {product} before?"),
            "Who else would be involved in a decision like this?".to_string(),
        ],
        CallGoal::QualifyInterest => vec![
            "How are you handling this today?".to_string(),
            "What would you improve first if you could?".to_string(),
            "Are you the right person to evaluate something like this?".to_string(),
        ],
        CallGoal::CollectInfo => vec![
            "What's the best email to reach you at?".to_string(),
            "What's your role on the team?".to_string(),
            "How large is your team?".to_string(),
        ],
        CallGoal::CloseSale => vec![
            "What made you interested in solving this now?".to_string(),
            "What's stopping you from getting started today?".to_string(),
        ],
    }
}

fn objection_handlers(campaign: &Campaign) -> BTreeMap<String, String> {
    let product = campaign.product.trim();
    let mut handlers = BTreeMap::new();
    match campaign.goal {
        CallGoal::CloseSale => {
            handlers.insert(
                "too_expensive".to_string(),
                format!(
                    "I hear you. Most customers find {product} pays for itself within the first \
                     month, so the ROI shows up quickly."
                ),
            );
            handlers.insert(
                "need_approval".to_string(),
                "Totally fair. I can send a short summary you can forward, and we can hold \
                 today's terms while you check."
                    .to_string(),
            );
            handlers.insert(
                "need_to_think".to_string(),
                "Of course. What's the one thing you'd want to be sure about before deciding?"
                    .to_string(),
            );
        }
        _ => {
            handlers.insert(
                "too_expensive".to_string(),
                format!(
                    "That's a fair concern. Most teams find {product} saves more time than it \
                     costs, and there's no commitment to take a closer look."
                ),
            );
            handlers.insert(
                "bad_timing".to_string(),
                "Understood. This only takes a couple of minutes, or I can follow up at a \
                 better time."
                    .to_string(),
            );
            handlers.insert(
                "already_have_solution".to_string(),
                format!(
                    "Good to hear you have something in place. Many teams use {product} \
                     alongside their existing tools."
                ),
            );
        }
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::{ContextBundleBuilder, TemplateContextBuilder};
    use crate::domain::context::LeadEmailTemplate;
    use crate::domain::lead::Lead;
    use crate::domain::submission::{CallGoal, Campaign};

    fn builder() -> TemplateContextBuilder {
        TemplateContextBuilder::new("Sam").expect("templates compile")
    }

    fn close_sale() -> Campaign {
        let mut campaign = Campaign::new("Premium CRM", CallGoal::CloseSale);
        campaign.payment_link = Some("https://pay.example.com/crm".to_string());
        campaign.pricing_summary = Some("$149/month".to_string());
        campaign.urgency_hook = Some("Limited time offer".to_string());
        campaign
    }

    #[test]
    fn opening_line_names_lead_and_product() {
        let bundle = builder()
            .build(
                &Lead::new("+14155551234").with_name("Jane Smith").with_company("Acme Corp"),
                &Campaign::new("Test Product", CallGoal::QualifyInterest),
                "owner@example.com",
            )
            .expect("bundle");

        assert!(bundle.opening_line().contains("Jane Smith"));
        assert!(bundle.opening_line().contains("Test Product"));
        assert!(bundle.opening_line().contains("Acme Corp"));
        assert!(!bundle.qualification_questions().is_empty());
        assert!(bundle.objection_handler("too_expensive").is_some());
    }

    #[test]
    fn opening_line_without_name_still_mentions_product() {
        let bundle = builder()
            .build(
                &Lead::new("+14155551234"),
                &Campaign::new("Test Product", CallGoal::QualifyInterest),
                "owner@example.com",
            )
            .expect("bundle");

        assert!(bundle.opening_line().starts_with("Hi, this is Sam"));
        assert!(bundle.opening_line().contains("Test Product"));
    }

    #[test]
    fn close_sale_scripts_carry_pricing_urgency_and_payment() {
        let bundle = builder()
            .build(&Lead::new("+14155551234"), &close_sale(), "owner@example.com")
            .expect("bundle");

        assert!(bundle.agent_instructions().contains("$149/month"));
        assert!(bundle.agent_instructions().contains("Limited time offer"));
        assert!(bundle.agent_instructions().to_lowercase().contains("confident"));
        assert!(bundle.opening_line().contains("2 minutes"));
        assert!(bundle.closing_script().to_lowercase().contains("payment"));
        assert!(bundle.objection_handler("too_expensive").is_some_and(|h| h.contains("ROI")));
        assert!(bundle.objection_handler("need_approval").is_some());
        assert_eq!(bundle.lead_email_template(), Some(LeadEmailTemplate::Payment));
        assert_eq!(bundle.qualification_questions().len(), 2);
    }

    #[test]
    fn product_context_reaches_instructions() {
        let mut campaign = Campaign::new("Test Product", CallGoal::CollectInfo);
        campaign.product_context = "Special feature: AI-powered analytics".to_string();

        let bundle = builder()
            .build(&Lead::new("+14155551234"), &campaign, "owner@example.com")
            .expect("bundle");

        assert!(bundle.agent_instructions().contains("AI-powered analytics"));
        assert!(bundle.agent_instructions().contains("professional"));
        assert!(!bundle.should_email_lead());
    }

    #[test]
    fn bundles_for_two_leads_never_share_names() {
        let campaign = Campaign::new("Test Product", CallGoal::QualifyInterest);
        let alice = builder()
            .build(&Lead::new("+14155551234").with_name("Alice"), &campaign, "owner@example.com")
            .expect("alice");
        let bob = builder()
            .build(&Lead::new("+14155551235").with_name("Bob"), &campaign, "owner@example.com")
            .expect("bob");

        assert!(alice.opening_line().contains("Alice") && !alice.opening_line().contains("Bob"));
        assert!(bob.opening_line().contains("Bob") && !bob.opening_line().contains("Alice"));
        assert_ne!(alice.id(), bob.id());
    }
}
