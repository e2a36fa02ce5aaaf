use crate::domain::context::ContextBundle;
use crate::flows::states::{CallerSignal, CallerTurn};

const REOPEN_PHRASES: &[&str] =
    &["actually", "one more thing", "go back", "i forgot", "i should mention", "also wanted"];
const DECLINE_PHRASES: &[&str] = &[
    "not interested",
    "no thanks",
    "no thank you",
    "don't call",
    "dont call",
    "stop calling",
    "remove me",
    "not for us",
    "not right now",
];
const BARE_DECLINES: &[&str] = &["no", "nope", "nah"];
const BUYING_PHRASES: &[&str] = &[
    "sign me up",
    "let's do it",
    "lets do it",
    "sounds great",
    "i'm interested",
    "im interested",
    "interested",
    "move forward",
    "send me the link",
    "book it",
    "let's book",
    "i'll buy",
];
const AFFIRM_WORDS: &[&str] =
    &["yes", "yeah", "yep", "sure", "ok", "okay", "absolutely", "definitely", "correct", "right"];

/// Known objection categories and the phrases that reveal them.
const OBJECTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("too_expensive", &["expensive", "cost", "price", "budget", "afford", "pricey"]),
    ("need_approval", &["approval", "my boss", "my manager", "check with", "sign off"]),
    ("bad_timing", &["bad time", "busy", "next quarter", "not a good time", "call back later"]),
    ("already_have_solution", &["already use", "already have", "we use", "happy with"]),
    ("need_to_think", &["think about it", "think it over", "need time", "let me think"]),
    ("not_sure_it_fits", &["not sure", "don't know if", "doubt"]),
];

/// Keyword-table classifier for caller utterances. Objections are only reported for keys
/// the bundle has a handler for; unknown keys fall back to their own words.
#[derive(Clone, Debug, Default)]
pub struct SignalDetector;

impl SignalDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn turn(&self, bundle: &ContextBundle, text: &str) -> CallerTurn {
        CallerTurn::new(text.trim(), self.detect(bundle, text))
    }

    pub fn detect(&self, bundle: &ContextBundle, text: &str) -> CallerSignal {
        let normalized = normalize(text);
        if normalized.trim().is_empty() {
            return CallerSignal::Neutral;
        }

        if let Some(email) = extract_email(text) {
            return CallerSignal::ProvidedEmail(email);
        }
        if contains_any(&normalized, DECLINE_PHRASES) || BARE_DECLINES.contains(&normalized.trim())
        {
            return CallerSignal::Decline;
        }
        if contains_any(&normalized, REOPEN_PHRASES) {
            return CallerSignal::ReopenDiscovery;
        }
        if let Some(key) = objection_key(bundle, &normalized) {
            return CallerSignal::Objection(key);
        }
        if contains_any(&normalized, BUYING_PHRASES) {
            return CallerSignal::BuyingIntent;
        }
        if normalized.split_whitespace().any(|word| AFFIRM_WORDS.contains(&word)) {
            return CallerSignal::Affirm;
        }
        CallerSignal::Neutral
    }
}

fn objection_key(bundle: &ContextBundle, normalized: &str) -> Option<String> {
    bundle.objection_handlers().keys().find(|key| matches_objection(key, normalized)).cloned()
}

fn matches_objection(key: &str, normalized: &str) -> bool {
    if let Some((_, phrases)) = OBJECTION_KEYWORDS.iter().find(|(known, _)| *known == key) {
        return contains_any(normalized, phrases);
    }

    let words: Vec<&str> = key.split('_').filter(|word| word.len() > 3).collect();
    !words.is_empty() && words.iter().all(|word| normalized.contains(word))
}

fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch == '\'' { ch } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn contains_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| normalized.contains(&format!(" {phrase} ")))
}

fn extract_email(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| {
            token.trim_matches(|ch: char| !ch.is_alphanumeric() && ch != '@' && ch != '.')
        })
        .map(|token| token.trim_end_matches('.'))
        .find(|token| match token.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
            }
            None => false,
        })
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::SignalDetector;
    use crate::domain::context::{ContextBundle, ScriptLines};
    use crate::domain::lead::Lead;
    use crate::domain::submission::{CallGoal, Campaign};
    use crate::flows::states::CallerSignal;

    fn bundle() -> ContextBundle {
        ContextBundle::new(
            "owner@example.com",
            Lead::new("+14155551234"),
            Campaign::new("Acme", CallGoal::QualifyInterest),
            ScriptLines {
                opening_line: "Hi".to_string(),
                pitch_line: "Pitch".to_string(),
                closing_script: "Bye".to_string(),
                objection_handlers: BTreeMap::from([
                    ("too_expensive".to_string(), "Worth it.".to_string()),
                    ("security_review".to_string(), "We are SOC 2 audited.".to_string()),
                ]),
                ..ScriptLines::default()
            },
        )
        .expect("bundle")
    }

    #[test]
    fn classifies_common_utterances() {
        let detector = SignalDetector::new();
        let bundle = bundle();
        let cases = [
            ("Yeah, sure.", CallerSignal::Affirm),
            ("I'm not interested, thanks", CallerSignal::Decline),
            ("No.", CallerSignal::Decline),
            ("Sounds great, sign me up", CallerSignal::BuyingIntent),
            ("That's way too expensive for us", CallerSignal::Objection("too_expensive".into())),
            ("Actually, one more thing about our team", CallerSignal::ReopenDiscovery),
            ("We use spreadsheets today", CallerSignal::Neutral),
            ("", CallerSignal::Neutral),
        ];

        for (text, expected) in cases {
            assert_eq!(detector.detect(&bundle, text), expected, "utterance: {text}");
        }
    }

    #[test]
    fn extracts_email_addresses() {
        let signal =
            SignalDetector::new().detect(&bundle(), "Sure, it's Alice.Smith@Example.com.");
        assert_eq!(signal, CallerSignal::ProvidedEmail("alice.smith@example.com".to_string()));
    }

    #[test]
    fn bundle_specific_objection_keys_match_their_words() {
        let signal = SignalDetector::new()
            .detect(&bundle(), "We would need a security review before anything");
        assert_eq!(signal, CallerSignal::Objection("security_review".to_string()));
    }

    #[test]
    fn objections_without_a_handler_are_not_reported() {
        let signal = SignalDetector::new().detect(&bundle(), "I need to check with my boss");
        assert_ne!(signal, CallerSignal::Objection("need_approval".to_string()));
    }
}
