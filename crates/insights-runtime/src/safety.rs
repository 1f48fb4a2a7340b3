//! Safety policy applied to the free text of a tool request.
//!
//! The policy is an ordered list of [`SafetyRule`] trait objects; the first
//! rule that flags a piece of text wins.

use regex::Regex;

/// A single screening rule.
pub trait SafetyRule: Send + Sync {
    /// Stable identifier reported in rejections.
    fn name(&self) -> &str;

    /// Guidance for the caller when `text` is rejected, `None` to allow it.
    fn check(&self, text: &str) -> Option<String>;
}

// ── Keyword rule ──────────────────────────────────────────────────────────────

/// Case-insensitive substring match.
pub struct KeywordRule {
    name: String,
    keyword: String,
    guidance: String,
}

impl KeywordRule {
    pub fn new(name: &str, keyword: &str, guidance: &str) -> Self {
        Self {
            name: name.to_string(),
            keyword: keyword.to_lowercase(),
            guidance: guidance.to_string(),
        }
    }
}

impl SafetyRule for KeywordRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, text: &str) -> Option<String> {
        text.to_lowercase()
            .contains(&self.keyword)
            .then(|| self.guidance.clone())
    }
}

// ── Pattern rule ──────────────────────────────────────────────────────────────

/// Regular-expression match.
pub struct PatternRule {
    name: String,
    pattern: Regex,
    guidance: String,
}

impl PatternRule {
    pub fn new(name: &str, pattern: Regex, guidance: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern,
            guidance: guidance.to_string(),
        }
    }
}

impl SafetyRule for PatternRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, text: &str) -> Option<String> {
        self.pattern.is_match(text).then(|| self.guidance.clone())
    }
}

// ── Policy ────────────────────────────────────────────────────────────────────

/// The first rule that flagged a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: String,
    pub guidance: String,
}

/// Ordered collection of safety rules.
pub struct SafetyPolicy {
    rules: Vec<Box<dyn SafetyRule>>,
}

const INDIVIDUAL_GUIDANCE: &str = "Please avoid querying individual developers.";

impl SafetyPolicy {
    pub fn new(rules: Vec<Box<dyn SafetyRule>>) -> Self {
        Self { rules }
    }

    /// The standard policy: aggregate questions only, no personal data.
    pub fn standard() -> Self {
        let mut rules: Vec<Box<dyn SafetyRule>> = vec![
            Box::new(KeywordRule::new("individual", "individual", INDIVIDUAL_GUIDANCE)),
            Box::new(KeywordRule::new(
                "single_developer",
                "single developer",
                INDIVIDUAL_GUIDANCE,
            )),
            Box::new(KeywordRule::new(
                "email",
                "email",
                "Email-level detail is not available.",
            )),
            Box::new(KeywordRule::new("pii", "pii", "PII queries are blocked by policy.")),
        ];

        let patterns: [(&str, &str, &str); 3] = [
            (
                "developer_identifier",
                r"(?i)developer\s+[0-9a-f\-]{6,}",
                "Requests for specific developer identifiers are not permitted.",
            ),
            (
                "email_address",
                r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
                "Email-level detail is not available.",
            ),
            (
                "raw_identifier",
                r"(?i)\b(gh_id|mfcgd_id)\b",
                "Per-user identifiers cannot be queried; ask for aggregates instead.",
            ),
        ];
        for (name, pattern, guidance) in patterns {
            // Patterns are compile-time constants.
            let regex = Regex::new(pattern).expect("safety pattern is valid");
            rules.push(Box::new(PatternRule::new(name, regex, guidance)));
        }

        Self::new(rules)
    }

    /// Run every rule over `text`, returning the first violation.
    pub fn screen(&self, text: &str) -> Option<Violation> {
        self.rules.iter().find_map(|rule| {
            rule.check(text).map(|guidance| Violation {
                rule: rule.name().to_string(),
                guidance,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
