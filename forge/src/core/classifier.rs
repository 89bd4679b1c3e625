//! Deterministic classification of sandbox failure text.
//!
//! Rules are evaluated in declaration order; the first matching rule wins. Text
//! that matches no rule is an ordinary [`FailureKind::Execution`].

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::FailureKind;

/// Marker the sandbox writes into the diagnostic when it kills a child on timeout.
pub const TIMEOUT_MARKER: &str = "[forge] execution timed out";

struct Rule {
    pattern: Regex,
    kind: FailureKind,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |pattern: &str, kind| Rule {
        pattern: Regex::new(pattern).expect("classifier rule must compile"),
        kind,
    };
    vec![
        rule(&regex::escape(TIMEOUT_MARKER), FailureKind::Timeout),
        rule(r"\bModuleNotFoundError\b", FailureKind::DependencyMissing),
        rule(r"\bImportError\b", FailureKind::DependencyMissing),
        rule(r"No module named\s", FailureKind::DependencyMissing),
    ]
});

/// Classify failure text into a single tagged failure kind.
pub fn classify_failure(diagnostic: &str) -> FailureKind {
    RULES
        .iter()
        .find(|rule| rule.pattern.is_match(diagnostic))
        .map(|rule| rule.kind)
        .unwrap_or(FailureKind::Execution)
}
