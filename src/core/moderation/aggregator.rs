// Aggregation - runs every active rule over one text and merges the results,
// plus the whitelist check that happens before it.

use super::moderation_models::{Author, Issue, Severity, WhitelistEntry, WhitelistKind};
use super::rule_evaluator::CompiledRule;

/// Merged outcome of all active rules for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Issues from violated rules only, in rule order.
    pub issues: Vec<Issue>,
    /// Highest confidence among violated rules.
    pub confidence: f64,
    /// Worst severity among violated rules (`Low` when nothing was violated).
    pub severity: Severity,
    /// At least one violated rule auto-blocks.
    pub auto_block: bool,
    /// Names of the rules that were violated.
    pub violated_rules: Vec<String>,
}

impl Verdict {
    pub fn clean() -> Self {
        Self {
            issues: Vec::new(),
            confidence: 0.0,
            severity: Severity::Low,
            auto_block: false,
            violated_rules: Vec::new(),
        }
    }

    pub fn is_flagged(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Content stays visible unless a violated rule auto-blocks.
    pub fn is_safe(&self) -> bool {
        !self.auto_block
    }
}

/// Evaluate every rule and merge. Results are cumulative across rules.
pub fn aggregate(rules: &[CompiledRule], text: &str) -> Verdict {
    let mut verdict = Verdict::clean();

    for compiled in rules {
        let rule = compiled.rule();
        if !rule.active {
            continue;
        }

        let evaluation = compiled.evaluate(text);
        if !evaluation.violated {
            continue;
        }

        verdict.issues.extend(evaluation.issues);
        verdict.confidence = verdict.confidence.max(evaluation.confidence);
        verdict.severity = verdict.severity.max(rule.severity);
        verdict.auto_block |= rule.auto_block;
        verdict.violated_rules.push(rule.name.clone());
    }

    verdict
}

/// Whether the author or the text is allow-listed.
///
/// - `user`: the author's email (case-insensitive) or numeric id
/// - `domain`: the domain of the author's email
/// - `keyword` / `phrase`: case-insensitive substring of the text
pub fn is_whitelisted(entries: &[WhitelistEntry], text: &str, author: &Author) -> bool {
    let lowered = text.to_lowercase();
    let author_id = author.id.to_string();
    let author_domain = author.email_domain();

    entries.iter().filter(|entry| entry.active).any(|entry| {
        let value = entry.value.trim();
        if value.is_empty() {
            return false;
        }
        match entry.kind {
            WhitelistKind::User => value.eq_ignore_ascii_case(author.email.trim()) || value == author_id,
            WhitelistKind::Domain => author_domain
                .as_deref()
                .is_some_and(|domain| domain == value.trim_start_matches('@').to_lowercase()),
            WhitelistKind::Keyword | WhitelistKind::Phrase => {
                lowered.contains(&value.to_lowercase())
            }
        }
    })
}
