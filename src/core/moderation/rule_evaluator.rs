// Rule evaluation - runs one rule against one piece of text.
//
// Each rule kind has its own detector:
// - keyword: fraction of configured keywords found in the text
// - pattern: any configured regex matches (binary)
// - sentiment: density of negative words
// - toxicity: fixed insult patterns (binary)
// - spam: additive heuristics
//
// Evaluation is pure: same rule + same text always gives the same result.

use super::moderation_models::{Issue, IssueDetail, Rule, RuleKind};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::LazyLock;

const NEGATIVE_WORDS: [&str; 11] = [
    "nul",
    "terrible",
    "horreur",
    "déteste",
    "stupide",
    "idiot",
    "débile",
    "merde",
    "pourri",
    "catastrophe",
    "disaster",
];

const TOXIC_PATTERNS: [&str; 3] = [
    r"\b(?:con+ard|sal[eo]pe?|put[ea]|merde|chier|foutre)\b",
    r"\b(?:ferme\s+ta\s+gueule|va\s+te\s+faire)\b",
    r"(?:espèce\s+de?|sale)\s+(?:con|idiot|débile)",
];

const SPAM_URL: &str = r"(?:https?://|www\.)\S+";
const SPAM_COMMERCIAL: &str = r"(?:achetez|vendez|gratuit|promotion|offre\s+spéciale)";
const SPAM_CONTACT: &str = r"(?:contactez|appelez|envoyez|email)";
// Case-sensitive: a shouted run of capitals, spaces and punctuation.
const SPAM_CAPS_RUN: &str = r"\p{Lu}[\p{Lu}\s[:punct:]]{19,}";

const SPAM_STEP: f64 = 0.3;
const REPEATED_CHAR_RUN: usize = 5;

static TOXIC_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    TOXIC_PATTERNS
        .iter()
        .filter_map(|p| compile_pattern("builtin:toxicity", p))
        .collect()
});

static SPAM_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [SPAM_URL, SPAM_COMMERCIAL, SPAM_CONTACT]
        .iter()
        .filter_map(|p| compile_pattern("builtin:spam", p))
        .collect()
});

static CAPS_RUN_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| match Regex::new(SPAM_CAPS_RUN) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to compile all-caps spam pattern");
            None
        }
    });

/// Outcome of running one rule against one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub violated: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub issues: Vec<Issue>,
}

impl Evaluation {
    fn clean() -> Self {
        Self {
            violated: false,
            confidence: 0.0,
            issues: Vec::new(),
        }
    }
}

/// Case-insensitive regex; malformed patterns are logged and skipped.
fn compile_pattern(rule_name: &str, pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(
                rule = rule_name,
                pattern = pattern,
                error = %e,
                "Skipping malformed moderation pattern"
            );
            None
        }
    }
}

/// Check whether a pattern compiles, for admin-side validation.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// A rule with its patterns compiled once, ready to evaluate many texts.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    pub fn compile(rule: Rule) -> Self {
        let patterns = if rule.kind == RuleKind::Pattern {
            rule.patterns
                .iter()
                .filter_map(|p| compile_pattern(&rule.name, p))
                .collect()
        } else {
            Vec::new()
        };
        Self { rule, patterns }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Run the rule against `text`.
    pub fn evaluate(&self, text: &str) -> Evaluation {
        if !self.rule.active || text.trim().is_empty() {
            return Evaluation::clean();
        }

        let (confidence, details) = match self.rule.kind {
            RuleKind::Keyword => {
                let (confidence, found) = self.check_keywords(text);
                (confidence, (!found.is_empty()).then(|| IssueDetail::Matches(found)))
            }
            RuleKind::Pattern => {
                let (confidence, found) = self.check_patterns(text);
                (confidence, (!found.is_empty()).then(|| IssueDetail::Matches(found)))
            }
            RuleKind::Sentiment => (sentiment_score(text), None),
            RuleKind::Toxicity => (toxicity_score(text), None),
            RuleKind::Spam => (spam_score(text), None),
        };

        // A zero score never violates, even with a zero threshold.
        let violated = confidence > 0.0 && confidence >= self.rule.threshold;

        let details = match details {
            Some(found) => Some(found),
            None if violated => Some(IssueDetail::score(confidence)),
            None => None,
        };

        let issues = details
            .map(|details| {
                vec![Issue {
                    issue_type: self.rule.issue_label().to_string(),
                    details,
                    rule: self.rule.name.clone(),
                }]
            })
            .unwrap_or_default();

        Evaluation {
            violated,
            confidence,
            issues,
        }
    }

    /// Fraction of distinct configured keywords present in the text.
    fn check_keywords(&self, text: &str) -> (f64, Vec<String>) {
        if self.rule.keywords.is_empty() {
            return (0.0, Vec::new());
        }

        let lowered = text.to_lowercase();
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        // Keywords are matched as configured: padding spaces restrict a match to whole words.
        for keyword in &self.rule.keywords {
            let needle = keyword.to_lowercase();
            if needle.is_empty() || !seen.insert(needle.clone()) {
                continue;
            }
            if lowered.contains(&needle) {
                found.push(keyword.clone());
            }
        }

        let confidence = found.len() as f64 / self.rule.keywords.len() as f64;
        (confidence.min(1.0), found)
    }

    /// Binary: any match from any pattern is enough.
    fn check_patterns(&self, text: &str) -> (f64, Vec<String>) {
        let found: Vec<String> = self
            .patterns
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
            .collect();

        let confidence = if found.is_empty() { 0.0 } else { 1.0 };
        (confidence, found)
    }
}

/// Evaluate a rule that has not been compiled yet.
pub fn evaluate(rule: &Rule, text: &str) -> Evaluation {
    CompiledRule::compile(rule.clone()).evaluate(text)
}

/// Negative words per tenth of the word count, capped at 1.
pub fn sentiment_score(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    let negative = NEGATIVE_WORDS
        .iter()
        .filter(|word| lowered.contains(*word))
        .count() as f64;
    let words = text.split_whitespace().count() as f64;

    (negative / (words * 0.1).max(1.0)).min(1.0)
}

/// 1.0 as soon as one insult pattern matches.
pub fn toxicity_score(text: &str) -> f64 {
    if TOXIC_REGEXES.iter().any(|re| re.is_match(text)) {
        1.0
    } else {
        0.0
    }
}

/// +0.3 per spam heuristic that fires, capped at 1.
pub fn spam_score(text: &str) -> f64 {
    let mut hits = SPAM_REGEXES.iter().filter(|re| re.is_match(text)).count();

    if CAPS_RUN_REGEX
        .as_ref()
        .is_some_and(|re| re.is_match(text))
    {
        hits += 1;
    }
    if has_repeated_run(text, REPEATED_CHAR_RUN) {
        hits += 1;
    }

    (hits as f64 * SPAM_STEP).min(1.0)
}

/// True if some character repeats `run` or more times in a row.
fn has_repeated_run(text: &str, run: usize) -> bool {
    let mut previous = None;
    let mut length = 0;

    for c in text.chars() {
        if Some(c) == previous {
            length += 1;
        } else {
            previous = Some(c);
            length = 1;
        }
        if length >= run {
            return true;
        }
    }
    false
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::Severity;

    #[test]
    fn test_keyword_threshold_fraction() {
        let rule = Rule::new("insultes", RuleKind::Keyword)
            .with_keywords(["con", "merde"])
            .with_threshold(0.7)
            .with_auto_block(true)
            .with_severity(Severity::High);

        let result = evaluate(&rule, "Ce cours est nul, le formateur est un con!");

        assert_eq!(result.confidence, 0.5);
        assert!(!result.violated);
        // The match is still described, the aggregator ignores it.
        assert_eq!(result.issues.len(), 1);
        assert_eq!(
            result.issues[0].details,
            IssueDetail::Matches(vec!["con".to_string()])
        );
    }

    #[test]
    fn test_keyword_all_matched_violates() {
        let rule = Rule::new("insultes", RuleKind::Keyword)
            .with_keywords(["con", "merde"])
            .with_threshold(0.7);

        let result = evaluate(&rule, "Quel CON, c'est de la Merde");

        assert_eq!(result.confidence, 1.0);
        assert!(result.violated);
        assert_eq!(result.issues[0].issue_type, "Mots-clés inappropriés");
        assert_eq!(result.issues[0].rule, "insultes");
    }

    #[test]
    fn test_padded_keyword_matches_whole_word_only() {
        let rule = Rule::new("insultes", RuleKind::Keyword)
            .with_keywords([" con "])
            .with_threshold(1.0);

        let inside_word = evaluate(&rule, "le contenu est clair");
        assert_eq!(inside_word.confidence, 0.0);
        assert!(!inside_word.violated);
        assert!(inside_word.issues.is_empty());

        let whole_word = evaluate(&rule, "quel con celui-là");
        assert_eq!(whole_word.confidence, 1.0);
        assert!(whole_word.violated);
    }

    #[test]
    fn test_empty_keywords_never_violate() {
        for threshold in [0.0, 0.1, 0.5, 1.0] {
            let rule = Rule::new("vide", RuleKind::Keyword).with_threshold(threshold);
            let result = evaluate(&rule, "n'importe quel texte, merde");
            assert!(!result.violated);
            assert_eq!(result.confidence, 0.0);
            assert!(result.issues.is_empty());
        }
    }

    #[test]
    fn test_pattern_phone_number() {
        let rule = Rule::new("Informations Personnelles", RuleKind::Pattern)
            .with_patterns([r"\b\d{10,}\b"])
            .with_threshold(0.7)
            .with_category("Informations personnelles");

        let result = evaluate(&rule, "mon numéro 0123456789");

        assert!(result.violated);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.issues[0].issue_type, "Informations personnelles");
        assert_eq!(
            result.issues[0].details,
            IssueDetail::Matches(vec!["0123456789".to_string()])
        );
    }

    #[test]
    fn test_malformed_pattern_is_skipped() {
        let rule = Rule::new("mixte", RuleKind::Pattern)
            .with_patterns([r"(unclosed", r"interdit"])
            .with_threshold(0.5);

        let result = evaluate(&rule, "c'est INTERDIT");
        assert!(result.violated);

        let only_bad = Rule::new("cassée", RuleKind::Pattern).with_patterns([r"[z-a]"]);
        assert!(!evaluate(&only_bad, "n'importe quoi").violated);
        assert!(validate_pattern(r"[z-a]").is_err());
        assert!(validate_pattern(r"\d+").is_ok());
    }

    #[test]
    fn test_sentiment_score() {
        // 2 negative words out of 8 words -> 2 / max(0.8, 1) capped at 1.
        assert_eq!(sentiment_score("ce cours est nul et vraiment terrible hélas"), 1.0);
        // 1 negative word in 20 words -> 1 / 2.
        let text = "nul ".to_string() + &"mot ".repeat(19);
        assert_eq!(sentiment_score(&text), 0.5);
        assert_eq!(sentiment_score("très bon cours"), 0.0);
    }

    #[test]
    fn test_toxicity_score() {
        assert_eq!(toxicity_score("Ferme ta gueule"), 1.0);
        assert_eq!(toxicity_score("espèce de débile"), 1.0);
        assert_eq!(toxicity_score("Le contenu est conforme"), 0.0);
    }

    #[test]
    fn test_spam_commercial_caps() {
        let rule = Rule::new("Spam Commercial", RuleKind::Spam).with_threshold(0.5);
        let result = evaluate(&rule, "ACHETEZ MAINTENANT!!! OFFRE LIMITEE!!! CLIQUEZ ICI!!!");

        assert!(result.confidence >= 0.6 - f64::EPSILON);
        assert!(result.violated);
        assert_eq!(result.issues[0].issue_type, "Spam détecté");
        assert_eq!(result.issues[0].details, IssueDetail::score(result.confidence));
    }

    #[test]
    fn test_spam_heuristics_cap() {
        let text = "GRATUIT!!!!! CONTACTEZ MOI SUR WWW.PROMO.FR AAAAAA";
        assert_eq!(spam_score(text), 1.0);
        assert_eq!(spam_score("Merci pour ce cours, très clair."), 0.0);
        assert!(has_repeated_run("nooooon", 5));
        assert!(!has_repeated_run("noooon", 5));
    }

    #[test]
    fn test_inactive_rule_is_clean() {
        let rule = Rule::new("off", RuleKind::Toxicity).inactive();
        assert_eq!(evaluate(&rule, "merde"), Evaluation::clean());
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let rule = Rule::new("spam", RuleKind::Spam).with_threshold(0.3);
        let compiled = CompiledRule::compile(rule);
        let text = "Visitez https://exemple.com maintenant";
        assert_eq!(compiled.evaluate(text), compiled.evaluate(text));
    }
}
