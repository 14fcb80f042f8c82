// Moderation domain models - rules, whitelist entries, reports and daily stats.
//
// These are pure domain types with no storage dependencies.
// The infra layer converts them to and from table rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENUMS
// ============================================================================

/// How bad a violation is. Ordering is `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Approving a report at this severity counts as a false positive.
    pub fn counts_as_false_positive(&self) -> bool {
        *self >= Severity::Medium
    }
}

/// Which detector a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Keyword,
    Pattern,
    Sentiment,
    Toxicity,
    Spam,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Keyword => "keyword",
            RuleKind::Pattern => "pattern",
            RuleKind::Sentiment => "sentiment",
            RuleKind::Toxicity => "toxicity",
            RuleKind::Spam => "spam",
        }
    }

    /// Label attached to issues raised by rules of this kind.
    pub fn issue_label(&self) -> &'static str {
        match self {
            RuleKind::Keyword => "Mots-clés inappropriés",
            RuleKind::Pattern => "Contenu inapproprié détecté",
            RuleKind::Sentiment => "Sentiment négatif",
            RuleKind::Toxicity => "Contenu toxique",
            RuleKind::Spam => "Spam détecté",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistKind {
    User,
    Keyword,
    Domain,
    Phrase,
}

impl WhitelistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhitelistKind::User => "user",
            WhitelistKind::Keyword => "keyword",
            WhitelistKind::Domain => "domain",
            WhitelistKind::Phrase => "phrase",
        }
    }
}

/// Lifecycle of a moderation report.
///
/// `Pending` and `AutoFiltered` are initial states, `Approved` and `Rejected`
/// are terminal. `Reviewing` is reserved: nothing transitions into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Reviewing,
    Approved,
    Rejected,
    AutoFiltered,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewing => "reviewing",
            ReportStatus::Approved => "approved",
            ReportStatus::Rejected => "rejected",
            ReportStatus::AutoFiltered => "auto_filtered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Approved | ReportStatus::Rejected)
    }
}

/// Kind of content a report points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    CourseComment,
    DiscussionReply,
    GroupMessage,
    PrivateMessage,
    FormationComment,
    TaskDescription,
    Test,
}

impl ContentKind {
    pub const ALL: [ContentKind; 7] = [
        ContentKind::CourseComment,
        ContentKind::DiscussionReply,
        ContentKind::GroupMessage,
        ContentKind::PrivateMessage,
        ContentKind::FormationComment,
        ContentKind::TaskDescription,
        ContentKind::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::CourseComment => "course_comment",
            ContentKind::DiscussionReply => "discussion_reply",
            ContentKind::GroupMessage => "group_message",
            ContentKind::PrivateMessage => "private_message",
            ContentKind::FormationComment => "formation_comment",
            ContentKind::TaskDescription => "task_description",
            ContentKind::Test => "test",
        }
    }
}

/// Review decision taken by a human moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
        }
    }
}

// Every enum above round-trips through its `as_str` label, which is also what
// the SQLite store writes.
macro_rules! label_enum {
    ($ty:ident, $what:literal, [$($variant:ident),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_lowercase();
                $(
                    if $ty::$variant.as_str() == wanted {
                        return Ok($ty::$variant);
                    }
                )+
                Err(format!("Unknown {}: {}", $what, s))
            }
        }
    };
}

label_enum!(Severity, "severity", [Low, Medium, High, Critical]);
label_enum!(RuleKind, "rule kind", [Keyword, Pattern, Sentiment, Toxicity, Spam]);
label_enum!(WhitelistKind, "whitelist kind", [User, Keyword, Domain, Phrase]);
label_enum!(
    ReportStatus,
    "report status",
    [Pending, Reviewing, Approved, Rejected, AutoFiltered]
);
label_enum!(
    ContentKind,
    "content kind",
    [
        CourseComment,
        DiscussionReply,
        GroupMessage,
        PrivateMessage,
        FormationComment,
        TaskDescription,
        Test
    ]
);
label_enum!(ReviewDecision, "review decision", [Approve, Reject]);

// ============================================================================
// RULES & WHITELIST
// ============================================================================

/// A configured detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub kind: RuleKind,
    pub keywords: Vec<String>,
    pub patterns: Vec<String>,
    /// Detection threshold in `[0, 1]`.
    pub threshold: f64,
    pub severity: Severity,
    pub auto_block: bool,
    pub active: bool,
    /// Overrides `RuleKind::issue_label` for issues raised by this rule.
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// New active rule with default settings (threshold 0.5, medium, no auto-block).
    pub fn new(name: impl Into<String>, kind: RuleKind) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            keywords: Vec::new(),
            patterns: Vec::new(),
            threshold: 0.5,
            severity: Severity::Medium,
            auto_block: false,
            active: true,
            category: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_auto_block(mut self, auto_block: bool) -> Self {
        self.auto_block = auto_block;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Label used for issues this rule raises.
    pub fn issue_label(&self) -> &str {
        self.category
            .as_deref()
            .unwrap_or_else(|| self.kind.issue_label())
    }
}

/// An allow-list entry that bypasses moderation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: i64,
    pub kind: WhitelistKind,
    pub value: String,
    pub description: String,
    pub active: bool,
    pub created_by: u64,
    pub created_at: DateTime<Utc>,
}

/// Input for a new whitelist entry.
#[derive(Debug, Clone)]
pub struct NewWhitelistEntry {
    pub kind: WhitelistKind,
    pub value: String,
    pub description: String,
    pub created_by: u64,
}

// ============================================================================
// CONTENT REFERENCES
// ============================================================================

/// Weak reference to a content record owned by another subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: u64,
}

impl ContentRef {
    pub fn new(kind: ContentKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// The user who wrote a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub email: String,
}

impl Author {
    pub fn new(id: u64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }

    /// Domain part of the author's email, lower-cased.
    pub fn email_domain(&self) -> Option<String> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
    }
}

/// A newly created piece of content that must be moderated.
#[derive(Debug, Clone)]
pub struct ContentSubmission {
    pub content: ContentRef,
    pub author: Author,
    pub text: String,
}

impl ContentSubmission {
    pub fn new(content: ContentRef, author: Author, text: impl Into<String>) -> Self {
        Self {
            content,
            author,
            text: text.into(),
        }
    }

    /// Tasks are moderated on their title and description together.
    pub fn task(task_id: u64, author: Author, title: &str, description: &str) -> Self {
        Self::new(
            ContentRef::new(ContentKind::TaskDescription, task_id),
            author,
            format!("{} {}", title, description),
        )
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// What a detector found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IssueDetail {
    /// Keywords or pattern matches found in the text.
    Matches(Vec<String>),
    /// Heuristic score, formatted as `Score: 0.60`.
    Score(String),
}

impl IssueDetail {
    pub fn score(score: f64) -> Self {
        IssueDetail::Score(format!("Score: {:.2}", score))
    }
}

impl fmt::Display for IssueDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueDetail::Matches(matches) => f.write_str(&matches.join(", ")),
            IssueDetail::Score(score) => f.write_str(score),
        }
    }
}

/// One problem found in a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub details: IssueDetail,
    pub rule: String,
}

/// Report data before it is persisted.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub content: ContentRef,
    pub original_content: String,
    pub author: Author,
    pub confidence: f64,
    pub issues: Vec<Issue>,
    pub severity: Severity,
    pub auto_blocked: bool,
}

impl NewReport {
    /// Initial status: auto-blocked content is filtered straight away.
    pub fn initial_status(&self) -> ReportStatus {
        if self.auto_blocked {
            ReportStatus::AutoFiltered
        } else {
            ReportStatus::Pending
        }
    }
}

/// A persisted moderation decision on one content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationReport {
    pub id: i64,
    pub content: ContentRef,
    pub original_content: String,
    pub author: Author,
    pub confidence: f64,
    pub issues: Vec<Issue>,
    pub severity: Severity,
    pub status: ReportStatus,
    pub auto_blocked: bool,
    pub reviewed_by: Option<u64>,
    pub review_notes: String,
    pub review_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModerationReport {
    /// Comma-separated issue types, for listings.
    pub fn issues_display(&self) -> String {
        if self.issues.is_empty() {
            return "Aucun problème détecté".to_string();
        }
        self.issues
            .iter()
            .map(|issue| issue.issue_type.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Review stamp written onto a report.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub status: ReportStatus,
    pub reviewer: u64,
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Filters for the pending-report listing.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub severity: Option<Severity>,
    pub content_kind: Option<ContentKind>,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number actually returned.
    pub number: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

// ============================================================================
// STATS
// ============================================================================

/// Counters for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub checked: u64,
    pub flagged: u64,
    pub auto_blocked: u64,
    pub human_reviewed: u64,
    pub false_positive: u64,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            checked: 0,
            flagged: 0,
            auto_blocked: 0,
            human_reviewed: 0,
            false_positive: 0,
        }
    }

    pub fn apply(&mut self, delta: &StatsDelta) {
        self.checked += delta.checked;
        self.flagged += delta.flagged;
        self.auto_blocked += delta.auto_blocked;
        self.human_reviewed += delta.human_reviewed;
        self.false_positive += delta.false_positive;
    }

    /// `flagged <= checked`, `auto_blocked <= flagged`, `false_positive <= human_reviewed`.
    pub fn is_consistent(&self) -> bool {
        self.flagged <= self.checked
            && self.auto_blocked <= self.flagged
            && self.false_positive <= self.human_reviewed
    }

    /// Percentage of checked content that was flagged.
    pub fn flagged_percentage(&self) -> f64 {
        percentage(self.flagged, self.checked)
    }
}

/// Increments applied to a day's counters in one atomic upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub checked: u64,
    pub flagged: u64,
    pub auto_blocked: u64,
    pub human_reviewed: u64,
    pub false_positive: u64,
}

impl StatsDelta {
    pub fn checked() -> Self {
        Self {
            checked: 1,
            ..Default::default()
        }
    }

    pub fn flagged(auto_blocked: bool) -> Self {
        Self {
            checked: 1,
            flagged: 1,
            auto_blocked: u64::from(auto_blocked),
            ..Default::default()
        }
    }

    pub fn reviewed(false_positive: bool) -> Self {
        Self {
            human_reviewed: 1,
            false_positive: u64::from(false_positive),
            ..Default::default()
        }
    }
}

/// Totals and rates over a range of days.
#[derive(Debug, Clone)]
pub struct StatsSummary {
    /// Newest first.
    pub days: Vec<DailyStats>,
    pub total_checked: u64,
    pub total_flagged: u64,
    pub total_auto_blocked: u64,
    pub total_human_reviewed: u64,
    pub total_false_positive: u64,
    pub flagging_rate: f64,
    pub auto_block_rate: f64,
    pub false_positive_rate: f64,
}

impl StatsSummary {
    pub fn from_days(days: Vec<DailyStats>) -> Self {
        let total_checked = days.iter().map(|d| d.checked).sum();
        let total_flagged = days.iter().map(|d| d.flagged).sum();
        let total_auto_blocked = days.iter().map(|d| d.auto_blocked).sum();
        let total_human_reviewed = days.iter().map(|d| d.human_reviewed).sum();
        let total_false_positive = days.iter().map(|d| d.false_positive).sum();

        Self {
            days,
            total_checked,
            total_flagged,
            total_auto_blocked,
            total_human_reviewed,
            total_false_positive,
            flagging_rate: percentage(total_flagged, total_checked),
            auto_block_rate: percentage(total_auto_blocked, total_flagged),
            false_positive_rate: percentage(total_false_positive, total_human_reviewed),
        }
    }
}

/// What the moderation dashboard shows.
#[derive(Debug, Clone)]
pub struct DashboardData {
    pub today_stats: DailyStats,
    /// Reports created today, newest first.
    pub recent_reports: Vec<ModerationReport>,
    pub pending_reviews: u64,
    pub active_rules: u64,
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Runtime settings for the moderation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// SQLite database file.
    pub db_path: String,
    /// How long a loaded rule/whitelist snapshot stays fresh.
    pub rule_cache_secs: u64,
    /// Reports per page in the pending listing.
    pub page_size: u64,
    /// Reports shown on the dashboard.
    pub recent_reports: u64,
    /// Days covered by the stats summary.
    pub stats_days: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            db_path: "data/moderation.db".to_string(),
            rule_cache_secs: 60,
            page_size: 20,
            recent_reports: 10,
            stats_days: 30,
        }
    }
}

impl ModerationConfig {
    /// Read overrides from `MODERATION_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn env_u64(key: &str, fallback: u64) -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(fallback)
        }

        Self {
            db_path: std::env::var("MODERATION_DB_PATH").unwrap_or(defaults.db_path),
            rule_cache_secs: env_u64("MODERATION_RULE_CACHE_SECS", defaults.rule_cache_secs),
            page_size: env_u64("MODERATION_PAGE_SIZE", defaults.page_size).max(1),
            recent_reports: env_u64("MODERATION_RECENT_REPORTS", defaults.recent_reports),
            stats_days: env_u64("MODERATION_STATS_DAYS", defaults.stats_days).max(1),
        }
    }
}
