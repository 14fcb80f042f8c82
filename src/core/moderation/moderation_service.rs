// Moderation service - the single entry point for content moderation.
//
// This service handles:
// - Moderating new content (whitelist -> rules -> report + stats)
// - Human review of reports (status transition + stats + block/unblock)
// - Rule and whitelist administration
// - Dashboard, pending listing and stats summaries
//
// NO storage details here - stores are injected through the traits below.

use super::aggregator::{aggregate, is_whitelisted, Verdict};
use super::content_registry::ContentRegistry;
use super::default_rules::default_rules;
use super::moderation_models::{
    Author, ContentRef, ContentSubmission, DailyStats, DashboardData, ModerationConfig,
    ModerationReport, NewReport, NewWhitelistEntry, Page, ReportFilter, ReportStatus,
    ReviewDecision, ReviewRecord, Rule, StatsDelta, StatsSummary, WhitelistEntry,
};
use super::rule_evaluator::{validate_pattern, CompiledRule};
use async_trait::async_trait;
use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("A rule named '{0}' already exists")]
    DuplicateRule(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ============================================================================
// STORAGE TRAITS (PORTS)
// ============================================================================

/// Rules and whitelist entries.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules, active or not, ordered by name.
    async fn list_rules(&self) -> Result<Vec<Rule>, ModerationError>;

    async fn get_rule(&self, name: &str) -> Result<Option<Rule>, ModerationError>;

    /// Insert or replace a rule, keyed by name.
    async fn save_rule(&self, rule: Rule) -> Result<(), ModerationError>;

    /// All whitelist entries, active or not.
    async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>, ModerationError>;

    async fn add_whitelist_entry(
        &self,
        entry: NewWhitelistEntry,
    ) -> Result<WhitelistEntry, ModerationError>;

    /// Returns `false` if no entry has this id.
    async fn set_whitelist_active(&self, id: i64, active: bool) -> Result<bool, ModerationError>;
}

/// Moderation reports.
///
/// Report writes carry the daily counter change they cause, and both are
/// applied as one unit: a report is never persisted without being counted.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a new report and add `delta` to the counters of `day`.
    async fn create_report(
        &self,
        report: NewReport,
        day: NaiveDate,
        delta: StatsDelta,
    ) -> Result<ModerationReport, ModerationError>;

    async fn get_report(&self, id: i64) -> Result<Option<ModerationReport>, ModerationError>;

    /// Stamp a review onto a report that is not approved or rejected yet, and
    /// add `delta` to the counters of `day`.
    ///
    /// The status check and the write are atomic. Returns `None` (and counts
    /// nothing) if the report is gone or already terminal.
    async fn record_review(
        &self,
        id: i64,
        review: ReviewRecord,
        day: NaiveDate,
        delta: StatsDelta,
    ) -> Result<Option<ModerationReport>, ModerationError>;

    /// Reports matching `status` and `filter`, newest first.
    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ModerationReport>, ModerationError>;

    async fn count_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
    ) -> Result<u64, ModerationError>;

    /// Reports created at or after `since`, newest first.
    async fn reports_created_since(
        &self,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<ModerationReport>, ModerationError>;

    /// Delete reports created before `older_than`. Returns how many were removed.
    async fn purge_reports(&self, older_than: DateTime<Utc>) -> Result<u64, ModerationError>;
}

/// Daily counters.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Atomically add `delta` to the row for `date`, creating it if needed.
    async fn increment(&self, date: NaiveDate, delta: StatsDelta) -> Result<(), ModerationError>;

    async fn get_day(&self, date: NaiveDate) -> Result<Option<DailyStats>, ModerationError>;

    /// Rows for `since` and later, newest first.
    async fn days_since(&self, since: NaiveDate) -> Result<Vec<DailyStats>, ModerationError>;
}

// ============================================================================
// RESULTS
// ============================================================================

/// What `moderate` decided.
#[derive(Debug, Clone)]
pub struct ModerationOutcome {
    /// `false` means the content must be hidden.
    pub is_safe: bool,
    /// Present only when at least one rule was violated.
    pub report: Option<ModerationReport>,
}

impl ModerationOutcome {
    fn safe() -> Self {
        Self {
            is_safe: true,
            report: None,
        }
    }
}

/// What `review` did.
#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    Reviewed(ModerationReport),
    NotFound,
    /// The report was already approved or rejected; nothing changed.
    AlreadyReviewed(ReportStatus),
}

impl ReviewOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReviewOutcome::Reviewed(_))
    }
}

/// Dry-run result: what would happen, without touching reports or stats.
#[derive(Debug, Clone)]
pub struct Preview {
    pub whitelisted: bool,
    pub verdict: Verdict,
}

impl Preview {
    pub fn is_safe(&self) -> bool {
        self.whitelisted || self.verdict.is_safe()
    }
}

// ============================================================================
// RULE SNAPSHOT
// ============================================================================

/// Compiled active rules plus active whitelist, shared between requests.
struct RuleSnapshot {
    rules: Vec<CompiledRule>,
    whitelist: Vec<WhitelistEntry>,
    loaded_at: Instant,
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Content moderation facade.
pub struct ModerationService<S>
where
    S: RuleStore + ReportStore + StatsStore,
{
    store: S,
    content: ContentRegistry,
    config: ModerationConfig,
    snapshot: RwLock<Option<Arc<RuleSnapshot>>>,
}

impl<S> ModerationService<S>
where
    S: RuleStore + ReportStore + StatsStore,
{
    /// Create a new moderation service with the given store and content handlers.
    pub fn new(store: S, content: ContentRegistry, config: ModerationConfig) -> Self {
        Self {
            store,
            content,
            config,
            snapshot: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    // ------------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------------

    /// Current rules/whitelist, reloaded once the cache TTL has passed.
    async fn snapshot(&self) -> Result<Arc<RuleSnapshot>, ModerationError> {
        let ttl = Duration::from_secs(self.config.rule_cache_secs);

        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            if snapshot.loaded_at.elapsed() < ttl {
                return Ok(Arc::clone(snapshot));
            }
        }

        let mut guard = self.snapshot.write().await;
        // Another request may have refreshed it while we waited.
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.loaded_at.elapsed() < ttl {
                return Ok(Arc::clone(snapshot));
            }
        }

        let rules: Vec<CompiledRule> = self
            .store
            .list_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.active)
            .map(CompiledRule::compile)
            .collect();
        let whitelist: Vec<WhitelistEntry> = self
            .store
            .list_whitelist()
            .await?
            .into_iter()
            .filter(|entry| entry.active)
            .collect();

        tracing::debug!(
            rules = rules.len(),
            whitelist = whitelist.len(),
            "Loaded moderation rule snapshot"
        );

        let snapshot = Arc::new(RuleSnapshot {
            rules,
            whitelist,
            loaded_at: Instant::now(),
        });
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop the cached snapshot so the next check reloads rules and whitelist.
    pub async fn invalidate_rules(&self) {
        *self.snapshot.write().await = None;
    }

    // ------------------------------------------------------------------------
    // Moderation
    // ------------------------------------------------------------------------

    /// Moderate one piece of content.
    ///
    /// # Returns
    /// `is_safe = false` when the content must be hidden, and the report when
    /// at least one rule was violated.
    pub async fn moderate(
        &self,
        content: ContentRef,
        text: &str,
        author: &Author,
    ) -> Result<ModerationOutcome, ModerationError> {
        // Blank content is not even counted as checked.
        if text.trim().is_empty() {
            return Ok(ModerationOutcome::safe());
        }

        let snapshot = self.snapshot().await?;

        if is_whitelisted(&snapshot.whitelist, text, author) {
            self.store
                .increment(Self::today(), StatsDelta::checked())
                .await?;
            return Ok(ModerationOutcome::safe());
        }

        let verdict = aggregate(&snapshot.rules, text);

        if !verdict.is_flagged() {
            self.store
                .increment(Self::today(), StatsDelta::checked())
                .await?;
            return Ok(ModerationOutcome::safe());
        }

        let report = self
            .store
            .create_report(
                NewReport {
                    content,
                    original_content: text.to_string(),
                    author: author.clone(),
                    confidence: verdict.confidence,
                    issues: verdict.issues.clone(),
                    severity: verdict.severity,
                    auto_blocked: verdict.auto_block,
                },
                Self::today(),
                StatsDelta::flagged(verdict.auto_block),
            )
            .await?;

        tracing::info!(
            report_id = report.id,
            content = %report.content,
            severity = %report.severity,
            auto_blocked = report.auto_blocked,
            "Content moderation report created"
        );

        Ok(ModerationOutcome {
            is_safe: verdict.is_safe(),
            report: Some(report),
        })
    }

    /// Moderate freshly created content and hide it if it is auto-blocked.
    pub async fn submit(
        &self,
        submission: &ContentSubmission,
    ) -> Result<ModerationOutcome, ModerationError> {
        let outcome = self
            .moderate(submission.content, &submission.text, &submission.author)
            .await?;

        if !outcome.is_safe {
            self.content.set_approved(submission.content, false).await?;
        }
        Ok(outcome)
    }

    /// `submit` for content-creation paths: returns whether the content stays visible.
    ///
    /// Failures are logged and the content is left visible, so moderation
    /// never blocks content creation.
    pub async fn moderate_submission(&self, submission: &ContentSubmission) -> bool {
        match self.submit(submission).await {
            Ok(outcome) => outcome.is_safe,
            Err(e) => {
                tracing::error!(content = %submission.content, "Error in content moderation: {}", e);
                true
            }
        }
    }

    /// Evaluate text without creating a report or touching stats.
    pub async fn preview(&self, text: &str, author: &Author) -> Result<Preview, ModerationError> {
        if text.trim().is_empty() {
            return Ok(Preview {
                whitelisted: false,
                verdict: Verdict::clean(),
            });
        }

        let snapshot = self.snapshot().await?;
        if is_whitelisted(&snapshot.whitelist, text, author) {
            return Ok(Preview {
                whitelisted: true,
                verdict: Verdict::clean(),
            });
        }

        Ok(Preview {
            whitelisted: false,
            verdict: aggregate(&snapshot.rules, text),
        })
    }

    // ------------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------------

    /// Human review of a moderation report.
    ///
    /// Approving restores auto-blocked content; rejecting hides content that
    /// was still visible. Terminal reports are left untouched, and of two
    /// concurrent reviews only the first to be recorded takes effect.
    pub async fn review(
        &self,
        report_id: i64,
        decision: ReviewDecision,
        reviewer: u64,
        notes: &str,
    ) -> Result<ReviewOutcome, ModerationError> {
        let Some(report) = self.store.get_report(report_id).await? else {
            tracing::error!(report_id, "Moderation report not found");
            return Ok(ReviewOutcome::NotFound);
        };

        if report.status.is_terminal() {
            tracing::warn!(
                report_id,
                status = %report.status,
                "Ignoring review of an already reviewed report"
            );
            return Ok(ReviewOutcome::AlreadyReviewed(report.status));
        }

        let status = match decision {
            ReviewDecision::Approve => ReportStatus::Approved,
            ReviewDecision::Reject => ReportStatus::Rejected,
        };
        let false_positive =
            decision == ReviewDecision::Approve && report.severity.counts_as_false_positive();

        let review = ReviewRecord {
            status,
            reviewer,
            notes: notes.to_string(),
            reviewed_at: Utc::now(),
        };
        let recorded = self
            .store
            .record_review(
                report_id,
                review,
                Self::today(),
                StatsDelta::reviewed(false_positive),
            )
            .await?;

        let Some(updated) = recorded else {
            // Lost the race: another review was recorded first, or the report was purged.
            return Ok(match self.store.get_report(report_id).await? {
                Some(current) => {
                    tracing::warn!(
                        report_id,
                        status = %current.status,
                        "Ignoring review of an already reviewed report"
                    );
                    ReviewOutcome::AlreadyReviewed(current.status)
                }
                None => ReviewOutcome::NotFound,
            });
        };

        // Only the review that won the transition touches the content.
        match decision {
            ReviewDecision::Approve if updated.auto_blocked => {
                self.content.set_approved(updated.content, true).await?;
            }
            ReviewDecision::Reject if !updated.auto_blocked => {
                self.content.set_approved(updated.content, false).await?;
            }
            _ => {}
        }

        tracing::info!(report_id, decision = decision.as_str(), "Moderation report reviewed");
        Ok(ReviewOutcome::Reviewed(updated))
    }

    pub async fn get_report(&self, report_id: i64) -> Result<Option<ModerationReport>, ModerationError> {
        self.store.get_report(report_id).await
    }

    /// Delete reports older than `days` days (admin purge).
    pub async fn purge_reports(&self, days: u64) -> Result<u64, ModerationError> {
        let cutoff = i64::try_from(days)
            .ok()
            .and_then(ChronoDuration::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                ModerationError::ValidationError(format!("Purge age out of range: {} days", days))
            })?;
        let removed = self.store.purge_reports(cutoff).await?;
        tracing::info!(removed, days, "Purged moderation reports");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    fn validate_rule(rule: &Rule) -> Result<(), ModerationError> {
        if rule.name.trim().is_empty() {
            return Err(ModerationError::ValidationError(
                "Rule name must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&rule.threshold) {
            return Err(ModerationError::ValidationError(format!(
                "Threshold must be between 0 and 1, got {}",
                rule.threshold
            )));
        }
        for pattern in &rule.patterns {
            validate_pattern(pattern).map_err(|e| {
                ModerationError::ValidationError(format!("Invalid regex pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    /// Create a new rule. Names are unique.
    pub async fn create_rule(&self, mut rule: Rule) -> Result<(), ModerationError> {
        Self::validate_rule(&rule)?;
        if self.store.get_rule(&rule.name).await?.is_some() {
            return Err(ModerationError::DuplicateRule(rule.name));
        }

        let now = Utc::now();
        rule.created_at = now;
        rule.updated_at = now;
        tracing::info!(rule = %rule.name, kind = %rule.kind, "Created moderation rule");
        self.store.save_rule(rule).await?;
        self.invalidate_rules().await;
        Ok(())
    }

    /// Replace an existing rule's configuration.
    pub async fn update_rule(&self, mut rule: Rule) -> Result<(), ModerationError> {
        Self::validate_rule(&rule)?;
        let existing = self
            .store
            .get_rule(&rule.name)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("rule '{}'", rule.name)))?;

        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();
        self.store.save_rule(rule).await?;
        self.invalidate_rules().await;
        Ok(())
    }

    /// Rules are retired by deactivation, never deleted.
    pub async fn set_rule_active(&self, name: &str, active: bool) -> Result<(), ModerationError> {
        let mut rule = self
            .store
            .get_rule(name)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("rule '{}'", name)))?;

        rule.active = active;
        rule.updated_at = Utc::now();
        self.store.save_rule(rule).await?;
        self.invalidate_rules().await;
        Ok(())
    }

    pub async fn list_rules(&self) -> Result<Vec<Rule>, ModerationError> {
        self.store.list_rules().await
    }

    /// Create the stock rules that do not exist yet. Returns how many were created.
    pub async fn seed_default_rules(&self) -> Result<usize, ModerationError> {
        let mut created = 0;
        for rule in default_rules() {
            if self.store.get_rule(&rule.name).await?.is_some() {
                tracing::debug!(rule = %rule.name, "Default rule already exists");
                continue;
            }
            self.store.save_rule(rule).await?;
            created += 1;
        }
        if created > 0 {
            self.invalidate_rules().await;
        }
        Ok(created)
    }

    // ------------------------------------------------------------------------
    // Whitelist
    // ------------------------------------------------------------------------

    pub async fn add_whitelist_entry(
        &self,
        entry: NewWhitelistEntry,
    ) -> Result<WhitelistEntry, ModerationError> {
        let value = entry.value.trim();
        if value.is_empty() {
            return Err(ModerationError::ValidationError(
                "Whitelist value must not be empty".to_string(),
            ));
        }

        let duplicate = self
            .store
            .list_whitelist()
            .await?
            .into_iter()
            .any(|existing| existing.kind == entry.kind && existing.value.trim() == value);
        if duplicate {
            return Err(ModerationError::ValidationError(format!(
                "Whitelist already contains {}: {}",
                entry.kind, value
            )));
        }

        let entry = NewWhitelistEntry {
            value: value.to_string(),
            ..entry
        };
        let created = self.store.add_whitelist_entry(entry).await?;
        self.invalidate_rules().await;
        Ok(created)
    }

    pub async fn set_whitelist_active(&self, id: i64, active: bool) -> Result<bool, ModerationError> {
        let found = self.store.set_whitelist_active(id, active).await?;
        if found {
            self.invalidate_rules().await;
        }
        Ok(found)
    }

    pub async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>, ModerationError> {
        self.store.list_whitelist().await
    }

    // ------------------------------------------------------------------------
    // Dashboard & listings
    // ------------------------------------------------------------------------

    pub async fn today_stats(&self) -> Result<DailyStats, ModerationError> {
        let today = Self::today();
        Ok(self
            .store
            .get_day(today)
            .await?
            .unwrap_or_else(|| DailyStats::empty(today)))
    }

    /// Today's counters, today's latest reports, pending count and active rule count.
    pub async fn dashboard(&self) -> Result<DashboardData, ModerationError> {
        let today_stats = self.today_stats().await?;

        let midnight = today_stats
            .date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        let recent_reports = self
            .store
            .reports_created_since(midnight, self.config.recent_reports)
            .await?;

        let pending_reviews = self
            .store
            .count_reports(Some(ReportStatus::Pending), &ReportFilter::default())
            .await?;

        let active_rules = self
            .store
            .list_rules()
            .await?
            .iter()
            .filter(|rule| rule.active)
            .count() as u64;

        Ok(DashboardData {
            today_stats,
            recent_reports,
            pending_reviews,
            active_rules,
        })
    }

    /// Pending reports, newest first. Out-of-range pages clamp to the nearest page.
    pub async fn pending_reports(
        &self,
        filter: &ReportFilter,
        page: u64,
    ) -> Result<Page<ModerationReport>, ModerationError> {
        let page_size = self.config.page_size.max(1);
        let total_items = self
            .store
            .count_reports(Some(ReportStatus::Pending), filter)
            .await?;
        let total_pages = total_items.div_ceil(page_size).max(1);
        let number = page.clamp(1, total_pages);

        let items = self
            .store
            .list_reports(
                Some(ReportStatus::Pending),
                filter,
                page_size,
                (number - 1) * page_size,
            )
            .await?;

        Ok(Page {
            items,
            number,
            total_pages,
            total_items,
        })
    }

    /// Totals and rates over the last `days` days (today included).
    pub async fn stats_summary(&self, days: u64) -> Result<StatsSummary, ModerationError> {
        let since = Self::today()
            .checked_sub_days(Days::new(days.saturating_sub(1)))
            .ok_or_else(|| {
                ModerationError::ValidationError(format!("Stats window out of range: {} days", days))
            })?;
        let rows = self.store.days_since(since).await?;
        Ok(StatsSummary::from_days(rows))
    }
}

// ============================================================================
// TESTS
// ============================================================================
