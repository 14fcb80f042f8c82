// In-memory implementation of the moderation stores.
//
// Used by the service tests and by embedders that do not need persistence.
// Nothing survives a restart.

use crate::core::moderation::{
    DailyStats, ModerationError, ModerationReport, NewReport, NewWhitelistEntry, ReportFilter,
    ReportStatus, ReportStore, ReviewRecord, Rule, RuleStore, StatsDelta, StatsStore,
    WhitelistEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// DashMap-backed store for rules, whitelist, reports and daily stats.
pub struct InMemoryModerationStore {
    rules: DashMap<String, Rule>,
    whitelist: DashMap<i64, WhitelistEntry>,
    reports: DashMap<i64, ModerationReport>,
    stats: DashMap<NaiveDate, DailyStats>,
    next_whitelist_id: AtomicI64,
    next_report_id: AtomicI64,
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
            whitelist: DashMap::new(),
            reports: DashMap::new(),
            stats: DashMap::new(),
            next_whitelist_id: AtomicI64::new(1),
            next_report_id: AtomicI64::new(1),
        }
    }

    fn matching_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
    ) -> Vec<ModerationReport> {
        let mut reports: Vec<ModerationReport> = self
            .reports
            .iter()
            .filter(|entry| {
                let report = entry.value();
                status.is_none_or(|s| report.status == s)
                    && filter.severity.is_none_or(|s| report.severity == s)
                    && filter.content_kind.is_none_or(|k| report.content.kind == k)
            })
            .map(|entry| entry.value().clone())
            .collect();

        // Newest first
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        reports
    }
}

impl Default for InMemoryModerationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for InMemoryModerationStore {
    async fn list_rules(&self) -> Result<Vec<Rule>, ModerationError> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|entry| entry.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }

    async fn get_rule(&self, name: &str) -> Result<Option<Rule>, ModerationError> {
        Ok(self.rules.get(name).map(|entry| entry.value().clone()))
    }

    async fn save_rule(&self, rule: Rule) -> Result<(), ModerationError> {
        self.rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>, ModerationError> {
        let mut entries: Vec<WhitelistEntry> = self
            .whitelist
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    async fn add_whitelist_entry(
        &self,
        entry: NewWhitelistEntry,
    ) -> Result<WhitelistEntry, ModerationError> {
        let id = self.next_whitelist_id.fetch_add(1, Ordering::SeqCst);
        let stored = WhitelistEntry {
            id,
            kind: entry.kind,
            value: entry.value,
            description: entry.description,
            active: true,
            created_by: entry.created_by,
            created_at: Utc::now(),
        };
        self.whitelist.insert(id, stored.clone());
        Ok(stored)
    }

    async fn set_whitelist_active(&self, id: i64, active: bool) -> Result<bool, ModerationError> {
        match self.whitelist.get_mut(&id) {
            Some(mut entry) => {
                entry.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ReportStore for InMemoryModerationStore {
    async fn create_report(
        &self,
        report: NewReport,
        day: NaiveDate,
        delta: StatsDelta,
    ) -> Result<ModerationReport, ModerationError> {
        let id = self.next_report_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let status = report.initial_status();
        let stored = ModerationReport {
            id,
            content: report.content,
            original_content: report.original_content,
            author: report.author,
            confidence: report.confidence,
            issues: report.issues,
            severity: report.severity,
            status,
            auto_blocked: report.auto_blocked,
            reviewed_by: None,
            review_notes: String::new(),
            review_date: None,
            created_at: now,
            updated_at: now,
        };
        self.reports.insert(id, stored.clone());
        self.increment(day, delta).await?;
        Ok(stored)
    }

    async fn get_report(&self, id: i64) -> Result<Option<ModerationReport>, ModerationError> {
        Ok(self.reports.get(&id).map(|entry| entry.value().clone()))
    }

    async fn record_review(
        &self,
        id: i64,
        review: ReviewRecord,
        day: NaiveDate,
        delta: StatsDelta,
    ) -> Result<Option<ModerationReport>, ModerationError> {
        // get_mut holds the shard lock across the status check and the write
        let updated = {
            let Some(mut report) = self.reports.get_mut(&id) else {
                return Ok(None);
            };
            if report.status.is_terminal() {
                return Ok(None);
            }
            report.status = review.status;
            report.reviewed_by = Some(review.reviewer);
            report.review_notes = review.notes;
            report.review_date = Some(review.reviewed_at);
            report.updated_at = review.reviewed_at;
            report.clone()
        };
        self.increment(day, delta).await?;
        Ok(Some(updated))
    }

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ModerationReport>, ModerationError> {
        Ok(self
            .matching_reports(status, filter)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
    ) -> Result<u64, ModerationError> {
        Ok(self.matching_reports(status, filter).len() as u64)
    }

    async fn reports_created_since(
        &self,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<ModerationReport>, ModerationError> {
        Ok(self
            .matching_reports(None, &ReportFilter::default())
            .into_iter()
            .filter(|report| report.created_at >= since)
            .take(limit as usize)
            .collect())
    }

    async fn purge_reports(&self, older_than: DateTime<Utc>) -> Result<u64, ModerationError> {
        let before = self.reports.len();
        self.reports.retain(|_, report| report.created_at >= older_than);
        Ok(before.saturating_sub(self.reports.len()) as u64)
    }
}

#[async_trait]
impl StatsStore for InMemoryModerationStore {
    async fn increment(&self, date: NaiveDate, delta: StatsDelta) -> Result<(), ModerationError> {
        // entry() holds the shard lock, so concurrent increments never lose updates
        self.stats
            .entry(date)
            .or_insert_with(|| DailyStats::empty(date))
            .apply(&delta);
        Ok(())
    }

    async fn get_day(&self, date: NaiveDate) -> Result<Option<DailyStats>, ModerationError> {
        Ok(self.stats.get(&date).map(|entry| *entry.value()))
    }

    async fn days_since(&self, since: NaiveDate) -> Result<Vec<DailyStats>, ModerationError> {
        let mut days: Vec<DailyStats> = self
            .stats
            .iter()
            .filter(|entry| *entry.key() >= since)
            .map(|entry| *entry.value())
            .collect();
        days.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{Author, ContentKind, ContentRef, RuleKind, Severity};
    use std::sync::Arc;

    fn new_report(id: u64, severity: Severity, auto_blocked: bool) -> NewReport {
        NewReport {
            content: ContentRef::new(ContentKind::DiscussionReply, id),
            original_content: "texte".to_string(),
            author: Author::new(1, "a@b.fr"),
            confidence: 1.0,
            issues: Vec::new(),
            severity,
            auto_blocked,
        }
    }

    #[tokio::test]
    async fn test_rules_upsert_by_name() {
        let store = InMemoryModerationStore::new();
        store
            .save_rule(Rule::new("spam", RuleKind::Spam))
            .await
            .unwrap();
        store
            .save_rule(Rule::new("spam", RuleKind::Spam).with_threshold(0.9))
            .await
            .unwrap();

        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].threshold, 0.9);
    }

    #[tokio::test]
    async fn test_report_lifecycle() {
        let store = InMemoryModerationStore::new();
        let today = Utc::now().date_naive();
        let pending = store
            .create_report(new_report(1, Severity::Low, false), today, StatsDelta::flagged(false))
            .await
            .unwrap();
        let filtered = store
            .create_report(new_report(2, Severity::High, true), today, StatsDelta::flagged(true))
            .await
            .unwrap();
        assert_eq!(pending.status, ReportStatus::Pending);
        assert_eq!(filtered.status, ReportStatus::AutoFiltered);

        let rejection = ReviewRecord {
            status: ReportStatus::Rejected,
            reviewer: 5,
            notes: "spam".to_string(),
            reviewed_at: Utc::now(),
        };
        let reviewed = store
            .record_review(pending.id, rejection.clone(), today, StatsDelta::reviewed(false))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reviewed.reviewed_by, Some(5));

        // A terminal report is not reviewed twice, and nothing is counted.
        let again = store
            .record_review(pending.id, rejection, today, StatsDelta::reviewed(false))
            .await
            .unwrap();
        assert!(again.is_none());

        let day = store.get_day(today).await.unwrap().unwrap();
        assert_eq!((day.checked, day.flagged, day.auto_blocked), (2, 2, 1));
        assert_eq!(day.human_reviewed, 1);

        let pending_count = store
            .count_reports(Some(ReportStatus::Pending), &ReportFilter::default())
            .await
            .unwrap();
        assert_eq!(pending_count, 0);

        let missing = store
            .record_review(
                99,
                ReviewRecord {
                    status: ReportStatus::Approved,
                    reviewer: 1,
                    notes: String::new(),
                    reviewed_at: Utc::now(),
                },
                today,
                StatsDelta::reviewed(false),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = Arc::new(InMemoryModerationStore::new());
        let today = Utc::now().date_naive();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment(today, StatsDelta::flagged(false)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let day = store.get_day(today).await.unwrap().unwrap();
        assert_eq!(day.checked, 50);
        assert_eq!(day.flagged, 50);
        assert!(day.is_consistent());
    }
}
