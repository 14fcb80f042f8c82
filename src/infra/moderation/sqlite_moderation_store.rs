// SQLite-backed moderation store.
//
// Tables:
// - moderation_rules: Configured detectors, unique by name
// - moderation_whitelist: Allow-list entries, unique by (kind, value)
// - moderation_reports: One row per flagged content item
// - moderation_stats: Daily counters keyed by date
//
// Timestamps are fixed-width RFC3339 text so they sort lexically.
// Keywords, patterns and issues are JSON text columns.

use crate::core::moderation::{
    Author, ContentRef, DailyStats, Issue, ModerationError, ModerationReport, NewReport,
    NewWhitelistEntry, ReportFilter, ReportStatus, ReportStore, ReviewRecord, Rule, RuleStore,
    StatsDelta, StatsStore, WhitelistEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DATE_FORMAT: &str = "%Y-%m-%d";

const REPORT_COLUMNS: &str = r#"
    id, content_kind, object_id, original_content, author_id, author_email,
    confidence, issues, severity, status, auto_blocked, reviewed_by,
    review_notes, review_date, created_at, updated_at
"#;

fn storage<E: std::fmt::Display>(e: E) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

/// Fixed-width RFC3339 (microseconds, `Z`), so text order is time order.
pub(crate) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ModerationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ModerationError::StorageError(format!("Bad timestamp '{}': {}", value, e)))
}

fn parse_label<T: FromStr<Err = String>>(value: &str) -> Result<T, ModerationError> {
    value.parse::<T>().map_err(ModerationError::StorageError)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ModerationError> {
    serde_json::to_string(value).map_err(storage)
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, ModerationError> {
    serde_json::from_str(value).map_err(storage)
}

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file at `path`, and migrate it.
    pub async fn open(path: &str) -> Result<Self, ModerationError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(storage)?;
            }
        }

        // WAL lets readers run alongside the single writer; concurrent writers
        // wait on the busy timeout instead of failing with "database is locked".
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        let statements = [
            // Rules table
            r#"
            CREATE TABLE IF NOT EXISTS moderation_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                rule_type TEXT NOT NULL,
                keywords TEXT NOT NULL DEFAULT '[]',
                patterns TEXT NOT NULL DEFAULT '[]',
                threshold REAL NOT NULL DEFAULT 0.5,
                severity TEXT NOT NULL DEFAULT 'medium',
                auto_block BOOLEAN NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                category TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
            // Whitelist table
            r#"
            CREATE TABLE IF NOT EXISTS moderation_whitelist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                whitelist_type TEXT NOT NULL,
                value TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (whitelist_type, value)
            );
            "#,
            // Reports table
            r#"
            CREATE TABLE IF NOT EXISTS moderation_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_kind TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                original_content TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                author_email TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                issues TEXT NOT NULL DEFAULT '[]',
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                auto_blocked BOOLEAN NOT NULL DEFAULT 0,
                reviewed_by INTEGER,
                review_notes TEXT NOT NULL DEFAULT '',
                review_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_moderation_reports_status_severity ON moderation_reports(status, severity);",
            "CREATE INDEX IF NOT EXISTS idx_moderation_reports_auto_blocked ON moderation_reports(auto_blocked);",
            "CREATE INDEX IF NOT EXISTS idx_moderation_reports_content ON moderation_reports(content_kind, object_id);",
            // Daily stats table
            r#"
            CREATE TABLE IF NOT EXISTS moderation_stats (
                date TEXT PRIMARY KEY,
                total_content_checked INTEGER NOT NULL DEFAULT 0,
                total_flagged INTEGER NOT NULL DEFAULT 0,
                total_auto_blocked INTEGER NOT NULL DEFAULT 0,
                total_human_reviewed INTEGER NOT NULL DEFAULT 0,
                false_positives INTEGER NOT NULL DEFAULT 0
            );
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }

    fn row_to_rule(row: &SqliteRow) -> Result<Rule, ModerationError> {
        Ok(Rule {
            name: row.get("name"),
            description: row.get("description"),
            kind: parse_label(&row.get::<String, _>("rule_type"))?,
            keywords: from_json(&row.get::<String, _>("keywords"))?,
            patterns: from_json(&row.get::<String, _>("patterns"))?,
            threshold: row.get("threshold"),
            severity: parse_label(&row.get::<String, _>("severity"))?,
            auto_block: row.get("auto_block"),
            active: row.get("is_active"),
            category: row.get("category"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
        })
    }

    fn row_to_whitelist(row: &SqliteRow) -> Result<WhitelistEntry, ModerationError> {
        Ok(WhitelistEntry {
            id: row.get("id"),
            kind: parse_label(&row.get::<String, _>("whitelist_type"))?,
            value: row.get("value"),
            description: row.get("description"),
            active: row.get("is_active"),
            created_by: row.get::<i64, _>("created_by") as u64,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        })
    }

    fn row_to_report(row: &SqliteRow) -> Result<ModerationReport, ModerationError> {
        let issues: Vec<Issue> = from_json(&row.get::<String, _>("issues"))?;
        Ok(ModerationReport {
            id: row.get("id"),
            content: ContentRef::new(
                parse_label(&row.get::<String, _>("content_kind"))?,
                row.get::<i64, _>("object_id") as u64,
            ),
            original_content: row.get("original_content"),
            author: Author::new(
                row.get::<i64, _>("author_id") as u64,
                row.get::<String, _>("author_email"),
            ),
            confidence: row.get("confidence"),
            issues,
            severity: parse_label(&row.get::<String, _>("severity"))?,
            status: parse_label(&row.get::<String, _>("status"))?,
            auto_blocked: row.get("auto_blocked"),
            reviewed_by: row
                .get::<Option<i64>, _>("reviewed_by")
                .map(|id| id as u64),
            review_notes: row.get("review_notes"),
            review_date: row
                .get::<Option<String>, _>("review_date")
                .map(|value| parse_timestamp(&value))
                .transpose()?,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
        })
    }

    fn row_to_stats(row: &SqliteRow) -> Result<DailyStats, ModerationError> {
        let date: String = row.get("date");
        Ok(DailyStats {
            date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(storage)?,
            checked: row.get::<i64, _>("total_content_checked") as u64,
            flagged: row.get::<i64, _>("total_flagged") as u64,
            auto_blocked: row.get::<i64, _>("total_auto_blocked") as u64,
            human_reviewed: row.get::<i64, _>("total_human_reviewed") as u64,
            false_positive: row.get::<i64, _>("false_positives") as u64,
        })
    }

    /// Add `delta` to the counters of `date` in one upsert, on any executor
    /// (the pool, or a transaction shared with a report write).
    async fn add_to_day<'e, E>(
        executor: E,
        date: NaiveDate,
        delta: StatsDelta,
    ) -> Result<(), ModerationError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO moderation_stats (
                date, total_content_checked, total_flagged, total_auto_blocked,
                total_human_reviewed, false_positives
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                total_content_checked = total_content_checked + excluded.total_content_checked,
                total_flagged = total_flagged + excluded.total_flagged,
                total_auto_blocked = total_auto_blocked + excluded.total_auto_blocked,
                total_human_reviewed = total_human_reviewed + excluded.total_human_reviewed,
                false_positives = false_positives + excluded.false_positives
            "#,
        )
        .bind(date.format(DATE_FORMAT).to_string())
        .bind(delta.checked as i64)
        .bind(delta.flagged as i64)
        .bind(delta.auto_blocked as i64)
        .bind(delta.human_reviewed as i64)
        .bind(delta.false_positive as i64)
        .execute(executor)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for SqliteModerationStore {
    async fn list_rules(&self) -> Result<Vec<Rule>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM moderation_rules ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn get_rule(&self, name: &str) -> Result<Option<Rule>, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_rules WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(Self::row_to_rule).transpose()
    }

    async fn save_rule(&self, rule: Rule) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_rules (
                name, description, rule_type, keywords, patterns, threshold,
                severity, auto_block, is_active, category, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                rule_type = excluded.rule_type,
                keywords = excluded.keywords,
                patterns = excluded.patterns,
                threshold = excluded.threshold,
                severity = excluded.severity,
                auto_block = excluded.auto_block,
                is_active = excluded.is_active,
                category = excluded.category,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.kind.as_str())
        .bind(to_json(&rule.keywords)?)
        .bind(to_json(&rule.patterns)?)
        .bind(rule.threshold)
        .bind(rule.severity.as_str())
        .bind(rule.auto_block)
        .bind(rule.active)
        .bind(rule.category.as_deref())
        .bind(timestamp(&rule.created_at))
        .bind(timestamp(&rule.updated_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM moderation_whitelist ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(Self::row_to_whitelist).collect()
    }

    async fn add_whitelist_entry(
        &self,
        entry: NewWhitelistEntry,
    ) -> Result<WhitelistEntry, ModerationError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO moderation_whitelist (whitelist_type, value, description, is_active, created_by, created_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(entry.kind.as_str())
        .bind(&entry.value)
        .bind(&entry.description)
        .bind(entry.created_by as i64)
        .bind(timestamp(&created_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(WhitelistEntry {
            id: result.last_insert_rowid(),
            kind: entry.kind,
            value: entry.value,
            description: entry.description,
            active: true,
            created_by: entry.created_by,
            created_at,
        })
    }

    async fn set_whitelist_active(&self, id: i64, active: bool) -> Result<bool, ModerationError> {
        let result = sqlx::query("UPDATE moderation_whitelist SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ReportStore for SqliteModerationStore {
    async fn create_report(
        &self,
        report: NewReport,
        day: NaiveDate,
        delta: StatsDelta,
    ) -> Result<ModerationReport, ModerationError> {
        let now = Utc::now();
        let status = report.initial_status();

        // Dropping the transaction on an error rolls the insert back.
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let result = sqlx::query(
            r#"
            INSERT INTO moderation_reports (
                content_kind, object_id, original_content, author_id, author_email,
                confidence, issues, severity, status, auto_blocked, review_notes,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '', ?, ?)
            "#,
        )
        .bind(report.content.kind.as_str())
        .bind(report.content.id as i64)
        .bind(&report.original_content)
        .bind(report.author.id as i64)
        .bind(&report.author.email)
        .bind(report.confidence)
        .bind(to_json(&report.issues)?)
        .bind(report.severity.as_str())
        .bind(status.as_str())
        .bind(report.auto_blocked)
        .bind(timestamp(&now))
        .bind(timestamp(&now))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        Self::add_to_day(&mut *tx, day, delta).await?;
        tx.commit().await.map_err(storage)?;

        Ok(ModerationReport {
            id: result.last_insert_rowid(),
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
        })
    }

    async fn get_report(&self, id: i64) -> Result<Option<ModerationReport>, ModerationError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM moderation_reports WHERE id = ?",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(Self::row_to_report).transpose()
    }

    async fn record_review(
        &self,
        id: i64,
        review: ReviewRecord,
        day: NaiveDate,
        delta: StatsDelta,
    ) -> Result<Option<ModerationReport>, ModerationError> {
        let reviewed_at = timestamp(&review.reviewed_at);

        let mut tx = self.pool.begin().await.map_err(storage)?;
        // The status guard makes the check and the write one statement.
        let result = sqlx::query(
            r#"
            UPDATE moderation_reports
            SET status = ?, reviewed_by = ?, review_notes = ?, review_date = ?, updated_at = ?
            WHERE id = ? AND status NOT IN (?, ?)
            "#,
        )
        .bind(review.status.as_str())
        .bind(review.reviewer as i64)
        .bind(&review.notes)
        .bind(&reviewed_at)
        .bind(&reviewed_at)
        .bind(id)
        .bind(ReportStatus::Approved.as_str())
        .bind(ReportStatus::Rejected.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(storage)?;
            return Ok(None);
        }

        Self::add_to_day(&mut *tx, day, delta).await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM moderation_reports WHERE id = ?",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        let report = Self::row_to_report(&row)?;
        tx.commit().await.map_err(storage)?;

        Ok(Some(report))
    }

    async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ModerationReport>, ModerationError> {
        let status = status.map(|s| s.as_str());
        let severity = filter.severity.map(|s| s.as_str());
        let kind = filter.content_kind.map(|k| k.as_str());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM moderation_reports
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR severity = ?)
              AND (? IS NULL OR content_kind = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            REPORT_COLUMNS
        ))
        .bind(status)
        .bind(status)
        .bind(severity)
        .bind(severity)
        .bind(kind)
        .bind(kind)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::row_to_report).collect()
    }

    async fn count_reports(
        &self,
        status: Option<ReportStatus>,
        filter: &ReportFilter,
    ) -> Result<u64, ModerationError> {
        let status = status.map(|s| s.as_str());
        let severity = filter.severity.map(|s| s.as_str());
        let kind = filter.content_kind.map(|k| k.as_str());

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM moderation_reports
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR severity = ?)
              AND (? IS NULL OR content_kind = ?)
            "#,
        )
        .bind(status)
        .bind(status)
        .bind(severity)
        .bind(severity)
        .bind(kind)
        .bind(kind)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(row.get::<i64, _>("total") as u64)
    }

    async fn reports_created_since(
        &self,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<ModerationReport>, ModerationError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM moderation_reports
            WHERE created_at >= ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
            REPORT_COLUMNS
        ))
        .bind(timestamp(&since))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::row_to_report).collect()
    }

    async fn purge_reports(&self, older_than: DateTime<Utc>) -> Result<u64, ModerationError> {
        let result = sqlx::query("DELETE FROM moderation_reports WHERE created_at < ?")
            .bind(timestamp(&older_than))
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StatsStore for SqliteModerationStore {
    async fn increment(&self, date: NaiveDate, delta: StatsDelta) -> Result<(), ModerationError> {
        Self::add_to_day(&self.pool, date, delta).await
    }

    async fn get_day(&self, date: NaiveDate) -> Result<Option<DailyStats>, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_stats WHERE date = ?")
            .bind(date.format(DATE_FORMAT).to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(Self::row_to_stats).transpose()
    }

    async fn days_since(&self, since: NaiveDate) -> Result<Vec<DailyStats>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM moderation_stats WHERE date >= ? ORDER BY date DESC")
            .bind(since.format(DATE_FORMAT).to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter().map(Self::row_to_stats).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{
        ContentKind, IssueDetail, ModerationConfig, ModerationService, ReviewDecision,
        ReviewOutcome, RuleKind, Severity, WhitelistKind,
    };
    use crate::infra::moderation::SqliteVisibilityStore;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// One connection, or every pooled connection would get its own empty database.
    async fn memory_store() -> SqliteModerationStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteModerationStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn new_report(kind: ContentKind, id: u64, severity: Severity, auto_blocked: bool) -> NewReport {
        NewReport {
            content: ContentRef::new(kind, id),
            original_content: "appelle moi au 0123456789".to_string(),
            author: Author::new(3, "eleve@ecole.fr"),
            confidence: 1.0,
            issues: vec![Issue {
                issue_type: "Informations personnelles".to_string(),
                details: IssueDetail::Matches(vec!["0123456789".to_string()]),
                rule: "Informations Personnelles".to_string(),
            }],
            severity,
            auto_blocked,
        }
    }

    #[tokio::test]
    async fn test_rule_roundtrip_and_upsert() {
        let store = memory_store().await;
        let rule = Rule::new("Spam Commercial", RuleKind::Spam)
            .with_keywords(["gratuit", "promotion"])
            .with_patterns([r"(?:https?://|www\.)\S+"])
            .with_severity(Severity::Low)
            .with_category("Publicité");
        store.save_rule(rule.clone()).await.unwrap();

        let loaded = store.get_rule("Spam Commercial").await.unwrap().unwrap();
        assert_eq!(loaded.keywords, rule.keywords);
        assert_eq!(loaded.patterns, rule.patterns);
        assert_eq!(loaded.category.as_deref(), Some("Publicité"));
        assert_eq!(loaded.kind, RuleKind::Spam);

        store
            .save_rule(rule.with_threshold(0.9).inactive())
            .await
            .unwrap();
        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].threshold, 0.9);
        assert!(!rules[0].active);
        assert!(store.get_rule("absente").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_whitelist_unique_and_toggle() {
        let store = memory_store().await;
        let entry = NewWhitelistEntry {
            kind: WhitelistKind::Domain,
            value: "ecole.fr".to_string(),
            description: "Domaine interne".to_string(),
            created_by: 1,
        };

        let created = store.add_whitelist_entry(entry.clone()).await.unwrap();
        assert!(created.active);
        assert!(store.add_whitelist_entry(entry).await.is_err());

        assert!(store.set_whitelist_active(created.id, false).await.unwrap());
        assert!(!store.set_whitelist_active(999, false).await.unwrap());

        let entries = store.list_whitelist().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].active);
    }

    #[tokio::test]
    async fn test_reports_listing_and_review() {
        let store = memory_store().await;
        let day = Utc::now().date_naive();
        let first = store
            .create_report(
                new_report(ContentKind::CourseComment, 1, Severity::Medium, false),
                day,
                StatsDelta::flagged(false),
            )
            .await
            .unwrap();
        store
            .create_report(
                new_report(ContentKind::GroupMessage, 2, Severity::Medium, false),
                day,
                StatsDelta::flagged(false),
            )
            .await
            .unwrap();
        let blocked = store
            .create_report(
                new_report(ContentKind::CourseComment, 3, Severity::High, true),
                day,
                StatsDelta::flagged(true),
            )
            .await
            .unwrap();
        assert_eq!(blocked.status, ReportStatus::AutoFiltered);

        let loaded = store.get_report(first.id).await.unwrap().unwrap();
        assert_eq!(loaded.issues, first.issues);
        assert_eq!(loaded.author.email, "eleve@ecole.fr");

        let pending = store
            .list_reports(Some(ReportStatus::Pending), &ReportFilter::default(), 20, 0)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].id > pending[1].id);

        let comments = ReportFilter {
            severity: None,
            content_kind: Some(ContentKind::CourseComment),
        };
        assert_eq!(store.count_reports(None, &comments).await.unwrap(), 2);
        assert_eq!(
            store
                .count_reports(Some(ReportStatus::Pending), &comments)
                .await
                .unwrap(),
            1
        );

        let approval = ReviewRecord {
            status: ReportStatus::Approved,
            reviewer: 42,
            notes: "faux positif".to_string(),
            reviewed_at: Utc::now(),
        };
        let reviewed = store
            .record_review(first.id, approval.clone(), day, StatsDelta::reviewed(true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reviewed.status, ReportStatus::Approved);
        assert_eq!(reviewed.reviewed_by, Some(42));
        assert!(reviewed.review_date.is_some());

        // The second review of a terminal report changes and counts nothing.
        let rejection = ReviewRecord {
            status: ReportStatus::Rejected,
            ..approval
        };
        assert!(store
            .record_review(first.id, rejection, day, StatsDelta::reviewed(false))
            .await
            .unwrap()
            .is_none());
        let stored = store.get_report(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Approved);

        let stats = store.get_day(day).await.unwrap().unwrap();
        assert_eq!((stats.checked, stats.flagged, stats.auto_blocked), (3, 3, 1));
        assert_eq!((stats.human_reviewed, stats.false_positive), (1, 1));

        let today = store
            .reports_created_since(Utc::now() - Duration::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(today.len(), 3);

        assert_eq!(
            store
                .purge_reports(Utc::now() + Duration::seconds(1))
                .await
                .unwrap(),
            3
        );
        assert!(store.get_report(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_upsert_accumulates() {
        let store = memory_store().await;
        let today = Utc::now().date_naive();
        let yesterday = today - Duration::days(1);

        store.increment(today, StatsDelta::checked()).await.unwrap();
        store.increment(today, StatsDelta::flagged(true)).await.unwrap();
        store.increment(today, StatsDelta::reviewed(true)).await.unwrap();
        store.increment(yesterday, StatsDelta::checked()).await.unwrap();

        let day = store.get_day(today).await.unwrap().unwrap();
        assert_eq!(day.checked, 2);
        assert_eq!(day.flagged, 1);
        assert_eq!(day.auto_blocked, 1);
        assert_eq!(day.human_reviewed, 1);
        assert_eq!(day.false_positive, 1);

        let days = store.days_since(yesterday).await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, today);
        assert!(store.days_since(today).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("moderation.db");
        let path = path.to_string_lossy().to_string();

        let store = SqliteModerationStore::open(&path).await.unwrap();
        store
            .save_rule(Rule::new("tox", RuleKind::Toxicity))
            .await
            .unwrap();
        store.pool().close().await;

        let reopened = SqliteModerationStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stats_write_rolls_back_report() {
        let store = memory_store().await;
        let day = Utc::now().date_naive();
        let pending = store
            .create_report(
                new_report(ContentKind::CourseComment, 1, Severity::Low, false),
                day,
                StatsDelta::flagged(false),
            )
            .await
            .unwrap();

        sqlx::query("DROP TABLE moderation_stats")
            .execute(store.pool())
            .await
            .unwrap();

        let created = store
            .create_report(
                new_report(ContentKind::CourseComment, 2, Severity::Low, false),
                day,
                StatsDelta::flagged(false),
            )
            .await;
        assert!(matches!(created, Err(ModerationError::StorageError(_))));
        assert_eq!(
            store.count_reports(None, &ReportFilter::default()).await.unwrap(),
            1
        );

        let review = ReviewRecord {
            status: ReportStatus::Rejected,
            reviewer: 1,
            notes: String::new(),
            reviewed_at: Utc::now(),
        };
        assert!(store
            .record_review(pending.id, review, day, StatsDelta::reviewed(false))
            .await
            .is_err());
        let stored = store.get_report(pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReportStatus::Pending);
        assert!(stored.reviewed_by.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_a_storage_error() {
        let store = memory_store().await;
        let report = store
            .create_report(
                new_report(ContentKind::CourseComment, 1, Severity::Low, false),
                Utc::now().date_naive(),
                StatsDelta::flagged(false),
            )
            .await
            .unwrap();

        sqlx::query("UPDATE moderation_reports SET created_at = 'hier soir' WHERE id = ?")
            .bind(report.id)
            .execute(store.pool())
            .await
            .unwrap();

        assert!(matches!(
            store.get_report(report.id).await,
            Err(ModerationError::StorageError(_))
        ));
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let whole_second = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let text = timestamp(&whole_second);
        assert_eq!(text, "2024-03-01T10:00:00.000000Z");
        assert_eq!(parse_timestamp(&text).unwrap(), whole_second);
        assert!(parse_timestamp("2024-03-01").is_err());
    }

    async fn file_backed_service(
        dir: &tempfile::TempDir,
    ) -> ModerationService<SqliteModerationStore> {
        let path = dir.path().join("moderation.db");
        let store = SqliteModerationStore::open(&path.to_string_lossy())
            .await
            .unwrap();
        SqliteVisibilityStore::migrate(store.pool()).await.unwrap();
        let registry = SqliteVisibilityStore::registry(store.pool());

        let service = ModerationService::new(store, registry, ModerationConfig::default());
        service
            .create_rule(
                Rule::new("toxique", RuleKind::Toxicity)
                    .with_threshold(0.7)
                    .with_severity(Severity::High)
                    .with_auto_block(true),
            )
            .await
            .unwrap();
        service
            .create_rule(
                Rule::new("Informations Personnelles", RuleKind::Pattern)
                    .with_patterns([r"\b\d{10,}\b"])
                    .with_threshold(0.7)
                    .with_severity(Severity::Medium),
            )
            .await
            .unwrap();
        service
    }

    /// Every third text is toxic, every third carries a phone number.
    fn sample_text(i: u64) -> &'static str {
        match i % 3 {
            0 => "c'est de la merde",
            1 => "appelle moi au 0123456789",
            _ => "merci pour le cours",
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moderation_counts_every_check() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(file_backed_service(&dir).await);
        let author = Author::new(7, "apprenant@ecole.fr");

        let mut handles = Vec::new();
        for i in 0..100u64 {
            let service = Arc::clone(&service);
            let author = author.clone();
            handles.push(tokio::spawn(async move {
                service
                    .moderate(
                        ContentRef::new(ContentKind::CourseComment, i),
                        sample_text(i),
                        &author,
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = service.today_stats().await.unwrap();
        assert_eq!(stats.checked, 100);
        assert_eq!(stats.flagged, 67);
        assert_eq!(stats.auto_blocked, 34);
        assert!(stats.is_consistent());
        assert_eq!(
            service
                .store()
                .count_reports(None, &ReportFilter::default())
                .await
                .unwrap(),
            67
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reviews_record_one_decision() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(file_backed_service(&dir).await);
        let author = Author::new(7, "apprenant@ecole.fr");

        let mut report_ids = Vec::new();
        for i in 0..75u64 {
            if let Some(report) = service
                .moderate(
                    ContentRef::new(ContentKind::CourseComment, i),
                    sample_text(i),
                    &author,
                )
                .await
                .unwrap()
                .report
            {
                report_ids.push(report.id);
            }
        }
        assert_eq!(report_ids.len(), 50);

        let mut handles = Vec::new();
        for id in &report_ids {
            for decision in [ReviewDecision::Approve, ReviewDecision::Reject] {
                let service = Arc::clone(&service);
                let id = *id;
                handles.push(tokio::spawn(async move {
                    (id, service.review(id, decision, 1, "").await.unwrap())
                }));
            }
        }

        let mut winners: HashMap<i64, usize> = HashMap::new();
        for handle in handles {
            let (id, outcome) = handle.await.unwrap();
            match outcome {
                ReviewOutcome::Reviewed(_) => *winners.entry(id).or_default() += 1,
                ReviewOutcome::AlreadyReviewed(status) => assert!(status.is_terminal()),
                ReviewOutcome::NotFound => panic!("report {} vanished", id),
            }
        }
        assert_eq!(winners.len(), 50);
        assert!(winners.values().all(|count| *count == 1));

        for id in &report_ids {
            let report = service.get_report(*id).await.unwrap().unwrap();
            assert!(report.status.is_terminal());
        }

        let stats = service.today_stats().await.unwrap();
        assert_eq!(stats.human_reviewed, 50);
        assert!(stats.false_positive <= 50);
        assert!(stats.is_consistent());
    }
}
