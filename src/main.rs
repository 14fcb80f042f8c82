// This is the entry point of the moderation console.
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Parse the command line and run one administrative action

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use content_moderation::core::moderation::{
    Author, ContentKind, ContentRef, ContentSubmission, DailyStats, ModerationConfig,
    ModerationReport, ModerationService, NewWhitelistEntry, ReportFilter, ReviewDecision,
    ReviewOutcome, Rule, RuleKind, Severity, WhitelistKind,
};
use content_moderation::infra::moderation::{SqliteModerationStore, SqliteVisibilityStore};
use tracing_subscriber::EnvFilter;

type Service = ModerationService<SqliteModerationStore>;

#[derive(Parser, Debug)]
#[command(name = "moderation-console")]
#[command(about = "Content moderation administration console")]
#[command(version)]
struct Args {
    /// SQLite database file (defaults to MODERATION_DB_PATH or data/moderation.db)
    #[arg(long)]
    db: Option<String>,

    /// Id of the acting moderator, stamped on reviews and whitelist entries
    #[arg(long, env = "MODERATION_ADMIN_ID", default_value = "0")]
    admin: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Moderate a new piece of content and hide it if it is auto-blocked
    Moderate {
        #[arg(long)]
        kind: ContentKind,
        #[arg(long)]
        id: u64,
        #[arg(long)]
        author_id: u64,
        #[arg(long, default_value = "")]
        author_email: String,
        text: String,
    },
    /// Moderate a task (title and description together)
    Task {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        author_id: u64,
        #[arg(long, default_value = "")]
        author_email: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Dry run: show what the rules would decide, without saving anything
    Preview {
        #[arg(long, default_value = "0")]
        author_id: u64,
        #[arg(long, default_value = "")]
        author_email: String,
        text: String,
    },
    /// Approve or reject a report
    Review {
        report_id: i64,
        decision: ReviewDecision,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Show one report
    Report { id: i64 },
    /// Today's stats, today's reports and pending count
    Dashboard,
    /// Pending reports, newest first
    Pending {
        #[arg(long, default_value = "1")]
        page: u64,
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long)]
        kind: Option<ContentKind>,
    },
    /// Totals and rates over the last days
    Stats {
        #[arg(long)]
        days: Option<u64>,
    },
    /// List every rule
    Rules,
    /// Create a rule
    AddRule(RuleArgs),
    /// Change an existing rule; omitted options keep their current value
    UpdateRule(RuleUpdateArgs),
    /// Re-enable a rule
    EnableRule { name: String },
    /// Retire a rule without deleting it
    DisableRule { name: String },
    /// Create the stock rules that are missing
    Seed,
    /// Whitelist administration
    #[command(subcommand)]
    Whitelist(WhitelistCommand),
    /// Delete reports older than N days
    Purge { days: u64 },
}

#[derive(clap::Args, Debug)]
struct RuleArgs {
    name: String,
    #[arg(long)]
    kind: RuleKind,
    /// Comma-separated keywords
    #[arg(long, value_delimiter = ',')]
    keywords: Vec<String>,
    /// Regex pattern, repeat for several
    #[arg(long = "pattern")]
    patterns: Vec<String>,
    #[arg(long, default_value = "0.5")]
    threshold: f64,
    #[arg(long, default_value = "medium")]
    severity: Severity,
    #[arg(long)]
    auto_block: bool,
    #[arg(long, default_value = "")]
    description: String,
    /// Issue label overriding the kind's default
    #[arg(long)]
    category: Option<String>,
}

#[derive(clap::Args, Debug)]
struct RuleUpdateArgs {
    name: String,
    #[arg(long, value_delimiter = ',')]
    keywords: Option<Vec<String>>,
    #[arg(long = "pattern")]
    patterns: Option<Vec<String>>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    severity: Option<Severity>,
    #[arg(long)]
    auto_block: Option<bool>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    category: Option<String>,
}

#[derive(Subcommand, Debug)]
enum WhitelistCommand {
    /// Add an allow-list entry
    Add {
        kind: WhitelistKind,
        value: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List entries
    List,
    Enable { id: i64 },
    Disable { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging, RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ModerationConfig::from_env();
    if let Some(db) = args.db.clone() {
        config.db_path = db;
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let store = SqliteModerationStore::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open moderation database {}", config.db_path))?;
    SqliteVisibilityStore::migrate(store.pool())
        .await
        .context("Failed to migrate content visibility table")?;

    let pool = store.pool().clone();
    let registry = SqliteVisibilityStore::registry(&pool);
    let service = ModerationService::new(store, registry, config);

    run(&service, &pool, args.admin, args.command).await
}

async fn run(
    service: &Service,
    pool: &sqlx::Pool<sqlx::Sqlite>,
    admin: u64,
    command: Command,
) -> Result<()> {
    match command {
        Command::Moderate {
            kind,
            id,
            author_id,
            author_email,
            text,
        } => {
            let submission = ContentSubmission::new(
                ContentRef::new(kind, id),
                Author::new(author_id, author_email),
                text,
            );
            submit(service, pool, submission).await?;
        }
        Command::Task {
            id,
            author_id,
            author_email,
            title,
            description,
        } => {
            let author = Author::new(author_id, author_email);
            let submission = ContentSubmission::task(id, author, &title, &description);
            submit(service, pool, submission).await?;
        }
        Command::Preview {
            author_id,
            author_email,
            text,
        } => {
            let preview = service
                .preview(&text, &Author::new(author_id, author_email))
                .await?;
            if preview.whitelisted {
                println!("Whitelisted: no rule evaluated");
            } else if !preview.verdict.is_flagged() {
                println!("Clean: no rule violated");
            } else {
                println!(
                    "Violated: {} | severity {} | confidence {:.2} | {}",
                    preview.verdict.violated_rules.join(", "),
                    preview.verdict.severity,
                    preview.verdict.confidence,
                    if preview.verdict.auto_block {
                        "would be blocked"
                    } else {
                        "would stay visible"
                    }
                );
                for issue in &preview.verdict.issues {
                    println!("  - {} ({}): {}", issue.issue_type, issue.rule, issue.details);
                }
            }
        }
        Command::Review {
            report_id,
            decision,
            notes,
        } => match service.review(report_id, decision, admin, &notes).await? {
            ReviewOutcome::Reviewed(report) => {
                println!("Report #{} is now {}", report.id, report.status);
            }
            ReviewOutcome::NotFound => bail!("Report #{} not found", report_id),
            ReviewOutcome::AlreadyReviewed(status) => {
                println!("Report #{} was already reviewed ({})", report_id, status);
            }
        },
        Command::Report { id } => match service.get_report(id).await? {
            Some(report) => print_report_details(&report),
            None => bail!("Report #{} not found", id),
        },
        Command::Dashboard => {
            let dashboard = service.dashboard().await?;
            print_day(&dashboard.today_stats);
            println!(
                "Pending reviews: {} | Active rules: {}",
                dashboard.pending_reviews, dashboard.active_rules
            );
            println!("Reports today:");
            if dashboard.recent_reports.is_empty() {
                println!("  (none)");
            }
            for report in &dashboard.recent_reports {
                print_report_line(report);
            }
        }
        Command::Pending {
            page,
            severity,
            kind,
        } => {
            let filter = ReportFilter {
                severity,
                content_kind: kind,
            };
            let page = service.pending_reports(&filter, page).await?;
            println!(
                "Page {}/{} ({} pending)",
                page.number, page.total_pages, page.total_items
            );
            for report in &page.items {
                print_report_line(report);
            }
        }
        Command::Stats { days } => {
            let days = days.unwrap_or(service.config().stats_days);
            let summary = service.stats_summary(days).await?;
            println!(
                "Last {} days: {} checked, {} flagged, {} auto-blocked, {} reviewed, {} false positives",
                days,
                summary.total_checked,
                summary.total_flagged,
                summary.total_auto_blocked,
                summary.total_human_reviewed,
                summary.total_false_positive
            );
            println!(
                "Flagging rate {:.1}% | auto-block rate {:.1}% | false-positive rate {:.1}%",
                summary.flagging_rate, summary.auto_block_rate, summary.false_positive_rate
            );
            for day in &summary.days {
                print_day(day);
            }
        }
        Command::Rules => {
            for rule in service.list_rules().await? {
                println!(
                    "[{}] {} ({}) threshold {:.2} severity {}{} | {} keywords, {} patterns",
                    if rule.active { "on" } else { "off" },
                    rule.name,
                    rule.kind,
                    rule.threshold,
                    rule.severity,
                    if rule.auto_block { " auto-block" } else { "" },
                    rule.keywords.len(),
                    rule.patterns.len()
                );
            }
        }
        Command::AddRule(rule_args) => {
            let mut rule = Rule::new(rule_args.name, rule_args.kind)
                .with_keywords(rule_args.keywords)
                .with_patterns(rule_args.patterns)
                .with_threshold(rule_args.threshold)
                .with_severity(rule_args.severity)
                .with_auto_block(rule_args.auto_block)
                .with_description(rule_args.description);
            rule.category = rule_args.category;
            let name = rule.name.clone();
            service.create_rule(rule).await?;
            println!("Created rule '{}'", name);
        }
        Command::UpdateRule(update) => {
            let Some(mut rule) = service
                .list_rules()
                .await?
                .into_iter()
                .find(|rule| rule.name == update.name)
            else {
                bail!("Rule '{}' not found", update.name);
            };
            if let Some(keywords) = update.keywords {
                rule.keywords = keywords;
            }
            if let Some(patterns) = update.patterns {
                rule.patterns = patterns;
            }
            if let Some(threshold) = update.threshold {
                rule.threshold = threshold;
            }
            if let Some(severity) = update.severity {
                rule.severity = severity;
            }
            if let Some(auto_block) = update.auto_block {
                rule.auto_block = auto_block;
            }
            if let Some(description) = update.description {
                rule.description = description;
            }
            if let Some(category) = update.category {
                rule.category = (!category.is_empty()).then_some(category);
            }
            service.update_rule(rule).await?;
            println!("Updated rule '{}'", update.name);
        }
        Command::EnableRule { name } => {
            service.set_rule_active(&name, true).await?;
            println!("Enabled rule '{}'", name);
        }
        Command::DisableRule { name } => {
            service.set_rule_active(&name, false).await?;
            println!("Disabled rule '{}'", name);
        }
        Command::Seed => {
            let created = service.seed_default_rules().await?;
            println!("Created {} default rules", created);
        }
        Command::Whitelist(command) => run_whitelist(service, admin, command).await?,
        Command::Purge { days } => {
            let removed = service.purge_reports(days).await?;
            println!("Deleted {} reports older than {} days", removed, days);
        }
    }

    Ok(())
}

async fn run_whitelist(service: &Service, admin: u64, command: WhitelistCommand) -> Result<()> {
    match command {
        WhitelistCommand::Add {
            kind,
            value,
            description,
        } => {
            let entry = service
                .add_whitelist_entry(NewWhitelistEntry {
                    kind,
                    value,
                    description,
                    created_by: admin,
                })
                .await?;
            println!("Added whitelist entry #{} ({}: {})", entry.id, entry.kind, entry.value);
        }
        WhitelistCommand::List => {
            for entry in service.list_whitelist().await? {
                println!(
                    "#{} [{}] {}: {} {}",
                    entry.id,
                    if entry.active { "on" } else { "off" },
                    entry.kind,
                    entry.value,
                    entry.description
                );
            }
        }
        WhitelistCommand::Enable { id } => set_whitelist_active(service, id, true).await?,
        WhitelistCommand::Disable { id } => set_whitelist_active(service, id, false).await?,
    }
    Ok(())
}

async fn set_whitelist_active(service: &Service, id: i64, active: bool) -> Result<()> {
    if !service.set_whitelist_active(id, active).await? {
        bail!("Whitelist entry #{} not found", id);
    }
    println!(
        "Whitelist entry #{} {}",
        id,
        if active { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn submit(
    service: &Service,
    pool: &sqlx::Pool<sqlx::Sqlite>,
    submission: ContentSubmission,
) -> Result<()> {
    // The console owns no content tables, so register the item as visible first.
    SqliteVisibilityStore::new(pool.clone(), submission.content.kind)
        .track(submission.content.id)
        .await?;

    let outcome = service.submit(&submission).await?;
    match &outcome.report {
        Some(report) => {
            print_report_details(report);
            if !outcome.is_safe {
                println!("Content {} has been hidden", submission.content);
            }
        }
        None => println!("Content {} is clean", submission.content),
    }
    Ok(())
}

fn print_report_line(report: &ModerationReport) {
    println!(
        "  #{} {} [{}] {} by {} - {}",
        report.id,
        report.created_at.format("%Y-%m-%d %H:%M"),
        report.severity,
        report.content,
        report.author.id,
        report.issues_display()
    );
}

fn print_report_details(report: &ModerationReport) {
    println!(
        "Report #{} on {} | status {} | severity {} | confidence {:.2}{}",
        report.id,
        report.content,
        report.status,
        report.severity,
        report.confidence,
        if report.auto_blocked { " | auto-blocked" } else { "" }
    );
    for issue in &report.issues {
        println!("  - {} ({}): {}", issue.issue_type, issue.rule, issue.details);
    }
    if let Some(reviewer) = report.reviewed_by {
        println!("  Reviewed by {}: {}", reviewer, report.review_notes);
    }
}

fn print_day(day: &DailyStats) {
    println!(
        "{}: {} checked, {} flagged ({:.1}%), {} auto-blocked, {} reviewed, {} false positives",
        day.date,
        day.checked,
        day.flagged,
        day.flagged_percentage(),
        day.auto_blocked,
        day.human_reviewed,
        day.false_positive
    );
}
