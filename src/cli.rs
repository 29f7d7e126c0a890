//! Command-line interface

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::counters::CounterCorrection;
use crate::models::{Account, Category, Email};
use crate::pipeline::AccountSyncOutcome;
use crate::unsubscribe::UnsubscribeReport;

#[derive(Parser, Debug)]
#[command(name = "inbox-triage")]
#[command(version = "0.1.0")]
#[command(about = "AI triage for Gmail: classify, summarize, archive and unsubscribe", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Database file, overriding the config; `:memory:` keeps nothing on disk
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Manage connected mailboxes
    #[command(subcommand)]
    Account(AccountCommand),

    /// Manage classification categories
    #[command(subcommand)]
    Category(CategoryCommand),

    /// Fetch, classify, summarize and archive unread mail
    Sync {
        #[arg(long)]
        user: String,

        /// Only sync this account
        #[arg(long)]
        account: Option<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Work with stored emails
    #[command(subcommand)]
    Emails(EmailCommand),

    /// Unsubscribe from the senders of the given emails
    Unsubscribe {
        #[arg(long)]
        user: String,

        /// Email ids
        #[arg(required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Recompute category counters from stored emails
    Recount {
        #[arg(long)]
        user: String,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Register a mailbox with an already granted OAuth token pair
    Connect {
        #[arg(long)]
        user: String,

        /// Mailbox address
        #[arg(long)]
        email: String,

        #[arg(long, env = "GMAIL_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long, env = "GMAIL_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// Seconds until the access token expires
        #[arg(long)]
        expires_in: Option<i64>,
    },

    List {
        #[arg(long)]
        user: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Remove a secondary account and its imported emails
    Disconnect {
        #[arg(long)]
        user: String,

        account_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommand {
    Create {
        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        /// Natural-language rule used by the classifier
        #[arg(long)]
        description: String,

        #[arg(long)]
        color: Option<String>,
    },

    List {
        #[arg(long)]
        user: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    Update {
        #[arg(long)]
        user: String,

        category_id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        color: Option<String>,
    },

    /// Delete a category; its emails become uncategorized
    Delete {
        #[arg(long)]
        user: String,

        category_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum EmailCommand {
    List {
        #[arg(long)]
        user: String,

        #[arg(long)]
        account: Option<String>,

        /// Category id, or `none` for uncategorized
        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        skip: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Move an email to a category, or to uncategorized with `none`
    Recategorize {
        #[arg(long)]
        user: String,

        email_id: String,

        category: String,
    },

    Archive {
        #[arg(long)]
        user: String,

        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Trash at the provider and delete locally
    Delete {
        #[arg(long)]
        user: String,

        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub struct OutputArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// `none` (any case) selects uncategorized
pub fn parse_category_arg(value: &str) -> Option<String> {
    if value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value.to_string())
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

pub fn render_accounts(accounts: &[Account]) -> String {
    if accounts.is_empty() {
        return "No accounts connected.".to_string();
    }
    let mut out = String::new();
    for account in accounts {
        let last_sync = account
            .last_sync_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "{:<36}  {:<32}  {:<9}  {:<9}  last sync {}\n",
            account.id,
            truncate_string(&account.email_address, 32),
            if account.is_primary { "primary" } else { "secondary" },
            account.sync_status,
            last_sync,
        ));
    }
    out
}

pub fn render_categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "No categories defined.".to_string();
    }
    let mut out = String::new();
    for category in categories {
        out.push_str(&format!(
            "{:<36}  {:<20}  {:>6}  {}  {}\n",
            category.id,
            truncate_string(&category.name, 20),
            category.email_count,
            category.color,
            truncate_string(&category.description, 60),
        ));
    }
    out
}

pub fn render_emails(emails: &[Email]) -> String {
    if emails.is_empty() {
        return "No emails.".to_string();
    }
    let mut out = String::new();
    for email in emails {
        out.push_str(&format!(
            "{}  {}  {:<28}  {:<40}  [{}{}]\n    {}\n",
            email.id,
            email.received_at.format("%Y-%m-%d %H:%M"),
            truncate_string(&email.from, 28),
            truncate_string(&email.subject, 40),
            email.ai_category,
            if email.archived { ", archived" } else { "" },
            truncate_string(&email.summary, 100),
        ));
    }
    out
}

pub fn render_sync(outcomes: &[AccountSyncOutcome]) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        let line = match (&outcome.error, outcome.stopped) {
            (Some(error), _) => format!("{}: failed: {}", outcome.email_address, error),
            (None, true) if outcome.processed == 0 && outcome.failed == 0 => {
                format!("{}: skipped (stopped)", outcome.email_address)
            }
            (None, stopped) => format!(
                "{}: {} processed, {} already stored, {} failed{}",
                outcome.email_address,
                outcome.processed,
                outcome.duplicates,
                outcome.failed,
                if stopped { " (stopped early)" } else { "" },
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub fn render_unsubscribe(report: &UnsubscribeReport) -> String {
    let mut out = format!(
        "Succeeded: {}  Failed: {}  Skipped: {}\n",
        report.succeeded, report.failed, report.skipped
    );
    for detail in &report.details {
        match &detail.reason {
            Some(reason) => out.push_str(&format!("  {}  {}  {}\n", detail.email_id, detail.status, reason)),
            None => out.push_str(&format!("  {}  {}\n", detail.email_id, detail.status)),
        }
    }
    out
}

pub fn render_recount(corrections: &[CounterCorrection]) -> String {
    if corrections.is_empty() {
        return "All category counters are correct.".to_string();
    }
    corrections
        .iter()
        .map(|c| format!("{}: {} -> {}\n", c.name, c.previous, c.actual))
        .collect()
}
