use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TriageError;

/// Category name reported when no category could be assigned
pub const UNCLASSIFIED: &str = "Unclassified";

/// OAuth credential pair stored on an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Whether the access token is past (or within `skew` of) its expiry.
    /// A missing expiry is treated as still valid.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - skew <= now,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "completed" => Ok(SyncStatus::Completed),
            "error" => Ok(SyncStatus::Error),
            other => Err(TriageError::Storage(format!("unknown sync status '{}'", other))),
        }
    }
}

/// One connected mailbox belonging to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub email_address: String,
    pub credentials: Credentials,
    pub is_primary: bool,
    pub sync_status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// User-defined classification bucket. The description is the rule the
/// language model classifies against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub color: String,
    pub email_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Unsubscribe destination advertised by a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnsubscribeTarget {
    Web(String),
    Mailto {
        address: String,
        subject: Option<String>,
    },
}

impl UnsubscribeTarget {
    /// Interpret a stored target string. `None` for anything that is neither
    /// an HTTP(S) URL nor a mailto URI with an address.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();

        if lower.starts_with("https://") || lower.starts_with("http://") {
            return Some(UnsubscribeTarget::Web(raw.to_string()));
        }

        if lower.starts_with("mailto:") {
            let rest = &raw["mailto:".len()..];
            let (address, query) = match rest.split_once('?') {
                Some((address, query)) => (address, Some(query)),
                None => (rest, None),
            };
            let address = address.trim();
            if address.is_empty() || !address.contains('@') {
                return None;
            }
            let subject = query.and_then(|q| {
                q.split('&').find_map(|pair| {
                    let (key, value) = pair.split_once('=')?;
                    key.eq_ignore_ascii_case("subject")
                        .then(|| value.replace("%20", " ").replace('+', " "))
                })
            });
            return Some(UnsubscribeTarget::Mailto {
                address: address.to_string(),
                subject,
            });
        }

        None
    }
}

/// Normalized form of one fetched mailbox item, before persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub external_id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub unsubscribe_url: Option<String>,
}

/// Persisted record of one processed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub category_id: Option<String>,
    pub external_id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub snippet: String,
    pub summary: String,
    pub ai_category: String,
    pub confidence: f32,
    pub archived: bool,
    pub unsubscribe_url: Option<String>,
    pub unsubscribe_attempted: bool,
    pub received_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
}

impl Email {
    pub fn unsubscribe_target(&self) -> Option<UnsubscribeTarget> {
        self.unsubscribe_url.as_deref().and_then(UnsubscribeTarget::parse)
    }
}

/// Result of classifying one message against a user's categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category_name: String,
    pub category_id: Option<String>,
    pub confidence: f32,
    pub reasoning: String,
    /// Set when the result is a degraded fallback
    pub error: Option<String>,
}

impl Classification {
    pub fn unclassified(note: impl Into<String>) -> Self {
        let note = note.into();
        Self {
            category_name: UNCLASSIFIED.to_string(),
            category_id: None,
            confidence: 0.0,
            reasoning: note.clone(),
            error: Some(note),
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.category_id.is_none() && self.category_name == UNCLASSIFIED
    }
}
