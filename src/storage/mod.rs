//! Storage gateway for accounts, categories and emails

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Account, Category, Credentials, Email, SyncStatus};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Which category an email listing is restricted to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    Any,
    Uncategorized,
    Category(String),
}

/// Filter for listing a user's emails. Results are sorted newest first.
#[derive(Debug, Clone, Default)]
pub struct EmailQuery {
    pub user_id: String,
    pub account_id: Option<String>,
    pub category: CategoryFilter,
    pub archived: Option<bool>,
    /// `None` returns every match
    pub limit: Option<usize>,
    pub offset: usize,
}

impl EmailQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn category(mut self, category: CategoryFilter) -> Self {
        self.category = category;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub(crate) fn matches(&self, email: &Email) -> bool {
        if email.user_id != self.user_id {
            return false;
        }
        if let Some(account_id) = &self.account_id {
            if &email.account_id != account_id {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if email.archived != archived {
                return false;
            }
        }
        match &self.category {
            CategoryFilter::Any => true,
            CategoryFilter::Uncategorized => email.category_id.is_none(),
            CategoryFilter::Category(id) => email.category_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// Persistence operations used by the pipeline, the unsubscribe orchestrator
/// and the management layer
#[async_trait]
pub trait Store: Send + Sync {
    // Accounts
    async fn insert_account(&self, account: &Account) -> Result<()>;
    async fn get_account(&self, account_id: &str) -> Result<Option<Account>>;
    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>>;
    /// Set the sync status; `last_sync_at` is only written when given
    async fn update_sync_status(
        &self,
        account_id: &str,
        status: SyncStatus,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn update_credentials(&self, account_id: &str, credentials: &Credentials) -> Result<()>;
    async fn delete_account(&self, account_id: &str) -> Result<bool>;

    // Categories
    async fn insert_category(&self, category: &Category) -> Result<()>;
    async fn get_category(&self, category_id: &str) -> Result<Option<Category>>;
    async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>>;
    /// Update name, description and color
    async fn update_category(&self, category: &Category) -> Result<()>;
    async fn delete_category(&self, category_id: &str) -> Result<bool>;
    /// Apply a delta to the denormalized email counter in one step
    async fn increment_email_count(&self, category_id: &str, delta: i64) -> Result<()>;
    async fn set_email_count(&self, category_id: &str, count: i64) -> Result<()>;
    async fn count_emails_in_category(&self, category_id: &str) -> Result<i64>;

    // Emails
    async fn find_email_by_external_id(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Option<Email>>;
    async fn insert_email(&self, email: &Email) -> Result<()>;
    async fn get_email(&self, email_id: &str) -> Result<Option<Email>>;
    /// Emails with the given ids that belong to `user_id`; unknown ids are ignored
    async fn get_emails(&self, user_id: &str, email_ids: &[String]) -> Result<Vec<Email>>;
    async fn list_emails(&self, query: &EmailQuery) -> Result<Vec<Email>>;
    async fn set_email_category(&self, email_id: &str, category_id: Option<&str>) -> Result<()>;
    async fn mark_archived(&self, email_ids: &[String]) -> Result<usize>;
    async fn mark_unsubscribe_attempted(&self, email_id: &str) -> Result<()>;
    async fn delete_emails(&self, email_ids: &[String]) -> Result<usize>;
    /// Move every email of a category to uncategorized
    async fn clear_category(&self, category_id: &str) -> Result<usize>;
}
