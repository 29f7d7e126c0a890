//! In-process store used by tests and `--database :memory:`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{EmailQuery, Store};
use crate::error::{Result, TriageError};
use crate::models::{Account, Category, Credentials, Email, SyncStatus};

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    categories: HashMap<String, Category>,
    emails: HashMap<String, Email>,
}

/// Store backed by hash maps behind a single lock. Every write, counter
/// increments included, happens under the write lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(kind: &str, id: &str) -> TriageError {
    TriageError::NotFound(format!("{} {}", kind, id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(account_id).cloned())
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| {
            b.is_primary
                .cmp(&a.is_primary)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(accounts)
    }

    async fn update_sync_status(
        &self,
        account_id: &str,
        status: SyncStatus,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found("account", account_id))?;
        account.sync_status = status;
        if last_sync_at.is_some() {
            account.last_sync_at = last_sync_at;
        }
        Ok(())
    }

    async fn update_credentials(&self, account_id: &str, credentials: &Credentials) -> Result<()> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found("account", account_id))?;
        account.credentials = credentials.clone();
        Ok(())
    }

    async fn delete_account(&self, account_id: &str) -> Result<bool> {
        Ok(self.tables.write().await.accounts.remove(account_id).is_some())
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.categories.insert(category.id.clone(), category.clone());
        Ok(())
    }

    async fn get_category(&self, category_id: &str) -> Result<Option<Category>> {
        Ok(self.tables.read().await.categories.get(category_id).cloned())
    }

    async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>> {
        let tables = self.tables.read().await;
        let mut categories: Vec<Category> = tables
            .categories
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(categories)
    }

    async fn update_category(&self, category: &Category) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .categories
            .get_mut(&category.id)
            .ok_or_else(|| not_found("category", &category.id))?;
        stored.name = category.name.clone();
        stored.description = category.description.clone();
        stored.color = category.color.clone();
        Ok(())
    }

    async fn delete_category(&self, category_id: &str) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .categories
            .remove(category_id)
            .is_some())
    }

    async fn increment_email_count(&self, category_id: &str, delta: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let category = tables
            .categories
            .get_mut(category_id)
            .ok_or_else(|| not_found("category", category_id))?;
        category.email_count += delta;
        Ok(())
    }

    async fn set_email_count(&self, category_id: &str, count: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let category = tables
            .categories
            .get_mut(category_id)
            .ok_or_else(|| not_found("category", category_id))?;
        category.email_count = count;
        Ok(())
    }

    async fn count_emails_in_category(&self, category_id: &str) -> Result<i64> {
        let tables = self.tables.read().await;
        let count = tables
            .emails
            .values()
            .filter(|e| e.category_id.as_deref() == Some(category_id))
            .count();
        Ok(count as i64)
    }

    async fn find_email_by_external_id(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Option<Email>> {
        let tables = self.tables.read().await;
        Ok(tables
            .emails
            .values()
            .find(|e| e.user_id == user_id && e.external_id == external_id)
            .cloned())
    }

    async fn insert_email(&self, email: &Email) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.emails.insert(email.id.clone(), email.clone());
        Ok(())
    }

    async fn get_email(&self, email_id: &str) -> Result<Option<Email>> {
        Ok(self.tables.read().await.emails.get(email_id).cloned())
    }

    async fn get_emails(&self, user_id: &str, email_ids: &[String]) -> Result<Vec<Email>> {
        let tables = self.tables.read().await;
        Ok(email_ids
            .iter()
            .filter_map(|id| tables.emails.get(id))
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_emails(&self, query: &EmailQuery) -> Result<Vec<Email>> {
        let tables = self.tables.read().await;
        let mut emails: Vec<Email> = tables
            .emails
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        emails.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(a.id.cmp(&b.id)));

        let emails = emails.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => emails.take(limit).collect(),
            None => emails.collect(),
        })
    }

    async fn set_email_category(&self, email_id: &str, category_id: Option<&str>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let email = tables
            .emails
            .get_mut(email_id)
            .ok_or_else(|| not_found("email", email_id))?;
        email.category_id = category_id.map(str::to_string);
        Ok(())
    }

    async fn mark_archived(&self, email_ids: &[String]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for id in email_ids {
            if let Some(email) = tables.emails.get_mut(id) {
                email.archived = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_unsubscribe_attempted(&self, email_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let email = tables
            .emails
            .get_mut(email_id)
            .ok_or_else(|| not_found("email", email_id))?;
        email.unsubscribe_attempted = true;
        Ok(())
    }

    async fn delete_emails(&self, email_ids: &[String]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        Ok(email_ids
            .iter()
            .filter(|id| tables.emails.remove(id.as_str()).is_some())
            .count())
    }

    async fn clear_category(&self, category_id: &str) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut cleared = 0;
        for email in tables.emails.values_mut() {
            if email.category_id.as_deref() == Some(category_id) {
                email.category_id = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}
