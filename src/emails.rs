//! Operations on stored emails that keep counters and the provider in step

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::MailboxClient;
use crate::counters::CategoryCounters;
use crate::error::{Result, TriageError};
use crate::models::{Account, Credentials, Email};
use crate::storage::{EmailQuery, Store};

pub struct EmailManager {
    store: Arc<dyn Store>,
    mailbox: Arc<dyn MailboxClient>,
    counters: CategoryCounters,
}

impl EmailManager {
    pub fn new(
        store: Arc<dyn Store>,
        mailbox: Arc<dyn MailboxClient>,
        counters: CategoryCounters,
    ) -> Self {
        Self {
            store,
            mailbox,
            counters,
        }
    }

    pub async fn list_emails(&self, query: &EmailQuery) -> Result<Vec<Email>> {
        self.store.list_emails(query).await
    }

    /// Move an email to another category (or to uncategorized with `None`)
    pub async fn recategorize_email(
        &self,
        user_id: &str,
        email_id: &str,
        category_id: Option<&str>,
    ) -> Result<Email> {
        let mut email = self
            .store
            .get_email(email_id)
            .await?
            .filter(|e| e.user_id == user_id)
            .ok_or_else(|| TriageError::NotFound(format!("email {}", email_id)))?;

        if let Some(category_id) = category_id {
            self.store
                .get_category(category_id)
                .await?
                .filter(|c| c.user_id == user_id)
                .ok_or_else(|| TriageError::NotFound(format!("category {}", category_id)))?;
        }

        if email.category_id.as_deref() == category_id {
            return Ok(email);
        }

        self.store.set_email_category(email_id, category_id).await?;
        self.counters
            .email_moved(email.category_id.as_deref(), category_id)
            .await?;

        email.category_id = category_id.map(str::to_string);
        Ok(email)
    }

    /// Archive at the provider, then mark archived the emails whose provider
    /// call succeeded. Returns `false` if any account's call failed.
    pub async fn archive_emails(&self, user_id: &str, email_ids: &[String]) -> Result<bool> {
        let emails = self.owned_emails(user_id, email_ids).await?;
        let mut all_ok = true;

        for (account, group) in self.group_by_account(emails).await? {
            let external_ids: Vec<String> = group.iter().map(|e| e.external_id.clone()).collect();
            match self
                .mailbox
                .archive_batch(&account.credentials, &external_ids)
                .await
            {
                Ok(response) => {
                    self.persist_refreshed(&account, response.refreshed).await;
                    let ids: Vec<String> = group.iter().map(|e| e.id.clone()).collect();
                    self.store.mark_archived(&ids).await?;
                }
                Err(e) => {
                    warn!(account = %account.email_address, "Archive failed: {}", e);
                    all_ok = false;
                }
            }
        }

        Ok(all_ok)
    }

    /// Trash at the provider, then delete locally and decrement counters.
    /// Local deletion happens even when the provider call fails; the return
    /// value reports whether every provider call succeeded.
    pub async fn delete_emails(&self, user_id: &str, email_ids: &[String]) -> Result<bool> {
        let emails = self.owned_emails(user_id, email_ids).await?;
        let mut all_ok = true;
        let mut deleted = 0;

        for (account, group) in self.group_by_account(emails).await? {
            let external_ids: Vec<String> = group.iter().map(|e| e.external_id.clone()).collect();
            match self
                .mailbox
                .delete_batch(&account.credentials, &external_ids)
                .await
            {
                Ok(response) => {
                    self.persist_refreshed(&account, response.refreshed).await;
                    if response.data < external_ids.len() {
                        warn!(
                            account = %account.email_address,
                            requested = external_ids.len(),
                            trashed = response.data,
                            "Provider trashed only part of the batch"
                        );
                        all_ok = false;
                    }
                }
                Err(e) => {
                    warn!(account = %account.email_address, "Provider trash failed: {}", e);
                    all_ok = false;
                }
            }

            let ids: Vec<String> = group.iter().map(|e| e.id.clone()).collect();
            deleted += self.store.delete_emails(&ids).await?;
            for category_id in group.iter().filter_map(|e| e.category_id.as_deref()) {
                self.counters.email_removed(category_id).await?;
            }
        }

        info!(deleted, "Emails deleted");
        Ok(all_ok)
    }

    async fn owned_emails(&self, user_id: &str, email_ids: &[String]) -> Result<Vec<Email>> {
        if email_ids.is_empty() {
            return Err(TriageError::Validation("No email ids given".to_string()));
        }
        // A repeated id must not be archived or counted twice
        let mut seen = HashSet::new();
        let email_ids: Vec<String> = email_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let emails = self.store.get_emails(user_id, &email_ids).await?;
        if emails.len() < email_ids.len() {
            warn!(
                requested = email_ids.len(),
                found = emails.len(),
                "Some email ids were not found for this user"
            );
        }
        Ok(emails)
    }

    async fn group_by_account(&self, emails: Vec<Email>) -> Result<Vec<(Account, Vec<Email>)>> {
        let mut groups: HashMap<String, Vec<Email>> = HashMap::new();
        for email in emails {
            groups.entry(email.account_id.clone()).or_default().push(email);
        }

        let mut grouped = Vec::with_capacity(groups.len());
        for (account_id, group) in groups {
            let account = self
                .store
                .get_account(&account_id)
                .await?
                .ok_or_else(|| TriageError::NotFound(format!("account {}", account_id)))?;
            grouped.push((account, group));
        }
        Ok(grouped)
    }

    async fn persist_refreshed(&self, account: &Account, refreshed: Option<Credentials>) {
        if let Some(credentials) = refreshed {
            if let Err(e) = self.store.update_credentials(&account.id, &credentials).await {
                warn!(account = %account.email_address, "Could not persist refreshed credentials: {}", e);
            }
        }
    }
}
