//! Connected mailbox accounts

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::counters::CategoryCounters;
use crate::error::{Result, TriageError};
use crate::models::{Account, Credentials, SyncStatus};
use crate::storage::{EmailQuery, Store};

pub struct AccountManager {
    store: Arc<dyn Store>,
    counters: CategoryCounters,
}

impl AccountManager {
    pub fn new(store: Arc<dyn Store>, counters: CategoryCounters) -> Self {
        Self { store, counters }
    }

    /// Record a granted mailbox. The user's first account becomes primary.
    /// Reconnecting an address the user already has replaces its credentials.
    pub async fn connect_account(
        &self,
        user_id: &str,
        email_address: &str,
        credentials: Credentials,
    ) -> Result<Account> {
        let email_address = email_address.trim();
        if user_id.trim().is_empty() || !email_address.contains('@') {
            return Err(TriageError::Validation(
                "A user id and a mailbox address are required".to_string(),
            ));
        }

        let existing = self.store.list_accounts(user_id).await?;

        if let Some(mut account) = existing
            .iter()
            .find(|a| a.email_address.eq_ignore_ascii_case(email_address))
            .cloned()
        {
            self.store
                .update_credentials(&account.id, &credentials)
                .await?;
            account.credentials = credentials;
            info!(account = %account.email_address, "Account reconnected");
            return Ok(account);
        }

        let account = Account {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            email_address: email_address.to_string(),
            credentials,
            is_primary: existing.is_empty(),
            sync_status: SyncStatus::Pending,
            last_sync_at: None,
            created_at: Utc::now(),
        };
        self.store.insert_account(&account).await?;

        info!(
            account = %account.email_address,
            primary = account.is_primary,
            "Account connected"
        );
        Ok(account)
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        self.store.list_accounts(user_id).await
    }

    /// Remove a secondary account and every email imported through it.
    /// Primary accounts are rejected before anything is deleted.
    /// Returns the number of emails removed.
    pub async fn disconnect_account(&self, user_id: &str, account_id: &str) -> Result<usize> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| TriageError::NotFound(format!("account {}", account_id)))?;

        if account.is_primary {
            return Err(TriageError::Validation(
                "The primary account cannot be disconnected".to_string(),
            ));
        }

        let emails = self
            .store
            .list_emails(&EmailQuery::for_user(user_id).account(account_id))
            .await?;
        let ids: Vec<String> = emails.iter().map(|e| e.id.clone()).collect();
        let removed = self.store.delete_emails(&ids).await?;

        for category_id in emails.iter().filter_map(|e| e.category_id.as_deref()) {
            self.counters.email_removed(category_id).await?;
        }

        self.store.delete_account(account_id).await?;
        info!(account = %account.email_address, emails = removed, "Account disconnected");
        Ok(removed)
    }
}
