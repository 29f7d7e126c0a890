//! Ingestion pipeline: fetch unread, dedup, classify, summarize, persist,
//! count and archive, per account.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::client::MailboxClient;
use crate::config::CounterMode;
use crate::counters::CategoryCounters;
use crate::error::{Result, TriageError};
use crate::models::{Account, Category, Classification, Credentials, Email, Message, SyncStatus};
use crate::storage::Store;

/// Cooperative stop flag shared between a sync run and whoever may interrupt it.
///
/// Checked between messages and between accounts; an in-flight provider
/// call is allowed to finish.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }
}

/// What happened to one account during a sync call
#[derive(Debug, Clone, Serialize)]
pub struct AccountSyncOutcome {
    pub account_id: String,
    pub email_address: String,
    pub processed: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Set when the account could not be synced at all
    pub error: Option<String>,
    /// The stop signal cut this account short or skipped it
    pub stopped: bool,
}

impl AccountSyncOutcome {
    fn new(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            email_address: account.email_address.clone(),
            processed: 0,
            duplicates: 0,
            failed: 0,
            error: None,
            stopped: false,
        }
    }
}

/// Result of syncing a single account
#[derive(Debug, Default)]
pub struct AccountSync {
    /// Emails persisted by this run, in processing order
    pub emails: Vec<Email>,
    pub duplicates: usize,
    pub failed: usize,
    pub stopped: bool,
}

pub struct IngestionPipeline {
    store: Arc<dyn Store>,
    mailbox: Arc<dyn MailboxClient>,
    classifier: Classifier,
    counters: CategoryCounters,
    max_results: u32,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        mailbox: Arc<dyn MailboxClient>,
        classifier: Classifier,
        counter_mode: CounterMode,
        max_results: u32,
    ) -> Self {
        let counters = CategoryCounters::new(store.clone(), counter_mode);
        Self {
            store,
            mailbox,
            classifier,
            counters,
            max_results,
        }
    }

    /// Sync one account, or every account of the user when `account_id` is
    /// `None`. A missing account or a user without accounts fails the whole
    /// call; after that, each account's failure is recorded in its outcome.
    pub async fn sync_account(
        &self,
        user_id: &str,
        account_id: Option<&str>,
        stop: &StopSignal,
    ) -> Result<Vec<AccountSyncOutcome>> {
        let accounts = match account_id {
            Some(id) => {
                let account = self
                    .store
                    .get_account(id)
                    .await?
                    .filter(|a| a.user_id == user_id)
                    .ok_or_else(|| TriageError::NotFound(format!("account {}", id)))?;
                vec![account]
            }
            None => {
                let accounts = self.store.list_accounts(user_id).await?;
                if accounts.is_empty() {
                    return Err(TriageError::NotFound(format!(
                        "no accounts to sync for user {}",
                        user_id
                    )));
                }
                accounts
            }
        };

        let mut outcomes = Vec::with_capacity(accounts.len());
        for account in &accounts {
            let mut outcome = AccountSyncOutcome::new(account);

            if stop.is_stopped() {
                info!(account = %account.email_address, "Stop requested, skipping account");
                outcome.stopped = true;
                outcomes.push(outcome);
                continue;
            }

            match self.sync_one(account, stop).await {
                Ok(sync) => {
                    outcome.processed = sync.emails.len();
                    outcome.duplicates = sync.duplicates;
                    outcome.failed = sync.failed;
                    outcome.stopped = sync.stopped;
                }
                Err(e) => {
                    error!(account = %account.email_address, "Sync failed: {}", e);
                    outcome.error = Some(e.to_string());
                }
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Run the per-account state machine `syncing -> completed | error`.
    /// Any failure after the account enters `syncing` is recorded as `error`
    /// before it is returned.
    pub async fn sync_one(&self, account: &Account, stop: &StopSignal) -> Result<AccountSync> {
        self.store
            .update_sync_status(&account.id, SyncStatus::Syncing, None)
            .await?;
        info!(account = %account.email_address, "Sync started");

        match self.run_batch(account, stop).await {
            Ok(sync) => {
                info!(
                    account = %account.email_address,
                    processed = sync.emails.len(),
                    duplicates = sync.duplicates,
                    failed = sync.failed,
                    "Sync completed"
                );
                Ok(sync)
            }
            Err(e) => {
                if let Err(status_err) = self
                    .store
                    .update_sync_status(&account.id, SyncStatus::Error, None)
                    .await
                {
                    warn!(account = %account.email_address, "Could not record sync error: {}", status_err);
                }
                Err(e)
            }
        }
    }

    async fn run_batch(&self, account: &Account, stop: &StopSignal) -> Result<AccountSync> {
        let mut credentials = account.credentials.clone();

        let response = self
            .mailbox
            .fetch_unread(&credentials, self.max_results)
            .await?;
        self.adopt_refreshed(account, &mut credentials, response.refreshed)
            .await;

        let categories = self.store.list_categories(&account.user_id).await?;
        let mut sync = AccountSync::default();

        for message in response.data {
            if stop.is_stopped() {
                info!(account = %account.email_address, "Stop requested, ending batch early");
                sync.stopped = true;
                break;
            }

            let external_id = message.external_id.clone();
            match self
                .process_message(account, &categories, &mut credentials, message)
                .await
            {
                Ok(Some(email)) => sync.emails.push(email),
                Ok(None) => sync.duplicates += 1,
                Err(e) => {
                    warn!(message_id = %external_id, "Skipping message: {}", e);
                    sync.failed += 1;
                }
            }
        }

        self.store
            .update_sync_status(&account.id, SyncStatus::Completed, Some(Utc::now()))
            .await?;
        Ok(sync)
    }

    /// Steps for one message. `Ok(None)` means it was already stored.
    async fn process_message(
        &self,
        account: &Account,
        categories: &[Category],
        credentials: &mut Credentials,
        message: Message,
    ) -> Result<Option<Email>> {
        if self
            .store
            .find_email_by_external_id(&account.user_id, &message.external_id)
            .await?
            .is_some()
        {
            debug!(message_id = %message.external_id, "Already stored");
            return Ok(None);
        }

        let classification = self.classifier.classify(categories, &message).await;
        let summary = self.classifier.summarize(&message).await?;

        let mut email = build_email(account, message, classification, summary);
        self.store.insert_email(&email).await?;

        if let Some(category_id) = &email.category_id {
            if let Err(e) = self.counters.email_added(category_id).await {
                warn!(category_id = %category_id, "Counter update failed: {}", e);
            }
        }

        match self.mailbox.archive(credentials, &email.external_id).await {
            Ok(response) => {
                self.adopt_refreshed(account, credentials, response.refreshed)
                    .await;
                self.store.mark_archived(&[email.id.clone()]).await?;
                email.archived = true;
            }
            Err(e) => {
                warn!(message_id = %email.external_id, "Archive failed, left in inbox: {}", e);
            }
        }

        Ok(Some(email))
    }

    /// Persist a refreshed credential pair and use it for the rest of the run.
    /// A failed write is logged; the call that produced it still succeeds.
    async fn adopt_refreshed(
        &self,
        account: &Account,
        credentials: &mut Credentials,
        refreshed: Option<Credentials>,
    ) {
        let Some(refreshed) = refreshed else {
            return;
        };
        if let Err(e) = self.store.update_credentials(&account.id, &refreshed).await {
            warn!(account = %account.email_address, "Could not persist refreshed credentials: {}", e);
        }
        *credentials = refreshed;
    }
}

fn build_email(
    account: &Account,
    message: Message,
    classification: Classification,
    summary: String,
) -> Email {
    Email {
        id: Uuid::new_v4().to_string(),
        user_id: account.user_id.clone(),
        account_id: account.id.clone(),
        category_id: classification.category_id,
        external_id: message.external_id,
        thread_id: message.thread_id,
        from: message.from,
        to: message.to,
        subject: message.subject,
        body: message.body,
        snippet: message.snippet,
        summary,
        ai_category: classification.category_name,
        confidence: classification.confidence,
        archived: false,
        unsubscribe_url: message.unsubscribe_url,
        unsubscribe_attempted: false,
        received_at: message.received_at,
        imported_at: Utc::now(),
    }
}
