//! Gmail mailbox client: unread fetch, archive and trash, with retry logic

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use google_gmail1::{
    api::{BatchModifyMessagesRequest, ModifyMessageRequest},
    hyper_rustls, hyper_util, Gmail,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{resolve_access_token, TokenRefresher, GMAIL_MODIFY_SCOPE};
use crate::error::{Result, TriageError};
use crate::models::{Credentials, Message};
use crate::parser::parse_message;

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

/// Default number of unread messages fetched per sync
pub const DEFAULT_MAX_RESULTS: u32 = 50;

/// Install the process-wide rustls crypto provider. Repeated calls are no-ops.
///
/// Several TLS stacks are linked (Gmail, language model, SMTP), so rustls
/// cannot pick a provider on its own.
pub fn install_crypto_provider() {
    #[cfg(not(windows))]
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    #[cfg(windows)]
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Result of a mailbox call, carrying a refreshed credential pair when the
/// client had to refresh the access token. The caller owns persisting it.
#[derive(Debug, Clone)]
pub struct MailboxResponse<T> {
    pub data: T,
    pub refreshed: Option<Credentials>,
}

impl<T> MailboxResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            refreshed: None,
        }
    }
}

/// Trait defining mailbox operations for easier testing
#[async_trait]
pub trait MailboxClient: Send + Sync {
    /// Fetch unread inbox messages, newest first, bounded by `max_results`
    async fn fetch_unread(
        &self,
        credentials: &Credentials,
        max_results: u32,
    ) -> Result<MailboxResponse<Vec<Message>>>;

    /// Remove a message from the inbox without deleting it
    async fn archive(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<MailboxResponse<()>>;

    /// Archive several messages; returns the number modified
    async fn archive_batch(
        &self,
        credentials: &Credentials,
        external_ids: &[String],
    ) -> Result<MailboxResponse<usize>>;

    /// Move a message to trash
    async fn delete(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<MailboxResponse<()>>;

    /// Move several messages to trash; returns the number trashed
    async fn delete_batch(
        &self,
        credentials: &Credentials,
        external_ids: &[String],
    ) -> Result<MailboxResponse<usize>>;
}

/// Production Gmail client
///
/// - Bearer token per call, refreshed through [`TokenRefresher`] when expired
/// - Exponential backoff retry on transient errors
/// - Concurrent detail fetches bounded by `fetch_concurrency`
pub struct GmailMailboxClient {
    connector: HttpsConnector,
    refresher: Option<TokenRefresher>,
    query: String,
    fetch_concurrency: usize,
}

impl GmailMailboxClient {
    /// Create a new Gmail client
    ///
    /// # Arguments
    /// * `refresher` - Token refresher; `None` disables refresh
    /// * `query` - Gmail search query selecting unread inbox mail
    /// * `fetch_concurrency` - Maximum concurrent `messages.get` calls
    pub fn new(
        refresher: Option<TokenRefresher>,
        query: impl Into<String>,
        fetch_concurrency: usize,
    ) -> Result<Self> {
        install_crypto_provider();

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| TriageError::Config(format!("Failed to load TLS roots: {}", e)))?
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            connector,
            refresher,
            query: query.into(),
            fetch_concurrency: fetch_concurrency.max(1),
        })
    }

    /// Build a hub bound to one access token
    fn hub(&self, access_token: String) -> GmailHub {
        let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
            .build(self.connector.clone());
        Gmail::new(client, access_token)
    }

    async fn authorized_hub(
        &self,
        credentials: &Credentials,
    ) -> Result<(GmailHub, Option<Credentials>)> {
        let token = resolve_access_token(credentials, self.refresher.as_ref()).await?;
        Ok((self.hub(token.access_token), token.refreshed))
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        matches!(
            error,
            TriageError::Server { .. }
                | TriageError::RateLimitExceeded { .. }
                | TriageError::Network(_)
        )
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(500);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_unread_ids(&self, hub: &GmailHub, max_results: u32) -> Result<Vec<String>> {
        Self::with_retry("messages.list", 3, || async {
            let (_, response) = hub
                .users()
                .messages_list("me")
                .q(&self.query)
                .max_results(max_results)
                .add_scope(GMAIL_MODIFY_SCOPE)
                .doit()
                .await?;

            Ok(response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect())
        })
        .await
    }

    async fn fetch_full(&self, hub: &GmailHub, id: &str) -> Result<Message> {
        Self::with_retry("messages.get", 3, || async {
            let (_, msg) = hub
                .users()
                .messages_get("me", id)
                .format("full")
                .add_scope(GMAIL_MODIFY_SCOPE)
                .doit()
                .await?;
            parse_message(msg)
        })
        .await
    }

    async fn remove_inbox_label(&self, hub: &GmailHub, external_id: &str) -> Result<()> {
        Self::with_retry("messages.modify", 3, || async {
            let request = ModifyMessageRequest {
                add_label_ids: None,
                remove_label_ids: Some(vec!["INBOX".to_string()]),
            };
            hub.users()
                .messages_modify(request, "me", external_id)
                .add_scope(GMAIL_MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(())
        })
        .await
    }

    async fn trash(&self, hub: &GmailHub, external_id: &str) -> Result<()> {
        Self::with_retry("messages.trash", 3, || async {
            hub.users()
                .messages_trash("me", external_id)
                .add_scope(GMAIL_MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MailboxClient for GmailMailboxClient {
    async fn fetch_unread(
        &self,
        credentials: &Credentials,
        max_results: u32,
    ) -> Result<MailboxResponse<Vec<Message>>> {
        let (hub, refreshed) = self.authorized_hub(credentials).await?;

        let ids = self.list_unread_ids(&hub, max_results).await?;
        debug!("Listed {} unread message ids", ids.len());

        if ids.is_empty() {
            return Ok(MailboxResponse {
                data: Vec::new(),
                refreshed,
            });
        }

        // Concurrency is bounded by the listing page, never the whole mailbox
        let hub = &hub;
        let fetched: Vec<(String, Result<Message>)> = stream::iter(ids)
            .map(|id| async move {
                let result = self.fetch_full(hub, &id).await;
                (id, result)
            })
            .buffered(self.fetch_concurrency)
            .collect()
            .await;
        let messages = keep_fetched(fetched)?;

        Ok(MailboxResponse {
            data: messages,
            refreshed,
        })
    }

    async fn archive(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<MailboxResponse<()>> {
        let (hub, refreshed) = self.authorized_hub(credentials).await?;
        self.remove_inbox_label(&hub, external_id).await?;
        Ok(MailboxResponse {
            data: (),
            refreshed,
        })
    }

    async fn archive_batch(
        &self,
        credentials: &Credentials,
        external_ids: &[String],
    ) -> Result<MailboxResponse<usize>> {
        if external_ids.is_empty() {
            return Ok(MailboxResponse::new(0));
        }

        let (hub, refreshed) = self.authorized_hub(credentials).await?;

        // Gmail API allows up to 1000 messages per batch request
        const BATCH_SIZE: usize = 1000;
        let mut total_modified = 0;

        for chunk in external_ids.chunks(BATCH_SIZE) {
            let chunk_vec = chunk.to_vec();
            Self::with_retry("messages.batchModify", 3, || async {
                let request = BatchModifyMessagesRequest {
                    ids: Some(chunk_vec.clone()),
                    add_label_ids: None,
                    remove_label_ids: Some(vec!["INBOX".to_string()]),
                };
                hub.users()
                    .messages_batch_modify(request, "me")
                    .add_scope(GMAIL_MODIFY_SCOPE)
                    .doit()
                    .await?;
                Ok(())
            })
            .await?;

            total_modified += chunk.len();
        }

        Ok(MailboxResponse {
            data: total_modified,
            refreshed,
        })
    }

    async fn delete(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<MailboxResponse<()>> {
        let (hub, refreshed) = self.authorized_hub(credentials).await?;
        self.trash(&hub, external_id).await?;
        Ok(MailboxResponse {
            data: (),
            refreshed,
        })
    }

    async fn delete_batch(
        &self,
        credentials: &Credentials,
        external_ids: &[String],
    ) -> Result<MailboxResponse<usize>> {
        if external_ids.is_empty() {
            return Ok(MailboxResponse::new(0));
        }

        let (hub, refreshed) = self.authorized_hub(credentials).await?;

        // batchDelete is permanent, so trash one by one
        let mut trashed = 0;
        for id in external_ids {
            match self.trash(&hub, id).await {
                Ok(()) => trashed += 1,
                Err(e) if e.requires_reauth() => return Err(e),
                Err(TriageError::NotFound(_)) => {
                    debug!("Message {} already gone at provider", id);
                    trashed += 1;
                }
                Err(e) => warn!("Failed to trash message {}: {}", id, e),
            }
        }

        Ok(MailboxResponse {
            data: trashed,
            refreshed,
        })
    }
}

/// Drop messages deleted between listing and fetching; any other failure
/// fails the whole fetch.
fn keep_fetched(fetched: Vec<(String, Result<Message>)>) -> Result<Vec<Message>> {
    let mut messages = Vec::with_capacity(fetched.len());
    for (id, result) in fetched {
        match result {
            Ok(message) => messages.push(message),
            Err(TriageError::NotFound(_)) => {
                warn!("Message {} disappeared before it could be fetched", id);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(messages)
}

// Implement MailboxClient for Arc<GmailMailboxClient> to allow shared ownership
#[async_trait]
impl MailboxClient for Arc<GmailMailboxClient> {
    async fn fetch_unread(
        &self,
        credentials: &Credentials,
        max_results: u32,
    ) -> Result<MailboxResponse<Vec<Message>>> {
        self.as_ref().fetch_unread(credentials, max_results).await
    }

    async fn archive(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<MailboxResponse<()>> {
        self.as_ref().archive(credentials, external_id).await
    }

    async fn archive_batch(
        &self,
        credentials: &Credentials,
        external_ids: &[String],
    ) -> Result<MailboxResponse<usize>> {
        self.as_ref().archive_batch(credentials, external_ids).await
    }

    async fn delete(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<MailboxResponse<()>> {
        self.as_ref().delete(credentials, external_id).await
    }

    async fn delete_batch(
        &self,
        credentials: &Credentials,
        external_ids: &[String],
    ) -> Result<MailboxResponse<usize>> {
        self.as_ref().delete_batch(credentials, external_ids).await
    }
}
