//! Bulk unsubscribe orchestration
//!
//! Each email is routed by its unsubscribe target: HTTP(S) targets go to
//! [`WebAutomation`], mailto targets to [`MailSender`], and emails without a
//! target are skipped. Emails are handled one at a time and every per-email
//! failure becomes a detail record instead of aborting the batch.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::UnsubscribeConfig;
use crate::error::{Result, TriageError};
use crate::models::{Email, UnsubscribeTarget};
use crate::storage::Store;

pub mod browser;
pub mod mailer;

pub use browser::{BrowserAutomation, ChromeLauncher, Locator, Matcher};
pub use mailer::SmtpMailSender;

pub const NO_TARGET_REASON: &str = "No unsubscribe link found";

/// Drives an unsubscribe page. Returns a short description of what was clicked.
#[async_trait]
pub trait WebAutomation: Send + Sync {
    async fn unsubscribe_via_web(&self, url: &str) -> Result<String>;
}

/// Sends a transactional email. Success means the relay accepted it.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsubscribeStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl UnsubscribeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsubscribeStatus::Succeeded => "succeeded",
            UnsubscribeStatus::Failed => "failed",
            UnsubscribeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for UnsubscribeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnsubscribeDetail {
    pub email_id: String,
    pub status: UnsubscribeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnsubscribeReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<UnsubscribeDetail>,
}

impl UnsubscribeReport {
    fn record(&mut self, email_id: &str, status: UnsubscribeStatus, reason: Option<String>) {
        match status {
            UnsubscribeStatus::Succeeded => self.succeeded += 1,
            UnsubscribeStatus::Failed => self.failed += 1,
            UnsubscribeStatus::Skipped => self.skipped += 1,
        }
        self.details.push(UnsubscribeDetail {
            email_id: email_id.to_string(),
            status,
            reason,
        });
    }
}

pub struct UnsubscribeOrchestrator {
    store: Arc<dyn Store>,
    web: Arc<dyn WebAutomation>,
    mailer: Option<Arc<dyn MailSender>>,
    request_subject: String,
    request_body: String,
}

impl UnsubscribeOrchestrator {
    /// `mailer` may be `None` when no SMTP relay is configured; mailto
    /// targets then fail with a reason instead of being attempted.
    pub fn new(
        store: Arc<dyn Store>,
        web: Arc<dyn WebAutomation>,
        mailer: Option<Arc<dyn MailSender>>,
        config: &UnsubscribeConfig,
    ) -> Self {
        Self {
            store,
            web,
            mailer,
            request_subject: config.request_subject.clone(),
            request_body: config.request_body.clone(),
        }
    }

    /// Attempt to unsubscribe from every given email of `user_id`.
    /// Ids that are unknown or belong to someone else are reported as failed.
    pub async fn unsubscribe(&self, user_id: &str, email_ids: &[String]) -> Result<UnsubscribeReport> {
        if email_ids.is_empty() {
            return Err(TriageError::Validation("No email ids given".to_string()));
        }

        let mut seen = HashSet::new();
        let requested: Vec<String> = email_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let emails = self.store.get_emails(user_id, &requested).await?;
        let found: HashSet<&str> = emails.iter().map(|e| e.id.as_str()).collect();

        let mut report = UnsubscribeReport::default();
        for id in requested.iter().filter(|id| !found.contains(id.as_str())) {
            report.record(id, UnsubscribeStatus::Failed, Some("Email not found".to_string()));
        }

        for email in &emails {
            let (status, reason) = self.attempt(email).await;
            if status == UnsubscribeStatus::Succeeded {
                if let Err(e) = self.store.mark_unsubscribe_attempted(&email.id).await {
                    warn!(email_id = %email.id, "Could not mark unsubscribe attempt: {}", e);
                }
            }
            report.record(&email.id, status, reason);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Unsubscribe batch finished"
        );
        Ok(report)
    }

    async fn attempt(&self, email: &Email) -> (UnsubscribeStatus, Option<String>) {
        let result = match email.unsubscribe_target() {
            None => return (UnsubscribeStatus::Skipped, Some(NO_TARGET_REASON.to_string())),
            Some(UnsubscribeTarget::Web(url)) => self.web.unsubscribe_via_web(&url).await.map(|_| ()),
            Some(UnsubscribeTarget::Mailto { address, subject }) => {
                self.send_request(&address, subject.as_deref()).await
            }
        };

        match result {
            Ok(()) => (UnsubscribeStatus::Succeeded, None),
            Err(e) => {
                warn!(email_id = %email.id, "Unsubscribe failed: {}", e);
                (UnsubscribeStatus::Failed, Some(e.to_string()))
            }
        }
    }

    async fn send_request(&self, address: &str, subject: Option<&str>) -> Result<()> {
        let mailer = self.mailer.as_ref().ok_or_else(|| {
            TriageError::Automation("SMTP relay not configured for mailto unsubscribe".to_string())
        })?;
        let subject = subject.unwrap_or(&self.request_subject);
        mailer.send(address, subject, &self.request_body).await
    }
}
