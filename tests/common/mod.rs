//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use inbox_triage::client::{MailboxClient, MailboxResponse};
use inbox_triage::error::Result;
use inbox_triage::llm::TextGenerator;
use inbox_triage::models::{Account, Category, Credentials, Email, Message, SyncStatus};
use inbox_triage::unsubscribe::{MailSender, WebAutomation};
use mockall::mock;

pub const USER: &str = "user-1";

pub fn credentials(token: &str) -> Credentials {
    Credentials {
        access_token: Some(token.to_string()),
        refresh_token: Some(format!("refresh-{}", token)),
        expires_at: None,
    }
}

/// Create a test account with default values
pub fn create_test_account(id: &str, address: &str, is_primary: bool) -> Account {
    Account {
        id: id.to_string(),
        user_id: USER.to_string(),
        email_address: address.to_string(),
        credentials: credentials(id),
        is_primary,
        sync_status: SyncStatus::Pending,
        last_sync_at: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    }
}

pub fn create_test_category(id: &str, name: &str, description: &str) -> Category {
    Category {
        id: id.to_string(),
        user_id: USER.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        color: "#6b7280".to_string(),
        email_count: 0,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
    }
}

/// Create a fetched message; `minutes_ago` orders messages by receipt time
pub fn create_test_message(external_id: &str, subject: &str, minutes_ago: i64) -> Message {
    Message {
        external_id: external_id.to_string(),
        thread_id: format!("thread_{}", external_id),
        from: "News <news@example.com>".to_string(),
        to: "me@example.com".to_string(),
        subject: subject.to_string(),
        body: format!("Body of {}", subject),
        snippet: format!("Snippet of {}", subject),
        received_at: Utc::now() - Duration::minutes(minutes_ago),
        unsubscribe_url: None,
    }
}

/// Create a stored email owned by [`USER`]
pub fn create_test_email(
    id: &str,
    account_id: &str,
    category_id: Option<&str>,
    unsubscribe_url: Option<&str>,
) -> Email {
    Email {
        id: id.to_string(),
        user_id: USER.to_string(),
        account_id: account_id.to_string(),
        category_id: category_id.map(str::to_string),
        external_id: format!("ext-{}", id),
        thread_id: format!("thread-{}", id),
        from: "News <news@example.com>".to_string(),
        to: "me@example.com".to_string(),
        subject: format!("Subject {}", id),
        body: "Hello".to_string(),
        snippet: "Hello".to_string(),
        summary: "A greeting.".to_string(),
        ai_category: "Newsletters".to_string(),
        confidence: 0.9,
        archived: false,
        unsubscribe_url: unsubscribe_url.map(str::to_string),
        unsubscribe_attempted: false,
        received_at: Utc::now(),
        imported_at: Utc::now(),
    }
}

/// Model reply selecting `category`
pub fn classification_reply(category: &str) -> String {
    format!(
        "{{\"category\": \"{}\", \"confidence\": 0.92, \"reasoning\": \"matches the rule\"}}",
        category
    )
}

pub fn is_classification_prompt(prompt: &str) -> bool {
    prompt.starts_with("Classify")
}

mock! {
    pub Mailbox {}

    #[async_trait::async_trait]
    impl MailboxClient for Mailbox {
        async fn fetch_unread(
            &self,
            credentials: &Credentials,
            max_results: u32,
        ) -> Result<MailboxResponse<Vec<Message>>>;
        async fn archive(
            &self,
            credentials: &Credentials,
            external_id: &str,
        ) -> Result<MailboxResponse<()>>;
        async fn archive_batch(
            &self,
            credentials: &Credentials,
            external_ids: &[String],
        ) -> Result<MailboxResponse<usize>>;
        async fn delete(
            &self,
            credentials: &Credentials,
            external_id: &str,
        ) -> Result<MailboxResponse<()>>;
        async fn delete_batch(
            &self,
            credentials: &Credentials,
            external_ids: &[String],
        ) -> Result<MailboxResponse<usize>>;
    }
}

mock! {
    pub Generator {}

    #[async_trait::async_trait]
    impl TextGenerator for Generator {
        async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    }
}

mock! {
    pub Web {}

    #[async_trait::async_trait]
    impl WebAutomation for Web {
        async fn unsubscribe_via_web(&self, url: &str) -> Result<String>;
    }
}

mock! {
    pub Mailer {}

    #[async_trait::async_trait]
    impl MailSender for Mailer {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_message() {
        let msg = create_test_message("m1", "Weekly digest", 5);
        assert_eq!(msg.external_id, "m1");
        assert_eq!(msg.thread_id, "thread_m1");
        assert!(msg.received_at < Utc::now());
    }

    #[test]
    fn test_classification_reply_is_json() {
        let value: serde_json::Value = serde_json::from_str(&classification_reply("Work")).unwrap();
        assert_eq!(value["category"], "Work");
    }
}
