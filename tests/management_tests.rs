//! Integration tests for account, category and email management
//!
//! The counter invariant (a category's `email_count` equals the number of
//! stored emails in it) is checked after every mutation.

mod common;

use std::sync::Arc;

use common::*;
use inbox_triage::accounts::AccountManager;
use inbox_triage::categories::CategoryManager;
use inbox_triage::classifier::Classifier;
use inbox_triage::client::MailboxResponse;
use inbox_triage::config::{AiConfig, CounterMode};
use inbox_triage::counters::{recount_categories, CategoryCounters};
use inbox_triage::emails::EmailManager;
use inbox_triage::error::TriageError;
use inbox_triage::pipeline::{IngestionPipeline, StopSignal};
use inbox_triage::storage::{CategoryFilter, EmailQuery, MemoryStore, SqliteStore, Store};

async fn assert_counters_match(store: &dyn Store) {
    for category in store.list_categories(USER).await.unwrap() {
        let live = store.count_emails_in_category(&category.id).await.unwrap();
        assert_eq!(
            category.email_count, live,
            "counter drift on category {}",
            category.name
        );
    }
}

fn idle_mailbox() -> MockMailbox {
    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_archive_batch()
        .returning(|_, ids| Ok(MailboxResponse::new(ids.len())));
    mailbox
        .expect_delete_batch()
        .returning(|_, ids| Ok(MailboxResponse::new(ids.len())));
    mailbox
}

/// Store with one primary account, two categories and four emails:
/// two in Work, one in Home, one uncategorized
async fn populated(mode: CounterMode) -> (Arc<MemoryStore>, CategoryCounters, String, String) {
    let store = Arc::new(MemoryStore::new());
    let counters = CategoryCounters::new(store.clone(), mode);

    let accounts = AccountManager::new(store.clone(), counters.clone());
    let account = accounts
        .connect_account(USER, "me@example.com", credentials("a"))
        .await
        .unwrap();

    let categories = CategoryManager::new(store.clone());
    let work = categories
        .create_category(USER, "Work", "Anything from colleagues", None)
        .await
        .unwrap();
    let home = categories
        .create_category(USER, "Home", "Family and household", Some("#0f0"))
        .await
        .unwrap();

    for (id, category) in [
        ("e1", Some(work.id.as_str())),
        ("e2", Some(work.id.as_str())),
        ("e3", Some(home.id.as_str())),
        ("e4", None),
    ] {
        store
            .insert_email(&create_test_email(id, &account.id, category, None))
            .await
            .unwrap();
        if let Some(category) = category {
            counters.email_added(category).await.unwrap();
        }
    }

    (store, counters, work.id, home.id)
}

#[tokio::test]
async fn test_counters_follow_recategorize_and_delete() {
    for mode in [CounterMode::BestEffort, CounterMode::Strict] {
        let (store, counters, work, home) = populated(mode).await;
        assert_counters_match(store.as_ref()).await;

        let emails = EmailManager::new(store.clone(), Arc::new(idle_mailbox()), counters);

        let moved = emails
            .recategorize_email(USER, "e1", Some(home.as_str()))
            .await
            .unwrap();
        assert_eq!(moved.category_id.as_deref(), Some(home.as_str()));
        assert_counters_match(store.as_ref()).await;

        emails.recategorize_email(USER, "e4", Some(work.as_str())).await.unwrap();
        emails.recategorize_email(USER, "e2", None).await.unwrap();
        assert_counters_match(store.as_ref()).await;

        let all_ok = emails
            .delete_emails(USER, &["e3".to_string(), "e4".to_string()])
            .await
            .unwrap();
        assert!(all_ok);
        assert_counters_match(store.as_ref()).await;

        assert_eq!(store.get_category(&home).await.unwrap().unwrap().email_count, 1);
        assert_eq!(store.get_category(&work).await.unwrap().unwrap().email_count, 0);
    }
}

#[tokio::test]
async fn test_recategorize_rejects_foreign_category() {
    let (store, counters, _, _) = populated(CounterMode::BestEffort).await;
    let mut foreign = create_test_category("cat-x", "Other", "not mine");
    foreign.user_id = "someone-else".to_string();
    store.insert_category(&foreign).await.unwrap();

    let emails = EmailManager::new(store.clone(), Arc::new(MockMailbox::new()), counters);
    let result = emails.recategorize_email(USER, "e1", Some("cat-x")).await;
    assert!(matches!(result, Err(TriageError::NotFound(_))));
    assert_counters_match(store.as_ref()).await;
}

#[tokio::test]
async fn test_delete_category_moves_emails_to_uncategorized() {
    let (store, _, work, home) = populated(CounterMode::BestEffort).await;
    let categories = CategoryManager::new(store.clone());

    let reassigned = categories.delete_category(USER, &work).await.unwrap();
    assert_eq!(reassigned, 2);
    assert!(store.get_category(&work).await.unwrap().is_none());

    let uncategorized = store
        .list_emails(&EmailQuery::for_user(USER).category(CategoryFilter::Uncategorized))
        .await
        .unwrap();
    assert_eq!(uncategorized.len(), 3);
    assert_eq!(store.list_emails(&EmailQuery::for_user(USER)).await.unwrap().len(), 4);
    assert_eq!(store.get_category(&home).await.unwrap().unwrap().email_count, 1);
}

#[tokio::test]
async fn test_archive_emails_reports_provider_failure() {
    let (store, counters, _, _) = populated(CounterMode::BestEffort).await;

    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_archive_batch()
        .times(1)
        .returning(|_, _| Err(TriageError::Network("connection reset".to_string())));

    let emails = EmailManager::new(store.clone(), Arc::new(mailbox), counters);
    let all_ok = emails
        .archive_emails(USER, &["e1".to_string(), "e2".to_string()])
        .await
        .unwrap();

    assert!(!all_ok);
    assert!(!store.get_email("e1").await.unwrap().unwrap().archived);
}

#[tokio::test]
async fn test_archive_emails_marks_local_copies() {
    let (store, counters, _, _) = populated(CounterMode::BestEffort).await;
    let emails = EmailManager::new(store.clone(), Arc::new(idle_mailbox()), counters);

    let all_ok = emails
        .archive_emails(USER, &["e1".to_string(), "e3".to_string()])
        .await
        .unwrap();

    assert!(all_ok);
    assert!(store.get_email("e1").await.unwrap().unwrap().archived);
    assert!(!store.get_email("e2").await.unwrap().unwrap().archived);
}

#[tokio::test]
async fn test_primary_account_cannot_be_disconnected() {
    let (store, counters, work, _) = populated(CounterMode::BestEffort).await;
    let accounts = AccountManager::new(store.clone(), counters.clone());
    let primary = accounts.list_accounts(USER).await.unwrap().remove(0);
    assert!(primary.is_primary);

    let result = accounts.disconnect_account(USER, &primary.id).await;
    assert!(matches!(result, Err(TriageError::Validation(_))));
    assert_eq!(store.list_emails(&EmailQuery::for_user(USER)).await.unwrap().len(), 4);

    // A secondary account takes its emails with it
    let secondary = accounts
        .connect_account(USER, "work@example.com", credentials("b"))
        .await
        .unwrap();
    store
        .insert_email(&create_test_email("e5", &secondary.id, Some(work.as_str()), None))
        .await
        .unwrap();
    counters.email_added(&work).await.unwrap();

    let removed = accounts.disconnect_account(USER, &secondary.id).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_account(&secondary.id).await.unwrap().is_none());
    assert!(store.get_email("e5").await.unwrap().is_none());
    assert_counters_match(store.as_ref()).await;
}

#[tokio::test]
async fn test_recount_repairs_drift() {
    let (store, _, work, _) = populated(CounterMode::BestEffort).await;
    store.set_email_count(&work, 17).await.unwrap();

    let corrections = recount_categories(store.as_ref(), USER).await.unwrap();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].previous, 17);
    assert_eq!(corrections[0].actual, 2);
    assert_counters_match(store.as_ref()).await;

    assert!(recount_categories(store.as_ref(), USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_persists_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("triage.db");

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        store
            .insert_account(&create_test_account("acc-1", "me@example.com", true))
            .await
            .unwrap();
        store
            .insert_category(&create_test_category("cat-news", "Newsletters", "Digests"))
            .await
            .unwrap();

        let messages = vec![
            create_test_message("m1", "Weekly digest", 1),
            create_test_message("m2", "Monthly digest", 2),
        ];
        let mut mailbox = MockMailbox::new();
        mailbox
            .expect_fetch_unread()
            .returning(move |_, _| Ok(MailboxResponse::new(messages.clone())));
        mailbox
            .expect_archive()
            .times(2)
            .returning(|_, _| Ok(MailboxResponse::new(())));

        let mut generator = MockGenerator::new();
        generator.expect_complete().returning(|prompt, _| {
            if is_classification_prompt(prompt) {
                Ok(classification_reply("Newsletters"))
            } else {
                Ok("Digest.".to_string())
            }
        });

        let pipeline = IngestionPipeline::new(
            store.clone(),
            Arc::new(mailbox),
            Classifier::new(Arc::new(generator), &AiConfig::default()),
            CounterMode::Strict,
            50,
        );
        let outcomes = pipeline
            .sync_account(USER, None, &StopSignal::new())
            .await
            .unwrap();
        assert_eq!(outcomes[0].processed, 2);
    }

    let reopened = SqliteStore::open(&db_path).unwrap();
    let emails = reopened.list_emails(&EmailQuery::for_user(USER)).await.unwrap();
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].external_id, "m1");
    assert!(emails.iter().all(|e| e.archived));
    assert_eq!(
        reopened.get_category("cat-news").await.unwrap().unwrap().email_count,
        2
    );
    assert_counters_match(&reopened).await;
}

#[tokio::test]
async fn test_repeated_ids_are_deleted_and_counted_once() {
    let (store, counters, work, _) = populated(CounterMode::BestEffort).await;

    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_delete_batch()
        .withf(|_, ids| ids.len() == 1)
        .times(1)
        .returning(|_, ids| Ok(MailboxResponse::new(ids.len())));

    let emails = EmailManager::new(store.clone(), Arc::new(mailbox), counters);
    let all_ok = emails
        .delete_emails(USER, &["e1".to_string(), "e1".to_string()])
        .await
        .unwrap();

    assert!(all_ok);
    assert!(store.get_email("e1").await.unwrap().is_none());
    assert_eq!(store.get_category(&work).await.unwrap().unwrap().email_count, 1);
    assert_counters_match(store.as_ref()).await;
}

#[tokio::test]
async fn test_repeated_ids_are_deleted_once_in_sqlite() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let counters = CategoryCounters::new(store.clone(), CounterMode::BestEffort);
    store
        .insert_account(&create_test_account("acc-1", "me@example.com", true))
        .await
        .unwrap();
    store
        .insert_category(&create_test_category("c1", "Work", "w"))
        .await
        .unwrap();
    for id in ["e1", "e2"] {
        store
            .insert_email(&create_test_email(id, "acc-1", Some("c1"), None))
            .await
            .unwrap();
        counters.email_added("c1").await.unwrap();
    }

    let emails = EmailManager::new(store.clone(), Arc::new(idle_mailbox()), counters);
    emails
        .delete_emails(USER, &["e1".to_string(), "e1".to_string()])
        .await
        .unwrap();

    assert_eq!(store.get_category("c1").await.unwrap().unwrap().email_count, 1);
    assert_counters_match(store.as_ref()).await;
}

#[tokio::test]
async fn test_repeated_ids_are_archived_once() {
    let (store, counters, _, _) = populated(CounterMode::BestEffort).await;

    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_archive_batch()
        .withf(|_, ids| ids.len() == 2)
        .times(1)
        .returning(|_, ids| Ok(MailboxResponse::new(ids.len())));

    let emails = EmailManager::new(store.clone(), Arc::new(mailbox), counters);
    let all_ok = emails
        .archive_emails(USER, &["e1".to_string(), "e2".to_string(), "e1".to_string()])
        .await
        .unwrap();
    assert!(all_ok);
}

#[tokio::test]
async fn test_partial_trash_is_reported() {
    let (store, counters, _, _) = populated(CounterMode::BestEffort).await;

    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_delete_batch()
        .times(1)
        .returning(|_, ids| Ok(MailboxResponse::new(ids.len() - 1)));

    let emails = EmailManager::new(store.clone(), Arc::new(mailbox), counters);
    let all_ok = emails
        .delete_emails(USER, &["e1".to_string(), "e2".to_string()])
        .await
        .unwrap();

    // Local copies go regardless of the provider outcome
    assert!(!all_ok);
    assert!(store.get_email("e1").await.unwrap().is_none());
    assert!(store.get_email("e2").await.unwrap().is_none());
    assert_counters_match(store.as_ref()).await;
}
