//! Inbox Triage
//!
//! Pulls unread mail from connected Gmail accounts, sorts each message into a
//! user-defined category with a language model, summarizes it, archives it at
//! the provider and keeps a local copy. Stored emails can later be moved,
//! archived, deleted, or used to unsubscribe from their senders.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use inbox_triage::{
//!     classifier::Classifier, client::GmailMailboxClient, config::Config,
//!     llm::AnthropicClient, pipeline::{IngestionPipeline, StopSignal},
//!     storage::SqliteStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let store = Arc::new(SqliteStore::open(&config.storage.database_path)?);
//!
//!     let generator = Arc::new(AnthropicClient::from_config(&config.ai)?);
//!     let mailbox = Arc::new(GmailMailboxClient::new(None, config.sync.query.clone(), 8)?);
//!
//!     let pipeline = IngestionPipeline::new(
//!         store,
//!         mailbox,
//!         Classifier::new(generator, &config.ai),
//!         config.storage.counter_mode,
//!         config.sync.max_results,
//!     );
//!     let outcomes = pipeline.sync_account("user-1", None, &StopSignal::new()).await?;
//!     println!("{} accounts synced", outcomes.len());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`accounts`] - Connecting and disconnecting mailboxes
//! - [`auth`] - OAuth2 client secrets and token refresh
//! - [`categories`] - User-defined categories
//! - [`classifier`] - Language-model classification and summaries
//! - [`cli`] - Command-line interface
//! - [`client`] - Gmail API client
//! - [`config`] - Configuration management
//! - [`counters`] - Per-category email counters
//! - [`emails`] - Recategorize, archive and delete stored emails
//! - [`error`] - Error types and result aliases
//! - [`llm`] - Text generation provider
//! - [`models`] - Core data structures
//! - [`parser`] - Gmail message parsing
//! - [`pipeline`] - Ingestion pipeline
//! - [`storage`] - Persistence (SQLite and in-memory)
//! - [`unsubscribe`] - Bulk unsubscribe by web page or mail request

pub mod accounts;
pub mod auth;
pub mod categories;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod counters;
pub mod emails;
pub mod error;
pub mod llm;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod storage;
pub mod unsubscribe;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{
    Account, Category, Classification, Credentials, Email, Message, SyncStatus,
    UnsubscribeTarget, UNCLASSIFIED,
};

pub use config::{Config, CounterMode};

pub use client::{GmailMailboxClient, MailboxClient, MailboxResponse};
pub use llm::{AnthropicClient, TextGenerator};
pub use classifier::Classifier;

pub use storage::{EmailQuery, MemoryStore, SqliteStore, Store};

// Managers
pub use accounts::AccountManager;
pub use categories::CategoryManager;
pub use counters::CategoryCounters;
pub use emails::EmailManager;

pub use pipeline::{AccountSyncOutcome, IngestionPipeline, StopSignal};
pub use unsubscribe::{UnsubscribeOrchestrator, UnsubscribeReport, UnsubscribeStatus};
