//! Maintenance of the denormalized per-category email counters

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::CounterMode;
use crate::error::Result;
use crate::storage::Store;

/// Applies email add/remove/move events to category counters
#[derive(Clone)]
pub struct CategoryCounters {
    store: Arc<dyn Store>,
    mode: CounterMode,
}

impl CategoryCounters {
    pub fn new(store: Arc<dyn Store>, mode: CounterMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    pub async fn email_added(&self, category_id: &str) -> Result<()> {
        self.apply(category_id, 1).await
    }

    pub async fn email_removed(&self, category_id: &str) -> Result<()> {
        self.apply(category_id, -1).await
    }

    /// One decrement on the old category and one increment on the new one.
    /// Moving within the same category is a no-op.
    pub async fn email_moved(&self, from: Option<&str>, to: Option<&str>) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if let Some(from) = from {
            self.email_removed(from).await?;
        }
        if let Some(to) = to {
            self.email_added(to).await?;
        }
        Ok(())
    }

    async fn apply(&self, category_id: &str, delta: i64) -> Result<()> {
        match self.mode {
            CounterMode::BestEffort => self.store.increment_email_count(category_id, delta).await,
            CounterMode::Strict => {
                let live = self.store.count_emails_in_category(category_id).await?;
                debug!(category_id, live, "Recounted category");
                self.store.set_email_count(category_id, live).await
            }
        }
    }
}

/// A counter that was corrected by a recount
#[derive(Debug, Clone, Serialize)]
pub struct CounterCorrection {
    pub category_id: String,
    pub name: String,
    pub previous: i64,
    pub actual: i64,
}

/// Recompute every category counter of a user from the stored emails.
/// Returns the categories whose counter had drifted.
pub async fn recount_categories(store: &dyn Store, user_id: &str) -> Result<Vec<CounterCorrection>> {
    let mut corrections = Vec::new();

    for category in store.list_categories(user_id).await? {
        let actual = store.count_emails_in_category(&category.id).await?;
        if actual != category.email_count {
            store.set_email_count(&category.id, actual).await?;
            corrections.push(CounterCorrection {
                category_id: category.id,
                name: category.name,
                previous: category.email_count,
                actual,
            });
        }
    }

    info!(
        user_id,
        corrected = corrections.len(),
        "Category counters recounted"
    );
    Ok(corrections)
}
