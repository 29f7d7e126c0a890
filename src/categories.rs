//! User-defined categories. The description is the classification rule.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TriageError};
use crate::models::{Category, UNCLASSIFIED};
use crate::storage::Store;

pub const DEFAULT_COLOR: &str = "#6b7280";

/// Fields to change on a category; `None` leaves a field as it is
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

pub struct CategoryManager {
    store: Arc<dyn Store>,
}

impl CategoryManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_category(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
        color: Option<&str>,
    ) -> Result<Category> {
        let name = validate_name(name)?;
        self.ensure_unique(user_id, &name, None).await?;

        let category = Category {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            description: description.trim().to_string(),
            color: normalize_color(color)?,
            email_count: 0,
            created_at: Utc::now(),
        };
        self.store.insert_category(&category).await?;

        info!(category = %category.name, "Category created");
        Ok(category)
    }

    pub async fn update_category(
        &self,
        user_id: &str,
        category_id: &str,
        update: CategoryUpdate,
    ) -> Result<Category> {
        let mut category = self.owned(user_id, category_id).await?;

        if let Some(name) = update.name {
            let name = validate_name(&name)?;
            self.ensure_unique(user_id, &name, Some(category_id)).await?;
            category.name = name;
        }
        if let Some(description) = update.description {
            category.description = description.trim().to_string();
        }
        if let Some(color) = update.color {
            category.color = normalize_color(Some(&color))?;
        }

        self.store.update_category(&category).await?;
        Ok(category)
    }

    /// Delete a category, moving its emails to uncategorized.
    /// Returns the number of emails reassigned.
    pub async fn delete_category(&self, user_id: &str, category_id: &str) -> Result<usize> {
        let category = self.owned(user_id, category_id).await?;

        let reassigned = self.store.clear_category(category_id).await?;
        self.store.delete_category(category_id).await?;

        info!(category = %category.name, reassigned, "Category deleted");
        Ok(reassigned)
    }

    pub async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>> {
        self.store.list_categories(user_id).await
    }

    async fn owned(&self, user_id: &str, category_id: &str) -> Result<Category> {
        self.store
            .get_category(category_id)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| TriageError::NotFound(format!("category {}", category_id)))
    }

    async fn ensure_unique(&self, user_id: &str, name: &str, except: Option<&str>) -> Result<()> {
        let folded = name.to_lowercase();
        let taken = self
            .store
            .list_categories(user_id)
            .await?
            .into_iter()
            .any(|c| c.name.to_lowercase() == folded && Some(c.id.as_str()) != except);
        if taken {
            return Err(TriageError::Validation(format!(
                "A category named '{}' already exists",
                name
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TriageError::Validation("Category name is required".to_string()));
    }
    // Reserved for the classifier's fallback
    if name.to_lowercase() == UNCLASSIFIED.to_lowercase() {
        return Err(TriageError::Validation(format!(
            "'{}' is a reserved category name",
            UNCLASSIFIED
        )));
    }
    Ok(name.to_string())
}

fn normalize_color(color: Option<&str>) -> Result<String> {
    let color = match color.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_COLOR.to_string()),
        Some(color) => color,
    };
    let hex = color.strip_prefix('#').unwrap_or(color);
    if (hex.len() == 6 || hex.len() == 3) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(format!("#{}", hex.to_ascii_lowercase()))
    } else {
        Err(TriageError::Validation(format!("Invalid color '{}'", color)))
    }
}
