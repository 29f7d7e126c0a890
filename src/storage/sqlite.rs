use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{CategoryFilter, EmailQuery, Store};
use crate::error::{Result, TriageError};
use crate::models::{Account, Category, Credentials, Email, SyncStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    email_address TEXT NOT NULL,
    access_token TEXT,
    refresh_token TEXT,
    expires_at TEXT,
    is_primary BOOLEAN NOT NULL DEFAULT false,
    sync_status TEXT NOT NULL CHECK(sync_status IN ('pending', 'syncing', 'completed', 'error')),
    last_sync_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    color TEXT NOT NULL,
    email_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS emails (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    category_id TEXT,
    external_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    snippet TEXT NOT NULL,
    summary TEXT NOT NULL,
    ai_category TEXT NOT NULL,
    confidence REAL NOT NULL,
    archived BOOLEAN NOT NULL DEFAULT false,
    unsubscribe_url TEXT,
    unsubscribe_attempted BOOLEAN NOT NULL DEFAULT false,
    received_at TEXT NOT NULL,
    imported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);
CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id);
CREATE INDEX IF NOT EXISTS idx_emails_user_external ON emails(user_id, external_id);
CREATE INDEX IF NOT EXISTS idx_emails_category ON emails(category_id);
CREATE INDEX IF NOT EXISTS idx_emails_received ON emails(user_id, received_at DESC);
"#;

const ACCOUNT_COLUMNS: &str = "id, user_id, email_address, access_token, refresh_token, expires_at, \
     is_primary, sync_status, last_sync_at, created_at";

const CATEGORY_COLUMNS: &str = "id, user_id, name, description, color, email_count, created_at";

const EMAIL_COLUMNS: &str = "id, user_id, account_id, category_id, external_id, thread_id, \
     from_address, to_address, subject, body, snippet, summary, ai_category, confidence, archived, \
     unsubscribe_url, unsubscribe_attempted, received_at, imported_at";

/// Store backed by a single SQLite file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("SQLite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TriageError::Storage("Database connection lock poisoned".to_string()))
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let status_raw: String = row.get("sync_status")?;
    let sync_status = status_raw.parse::<SyncStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            status_raw.len(),
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )),
        )
    })?;

    Ok(Account {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        email_address: row.get("email_address")?,
        credentials: Credentials {
            access_token: row.get("access_token")?,
            refresh_token: row.get("refresh_token")?,
            expires_at: row.get("expires_at")?,
        },
        is_primary: row.get("is_primary")?,
        sync_status,
        last_sync_at: row.get("last_sync_at")?,
        created_at: row.get("created_at")?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        color: row.get("color")?,
        email_count: row.get("email_count")?,
        created_at: row.get("created_at")?,
    })
}

fn email_from_row(row: &Row<'_>) -> rusqlite::Result<Email> {
    let confidence: f64 = row.get("confidence")?;
    Ok(Email {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        account_id: row.get("account_id")?,
        category_id: row.get("category_id")?,
        external_id: row.get("external_id")?,
        thread_id: row.get("thread_id")?,
        from: row.get("from_address")?,
        to: row.get("to_address")?,
        subject: row.get("subject")?,
        body: row.get("body")?,
        snippet: row.get("snippet")?,
        summary: row.get("summary")?,
        ai_category: row.get("ai_category")?,
        confidence: confidence as f32,
        archived: row.get("archived")?,
        unsubscribe_url: row.get("unsubscribe_url")?,
        unsubscribe_attempted: row.get("unsubscribe_attempted")?,
        received_at: row.get("received_at")?,
        imported_at: row.get("imported_at")?,
    })
}

fn ensure_updated(changed: usize, kind: &str, id: &str) -> Result<()> {
    if changed == 0 {
        return Err(TriageError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO accounts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ACCOUNT_COLUMNS
            ),
            params![
                account.id,
                account.user_id,
                account.email_address,
                account.credentials.access_token,
                account.credentials.refresh_token,
                account.credentials.expires_at,
                account.is_primary,
                account.sync_status.as_str(),
                account.last_sync_at,
                account.created_at,
            ],
        )?;
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let conn = self.lock()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
                [account_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE user_id = ? ORDER BY is_primary DESC, created_at ASC",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([user_id], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    async fn update_sync_status(
        &self,
        account_id: &str,
        status: SyncStatus,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET sync_status = ?1, last_sync_at = COALESCE(?2, last_sync_at) WHERE id = ?3",
            params![status.as_str(), last_sync_at, account_id],
        )?;
        ensure_updated(changed, "account", account_id)
    }

    async fn update_credentials(&self, account_id: &str, credentials: &Credentials) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET access_token = ?1, refresh_token = ?2, expires_at = ?3 WHERE id = ?4",
            params![
                credentials.access_token,
                credentials.refresh_token,
                credentials.expires_at,
                account_id
            ],
        )?;
        ensure_updated(changed, "account", account_id)
    }

    async fn delete_account(&self, account_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM accounts WHERE id = ?", [account_id])?;
        Ok(deleted > 0)
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO categories ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                CATEGORY_COLUMNS
            ),
            params![
                category.id,
                category.user_id,
                category.name,
                category.description,
                category.color,
                category.email_count,
                category.created_at,
            ],
        )?;
        Ok(())
    }

    async fn get_category(&self, category_id: &str) -> Result<Option<Category>> {
        let conn = self.lock()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS),
                [category_id],
                category_from_row,
            )
            .optional()?;
        Ok(category)
    }

    async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE user_id = ? ORDER BY name COLLATE NOCASE ASC",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map([user_id], category_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    async fn update_category(&self, category: &Category) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE categories SET name = ?1, description = ?2, color = ?3 WHERE id = ?4",
            params![category.name, category.description, category.color, category.id],
        )?;
        ensure_updated(changed, "category", &category.id)
    }

    async fn delete_category(&self, category_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM categories WHERE id = ?", [category_id])?;
        Ok(deleted > 0)
    }

    async fn increment_email_count(&self, category_id: &str, delta: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE categories SET email_count = email_count + ?1 WHERE id = ?2",
            params![delta, category_id],
        )?;
        ensure_updated(changed, "category", category_id)
    }

    async fn set_email_count(&self, category_id: &str, count: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE categories SET email_count = ?1 WHERE id = ?2",
            params![count, category_id],
        )?;
        ensure_updated(changed, "category", category_id)
    }

    async fn count_emails_in_category(&self, category_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE category_id = ?",
            [category_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn find_email_by_external_id(
        &self,
        user_id: &str,
        external_id: &str,
    ) -> Result<Option<Email>> {
        let conn = self.lock()?;
        let email = conn
            .query_row(
                &format!(
                    "SELECT {} FROM emails WHERE user_id = ? AND external_id = ? LIMIT 1",
                    EMAIL_COLUMNS
                ),
                [user_id, external_id],
                email_from_row,
            )
            .optional()?;
        Ok(email)
    }

    async fn insert_email(&self, email: &Email) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO emails ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                EMAIL_COLUMNS
            ),
            params![
                email.id,
                email.user_id,
                email.account_id,
                email.category_id,
                email.external_id,
                email.thread_id,
                email.from,
                email.to,
                email.subject,
                email.body,
                email.snippet,
                email.summary,
                email.ai_category,
                email.confidence as f64,
                email.archived,
                email.unsubscribe_url,
                email.unsubscribe_attempted,
                email.received_at,
                email.imported_at,
            ],
        )?;
        Ok(())
    }

    async fn get_email(&self, email_id: &str) -> Result<Option<Email>> {
        let conn = self.lock()?;
        let email = conn
            .query_row(
                &format!("SELECT {} FROM emails WHERE id = ?", EMAIL_COLUMNS),
                [email_id],
                email_from_row,
            )
            .optional()?;
        Ok(email)
    }

    async fn get_emails(&self, user_id: &str, email_ids: &[String]) -> Result<Vec<Email>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM emails WHERE id = ? AND user_id = ?",
            EMAIL_COLUMNS
        ))?;

        let mut emails = Vec::with_capacity(email_ids.len());
        for id in email_ids {
            if let Some(email) = stmt
                .query_row([id.as_str(), user_id], email_from_row)
                .optional()?
            {
                emails.push(email);
            }
        }
        Ok(emails)
    }

    async fn list_emails(&self, query: &EmailQuery) -> Result<Vec<Email>> {
        let mut sql = format!("SELECT {} FROM emails WHERE user_id = ?", EMAIL_COLUMNS);
        let mut params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(query.user_id.clone())];

        if let Some(account_id) = &query.account_id {
            sql.push_str(" AND account_id = ?");
            params_vec.push(Box::new(account_id.clone()));
        }

        match &query.category {
            CategoryFilter::Any => {}
            CategoryFilter::Uncategorized => sql.push_str(" AND category_id IS NULL"),
            CategoryFilter::Category(id) => {
                sql.push_str(" AND category_id = ?");
                params_vec.push(Box::new(id.clone()));
            }
        }

        if let Some(archived) = query.archived {
            sql.push_str(" AND archived = ?");
            params_vec.push(Box::new(archived));
        }

        // LIMIT -1 means no limit in SQLite
        sql.push_str(" ORDER BY received_at DESC, id ASC LIMIT ? OFFSET ?");
        params_vec.push(Box::new(query.limit.map(|l| l as i64).unwrap_or(-1)));
        params_vec.push(Box::new(query.offset as i64));

        let conn = self.lock()?;
        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let emails = stmt
            .query_map(params_refs.as_slice(), email_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(emails)
    }

    async fn set_email_category(&self, email_id: &str, category_id: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE emails SET category_id = ?1 WHERE id = ?2",
            params![category_id, email_id],
        )?;
        ensure_updated(changed, "email", email_id)
    }

    async fn mark_archived(&self, email_ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE emails SET archived = true WHERE id = ?")?;
            for id in email_ids {
                updated += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    async fn mark_unsubscribe_attempted(&self, email_id: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE emails SET unsubscribe_attempted = true WHERE id = ?",
            [email_id],
        )?;
        ensure_updated(changed, "email", email_id)
    }

    async fn delete_emails(&self, email_ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM emails WHERE id = ?")?;
            for id in email_ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    async fn clear_category(&self, category_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let cleared = conn.execute(
            "UPDATE emails SET category_id = NULL WHERE category_id = ?",
            [category_id],
        )?;
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn account(id: &str, primary: bool) -> Account {
        Account {
            id: id.to_string(),
            user_id: "u1".to_string(),
            email_address: format!("{}@example.com", id),
            credentials: Credentials {
                access_token: Some("access".to_string()),
                refresh_token: Some("refresh".to_string()),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
            is_primary: primary,
            sync_status: SyncStatus::Pending,
            last_sync_at: None,
            created_at: Utc::now(),
        }
    }

    fn category(id: &str, name: &str) -> Category {
        Category {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            description: "desc".to_string(),
            color: "#000000".to_string(),
            email_count: 0,
            created_at: Utc::now(),
        }
    }

    fn email(id: &str, category_id: Option<&str>) -> Email {
        Email {
            id: id.to_string(),
            user_id: "u1".to_string(),
            account_id: "a1".to_string(),
            category_id: category_id.map(str::to_string),
            external_id: format!("ext-{}", id),
            thread_id: "t".to_string(),
            from: "from@x.test".to_string(),
            to: "me@example.com".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
            snippet: "Body".to_string(),
            summary: "Summary".to_string(),
            ai_category: "Work".to_string(),
            confidence: 0.5,
            archived: false,
            unsubscribe_url: Some("https://x.test/unsub".to_string()),
            unsubscribe_attempted: false,
            received_at: Utc::now(),
            imported_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_account_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("triage.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_account(&account("a1", true)).await.unwrap();
            store
                .update_sync_status("a1", SyncStatus::Completed, Some(Utc::now()))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.get_account("a1").await.unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Completed);
        assert!(loaded.is_primary);
        assert!(loaded.last_sync_at.is_some());
        assert_eq!(loaded.credentials.access_token.as_deref(), Some("access"));

        // status change without a timestamp keeps the previous one
        store
            .update_sync_status("a1", SyncStatus::Syncing, None)
            .await
            .unwrap();
        let loaded = store.get_account("a1").await.unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Syncing);
        assert!(loaded.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_counter_increment_and_recount() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_category(&category("c1", "Work")).await.unwrap();
        store.insert_email(&email("e1", Some("c1"))).await.unwrap();
        store.insert_email(&email("e2", Some("c1"))).await.unwrap();

        store.increment_email_count("c1", 1).await.unwrap();
        store.increment_email_count("c1", 1).await.unwrap();
        store.increment_email_count("c1", -1).await.unwrap();
        assert_eq!(store.get_category("c1").await.unwrap().unwrap().email_count, 1);

        let live = store.count_emails_in_category("c1").await.unwrap();
        store.set_email_count("c1", live).await.unwrap();
        assert_eq!(store.get_category("c1").await.unwrap().unwrap().email_count, 2);
    }

    #[tokio::test]
    async fn test_email_fields_survive_storage() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_email(&email("e1", None)).await.unwrap();

        let found = store
            .find_email_by_external_id("u1", "ext-e1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "e1");
        assert!(found.category_id.is_none());
        assert_eq!(found.unsubscribe_url.as_deref(), Some("https://x.test/unsub"));
        assert!((found.confidence - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_clear_category_and_bulk_ops() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_email(&email("e1", Some("c1"))).await.unwrap();
        store.insert_email(&email("e2", Some("c1"))).await.unwrap();
        store.insert_email(&email("e3", None)).await.unwrap();

        assert_eq!(store.clear_category("c1").await.unwrap(), 2);
        let uncategorized = store
            .list_emails(&EmailQuery::for_user("u1").category(CategoryFilter::Uncategorized))
            .await
            .unwrap();
        assert_eq!(uncategorized.len(), 3);

        let ids = vec!["e1".to_string(), "e2".to_string(), "missing".to_string()];
        assert_eq!(store.mark_archived(&ids).await.unwrap(), 2);
        assert_eq!(store.delete_emails(&ids).await.unwrap(), 2);

        let remaining = store.list_emails(&EmailQuery::for_user("u1")).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "e3");
    }

    #[tokio::test]
    async fn test_update_missing_email_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.mark_unsubscribe_attempted("nope").await;
        assert!(matches!(result, Err(TriageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_accounts_listed_primary_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_account(&account("a2", false)).await.unwrap();
        store.insert_account(&account("a1", true)).await.unwrap();

        let accounts = store.list_accounts("u1").await.unwrap();
        assert_eq!(accounts[0].id, "a1");
        assert_eq!(accounts.len(), 2);
    }
}
