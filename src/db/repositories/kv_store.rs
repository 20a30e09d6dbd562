use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;

/// Outcome of a read-modify-write on a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemWrite {
    Keep,
    Set(String),
    Remove,
}

fn read_item(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .with_context(|| format!("failed to read key '{key}'"))
}

fn apply_write(conn: &Connection, key: &str, write: ItemWrite) -> Result<()> {
    match write {
        ItemWrite::Keep => {}
        ItemWrite::Set(value) => {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write key '{key}'"))?;
        }
        ItemWrite::Remove => {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
                .with_context(|| format!("failed to remove key '{key}'"))?;
        }
    }
    Ok(())
}

impl Database {
    pub async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| read_item(conn, &key)).await
    }

    pub async fn set_item(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| apply_write(conn, &key, ItemWrite::Set(value)))
            .await
    }

    pub async fn remove_item(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| apply_write(conn, &key, ItemWrite::Remove))
            .await
    }

    /// Reads the current value, lets `modify` decide the write, and applies it
    /// in one transaction on the DB thread. No other task can observe or
    /// interleave with the intermediate state.
    pub async fn modify_item<F, T>(&self, key: &str, modify: F) -> Result<T>
    where
        F: FnOnce(Option<String>) -> Result<(ItemWrite, T)> + Send + 'static,
        T: Send + 'static,
    {
        let key = key.to_string();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open key-value transaction")?;
            let current = read_item(&tx, &key)?;
            let (write, value) = modify(current)?;
            apply_write(&tx, &key, write)?;
            tx.commit().context("failed to commit key-value write")?;
            Ok(value)
        })
        .await
    }
}
