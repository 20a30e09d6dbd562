use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::{
    db::{helpers::parse_datetime, Database},
    models::{NotificationContent, NotificationTrigger, PendingNotification},
};

// `trigger_ms` orders and selects rows; `trigger_at` keeps the exact instant.
fn row_to_pending(row: &Row) -> Result<PendingNotification> {
    let trigger_at: String = row.get("trigger_at")?;
    let content: String = row.get("content")?;

    Ok(PendingNotification {
        identifier: row.get("id")?,
        content: serde_json::from_str::<NotificationContent>(&content)
            .context("failed to decode notification content")?,
        trigger: NotificationTrigger::At(parse_datetime(&trigger_at, "trigger_at")?),
    })
}

fn query_pending(conn: &Connection, sql: &str, bind: &[&dyn rusqlite::ToSql]) -> Result<Vec<PendingNotification>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(bind)?;
    let mut pending = Vec::new();
    while let Some(row) = rows.next()? {
        pending.push(row_to_pending(row)?);
    }
    Ok(pending)
}

impl Database {
    /// Persists a future alert. Immediate alerts are never stored; they are
    /// delivered on the spot by the notification center.
    pub async fn insert_pending_notification(
        &self,
        notification: &PendingNotification,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let record = notification.clone();
        let trigger_at = record.trigger.instant().unwrap_or(created_at);
        let content =
            serde_json::to_string(&record.content).context("failed to encode notification content")?;

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pending_notifications (id, call_id, trigger_ms, trigger_at, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.identifier,
                    record.content.data.call_id,
                    trigger_at.timestamp_millis(),
                    trigger_at.to_rfc3339(),
                    content,
                    created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert pending notification")?;
            Ok(())
        })
        .await
    }

    pub async fn list_pending_notifications(&self) -> Result<Vec<PendingNotification>> {
        self.execute(|conn| {
            query_pending(
                conn,
                "SELECT id, trigger_at, content FROM pending_notifications
                 ORDER BY trigger_ms ASC, id ASC",
                &[],
            )
        })
        .await
    }

    pub async fn delete_pending_notification(&self, identifier: &str) -> Result<bool> {
        let identifier = identifier.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM pending_notifications WHERE id = ?1",
                    params![identifier],
                )
                .with_context(|| "failed to delete pending notification")?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn clear_pending_notifications(&self) -> Result<usize> {
        self.execute(|conn| {
            let removed = conn
                .execute("DELETE FROM pending_notifications", [])
                .with_context(|| "failed to clear pending notifications")?;
            Ok(removed)
        })
        .await
    }

    /// Removes and returns every alert whose trigger is at or before `now`,
    /// oldest first.
    pub async fn take_due_notifications(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingNotification>> {
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open delivery transaction")?;
            let now_ms = now.timestamp_millis();
            let due = query_pending(
                &tx,
                "SELECT id, trigger_at, content FROM pending_notifications
                 WHERE trigger_ms <= ?1
                 ORDER BY trigger_ms ASC, id ASC",
                &[&now_ms],
            )?;
            tx.execute(
                "DELETE FROM pending_notifications WHERE trigger_ms <= ?1",
                params![now_ms],
            )?;
            tx.commit().context("failed to commit delivery transaction")?;
            Ok(due)
        })
        .await
    }
}
