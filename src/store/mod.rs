//! Durable scheduled-call collection.
//!
//! The whole collection is one JSON array under [`SCHEDULED_CALLS_KEY`].
//! Mutations are read-modify-write transactions executed on the database
//! thread, so no reader ever sees a partial write. Every committed change
//! bumps a revision counter that in-process caches subscribe to.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::watch;

use crate::{
    db::{Database, ItemWrite},
    error::{EngineError, EngineResult},
    models::ScheduledCall,
};

pub const SCHEDULED_CALLS_KEY: &str = "scheduledCalls";

fn decode_calls(raw: Option<&str>) -> anyhow::Result<Vec<ScheduledCall>> {
    match raw {
        None => Ok(Vec::new()),
        Some(json) if json.trim().is_empty() => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json).context("failed to decode scheduled calls"),
    }
}

fn encode_calls(calls: &[ScheduledCall]) -> anyhow::Result<String> {
    serde_json::to_string(calls).context("failed to encode scheduled calls")
}

#[derive(Clone)]
pub struct CallStore {
    db: Database,
    revision: Arc<watch::Sender<u64>>,
}

impl CallStore {
    pub fn new(db: Database) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            db,
            revision: Arc::new(revision),
        }
    }

    /// Receiver that changes whenever this process commits a write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn list(&self) -> EngineResult<Vec<ScheduledCall>> {
        let raw = self.db.get_item(SCHEDULED_CALLS_KEY).await?;
        Ok(decode_calls(raw.as_deref())?)
    }

    pub async fn get(&self, call_id: &str) -> EngineResult<Option<ScheduledCall>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|call| call.id == call_id))
    }

    pub async fn replace_all(&self, calls: Vec<ScheduledCall>) -> EngineResult<()> {
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = calls.iter().find(|call| !seen.insert(call.id.as_str())) {
            return Err(EngineError::Validation(format!(
                "duplicate call id {}",
                duplicate.id
            )));
        }

        self.modify(move |stored| {
            *stored = calls;
            Ok(())
        })
        .await
    }

    pub async fn add(&self, call: ScheduledCall) -> EngineResult<()> {
        self.modify(move |calls| {
            if calls.iter().any(|existing| existing.id == call.id) {
                return Err(EngineError::Validation(format!(
                    "call {} already exists",
                    call.id
                )));
            }
            calls.push(call);
            Ok(())
        })
        .await
    }

    /// Replaces the record with the same id. Returns `false` (and writes
    /// nothing) when no such record exists.
    pub async fn update(&self, call: ScheduledCall) -> EngineResult<bool> {
        self.modify(move |calls| {
            match calls.iter_mut().find(|existing| existing.id == call.id) {
                Some(existing) => {
                    *existing = call;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await
    }

    pub async fn set_active(
        &self,
        call_id: &str,
        is_active: bool,
    ) -> EngineResult<Option<ScheduledCall>> {
        let call_id = call_id.to_string();
        self.modify(move |calls| {
            Ok(calls
                .iter_mut()
                .find(|existing| existing.id == call_id)
                .map(|existing| {
                    existing.is_active = is_active;
                    existing.clone()
                }))
        })
        .await
    }

    /// Stamps `lastProcessed` on a record. Returns the updated record, or
    /// `None` when it was deleted in the meantime.
    pub async fn mark_processed(
        &self,
        call_id: &str,
        occurrence: DateTime<Utc>,
    ) -> EngineResult<Option<ScheduledCall>> {
        let call_id = call_id.to_string();
        self.modify(move |calls| {
            Ok(calls
                .iter_mut()
                .find(|existing| existing.id == call_id)
                .map(|existing| {
                    existing.last_processed = Some(occurrence);
                    existing.clone()
                }))
        })
        .await
    }

    pub async fn remove(&self, call_id: &str) -> EngineResult<bool> {
        let call_id = call_id.to_string();
        self.modify(move |calls| {
            let before = calls.len();
            calls.retain(|existing| existing.id != call_id);
            Ok(calls.len() != before)
        })
        .await
    }

    pub async fn clear(&self) -> EngineResult<()> {
        self.db.remove_item(SCHEDULED_CALLS_KEY).await?;
        self.bump_revision();
        Ok(())
    }

    async fn modify<F, T>(&self, mutate: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Vec<ScheduledCall>) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (changed, outcome) = self
            .db
            .modify_item(SCHEDULED_CALLS_KEY, move |raw| {
                let mut calls = decode_calls(raw.as_deref())?;
                let before = calls.clone();
                match mutate(&mut calls) {
                    Ok(value) if calls != before => {
                        Ok((ItemWrite::Set(encode_calls(&calls)?), (true, Ok(value))))
                    }
                    Ok(value) => Ok((ItemWrite::Keep, (false, Ok(value)))),
                    Err(err) => Ok((ItemWrite::Keep, (false, Err(err)))),
                }
            })
            .await?;

        if changed {
            self.bump_revision();
        }
        outcome
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
        debug!("scheduled calls revision {}", *self.revision.borrow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{call_at, temp_database};
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let (_dir, db) = temp_database();
        let store = CallStore::new(db);
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_all_round_trips_to_the_second() {
        let (_dir, db) = temp_database();
        let store = CallStore::new(db);
        let base = Utc.with_ymd_and_hms(2025, 4, 10, 7, 15, 42).unwrap();

        let mut second = call_at("2", base + Duration::minutes(5));
        second.repeat_days.insert(crate::models::RepeatDay::Tuesday);
        second.last_processed = Some(base);
        let calls = vec![call_at("1", base), second];

        store.replace_all(calls.clone()).await.unwrap();
        assert_eq!(store.list().await.unwrap(), calls);
    }

    #[tokio::test]
    async fn replace_all_rejects_duplicate_ids() {
        let (_dir, db) = temp_database();
        let store = CallStore::new(db);
        let now = Utc::now();

        let result = store
            .replace_all(vec![call_at("1", now), call_at("1", now)])
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn add_update_remove_clear() {
        let (_dir, db) = temp_database();
        let store = CallStore::new(db);
        let now = Utc::now();

        store.add(call_at("1", now)).await.unwrap();
        store.add(call_at("2", now)).await.unwrap();
        assert!(matches!(
            store.add(call_at("1", now)).await,
            Err(EngineError::Validation(_))
        ));

        let mut edited = call_at("1", now);
        edited.name = "Edited".into();
        assert!(store.update(edited).await.unwrap());
        assert!(!store.update(call_at("ghost", now)).await.unwrap());
        assert_eq!(store.get("1").await.unwrap().unwrap().name, "Edited");
        assert_eq!(store.list().await.unwrap().len(), 2);

        assert!(store.remove("2").await.unwrap());
        assert!(!store.remove("2").await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn toggle_and_mark_processed() {
        let (_dir, db) = temp_database();
        let store = CallStore::new(db);
        let now = Utc::now();
        store.add(call_at("1", now)).await.unwrap();

        let toggled = store.set_active("1", false).await.unwrap().unwrap();
        assert!(!toggled.is_active);
        assert!(store.set_active("ghost", true).await.unwrap().is_none());

        let marked = store.mark_processed("1", now).await.unwrap().unwrap();
        assert_eq!(marked.last_processed, Some(now));
    }

    #[tokio::test]
    async fn writes_bump_the_revision() {
        let (_dir, db) = temp_database();
        let store = CallStore::new(db);
        let mut revisions = store.subscribe();
        let start = *revisions.borrow_and_update();

        store.add(call_at("1", Utc::now())).await.unwrap();
        assert!(revisions.has_changed().unwrap());
        assert_ne!(*revisions.borrow_and_update(), start);

        // No-op update leaves the revision alone.
        store.update(call_at("ghost", Utc::now())).await.unwrap();
        assert!(!revisions.has_changed().unwrap());
    }

    #[tokio::test]
    async fn corrupt_blob_is_a_storage_error() {
        let (_dir, db) = temp_database();
        db.set_item(SCHEDULED_CALLS_KEY, "{not json".into())
            .await
            .unwrap();
        let store = CallStore::new(db);

        assert!(matches!(store.list().await, Err(EngineError::Storage(_))));
        assert!(matches!(
            store.add(call_at("1", Utc::now())).await,
            Err(EngineError::Storage(_))
        ));
    }
}
