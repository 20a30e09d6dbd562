pub mod kv_store;
pub mod occurrences;
pub mod pending_notifications;
