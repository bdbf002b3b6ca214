//! Persistence boundary for JobWatch plus shared HTTP fetch utilities.
//!
//! The store is the only shared mutable resource in a cycle; everything
//! upstream of it is side-effect-free. Upserts are atomic per hash and the
//! alert state merges monotonically, so two sources discovering the same job
//! concurrently cannot double-count sightings or re-arm an alert.

pub mod http;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use jobwatch_core::{AlertState, JobRecord};
use thiserror::Error;
use tokio::sync::Mutex;

pub use http::{BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use sqlite::SqliteStore;

pub const CRATE_NAME: &str = "jobwatch-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record for hash {hash}: {detail}")]
    Corrupt { hash: String, detail: String },
}

/// Persistence contract consumed by the ingestion coordinator.
#[async_trait]
pub trait Store: Send + Sync {
    async fn lookup_by_hash(&self, hash: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Insert or update the record keyed on its hash, atomically with
    /// respect to concurrent callers on the same hash. `first_seen_at` is
    /// preserved from the existing row and `alert_state` merges via
    /// [`AlertState::merge`].
    async fn upsert(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Advance the alert state for a hash; sent states are never demoted.
    async fn set_alert_state(&self, hash: &str, state: AlertState) -> Result<(), StoreError>;

    /// Records waiting for the next digest batch, best score first.
    async fn query_pending_digest(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn lookup_by_hash(&self, hash: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.lock().await.get(hash).cloned())
    }

    async fn upsert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&record.hash) {
            Some(existing) => {
                let first_seen_at = existing.first_seen_at;
                let merged_state = AlertState::merge(existing.alert_state, record.alert_state);
                *existing = record.clone();
                existing.first_seen_at = first_seen_at;
                existing.alert_state = merged_state;
            }
            None => {
                records.insert(record.hash.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn set_alert_state(&self, hash: &str, state: AlertState) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get_mut(hash) {
            existing.alert_state = AlertState::merge(existing.alert_state, state);
        }
        Ok(())
    }

    async fn query_pending_digest(&self) -> Result<Vec<JobRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut pending: Vec<JobRecord> = records
            .values()
            .filter(|r| r.alert_state == AlertState::DigestPending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jobwatch_core::{NormalizedJob, ScoreBreakdown};

    fn record(hash: &str, score: f64) -> JobRecord {
        let seen_at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap();
        JobRecord::first_seen(
            NormalizedJob {
                source_id: "greenhouse".to_string(),
                external_id: String::new(),
                title: "Engineer".to_string(),
                company: "Acme".to_string(),
                location: "Remote".to_string(),
                description: "desc".to_string(),
                url: "https://x/1".to_string(),
                posted_at: None,
                remote: true,
                salary_min: None,
                salary_max: None,
                currency: "USD".to_string(),
            },
            hash.to_string(),
            ScoreBreakdown {
                score,
                reasons: vec!["reason".to_string()],
            },
            seen_at,
        )
    }

    #[tokio::test]
    async fn upsert_then_lookup_round_trips() {
        let store = MemoryStore::new();
        let rec = record("h1", 0.8);
        store.upsert(&rec).await.unwrap();
        let found = store.lookup_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(found, rec);
        assert!(store.lookup_by_hash("h2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_preserves_first_seen_and_sent_state() {
        let store = MemoryStore::new();
        let mut rec = record("h1", 0.8);
        store.upsert(&rec).await.unwrap();
        store
            .set_alert_state("h1", AlertState::ImmediateSent)
            .await
            .unwrap();

        let original_first_seen = rec.first_seen_at;
        rec.mark_seen(rec.first_seen_at + chrono::Duration::days(1));
        rec.first_seen_at = rec.last_seen_at;
        rec.alert_state = AlertState::None;
        store.upsert(&rec).await.unwrap();

        let found = store.lookup_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(found.first_seen_at, original_first_seen);
        assert_eq!(found.alert_state, AlertState::ImmediateSent);
        assert_eq!(found.times_seen, 2);
    }

    #[tokio::test]
    async fn pending_digest_is_ordered_by_score() {
        let store = MemoryStore::new();
        for (hash, score) in [("a", 0.71), ("b", 0.85), ("c", 0.75)] {
            store.upsert(&record(hash, score)).await.unwrap();
            store
                .set_alert_state(hash, AlertState::DigestPending)
                .await
                .unwrap();
        }
        store.upsert(&record("d", 0.95)).await.unwrap();

        let pending = store.query_pending_digest().await.unwrap();
        let hashes: Vec<&str> = pending.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn set_alert_state_ignores_unknown_hash() {
        let store = MemoryStore::new();
        store
            .set_alert_state("missing", AlertState::DigestPending)
            .await
            .unwrap();
        assert_eq!(store.len().await, 0);
    }
}
