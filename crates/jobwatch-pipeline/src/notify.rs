//! Alert routing and delivery.
//!
//! Routing is driven entirely by the persisted [`AlertState`]: a record is
//! only advanced to a sent state after its dispatch succeeded, so a failed
//! delivery is retried on the next cycle and a delivered one is never
//! repeated.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use jobwatch_core::{AlertState, JobRecord, ScoringConfig};
use jobwatch_store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

/// Delivery channel for alerts. Implementations must be idempotent-friendly:
/// the router may call them again for the same record if a prior attempt
/// failed before the state update landed.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send_immediate(&self, record: &JobRecord) -> Result<(), DispatchError>;

    async fn enqueue_digest(&self, record: &JobRecord) -> Result<(), DispatchError>;
}

/// What [`route`] decided for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Sent immediately and marked `immediate_sent`.
    Immediate,
    /// Newly queued for the next digest (`digest_pending`).
    Digest,
    /// Was already queued by an earlier cycle; nothing changed.
    AlreadyQueued,
    /// Score below the digest floor; no alert.
    Suppressed,
    /// A sent state was already recorded for this job.
    AlreadyHandled,
    /// Immediate dispatch failed; state left unadvanced for retry.
    DispatchFailed,
}

/// Route one record through the alert tiers.
///
/// Sent states are terminal here; only `none` and `digest_pending` records
/// can move. The store's own merge rules back this up, so a concurrent
/// writer cannot un-send an alert either.
pub async fn route(
    record: &JobRecord,
    cfg: &ScoringConfig,
    dispatcher: &dyn Dispatcher,
    store: &dyn Store,
) -> Result<AlertDecision, StoreError> {
    if record.alert_state.is_sent() {
        return Ok(AlertDecision::AlreadyHandled);
    }
    if record.score >= cfg.immediate_alert_threshold {
        return match dispatcher.send_immediate(record).await {
            Ok(()) => {
                store
                    .set_alert_state(&record.hash, AlertState::ImmediateSent)
                    .await?;
                info!(hash = %record.hash, title = %record.job.title, score = record.score,
                    "immediate alert sent");
                Ok(AlertDecision::Immediate)
            }
            Err(err) => {
                warn!(hash = %record.hash, error = %err,
                    "immediate dispatch failed, will retry next cycle");
                Ok(AlertDecision::DispatchFailed)
            }
        };
    }
    if record.score >= cfg.digest_min_score {
        if record.alert_state == AlertState::DigestPending {
            return Ok(AlertDecision::AlreadyQueued);
        }
        store
            .set_alert_state(&record.hash, AlertState::DigestPending)
            .await?;
        return Ok(AlertDecision::Digest);
    }
    Ok(AlertDecision::Suppressed)
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DigestReport {
    pub sent: usize,
    pub failed: usize,
}

/// Drain everything marked `digest_pending`, best score first. Each record
/// is marked `digest_sent` only after its own enqueue succeeded; a failed
/// one stays pending for the next flush.
pub async fn flush_digest(
    store: &dyn Store,
    dispatcher: &dyn Dispatcher,
) -> Result<DigestReport, StoreError> {
    let pending = store.query_pending_digest().await?;
    let mut report = DigestReport::default();
    for record in &pending {
        match dispatcher.enqueue_digest(record).await {
            Ok(()) => {
                store
                    .set_alert_state(&record.hash, AlertState::DigestSent)
                    .await?;
                report.sent += 1;
            }
            Err(err) => {
                warn!(hash = %record.hash, error = %err,
                    "digest dispatch failed, record stays pending");
                report.failed += 1;
            }
        }
    }
    if report.sent > 0 {
        info!(sent = report.sent, failed = report.failed, "digest flushed");
    }
    Ok(report)
}

/// Posts alerts to a Slack incoming webhook.
pub struct SlackDispatcher {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackDispatcher {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }

    fn summary_line(record: &JobRecord) -> String {
        format!(
            "*{}* at {} ({}), score {:.2}\n{}\n_{}_",
            record.job.title,
            record.job.company,
            record.job.location,
            record.score,
            record.job.url,
            record.score_reasons.join("; "),
        )
    }

    async fn post_text(&self, text: String) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!(
                "webhook returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for SlackDispatcher {
    async fn send_immediate(&self, record: &JobRecord) -> Result<(), DispatchError> {
        self.post_text(format!(
            ":rotating_light: New match\n{}",
            Self::summary_line(record)
        ))
        .await
    }

    async fn enqueue_digest(&self, record: &JobRecord) -> Result<(), DispatchError> {
        self.post_text(format!(":newspaper: Digest\n{}", Self::summary_line(record)))
            .await
    }
}

/// Fallback channel when no webhook is configured: alerts land in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send_immediate(&self, record: &JobRecord) -> Result<(), DispatchError> {
        info!(title = %record.job.title, company = %record.job.company,
            url = %record.job.url, score = record.score, "ALERT");
        Ok(())
    }

    async fn enqueue_digest(&self, record: &JobRecord) -> Result<(), DispatchError> {
        info!(title = %record.job.title, company = %record.job.company,
            url = %record.job.url, score = record.score, "DIGEST");
        Ok(())
    }
}
