//! Core domain model for JobWatch: canonical job records, the content
//! fingerprint used as the dedup key, and the preference scorer.

pub mod fingerprint;
pub mod score;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use fingerprint::fingerprint;
pub use score::{score, LocationPreferences, ScoreBreakdown, ScoringConfig};

pub const CRATE_NAME: &str = "jobwatch-core";

/// Upper bound on stored description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 20_000;

/// Canonical shape every source adapter normalizes into.
///
/// `title`, `company`, `location` and `url` are non-empty by construction;
/// fields the source omitted carry explicit defaults instead of nulls so the
/// scorer never sees missing data it has to guess about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedJob {
    /// Adapter identifier, e.g. `"greenhouse"`.
    pub source_id: String,
    /// Source's native job id; empty when the source has none.
    pub external_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    /// Original description (HTML preserved for display), truncated to
    /// [`MAX_DESCRIPTION_CHARS`].
    pub description: String,
    /// Canonical apply/posting URL.
    pub url: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub remote: bool,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    /// ISO 4217 code, `"USD"` unless the source says otherwise.
    pub currency: String,
}

/// Notification lifecycle of a persisted job.
///
/// Transitions are monotonic: a `*Sent` state never regresses to a pending
/// one. That is the at-most-once delivery invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    None,
    ImmediateSent,
    DigestPending,
    DigestSent,
}

impl AlertState {
    pub fn is_sent(self) -> bool {
        matches!(self, AlertState::ImmediateSent | AlertState::DigestSent)
    }

    fn rank(self) -> u8 {
        match self {
            AlertState::None => 0,
            AlertState::DigestPending => 1,
            AlertState::ImmediateSent => 2,
            AlertState::DigestSent => 3,
        }
    }

    /// Monotonic merge used by store upserts: once sent, always sent, and a
    /// pending state is never demoted back to `None`.
    pub fn merge(current: Self, incoming: Self) -> Self {
        if current.is_sent() || incoming.rank() < current.rank() {
            current
        } else {
            incoming
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::None => "none",
            AlertState::ImmediateSent => "immediate_sent",
            AlertState::DigestPending => "digest_pending",
            AlertState::DigestSent => "digest_sent",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "none" => Some(AlertState::None),
            "immediate_sent" => Some(AlertState::ImmediateSent),
            "digest_pending" => Some(AlertState::DigestPending),
            "digest_sent" => Some(AlertState::DigestSent),
            _ => None,
        }
    }
}

/// Persisted job: the normalized payload plus dedup key, score and
/// sighting/alert lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Content fingerprint, primary dedup key.
    pub hash: String,
    pub job: NormalizedJob,
    /// Match score in `[0.0, 1.0]`, fixed at first-seen time unless
    /// rescoring is explicitly enabled.
    pub score: f64,
    /// Human-readable contributing signals, descending weight order.
    pub score_reasons: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub times_seen: u32,
    pub alert_state: AlertState,
}

impl JobRecord {
    /// Build the record for a hash seen for the first time.
    pub fn first_seen(
        job: NormalizedJob,
        hash: String,
        breakdown: ScoreBreakdown,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            hash,
            job,
            score: breakdown.score,
            score_reasons: breakdown.reasons,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
            times_seen: 1,
            alert_state: AlertState::None,
        }
    }

    /// Record another sighting of the same hash.
    pub fn mark_seen(&mut self, seen_at: DateTime<Utc>) {
        self.last_seen_at = seen_at;
        self.times_seen = self.times_seen.saturating_add(1);
    }
}
