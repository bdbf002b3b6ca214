//! Multi-factor preference scorer.
//!
//! Additive model over independent signals, each capped so the total stays
//! in `[0, 1]`. Hard disqualifiers (company denylist, location when remote
//! work is disallowed) force the score to zero regardless of everything
//! else. Deterministic: the same `(job, config, as_of)` always produces the
//! same score and reasons; the clock never gets read internally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::normalize_fragment;
use crate::NormalizedJob;

const TITLE_WEIGHT: f64 = 0.40;
const KEYWORD_WEIGHT: f64 = 0.25;
const LOCATION_WEIGHT: f64 = 0.20;
const RECENCY_WEIGHT: f64 = 0.15;
const SALARY_PENALTY: f64 = 0.15;
const BLOCKLIST_PENALTY: f64 = 0.25;
const RECENCY_HORIZON_DAYS: i64 = 30;

/// Immutable scoring snapshot injected per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub title_allowlist: Vec<String>,
    #[serde(default)]
    pub title_blocklist: Vec<String>,
    #[serde(default)]
    pub keywords_boost: Vec<String>,
    #[serde(default)]
    pub company_denylist: Vec<String>,
    #[serde(default)]
    pub location_preferences: LocationPreferences,
    #[serde(default)]
    pub salary_floor_usd: Option<i64>,
    /// Score at or above this dispatches an immediate alert.
    #[serde(default = "default_immediate_threshold")]
    pub immediate_alert_threshold: f64,
    /// Score at or above this (and below the immediate threshold) joins the
    /// next digest batch.
    #[serde(default = "default_digest_min_score")]
    pub digest_min_score: f64,
    /// When false, a non-matching location costs points instead of zeroing
    /// the score.
    #[serde(default = "default_true")]
    pub location_hard_filter: bool,
    /// When true, a blocklisted title zeroes the score instead of applying
    /// a penalty.
    #[serde(default)]
    pub title_blocklist_disqualifies: bool,
    /// Re-run the scorer when a known hash is seen again. Off by default:
    /// scores are fixed at first sight to avoid flapping across thresholds.
    #[serde(default)]
    pub rescore_existing: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            title_allowlist: Vec::new(),
            title_blocklist: Vec::new(),
            keywords_boost: Vec::new(),
            company_denylist: Vec::new(),
            location_preferences: LocationPreferences::default(),
            salary_floor_usd: None,
            immediate_alert_threshold: default_immediate_threshold(),
            digest_min_score: default_digest_min_score(),
            location_hard_filter: true,
            title_blocklist_disqualifies: false,
            rescore_existing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationPreferences {
    #[serde(default = "default_true")]
    pub allow_remote: bool,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl Default for LocationPreferences {
    fn default() -> Self {
        Self {
            allow_remote: true,
            cities: Vec::new(),
            states: Vec::new(),
        }
    }
}

fn default_immediate_threshold() -> f64 {
    0.9
}

fn default_digest_min_score() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

/// Scorer output: final score plus one human-readable reason per
/// contributing signal, descending weight order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub reasons: Vec<String>,
}

impl ScoreBreakdown {
    fn disqualified(reason: String) -> Self {
        Self {
            score: 0.0,
            reasons: vec![reason],
        }
    }
}

/// Score a normalized job against the preference snapshot.
///
/// `as_of` anchors the recency adjustment; callers pass the cycle start so
/// repeated scoring within one cycle stays identical.
pub fn score(job: &NormalizedJob, cfg: &ScoringConfig, as_of: DateTime<Utc>) -> ScoreBreakdown {
    let company = normalize_fragment(&job.company);
    let title = normalize_fragment(&job.title);
    let location = normalize_fragment(&job.location);

    // Denylist always wins, before any other signal is even looked at.
    for entry in &cfg.company_denylist {
        if company == normalize_fragment(entry) {
            return ScoreBreakdown::disqualified(format!("company denylisted: {entry}"));
        }
    }

    let location_matched = location_matches(job, &location, &cfg.location_preferences);
    if !cfg.location_preferences.allow_remote && !location_matched && cfg.location_hard_filter {
        return ScoreBreakdown::disqualified(format!(
            "location outside preferences: {}",
            job.location
        ));
    }

    let blocklist_hit = cfg
        .title_blocklist
        .iter()
        .find(|entry| title.contains(&normalize_fragment(entry)));
    if let (Some(entry), true) = (blocklist_hit, cfg.title_blocklist_disqualifies) {
        return ScoreBreakdown::disqualified(format!("title blocklisted: {entry}"));
    }

    let mut total = 0.0;
    let mut reasons = Vec::new();

    // Title allowlist: best substring/token-overlap fraction across entries.
    // An empty allowlist is non-discriminating and awards the full weight.
    if cfg.title_allowlist.is_empty() {
        total += TITLE_WEIGHT;
        reasons.push("no title filter configured".to_string());
    } else {
        let mut best = 0.0f64;
        let mut best_entry = None;
        for entry in &cfg.title_allowlist {
            let fraction = title_match_fraction(&title, &normalize_fragment(entry));
            if fraction > best {
                best = fraction;
                best_entry = Some(entry);
            }
        }
        total += TITLE_WEIGHT * best;
        if let Some(entry) = best_entry {
            reasons.push(format!("title matches \"{entry}\""));
        }
    }

    // Keyword boosts over title + description text.
    if cfg.keywords_boost.is_empty() {
        total += KEYWORD_WEIGHT;
        reasons.push("no keyword boosts configured".to_string());
    } else {
        let haystack = format!("{title} {}", normalize_fragment(&job.description));
        let hits: Vec<&String> = cfg
            .keywords_boost
            .iter()
            .filter(|kw| haystack.contains(&normalize_fragment(kw)))
            .collect();
        if !hits.is_empty() {
            total += KEYWORD_WEIGHT * hits.len() as f64 / cfg.keywords_boost.len() as f64;
            let joined = hits
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            reasons.push(format!("keywords matched: {joined}"));
        }
    }

    if location_matched {
        total += LOCATION_WEIGHT;
        if job.remote && cfg.location_preferences.allow_remote {
            reasons.push("remote role accepted".to_string());
        } else {
            reasons.push(format!("location preferred: {}", job.location));
        }
    }

    if let Some(entry) = blocklist_hit {
        total -= BLOCKLIST_PENALTY;
        reasons.push(format!("title blocklist penalty: {entry}"));
    }

    // Salary is penalty-only: postings omit it too often for a bonus or a
    // hard cut to be reliable.
    if let Some(floor) = cfg.salary_floor_usd {
        if job.currency.eq_ignore_ascii_case("usd") {
            if let Some(bound) = job.salary_max.or(job.salary_min) {
                if bound < floor {
                    total -= SALARY_PENALTY;
                    reasons.push(format!("salary below floor: {bound} < {floor}"));
                }
            }
        }
    }

    match job.posted_at {
        Some(posted_at) => {
            let days = (as_of - posted_at).num_days().max(0);
            let factor = (RECENCY_HORIZON_DAYS - days).max(0) as f64 / RECENCY_HORIZON_DAYS as f64;
            if factor > 0.0 {
                total += RECENCY_WEIGHT * factor;
                reasons.push(format!("posted {days} days ago"));
            }
        }
        None => {
            total += RECENCY_WEIGHT * 0.5;
            reasons.push("posting age unknown".to_string());
        }
    }

    ScoreBreakdown {
        score: total.clamp(0.0, 1.0),
        reasons,
    }
}

fn location_matches(job: &NormalizedJob, location: &str, prefs: &LocationPreferences) -> bool {
    if job.remote && prefs.allow_remote {
        return true;
    }
    let city_hit = prefs
        .cities
        .iter()
        .any(|c| location.contains(&normalize_fragment(c)));
    let state_hit = prefs
        .states
        .iter()
        .any(|s| location.contains(&normalize_fragment(s)));
    if city_hit || state_hit {
        return true;
    }
    // No configured geography at all: treat any location as acceptable.
    prefs.cities.is_empty() && prefs.states.is_empty() && prefs.allow_remote
}

fn title_match_fraction(title: &str, entry: &str) -> f64 {
    if entry.is_empty() {
        return 0.0;
    }
    if title.contains(entry) {
        return 1.0;
    }
    let title_tokens: Vec<&str> = title.split(' ').collect();
    let entry_tokens: Vec<&str> = entry.split(' ').collect();
    let overlap = entry_tokens
        .iter()
        .filter(|t| title_tokens.contains(t))
        .count();
    overlap as f64 / entry_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().unwrap()
    }

    fn rust_job() -> NormalizedJob {
        NormalizedJob {
            source_id: "lever".to_string(),
            external_id: "p-1".to_string(),
            title: "Senior Rust Engineer".to_string(),
            company: "Globex".to_string(),
            location: "Portland, OR".to_string(),
            description: "Distributed systems work in Rust and Tokio".to_string(),
            url: "https://jobs.example/p-1".to_string(),
            posted_at: Some(as_of() - chrono::Duration::days(1)),
            remote: false,
            salary_min: Some(150_000),
            salary_max: Some(190_000),
            currency: "USD".to_string(),
        }
    }

    fn matching_config() -> ScoringConfig {
        ScoringConfig {
            title_allowlist: vec!["Rust Engineer".to_string()],
            keywords_boost: vec!["rust".to_string(), "tokio".to_string()],
            location_preferences: LocationPreferences {
                allow_remote: true,
                cities: vec!["Portland".to_string()],
                states: vec!["OR".to_string()],
            },
            ..ScoringConfig::default()
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let job = rust_job();
        let cfg = matching_config();
        let first = score(&job, &cfg, as_of());
        let second = score(&job, &cfg, as_of());
        assert_eq!(first, second);
    }

    #[test]
    fn fully_matching_job_clears_the_immediate_threshold() {
        let breakdown = score(&rust_job(), &matching_config(), as_of());
        assert!(breakdown.score >= 0.9, "score was {}", breakdown.score);
        assert!(breakdown.reasons[0].contains("Rust Engineer"));
        assert!(breakdown.reasons.iter().any(|r| r.contains("keywords")));
    }

    #[test]
    fn denylist_dominates_every_other_signal() {
        let mut cfg = matching_config();
        cfg.company_denylist = vec!["Globex".to_string()];
        let breakdown = score(&rust_job(), &cfg, as_of());
        assert_eq!(breakdown.score, 0.0);
        assert_eq!(breakdown.reasons, vec!["company denylisted: Globex"]);
    }

    #[test]
    fn denylist_reason_names_the_matched_entry() {
        let mut job = rust_job();
        job.company = "Acme".to_string();
        let cfg = ScoringConfig {
            company_denylist: vec!["Acme".to_string()],
            ..ScoringConfig::default()
        };
        let breakdown = score(&job, &cfg, as_of());
        assert_eq!(breakdown.score, 0.0);
        assert!(breakdown
            .reasons
            .contains(&"company denylisted: Acme".to_string()));
    }

    #[test]
    fn onsite_only_config_disqualifies_unmatched_location() {
        let mut job = rust_job();
        job.location = "Berlin, Germany".to_string();
        let mut cfg = matching_config();
        cfg.location_preferences.allow_remote = false;
        let breakdown = score(&job, &cfg, as_of());
        assert_eq!(breakdown.score, 0.0);
        assert!(breakdown.reasons[0].contains("location outside preferences"));
    }

    #[test]
    fn location_hard_filter_can_be_disabled() {
        let mut job = rust_job();
        job.location = "Berlin, Germany".to_string();
        let mut cfg = matching_config();
        cfg.location_preferences.allow_remote = false;
        cfg.location_hard_filter = false;
        let breakdown = score(&job, &cfg, as_of());
        assert!(breakdown.score > 0.0);
    }

    #[test]
    fn salary_below_floor_is_a_penalty_not_a_cut() {
        let mut job = rust_job();
        job.salary_min = Some(80_000);
        job.salary_max = Some(95_000);
        let mut cfg = matching_config();
        cfg.salary_floor_usd = Some(140_000);
        let with_penalty = score(&job, &cfg, as_of());
        let without = score(&rust_job(), &cfg, as_of());
        assert!(with_penalty.score > 0.0);
        assert!(with_penalty.score < without.score);
        assert!(with_penalty
            .reasons
            .iter()
            .any(|r| r.contains("salary below floor")));
    }

    #[test]
    fn unknown_salary_is_never_penalized() {
        let mut job = rust_job();
        job.salary_min = None;
        job.salary_max = None;
        let mut cfg = matching_config();
        cfg.salary_floor_usd = Some(140_000);
        let breakdown = score(&job, &cfg, as_of());
        assert!(!breakdown.reasons.iter().any(|r| r.contains("salary")));
    }

    #[test]
    fn blocklisted_title_takes_a_penalty_by_default() {
        let mut job = rust_job();
        job.title = "Senior Rust Engineering Manager".to_string();
        let mut cfg = matching_config();
        cfg.title_blocklist = vec!["Manager".to_string()];
        let breakdown = score(&job, &cfg, as_of());
        assert!(breakdown.score > 0.0);
        assert!(breakdown
            .reasons
            .iter()
            .any(|r| r.contains("title blocklist penalty")));
    }

    #[test]
    fn blocklist_can_disqualify_when_configured() {
        let mut job = rust_job();
        job.title = "Engineering Intern".to_string();
        let mut cfg = matching_config();
        cfg.title_blocklist = vec!["Intern".to_string()];
        cfg.title_blocklist_disqualifies = true;
        let breakdown = score(&job, &cfg, as_of());
        assert_eq!(breakdown.score, 0.0);
        assert!(breakdown.reasons[0].contains("title blocklisted"));
    }

    #[test]
    fn recency_uses_the_explicit_as_of_anchor() {
        let job = rust_job();
        let cfg = matching_config();
        let fresh = score(&job, &cfg, as_of());
        let stale = score(&job, &cfg, as_of() + chrono::Duration::days(45));
        assert!(fresh.score > stale.score);
    }

    #[test]
    fn remote_job_matches_when_remote_is_allowed() {
        let mut job = rust_job();
        job.remote = true;
        job.location = "Remote".to_string();
        let breakdown = score(&job, &matching_config(), as_of());
        assert!(breakdown
            .reasons
            .iter()
            .any(|r| r == "remote role accepted"));
    }

    #[test]
    fn unconfigured_filters_still_appear_in_reasons() {
        let breakdown = score(&rust_job(), &ScoringConfig::default(), as_of());
        assert!(breakdown
            .reasons
            .iter()
            .any(|r| r == "no title filter configured"));
        assert!(breakdown
            .reasons
            .iter()
            .any(|r| r == "no keyword boosts configured"));
    }

    #[test]
    fn score_stays_clamped_to_unit_interval() {
        let breakdown = score(&rust_job(), &matching_config(), as_of());
        assert!((0.0..=1.0).contains(&breakdown.score));
    }
}
