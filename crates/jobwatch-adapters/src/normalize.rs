//! Normalizer: source-specific raw postings into the canonical job shape.
//!
//! Pure dispatch keyed on the raw posting's source tag. Scoring fields
//! (title, company, location) are stripped of HTML; the description keeps
//! its original markup for display and is only bounded in length. Missing
//! required fields are a per-posting error the coordinator skips and
//! counts, never a cycle failure.

use chrono::{DateTime, TimeZone, Utc};
use scraper::Html;
use thiserror::Error;

use jobwatch_core::{NormalizedJob, MAX_DESCRIPTION_CHARS};

use crate::{GreenhouseJob, JobsWithGptJob, LeverPosting, RawJobPosting};

/// Explicit stand-ins for fields a source left out; scoring never sees an
/// empty string for these.
const DEFAULT_COMPANY: &str = "unknown";
const DEFAULT_LOCATION: &str = "unspecified";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{source_id}: required field `{field}` missing or empty")]
    MissingField {
        source_id: &'static str,
        field: &'static str,
    },
}

/// Convert a raw posting into the canonical shape, or fail for this one
/// posting.
pub fn normalize(raw: &RawJobPosting) -> Result<NormalizedJob, NormalizeError> {
    match raw {
        RawJobPosting::Greenhouse(job) => normalize_greenhouse(job),
        RawJobPosting::Lever(posting) => normalize_lever(posting),
        RawJobPosting::JobsWithGpt(job) => normalize_jobswithgpt(job),
    }
}

fn normalize_greenhouse(job: &GreenhouseJob) -> Result<NormalizedJob, NormalizeError> {
    let title = require("greenhouse", "title", strip_html(&job.title))?;
    let url = require("greenhouse", "url", job.absolute_url.trim().to_string())?;
    let location = non_empty_or(
        strip_html(job.location.as_ref().map(|l| l.name.as_str()).unwrap_or("")),
        DEFAULT_LOCATION,
    );
    let description = truncate_chars(job.content.as_deref().unwrap_or(""), MAX_DESCRIPTION_CHARS);

    Ok(NormalizedJob {
        source_id: "greenhouse".to_string(),
        external_id: job.id.map(|id| id.to_string()).unwrap_or_default(),
        remote: is_remote_location(&location),
        company: non_empty_or(
            strip_html(job.company_name.as_deref().unwrap_or("")),
            DEFAULT_COMPANY,
        ),
        title,
        location,
        description,
        url,
        posted_at: job
            .first_published
            .as_deref()
            .or(job.updated_at.as_deref())
            .and_then(parse_timestamp),
        salary_min: None,
        salary_max: None,
        currency: "USD".to_string(),
    })
}

fn normalize_lever(posting: &LeverPosting) -> Result<NormalizedJob, NormalizeError> {
    let title = require("lever", "title", strip_html(&posting.text))?;
    let url = require(
        "lever",
        "url",
        non_empty_or(
            posting.hosted_url.trim().to_string(),
            posting.apply_url.as_deref().unwrap_or("").trim(),
        ),
    )?;
    let location = non_empty_or(
        strip_html(
            posting
                .categories
                .as_ref()
                .and_then(|c| c.location.as_deref())
                .unwrap_or(""),
        ),
        DEFAULT_LOCATION,
    );
    let remote = posting
        .workplace_type
        .as_deref()
        .map(|w| w.eq_ignore_ascii_case("remote"))
        .unwrap_or_else(|| is_remote_location(&location));
    let (salary_min, salary_max, currency) = match &posting.salary_range {
        Some(range) => (
            range.min,
            range.max.or(range.min),
            range
                .currency
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_else(|| "USD".to_string()),
        ),
        None => (None, None, "USD".to_string()),
    };

    Ok(NormalizedJob {
        source_id: "lever".to_string(),
        external_id: posting.id.clone(),
        company: non_empty_or(strip_html(&posting.company), DEFAULT_COMPANY),
        description: truncate_chars(
            posting
                .description
                .as_deref()
                .or(posting.description_plain.as_deref())
                .unwrap_or(""),
            MAX_DESCRIPTION_CHARS,
        ),
        posted_at: posting
            .created_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        title,
        location,
        url,
        remote,
        salary_min,
        salary_max,
        currency,
    })
}

fn normalize_jobswithgpt(job: &JobsWithGptJob) -> Result<NormalizedJob, NormalizeError> {
    let title = require("jobswithgpt", "title", strip_html(&job.title))?;
    let url = require("jobswithgpt", "url", job.url.trim().to_string())?;
    let location = non_empty_or(strip_html(&job.location), DEFAULT_LOCATION);
    let (salary_min, salary_max) = match (job.salary_min, job.salary_max) {
        (None, None) => job
            .salary
            .as_deref()
            .and_then(parse_salary_range)
            .map(|(min, max)| (Some(min), Some(max)))
            .unwrap_or((None, None)),
        (min, max) => (min.or(max), max.or(min)),
    };

    Ok(NormalizedJob {
        source_id: "jobswithgpt".to_string(),
        external_id: job.id.clone().unwrap_or_default(),
        company: non_empty_or(strip_html(&job.company), DEFAULT_COMPANY),
        description: truncate_chars(&job.description, MAX_DESCRIPTION_CHARS),
        remote: job.remote.unwrap_or_else(|| is_remote_location(&location)),
        posted_at: job.date_posted.as_deref().and_then(parse_timestamp),
        currency: job
            .currency
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| "USD".to_string()),
        title,
        location,
        url,
        salary_min,
        salary_max,
    })
}

/// Drop tags and collapse whitespace. Used for fields the scorer reads.
pub fn strip_html(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Coerce a free-text salary ("$150k-$200k", "$150,000 - $200,000") into
/// integer bounds. Returns `None` when no recognizable pattern exists; it
/// never guesses.
pub fn parse_salary_range(text: &str) -> Option<(i64, i64)> {
    let values: Vec<i64> = extract_salary_values(text)
        .into_iter()
        .filter(|v| *v >= 10_000)
        .collect();
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    Some((min, max))
}

fn extract_salary_values(text: &str) -> Vec<i64> {
    let mut out = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut current: i64 = 0;
    let mut in_number = false;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_digit() {
            in_number = true;
            current = current.saturating_mul(10).saturating_add(c as i64 - '0' as i64);
            continue;
        }
        // Thousands separator inside a number ("150,000").
        if c == ',' && in_number && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
            continue;
        }
        if in_number {
            let value = if c == 'k' || c == 'K' {
                current.saturating_mul(1000)
            } else {
                current
            };
            out.push(value);
            current = 0;
            in_number = false;
        }
    }
    if in_number {
        out.push(current);
    }
    out
}

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

fn is_remote_location(location: &str) -> bool {
    location.to_lowercase().contains("remote")
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn require(
    source_id: &'static str,
    field: &'static str,
    value: String,
) -> Result<String, NormalizeError> {
    if value.trim().is_empty() {
        Err(NormalizeError::MissingField { source_id, field })
    } else {
        Ok(value)
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GreenhouseLocation, LeverCategories, LeverSalaryRange};

    fn greenhouse_job() -> GreenhouseJob {
        GreenhouseJob {
            id: Some(4012),
            title: "Senior Engineer".to_string(),
            absolute_url: "https://boards.greenhouse.io/acme/jobs/4012".to_string(),
            company_name: Some("Acme".to_string()),
            location: Some(GreenhouseLocation {
                name: "Portland, OR".to_string(),
            }),
            content: Some("<p>Build things</p>".to_string()),
            first_published: Some("2026-03-01T08:00:00Z".to_string()),
            updated_at: None,
        }
    }

    #[test]
    fn greenhouse_posting_normalizes_to_canonical_shape() {
        let job = normalize(&RawJobPosting::Greenhouse(greenhouse_job())).unwrap();
        assert_eq!(job.source_id, "greenhouse");
        assert_eq!(job.external_id, "4012");
        assert_eq!(job.title, "Senior Engineer");
        assert_eq!(job.company, "Acme");
        assert_eq!(job.location, "Portland, OR");
        // Description keeps its HTML for display.
        assert_eq!(job.description, "<p>Build things</p>");
        assert!(job.posted_at.is_some());
        assert!(!job.remote);
        assert_eq!(job.currency, "USD");
    }

    #[test]
    fn missing_title_is_a_per_posting_error() {
        let mut raw = greenhouse_job();
        raw.title = "  ".to_string();
        let err = normalize(&RawJobPosting::Greenhouse(raw)).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingField {
                source_id: "greenhouse",
                field: "title"
            }
        );
    }

    #[test]
    fn missing_url_is_a_per_posting_error() {
        let mut raw = greenhouse_job();
        raw.absolute_url = String::new();
        let err = normalize(&RawJobPosting::Greenhouse(raw)).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingField {
                source_id: "greenhouse",
                field: "url"
            }
        );
    }

    #[test]
    fn absent_fields_get_explicit_defaults() {
        let raw = GreenhouseJob {
            title: "Engineer".to_string(),
            absolute_url: "https://x/1".to_string(),
            ..GreenhouseJob::default()
        };
        let job = normalize(&RawJobPosting::Greenhouse(raw)).unwrap();
        assert_eq!(job.company, "unknown");
        assert_eq!(job.location, "unspecified");
        assert_eq!(job.external_id, "");
        assert!(job.posted_at.is_none());
        assert_eq!(job.salary_min, None);
    }

    #[test]
    fn html_is_stripped_from_scoring_fields() {
        let mut raw = greenhouse_job();
        raw.title = "<b>Senior</b> &amp; Staff Engineer".to_string();
        let job = normalize(&RawJobPosting::Greenhouse(raw)).unwrap();
        assert_eq!(job.title, "Senior & Staff Engineer");
    }

    #[test]
    fn lever_posting_maps_text_and_salary_range() {
        let raw = LeverPosting {
            id: "p-1".to_string(),
            text: "Staff Engineer".to_string(),
            hosted_url: "https://jobs.lever.co/acme/p-1".to_string(),
            created_at: Some(1_767_225_600_000),
            categories: Some(LeverCategories {
                location: Some("Remote - US".to_string()),
                ..LeverCategories::default()
            }),
            workplace_type: Some("remote".to_string()),
            salary_range: Some(LeverSalaryRange {
                min: Some(150_000),
                max: Some(200_000),
                currency: Some("usd".to_string()),
                interval: None,
            }),
            company: "acme".to_string(),
            ..LeverPosting::default()
        };
        let job = normalize(&RawJobPosting::Lever(raw)).unwrap();
        assert_eq!(job.source_id, "lever");
        assert_eq!(job.title, "Staff Engineer");
        assert_eq!(job.company, "acme");
        assert!(job.remote);
        assert_eq!(job.salary_min, Some(150_000));
        assert_eq!(job.salary_max, Some(200_000));
        assert_eq!(job.currency, "USD");
        assert!(job.posted_at.is_some());
    }

    #[test]
    fn jobswithgpt_free_text_salary_is_coerced() {
        let raw = JobsWithGptJob {
            title: "Rust Engineer".to_string(),
            company: "Globex".to_string(),
            location: "Remote".to_string(),
            url: "https://x/2".to_string(),
            salary: Some("$150k-$200k".to_string()),
            ..JobsWithGptJob::default()
        };
        let job = normalize(&RawJobPosting::JobsWithGpt(raw)).unwrap();
        assert_eq!(job.salary_min, Some(150_000));
        assert_eq!(job.salary_max, Some(200_000));
        assert!(job.remote);
    }

    #[test]
    fn salary_coercion_table() {
        assert_eq!(
            parse_salary_range("$150k-$200k"),
            Some((150_000, 200_000))
        );
        assert_eq!(
            parse_salary_range("$150,000 - $200,000 per year"),
            Some((150_000, 200_000))
        );
        assert_eq!(parse_salary_range("up to 180K USD"), Some((180_000, 180_000)));
        assert_eq!(parse_salary_range("Competitive"), None);
        // Small numbers (hourly rates, headcounts) are not salary bounds.
        assert_eq!(parse_salary_range("$45/hr, 40 hours"), None);
    }

    #[test]
    fn description_is_truncated_to_the_bound() {
        let mut raw = greenhouse_job();
        raw.content = Some("x".repeat(MAX_DESCRIPTION_CHARS + 500));
        let job = normalize(&RawJobPosting::Greenhouse(raw)).unwrap();
        assert_eq!(job.description.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn remote_is_detected_from_location_text() {
        let mut raw = greenhouse_job();
        raw.location = Some(GreenhouseLocation {
            name: "Remote (US)".to_string(),
        });
        let job = normalize(&RawJobPosting::Greenhouse(raw)).unwrap();
        assert!(job.remote);
    }
}
