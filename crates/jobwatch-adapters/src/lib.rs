//! Source adapter contracts and the board/ATS adapters JobWatch polls.
//!
//! Each adapter owns one wire protocol (Greenhouse boards API, Lever
//! postings API, JobsWithGPT search) and hands back [`RawJobPosting`]
//! values. Raw payloads are tagged per source; the [`normalize`] dispatch
//! turns them into the canonical shape before they enter the pipeline.

pub mod normalize;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use jobwatch_store::{FetchError, HttpFetcher};

pub use normalize::{normalize, parse_salary_range, strip_html, NormalizeError};

pub const CRATE_NAME: &str = "jobwatch-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("source fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("malformed source payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

/// Query parameters forwarded to sources that support server-side search.
/// Board-scoped sources (Greenhouse, Lever) ignore it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// One job board / ATS source. Implementations are free to speak whatever
/// protocol they need as long as they produce tagged raw postings.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter kind identifier, e.g. `"greenhouse"`.
    fn source_id(&self) -> &'static str;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &FetchQuery,
    ) -> Result<Vec<RawJobPosting>, AdapterError>;
}

/// Source-specific posting as received, tagged by origin. Ephemeral: it is
/// discarded as soon as [`normalize`] has produced a canonical job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source_id", rename_all = "snake_case")]
pub enum RawJobPosting {
    Greenhouse(GreenhouseJob),
    Lever(LeverPosting),
    JobsWithGpt(JobsWithGptJob),
}

impl RawJobPosting {
    pub fn source_id(&self) -> &'static str {
        match self {
            RawJobPosting::Greenhouse(_) => "greenhouse",
            RawJobPosting::Lever(_) => "lever",
            RawJobPosting::JobsWithGpt(_) => "jobswithgpt",
        }
    }
}

/// Greenhouse boards API posting (`GET /v1/boards/{board}/jobs?content=true`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GreenhouseJob {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub absolute_url: String,
    /// Not part of the boards payload proper; the adapter fills it from the
    /// board token when the API leaves it out.
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub location: Option<GreenhouseLocation>,
    /// Job description, HTML.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub first_published: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GreenhouseLocation {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GreenhouseJobsResponse {
    #[serde(default)]
    jobs: Vec<GreenhouseJob>,
}

/// Lever postings API entry (`GET /v0/postings/{site}?mode=json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverPosting {
    #[serde(default)]
    pub id: String,
    /// Lever calls the title `text`.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub hosted_url: String,
    #[serde(default)]
    pub apply_url: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub categories: Option<LeverCategories>,
    /// HTML description.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_plain: Option<String>,
    /// `"remote"`, `"hybrid"` or `"on-site"`.
    #[serde(default)]
    pub workplace_type: Option<String>,
    #[serde(default)]
    pub salary_range: Option<LeverSalaryRange>,
    /// Filled by the adapter from the site token; not in the API payload.
    #[serde(default)]
    pub company: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeverCategories {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub commitment: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeverSalaryRange {
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
}

/// JobsWithGPT search result entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsWithGptJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date_posted: Option<String>,
    #[serde(default)]
    pub remote: Option<bool>,
    #[serde(default)]
    pub salary_min: Option<i64>,
    #[serde(default)]
    pub salary_max: Option<i64>,
    /// Free-text salary, e.g. `"$150k-$200k"`; coerced during normalization.
    #[serde(default)]
    pub salary: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct JobsWithGptResponse {
    #[serde(default)]
    jobs: Vec<JobsWithGptJob>,
}

/// Declarative source selection used by the runtime config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    Greenhouse {
        /// Board token, e.g. `"acme"` in `boards-api.greenhouse.io/v1/boards/acme`.
        board: String,
    },
    Lever {
        /// Site token, e.g. `"acme"` in `api.lever.co/v0/postings/acme`.
        site: String,
    },
    JobsWithGpt {
        #[serde(default = "default_jobswithgpt_endpoint")]
        endpoint: String,
    },
}

fn default_jobswithgpt_endpoint() -> String {
    "https://jobswithgpt.com/api/list".to_string()
}

pub fn build_adapter(spec: &SourceSpec) -> Box<dyn SourceAdapter> {
    match spec {
        SourceSpec::Greenhouse { board } => Box::new(GreenhouseAdapter {
            board: board.clone(),
        }),
        SourceSpec::Lever { site } => Box::new(LeverAdapter { site: site.clone() }),
        SourceSpec::JobsWithGpt { endpoint } => Box::new(JobsWithGptAdapter {
            endpoint: endpoint.clone(),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct GreenhouseAdapter {
    pub board: String,
}

#[async_trait]
impl SourceAdapter for GreenhouseAdapter {
    fn source_id(&self) -> &'static str {
        "greenhouse"
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        _query: &FetchQuery,
    ) -> Result<Vec<RawJobPosting>, AdapterError> {
        let url = format!(
            "https://boards-api.greenhouse.io/v1/boards/{}/jobs?content=true",
            self.board
        );
        let resp = http.fetch_bytes(self.source_id(), &url).await?;
        let parsed: GreenhouseJobsResponse = serde_json::from_slice(&resp.body)?;
        Ok(parsed
            .jobs
            .into_iter()
            .map(|mut job| {
                if job
                    .company_name
                    .as_deref()
                    .map_or(true, |c| c.trim().is_empty())
                {
                    job.company_name = Some(self.board.clone());
                }
                RawJobPosting::Greenhouse(job)
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct LeverAdapter {
    pub site: String,
}

#[async_trait]
impl SourceAdapter for LeverAdapter {
    fn source_id(&self) -> &'static str {
        "lever"
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        _query: &FetchQuery,
    ) -> Result<Vec<RawJobPosting>, AdapterError> {
        let url = format!("https://api.lever.co/v0/postings/{}?mode=json", self.site);
        let resp = http.fetch_bytes(self.source_id(), &url).await?;
        let postings: Vec<LeverPosting> = serde_json::from_slice(&resp.body)?;
        Ok(postings
            .into_iter()
            .map(|mut posting| {
                if posting.company.trim().is_empty() {
                    posting.company = self.site.clone();
                }
                RawJobPosting::Lever(posting)
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct JobsWithGptAdapter {
    pub endpoint: String,
}

#[async_trait]
impl SourceAdapter for JobsWithGptAdapter {
    fn source_id(&self) -> &'static str {
        "jobswithgpt"
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &FetchQuery,
    ) -> Result<Vec<RawJobPosting>, AdapterError> {
        let mut url = format!(
            "{}?query={}",
            self.endpoint.trim_end_matches('/'),
            encode_query_terms(&query.keywords)
        );
        if let Some(location) = &query.location {
            url.push_str("&location=");
            url.push_str(&location.replace(' ', "+"));
        }
        let resp = http.fetch_bytes(self.source_id(), &url).await?;
        let parsed: JobsWithGptResponse = serde_json::from_slice(&resp.body)?;
        Ok(parsed
            .jobs
            .into_iter()
            .map(RawJobPosting::JobsWithGpt)
            .collect())
    }
}

fn encode_query_terms(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| k.trim().replace(' ', "+"))
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_posting_reports_its_source() {
        let raw = RawJobPosting::Greenhouse(GreenhouseJob::default());
        assert_eq!(raw.source_id(), "greenhouse");
        let raw = RawJobPosting::Lever(LeverPosting::default());
        assert_eq!(raw.source_id(), "lever");
        let raw = RawJobPosting::JobsWithGpt(JobsWithGptJob::default());
        assert_eq!(raw.source_id(), "jobswithgpt");
    }

    #[test]
    fn greenhouse_payload_deserializes_board_shape() {
        let body = r#"{
            "jobs": [{
                "id": 4012,
                "title": "Senior Engineer",
                "absolute_url": "https://boards.greenhouse.io/acme/jobs/4012",
                "location": {"name": "Portland, OR"},
                "content": "<p>Build things</p>",
                "updated_at": "2026-03-01T08:00:00Z"
            }]
        }"#;
        let parsed: GreenhouseJobsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.jobs.len(), 1);
        let job = &parsed.jobs[0];
        assert_eq!(job.id, Some(4012));
        assert_eq!(job.title, "Senior Engineer");
        assert_eq!(job.location.as_ref().unwrap().name, "Portland, OR");
    }

    #[test]
    fn lever_payload_deserializes_camel_case_fields() {
        let body = r#"[{
            "id": "p-1",
            "text": "Staff Engineer",
            "hostedUrl": "https://jobs.lever.co/acme/p-1",
            "createdAt": 1767225600000,
            "categories": {"location": "Remote - US", "commitment": "Full-time"},
            "workplaceType": "remote",
            "salaryRange": {"min": 150000, "max": 200000, "currency": "USD"}
        }]"#;
        let parsed: Vec<LeverPosting> = serde_json::from_str(body).unwrap();
        let posting = &parsed[0];
        assert_eq!(posting.text, "Staff Engineer");
        assert_eq!(posting.hosted_url, "https://jobs.lever.co/acme/p-1");
        assert_eq!(posting.workplace_type.as_deref(), Some("remote"));
        assert_eq!(posting.salary_range.as_ref().unwrap().min, Some(150_000));
    }

    #[test]
    fn source_spec_deserializes_from_tagged_yaml_shape() {
        let spec: SourceSpec =
            serde_json::from_str(r#"{"kind": "greenhouse", "board": "acme"}"#).unwrap();
        match spec {
            SourceSpec::Greenhouse { board } => assert_eq!(board, "acme"),
            other => panic!("unexpected spec {other:?}"),
        }

        let spec: SourceSpec = serde_json::from_str(r#"{"kind": "jobs_with_gpt"}"#).unwrap();
        match spec {
            SourceSpec::JobsWithGpt { endpoint } => {
                assert_eq!(endpoint, "https://jobswithgpt.com/api/list")
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn query_terms_are_joined_and_space_escaped() {
        let terms = vec!["rust engineer".to_string(), "remote".to_string()];
        assert_eq!(encode_query_terms(&terms), "rust+engineer+remote");
        assert_eq!(encode_query_terms(&[]), "");
    }
}
