//! SQLite-backed store on sqlx.
//!
//! The upsert is a single `INSERT .. ON CONFLICT(hash) DO UPDATE` so the
//! lookup-then-write race between concurrent sources resolves inside the
//! database: `first_seen_at` sticks to the original row and `alert_state`
//! only ever moves forward.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobwatch_core::{AlertState, JobRecord, NormalizedJob};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::{Store, StoreError};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS jobs (
  hash TEXT PRIMARY KEY,
  source_id TEXT NOT NULL,
  external_id TEXT NOT NULL,
  title TEXT NOT NULL,
  company TEXT NOT NULL,
  location TEXT NOT NULL,
  description TEXT NOT NULL,
  url TEXT NOT NULL,
  posted_at TEXT,
  remote INTEGER NOT NULL,
  salary_min INTEGER,
  salary_max INTEGER,
  currency TEXT NOT NULL,
  score REAL NOT NULL,
  score_reasons TEXT NOT NULL,
  first_seen_at TEXT NOT NULL,
  last_seen_at TEXT NOT NULL,
  times_seen INTEGER NOT NULL,
  alert_state TEXT NOT NULL
)";

const ALERT_STATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_alert_state ON jobs (alert_state)";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (and create if missing) a store at a sqlx database URL such as
    /// `sqlite://jobwatch.db`.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        Self::open_with(options).await
    }

    /// Open a store backed by a file path. Used by tests with a tempdir.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::open_with(options).await
    }

    async fn open_with(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query(ALERT_STATE_INDEX).execute(&pool).await?;
        debug!("sqlite store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn lookup_by_hash(&self, hash: &str) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE hash = ?1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn upsert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let reasons = serde_json::to_string(&record.score_reasons).map_err(|e| {
            StoreError::Corrupt {
                hash: record.hash.clone(),
                detail: format!("unserializable score_reasons: {e}"),
            }
        })?;
        sqlx::query(
            "INSERT INTO jobs (
               hash, source_id, external_id, title, company, location,
               description, url, posted_at, remote, salary_min, salary_max,
               currency, score, score_reasons, first_seen_at, last_seen_at,
               times_seen, alert_state
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                       ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(hash) DO UPDATE SET
               source_id = excluded.source_id,
               external_id = excluded.external_id,
               title = excluded.title,
               company = excluded.company,
               location = excluded.location,
               description = excluded.description,
               url = excluded.url,
               posted_at = excluded.posted_at,
               remote = excluded.remote,
               salary_min = excluded.salary_min,
               salary_max = excluded.salary_max,
               currency = excluded.currency,
               score = excluded.score,
               score_reasons = excluded.score_reasons,
               last_seen_at = excluded.last_seen_at,
               times_seen = excluded.times_seen,
               alert_state = CASE
                 WHEN jobs.alert_state IN ('immediate_sent', 'digest_sent')
                   THEN jobs.alert_state
                 WHEN jobs.alert_state = 'digest_pending'
                   AND excluded.alert_state = 'none'
                   THEN jobs.alert_state
                 ELSE excluded.alert_state
               END",
        )
        .bind(&record.hash)
        .bind(&record.job.source_id)
        .bind(&record.job.external_id)
        .bind(&record.job.title)
        .bind(&record.job.company)
        .bind(&record.job.location)
        .bind(&record.job.description)
        .bind(&record.job.url)
        .bind(record.job.posted_at.map(|t| t.to_rfc3339()))
        .bind(record.job.remote as i64)
        .bind(record.job.salary_min)
        .bind(record.job.salary_max)
        .bind(&record.job.currency)
        .bind(record.score)
        .bind(reasons)
        .bind(record.first_seen_at.to_rfc3339())
        .bind(record.last_seen_at.to_rfc3339())
        .bind(record.times_seen as i64)
        .bind(record.alert_state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_alert_state(&self, hash: &str, state: AlertState) -> Result<(), StoreError> {
        // Same merge shape as the upsert, so both write paths agree with
        // AlertState::merge.
        sqlx::query(
            "UPDATE jobs SET alert_state = CASE
               WHEN alert_state IN ('immediate_sent', 'digest_sent')
                 THEN alert_state
               WHEN alert_state = 'digest_pending' AND ?2 = 'none'
                 THEN alert_state
               ELSE ?2
             END
             WHERE hash = ?1",
        )
        .bind(hash)
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_pending_digest(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE alert_state = 'digest_pending'
             ORDER BY score DESC, hash ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord, StoreError> {
    let hash: String = row.try_get("hash")?;
    let corrupt = |detail: String| StoreError::Corrupt {
        hash: hash.clone(),
        detail,
    };

    let reasons_json: String = row.try_get("score_reasons")?;
    let score_reasons: Vec<String> = serde_json::from_str(&reasons_json)
        .map_err(|e| corrupt(format!("bad score_reasons: {e}")))?;

    let alert_state_text: String = row.try_get("alert_state")?;
    let alert_state = AlertState::parse(&alert_state_text)
        .ok_or_else(|| corrupt(format!("unknown alert_state `{alert_state_text}`")))?;

    let posted_at: Option<String> = row.try_get("posted_at")?;
    let posted_at = posted_at
        .map(|t| parse_timestamp(&t))
        .transpose()
        .map_err(&corrupt)?;
    let first_seen_text: String = row.try_get("first_seen_at")?;
    let first_seen_at = parse_timestamp(&first_seen_text).map_err(&corrupt)?;
    let last_seen_text: String = row.try_get("last_seen_at")?;
    let last_seen_at = parse_timestamp(&last_seen_text).map_err(&corrupt)?;

    Ok(JobRecord {
        job: NormalizedJob {
            source_id: row.try_get("source_id")?,
            external_id: row.try_get("external_id")?,
            title: row.try_get("title")?,
            company: row.try_get("company")?,
            location: row.try_get("location")?,
            description: row.try_get("description")?,
            url: row.try_get("url")?,
            posted_at,
            remote: row.try_get::<i64, _>("remote")? != 0,
            salary_min: row.try_get("salary_min")?,
            salary_max: row.try_get("salary_max")?,
            currency: row.try_get("currency")?,
        },
        score: row.try_get("score")?,
        score_reasons,
        first_seen_at,
        last_seen_at,
        times_seen: row.try_get::<i64, _>("times_seen")?.max(1) as u32,
        alert_state,
        hash,
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp `{text}`: {e}"))
}
