//! Ingestion pipeline: fetch, normalize, dedup, score, alert.
//!
//! A cycle runs in two phases. The fetch phase polls every enabled source
//! concurrently, each under its own deadline, and collects results; one
//! slow or broken source never blocks the others. The write phase then
//! walks the fetched postings serially, so dedup lookups and upserts never
//! race each other inside a cycle.

pub mod config;
pub mod notify;

pub use config::{PipelineConfig, SourceConfig};
pub use notify::{
    flush_digest, route, AlertDecision, DigestReport, DispatchError, Dispatcher, LogDispatcher,
    SlackDispatcher,
};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use jobwatch_adapters::{build_adapter, normalize, AdapterError, RawJobPosting, SourceAdapter};
use jobwatch_core::{fingerprint, score, JobRecord, NormalizedJob};
use jobwatch_store::{HttpClientConfig, HttpFetcher, Store, StoreError};

/// Outcome of a single poll cycle, per source and in aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub new_jobs: usize,
    pub updated_jobs: usize,
    pub skipped_postings: usize,
    pub source_failures: usize,
    pub store_errors: usize,
    pub alerts_sent: usize,
    pub digests_queued: usize,
    pub dispatch_failures: usize,
    /// Score distribution of jobs first seen this cycle, ten even buckets
    /// over `[0, 1]`.
    pub score_histogram: [usize; 10],
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            sources: Vec::new(),
            new_jobs: 0,
            updated_jobs: 0,
            skipped_postings: 0,
            source_failures: 0,
            store_errors: 0,
            alerts_sent: 0,
            digests_queued: 0,
            dispatch_failures: 0,
            score_histogram: [0; 10],
        }
    }

    fn bucket_score(&mut self, score: f64) {
        let index = ((score * 10.0).floor() as usize).min(9);
        self.score_histogram[index] += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SourceReport {
    fn new(name: String) -> Self {
        Self {
            name,
            fetched: 0,
            new: 0,
            updated: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }
}

pub struct IngestionPipeline {
    config: PipelineConfig,
    http: Arc<HttpFetcher>,
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn Dispatcher>,
}

type FetchOutcome = Result<Vec<RawJobPosting>, AdapterError>;

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..HttpClientConfig::default()
        })
        .context("building http client")?;
        Ok(Self {
            config,
            http: Arc::new(http),
            store,
            dispatcher,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Poll every enabled source from the config and ingest the results.
    pub async fn run_cycle(&self) -> CycleReport {
        let sources = self
            .config
            .sources
            .iter()
            .filter(|source| source.enabled)
            .cloned()
            .map(|source| {
                let adapter = build_adapter(&source.spec);
                (source, adapter)
            })
            .collect();
        self.run_cycle_with(sources).await
    }

    /// Cycle driver with explicit adapters; `run_cycle` wires the configured
    /// ones in.
    pub async fn run_cycle_with(
        &self,
        sources: Vec<(SourceConfig, Box<dyn SourceAdapter>)>,
    ) -> CycleReport {
        let started_at = Utc::now();
        let mut report = CycleReport::new(started_at);

        let semaphore = Arc::new(Semaphore::new(self.config.fetch_concurrency.max(1)));
        let mut handles: Vec<(String, JoinHandle<FetchOutcome>)> = Vec::new();
        for (source, adapter) in sources {
            let semaphore = Arc::clone(&semaphore);
            let http = Arc::clone(&self.http);
            let query = self.config.query.clone();
            let deadline =
                Duration::from_secs(source.timeout_secs.unwrap_or(self.config.source_timeout_secs));
            let name = source.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| AdapterError::Message("fetch slot closed".to_string()))?;
                match tokio::time::timeout(deadline, adapter.fetch(&http, &query)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AdapterError::Timeout(deadline)),
                }
            });
            handles.push((name, handle));
        }

        let mut fetched: Vec<(String, FetchOutcome)> = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(outcome) => fetched.push((name, outcome)),
                Err(err) => {
                    error!(source = %name, error = %err, "source fetch task panicked");
                    fetched.push((
                        name,
                        Err(AdapterError::Message("fetch task panicked".to_string())),
                    ));
                }
            }
        }

        // Write phase: serialized, so lookups and upserts cannot interleave.
        for (name, outcome) in fetched {
            let mut source_report = SourceReport::new(name);
            match outcome {
                Err(err) => {
                    warn!(source = %source_report.name, error = %err,
                        "source fetch failed, continuing cycle");
                    report.source_failures += 1;
                    source_report.errors.push(err.to_string());
                }
                Ok(postings) => {
                    source_report.fetched = postings.len();
                    for raw in &postings {
                        self.ingest_posting(raw, started_at, &mut report, &mut source_report)
                            .await;
                    }
                }
            }
            report.new_jobs += source_report.new;
            report.updated_jobs += source_report.updated;
            report.skipped_postings += source_report.skipped;
            report.sources.push(source_report);
        }

        report.finished_at = Utc::now();
        info!(
            new = report.new_jobs,
            updated = report.updated_jobs,
            skipped = report.skipped_postings,
            source_failures = report.source_failures,
            alerts = report.alerts_sent,
            "cycle complete"
        );
        report
    }

    async fn ingest_posting(
        &self,
        raw: &RawJobPosting,
        seen_at: DateTime<Utc>,
        report: &mut CycleReport,
        source_report: &mut SourceReport,
    ) {
        let job = match normalize(raw) {
            Ok(job) => job,
            Err(err) => {
                warn!(source = %source_report.name, error = %err, "skipping malformed posting");
                source_report.skipped += 1;
                return;
            }
        };
        let hash = fingerprint(&job);
        match self.upsert_job(job, hash, seen_at).await {
            Ok((record, newly_seen)) => {
                if newly_seen {
                    source_report.new += 1;
                    report.bucket_score(record.score);
                } else {
                    source_report.updated += 1;
                }
                self.route_record(&record, report).await;
            }
            Err(err) => {
                error!(source = %source_report.name, error = %err, "store write failed");
                report.store_errors += 1;
                source_report.errors.push(err.to_string());
            }
        }
    }

    /// Idempotent ingest of one normalized job. Returns the stored record and
    /// whether it was first seen this cycle.
    async fn upsert_job(
        &self,
        job: NormalizedJob,
        hash: String,
        seen_at: DateTime<Utc>,
    ) -> Result<(JobRecord, bool), StoreError> {
        match self.store.lookup_by_hash(&hash).await? {
            None => {
                let breakdown = score(&job, &self.config.scoring, seen_at);
                let record = JobRecord::first_seen(job, hash, breakdown, seen_at);
                self.store.upsert(&record).await?;
                Ok((record, true))
            }
            Some(mut existing) => {
                existing.mark_seen(seen_at);
                // Score is fixed at first sight unless rescoring is opted in,
                // so a record's alert tier stays stable across cycles.
                if self.config.scoring.rescore_existing {
                    let breakdown = score(&job, &self.config.scoring, seen_at);
                    existing.score = breakdown.score;
                    existing.score_reasons = breakdown.reasons;
                }
                existing.job = job;
                self.store.upsert(&existing).await?;
                Ok((existing, false))
            }
        }
    }

    async fn route_record(&self, record: &JobRecord, report: &mut CycleReport) {
        match notify::route(
            record,
            &self.config.scoring,
            self.dispatcher.as_ref(),
            self.store.as_ref(),
        )
        .await
        {
            Ok(AlertDecision::Immediate) => report.alerts_sent += 1,
            Ok(AlertDecision::Digest) => report.digests_queued += 1,
            Ok(AlertDecision::DispatchFailed) => report.dispatch_failures += 1,
            Ok(AlertDecision::AlreadyQueued)
            | Ok(AlertDecision::Suppressed)
            | Ok(AlertDecision::AlreadyHandled) => {}
            Err(err) => {
                error!(hash = %record.hash, error = %err, "alert state update failed");
                report.store_errors += 1;
            }
        }
    }

    /// Deliver everything queued for the digest tier.
    pub async fn flush_digest(&self) -> Result<DigestReport, StoreError> {
        notify::flush_digest(self.store.as_ref(), self.dispatcher.as_ref()).await
    }
}

/// Run poll and digest cycles on the configured cron schedules until ctrl-c.
pub async fn run_daemon(pipeline: Arc<IngestionPipeline>) -> Result<()> {
    let mut scheduler = JobScheduler::new().await.context("creating scheduler")?;

    let poll_cron = pipeline.config().poll_cron.clone();
    let poll_pipeline = Arc::clone(&pipeline);
    let poll_job = Job::new_async(poll_cron.as_str(), move |_id, _lock| {
        let pipeline = Arc::clone(&poll_pipeline);
        Box::pin(async move {
            pipeline.run_cycle().await;
        })
    })
    .with_context(|| format!("invalid poll cron {poll_cron:?}"))?;
    scheduler.add(poll_job).await.context("adding poll job")?;

    let digest_cron = pipeline.config().digest_cron.clone();
    let digest_pipeline = Arc::clone(&pipeline);
    let digest_job = Job::new_async(digest_cron.as_str(), move |_id, _lock| {
        let pipeline = Arc::clone(&digest_pipeline);
        Box::pin(async move {
            if let Err(err) = pipeline.flush_digest().await {
                error!(error = %err, "digest flush failed");
            }
        })
    })
    .with_context(|| format!("invalid digest cron {digest_cron:?}"))?;
    scheduler
        .add(digest_job)
        .await
        .context("adding digest job")?;

    scheduler.start().await.context("starting scheduler")?;
    info!(poll = %poll_cron, digest = %digest_cron, "daemon started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    scheduler.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
