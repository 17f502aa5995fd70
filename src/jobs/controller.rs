use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, warn};

use crate::analyzers::analyze_usage;
use crate::config::ReportConfig;
use crate::error::{ReportError, Result};
use crate::jobs::store::JobStore;
use crate::jobs::types::{ReportJob, ReportRequest};
use crate::records::normalize;
use crate::render::{ReportContent, Renderer};
use crate::services::usage_api::{UsageSource, UserDirectory};

/// Error recorded on jobs failed by stale-job recovery.
pub const STALE_JOB_MESSAGE: &str = "Report generation timed out";

fn in_range(date: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

/// Accepts report requests and drives each job through
/// fetch, analyze, render and record.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn JobStore>,
    source: Arc<dyn UsageSource>,
    directory: Arc<dyn UserDirectory>,
    renderer: Renderer,
    config: Arc<ReportConfig>,
    permits: Arc<Semaphore>,
}

impl ReportService {
    pub fn new(
        config: ReportConfig,
        store: Arc<dyn JobStore>,
        source: Arc<dyn UsageSource>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            source,
            directory,
            renderer: Renderer::new(config.output_dir.clone()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config: Arc::new(config),
        })
    }

    /// Validates the request and records a `pending` job.
    pub fn create_job(&self, request: ReportRequest) -> Result<ReportJob> {
        let valid = request.validate()?;
        let id = match request.job_id.as_deref().map(str::trim) {
            Some("") => return Err(ReportError::invalid("job_id must not be blank")),
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let job = ReportJob::pending(id, valid);
        self.store.insert(&job)?;
        info!(job_id = %job.id, user_id = %job.user_id, format = %job.format, "Report job created");
        Ok(job)
    }

    /// Records a job and generates it in the background; returns the job id
    /// immediately. Must be called from within a Tokio runtime.
    pub async fn submit_report_job(&self, request: ReportRequest) -> Result<String> {
        let job = self.create_job(request)?;

        let span = tracing::info_span!(
            "report_job",
            job_id = %job.id,
            user_id = %job.user_id,
            format = %job.format,
        );
        let service = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(
            async move {
                if let Err(e) = service.run(&job_id).await {
                    error!(error = %e, "Report job did not run");
                }
            }
            .instrument(span),
        );

        Ok(job.id)
    }

    /// Records a job and generates it before returning the finished job.
    pub async fn generate_report(&self, request: ReportRequest) -> Result<ReportJob> {
        let job = self.create_job(request)?;
        let span = tracing::info_span!("report_job", job_id = %job.id, user_id = %job.user_id);
        self.run(&job.id).instrument(span).await
    }

    /// Claims a pending job for generation.
    ///
    /// Fails with [`ReportError::Concurrency`] if the job is not `pending`,
    /// leaving it untouched.
    pub fn start(&self, job_id: &str) -> Result<ReportJob> {
        self.store.mark_generating(job_id)
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<ReportJob> {
        self.store
            .get(job_id)?
            .ok_or_else(|| ReportError::NotFound(job_id.to_string()))
    }

    /// A user's jobs, newest first.
    pub fn list_jobs(&self, user_id: &str) -> Result<Vec<ReportJob>> {
        self.store.list_for_user(user_id)
    }

    /// Removes the job record. Rendered files are left in place.
    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        let removed = self.store.delete(job_id)?;
        info!(job_id, removed, "Report job deleted");
        Ok(removed)
    }

    /// Fails jobs stuck in `generating` for longer than the configured timeout.
    pub fn recover_stale_jobs(&self) -> Result<usize> {
        self.recover_stale_jobs_older_than(Duration::from_secs(self.config.stale_job_timeout_secs))
    }

    pub fn recover_stale_jobs_older_than(&self, age: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| ReportError::invalid(format!("stale job age out of range: {e}")))?;
        let recovered = self.store.fail_stale(Utc::now() - age, STALE_JOB_MESSAGE)?;
        if recovered > 0 {
            warn!(recovered, "Failed stale report jobs");
        }
        Ok(recovered)
    }

    /// Runs one job to a terminal state.
    ///
    /// Pipeline failures are recorded on the job, not returned; only a failed
    /// claim or a store error comes back as `Err`.
    async fn run(&self, job_id: &str) -> Result<ReportJob> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ReportError::Source(e.into()))?;

        let job = self.start(job_id)?;
        let started = std::time::Instant::now();

        match self.execute(&job).await {
            Ok(path) => match self.store.mark_completed(&job.id, &path) {
                Ok(done) => {
                    info!(
                        path = %path.display(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Report job completed"
                    );
                    Ok(done)
                }
                Err(e) => {
                    // Someone else finished the job (stale recovery); drop our file.
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Discarding report for a job that already ended"
                    );
                    let _ = std::fs::remove_file(&path);
                    Err(e)
                }
            },
            Err(e) => {
                error!(error = %e, "Report job failed");
                self.store.mark_failed(&job.id, &e.to_string())
            }
        }
    }

    async fn execute(&self, job: &ReportJob) -> Result<PathBuf> {
        let device_ids = match &job.device_ids {
            Some(ids) => ids.clone(),
            None => self.source.owned_devices(&job.user_id).await?,
        };
        if device_ids.is_empty() {
            return Err(ReportError::NoData);
        }

        let raw = self
            .source
            .fetch_usage(&device_ids, job.start_date, job.end_date)
            .await?;
        let fetched = raw.len();

        let wanted: HashSet<&str> = device_ids.iter().map(String::as_str).collect();
        let mut records = normalize(raw)?;
        records.retain(|r| {
            wanted.contains(r.device_id.as_str())
                && in_range(r.date(), job.start_date, job.end_date)
        });
        info!(devices = device_ids.len(), fetched, kept = records.len(), "Usage fetched");

        if records.is_empty() {
            return Err(ReportError::NoData);
        }

        let user = match self.directory.user_profile(&job.user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "User lookup failed, continuing without profile");
                None
            }
        };

        let config = Arc::clone(&self.config);
        let renderer = self.renderer.clone();
        let job = job.clone();
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let analysis = analyze_usage(&records, &config);
            let content = ReportContent {
                title: job.title,
                user_id: job.user_id,
                user,
                start_date: job.start_date,
                end_date: job.end_date,
                generated_at: Utc::now(),
                currency: config.currency.clone(),
                analysis,
                records,
            };
            renderer.render(&content, job.format)
        })
        .await
        .map_err(|e| ReportError::Render(format!("report worker stopped: {e}")))?
    }
}
