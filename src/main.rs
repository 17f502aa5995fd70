//! CLI entry point for the energy report tool.
//!
//! Generates usage reports from a local export or the smart-home API, inspects
//! and manages report jobs, and publishes finished reports to S3.

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use energy_report::config::ReportConfig;
use energy_report::infra::artifacts::publish_artifact;
use energy_report::infra::file_source::FileUsageSource;
use energy_report::infra::smarthome::SmartHomeClient;
use energy_report::jobs::types::DEFAULT_TITLE;
use energy_report::jobs::{JobStatus, ReportRequest, ReportService, SqliteJobStore};
use energy_report::services::usage_api::{UsageSource, UserDirectory};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "energy_report")]
#[command(about = "Energy usage analytics and report generation", long_about = None)]
struct Cli {
    /// JSON report configuration; defaults plus environment overrides when omitted
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a report and wait for it to finish
    Generate {
        /// User the report is for
        #[arg(short, long)]
        user: String,

        /// Report title
        #[arg(short, long, default_value = DEFAULT_TITLE)]
        title: String,

        /// Output format: pdf or csv
        #[arg(short, long, default_value = "pdf")]
        format: String,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Restrict to these devices (repeatable); all owned devices when omitted
        #[arg(long = "device", value_name = "DEVICE_ID")]
        devices: Vec<String>,

        /// Usage export to read (.json or .csv)
        #[arg(
            long,
            value_name = "FILE",
            conflicts_with = "api_url",
            required_unless_present = "api_url"
        )]
        records: Option<PathBuf>,

        /// Base URL of the smart-home API
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
    },
    /// Show one report job
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },
    /// List a user's report jobs, newest first
    List {
        #[arg(short, long)]
        user: String,
    },
    /// Delete a report job record (the report file is kept)
    Delete {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },
    /// Fail jobs stuck in generating
    Recover {
        /// Age after which a generating job is considered stale; defaults to the config value
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
    /// Upload a completed report to S3
    Publish {
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// S3 bucket name (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Gzip compress the report before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/energy_report.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("energy_report.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReportConfig::load(path)?,
        None => ReportConfig::from_env()?,
    };
    info!(
        output_dir = %config.output_dir.display(),
        database = %config.database_path.display(),
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Generate {
            user,
            title,
            format,
            start,
            end,
            devices,
            records,
            api_url,
        } => {
            let (source, directory): (Arc<dyn UsageSource>, Arc<dyn UserDirectory>) =
                match (records, api_url) {
                    (Some(path), _) => {
                        let file = Arc::new(FileUsageSource::load(&path)?);
                        (file.clone(), file)
                    }
                    (None, Some(url)) => {
                        let api = Arc::new(SmartHomeClient::from_env(&url)?);
                        (api.clone(), api)
                    }
                    (None, None) => bail!("either --records or --api-url is required"),
                };

            let service = build_service(config, source, directory)?;

            let mut request = ReportRequest::new(&user, &title, &format).with_range(start, end);
            if !devices.is_empty() {
                request = request.with_devices(devices);
            }

            let job = service.generate_report(request).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);

            if job.status == JobStatus::Failed {
                bail!(
                    "report job {} failed: {}",
                    job.id,
                    job.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Commands::Status { job_id } => {
            let service = offline_service(config)?;
            let job = service.get_job_status(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::List { user } => {
            let service = offline_service(config)?;
            let jobs = service.list_jobs(&user)?;
            info!(user_id = %user, jobs = jobs.len(), "Report jobs listed");
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Commands::Delete { job_id } => {
            let service = offline_service(config)?;
            if !service.delete_job(&job_id)? {
                warn!(job_id = %job_id, "No such report job");
            }
        }
        Commands::Recover { older_than_secs } => {
            let service = offline_service(config)?;
            let recovered = match older_than_secs {
                Some(secs) => service.recover_stale_jobs_older_than(Duration::from_secs(secs))?,
                None => service.recover_stale_jobs()?,
            };
            info!(recovered, "Stale job recovery finished");
        }
        Commands::Publish {
            job_id,
            s3_bucket,
            gzip,
        } => {
            let service = offline_service(config)?;
            let job = service.get_job_status(&job_id)?;

            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);
            let key = publish_artifact(&s3, &s3_bucket, &job, gzip).await?;
            println!("s3://{s3_bucket}/{key}");
        }
    }

    Ok(())
}

/// Opens the job store, builds the service and fails any jobs left
/// generating by an earlier run.
fn build_service(
    config: ReportConfig,
    source: Arc<dyn UsageSource>,
    directory: Arc<dyn UserDirectory>,
) -> Result<ReportService> {
    let store = Arc::new(SqliteJobStore::open(&config.database_path)?);
    let service = ReportService::new(config, store, source, directory)?;

    let recovered = service.recover_stale_jobs()?;
    if recovered > 0 {
        info!(recovered, "Recovered stale report jobs at startup");
    }
    Ok(service)
}

/// A service for commands that only touch the job store.
fn offline_service(config: ReportConfig) -> Result<ReportService> {
    let empty = Arc::new(FileUsageSource::default());
    build_service(config, empty.clone(), empty)
}
