use chrono::{Duration, NaiveDate};
use energy_report::analyzers::aggregate::aggregate_usage;
use energy_report::analyzers::anomaly::{AnomalyConfig, detect_anomalies};
use energy_report::analyzers::tariff::TariffSchedule;
use energy_report::analyzers::types::{AnalysisStatus, TrendInterval};
use energy_report::config::ReportConfig;
use energy_report::error::{NO_DATA_MESSAGE, ReportError};
use energy_report::infra::file_source::FileUsageSource;
use energy_report::infra::smarthome::SmartHomeClient;
use energy_report::jobs::{JobStatus, ReportJob, ReportRequest, ReportService, SqliteJobStore};
use energy_report::records::{RawUsageRecord, UsageRecord, normalize};
use energy_report::services::usage_api::UserProfile;
use std::path::Path;
use std::sync::Arc;

fn day(i: i64) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        + Duration::days(i)
}

fn raw(ts: &str, device: &str, kwh: f64) -> RawUsageRecord {
    RawUsageRecord {
        timestamp: Some(ts.to_string()),
        device_id: Some(device.to_string()),
        energy_consumed: Some(kwh),
        location: Some("Kitchen".to_string()),
    }
}

fn month_of_rows(device: &str) -> Vec<RawUsageRecord> {
    (0..30)
        .map(|i| {
            let ts = day(i).format("%Y-%m-%dT%H:%M:%S").to_string();
            raw(&ts, device, 5.0)
        })
        .collect()
}

fn service_with(output_dir: &Path, source: FileUsageSource) -> ReportService {
    let source = Arc::new(source);
    let config = ReportConfig {
        output_dir: output_dir.to_path_buf(),
        tariff: TariffSchedule::flat(0.23),
        ..ReportConfig::default()
    };
    ReportService::new(
        config,
        Arc::new(SqliteJobStore::in_memory().unwrap()),
        source.clone(),
        source,
    )
    .unwrap()
}

async fn wait_for_terminal(service: &ReportService, job_id: &str) -> ReportJob {
    for _ in 0..200 {
        let job = service.get_job_status(job_id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not finish");
}

#[test]
fn test_scenario_a_single_device_month() {
    let records: Vec<UsageRecord> = (0..30)
        .map(|i| UsageRecord::new(day(i), "d1", 5.0))
        .collect();
    let agg = aggregate_usage(&records, &TariffSchedule::flat(0.23), TrendInterval::Day);

    assert!((agg.total_energy - 150.0).abs() < 1e-9);
    assert!((agg.total_cost - 34.5).abs() < 1e-9);
    assert_eq!(agg.devices.len(), 1);
    assert!((agg.devices[0].percentage - 100.0).abs() < 1e-9);
}

#[test]
fn test_scenario_b_two_devices_sorted() {
    let records = vec![
        UsageRecord::new(day(0), "b", 20.0),
        UsageRecord::new(day(1), "a", 50.0),
        UsageRecord::new(day(2), "a", 30.0),
    ];
    let agg = aggregate_usage(&records, &TariffSchedule::default(), TrendInterval::Day);

    assert_eq!(agg.devices[0].key, "a");
    assert!((agg.devices[0].percentage - 80.0).abs() < 1e-9);
    assert_eq!(agg.devices[1].key, "b");
    assert!((agg.devices[1].percentage - 20.0).abs() < 1e-9);
}

#[test]
fn test_scenario_c_anomaly_record_floor() {
    let mut records: Vec<UsageRecord> = (0..9)
        .map(|i| UsageRecord::new(day(i), "d1", 4.0))
        .collect();
    let config = AnomalyConfig::default();

    let result = detect_anomalies(&records, &config);
    assert!(result.is_empty());
    assert!(matches!(result.status, AnalysisStatus::InsufficientData { .. }));
    assert!(result.message().is_some());

    records.push(UsageRecord::new(day(9), "d1", 40.0));
    let result = detect_anomalies(&records, &config);
    assert_eq!(result.status, AnalysisStatus::Computed);
}

#[tokio::test]
async fn test_scenario_d_reversed_range_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(dir.path(), FileUsageSource::from_records(month_of_rows("d1")));

    let request = ReportRequest::new("u1", "Bad range", "pdf").with_range(
        NaiveDate::from_ymd_opt(2024, 2, 1),
        NaiveDate::from_ymd_opt(2024, 1, 1),
    );
    let err = service.submit_report_job(request).await.unwrap_err();

    assert!(matches!(err, ReportError::InvalidInput(_)));
    assert!(service.list_jobs("u1").unwrap().is_empty());
}

#[tokio::test]
async fn test_scenario_e_empty_range_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(dir.path(), FileUsageSource::from_records(month_of_rows("d1")));

    let request = ReportRequest::new("u1", "June", "csv").with_range(
        NaiveDate::from_ymd_opt(2024, 6, 1),
        NaiveDate::from_ymd_opt(2024, 6, 30),
    );
    let job_id = service.submit_report_job(request).await.unwrap();
    let job = wait_for_terminal(&service, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("No energy data found"));
    assert!(job.file_path.is_none());
    assert!(job.completed.is_some());
}

#[tokio::test]
async fn test_submitted_pdf_job_completes() {
    let dir = tempfile::tempdir().unwrap();
    let mut rows = month_of_rows("ac");
    rows.extend(month_of_rows("fridge"));
    rows[12].energy_consumed = Some(80.0);
    let source = FileUsageSource::from_records(rows)
        .with_ownership("u1", vec!["ac".into(), "fridge".into()]);
    let service = service_with(dir.path(), source);

    let job_id = service
        .submit_report_job(ReportRequest::new("u1", "January usage", "pdf"))
        .await
        .unwrap();
    let job = wait_for_terminal(&service, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    let path = job.file_path.unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("january_usage_"));
    assert!(std::fs::read(&path).unwrap().starts_with(b"%PDF"));

    // Terminal jobs cannot be restarted.
    assert!(matches!(service.start(&job_id), Err(ReportError::Concurrency { .. })));
}

#[tokio::test]
async fn test_user_without_devices_fails_with_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let source = FileUsageSource::from_records(month_of_rows("d1"))
        .with_ownership("owner", vec!["d1".into()]);
    let service = service_with(dir.path(), source);

    let job = service
        .generate_report(ReportRequest::new("stranger", "Nothing", "csv"))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(NO_DATA_MESSAGE));
}

#[tokio::test]
async fn test_malformed_record_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let mut rows = month_of_rows("d1");
    rows.push(raw("yesterday-ish", "d1", 1.0));
    let service = service_with(dir.path(), FileUsageSource::from_records(rows));

    let job = service
        .generate_report(ReportRequest::new("u1", "Broken", "csv"))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("record 30"));
}

#[tokio::test]
async fn test_jobs_listed_newest_first_and_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(dir.path(), FileUsageSource::from_records(month_of_rows("d1")));

    let first = service
        .generate_report(ReportRequest::new("u1", "First", "csv"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = service
        .generate_report(ReportRequest::new("u1", "Second", "csv"))
        .await
        .unwrap();

    let ids: Vec<String> = service
        .list_jobs("u1")
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);

    assert!(service.delete_job(&first.id).unwrap());
    assert!(matches!(service.get_job_status(&first.id), Err(ReportError::NotFound(_))));
    // The report file outlives its job record.
    assert!(first.file_path.unwrap().exists());
}

#[tokio::test]
async fn test_caller_supplied_job_id_must_be_unique() {
    let dir = tempfile::tempdir().unwrap();
    let service = service_with(dir.path(), FileUsageSource::from_records(month_of_rows("d1")));

    let mut request = ReportRequest::new("u1", "Mine", "csv");
    request.job_id = Some("job-42".to_string());
    let id = service.submit_report_job(request.clone()).await.unwrap();
    assert_eq!(id, "job-42");

    assert!(matches!(
        service.submit_report_job(request).await,
        Err(ReportError::InvalidInput(_))
    ));
    wait_for_terminal(&service, "job-42").await;
}

#[tokio::test]
async fn test_report_from_http_source() {
    let mut server = mockito::Server::new_async().await;
    let rows: Vec<serde_json::Value> = (0..20)
        .map(|i| {
            serde_json::json!({
                "timestamp": day(i).format("%Y-%m-%dT%H:%M:%S").to_string(),
                "energy_consumed": 3.0,
                "location": "Office"
            })
        })
        .collect();

    server
        .mock("GET", "/api/devices")
        .match_query(mockito::Matcher::UrlEncoded("user_id".into(), "u1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id": "pc"}]"#)
        .create_async()
        .await;
    server
        .mock("GET", "/api/energy")
        .match_query(mockito::Matcher::UrlEncoded("device_id".into(), "pc".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::to_string(&rows).unwrap())
        .create_async()
        .await;
    server
        .mock("GET", "/api/users/u1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"email": "ops@example.com"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let http = Box::new(energy_report::fetch::BasicClient::new());
    let api = Arc::new(SmartHomeClient::new(&server.url(), http).unwrap());
    let config = ReportConfig {
        output_dir: dir.path().to_path_buf(),
        ..ReportConfig::default()
    };
    let service = ReportService::new(
        config,
        Arc::new(SqliteJobStore::in_memory().unwrap()),
        api.clone(),
        api,
    )
    .unwrap();

    let job = service
        .generate_report(ReportRequest::new("u1", "Office", "csv"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);

    let text = std::fs::read_to_string(job.file_path.unwrap()).unwrap();
    assert!(text.contains("user,ops@example.com"));
    assert!(text.contains("total_energy_kwh,60.0000"));
    assert!(text.contains("Office"));
}

#[tokio::test]
async fn test_render_failure_fails_job_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("reports");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let service = service_with(&blocker, FileUsageSource::from_records(month_of_rows("d1")));

    let job = service
        .generate_report(ReportRequest::new("u1", "Blocked", "pdf"))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.file_path.is_none());
    assert!(job.completed.is_some());
    let message = job.error_message.unwrap();
    assert!(message.contains("report rendering failed"), "{message}");

    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("reports")]);
    assert_eq!(std::fs::read(&blocker).unwrap(), b"not a directory");
}

#[tokio::test]
async fn test_report_names_recipient_from_profile() {
    let dir = tempfile::tempdir().unwrap();
    let source = FileUsageSource::from_records(month_of_rows("d1")).with_profile(
        "u1",
        UserProfile {
            email: Some("sam@example.com".to_string()),
            display_name: Some("Sam".to_string()),
        },
    );
    let service = service_with(dir.path(), source);

    let job = service
        .generate_report(ReportRequest::new("u1", "Profile", "csv"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);

    let text = std::fs::read_to_string(job.file_path.unwrap()).unwrap();
    assert!(text.contains("Sam <sam@example.com>"), "{text}");
}

#[test]
fn test_normalize_sorts_and_defaults() {
    let rows = vec![
        RawUsageRecord {
            timestamp: Some("2024-01-02T00:00:00".to_string()),
            device_id: Some("a".to_string()),
            energy_consumed: None,
            location: None,
        },
        raw("2024-01-01T00:00:00", "a", -3.0),
    ];
    let records = normalize(rows).unwrap();

    assert_eq!(
        records[0].timestamp,
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    );
    assert_eq!(records[0].energy_consumed, 0.0);
    assert_eq!(records[1].energy_consumed, 0.0);
    assert_eq!(records[1].location, "Unknown");
}
