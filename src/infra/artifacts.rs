//! Publishing rendered reports to S3.

use anyhow::{Result, bail};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::jobs::{JobStatus, ReportJob};
use crate::render::ReportFormat;

/// Object key for a report file: `reports/user_id=<user>/<file>[.gz]`.
pub fn artifact_key(user_id: &str, file_name: &str, gzip: bool) -> String {
    let suffix = if gzip { ".gz" } else { "" };
    format!("reports/user_id={user_id}/{file_name}{suffix}")
}

fn content_type(format: ReportFormat) -> &'static str {
    match format {
        ReportFormat::Pdf => "application/pdf",
        ReportFormat::Csv => "text/csv",
    }
}

pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Uploads a completed job's report and returns the object key.
#[tracing::instrument(skip(client, job), fields(job_id = %job.id))]
pub async fn publish_artifact(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    job: &ReportJob,
    gzip: bool,
) -> Result<String> {
    if job.status != JobStatus::Completed {
        bail!("job {} is {}, only completed reports can be published", job.id, job.status);
    }
    let Some(path) = job.file_path.as_deref() else {
        bail!("job {} has no report file", job.id);
    };
    let Some(file_name) = Path::new(path).file_name().and_then(|n| n.to_str()) else {
        bail!("report path {} has no file name", path.display());
    };

    let contents = std::fs::read(path)?;
    let original_len = contents.len();
    let body = if gzip { gzip_bytes(&contents)? } else { contents };
    let key = artifact_key(&job.user_id, file_name, gzip);

    let mut request = client
        .put_object()
        .bucket(bucket)
        .key(&key)
        .content_type(content_type(job.format))
        .body(ByteStream::from(Bytes::from(body)));
    if gzip {
        request = request.content_encoding("gzip");
    }
    request.send().await?;

    info!(bucket, key = %key, bytes = original_len, gzip, "Report published");
    Ok(key)
}
