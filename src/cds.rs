//! ERA5-Land hourly reanalysis through the Climate Data Store.
//!
//! One retrieval per (variable, month); each writes
//! `<root>/<product>/<variable>/{YYYY}{MM}_{variable}.nc`.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    config::{Credentials, CDS_PORTAL},
    download::{response_stream, save_stream, Expected},
    error::{DownloadError, Result},
    geo::BoundingBox,
    period::YearMonth,
    poll::{poll_until_done, JobState, PollPolicy, Sleeper},
    retry::{self, create_json, http_client, normalise_base_url, RetryPolicy},
};

pub const DEFAULT_API_URL: &str = "https://cds.climate.copernicus.eu/api/";
pub const DEFAULT_WORKERS: usize = 5;
pub const MAX_WORKERS: usize = 16;

/// Remote dataset behind a user-facing product name.
pub fn dataset_id(product: &str) -> Result<&'static str> {
    match product {
        "ERA5-land" => Ok("reanalysis-era5-land"),
        other => Err(DownloadError::UnknownProduct(other.to_string())),
    }
}

/// A full month of hourly values for one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdsRequest {
    #[serde(skip)]
    pub dataset: String,
    pub variable: Vec<String>,
    pub year: Vec<String>,
    pub month: Vec<String>,
    pub day: Vec<String>,
    pub time: Vec<String>,
    pub area: [f64; 4],
    pub data_format: &'static str,
    pub download_format: &'static str,
}

impl CdsRequest {
    pub fn month(dataset: &str, variable: &str, month: YearMonth, bbox: &BoundingBox) -> Self {
        CdsRequest {
            dataset: dataset.to_string(),
            variable: vec![variable.to_string()],
            year: vec![format!("{:04}", month.year)],
            month: vec![format!("{:02}", month.month)],
            day: (1..=31).map(|d| format!("{:02}", d)).collect(),
            time: (0..24).map(|h| format!("{:02}:00", h)).collect(),
            area: bbox.to_cds_area(),
            data_format: "netcdf",
            download_format: "unarchived",
        }
    }
}

pub fn output_path(root: &Path, product: &str, variable: &str, month: YearMonth) -> PathBuf {
    root.join(product)
        .join(variable)
        .join(format!("{}_{}.nc", month.compact(), variable))
}

/// Runs a retrieval and saves the resulting file at `dest`.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, request: &CdsRequest, dest: &Path) -> Result<u64>;
}

#[derive(Serialize)]
struct Execution<'a> {
    inputs: &'a CdsRequest,
}

#[derive(Deserialize)]
struct JobResponse {
    #[serde(rename = "jobID")]
    job_id: String,
}

#[derive(Deserialize)]
struct JobStatus {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Deserialize)]
struct AssetValue {
    href: String,
    #[serde(rename = "file:size", default)]
    size: Option<u64>,
}

/// Maps a CDS job status onto [`JobState`].
pub fn job_state(status: &str, message: Option<&str>) -> JobState {
    match status {
        "successful" => JobState::Done,
        "running" => JobState::Running,
        "accepted" => JobState::Queued,
        other => JobState::Failed(match message {
            Some(m) => format!("{}: {}", other, m),
            None => other.to_string(),
        }),
    }
}

/// CDS retrieve API client. Holds one HTTP client and the access token.
pub struct CdsClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
    poll: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl CdsClient {
    pub fn new(
        base_url: &str,
        credentials: &Credentials,
        retry: RetryPolicy,
        poll: PollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        Ok(CdsClient {
            client: http_client(&retry)?,
            base_url: normalise_base_url(base_url),
            token: credentials.password.clone(),
            retry,
            poll,
            sleeper,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("PRIVATE-TOKEN", &self.token)
    }

    async fn job_state(&self, job_id: &str) -> Result<JobState> {
        let url = self.url(&format!("retrieve/v1/jobs/{}", job_id));
        let status: JobStatus =
            retry::send_json(self.retry, || self.authed(self.client.get(&url))).await?;

        Ok(job_state(&status.status, status.message.as_deref()))
    }
}

#[async_trait]
impl Retriever for CdsClient {
    async fn retrieve(&self, request: &CdsRequest, dest: &Path) -> Result<u64> {
        let url = self.url(&format!(
            "retrieve/v1/processes/{}/execution",
            request.dataset
        ));
        let body = Execution { inputs: request };
        let label = format!("{} {:?} {:?}", request.dataset, request.year, request.month);

        // CDS cannot list jobs by request, so a lost answer is not resent.
        let job: JobResponse = create_json(
            self.retry,
            || self.authed(self.client.post(&url)).json(&body),
            |e: &DownloadError| {
                let lost = DownloadError::Submission {
                    task_name: label.clone(),
                    reason: format!("{}; not resent as the job may already exist", e),
                };
                async move { Err(lost) }
            },
        )
        .await
        .map_err(|e| match e {
            DownloadError::Api { status, .. } if status == 401 || status == 403 => {
                DownloadError::Authentication {
                    portal: CDS_PORTAL.to_string(),
                    reason: format!("request rejected with HTTP {}", status),
                }
            }
            DownloadError::Api { status, url } => DownloadError::Submission {
                task_name: label.clone(),
                reason: format!("HTTP {} from {}", status, url),
            },
            other => other,
        })?;
        info!(job_id = %job.job_id, dest = %dest.display(), "CDS job accepted");

        let id = job.job_id.as_str();
        poll_until_done(id, &self.poll, self.sleeper.as_ref(), || self.job_state(id)).await?;

        let url = self.url(&format!("retrieve/v1/jobs/{}/results", job.job_id));
        let results: JobResults =
            retry::send_json(self.retry, || self.authed(self.client.get(&url))).await?;

        let href = results.asset.value.href;
        let response = retry::send(self.retry, || self.client.get(&href)).await?;
        let expected = Expected {
            size: results.asset.value.size,
            sha256: None,
        };

        save_stream(
            response_stream(response),
            dest,
            &expected,
            &ProgressBar::hidden(),
        )
        .await
    }
}

#[derive(Debug, Clone)]
pub struct PeriodOptions {
    pub workers: usize,
    pub overwrite: bool,
}

#[derive(Debug)]
pub struct MonthOutcome {
    pub path: PathBuf,
    pub result: Result<u64>,
}

#[derive(Debug, Default)]
pub struct PeriodReport {
    pub outcomes: Vec<MonthOutcome>,
    pub skipped: usize,
}

impl PeriodReport {
    pub fn failed(&self) -> impl Iterator<Item = &MonthOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn log_summary(&self) {
        for outcome in self.failed() {
            if let Err(e) = &outcome.result {
                error!(path = %outcome.path.display(), "retrieval failed: {}", e);
            }
        }
        info!(
            retrieved = self.outcomes.len() - self.failed().count(),
            failed = self.failed().count(),
            skipped = self.skipped,
            "period finished"
        );
    }
}

/// Retrieves every (variable, month) of `product` over `bbox`.
///
/// Fails before any request with [`DownloadError::UnknownProduct`]; other
/// failures are recorded per month in the report.
#[allow(clippy::too_many_arguments)]
pub async fn download_period(
    retriever: &dyn Retriever,
    product: &str,
    variables: &[String],
    months: &[YearMonth],
    bbox: &BoundingBox,
    root: &Path,
    options: &PeriodOptions,
    progress_bar: &ProgressBar,
) -> Result<PeriodReport> {
    let dataset = dataset_id(product)?;
    let mut report = PeriodReport::default();
    let mut jobs = Vec::new();

    for variable in variables {
        for &month in months {
            let path = output_path(root, product, variable, month);
            if path.exists() && !options.overwrite {
                info!(path = %path.display(), "already downloaded, skipping");
                report.skipped += 1;
                continue;
            }
            jobs.push((CdsRequest::month(dataset, variable, month, bbox), path));
        }
    }

    progress_bar.set_length(jobs.len() as u64);
    let workers = options.workers.clamp(1, MAX_WORKERS);

    report.outcomes = stream::iter(jobs)
        .map(|(request, path)| async move {
            info!(
                variable = %request.variable[0],
                year = %request.year[0],
                month = %request.month[0],
                "requesting"
            );
            let result = retriever.retrieve(&request, &path).await;
            progress_bar.inc(1);
            MonthOutcome { path, result }
        })
        .buffer_unordered(workers)
        .collect()
        .await;
    report.outcomes.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(report)
}

// -- Tests -------------------------------------------------------------------
