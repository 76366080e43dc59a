//! AppEEARS task API.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    config::{Credentials, APPEEARS_PORTAL},
    download::{response_stream, ByteStream},
    error::{DownloadError, Result},
    poll::JobState,
    retry::{self, create_json, http_client, normalise_base_url, RetryPolicy},
};

use super::task::DownloadTask;

pub const DEFAULT_API_URL: &str = "https://appeears.earthdatacloud.nasa.gov/api/";

/// A task already known to the remote queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTask {
    pub task_id: String,
    pub task_name: String,
    pub status: String,
}

/// One entry of a result bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BundleFile {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Operations of the remote job queue used by the batch downloader.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Tasks previously submitted by this user.
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>>;

    /// Submits the job description and returns the remote task id.
    async fn submit(&self, task: &DownloadTask) -> Result<String>;

    async fn status(&self, task_id: &str) -> Result<JobState>;

    async fn bundle(&self, task_id: &str) -> Result<Vec<BundleFile>>;

    async fn download(&self, task_id: &str, file_id: &str) -> Result<ByteStream>;
}

/// Maps an AppEEARS status string onto [`JobState`].
pub fn job_state(status: &str) -> JobState {
    match status {
        "done" => JobState::Done,
        "processing" | "running" => JobState::Running,
        "pending" | "queued" => JobState::Queued,
        other => JobState::Failed(format!("remote status `{}`", other)),
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct BundleResponse {
    files: Vec<BundleFile>,
}

/// Authenticated connection to AppEEARS.
///
/// Logs in once on creation; the bearer token is reused for every call until
/// [`AppeearsSession::logout`].
pub struct AppeearsSession {
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

impl AppeearsSession {
    pub async fn login(
        base_url: &str,
        credentials: &Credentials,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = http_client(&retry)?;
        let base_url = normalise_base_url(base_url);
        let url = format!("{}login", base_url);

        let response: LoginResponse = retry::send_json(retry, || {
            client
                .post(&url)
                .basic_auth(&credentials.username, Some(&credentials.password))
        })
        .await
        .map_err(|e| match e {
            DownloadError::Api { status, .. } if (400..500).contains(&status) => {
                DownloadError::Authentication {
                    portal: APPEEARS_PORTAL.to_string(),
                    reason: format!("login rejected with HTTP {}", status),
                }
            }
            other => other,
        })?;
        info!(user = %credentials.username, "logged in to AppEEARS");

        Ok(AppeearsSession {
            client,
            base_url,
            token: response.token,
            retry,
        })
    }

    /// Invalidates the bearer token.
    pub async fn logout(self) -> Result<()> {
        let url = self.url("logout");
        retry::send(self.retry, || self.client.post(&url).bearer_auth(&self.token)).await?;
        debug!("logged out of AppEEARS");

        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        retry::send_json(self.retry, || self.client.get(&url).bearer_auth(&self.token)).await
    }

    /// Id of a live remote task called `task_name`, if any.
    async fn find_task(&self, task_name: &str) -> Result<Option<SubmitResponse>> {
        let found = self
            .list_tasks()
            .await?
            .into_iter()
            .find(|t| {
                t.task_name == task_name && !matches!(job_state(&t.status), JobState::Failed(_))
            })
            .map(|t| SubmitResponse { task_id: t.task_id });

        Ok(found)
    }
}

#[async_trait]
impl TaskApi for AppeearsSession {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>> {
        self.get_json("task").await
    }

    async fn submit(&self, task: &DownloadTask) -> Result<String> {
        let url = self.url("task");
        let body = task.request();

        let response: SubmitResponse = create_json(
            self.retry,
            || self.client.post(&url).bearer_auth(&self.token).json(&body),
            |_| self.find_task(&task.task_name),
        )
        .await
        .map_err(|e| DownloadError::Submission {
            task_name: task.task_name.clone(),
            reason: e.to_string(),
        })?;

        Ok(response.task_id)
    }

    async fn status(&self, task_id: &str) -> Result<JobState> {
        let response: StatusResponse = self.get_json(&format!("task/{}", task_id)).await?;
        Ok(job_state(&response.status))
    }

    async fn bundle(&self, task_id: &str) -> Result<Vec<BundleFile>> {
        let response: BundleResponse = self.get_json(&format!("bundle/{}", task_id)).await?;
        Ok(response.files)
    }

    async fn download(&self, task_id: &str, file_id: &str) -> Result<ByteStream> {
        let url = self.url(&format!("bundle/{}/{}", task_id, file_id));
        let response =
            retry::send(self.retry, || self.client.get(&url).bearer_auth(&self.token)).await?;

        Ok(response_stream(response))
    }
}

// -- Tests -------------------------------------------------------------------
