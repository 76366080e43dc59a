//! Runs a batch of area tasks from submission to files on disk.
//!
//! Submission is sequential. Each submitted task is then polled and fetched
//! by its own pipeline, with at most `workers` pipelines in flight. A task
//! is moved into exactly one pipeline, so no two pollers touch it. Failures
//! are recorded per task in the [`BatchReport`]; they never abort the batch.

use std::{cell::Cell, collections::HashMap, path::PathBuf};

use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use tracing::{error, info, warn};

use crate::{
    error::{DownloadError, Result},
    poll::{poll_until_done, JobState, PollPolicy, Sleeper},
};

use super::{
    client::{job_state, RemoteTask, TaskApi},
    fetch::{fetch_results, FetchSummary},
    task::{DownloadTask, TaskStatus},
};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_root: PathBuf,
    pub poll: PollPolicy,
    pub workers: usize,
    pub keep_aux: bool,
    /// Reuse remote tasks whose name matches instead of resubmitting.
    pub reuse_existing: bool,
}

/// Final state of one task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_name: String,
    pub remote_id: Option<String>,
    pub status: TaskStatus,
    /// Last state reported by the remote queue while polling.
    pub last_polled: Option<JobState>,
    pub result: Result<FetchSummary>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Logs every failed task, then the totals.
    pub fn log_summary(&self) {
        for outcome in self.failed() {
            if let Err(e) = &outcome.result {
                error!(
                    task = %outcome.task_name,
                    remote_id = outcome.remote_id.as_deref().unwrap_or("-"),
                    status = %outcome.status,
                    last_polled = ?outcome.last_polled,
                    "task failed: {}",
                    e
                );
            }
        }

        let mut total = FetchSummary::default();
        for summary in self.succeeded().filter_map(|o| o.result.as_ref().ok()) {
            total.primary += summary.primary;
            total.aux += summary.aux;
            total.skipped += summary.skipped;
            total.bytes += summary.bytes;
        }
        info!(
            succeeded = self.succeeded().count(),
            failed = self.failed().count(),
            primary = total.primary,
            aux = total.aux,
            skipped_aux = total.skipped,
            bytes = total.bytes,
            "batch finished"
        );
    }
}

type ProgressFactory<'a> = Box<dyn Fn(&str) -> ProgressBar + 'a>;

pub struct BatchDownloader<'a> {
    api: &'a dyn TaskApi,
    sleeper: &'a dyn Sleeper,
    options: BatchOptions,
    progress: Option<ProgressFactory<'a>>,
}

impl<'a> BatchDownloader<'a> {
    pub fn new(api: &'a dyn TaskApi, sleeper: &'a dyn Sleeper, options: BatchOptions) -> Self {
        BatchDownloader {
            api,
            sleeper,
            options,
            progress: None,
        }
    }

    /// Shows the bar built by `progress` for each task being fetched.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&str) -> ProgressBar + 'a,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    pub async fn run(&self, tasks: Vec<DownloadTask>) -> BatchReport {
        let (submitted, mut outcomes) = self.submit_all(tasks).await;
        info!(submitted = submitted.len(), rejected = outcomes.len(), "submission finished");

        let completed: Vec<TaskOutcome> = stream::iter(submitted)
            .map(|task| self.complete(task))
            .buffer_unordered(self.options.workers.max(1))
            .collect()
            .await;

        outcomes.extend(completed);
        outcomes.sort_by(|a, b| a.task_name.cmp(&b.task_name));

        BatchReport { outcomes }
    }

    /// Submits every task, reusing remote tasks with the same name.
    ///
    /// Returns the tasks now known remotely, and outcomes for the rejected.
    pub async fn submit_all(
        &self,
        tasks: Vec<DownloadTask>,
    ) -> (Vec<DownloadTask>, Vec<TaskOutcome>) {
        let existing = if self.options.reuse_existing {
            self.existing_tasks().await
        } else {
            HashMap::new()
        };

        let mut submitted = Vec::with_capacity(tasks.len());
        let mut rejected = Vec::new();

        for mut task in tasks {
            if let Some(remote) = existing.get(&task.task_name) {
                info!(task = %task.task_name, remote_id = %remote.task_id, "reusing remote task");
                task.remote_id = Some(remote.task_id.clone());
                task.status = match job_state(&remote.status) {
                    JobState::Done => TaskStatus::Done,
                    JobState::Running => TaskStatus::Running,
                    _ => TaskStatus::Submitted,
                };
                submitted.push(task);
                continue;
            }

            match self.api.submit(&task).await {
                Ok(remote_id) => {
                    info!(task = %task.task_name, %remote_id, "submitted");
                    task.remote_id = Some(remote_id);
                    task.status = TaskStatus::Submitted;
                    submitted.push(task);
                }
                Err(e) => {
                    warn!(task = %task.task_name, "submission failed: {}", e);
                    task.status = TaskStatus::Failed;
                    rejected.push(TaskOutcome {
                        task_name: task.task_name,
                        remote_id: None,
                        status: task.status,
                        last_polled: None,
                        result: Err(e),
                    });
                }
            }
        }

        (submitted, rejected)
    }

    async fn existing_tasks(&self) -> HashMap<String, RemoteTask> {
        match self.api.list_tasks().await {
            Ok(remote) => {
                let mut by_name = HashMap::new();
                for task in remote {
                    if matches!(job_state(&task.status), JobState::Failed(_)) {
                        continue;
                    }
                    by_name.entry(task.task_name.clone()).or_insert(task);
                }
                by_name
            }
            Err(e) => {
                warn!("cannot list existing remote tasks, submitting all: {}", e);
                HashMap::new()
            }
        }
    }

    /// Polls a submitted task until done, then fetches its files.
    async fn complete(&self, mut task: DownloadTask) -> TaskOutcome {
        let polled = Cell::new(None);
        let result = self.poll_and_fetch(&mut task, &polled).await;

        task.status = match &result {
            Ok(_) => TaskStatus::Done,
            Err(DownloadError::Stalled { .. }) => TaskStatus::Stalled,
            Err(_) => TaskStatus::Failed,
        };

        TaskOutcome {
            task_name: task.task_name,
            remote_id: task.remote_id,
            status: task.status,
            last_polled: polled.take(),
            result,
        }
    }

    async fn poll_and_fetch(
        &self,
        task: &mut DownloadTask,
        polled: &Cell<Option<JobState>>,
    ) -> Result<FetchSummary> {
        let task_id = task.remote_id.clone().ok_or_else(|| {
            DownloadError::InvalidResponse(format!("task `{}` was never submitted", task.task_name))
        })?;

        if task.status != TaskStatus::Done {
            let api = self.api;
            let id = task_id.as_str();
            let outcome = poll_until_done(id, &self.options.poll, self.sleeper, || async move {
                let state = api.status(id).await?;
                polled.set(Some(state.clone()));
                Ok(state)
            })
            .await?;
            info!(
                task = %task.task_name,
                checks = outcome.attempts,
                waits = outcome.waits,
                "task done"
            );
            task.status = TaskStatus::Done;
        }

        let progress_bar = self.progress_bar(&task.task_name);
        let summary = fetch_results(
            self.api,
            task,
            &self.options.output_root,
            self.options.keep_aux,
            &progress_bar,
        )
        .await;
        progress_bar.finish_and_clear();

        summary
    }

    fn progress_bar(&self, task_name: &str) -> ProgressBar {
        match &self.progress {
            Some(progress) => progress(task_name),
            None => ProgressBar::hidden(),
        }
    }
}

// -- Tests -------------------------------------------------------------------
