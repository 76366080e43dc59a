//! Waits for an asynchronous remote job to complete.
//!
//! Status checks are aligned on a fixed cadence: after each check the poller
//! sleeps `interval - (elapsed % interval)`, so time spent inside the status
//! call does not drift the schedule. Polling is bounded by both an attempt
//! count and a wall-clock timeout; exceeding either ends in
//! [`DownloadError::Stalled`].

use std::{
    future::Future,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{DownloadError, Result};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4320;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Remote job state, normalised across APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: DEFAULT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Summary of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub attempts: u32,
    pub waits: u32,
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Time left until the next multiple of `interval` since polling started.
pub fn aligned_wait(interval: Duration, elapsed: Duration) -> Duration {
    let interval_ns = interval.as_nanos();
    if interval_ns == 0 {
        return Duration::ZERO;
    }
    let remainder = elapsed.as_nanos() % interval_ns;

    Duration::from_nanos((interval_ns - remainder) as u64)
}

/// Calls `check` until it reports [`JobState::Done`].
///
/// A [`JobState::Failed`] answer or an error from `check` ends polling
/// immediately. A check still pending when the timeout runs out is
/// abandoned and reported as [`DownloadError::Stalled`].
pub async fn poll_until_done<F, Fut>(
    job_id: &str,
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    mut check: F,
) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobState>>,
{
    let started = Instant::now();
    let mut attempts = 0;
    let mut waits = 0;
    let mut last_state: Option<JobState> = None;

    let stalled = |attempts: u32| DownloadError::Stalled {
        job_id: job_id.to_string(),
        attempts,
        elapsed_secs: started.elapsed().as_secs(),
    };

    loop {
        let remaining = policy.timeout.saturating_sub(started.elapsed());
        attempts += 1;
        let state = match tokio::time::timeout(remaining, check()).await {
            Ok(state) => state?,
            Err(_) => return Err(stalled(attempts)),
        };

        if last_state.as_ref() != Some(&state) {
            info!(job_id, state = ?state, "job state changed");
        }

        match &state {
            JobState::Done => return Ok(PollOutcome { attempts, waits }),
            JobState::Failed(reason) => {
                return Err(DownloadError::JobFailed {
                    job_id: job_id.to_string(),
                    reason: reason.clone(),
                })
            }
            JobState::Queued | JobState::Running => {}
        }

        let elapsed = started.elapsed();
        if attempts >= policy.max_attempts || elapsed >= policy.timeout {
            return Err(stalled(attempts));
        }

        let wait = aligned_wait(policy.interval, elapsed);
        debug!(job_id, attempts, ?wait, "job not ready");
        sleeper.sleep(wait).await;
        waits += 1;
        last_state = Some(state);
    }
}

// -- Tests -------------------------------------------------------------------
