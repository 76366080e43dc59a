//! Bulk download of AppEEARS area tasks.

use anyhow::{anyhow, Context, Result};
use indicatif::MultiProgress;
use tracing::{info, warn};

use crate::{
    appeears::{build_tasks, AppeearsSession, BatchDownloader, BatchOptions},
    cli::{create_spinner, AppeearsArgs},
    config::{CredentialsProvider, APPEEARS_PORTAL},
    period::DateRange,
    poll::TokioSleeper,
    retry::RetryPolicy,
};

use super::{output_root, resolve_area};

pub async fn appeears(args: &AppeearsArgs, credentials: &dyn CredentialsProvider) -> Result<String> {
    let bbox = resolve_area(&args.common)?;
    let root = output_root(&args.common)?;
    let range = DateRange::new(args.start, args.end)?;

    let tasks = build_tasks(
        &args.product,
        &args.layers,
        &range,
        args.max_days,
        &bbox,
        args.format,
    )?;
    info!(
        product = %args.product,
        period = %range,
        days = range.days(),
        area = %bbox,
        tasks = tasks.len(),
        "tasks prepared"
    );

    let login = credentials.credentials(APPEEARS_PORTAL)?;
    let session = AppeearsSession::login(&args.api_url, &login, RetryPolicy::default())
        .await
        .context("Cannot open AppEEARS session")?;

    let options = BatchOptions {
        output_root: root.clone(),
        poll: args.common.poll_policy(),
        workers: args.workers,
        keep_aux: !args.skip_aux,
        reuse_existing: !args.no_reuse,
    };
    let progress = MultiProgress::new();
    let report = BatchDownloader::new(&session, &TokioSleeper, options)
        .with_progress(|task_name| {
            progress.add(create_spinner(format!("Fetching {}...", task_name)))
        })
        .run(tasks)
        .await;
    report.log_summary();

    if let Err(e) = session.logout().await {
        warn!("logout failed: {}", e);
    }

    if !report.is_success() {
        return Err(anyhow!(
            "{} of {} tasks failed",
            report.failed().count(),
            report.outcomes.len()
        ));
    }

    Ok(root.join(&args.product).to_string_lossy().to_string())
}
