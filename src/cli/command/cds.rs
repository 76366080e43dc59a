//! Monthly ERA5-Land files from the Climate Data Store.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::error;

use crate::{
    cds::{download_period, CdsClient, PeriodOptions},
    cli::{create_progress_bar, CdsArgs},
    config::{CredentialsProvider, CDS_PORTAL},
    error::DownloadError,
    period::months,
    poll::TokioSleeper,
    retry::RetryPolicy,
};

use super::{output_root, resolve_area};

pub async fn cds(args: &CdsArgs, credentials: &dyn CredentialsProvider) -> Result<String> {
    let bbox = resolve_area(&args.common)?;
    let root = output_root(&args.common)?;
    let months = months(args.start, args.end)?;

    let login = credentials.credentials(CDS_PORTAL)?;
    let client = CdsClient::new(
        &args.api_url,
        &login,
        RetryPolicy::default(),
        args.common.poll_policy(),
        Arc::new(TokioSleeper),
    )?;
    let options = PeriodOptions {
        workers: args.workers,
        overwrite: args.overwrite,
    };

    let mut failures = 0;
    for dataset in &args.datasets {
        let bar = create_progress_bar(0, format!("Retrieving {}...", dataset));
        let result = download_period(
            &client,
            dataset,
            &args.variables,
            &months,
            &bbox,
            &root,
            &options,
            &bar,
        )
        .await;

        match result {
            Ok(report) => {
                bar.finish_with_message(format!("{} retrieved", dataset));
                report.log_summary();
                failures += report.failed().count();
            }
            Err(e @ DownloadError::UnknownProduct(_)) => {
                bar.abandon_with_message(format!("{} skipped", dataset));
                error!("{}", e);
                failures += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} retrievals failed", failures));
    }

    Ok(root.to_string_lossy().to_string())
}
