//! Downloads the result bundle of a finished task.

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::{
    download::{safe_join, save_stream, Expected},
    error::{DownloadError, Result},
};

use super::{
    client::{BundleFile, TaskApi},
    task::DownloadTask,
};

/// Bundle entry with its destination class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub file_id: String,
    pub file_name: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
    pub is_primary: bool,
}

impl ResultFile {
    pub fn classify(file: BundleFile, extension: &str) -> Self {
        ResultFile {
            is_primary: is_primary(&file.file_name, extension),
            file_id: file.file_id,
            file_name: file.file_name,
            size: file.file_size,
            sha256: file.sha256,
        }
    }
}

/// Raster files are primary; QC layers, statistics and metadata are not.
pub fn is_primary(file_name: &str, extension: &str) -> bool {
    file_name
        .to_ascii_lowercase()
        .ends_with(&extension.to_ascii_lowercase())
}

/// Where the files of one task end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLayout {
    pub primary: PathBuf,
    pub aux: PathBuf,
}

impl TaskLayout {
    /// `<root>/<product>/<task_id>/<layer>` and its `aux` subdirectory.
    pub fn new(root: &Path, task: &DownloadTask, task_id: &str) -> Self {
        let primary = root
            .join(&task.product)
            .join(task_id)
            .join(&task.parameter);
        let aux = primary.join("aux");

        TaskLayout { primary, aux }
    }

    pub fn dir_for(&self, file: &ResultFile) -> &Path {
        if file.is_primary {
            &self.primary
        } else {
            &self.aux
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub primary: usize,
    pub aux: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Lists the bundle of a done task and streams each file to disk.
///
/// With `keep_aux` unset, auxiliary files are counted as skipped and never
/// requested.
pub async fn fetch_results(
    api: &dyn TaskApi,
    task: &DownloadTask,
    root: &Path,
    keep_aux: bool,
    progress_bar: &ProgressBar,
) -> Result<FetchSummary> {
    let task_id = task.remote_id.as_deref().ok_or_else(|| {
        DownloadError::InvalidResponse(format!("task `{}` has no remote id", task.task_name))
    })?;

    let layout = TaskLayout::new(root, task, task_id);
    let extension = task.format.extension();
    let files: Vec<ResultFile> = api
        .bundle(task_id)
        .await?
        .into_iter()
        .map(|f| ResultFile::classify(f, extension))
        .collect();
    info!(task = %task.task_name, files = files.len(), "bundle ready");

    let mut summary = FetchSummary::default();

    for file in files {
        if !file.is_primary && !keep_aux {
            debug!(file = %file.file_name, "skipping auxiliary file");
            summary.skipped += 1;
            continue;
        }

        let dest = safe_join(layout.dir_for(&file), &file.file_name)?;
        let expected = Expected {
            size: file.size,
            sha256: file.sha256.clone(),
        };

        progress_bar.set_message(file.file_name.clone());
        progress_bar.set_position(0);

        let stream = api.download(task_id, &file.file_id).await?;
        let bytes = save_stream(stream, &dest, &expected, progress_bar).await?;
        info!(path = %dest.display(), bytes, "saved");

        summary.bytes += bytes;
        if file.is_primary {
            summary.primary += 1;
        } else {
            summary.aux += 1;
        }
    }

    Ok(summary)
}

// -- Tests -------------------------------------------------------------------
