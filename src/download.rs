//! Streams remote files to disk.
//!
//! Bytes are written to a temporary file next to the destination and the
//! file is renamed into place only once the stream has ended and matches the
//! expected size and checksum. A failed transfer never leaves a truncated
//! file under the final name.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use futures::{stream::BoxStream, Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{DownloadError, Result};

/// Chunked body of a remote file.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// What the manifest says the file should look like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected {
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

/// Converts a response body into a [`ByteStream`].
pub fn response_stream(response: reqwest::Response) -> ByteStream {
    response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(DownloadError::from))
        .boxed()
}

/// Writes `stream` to `dest`, returning the number of bytes written.
pub async fn save_stream<S>(
    mut stream: S,
    dest: &Path,
    expected: &Expected,
    progress_bar: &ProgressBar,
) -> Result<u64>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    if let Some(total_size) = expected.size.filter(|s| *s > 0) {
        progress_bar.set_length(total_size);
        progress_bar.set_style(byte_style());
    }

    let partial = |reason: String| DownloadError::PartialDownload {
        path: dest.to_path_buf(),
        reason,
    };

    // Dropping `file` on any early return deletes the temporary.
    let mut file = NamedTempFile::new_in(dir)?;
    let mut hasher = Sha256::new();
    let mut downloaded = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| partial(format!("stream interrupted: {}", e)))?;
        file.write_all(&chunk)?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
        progress_bar.set_position(downloaded);
    }
    file.flush()?;

    if let Some(size) = expected.size {
        if size != downloaded {
            return Err(partial(format!(
                "expected {} bytes, received {}",
                size, downloaded
            )));
        }
    }

    if let Some(sha256) = &expected.sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(sha256) {
            return Err(partial(format!(
                "sha256 mismatch: expected {}, got {}",
                sha256, actual
            )));
        }
    }

    file.persist(dest).map_err(|e| DownloadError::Io(e.error))?;
    debug!(path = %dest.display(), bytes = downloaded, "file saved");

    Ok(downloaded)
}

/// Joins the final segment of a remote file name onto `dir`.
///
/// Remote names may carry a directory prefix (`bundle/file.tif`); only the
/// last segment is kept and anything that could escape `dir` is refused.
pub fn safe_join(dir: &Path, remote_name: &str) -> Result<PathBuf> {
    let name = remote_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(DownloadError::InvalidResponse(format!(
            "unusable file name `{}`",
            remote_name
        )));
    }

    Ok(dir.join(name))
}

fn byte_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {eta}",
    )
    .map(|style| style.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use tempfile::TempDir;

    use super::*;
    use crate::retry::{
        http_client, send,
        test::{quick_policy, Reply, StubServer},
    };

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Vec<u8>>> + Unpin {
        stream::iter(parts.iter().map(|p| Ok(p.to_vec())).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn should_write_stream_to_destination() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("nested").join("out.tif");
        let pb = ProgressBar::hidden();

        let written = save_stream(chunks(&[b"abc", b"def"]), &dest, &Expected::default(), &pb)
            .await
            .unwrap();

        assert_eq!(written, 6);
        assert_eq!(fs::read(&dest).unwrap(), b"abcdef");
        assert_eq!(pb.position(), 6);
    }

    #[tokio::test]
    async fn should_verify_size_and_checksum() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.csv");
        let expected = Expected {
            size: Some(3),
            sha256: Some(format!("{:x}", Sha256::digest(b"abc"))),
        };

        save_stream(chunks(&[b"a", b"bc"]), &dest, &expected, &ProgressBar::hidden())
            .await
            .unwrap();

        assert!(dest.exists());
    }

    #[tokio::test]
    async fn should_not_leave_file_on_size_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.tif");
        let expected = Expected {
            size: Some(10),
            sha256: None,
        };

        let result = save_stream(chunks(&[b"abc"]), &dest, &expected, &ProgressBar::hidden()).await;

        assert!(matches!(result, Err(DownloadError::PartialDownload { .. })));
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn should_not_leave_file_on_interrupted_stream() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.tif");
        let broken = stream::iter(vec![
            Ok(b"abc".to_vec()),
            Err(DownloadError::InvalidResponse("connection reset".to_string())),
        ]);

        let result = save_stream(broken, &dest, &Expected::default(), &ProgressBar::hidden()).await;

        assert!(matches!(result, Err(DownloadError::PartialDownload { .. })));
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn should_give_up_on_silent_stream() {
        let server = StubServer::start().await;
        server.reply(Reply::Truncated(b"abc".to_vec(), 10));
        let policy = quick_policy();
        let client = http_client(&policy).unwrap();
        let url = format!("{}file.tif", server.url());
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.tif");

        let response = send(policy, || client.get(&url)).await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            save_stream(
                response_stream(response),
                &dest,
                &Expected::default(),
                &ProgressBar::hidden(),
            ),
        )
        .await
        .expect("stalled body was not bounded");

        assert!(matches!(result, Err(DownloadError::PartialDownload { .. })));
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn should_reject_checksum_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.tif");
        let expected = Expected {
            size: None,
            sha256: Some("00".repeat(32)),
        };

        let result = save_stream(chunks(&[b"abc"]), &dest, &expected, &ProgressBar::hidden()).await;

        assert!(matches!(result, Err(DownloadError::PartialDownload { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn should_keep_last_segment_of_remote_name() {
        let dir = Path::new("/data");

        assert_eq!(
            safe_join(dir, "MOD11A1.061_2020001/MOD11A1.061_LST_Day_1km_doy2020001.tif").unwrap(),
            Path::new("/data/MOD11A1.061_LST_Day_1km_doy2020001.tif")
        );
        assert_eq!(
            safe_join(dir, "../../etc/passwd").unwrap(),
            Path::new("/data/passwd")
        );
        assert!(safe_join(dir, "..").is_err());
        assert!(safe_join(dir, "bundle/").is_err());
    }
}
