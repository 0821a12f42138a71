use anyhow::bail;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{classify, ErrorClass, FailureReason, NetworkError};
use crate::ytdl::Extractor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }
    /// Conventional folder name under the user's home directory.
    pub fn folder_name(self) -> &'static str {
        match self {
            MediaKind::Audio => "Music",
            MediaKind::Video => "Videos",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = anyhow::Error;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.trim().to_ascii_lowercase().as_str() {
            "audio" | "mp3" => MediaKind::Audio,
            "video" | "mp4" => MediaKind::Video,
            x => bail!("invalid media kind {:?}, expected one of audio, mp3, video, mp4", x),
        })
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistItem {
    pub title: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed(PathBuf),
    /// The output file was already there and non-empty.
    Skipped(PathBuf),
    Failed(PlaylistItem, FailureReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total fetch attempts per item, at least one.
    pub attempts: u32,
    /// Multiplied by the attempt number before the next try.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt`; saturates instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { attempts: 3, backoff: Duration::from_secs(2) }
    }
}

fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Downloads one entry into `directory`.
///
/// Short-circuits to `Skipped` when the output file already exists and is non-empty, so
/// calling this twice for the same item is harmless. Collaborator errors are retried
/// according to `retry` unless they look like a network failure, which is returned as
/// `Err` without retrying so the caller can stop the rest of the batch.
pub fn download_item(
    extractor: &dyn Extractor, item: &PlaylistItem, directory: &Path, kind: MediaKind, retry: &RetryPolicy,
) -> Result<DownloadOutcome, NetworkError> {
    let output = directory.join(extractor.output_name(item, kind));
    if is_nonempty_file(&output) {
        info!("{} already exists, skipping", output.display());
        return Ok(DownloadOutcome::Skipped(output));
    }

    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        info!("downloading {:?} as {} (attempt {}/{})", item.title, kind, attempt, attempts);
        match extractor.fetch(&item.url, &output, kind) {
            Ok(()) if is_nonempty_file(&output) => {
                info!("completed {}", output.display());
                return Ok(DownloadOutcome::Completed(output));
            }
            Ok(()) => {
                warn!("{:?}: {} is missing or empty after download", item.title, output.display());
                return Ok(DownloadOutcome::Failed(item.clone(), FailureReason::EmptyOrMissing));
            }
            Err(e) if classify(&e) == ErrorClass::Network => {
                error!("network failure downloading {:?}: {:#}", item.title, e);
                return Err(NetworkError { title: item.title.clone(), message: format!("{:#}", e) });
            }
            Err(e) if attempt < attempts => {
                warn!("failed to download {:?}, retrying: {:#}", item.title, e);
                std::thread::sleep(retry.delay(attempt));
                attempt += 1;
            }
            Err(e) => {
                warn!("giving up on {:?}: {:#}", item.title, e);
                return Ok(DownloadOutcome::Failed(item.clone(), FailureReason::Collaborator(format!("{:#}", e))));
            }
        }
    }
}
