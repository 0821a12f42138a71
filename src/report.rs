use itertools::Itertools;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use std::fmt;

use crate::item::{DownloadOutcome, PlaylistItem};
use crate::playlist::{AbortReason, Failure, PlaylistResult, RunState};

/// Progress events from the orchestrator. Every call happens on the thread that called
/// `download_playlist`, one at a time.
pub trait Reporter {
    fn resolved(&self, _source: &str, _title: &str, _items: usize) {}
    fn invalid_entry(&self, _failure: &Failure) {}
    fn dispatched(&self, _item: &PlaylistItem) {}
    /// `done` of `total` items have an outcome, this one included.
    fn finished(&self, _outcome: &DownloadOutcome, _done: usize, _total: usize) {}
    fn aborted(&self, _source: &str, _reason: &AbortReason) {}
}

/// Sends everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn resolved(&self, source: &str, title: &str, items: usize) {
        info!("found playlist {:?} with {} items at {}", title, items, source);
    }
    fn invalid_entry(&self, failure: &Failure) {
        warn!("skipping {:?}: {}", failure.title, failure.reason);
    }
    fn dispatched(&self, item: &PlaylistItem) {
        debug!("starting {:?} ({})", item.title, item.url);
    }
    fn finished(&self, outcome: &DownloadOutcome, done: usize, total: usize) {
        match outcome {
            DownloadOutcome::Completed(path) => info!("completed {}", path.display()),
            DownloadOutcome::Skipped(path) => info!("skipped {}", path.display()),
            DownloadOutcome::Failed(item, reason) => warn!("failed {:?}: {}", item.title, reason),
        }
        info!("progress: {}/{} items completed", done, total);
    }
    fn aborted(&self, source: &str, reason: &AbortReason) {
        error!("aborting {}: {}", source, reason);
    }
}

fn list_failures(f: &mut fmt::Formatter<'_>, heading: &str, failures: &[Failure]) -> fmt::Result {
    if failures.is_empty() {
        return Ok(());
    }
    writeln!(f, "\n{}:", heading)?;
    for failure in failures {
        writeln!(f, "- {} ({})", failure.title, failure.reason)?;
    }
    Ok(())
}

/// The human-readable report printed after each playlist.
pub struct Summary<'a>(pub &'a PlaylistResult);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        writeln!(f, "Playlist: {}", result.title.as_deref().unwrap_or(&result.source))?;
        if result.completed.is_empty() && result.skipped.is_empty() {
            writeln!(f, "No files downloaded for this playlist.")?;
        }
        if !result.completed.is_empty() {
            writeln!(f, "\nDownloaded files:")?;
            for path in &result.completed {
                writeln!(f, "- {}", path.display())?;
            }
        }
        if !result.skipped.is_empty() {
            writeln!(f, "\nAlready present, skipped:")?;
            for path in &result.skipped {
                writeln!(f, "- {}", path.display())?;
            }
        }
        list_failures(f, "Failed downloads", &result.failed)?;
        list_failures(f, "Invalid entries", &result.invalid)?;
        if !result.not_attempted.is_empty() {
            writeln!(
                f,
                "\nNot attempted: {}",
                result.not_attempted.iter().map(|item| format!("{:?}", item.title)).join(", ")
            )?;
        }
        if let RunState::Aborted(reason) = &result.state {
            writeln!(f, "\nAborted: {}", reason)?;
        }
        Ok(())
    }
}
