use crossbeam_utils::atomic::AtomicCell;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{classify, ErrorClass, FailureReason, NetworkError, PermissionError};
use crate::guard;
use crate::item::{download_item, DownloadOutcome, MediaKind, PlaylistItem, RetryPolicy};
use crate::report::Reporter;
use crate::ytdl::{Entry, Extractor, Metadata, MetadataKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistRequest {
    pub source: String,
    pub directory: PathBuf,
    pub kind: MediaKind,
    pub concurrency: NonZeroUsize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    Permission(PermissionError),
    Network(String),
    /// The URL couldn't be turned into metadata for some other reason.
    Resolution(String),
    Interrupted,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Permission(e) => write!(f, "{}", e),
            AbortReason::Network(msg) => write!(f, "critical network error: {}", msg),
            AbortReason::Resolution(msg) => write!(f, "cannot process playlist: {}", msg),
            AbortReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Resolving,
    Dispatching,
    Draining,
    Completed,
    Aborted(AbortReason),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub title: String,
    pub reason: FailureReason,
}

/// Everything that happened to one playlist. `completed`, `skipped` and `failed` are in the
/// order the outcomes came in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistResult {
    pub source: String,
    pub title: Option<String>,
    pub state: RunState,
    pub completed: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<Failure>,
    /// Entries that never became items. Not counted among `failed`.
    pub invalid: Vec<Failure>,
    /// Items left undispatched by an abort.
    pub not_attempted: Vec<PlaylistItem>,
}

impl PlaylistResult {
    fn new(source: &str) -> Self {
        PlaylistResult {
            source: source.to_owned(),
            title: None,
            state: RunState::Resolving,
            completed: vec![],
            skipped: vec![],
            failed: vec![],
            invalid: vec![],
            not_attempted: vec![],
        }
    }
    pub fn outcome_count(&self) -> usize {
        self.completed.len() + self.skipped.len() + self.failed.len()
    }
    fn advance(&mut self, next: RunState) {
        debug!("{}: {:?} -> {:?}", self.source, self.state, next);
        self.state = next;
    }
    fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Completed(path) => self.completed.push(path),
            DownloadOutcome::Skipped(path) => self.skipped.push(path),
            DownloadOutcome::Failed(item, reason) => self.failed.push(Failure { title: item.title, reason }),
        }
    }
}

/// Valid items plus the entries that were rejected on the way.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Resolved {
    pub items: Vec<PlaylistItem>,
    pub invalid: Vec<Failure>,
}

const UNKNOWN_TITLE: &str = "Unknown Title";

/// Turns metadata into items. A single video is a one-item playlist.
pub fn items_from_metadata(metadata: &Metadata, source: &str) -> Resolved {
    let mut ret = Resolved::default();
    match (metadata.kind(), metadata.entries.as_ref()) {
        (MetadataKind::Collection, Some(entries)) => {
            for value in entries {
                match Entry::from_value(value) {
                    None => {
                        warn!("invalid entry in {}, skipping", source);
                        ret.invalid
                            .push(Failure { title: "Invalid Entry".to_owned(), reason: FailureReason::InvalidEntry });
                    }
                    Some(entry) => {
                        let title = entry.title.clone().unwrap_or_else(|| UNKNOWN_TITLE.to_owned());
                        match entry.resolved_url() {
                            Some(url) => ret.items.push(PlaylistItem { title, url: url.to_owned() }),
                            None => {
                                warn!("no valid URL for {:?}, skipping", title);
                                ret.invalid.push(Failure { title, reason: FailureReason::MissingUrl });
                            }
                        }
                    }
                }
            }
        }
        _ => {
            let url = metadata
                .webpage_url
                .as_deref()
                .or_else(|| metadata.url.as_deref())
                .filter(|u| !u.trim().is_empty())
                .unwrap_or(source);
            ret.items.push(PlaylistItem {
                title: metadata.title.clone().unwrap_or_else(|| UNKNOWN_TITLE.to_owned()),
                url: url.to_owned(),
            });
        }
    }
    ret
}

/// Gives every item its own output file by suffixing repeated titles with ` (2)`, ` (3)`, ...
fn disambiguate(items: Vec<PlaylistItem>, extractor: &dyn Extractor, kind: MediaKind) -> Vec<PlaylistItem> {
    let mut taken: HashSet<PathBuf> = HashSet::new();
    items
        .into_iter()
        .map(|item| {
            let mut candidate = item.clone();
            let mut n = 1;
            while !taken.insert(extractor.output_name(&candidate, kind)) {
                n += 1;
                candidate.title = format!("{} ({})", item.title, n);
            }
            if n > 1 {
                debug!("renamed duplicate {:?} to {:?}", item.title, candidate.title);
            }
            candidate
        })
        .collect()
}

fn run_task(
    extractor: &dyn Extractor, item: &PlaylistItem, request: &PlaylistRequest, retry: &RetryPolicy,
) -> Result<DownloadOutcome, NetworkError> {
    let task = std::panic::AssertUnwindSafe(|| {
        download_item(extractor, item, &request.directory, request.kind, retry)
    });
    std::panic::catch_unwind(task).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        error!("download of {:?} panicked: {}", item.title, msg);
        Ok(DownloadOutcome::Failed(item.clone(), FailureReason::Panicked(msg)))
    })
}

/// Runs playlists through a bounded pool of download workers.
pub struct Orchestrator<'a> {
    extractor: &'a dyn Extractor,
    reporter: &'a dyn Reporter,
    retry: RetryPolicy,
    interrupted: Arc<AtomicCell<bool>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(extractor: &'a dyn Extractor, reporter: &'a dyn Reporter) -> Self {
        Orchestrator { extractor, reporter, retry: RetryPolicy::default(), interrupted: Arc::new(AtomicCell::new(false)) }
    }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
    /// Once this flag goes up nothing new is dispatched; running downloads are left to finish.
    pub fn with_interrupt_flag(mut self, interrupted: Arc<AtomicCell<bool>>) -> Self {
        self.interrupted = interrupted;
        self
    }

    fn abort(&self, result: &mut PlaylistResult, reason: AbortReason) {
        self.reporter.aborted(&result.source, &reason);
        result.advance(RunState::Aborted(reason));
    }

    /// Downloads every entry behind `request.source` into `request.directory`.
    ///
    /// Item failures are recorded and never stop the batch. A network failure (or the
    /// interrupt flag) stops dispatching; items already running are drained and the rest
    /// are reported as not attempted.
    pub fn download_playlist(&self, request: &PlaylistRequest) -> PlaylistResult {
        let mut result = PlaylistResult::new(&request.source);

        if let Err(e) = guard::ensure_writable(&request.directory) {
            error!("{}", e);
            self.abort(&mut result, AbortReason::Permission(e));
            return result;
        }

        let metadata = match self.extractor.resolve(&request.source) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("cannot resolve {}: {:#}", request.source, e);
                let reason = match classify(&e) {
                    ErrorClass::Network => AbortReason::Network(format!("{:#}", e)),
                    ErrorClass::Other => AbortReason::Resolution(format!("{:#}", e)),
                };
                self.abort(&mut result, reason);
                return result;
            }
        };
        let Resolved { items, invalid } = items_from_metadata(&metadata, &request.source);
        result.title = metadata.title.clone();
        for failure in &invalid {
            self.reporter.invalid_entry(failure);
        }
        result.invalid = invalid;
        let items = disambiguate(items, self.extractor, request.kind);
        let total = items.len();
        self.reporter.resolved(&request.source, result.title.as_deref().unwrap_or(UNKNOWN_TITLE), total);

        result.advance(RunState::Dispatching);
        let abort = self.dispatch(request, items, &mut result);
        match abort {
            Some(reason) => self.abort(&mut result, reason),
            None => result.advance(RunState::Completed),
        }
        result
    }

    /// Feeds the pool without ever queueing more than `concurrency` items, so every
    /// dispatched item starts right away and undispatched ones stay here.
    fn dispatch(
        &self, request: &PlaylistRequest, items: Vec<PlaylistItem>, result: &mut PlaylistResult,
    ) -> Option<AbortReason> {
        let limit = request.concurrency.get();
        let total = items.len();
        let mut pending: VecDeque<PlaylistItem> = items.into();
        let mut abort: Option<AbortReason> = None;
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<PlaylistItem>();
        let (done_tx, done_rx) =
            crossbeam_channel::unbounded::<(PlaylistItem, Result<DownloadOutcome, NetworkError>)>();
        let extractor = self.extractor;
        let retry = &self.retry;

        let scoped = crossbeam_utils::thread::scope(|scope| {
            for _ in 0..limit.min(total) {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move |_| {
                    for item in job_rx {
                        let outcome = run_task(extractor, &item, request, retry);
                        if done_tx.send((item, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            let mut in_flight = 0usize;
            let mut done = 0usize;
            loop {
                while abort.is_none() && in_flight < limit && !pending.is_empty() {
                    if self.interrupted.load() {
                        warn!("interrupted, not starting the remaining {} items", pending.len());
                        abort = Some(AbortReason::Interrupted);
                        break;
                    }
                    let item = match pending.pop_front() {
                        Some(item) => item,
                        None => break,
                    };
                    self.reporter.dispatched(&item);
                    if let Err(crossbeam_channel::SendError(item)) = job_tx.send(item) {
                        error!("download workers are gone");
                        pending.push_front(item);
                        abort = Some(AbortReason::Interrupted);
                        break;
                    }
                    in_flight += 1;
                }
                if in_flight == 0 {
                    break;
                }
                if (abort.is_some() || pending.is_empty()) && result.state != RunState::Draining {
                    result.advance(RunState::Draining);
                }
                let (item, outcome) = match done_rx.recv() {
                    Ok(x) => x,
                    Err(_) => {
                        error!("download workers are gone with {} items in flight", in_flight);
                        break;
                    }
                };
                in_flight -= 1;
                done += 1;
                match outcome {
                    Ok(outcome) => {
                        self.reporter.finished(&outcome, done, total);
                        result.record(outcome);
                    }
                    Err(e) => {
                        let outcome =
                            DownloadOutcome::Failed(item, FailureReason::Network(e.message.clone()));
                        self.reporter.finished(&outcome, done, total);
                        result.record(outcome);
                        if abort.is_none() {
                            error!("critical network error, aborting {}: {}", request.source, e);
                            abort = Some(AbortReason::Network(e.to_string()));
                        }
                    }
                }
            }
            drop(job_tx);
        });
        if scoped.is_err() {
            error!("a download worker panicked outside its task");
        }
        result.not_attempted = pending.into_iter().collect();
        abort
    }
}
