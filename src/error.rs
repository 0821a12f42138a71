use std::path::PathBuf;
use thiserror::Error;

/// The target directory can't be created or written to. Fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("cannot create directory {path:?}: {reason}")]
    Create { path: PathBuf, reason: String },
    #[error("{path:?} exists but is not a directory")]
    NotADirectory { path: PathBuf },
    #[error("no write permission for {path:?}: {reason}")]
    NotWritable { path: PathBuf, reason: String },
}

impl PermissionError {
    pub fn path(&self) -> &std::path::Path {
        match self {
            PermissionError::Create { path, .. }
            | PermissionError::NotADirectory { path }
            | PermissionError::NotWritable { path, .. } => path,
        }
    }
}

/// A collaborator failure that looks like lost connectivity. Aborts the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("network error for {title:?}: {message}")]
pub struct NetworkError {
    pub title: String,
    pub message: String,
}

/// The diagnostic yt-dlp itself printed for a failed run, without anything we added around it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExtractorError {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0} is not installed or not found in PATH, please install {0}")]
    MissingBinary(String),
}

/// Why a single entry ended up in the failure list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    InvalidEntry,
    MissingUrl,
    EmptyOrMissing,
    Collaborator(String),
    Panicked(String),
    Network(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::InvalidEntry => f.write_str("invalid playlist entry"),
            FailureReason::MissingUrl => f.write_str("no valid URL"),
            FailureReason::EmptyOrMissing => f.write_str("file missing or empty"),
            FailureReason::Collaborator(msg) => write!(f, "{}", msg),
            FailureReason::Panicked(msg) => write!(f, "download task panicked: {}", msg),
            FailureReason::Network(msg) => write!(f, "network failure, batch aborted: {}", msg),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Other,
}

/// Looks for a network/connection signature in what the collaborator reported.
///
/// Only the `ExtractorError` in the chain is inspected, or the root cause when there is
/// none, so URLs and paths in our own context messages never count.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    static NETWORK_RE: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r#"(?i)network|connection|name resolution"#).unwrap());
    let reported = err
        .chain()
        .find_map(|e| e.downcast_ref::<ExtractorError>())
        .map(|e| e.message.clone())
        .unwrap_or_else(|| err.root_cause().to_string());
    if NETWORK_RE.is_match(&reported) {
        ErrorClass::Network
    } else {
        ErrorClass::Other
    }
}
