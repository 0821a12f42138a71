#![warn(clippy::all)]
#![deny(clippy::todo)]
#[allow(unused_imports)]
use anyhow::{anyhow, bail, ensure, Context, Result};
use crossbeam_utils::atomic::AtomicCell;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use structopt::StructOpt;

pub mod config;
pub mod error;
pub mod guard;
pub mod item;
pub mod playlist;
pub mod prompt;
pub mod report;
pub mod ytdl;

pub use config::{Config, Opt};
pub use error::{ExtractorError, FailureReason, NetworkError, PermissionError, SetupError};
pub use item::{download_item, DownloadOutcome, MediaKind, PlaylistItem, RetryPolicy};
pub use playlist::{AbortReason, Failure, Orchestrator, PlaylistRequest, PlaylistResult, RunState};
pub use report::{LogReporter, Reporter, Summary};
pub use ytdl::{Extractor, Metadata, YtDlp};

/// Both the extractor and the transcoder it shells out to must be on PATH.
fn check_binaries(yt_dlp: &Path) -> Result<(), SetupError> {
    for program in [yt_dlp, Path::new("ffmpeg")].iter().copied() {
        let found = which::which(program).map_err(|_| SetupError::MissingBinary(program.display().to_string()))?;
        debug!("using {:?}", found);
    }
    Ok(())
}

pub fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = Opt::from_args();

    let yt_dlp = YtDlp::from_command_line(&opt.yt_dlp)?.with_cookies(opt.cookies.clone());
    check_binaries(yt_dlp.program())?;

    let config = {
        let stdin = std::io::stdin();
        let mut prompter = prompt::Prompter::new(stdin.lock(), std::io::stdout());
        Config::resolve(opt, &mut prompter)?
    };

    if let Err(e) = guard::ensure_writable(&config.directory) {
        if config::is_termux() {
            error!("run 'termux-setup-storage' to grant storage access");
        } else {
            error!("make sure {} is writable or choose a different location", e.path().display());
        }
        return Err(e).context("unusable download directory");
    }

    if config.urls.is_empty() {
        println!("No links provided. Exiting...");
        return Ok(());
    }

    let interrupted = Arc::new(AtomicCell::new(false));
    ctrlc::set_handler({
        let interrupted = Arc::clone(&interrupted);
        move || {
            if interrupted.swap(true) {
                std::process::exit(130);
            }
            warn!("interrupted, letting running downloads finish (press again to quit now)");
        }
    })?;

    let reporter = LogReporter;
    let orchestrator = Orchestrator::new(&yt_dlp, &reporter)
        .with_retry(config.retry)
        .with_interrupt_flag(Arc::clone(&interrupted));
    for request in config.requests() {
        if interrupted.load() {
            break;
        }
        info!("processing {} into {:?} as {}", request.source, request.directory, request.kind);
        let result = orchestrator.download_playlist(&request);
        println!("\n{}", report::Summary(&result));
    }
    Ok(())
}
