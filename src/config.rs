use anyhow::Result;
use std::io::{BufRead, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use structopt::StructOpt;

use crate::item::{MediaKind, RetryPolicy};
use crate::playlist::PlaylistRequest;
use crate::prompt::Prompter;

pub const MAX_URLS: usize = 5;

#[derive(StructOpt, Debug)]
#[structopt(about = "Download YouTube playlists and videos as mp3 or mp4 via yt-dlp")]
pub struct Opt {
    /// what to download: audio, mp3, video or mp4
    #[structopt(short, long)]
    pub format: Option<MediaKind>,
    /// download into directory DIR
    #[structopt(short = "C", long, name = "DIR", parse(from_os_str))]
    pub directory: Option<PathBuf>,
    /// number of simultaneous downloads
    #[structopt(short, long, default_value = "2")]
    pub jobs: NonZeroUsize,
    /// download attempts per item
    #[structopt(long, default_value = "3")]
    pub attempts: u32,
    /// pause before a retry, multiplied by the attempt number
    #[structopt(long, default_value = "2")]
    pub backoff_secs: u64,
    /// use cookiejar FILE
    #[structopt(short, long, parse(from_os_str))]
    pub cookies: Option<PathBuf>,
    /// how to invoke yt-dlp, e.g. "python3 -m yt_dlp"
    #[structopt(long = "yt-dlp", default_value = "yt-dlp")]
    pub yt_dlp: String,
    /// playlist or video URLs; asked for interactively when none are given
    #[structopt(name = "URL", max_values = 5)]
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub urls: Vec<String>,
    pub kind: MediaKind,
    pub directory: PathBuf,
    pub concurrency: NonZeroUsize,
    pub retry: RetryPolicy,
    pub cookies: Option<PathBuf>,
    pub yt_dlp: String,
}

impl Config {
    /// Without URL arguments, whatever the options leave open is asked on `prompter`.
    pub fn resolve<R: BufRead, W: Write>(opt: Opt, prompter: &mut Prompter<R, W>) -> Result<Self> {
        let interactive = opt.urls.is_empty();
        let kind = match opt.format {
            Some(kind) => kind,
            None if interactive => prompter.media_kind()?,
            None => MediaKind::Audio,
        };
        let directory = match opt.directory {
            Some(dir) => dir,
            None if interactive => prompter.directory(&default_directory(kind))?,
            None => default_directory(kind),
        };
        let urls = if interactive { prompter.urls(MAX_URLS)? } else { opt.urls };
        Ok(Config {
            urls,
            kind,
            directory,
            concurrency: opt.jobs,
            retry: RetryPolicy { attempts: opt.attempts.max(1), backoff: Duration::from_secs(opt.backoff_secs) },
            cookies: opt.cookies,
            yt_dlp: opt.yt_dlp,
        })
    }

    pub fn requests(&self) -> impl Iterator<Item = PlaylistRequest> + '_ {
        self.urls.iter().map(move |url| PlaylistRequest {
            source: url.clone(),
            directory: self.directory.clone(),
            kind: self.kind,
            concurrency: self.concurrency,
        })
    }
}

/// Termux's shared storage when present, else the platform's music/video folder.
pub fn default_directory(kind: MediaKind) -> PathBuf {
    let platform = match kind {
        MediaKind::Audio => dirs::audio_dir(),
        MediaKind::Video => dirs::video_dir(),
    };
    default_directory_in(dirs::home_dir().as_deref(), platform, kind)
}

fn default_directory_in(home: Option<&Path>, platform: Option<PathBuf>, kind: MediaKind) -> PathBuf {
    if let Some(shared) = home.map(|h| h.join("storage").join("shared")).filter(|p| p.is_dir()) {
        return shared.join(kind.folder_name());
    }
    platform
        .or_else(|| home.map(|h| h.join(kind.folder_name())))
        .unwrap_or_else(|| Path::new(".").join(kind.folder_name()))
}

/// Termux keeps shared storage behind a permission that `termux-setup-storage` grants.
pub fn is_termux() -> bool {
    dirs::home_dir().map(|h| h.join("storage").exists()).unwrap_or(false)
}
