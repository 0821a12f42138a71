use anyhow::{anyhow, Context, Result};
use duct::cmd;
use extension_trait::extension_trait;
#[allow(unused_imports)]
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ExtractorError;
use crate::item::{MediaKind, PlaylistItem};

#[extension_trait(pub)]
impl PathExt for Path {
    fn try_to_str(&self) -> Result<&str> {
        self.to_str().with_context(|| format!("not utf-8: {:?}", self))
    }
}

/// What `yt-dlp -J --flat-playlist` tells us about a URL. Everything else it prints is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    /// Absent for a single video. Kept raw so that one malformed entry can't sink the whole playlist.
    #[serde(default)]
    pub entries: Option<Vec<serde_json::Value>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataKind {
    Single,
    Collection,
}

impl Metadata {
    pub fn single(title: impl Into<String>, webpage_url: impl Into<String>) -> Self {
        Metadata { title: Some(title.into()), webpage_url: Some(webpage_url.into()), ..Default::default() }
    }
    pub fn collection(title: impl Into<String>, entries: Vec<serde_json::Value>) -> Self {
        Metadata { title: Some(title.into()), entries: Some(entries), ..Default::default() }
    }
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("cannot parse yt-dlp metadata")
    }
    pub fn kind(&self) -> MetadataKind {
        if self.entries.is_some() {
            MetadataKind::Collection
        } else {
            MetadataKind::Single
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Entry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
}

impl Entry {
    /// `None` for nulls, non-objects and objects whose known fields have the wrong types.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
    pub fn resolved_url(&self) -> Option<&str> {
        self.url.as_deref().or_else(|| self.webpage_url.as_deref()).filter(|u| !u.trim().is_empty())
    }
}

/// The external extraction engine: metadata lookups and the actual downloads.
pub trait Extractor: Sync {
    /// Metadata only, nothing is written.
    fn resolve(&self, url: &str) -> Result<Metadata>;
    /// Downloads `url` so that the finished file lands at `output`.
    fn fetch(&self, url: &str, output: &Path, kind: MediaKind) -> Result<()>;
    fn output_name(&self, item: &PlaylistItem, kind: MediaKind) -> PathBuf {
        PathBuf::from(format!("{}.{}", sanitize_file_stem(&item.title), kind.extension()))
    }
}

const MAX_STEM_BYTES: usize = 200;
/// Longer playlists are cut off at resolve time.
pub const MAX_PLAYLIST_ITEMS: usize = 3000;

/// Makes a title usable as a file name on every platform we care about.
pub fn sanitize_file_stem(title: &str) -> String {
    let cleaned: String =
        title.chars().map(|c| if c.is_control() || r#"/\:*?"<>|"#.contains(c) { '_' } else { c }).collect();
    let mut cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_owned();
    if cleaned.len() > MAX_STEM_BYTES {
        let mut end = MAX_STEM_BYTES;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }
    if cleaned.is_empty() {
        "untitled".to_owned()
    } else {
        cleaned
    }
}

/// Drives the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    leading_args: Vec<String>,
    cookies: Option<PathBuf>,
    retries: u32,
    fragment_retries: u32,
    concurrent_fragments: u32,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        YtDlp {
            program: program.into(),
            leading_args: vec![],
            cookies: None,
            retries: 10,
            fragment_retries: 10,
            concurrent_fragments: 4,
        }
    }
    /// Accepts things like `yt-dlp`, `/opt/bin/yt-dlp` or `python3 -m yt_dlp`.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace();
        let program = words.next().ok_or_else(|| anyhow!("empty yt-dlp command line"))?;
        let mut ret = YtDlp::new(program);
        ret.leading_args = words.map(str::to_owned).collect();
        Ok(ret)
    }
    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn common_args(&self) -> Result<Vec<String>> {
        let mut args = self.leading_args.clone();
        args.push("--no-warnings".to_owned());
        if let Some(cookies) = self.cookies.as_deref() {
            args.push("--cookies".to_owned());
            args.push(cookies.try_to_str()?.to_owned());
        }
        Ok(args)
    }

    fn resolve_args(&self, url: &str) -> Result<Vec<String>> {
        let mut args = self.common_args()?;
        args.extend(["-J", "--flat-playlist", "--playlist-items"].iter().map(|s| (*s).to_owned()));
        args.push(format!("1-{}", MAX_PLAYLIST_ITEMS));
        args.push("--".to_owned());
        args.push(url.to_owned());
        Ok(args)
    }

    fn fetch_args(&self, url: &str, output: &Path, kind: MediaKind) -> Result<Vec<String>> {
        let mut args = self.common_args()?;
        args.extend(
            ["--no-playlist", "--force-overwrites", "--http-chunk-size", "10M"].iter().map(|s| (*s).to_owned()),
        );
        args.push("--retries".to_owned());
        args.push(self.retries.to_string());
        args.push("--fragment-retries".to_owned());
        args.push(self.fragment_retries.to_string());
        args.push("--concurrent-fragments".to_owned());
        args.push(self.concurrent_fragments.to_string());
        let format_args: &[&str] = match kind {
            MediaKind::Audio => &["-f", "bestaudio/best", "-x", "--audio-format", "mp3", "--audio-quality", "192K"],
            MediaKind::Video => &[
                "-f",
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
                "--merge-output-format",
                "mp4",
                "--recode-video",
                "mp4",
            ],
        };
        args.extend(format_args.iter().map(|s| (*s).to_owned()));
        args.push("-o".to_owned());
        args.push(output_template(output)?);
        args.push("--".to_owned());
        args.push(url.to_owned());
        Ok(args)
    }

    fn run(&self, args: &[String], capture_stdout: bool) -> Result<Vec<u8>> {
        let expr = cmd(self.program.as_path(), args).stderr_capture().unchecked();
        let expr = if capture_stdout { expr.stdout_capture() } else { expr.stdout_null() };
        debug!("Running {:?}", expr);
        let output = expr.run().with_context(|| format!("cannot run {:?}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| l.starts_with("ERROR:"))
                .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
                .unwrap_or("no diagnostics");
            let source = ExtractorError { message: message.trim().to_owned() };
            return Err(anyhow::Error::new(source).context(format!("{:?} exited with {}", self.program, output.status)));
        }
        Ok(output.stdout)
    }
}

/// `DIR/STEM.%(ext)s`, so yt-dlp picks the extension and we pick everything else.
fn output_template(output: &Path) -> Result<String> {
    let stem = output
        .file_stem()
        .with_context(|| format!("no file name in {:?}", output))?
        .to_str()
        .with_context(|| format!("not utf-8: {:?}", output))?;
    Ok(output.with_file_name(format!("{}.%(ext)s", stem.replace('%', "%%"))).try_to_str()?.to_owned())
}

impl Extractor for YtDlp {
    fn resolve(&self, url: &str) -> Result<Metadata> {
        info!("resolving {:?}", url);
        let stdout = self.run(&self.resolve_args(url)?, true).with_context(|| format!("cannot resolve {:?}", url))?;
        let json = String::from_utf8(stdout).context("yt-dlp metadata is not utf-8")?;
        Metadata::parse(&json)
    }
    fn fetch(&self, url: &str, output: &Path, kind: MediaKind) -> Result<()> {
        self.run(&self.fetch_args(url, output, kind)?, false)
            .with_context(|| format!("cannot download {:?}", url))
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorClass};
    use tempfile::TempDir;

    const PLAYLIST_JSON: &str = r#"{
        "_type": "playlist",
        "id": "PL123",
        "title": "Road trip",
        "webpage_url": "https://www.youtube.com/playlist?list=PL123",
        "entries": [
            {"_type": "url", "ie_key": "Youtube", "id": "aaaaaaaaaaa", "title": "First",
             "url": "https://www.youtube.com/watch?v=aaaaaaaaaaa", "duration": 215.0},
            null,
            {"title": "No link"},
            {"title": 42, "url": "https://www.youtube.com/watch?v=bbbbbbbbbbb"},
            "garbage"
        ]
    }"#;

    #[test]
    fn parses_collections() {
        let md = Metadata::parse(PLAYLIST_JSON).unwrap();
        assert_eq!(md.kind(), MetadataKind::Collection);
        assert_eq!(md.title.as_deref(), Some("Road trip"));
        let entries: Vec<Option<Entry>> = md.entries.unwrap().iter().map(Entry::from_value).collect();
        assert_eq!(entries.len(), 5);
        let first = entries[0].as_ref().unwrap();
        assert_eq!(first.title.as_deref(), Some("First"));
        assert_eq!(first.resolved_url(), Some("https://www.youtube.com/watch?v=aaaaaaaaaaa"));
        assert!(entries[1].is_none());
        assert_eq!(entries[2].as_ref().unwrap().resolved_url(), None);
        assert!(entries[3].is_none());
        assert!(entries[4].is_none());
    }

    #[test]
    fn parses_single_videos() {
        let md = Metadata::parse(
            r#"{"id": "ccccccccccc", "title": "Solo", "webpage_url": "https://www.youtube.com/watch?v=ccccccccccc",
                "formats": [], "duration": 12}"#,
        )
        .unwrap();
        assert_eq!(md.kind(), MetadataKind::Single);
        assert_eq!(md.webpage_url.as_deref(), Some("https://www.youtube.com/watch?v=ccccccccccc"));
    }

    #[test]
    fn sanitizes_titles() {
        assert_eq!(sanitize_file_stem("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize_file_stem("  ..hidden.  "), "hidden");
        assert_eq!(sanitize_file_stem("..."), "untitled");
        assert_eq!(sanitize_file_stem("tab\there"), "tab_here");
        let long = "é".repeat(150);
        let cut = sanitize_file_stem(&long);
        assert!(cut.len() <= MAX_STEM_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn output_names_keep_dots_in_titles() {
        let yt = YtDlp::new("yt-dlp");
        let item = PlaylistItem { title: "Op. 27 No. 2".into(), url: "u".into() };
        assert_eq!(yt.output_name(&item, MediaKind::Audio), PathBuf::from("Op. 27 No. 2.mp3"));
        assert_eq!(yt.output_name(&item, MediaKind::Video), PathBuf::from("Op. 27 No. 2.mp4"));
    }

    #[test]
    fn fetch_args_pick_the_output_name() {
        let yt = YtDlp::from_command_line("python3 -m yt_dlp").unwrap().with_cookies(Some("cookies.txt".into()));
        assert_eq!(yt.program(), Path::new("python3"));
        let args = yt.fetch_args("https://example.com/v", Path::new("/music/100% hits.mp3"), MediaKind::Audio).unwrap();
        assert_eq!(&args[..2], &["-m".to_owned(), "yt_dlp".to_owned()]);
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "/music/100%% hits.%(ext)s");
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
        assert!(args.windows(2).any(|w| w[0] == "--audio-format" && w[1] == "mp3"));
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "cookies.txt"));

        let args = yt.fetch_args("https://example.com/v", Path::new("/videos/clip.mp4"), MediaKind::Video).unwrap();
        assert!(args.windows(2).any(|w| w[0] == "--merge-output-format" && w[1] == "mp4"));
        assert!(!args.iter().any(|a| a == "-x"));
    }

    #[test]
    fn resolve_args_cap_the_playlist() {
        let yt = YtDlp::new("yt-dlp");
        let args = yt.resolve_args("https://www.youtube.com/playlist?list=PL1").unwrap();
        assert!(args.windows(2).any(|w| w[0] == "--playlist-items" && w[1] == "1-3000"));
        assert!(args.iter().any(|a| a == "--flat-playlist"));
        assert_eq!(&args[args.len() - 2..], &["--".to_owned(), "https://www.youtube.com/playlist?list=PL1".to_owned()]);
    }

    #[test]
    fn empty_command_line_is_rejected() {
        assert!(YtDlp::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> YtDlp {
        let path = dir.join("fake-yt-dlp.sh");
        std::fs::write(&path, body).unwrap();
        YtDlp::from_command_line(&format!("sh {}", path.display())).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn resolve_reads_stdout() {
        let tmp = TempDir::new().unwrap();
        let json = tmp.path().join("playlist.json");
        std::fs::write(&json, PLAYLIST_JSON).unwrap();
        let yt = script(tmp.path(), &format!("cat '{}'\n", json.display()));
        let md = yt.resolve("https://www.youtube.com/playlist?list=PL123").unwrap();
        assert_eq!(md.kind(), MetadataKind::Collection);
        assert_eq!(md.entries.map(|e| e.len()), Some(5));
    }

    #[cfg(unix)]
    #[test]
    fn fetch_writes_where_told() {
        let tmp = TempDir::new().unwrap();
        let yt = script(
            tmp.path(),
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
out=$(printf '%s' "$out" | sed 's/%(ext)s$/mp3/')
printf 'ID3' > "$out"
"#,
        );
        let output = tmp.path().join("Song.mp3");
        yt.fetch("https://www.youtube.com/watch?v=aaaaaaaaaaa", &output, MediaKind::Audio).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"ID3");
    }

    #[cfg(unix)]
    #[test]
    fn failed_runs_carry_the_error_line() {
        let tmp = TempDir::new().unwrap();
        let yt = script(
            tmp.path(),
            "echo '[youtube] aaaaaaaaaaa: Downloading webpage' >&2\n\
             echo 'ERROR: [youtube] aaaaaaaaaaa: Unable to download webpage: Connection reset by peer' >&2\n\
             echo 'trailing noise' >&2\n\
             exit 1\n",
        );
        let err = yt.fetch("https://www.youtube.com/watch?v=aaaaaaaaaaa", &tmp.path().join("x.mp3"), MediaKind::Audio)
            .unwrap_err();
        let rendered = format!("{:#}", err);
        assert!(rendered.contains("Connection reset by peer"), "{}", rendered);
        assert!(!rendered.contains("trailing noise"), "{}", rendered);
        assert_eq!(classify(&err), ErrorClass::Network);
    }

    #[cfg(unix)]
    #[test]
    fn urls_mentioning_networks_are_not_network_failures() {
        let tmp = TempDir::new().unwrap();
        let yt = script(
            tmp.path(),
            "echo 'ERROR: [generic] some-clip: Video unavailable. This video is private' >&2\nexit 1\n",
        );
        let err = yt
            .fetch("https://www.cartoonnetwork.com/video/some-clip", &tmp.path().join("x.mp3"), MediaKind::Audio)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("cartoonnetwork"));
        assert_eq!(classify(&err), ErrorClass::Other);
    }
}
