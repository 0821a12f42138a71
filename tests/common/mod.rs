#![allow(dead_code)]

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use playlist_dl::{
    AbortReason, DownloadOutcome, Extractor, Failure, FailureReason, MediaKind, Metadata, PlaylistItem, Reporter,
};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn watch_url(title: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", title)
}

pub fn entry(title: &str) -> serde_json::Value {
    json!({"_type": "url", "ie_key": "Youtube", "title": title, "url": watch_url(title)})
}

pub fn playlist(titles: &[&str]) -> Metadata {
    Metadata::collection("Test playlist", titles.iter().map(|t| entry(t)).collect())
}

pub enum Behavior {
    Write,
    WriteEmpty,
    Fail(&'static str),
    Panic,
    Sleep(Duration),
    /// Blocks until signalled (or five seconds pass), then writes.
    WaitThenWrite(Receiver<()>),
    /// Raises the flag while the download is running, then writes.
    Interrupt(Arc<AtomicCell<bool>>),
}

/// An extractor that follows a per-URL script and keeps count of what it was asked to do.
pub struct Fake {
    metadata: std::result::Result<Metadata, &'static str>,
    behaviors: HashMap<String, Behavior>,
    pub resolves: AtomicUsize,
    pub fetched: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Fake {
    pub fn new(metadata: Metadata) -> Self {
        Fake {
            metadata: Ok(metadata),
            behaviors: HashMap::new(),
            resolves: AtomicUsize::new(0),
            fetched: Mutex::new(vec![]),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }
    pub fn unresolvable(message: &'static str) -> Self {
        let mut ret = Fake::new(Metadata::default());
        ret.metadata = Err(message);
        ret
    }
    pub fn with(mut self, title: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(watch_url(title), behavior);
        self
    }
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

impl Extractor for Fake {
    fn resolve(&self, _url: &str) -> Result<Metadata> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.metadata.clone().map_err(|e| anyhow!("ERROR: {}", e))
    }

    fn fetch(&self, url: &str, output: &Path, _kind: MediaKind) -> Result<()> {
        self.fetched.lock().unwrap().push(url.to_owned());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let ret: Result<()> = match self.behaviors.get(url) {
            None | Some(Behavior::Write) => std::fs::write(output, b"media").map_err(From::from),
            Some(Behavior::WriteEmpty) => std::fs::write(output, b"").map_err(From::from),
            Some(Behavior::Fail(msg)) => Err(anyhow!("ERROR: {}", msg)),
            Some(Behavior::Panic) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                panic!("extractor blew up on {}", url)
            }
            Some(Behavior::Sleep(d)) => {
                std::thread::sleep(*d);
                std::fs::write(output, b"media").map_err(From::from)
            }
            Some(Behavior::WaitThenWrite(signal)) => {
                let _ = signal.recv_timeout(Duration::from_secs(5));
                std::fs::write(output, b"media").map_err(From::from)
            }
            Some(Behavior::Interrupt(flag)) => {
                flag.store(true);
                std::fs::write(output, b"media").map_err(From::from)
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        ret
    }
}

/// Remembers every event; optionally signals when a network failure gets recorded.
#[derive(Default)]
pub struct Recorder {
    pub events: RefCell<Vec<String>>,
    pub on_network_failure: Option<Sender<()>>,
}

impl Recorder {
    pub fn signalling(tx: Sender<()>) -> Self {
        Recorder { events: RefCell::new(vec![]), on_network_failure: Some(tx) }
    }
    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl Reporter for Recorder {
    fn resolved(&self, _source: &str, title: &str, items: usize) {
        self.events.borrow_mut().push(format!("resolved {} {}", title, items));
    }
    fn invalid_entry(&self, failure: &Failure) {
        self.events.borrow_mut().push(format!("invalid {}", failure.title));
    }
    fn dispatched(&self, item: &PlaylistItem) {
        self.events.borrow_mut().push(format!("dispatched {}", item.title));
    }
    fn finished(&self, outcome: &DownloadOutcome, done: usize, total: usize) {
        let what = match outcome {
            DownloadOutcome::Completed(_) => "completed".to_owned(),
            DownloadOutcome::Skipped(_) => "skipped".to_owned(),
            DownloadOutcome::Failed(item, reason) => {
                if let (FailureReason::Network(_), Some(tx)) = (reason, &self.on_network_failure) {
                    let _ = tx.send(());
                }
                format!("failed {}", item.title)
            }
        };
        self.events.borrow_mut().push(format!("{} {}/{}", what, done, total));
    }
    fn aborted(&self, _source: &str, reason: &AbortReason) {
        self.events.borrow_mut().push(format!("aborted {}", reason));
    }
}
