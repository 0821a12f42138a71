use anyhow::{bail, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::item::MediaKind;

/// Line-oriented questions for interactive runs.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Prompter { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// `None` once the input is exhausted.
    fn ask(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_owned()))
    }

    pub fn media_kind(&mut self) -> Result<MediaKind> {
        loop {
            match self.ask("Enter download format (audio/mp3 or video/mp4): ")? {
                None => bail!("no download format given"),
                Some(answer) => match answer.parse() {
                    Ok(kind) => return Ok(kind),
                    Err(_) => writeln!(self.output, "Invalid input. Please enter 'audio', 'mp3', 'video', or 'mp4'.")?,
                },
            }
        }
    }

    pub fn directory(&mut self, default: &Path) -> Result<PathBuf> {
        writeln!(self.output, "Default download directory: {}", default.display())?;
        Ok(match self.ask("Enter custom directory (or press Enter to use default): ")? {
            Some(answer) if !answer.is_empty() => PathBuf::from(answer),
            _ => default.to_owned(),
        })
    }

    /// Reads URLs until an empty line, end of input, or `max` of them.
    pub fn urls(&mut self, max: usize) -> Result<Vec<String>> {
        let mut ret = vec![];
        while ret.len() < max {
            match self.ask("Enter a YouTube playlist URL (or press Enter to finish): ")? {
                Some(url) if !url.is_empty() => ret.push(url),
                _ => break,
            }
        }
        Ok(ret)
    }
}
