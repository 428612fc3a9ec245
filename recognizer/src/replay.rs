//! Landmark sources: where frames come from.
//!
//! A recording holds one frame per line, either `nil` (no hand) or
//! `(:hand "Right" :points ((x y z) ...))`.  Blank lines and `;` comments
//! are skipped.  A line that does not parse is replayed as a no-hand
//! frame so the timeline is kept.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::landmarks::LandmarkFrame;

/// Produces frames until exhausted.
pub trait LandmarkSource: Send {
    /// `None` when the source is exhausted; `Some(None)` for a frame with
    /// no hand detected.
    fn next_frame(&mut self) -> Option<Option<LandmarkFrame>>;
}

/// Parse one recording line.  `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> anyhow::Result<Option<Option<LandmarkFrame>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') {
        return Ok(None);
    }
    let value = lexpr::from_str(line).map_err(|e| anyhow!("invalid s-expression: {}", e))?;
    LandmarkFrame::from_sexp(&value).map(Some)
}

pub struct ReplaySource<R: BufRead> {
    lines: Lines<R>,
    line_number: usize,
    frames: u64,
    malformed: u64,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow!("failed to open recording {}: {}", path.display(), e))?;
        debug!("Replaying landmarks from {}", path.display());
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            frames: 0,
            malformed: 0,
        }
    }

    /// Frames produced so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Lines that could not be parsed.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

impl<R: BufRead + Send> LandmarkSource for ReplaySource<R> {
    fn next_frame(&mut self) -> Option<Option<LandmarkFrame>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("Recording read failed at line {}: {}", self.line_number + 1, e);
                    return None;
                }
            };
            self.line_number += 1;
            match parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(frame)) => {
                    self.frames += 1;
                    return Some(frame);
                }
                Err(e) => {
                    self.malformed += 1;
                    self.frames += 1;
                    warn!("Recording line {} unreadable ({}); treating as no hand", self.line_number, e);
                    return Some(None);
                }
            }
        }
    }
}
