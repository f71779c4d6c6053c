//! Runtime record of executed markers.
//!
//! A [`Session`] owns a set of hit keys. Instrumented code normally goes
//! through [`crate::sample`], which records into the global session created
//! on first use and kept for the life of the process. Tests construct their
//! own sessions so they never share state.
//!
//! Hit files are plain text, one `Class#method:line` key per line.
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{info, warn};

use crate::error::{CovmarkError, Result};
use crate::key::LocationKey;
use crate::stack::{caller_key, BacktraceStack, CallStack, Frame};

static GLOBAL: OnceLock<Session> = OnceLock::new();

/// Symbol path of [`Session::sample`] as it appears on the stack.
const SESSION_SAMPLE: &str = concat!(module_path!(), "::Session::sample");

/// A set of hit keys, safe to record into from any number of threads.
#[derive(Debug, Default)]
pub struct Session {
    hits: Mutex<HashSet<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide session, created empty on first use.
    pub fn global() -> &'static Session {
        GLOBAL.get_or_init(Session::new)
    }

    /// Record the location of whoever called this method.
    #[inline(never)]
    pub fn sample(&self) {
        self.sample_from(&BacktraceStack);
    }

    /// Record the caller found on `stack`. Returns the recorded key, or
    /// `None` (recording nothing) when the stack holds no marker frame or
    /// the caller cannot be keyed.
    pub fn sample_from(&self, stack: &dyn CallStack) -> Option<LocationKey> {
        let frames = stack.frames();
        let key = caller_key(&frames, is_marker_frame)?;
        self.record(&key);
        Some(key)
    }

    /// Insert a key. Returns `false` if it was already present.
    pub fn record(&self, key: &LocationKey) -> bool {
        self.lock().insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    /// A copy of every key recorded so far.
    pub fn hits(&self) -> HashSet<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Write all keys to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_hits(path, &self.lock())
    }

    /// Write the union of this session's keys and those already in `path`.
    /// A missing file counts as empty.
    pub fn save_merged(&self, path: &Path) -> Result<()> {
        let mut merged = match load_hits(path) {
            Ok(existing) => existing,
            Err(CovmarkError::Io(e)) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };
        merged.extend(self.hits());
        write_hits(path, &merged)
    }

    /// Save to `path`, then forget every key. Concurrent samples land
    /// either in the file or in the emptied set, never in neither.
    pub fn flush(&self, path: &Path) -> Result<()> {
        let mut hits = self.lock();
        write_hits(path, &hits)?;
        hits.clear();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.hits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether `frame` is one of the marker entry points.
pub fn is_marker_frame(frame: &Frame) -> bool {
    frame
        .path()
        .is_some_and(|path| path.is(SESSION_SAMPLE) || path.is(crate::SAMPLE_ENTRY))
}

/// Parse hit file contents. Blank lines are skipped; malformed keys are
/// kept (they simply never match a marker) but logged.
pub fn parse_hits(text: &str) -> HashSet<String> {
    let mut hits = HashSet::new();
    for line in text.lines() {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        if key.parse::<LocationKey>().is_err() {
            warn!(key, "malformed hit key");
        }
        hits.insert(key.to_string());
    }
    hits
}

pub fn load_hits(path: &Path) -> Result<HashSet<String>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_hits(&text))
}

fn write_hits(path: &Path, hits: &HashSet<String>) -> Result<()> {
    let mut keys: Vec<&String> = hits.iter().collect();
    keys.sort();

    let mut out = String::new();
    for key in keys {
        out.push_str(key);
        out.push('\n');
    }
    fs::write(path, out)?;

    info!(path = %path.display(), keys = hits.len(), "wrote hit file");
    Ok(())
}
