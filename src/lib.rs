//! Manual coverage markers.
//!
//! Put `covmark::sample()` inside the methods you care about. Each executed
//! marker records `Type#method:line` for its caller. Later, [`scan::scan`]
//! finds every marker in the source tree and [`report::render`] lists each
//! instrumented method with its markers flagged `+` (hit) or `-` (missed).
//!
//! Runtime keys are recovered from debug info, so the instrumented program
//! must be built with it (the default for dev and test profiles).
use std::collections::HashSet;
use std::path::Path;

pub mod cli;
pub mod error;
pub mod key;
pub mod model;
pub mod recorder;
pub mod report;
pub mod scan;
pub mod stack;

pub use error::{CovmarkError, Result};
pub use key::LocationKey;
pub use recorder::Session;

/// Symbol path of [`sample`] as it appears on the stack.
pub(crate) const SAMPLE_ENTRY: &str = concat!(module_path!(), "::sample");

/// Record that the calling method reached this point.
#[inline(never)]
pub fn sample() {
    Session::global().sample();
}

/// Keys recorded so far by the global session.
pub fn hits() -> HashSet<String> {
    Session::global().hits()
}

/// Write the global session's keys to `path`, replacing the file.
pub fn save(path: impl AsRef<Path>) -> Result<()> {
    Session::global().save(path.as_ref())
}

/// Write the global session's keys to `path` and start over empty.
pub fn flush(path: impl AsRef<Path>) -> Result<()> {
    Session::global().flush(path.as_ref())
}
