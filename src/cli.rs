//! Command handler functions for the covmark CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::collections::HashSet;
use std::fmt::Write;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::{info, warn};

use crate::error::CovmarkError;
use crate::recorder::load_hits;
use crate::report::{
    CoverageReport, JsonFormatter, MarkdownFormatter, ReportFormatter, TextFormatter,
};
use crate::scan;

/// Output style for the `report` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Style {
    Markdown,
    Text,
    Json,
}

impl Style {
    pub fn formatter(self) -> Box<dyn ReportFormatter> {
        match self {
            Style::Markdown => Box::new(MarkdownFormatter),
            Style::Text => Box::new(TextFormatter),
            Style::Json => Box::new(JsonFormatter::new()),
        }
    }
}

/// Load a hit file. No file given, or a file that does not exist yet, means
/// nothing was hit.
fn read_hits(hits: Option<&Path>) -> Result<HashSet<String>> {
    let Some(path) = hits else {
        return Ok(HashSet::new());
    };
    match load_hits(path) {
        Ok(hits) => Ok(hits),
        Err(CovmarkError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "hit file not found, reporting every marker as missed");
            Ok(HashSet::new())
        }
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read hit file {}", path.display()))
        }
    }
}

pub fn cmd_report(src: &Path, hits: Option<&Path>, style: Style) -> Result<String> {
    let hits = read_hits(hits)?;
    let (index, stats) = scan::scan_with_stats(src)
        .with_context(|| format!("Failed to scan {}", src.display()))?;
    if stats.files_skipped > 0 {
        info!(skipped = stats.files_skipped, "some source files could not be parsed");
    }

    let report = CoverageReport::build(&index, &hits);
    Ok(report.format(style.formatter().as_ref())?)
}

pub fn cmd_summary(src: &Path, hits: Option<&Path>) -> Result<String> {
    cmd_report(src, hits, Style::Text)
}

pub fn cmd_markers(src: &Path) -> Result<String> {
    let index = scan::scan(src).with_context(|| format!("Failed to scan {}", src.display()))?;

    let mut out = String::new();
    for site in index.sites() {
        writeln!(out, "{}", site.key())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// A source tree with one instrumented method: markers on lines 4 and 6.
    fn seed_tree(dir: &Path) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("src/gate.rs"),
            "\
pub struct Gate;

impl Gate {
    pub fn open(&self, force: bool) {
        if force {
            covmark::sample();
        }
        covmark::sample();
    }
}
",
        )
        .unwrap();
    }

    #[test]
    fn test_cmd_markers() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let out = cmd_markers(dir.path()).unwrap();

        assert_eq!(out, "Gate#open:6\nGate#open:8\n");
    }

    #[test]
    fn test_cmd_report_markdown() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let hits = dir.path().join("hits.txt");
        fs::write(&hits, "Gate#open:8\n\n").unwrap();

        let out = cmd_report(dir.path(), Some(&hits), Style::Markdown).unwrap();

        assert!(out.starts_with("```diff\n"));
        assert!(out.contains("  4:    pub fn open(&self, force: bool) {\n"));
        assert!(out.contains("- 6:            covmark::sample();\n"));
        assert!(out.contains("+ 8:        covmark::sample();\n"));
        assert!(out.ends_with("\n```\n"));
    }

    #[test]
    fn test_cmd_report_without_hits() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let out = cmd_report(dir.path(), None, Style::Markdown).unwrap();

        assert!(out.contains("- 6:"));
        assert!(out.contains("- 8:"));
    }

    #[test]
    fn test_cmd_report_json() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let out = cmd_report(dir.path(), None, Style::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(value["total"], 2);
        assert_eq!(value["classes"][0]["name"], "Gate");
    }

    #[test]
    fn test_cmd_summary() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        let hits = dir.path().join("hits.txt");
        fs::write(&hits, "Gate#open:6\nGate#open:8\n").unwrap();

        let out = cmd_summary(dir.path(), Some(&hits)).unwrap();

        assert!(out.contains("Markers hit: 100.0% (2/2)"));
        assert!(out.contains("open  2/2 (100.0%)"));
    }

    #[test]
    fn test_cmd_report_missing_hit_file() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let missing = dir.path().join("nope.txt");
        let out = cmd_report(dir.path(), Some(&missing), Style::Markdown).unwrap();

        assert_eq!(out, cmd_report(dir.path(), None, Style::Markdown).unwrap());
        assert!(out.contains("- 6:"));
        assert!(out.contains("- 8:"));
    }

    #[test]
    fn test_cmd_report_unreadable_hit_file() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        // A directory cannot be read as a hit file.
        let result = cmd_report(dir.path(), Some(&dir.path().join("src")), Style::Text);
        assert!(result.is_err());
    }

    #[test]
    fn test_cmd_report_skips_unparsable_file() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        fs::write(dir.path().join("src/broken.rs"), "impl Broken {").unwrap();

        let out = cmd_report(dir.path(), None, Style::Text).unwrap();

        assert!(out.contains("Markers hit: 0.0% (0/2)"));
        assert!(!out.contains("Broken"));
    }

    #[test]
    fn test_cmd_report_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = cmd_report(&dir.path().join("absent"), None, Style::Markdown);
        assert!(result.is_err());
    }
}
