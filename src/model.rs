//! In-memory result of a source scan: which methods hold markers, on which
//! lines, and the original text of each method. Built once per report and
//! read-only afterwards.
use std::path::PathBuf;

use serde::Serialize;

use crate::key::LocationKey;

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// The declared location of one marker call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerSite {
    pub class: String,
    pub method: String,
    /// 1-based, file-absolute.
    pub line: u32,
}

impl MarkerSite {
    pub fn key(&self) -> LocationKey {
        LocationKey::new(self.class.clone(), self.method.clone(), self.line)
    }
}

/// A method's declared span and its source text, sliced from the file so
/// that `source_lines[i]` is file line `start_line + i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodBody {
    pub class: String,
    pub name: String,
    pub path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub source_lines: Vec<String>,
}

impl MethodBody {
    /// Each source line paired with its file line number.
    pub fn lines(&self) -> impl Iterator<Item = (u32, &str)> {
        (self.start_line..).zip(self.source_lines.iter().map(String::as_str))
    }

    pub fn contains_line(&self, line: u32) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// One method and the markers found inside it, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodCoverage {
    pub body: MethodBody,
    pub sites: Vec<MarkerSite>,
}

impl MethodCoverage {
    pub fn is_marker_line(&self, line: u32) -> bool {
        self.sites.iter().any(|site| site.line == line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassCoverage {
    pub name: String,
    pub methods: Vec<MethodCoverage>,
}

/// Methods with markers grouped by class, both in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageIndex {
    pub classes: Vec<ClassCoverage>,
}

impl CoverageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method under its class, creating the class entry on first sight.
    pub fn insert(&mut self, method: MethodCoverage) {
        let class = method.body.class.clone();
        match self.classes.iter_mut().find(|c| c.name == class) {
            Some(entry) => entry.methods.push(method),
            None => self.classes.push(ClassCoverage {
                name: class,
                methods: vec![method],
            }),
        }
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodCoverage> {
        self.classes.iter().flat_map(|c| c.methods.iter())
    }

    pub fn sites(&self) -> impl Iterator<Item = &MarkerSite> {
        self.methods().flat_map(|m| m.sites.iter())
    }

    pub fn marker_count(&self) -> usize {
        self.sites().count()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
