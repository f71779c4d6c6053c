//! Joining scan results with recorded hits, and formatting the outcome.

use std::collections::HashSet;
use std::fmt::Write;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::key::LocationKey;
use crate::model::{rate, CoverageIndex, MethodCoverage};

/// How a report line is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineMark {
    /// A marker that was executed.
    Hit,
    /// A marker that was never executed.
    Missed,
    /// Any other line.
    Neutral,
}

impl LineMark {
    /// Diff prefix character.
    pub fn symbol(self) -> char {
        match self {
            LineMark::Hit => '+',
            LineMark::Missed => '-',
            LineMark::Neutral => ' ',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedLine {
    pub number: u32,
    pub mark: LineMark,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodReport {
    pub name: String,
    pub path: String,
    /// Marker lines that were hit.
    pub covered: usize,
    /// Marker lines in the method.
    pub total: usize,
    pub lines: Vec<AnnotatedLine>,
}

impl MethodReport {
    fn build(method: &MethodCoverage, hits: &HashSet<String>) -> Self {
        let body = &method.body;
        let mut covered = 0;
        let mut total = 0;

        let lines = body
            .lines()
            .map(|(number, text)| {
                let mark = if method.is_marker_line(number) {
                    total += 1;
                    let key = LocationKey::new(body.class.as_str(), body.name.as_str(), number);
                    if hits.contains(&key.to_string()) {
                        covered += 1;
                        LineMark::Hit
                    } else {
                        LineMark::Missed
                    }
                } else {
                    LineMark::Neutral
                };
                AnnotatedLine {
                    number,
                    mark,
                    text: text.to_string(),
                }
            })
            .collect();

        Self {
            name: body.name.clone(),
            path: body.path.display().to_string(),
            covered,
            total,
            lines,
        }
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        rate(self.covered as u64, self.total as u64)
    }

    /// Line numbers of markers that were never hit, ascending.
    pub fn missed_lines(&self) -> Vec<u32> {
        self.lines
            .iter()
            .filter(|l| l.mark == LineMark::Missed)
            .map(|l| l.number)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub name: String,
    pub methods: Vec<MethodReport>,
}

/// Every method of a [`CoverageIndex`] with each line marked, ready to be
/// formatted. Hits without a matching marker are simply never looked at.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub classes: Vec<ClassReport>,
    pub covered: usize,
    pub total: usize,
}

impl CoverageReport {
    pub fn build(index: &CoverageIndex, hits: &HashSet<String>) -> Self {
        let classes: Vec<ClassReport> = index
            .classes
            .iter()
            .map(|class| ClassReport {
                name: class.name.clone(),
                methods: class
                    .methods
                    .iter()
                    .map(|m| MethodReport::build(m, hits))
                    .collect(),
            })
            .collect();

        let methods = || classes.iter().flat_map(|c| c.methods.iter());
        let covered = methods().map(|m| m.covered).sum();
        let total = methods().map(|m| m.total).sum();

        Self {
            classes,
            covered,
            total,
        }
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        rate(self.covered as u64, self.total as u64)
    }

    /// Format using a specific formatter.
    pub fn format(&self, formatter: &dyn ReportFormatter) -> Result<String> {
        formatter.format(self)
    }
}

/// Trait for formatting coverage reports.
pub trait ReportFormatter {
    fn format(&self, report: &CoverageReport) -> Result<String>;
}

/// The annotated source listing: one fenced `diff` block, each line written
/// as `<mark> <line>:<text>`, a blank line after every method.
pub struct MarkdownFormatter;

impl ReportFormatter for MarkdownFormatter {
    fn format(&self, report: &CoverageReport) -> Result<String> {
        let mut md = String::from("```diff\n");
        for class in &report.classes {
            for method in &class.methods {
                for line in &method.lines {
                    writeln!(md, "{} {}:{}", line.mark.symbol(), line.number, line.text)?;
                }
                md.push('\n');
            }
        }
        md.push_str("```\n");
        Ok(md)
    }
}

/// Per-method hit counts with missed marker lines.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn format(&self, report: &CoverageReport) -> Result<String> {
        let mut out = String::new();

        if report.total == 0 {
            out.push_str("No coverage markers found.\n");
            return Ok(out);
        }

        let pct = report.rate() * 100.0;
        let covered = report.covered;
        let total = report.total;
        writeln!(out, "Markers hit: {pct:.1}% ({covered}/{total})")?;

        for class in &report.classes {
            writeln!(out, "\n{}", class.name)?;
            for method in &class.methods {
                let name = &method.name;
                let covered = method.covered;
                let total = method.total;
                let pct = method.rate() * 100.0;
                write!(out, "  {name}  {covered}/{total} ({pct:.1}%)")?;
                let missed = method.missed_lines();
                if !missed.is_empty() {
                    write!(out, "  missed: {}", format_line_ranges(&missed))?;
                }
                out.push('\n');
            }
        }

        Ok(out)
    }
}

/// The full report as JSON, stamped with the time it was generated.
pub struct JsonFormatter {
    pub generated_at: DateTime<Utc>,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
        }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    covered: usize,
    total: usize,
    rate: f64,
    classes: &'a [ClassReport],
}

impl ReportFormatter for JsonFormatter {
    fn format(&self, report: &CoverageReport) -> Result<String> {
        let doc = JsonReport {
            generated_at: self.generated_at.to_rfc3339(),
            covered: report.covered,
            total: report.total,
            rate: report.rate(),
            classes: &report.classes,
        };
        let mut json = serde_json::to_string_pretty(&doc)?;
        json.push('\n');
        Ok(json)
    }
}

/// Render the markdown diff report for `index` against `hits`.
pub fn render(index: &CoverageIndex, hits: &HashSet<String>) -> Result<String> {
    CoverageReport::build(index, hits).format(&MarkdownFormatter)
}

/// Write a rendered report, replacing any existing file.
pub fn write_report(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text)?;
    info!(path = %path.display(), bytes = text.len(), "wrote coverage report");
    Ok(())
}

/// Coalesce sorted line numbers into `(start, end)` runs of consecutive lines.
#[must_use]
pub fn coalesce_ranges(lines: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let mut start = first;
    let mut end = first;
    for &line in rest {
        if line == end + 1 {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Format line numbers into compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_ranges(lines: &[u32]) -> String {
    coalesce_ranges(lines)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::model::{MarkerSite, MethodBody};

    /// `foo` spans lines 10-15 with markers on 11 and 13.
    fn foo_index() -> CoverageIndex {
        let source_lines = [
            "    fn foo(&self) {",
            "        covmark::sample();",
            "",
            "        covmark::sample();",
            "        self.bar()",
            "    }",
        ];
        let mut index = CoverageIndex::new();
        index.insert(MethodCoverage {
            body: MethodBody {
                class: "Widget".to_string(),
                name: "foo".to_string(),
                path: PathBuf::from("src/widget.rs"),
                start_line: 10,
                end_line: 15,
                source_lines: source_lines.iter().map(|l| l.to_string()).collect(),
            },
            sites: [11, 13]
                .iter()
                .map(|&line| MarkerSite {
                    class: "Widget".to_string(),
                    method: "foo".to_string(),
                    line,
                })
                .collect(),
        });
        index
    }

    fn hits(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_render_one_of_two_markers_hit() {
        let md = render(&foo_index(), &hits(&["Widget#foo:11"])).unwrap();
        let expected = concat!(
            "```diff\n",
            "  10:    fn foo(&self) {\n",
            "+ 11:        covmark::sample();\n",
            "  12:\n",
            "- 13:        covmark::sample();\n",
            "  14:        self.bar()\n",
            "  15:    }\n",
            "\n",
            "```\n",
        );
        assert_eq!(md, expected);
    }

    #[test]
    fn test_render_without_hits_marks_all_missed() {
        let md = render(&foo_index(), &HashSet::new()).unwrap();
        assert!(md.contains("- 11:"));
        assert!(md.contains("- 13:"));
        assert!(!md.contains("+ "));
    }

    #[test]
    fn test_unmatched_hits_are_ignored() {
        let stale = hits(&["Other#thing:1", "Widget#foo:12"]);
        let report = CoverageReport::build(&foo_index(), &stale);
        assert_eq!(report.covered, 0);
        assert_eq!(report.total, 2);
        let md = report.format(&MarkdownFormatter).unwrap();
        assert!(md.contains("  12:\n"));
    }

    #[test]
    fn test_render_empty_index() {
        let md = render(&CoverageIndex::new(), &HashSet::new()).unwrap();
        assert_eq!(md, "```diff\n```\n");
    }

    #[test]
    fn test_text_formatter() {
        let report = CoverageReport::build(&foo_index(), &hits(&["Widget#foo:11"]));
        let text = report.format(&TextFormatter).unwrap();
        assert!(text.contains("Markers hit: 50.0% (1/2)"));
        assert!(text.contains("Widget"));
        assert!(text.contains("foo  1/2 (50.0%)  missed: 13"));
    }

    #[test]
    fn test_text_formatter_no_markers() {
        let report = CoverageReport::build(&CoverageIndex::new(), &HashSet::new());
        let text = report.format(&TextFormatter).unwrap();
        assert_eq!(text, "No coverage markers found.\n");
    }

    #[test]
    fn test_json_formatter() {
        let report = CoverageReport::build(&foo_index(), &hits(&["Widget#foo:13"]));
        let formatter = JsonFormatter {
            generated_at: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = report.format(&formatter).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["generated_at"], "2024-01-02T03:04:05+00:00");
        assert_eq!(value["covered"], 1);
        assert_eq!(value["total"], 2);
        let lines = &value["classes"][0]["methods"][0]["lines"];
        assert_eq!(lines[1]["mark"], "missed");
        assert_eq!(lines[3]["mark"], "hit");
        assert_eq!(lines[2]["text"], "");
    }

    #[test]
    fn test_write_report_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("report.md");
        assert!(write_report(&path, "x").is_err());
    }

    #[test]
    fn test_format_line_ranges() {
        assert_eq!(format_line_ranges(&[]), "");
        assert_eq!(format_line_ranges(&[5]), "5");
        assert_eq!(format_line_ranges(&[1, 3, 4, 5, 10]), "1, 3-5, 10");
    }
}
