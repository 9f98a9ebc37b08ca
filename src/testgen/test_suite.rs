// src/testgen/test_suite.rs
//
// Turns verbose runner output into per-test records, reads the footer
// summary, and writes the markdown run report.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::Lines;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::testgen::identity::TEST_PREFIX;
use crate::testgen::runner::TestRun;

/// `<qualifier>::test_name[param] STATUS [1.23s]`, anywhere in a line.
static RESULT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(\S+?)::({}\w+)(?:\[[^\]]*\])?\s+(\w+)\s+\[([\d.]+)s\]",
        regex::escape(TEST_PREFIX)
    );
    Regex::new(&pattern).expect("result line pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
    XFail,
    XPass,
    Other(String),
}

impl TestStatus {
    /// Status from a runner word, case-insensitive.
    pub fn from_word(word: &str) -> Self {
        let word = word.to_ascii_lowercase();
        match word.as_str() {
            "passed" => TestStatus::Passed,
            "failed" => TestStatus::Failed,
            "error" => TestStatus::Error,
            "skipped" => TestStatus::Skipped,
            "xfail" => TestStatus::XFail,
            "xpass" => TestStatus::XPass,
            _ => TestStatus::Other(word),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
            TestStatus::Skipped => "skipped",
            TestStatus::XFail => "xfail",
            TestStatus::XPass => "xpass",
            TestStatus::Other(w) => w,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TestStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResultRecord {
    pub test_name: String,
    pub status: TestStatus,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
}

/// Lazy record sequence over a report. Clone it to start over.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    lines: Lines<'a>,
}

impl Iterator for Records<'_> {
    type Item = TestResultRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.by_ref().find_map(parse_line)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub warnings: usize,
    pub duration_s: Option<f64>,
}

/* ---------- Parsing ---------- */

/// Result records in report order. Lines that are not result lines are
/// skipped, as are result lines whose duration does not parse.
pub fn parse(report: &str) -> Records<'_> {
    Records {
        lines: report.lines(),
    }
}

pub fn parse_all(report: &str) -> Vec<TestResultRecord> {
    parse(report).collect()
}

pub fn parse_line(line: &str) -> Option<TestResultRecord> {
    let caps = RESULT_LINE.captures(line)?;

    let duration_seconds = caps[4].parse::<f64>().ok().filter(|d| d.is_finite())?;

    Some(TestResultRecord {
        test_name: caps[2].to_string(),
        status: TestStatus::from_word(&caps[3]),
        duration_seconds,
    })
}

/// Counts from the `=== 3 passed, 1 failed in 0.42s ===` footer, or from
/// the parsed records when the report has no footer.
pub fn summarize(report: &str) -> ReportSummary {
    let footer = report.lines().map(str::trim).filter(|l| is_footer(l)).last();

    let mut summary = ReportSummary::default();
    match footer {
        Some(line) => parse_footer_summary_line(line, &mut summary),
        None => {
            for r in parse(report) {
                match r.status {
                    TestStatus::Passed | TestStatus::XPass => summary.passed += 1,
                    TestStatus::Failed => summary.failed += 1,
                    TestStatus::Skipped | TestStatus::XFail => summary.skipped += 1,
                    TestStatus::Error => summary.errors += 1,
                    TestStatus::Other(_) => {}
                }
            }
        }
    }
    summary
}

fn is_footer(line: &str) -> bool {
    line.starts_with('=') && line.ends_with('=') && line.contains(" in ")
}

fn parse_footer_summary_line(line: &str, out: &mut ReportSummary) {
    let inner = line.trim_matches('=').trim();

    let (counts, duration) = match inner.rsplit_once(" in ") {
        Some(v) => v,
        None => return,
    };

    out.duration_s = duration
        .split_whitespace()
        .next()
        .and_then(|d| d.trim_end_matches('s').parse::<f64>().ok());

    for token in counts.split(',').map(str::trim) {
        let mut parts = token.split_whitespace();
        let Some(num) = parts.next().and_then(|n| n.parse::<usize>().ok()) else {
            continue;
        };

        let label = parts.collect::<Vec<_>>().join(" ");

        match label.as_str() {
            "passed" | "xpassed" => out.passed += num,
            "failed" => out.failed += num,
            "skipped" | "xfailed" | "deselected" => out.skipped += num,
            "error" | "errors" => out.errors += num,
            "warning" | "warnings" => out.warnings += num,
            _ => {}
        }
    }
}

/* ---------- Report Writing ---------- */

pub fn write_report(path: &Path, run: &TestRun) -> io::Result<()> {
    let mut out = File::create(path)?;

    writeln!(out, "# Test Run Report\n")?;
    writeln!(out, "- **Target:** `{}`", run.target)?;
    writeln!(
        out,
        "- **Status:** {}",
        if run.success { "PASSED" } else { "FAILED" }
    )?;
    writeln!(
        out,
        "- **Finished:** {}",
        run.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "- **Wall time:** {} ms\n", run.duration_ms)?;

    let s = &run.summary;
    writeln!(out, "## Summary\n")?;
    writeln!(
        out,
        "- Passed: {}\n- Failed: {}\n- Skipped: {}\n- Errors: {}\n- Warnings: {}\n- Duration: {:.2}s\n",
        s.passed,
        s.failed,
        s.skipped,
        s.errors,
        s.warnings,
        s.duration_s.unwrap_or(0.0),
    )?;

    if !run.results.is_empty() {
        writeln!(out, "## Tests\n")?;
        writeln!(out, "| Test | Status | Duration |")?;
        writeln!(out, "|------|--------|----------|")?;
        for r in &run.results {
            writeln!(
                out,
                "| `{}` | {} | {:.2}s |",
                r.test_name, r.status, r.duration_seconds
            )?;
        }
        writeln!(out)?;
    }

    let failing: Vec<_> = run
        .invocations
        .iter()
        .filter(|i| i.exit_code != Some(0))
        .collect();
    if !failing.is_empty() {
        writeln!(out, "## Failing invocations\n")?;
        for inv in failing {
            let code = inv
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            writeln!(out, "- `{}` (exit {})", inv.command, code)?;
        }
    }

    Ok(())
}
