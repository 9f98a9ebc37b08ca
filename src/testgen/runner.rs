// Executes pytest on a test file and collects raw output + parsed results.
// The runner process is the only blocking step; parsing is done afterwards.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::testgen::test_suite::{self, ReportSummary, TestResultRecord};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestRunRequest {
    #[serde(default)]
    pub file_path: Option<String>,
    pub file_name: String,
    /// Specific tests to run. Empty means the whole file.
    #[serde(default)]
    pub test_names: Vec<String>,
}

impl TestRunRequest {
    /// Workspace-relative id of the file to run.
    pub fn file_id(&self) -> String {
        match self.file_path.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => {
                format!("{}/{}", dir.trim_end_matches(['/', '\\']), self.file_name.trim())
            }
            _ => self.file_name.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
}

/// One runner process.
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub command: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub target: String,
    pub status: RunStatus,
    /// True iff every invocation exited with status 0.
    pub success: bool,
    pub results: Vec<TestResultRecord>,
    pub summary: ReportSummary,
    pub invocations: Vec<Invocation>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PytestRunner {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for PytestRunner {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl PytestRunner {
    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            args: cfg.args.clone(),
        }
    }

    /// Command for one target (`path` or `path::test_name`), run from `root`.
    pub fn command_for(&self, root: &Path, target: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(target)
            .current_dir(root)
            .env("PYTHONPATH", root);
        cmd
    }

    fn display_command(&self, target: &str) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.args.iter().map(String::as_str));
        parts.push(target);
        parts.join(" ")
    }

    pub fn invoke(&self, root: &Path, target: &str) -> std::io::Result<Invocation> {
        let command = self.display_command(target);
        debug!(%command, "launching test runner");

        let out = self.command_for(root, target).output()?;

        Ok(Invocation {
            command,
            exit_code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// Run `file` (workspace-relative) from `root`, once per requested test
/// name or once for the whole file.
///
/// If a process cannot be launched the run stops with
/// [`Error::RunnerLaunch`], carrying the output gathered so far.
pub fn run_file(
    runner: &PytestRunner,
    root: &Path,
    file: &str,
    test_names: &[String],
) -> Result<TestRun> {
    let targets: Vec<String> = if test_names.is_empty() {
        vec![file.to_string()]
    } else {
        test_names
            .iter()
            .map(|name| format!("{file}::{}", name.trim()))
            .collect()
    };

    let started = Instant::now();
    let mut invocations = Vec::with_capacity(targets.len());
    let mut stdout = String::new();
    let mut stderr = String::new();

    for target in &targets {
        let inv = match runner.invoke(root, target) {
            Ok(inv) => inv,
            Err(e) => {
                warn!(run_target = %target, error = %e, "test runner failed to start");
                return Err(Error::RunnerLaunch {
                    message: e.to_string(),
                    stdout,
                    stderr,
                });
            }
        };

        append_output(&mut stdout, &inv.stdout);
        append_output(&mut stderr, &inv.stderr);
        invocations.push(inv);
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    let success = invocations.iter().all(|i| i.exit_code == Some(0));
    let results = test_suite::parse_all(&stdout);
    let summary = test_suite::summarize(&stdout);

    info!(
        file,
        invocations = invocations.len(),
        results = results.len(),
        success,
        duration_ms,
        "test run finished"
    );

    Ok(TestRun {
        target: file.to_string(),
        status: if success { RunStatus::Passed } else { RunStatus::Failed },
        success,
        results,
        summary,
        invocations,
        stdout,
        stderr,
        duration_ms,
        finished_at: Utc::now(),
    })
}

fn append_output(buf: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(text);
}
