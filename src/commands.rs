//! commands.rs
//!
//! The two request pipelines exposed to callers.
//!
//! Responsibilities:
//! - Validate request fields
//! - Read the target file once, write it once
//! - Log what happened
//!
//! Non-responsibilities:
//! - Payload recovery, merging, result parsing (see `testgen`)
//! - Presentation (see `main.rs`)

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::testgen::extract::{extract_detailed, ParseStrategy};
use crate::testgen::identity::TestIdentity;
use crate::testgen::merge::{merge, MergeStatus, TestFileState};
use crate::testgen::runner::{self, PytestRunner, TestRun, TestRunRequest};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReport {
    pub status: MergeStatus,
    pub file: String,
    pub test_name: TestIdentity,
    /// Name the model gave the payload; advisory.
    pub payload_name: String,
    pub strategy: ParseStrategy,
}

/* ============================================================
   Submit artifact
   ============================================================ */

/// Extract the test in `raw_text` and graft it into `file_id`.
///
/// Nothing is written unless extraction and merge both succeed.
pub fn submit_artifact(
    ws: &Workspace,
    file_id: &str,
    raw_text: &str,
    tag: &str,
) -> Result<SubmitReport> {
    if file_id.trim().is_empty() {
        return Err(Error::MissingField("file"));
    }
    if raw_text.trim().is_empty() {
        return Err(Error::MissingField("contents"));
    }

    let extraction = extract_detailed(raw_text, tag)?;
    let payload = extraction.payload;
    let test_name = TestIdentity::from_code(&payload.code)?;

    let rel = ws.relative(file_id)?;
    let path = ws.resolve(&rel)?;
    let target = TestFileState {
        content: ws.read(&path)?,
        path,
    };

    let outcome = merge(&target, &payload.code)?;
    ws.write_atomic(outcome.path(), outcome.content())?;

    info!(
        file = %rel,
        test = %test_name,
        status = ?outcome.status(),
        strategy = %extraction.strategy,
        "artifact merged"
    );

    Ok(SubmitReport {
        status: outcome.status(),
        file: rel,
        test_name,
        payload_name: payload.name,
        strategy: extraction.strategy,
    })
}

/* ============================================================
   Run tests
   ============================================================ */

/// Run an existing test file, or selected tests in it.
pub fn run_tests(ws: &Workspace, runner: &PytestRunner, req: &TestRunRequest) -> Result<TestRun> {
    if req.file_name.trim().is_empty() {
        return Err(Error::MissingField("file_name"));
    }

    let rel = ws.relative(&req.file_id())?;
    ws.resolve_existing(&rel)?;

    let test_names: Vec<String> = req
        .test_names
        .iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();

    info!(file = %rel, tests = test_names.len(), "running tests");
    runner::run_file(runner, ws.root(), &rel, &test_names)
}
