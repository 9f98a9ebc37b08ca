//! Extract model-generated tests from free-form output, graft them into
//! test files by test name, and turn pytest's verbose report into records.

pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod testgen;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
pub use testgen::extract::{extract, extract_detailed, ExtractError, ExtractedPayload, ParseStrategy};
pub use testgen::identity::TestIdentity;
pub use testgen::merge::{merge, MergeError, MergeOutcome, MergeStatus, TestFileState};
pub use testgen::test_suite::{parse, parse_all, TestResultRecord, TestStatus};
pub use workspace::Workspace;
