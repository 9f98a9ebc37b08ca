//! Crate error type and its mapping onto client/not-found/internal classes.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::testgen::extract::ExtractError;
use crate::testgen::merge::MergeError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("invalid file path `{0}`")]
    InvalidPath(String),

    #[error("file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("test runner failed to start: {message}")]
    RunnerLaunch {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("git clone failed: {0}")]
    Clone(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How a failure should be reported to whoever made the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was unusable (4xx).
    ClientInput,
    /// The named file does not exist (404).
    NotFound,
    /// Something failed on our side (500).
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingField(_)
            | Error::Extract(_)
            | Error::Merge(_)
            | Error::InvalidPath(_)
            | Error::Clone(_) => ErrorKind::ClientInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::RunnerLaunch { .. } | Error::Config(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}
