//! testgen/identity.rs
//!
//! Test identity: the name of the test function an artifact defines.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::testgen::merge::MergeError;

/// Functions whose name starts with this prefix are tests (pytest convention).
pub const TEST_PREFIX: &str = "test_";

static TEST_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+({}\w*)[ \t]*\(",
        regex::escape(TEST_PREFIX)
    );
    Regex::new(&pattern).expect("test signature pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TestIdentity(String);

impl TestIdentity {
    /// First test signature in `text`. Later signatures are ignored.
    pub fn find(text: &str) -> Option<Self> {
        TEST_SIGNATURE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| Self(m.as_str().to_string()))
    }

    /// Identity of a code block about to be merged. Code without a test
    /// signature cannot be merged.
    pub fn from_code(code: &str) -> Result<Self, MergeError> {
        Self::find(code).ok_or(MergeError::MissingIdentity)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pattern matching this identity's own signature line.
    pub(crate) fn signature_pattern(&self) -> Regex {
        let pattern = format!(
            r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+{}[ \t]*\(",
            regex::escape(&self.0)
        );
        Regex::new(&pattern).expect("escaped identity is a valid pattern")
    }

    /// Number of times this identity's signature appears in `text`.
    pub fn count_in(&self, text: &str) -> usize {
        self.signature_pattern().find_iter(text).count()
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
