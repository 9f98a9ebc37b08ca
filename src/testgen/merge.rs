// src/testgen/merge.rs
//
// Grafts one test function into a test file's text by test name.
// Pure string work: the caller reads the file once and writes the result once.

use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::testgen::identity::TestIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("code does not define a test function (expected `def test_...`)")]
    MissingIdentity,
}

/// A target test file: its path and current text, if it exists.
#[derive(Debug, Clone)]
pub struct TestFileState {
    pub path: PathBuf,
    pub content: Option<String>,
}

impl TestFileState {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }

    pub fn existing(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Created,
    Replaced,
    Appended,
}

/// Result of a merge. Every variant carries the new full file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Created {
        path: PathBuf,
        content: String,
    },
    Replaced {
        path: PathBuf,
        identity: TestIdentity,
        content: String,
    },
    Appended {
        path: PathBuf,
        identity: TestIdentity,
        content: String,
    },
}

impl MergeOutcome {
    pub fn status(&self) -> MergeStatus {
        match self {
            MergeOutcome::Created { .. } => MergeStatus::Created,
            MergeOutcome::Replaced { .. } => MergeStatus::Replaced,
            MergeOutcome::Appended { .. } => MergeStatus::Appended,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            MergeOutcome::Created { path, .. }
            | MergeOutcome::Replaced { path, .. }
            | MergeOutcome::Appended { path, .. } => path,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            MergeOutcome::Created { content, .. }
            | MergeOutcome::Replaced { content, .. }
            | MergeOutcome::Appended { content, .. } => content,
        }
    }
}

/* ============================================================
   Public API
   ============================================================ */

/// Merge `new_code` into `target`.
///
/// The test name is taken from `new_code` itself; code without a
/// `def test_...` signature is rejected before anything else happens.
///
/// - no file: `Created`, content is `new_code` verbatim
/// - file defines the same test: `Replaced`, only that definition's span
///   changes. It is swapped for the test's own definition in `new_code`, so
///   imports or a wrapping class in the artifact are not inserted twice.
/// - otherwise: `Appended` after exactly one blank line
pub fn merge(target: &TestFileState, new_code: &str) -> Result<MergeOutcome, MergeError> {
    let identity = TestIdentity::from_code(new_code)?;
    let path = target.path.clone();

    let Some(existing) = target.content.as_deref() else {
        debug!(path = %path.display(), test = %identity, "creating test file");
        return Ok(MergeOutcome::Created {
            path,
            content: new_code.to_string(),
        });
    };

    match find_span(existing, &identity) {
        Some(span) => {
            debug!(
                path = %path.display(),
                test = %identity,
                start = span.start,
                end = span.end,
                "replacing existing definition"
            );
            let block = find_span(new_code, &identity).map_or(new_code, |own| &new_code[own]);
            let content = replace_span(existing, span, block);
            Ok(MergeOutcome::Replaced {
                path,
                identity,
                content,
            })
        }
        None => {
            debug!(path = %path.display(), test = %identity, "appending definition");
            let content = append_block(existing, new_code);
            Ok(MergeOutcome::Appended {
                path,
                identity,
                content,
            })
        }
    }
}

/// Byte range of `identity`'s definition in `content`.
///
/// The span starts at the signature line (plus any decorators directly
/// above it, including ones spread over several lines) and runs to the
/// next definition boundary at the same or an outer indentation level, or
/// end of file. Blank lines before that boundary stay outside the span.
///
/// This is a signature scan, not a parse: a nested helper `def` at the
/// same indentation ends the span early, and irregular indentation can
/// make it run long.
pub fn find_span(content: &str, identity: &TestIdentity) -> Option<Range<usize>> {
    let sig = identity.signature_pattern().find(content)?;
    let sig_start = sig.start();
    let level = indent_width(&content[sig_start..]);

    let start = extend_over_decorators(content, sig_start, level);

    let body_start = content[sig_start..]
        .find('\n')
        .map_or(content.len(), |i| sig_start + i + 1);

    let mut boundary = content.len();
    let mut offset = body_start;
    for line in content[body_start..].split_inclusive('\n') {
        if is_boundary(line, level) {
            boundary = offset;
            break;
        }
        offset += line.len();
    }

    let end = start + content[start..boundary].trim_end().len();
    Some(start..end)
}

/* ============================================================
   Helpers
   ============================================================ */

fn replace_span(existing: &str, span: Range<usize>, block: &str) -> String {
    let prefix = leading_ws(&existing[span.start..]);
    let block = reindent(trim_block(block), prefix);

    let mut out = String::with_capacity(existing.len() + block.len());
    out.push_str(&existing[..span.start]);
    out.push_str(&block);
    out.push_str(&existing[span.end..]);
    out
}

/// `existing`, minus trailing blank lines, then one empty line, then the code.
fn append_block(existing: &str, new_code: &str) -> String {
    let kept = existing.trim_end();
    if kept.is_empty() {
        return new_code.to_string();
    }

    // Trailing spaces on the last real line are content; keep them.
    let rest = &existing[kept.len()..];
    let tail = rest.find('\n').map_or(rest, |i| &rest[..i]).trim_end_matches('\r');

    format!("{kept}{tail}\n\n{new_code}")
}

fn is_boundary(line: &str, level: usize) -> bool {
    let text = line.trim_end();
    if text.trim().is_empty() {
        return false;
    }

    let indent = indent_width(text);
    let stmt = text.trim_start();

    if indent > level {
        return false;
    }
    if stmt.starts_with("def ")
        || stmt.starts_with("async def ")
        || stmt.starts_with("class ")
        || stmt.starts_with('@')
    {
        return true;
    }

    // A method's span also ends where its class does.
    indent < level && !stmt.starts_with('#')
}

/// Walk up from the signature over decorator lines at `level`. Lines of a
/// decorator call that spans several lines are taken along once the whole
/// call balances.
fn extend_over_decorators(content: &str, sig_start: usize, level: usize) -> usize {
    let mut start = sig_start;
    let mut cursor = sig_start;

    while cursor > 0 {
        let prev_end = cursor - 1;
        let prev_start = content[..prev_end].rfind('\n').map_or(0, |i| i + 1);
        let line = &content[prev_start..prev_end];
        let stmt = line.trim();
        let indent = indent_width(line);

        if stmt.is_empty() || indent < level {
            break;
        }
        if indent == level {
            if stmt.starts_with('@') {
                if bracket_depth(&content[prev_start..start]) == 0 {
                    start = prev_start;
                }
            } else if !stmt.starts_with([')', ']', '}']) {
                break;
            }
        }
        cursor = prev_start;
    }
    start
}

/// Net bracket depth of `text`, skipping string literals and comments.
fn bracket_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '#' => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            },
        }
    }
    depth
}

fn leading_ws(s: &str) -> &str {
    &s[..s.len() - s.trim_start_matches([' ', '\t']).len()]
}

fn indent_width(s: &str) -> usize {
    s.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Drop leading blank lines and trailing whitespace.
fn trim_block(code: &str) -> &str {
    let code = code.trim_end();
    let mut start = 0;
    for line in code.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    &code[start..]
}

/// Re-indent `code` so its first line starts with `prefix`, the indentation
/// of the definition being replaced. Deeper lines keep their extra indent.
fn reindent(code: &str, prefix: &str) -> String {
    let own = leading_ws(code);
    if own == prefix {
        return code.to_string();
    }

    let base = indent_width(own);
    code.split_inclusive('\n')
        .map(|line| {
            if line.trim().is_empty() {
                return line.to_string();
            }
            let cut = line
                .char_indices()
                .scan(0usize, |w, (i, c)| {
                    if *w >= base || !(c == ' ' || c == '\t') {
                        return None;
                    }
                    *w += if c == '\t' { 4 } else { 1 };
                    Some(i + c.len_utf8())
                })
                .last()
                .unwrap_or(0);
            format!("{prefix}{}", &line[cut..])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXISTING: &str = "import pytest\n\n\ndef test_add():\n    assert 1 + 1 == 2\n\n\ndef test_sub():\n    assert 2 - 1 == 1\n";

    fn file(content: &str) -> TestFileState {
        TestFileState::existing("tests/test_math.py", content)
    }

    #[test]
    fn absent_file_is_created_verbatim() {
        let code = "def test_new():\n    assert True\n";
        let out = merge(&TestFileState::missing("tests/test_new.py"), code).unwrap();

        assert_eq!(out.status(), MergeStatus::Created);
        assert_eq!(out.content(), code);
        assert_eq!(out.path(), Path::new("tests/test_new.py"));
    }

    #[test]
    fn code_without_test_signature_is_rejected() {
        let err = merge(&file(EXISTING), "def helper():\n    pass").unwrap_err();
        assert_eq!(err, MergeError::MissingIdentity);

        let err = merge(&TestFileState::missing("x.py"), "print('hi')").unwrap_err();
        assert_eq!(err, MergeError::MissingIdentity);
    }

    #[test]
    fn existing_definition_is_replaced_in_place() {
        let code = "def test_add():\n    assert 2 + 2 == 4";
        let out = merge(&file(EXISTING), code).unwrap();

        let expected = "import pytest\n\n\ndef test_add():\n    assert 2 + 2 == 4\n\n\ndef test_sub():\n    assert 2 - 1 == 1\n";
        assert_eq!(out.status(), MergeStatus::Replaced);
        assert_eq!(out.content(), expected);
    }

    #[test]
    fn replacement_keeps_text_outside_span_byte_identical() {
        let code = "def test_sub():\n    assert 3 - 1 == 2\n";
        let identity = TestIdentity::find(code).unwrap();
        let span = find_span(EXISTING, &identity).unwrap();

        let out = merge(&file(EXISTING), code).unwrap();
        let content = out.content();

        assert!(content.starts_with(&EXISTING[..span.start]));
        assert!(content.ends_with(&EXISTING[span.end..]));
        assert_eq!(identity.count_in(content), 1);
    }

    #[test]
    fn missing_definition_is_appended_after_one_blank_line() {
        let code = "def test_mul():\n    assert 2 * 3 == 6\n";
        let out = merge(&file(EXISTING), code).unwrap();

        assert_eq!(out.status(), MergeStatus::Appended);
        assert_eq!(out.content(), format!("{EXISTING}\n{code}"));
        assert!(out.content().ends_with(code));
        assert_eq!(TestIdentity::find(code).unwrap().count_in(out.content()), 1);
    }

    #[test]
    fn append_separator_depends_on_trailing_newline() {
        let code = "def test_b():\n    pass";

        let out = merge(&file("def test_a():\n    pass"), code).unwrap();
        assert_eq!(out.content(), "def test_a():\n    pass\n\ndef test_b():\n    pass");

        let out = merge(&file("def test_a():\n    pass\n"), code).unwrap();
        assert_eq!(out.content(), "def test_a():\n    pass\n\ndef test_b():\n    pass");

        let out = merge(&file("def test_a():\n    pass\n\n"), code).unwrap();
        assert_eq!(out.content(), "def test_a():\n    pass\n\ndef test_b():\n    pass");

        for tail in ["\n\n\n", "\n  \n", "\n\t\n\n", "\n   "] {
            let out = merge(&file(&format!("def test_a():\n    pass{tail}")), code).unwrap();
            assert_eq!(
                out.content(),
                "def test_a():\n    pass\n\ndef test_b():\n    pass",
                "tail = {tail:?}"
            );
        }

        let out = merge(&file("x = 1   \n\n\n"), code).unwrap();
        assert_eq!(out.content(), "x = 1   \n\ndef test_b():\n    pass");
    }

    #[test]
    fn class_wrapped_test_merges_into_its_method() {
        let code = "class TestMath:\n    def test_mul(self):\n        assert 2 * 2 == 4\n";

        let first = merge(&file("import os\n"), code).unwrap();
        assert_eq!(first.status(), MergeStatus::Appended);
        assert_eq!(first.content(), format!("import os\n\n{code}"));

        let second = merge(&file(first.content()), code).unwrap();
        assert_eq!(second.status(), MergeStatus::Replaced);
        assert_eq!(second.content(), first.content());

        let existing = "class TestMath:\n    def test_div(self):\n        pass\n\n    def test_mul(self):\n        assert 0\n";
        let out = merge(&file(existing), code).unwrap();
        assert_eq!(
            out.content(),
            "class TestMath:\n    def test_div(self):\n        pass\n\n    def test_mul(self):\n        assert 2 * 2 == 4\n"
        );
    }

    #[test]
    fn artifact_imports_are_not_repeated_on_replace() {
        let code = "import pytest\n\n\ndef test_a():\n    assert pytest\n";

        let first = merge(&file("def test_z():\n    pass\n"), code).unwrap();
        let second = merge(&file(first.content()), code).unwrap();

        assert_eq!(second.status(), MergeStatus::Replaced);
        assert_eq!(second.content(), first.content());
        assert_eq!(second.content().matches("import pytest").count(), 1);
    }

    #[test]
    fn multi_line_decorator_is_part_of_the_span() {
        let code = "@pytest.mark.parametrize(\"a\", [\n    1,\n    2,  # \"])\" in a comment\n])\ndef test_p(a):\n    assert a\n";

        let first = merge(&file("import pytest\n"), code).unwrap();
        let second = merge(&file(first.content()), code).unwrap();
        assert_eq!(second.status(), MergeStatus::Replaced);
        assert_eq!(second.content(), first.content());
        assert_eq!(second.content().matches("@pytest.mark.parametrize").count(), 1);

        let identity = TestIdentity::find(code).unwrap();
        let span = find_span(first.content(), &identity).unwrap();
        assert!(first.content()[span].starts_with("@pytest.mark.parametrize"));

        let updated = "@pytest.mark.parametrize(\"a\", [3])\ndef test_p(a):\n    assert a\n";
        let out = merge(&file(first.content()), updated).unwrap();
        assert_eq!(out.content(), format!("import pytest\n\n{updated}"));
    }

    #[test]
    fn decorator_scan_stops_at_previous_definition() {
        let existing = "@pytest.mark.slow\ndef test_a(): pass\ndef test_b():\n    pass\n";
        let identity = TestIdentity::find("def test_b(): pass").unwrap();
        let span = find_span(existing, &identity).unwrap();
        assert_eq!(&existing[span], "def test_b():\n    pass");
    }

    #[test]
    fn replacement_follows_tab_indentation() {
        let existing = "class TestT:\n\tdef test_t(self):\n\t\tassert 0\n\n\tdef test_u(self):\n\t\tpass\n";
        let out = merge(&file(existing), "def test_t(self):\n    assert 1\n").unwrap();
        assert_eq!(
            out.content(),
            "class TestT:\n\tdef test_t(self):\n\t    assert 1\n\n\tdef test_u(self):\n\t\tpass\n"
        );
        assert!(!out.content().contains("\n    def"));
    }

    #[test]
    fn empty_existing_file_gets_just_the_code() {
        let code = "def test_b():\n    pass\n";
        let out = merge(&file(""), code).unwrap();
        assert_eq!(out.status(), MergeStatus::Appended);
        assert_eq!(out.content(), code);
    }

    #[test]
    fn merging_twice_is_stable() {
        let code = "def test_mul():\n    assert 2 * 3 == 6\n";

        let first = merge(&file(EXISTING), code).unwrap();
        assert_eq!(first.status(), MergeStatus::Appended);

        let second = merge(&file(first.content()), code).unwrap();
        assert_eq!(second.status(), MergeStatus::Replaced);
        assert_eq!(second.content(), first.content());

        let replaced = merge(&file(EXISTING), "def test_add():\n    assert 0 == 0\n").unwrap();
        let again = merge(&file(replaced.content()), "def test_add():\n    assert 0 == 0\n").unwrap();
        assert_eq!(again.content(), replaced.content());
    }

    #[test]
    fn decorators_travel_with_their_definition() {
        let existing = "@pytest.mark.slow\ndef test_a():\n    pass\n\n@pytest.mark.skip\ndef test_b():\n    pass\n";
        let code = "@pytest.mark.fast\ndef test_a():\n    assert True";

        let out = merge(&file(existing), code).unwrap();
        assert_eq!(
            out.content(),
            "@pytest.mark.fast\ndef test_a():\n    assert True\n\n@pytest.mark.skip\ndef test_b():\n    pass\n"
        );
    }

    #[test]
    fn unrelated_tests_survive_replacement() {
        let existing = "def test_a():\n    pass\n\nclass TestGroup:\n    def test_in_class(self):\n        pass\n\ndef test_c():\n    pass\n";
        let out = merge(&file(existing), "def test_a():\n    assert 1").unwrap();

        let content = out.content();
        assert!(content.contains("class TestGroup:"));
        assert!(content.contains("def test_in_class(self):"));
        assert!(content.contains("def test_c():"));
    }

    #[test]
    fn method_is_replaced_inside_its_class() {
        let existing = "class TestMath:\n    def test_mul(self):\n        assert 1\n\n    def test_div(self):\n        assert 2\n\n\ndef test_top():\n    pass\n";
        let code = "def test_mul(self):\n    assert 2 * 2 == 4\n";

        let out = merge(&file(existing), code).unwrap();
        assert_eq!(
            out.content(),
            "class TestMath:\n    def test_mul(self):\n        assert 2 * 2 == 4\n\n    def test_div(self):\n        assert 2\n\n\ndef test_top():\n    pass\n"
        );
    }

    #[test]
    fn span_runs_to_end_of_file() {
        let identity = TestIdentity::find("def test_sub(): pass").unwrap();
        let span = find_span(EXISTING, &identity).unwrap();
        assert_eq!(&EXISTING[span.clone()], "def test_sub():\n    assert 2 - 1 == 1");
        assert_eq!(span.end, EXISTING.len() - 1);
    }

    #[test]
    fn merge_is_deterministic() {
        let code = "def test_add():\n    assert 5";
        let a = merge(&file(EXISTING), code).unwrap();
        let b = merge(&file(EXISTING), code).unwrap();
        assert_eq!(a, b);
    }
}
