//! testgen/extract.rs
//!
//! Pulls a `{name, code}` payload out of raw model output.
//!
//! The model wraps its answer in `<tag>...</tag>`, but the JSON inside is
//! routinely broken: literal newlines, `\n` meant as real newlines, doubled
//! backslashes, stray quoting. Recovery is an ordered list of strategies;
//! the first one that yields non-empty code wins.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::testgen::identity::TestIdentity;

/// Stands in for `\\` while `\"` is unescaped.
const BACKSLASH_PLACEHOLDER: &str = "\u{1a}BACKSLASH\u{1a}";

static NAME_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""name":\s*"([^"]+)""#).expect("name field pattern"));

static CODE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)"code":\s*"(.*?)"\s*\}$"#).expect("code field pattern"));

static OUTER_BRACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("outer braces pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no <{tag}>...</{tag}> payload found")]
    NoPayload { tag: String },

    #[error("<{tag}> payload could not be parsed into name/code")]
    Malformed { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedPayload {
    pub name: String,
    pub code: String,
}

/// Which recovery step produced the payload. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    /// The region was valid JSON as written.
    Verbatim,
    /// Valid JSON after quote stripping and escape normalization.
    Normalized,
    /// Outermost `{...}` with every backslash removed.
    OuterBraces,
    /// Regex recovery of the `"name"` and `"code"` fields.
    FieldRecovery,
}

impl ParseStrategy {
    pub const ORDER: [ParseStrategy; 4] = [
        ParseStrategy::Verbatim,
        ParseStrategy::Normalized,
        ParseStrategy::OuterBraces,
        ParseStrategy::FieldRecovery,
    ];

    fn attempt(self, region: &str, normalized: &str) -> Option<RawPayload> {
        match self {
            ParseStrategy::Verbatim => parse_verbatim(region),
            ParseStrategy::Normalized => parse_object(normalized),
            ParseStrategy::OuterBraces => {
                let braces = OUTER_BRACES.find(normalized)?;
                parse_object(&braces.as_str().replace('\\', ""))
            }
            ParseStrategy::FieldRecovery => recover_fields(normalized),
        }
    }
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseStrategy::Verbatim => "verbatim",
            ParseStrategy::Normalized => "normalized",
            ParseStrategy::OuterBraces => "outer_braces",
            ParseStrategy::FieldRecovery => "field_recovery",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub payload: ExtractedPayload,
    pub strategy: ParseStrategy,
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/* ============================================================
   Public API
   ============================================================ */

/// Extract the payload from the first `<tag>...</tag>` region.
///
/// Returns `None` both when there is no region and when nothing could be
/// recovered from it; use [`extract_detailed`] to tell the two apart.
pub fn extract(raw_text: &str, tag: &str) -> Option<ExtractedPayload> {
    extract_detailed(raw_text, tag).ok().map(|e| e.payload)
}

pub fn extract_detailed(raw_text: &str, tag: &str) -> Result<Extraction, ExtractError> {
    let region = find_tagged(raw_text, tag).ok_or_else(|| ExtractError::NoPayload {
        tag: tag.to_string(),
    })?;

    let normalized = normalize(region);

    for strategy in ParseStrategy::ORDER {
        match strategy.attempt(region, &normalized).and_then(into_payload) {
            Some(payload) => {
                debug!(%strategy, name = %payload.name, "payload recovered");
                return Ok(Extraction { payload, strategy });
            }
            None => trace!(%strategy, "strategy failed"),
        }
    }

    debug!(tag, len = region.len(), "payload found but unrecoverable");
    Err(ExtractError::Malformed {
        tag: tag.to_string(),
    })
}

/// Content of the first `<tag>...</tag>` region, trimmed. Spans newlines.
pub fn find_tagged<'a>(raw_text: &'a str, tag: &str) -> Option<&'a str> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!("(?s)<{tag}>(.*?)</{tag}>")).ok()?;
    re.captures(raw_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Escape clean-up applied before the structural parses.
///
/// Order matters: literal line breaks are formatting noise and go first,
/// then `\n` becomes a real newline, then `\"` is unescaped with `\\`
/// protected so a literal backslash before a quote survives.
pub fn normalize(region: &str) -> String {
    let s = strip_outer_quotes(region.trim());
    let s = s.replace(['\r', '\n'], "");
    let s = s.replace("\\n", "\n");
    let s = s.replace("\\\\", BACKSLASH_PLACEHOLDER);
    let s = s.replace("\\\"", "\"");
    s.replace(BACKSLASH_PLACEHOLDER, "\\")
}

/* ============================================================
   Strategies
   ============================================================ */

fn parse_object(text: &str) -> Option<RawPayload> {
    serde_json::from_str::<RawPayload>(text).ok()
}

/// The region as written, or a JSON string literal wrapping the object.
fn parse_verbatim(region: &str) -> Option<RawPayload> {
    if let Some(p) = parse_object(region) {
        return Some(p);
    }
    let inner = serde_json::from_str::<String>(region).ok()?;
    parse_object(inner.trim())
}

fn recover_fields(normalized: &str) -> Option<RawPayload> {
    let text = normalized.trim();

    let name = NAME_FIELD
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let code = CODE_FIELD
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\n", "\n").replace("\\\"", "\""));

    if name.is_none() && code.is_none() {
        return None;
    }
    Some(RawPayload { name, code })
}

fn into_payload(raw: RawPayload) -> Option<ExtractedPayload> {
    let code = raw.code.filter(|c| !c.trim().is_empty())?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| TestIdentity::find(&code).map(|id| id.as_str().to_string()))
        .unwrap_or_default();

    Some(ExtractedPayload { name, code })
}

fn strip_outer_quotes(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
