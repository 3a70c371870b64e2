//! Defensive JSON object extraction from free-form completion text.
//!
//! Completions are supposed to be one JSON object, but models wrap it in
//! fences or prose. Strategies run in a fixed order and the first one that
//! yields an object wins. Total failure is a value ([`Extracted::Unparsed`]),
//! never an error.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n(.*?)```").expect("fenced block regex is valid")
});

/// Which strategy produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole (trimmed) text parsed as an object.
    Direct,
    /// A fenced ```` ```json ```` (or bare ```` ``` ````) block parsed as an object.
    FencedBlock,
    /// The span from the first `{` to the last `}` parsed as an object.
    BraceSpan,
}

/// Result of running the extraction chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Parsed {
        object: Map<String, Value>,
        strategy: Strategy,
    },
    Unparsed,
}

impl Extracted {
    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            Extracted::Parsed { object, .. } => Some(object),
            Extracted::Unparsed => None,
        }
    }
}

/// Run direct parse, fenced-block extraction, then brace-span extraction.
pub fn extract_json_object(text: &str) -> Extracted {
    let strategies: [(Strategy, fn(&str) -> Option<Map<String, Value>>); 3] = [
        (Strategy::Direct, parse_direct),
        (Strategy::FencedBlock, parse_fenced_block),
        (Strategy::BraceSpan, parse_brace_span),
    ];
    for (strategy, parse) in strategies {
        if let Some(object) = parse(text) {
            return Extracted::Parsed { object, strategy };
        }
    }
    Extracted::Unparsed
}

fn parse_direct(text: &str) -> Option<Map<String, Value>> {
    parse_object(text.trim())
}

fn parse_fenced_block(text: &str) -> Option<Map<String, Value>> {
    FENCED_BLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| parse_object(body.as_str().trim()))
}

fn parse_brace_span(text: &str) -> Option<Map<String, Value>> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last <= first {
        return None;
    }
    parse_object(&text[first..=last])
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}
