//! Segment grammar for the listing page's paragraph text.
//!
//! A paragraph encodes one or more orders as semicolon-delimited segments.
//! Each segment is matched against an ordered list of rules; a segment that
//! matches no rule is reported back to the caller, never fatal.

use std::sync::LazyLock;

use regex::Regex;

static LEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^Executive Order No\.?\s*([\d.]+),\s*issued\s*([A-Za-z]+\s*\d{1,2},\s*\d{4})(?:\s*\((.*?)\))?",
    )
    .unwrap()
});

static CONTINUATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([\d.]+),\s*issued\s*([A-Za-z]+\s*\d{1,2},\s*\d{4})").unwrap()
});

// Conjunctive pair inside one segment: "X and Executive Order No. Y".
static CONJ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+(Executive Order No\.)").unwrap());

/// One segment successfully matched by the grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSegment {
    /// Introductory phrase for a new order; the title may be absent.
    Lead {
        order_num: String,
        signed_date: String,
        title: Option<String>,
    },
    /// Continuation naming only a number and date; the title is inherited
    /// from the most recently accepted order by the caller.
    Continuation {
        order_num: String,
        signed_date: String,
    },
}

impl ParsedSegment {
    pub fn order_num(&self) -> &str {
        match self {
            ParsedSegment::Lead { order_num, .. } => order_num,
            ParsedSegment::Continuation { order_num, .. } => order_num,
        }
    }
}

/// Split a paragraph's text into trimmed, non-empty segments: first on
/// semicolons, then before any conjunctive "and Executive Order No." so each
/// half matches independently.
pub fn split_segments(paragraph: &str) -> Vec<String> {
    paragraph
        .split(';')
        .flat_map(split_conjunctive)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_conjunctive(segment: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for caps in CONJ_RE.captures_iter(segment) {
        let whole = caps.get(0).unwrap();
        let phrase = caps.get(1).unwrap();
        pieces.push(&segment[start..whole.start()]);
        start = phrase.start();
    }
    pieces.push(&segment[start..]);
    pieces
}

/// Try the grammar rules in order against one segment.
pub fn match_segment(segment: &str) -> Option<ParsedSegment> {
    if segment.to_lowercase().starts_with("executive order no") {
        let caps = LEAD_RE.captures(segment)?;
        return Some(ParsedSegment::Lead {
            order_num: caps[1].to_string(),
            signed_date: caps[2].to_string(),
            title: caps.get(3).map(|m| m.as_str().to_string()),
        });
    }
    let caps = CONTINUATION_RE.captures(segment)?;
    Some(ParsedSegment::Continuation {
        order_num: caps[1].to_string(),
        signed_date: caps[2].to_string(),
    })
}

// ── Tests ──
