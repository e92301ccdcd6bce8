//! Narrative post-processing: role-prefix cleanup, status classification and
//! splitting text around inline image cues.

use crate::models::Status;
use crate::tone::ToneKind;
use regex::Regex;
use std::sync::LazyLock;

static ROLE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Trainer:|Game Master:|AI:").expect("valid regex"));

static IMAGE_CUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Image of (.*?)\]").expect("valid regex"));

const CRITICAL_GLYPH: char = '❌';
const SAFE_GLYPH: char = '✅';

/// Removes speaker labels the model likes to prepend, then trims.
pub fn strip_role_prefixes(raw: &str) -> String {
    ROLE_PREFIX.replace_all(raw, "").trim().to_string()
}

/// Derives the status label of a narrative and the tone that announces it.
///
/// Failure markers win over success markers when both are present.
pub fn classify(text: &str) -> (Status, Option<ToneKind>) {
    let lower = text.to_lowercase();
    if lower.contains("fail") || text.contains(CRITICAL_GLYPH) {
        (Status::Critical, Some(ToneKind::Error))
    } else if lower.contains("correct") || text.contains(SAFE_GLYPH) {
        (Status::Safe, Some(ToneKind::Success))
    } else {
        (Status::Active, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// The subject named by an `[Image of ...]` directive.
    Cue(&'a str),
}

/// Splits narrative text into literal runs and image cues, in order.
///
/// Empty literal runs are omitted. An unterminated directive stays literal
/// text, which is what a partially revealed narrative looks like.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for captures in IMAGE_CUE.captures_iter(text) {
        let (Some(whole), Some(subject)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        if whole.start() > cursor {
            out.push(Segment::Text(&text[cursor..whole.start()]));
        }
        out.push(Segment::Cue(subject.as_str()));
        cursor = whole.end();
    }
    if cursor < text.len() {
        out.push(Segment::Text(&text[cursor..]));
    }
    out
}

const CUE_OPENER: &str = "[Image of ";

/// Byte offset of the earliest directive that may still turn into a cue once
/// more of the narrative is revealed.
///
/// Openers are scanned the way [`segments`] matches them: a directive closes
/// at its first `]` and can never span a line break. Anything from the
/// returned offset on must not be treated as settled text, since a later `]`
/// can fold it into a cue.
pub fn unfinished_cue(text: &str) -> Option<usize> {
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(CUE_OPENER) {
        let start = cursor + found;
        let body = start + CUE_OPENER.len();
        match text[body..].find([']', '\n']) {
            Some(end) => cursor = body + end + 1,
            None => return Some(start),
        }
    }

    // A trailing `[Ima` may still grow into an opener.
    let start = cursor + text[cursor..].rfind('[')?;
    let tail = &text[start..];
    CUE_OPENER.starts_with(tail).then_some(start)
}
