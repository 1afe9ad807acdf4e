//! Structured result extraction from a run's final message.

use crate::error::AssistError;
use refdesk_common::util::truncate_with_ellipsis;
use serde::Serialize;
use serde_json::Value;

const PREVIEW_CHARS: usize = 200;

/// Locate the first top-level JSON array literal in `text`.
///
/// Brackets inside JSON strings are ignored. Returns `None` when there is
/// no `[` or the first one is never closed.
pub fn find_array_literal(text: &str) -> Option<&str> {
    array_span(text).map(|(start, end)| &text[start..end])
}

/// Byte range of the first balanced `[ ... ]` in `text`.
fn array_span(text: &str) -> Option<(usize, usize)> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + offset + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }

    None
}

/// Successive top-level array literals in `text`, in order of appearance.
fn array_literals(text: &str) -> impl Iterator<Item = &str> {
    let mut from = 0;
    std::iter::from_fn(move || {
        let (start, end) = array_span(&text[from..])?;
        let literal = &text[from + start..from + end];
        from += end;
        Some(literal)
    })
}

/// Parse the answer list out of a final message. Never returns a partial
/// result: a missing or malformed array is a `Parse` error.
///
/// Prose often carries bracketed asides ("see page [12]") ahead of the
/// answers, so the first array made entirely of objects wins. Without one
/// the first array literal is parsed as-is.
pub fn extract_answers(text: &str) -> Result<Vec<Value>, AssistError> {
    let mut first = None;
    for literal in array_literals(text) {
        first.get_or_insert(literal);
        if let Ok(answers) = serde_json::from_str::<Vec<Value>>(literal) {
            if !answers.is_empty() && answers.iter().all(Value::is_object) {
                return Ok(answers);
            }
        }
    }

    let literal = first.ok_or_else(|| {
        AssistError::Parse(format!(
            "no JSON array in response: {}",
            truncate_with_ellipsis(text, PREVIEW_CHARS)
        ))
    })?;

    serde_json::from_str(literal).map_err(|e| {
        AssistError::Parse(format!(
            "{}: {}",
            e,
            truncate_with_ellipsis(literal, PREVIEW_CHARS)
        ))
    })
}

/// Breakdown of answers by their `type` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSummary {
    pub total: usize,
    pub multiple_choice: usize,
    pub written: usize,
    pub other: usize,
}

impl AnswerSummary {
    pub fn from_answers(answers: &[Value]) -> Self {
        let mut summary = Self {
            total: answers.len(),
            ..Self::default()
        };
        for answer in answers {
            match answer.get("type").and_then(Value::as_str) {
                Some("multiple-choice") => summary.multiple_choice += 1,
                Some("written") => summary.written += 1,
                _ => summary.other += 1,
            }
        }
        summary
    }
}
