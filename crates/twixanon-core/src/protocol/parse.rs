//! Line-oriented tokenizer for protocol text.
//!
//! Two syntaxes share the buffers of a measurement header:
//!
//! - XProtocol leaf parameters:
//!   `<ParamString."PatientName">  { <Visible> "true"  "DOE^JANE"  }`
//! - ASCCONV assignments: `sKSpace.lBaseResolution = 256`
//!
//! Anything else becomes an opaque entry so the text can be re-emitted byte
//! for byte.

use super::{EntryKind, ParamType, ProtocolEntry};
use crate::structured::decode_latin1;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::ops::Range;

/// Maximum number of lines a single parameter body may span
const MAX_PARAM_LINES: usize = 64;

static PARAM_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?-u)^[ \t]*<Param([A-Za-z]+)\."([^"]*)">"#).expect("param regex is valid")
});

static ASSIGNMENT_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)^[ \t]*([A-Za-z_][A-Za-z0-9_.\[\]]*)[ \t]*=[ \t]*")
        .expect("assignment regex is valid")
});

/// Splits `text` into entries that tile it exactly
pub(super) fn parse_entries(text: &[u8]) -> Vec<ProtocolEntry> {
    let mut entries = Vec::new();
    let mut position = 0;

    while position < text.len() {
        let eol = next_line_end(text, position);
        let entry = parse_param(text, position, eol)
            .or_else(|| parse_assignment(text, position, eol))
            .unwrap_or_else(|| opaque(text, position, eol));
        debug_assert!(entry.span.end > position);
        position = entry.span.end;
        entries.push(entry);
    }

    entries
}

/// End of the line starting at `start`, including its `\n`
fn next_line_end(text: &[u8], start: usize) -> usize {
    text[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| start + p + 1)
        .unwrap_or(text.len())
}

/// Line content without the trailing `\r\n` / `\n`
fn line_content(text: &[u8], start: usize, end: usize) -> &[u8] {
    let mut line = &text[start..end];
    if let Some(stripped) = line.strip_suffix(b"\n") {
        line = stripped;
    }
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    line
}

fn opaque(text: &[u8], start: usize, end: usize) -> ProtocolEntry {
    ProtocolEntry {
        kind: EntryKind::Opaque,
        key: decode_latin1(line_content(text, start, end)),
        span: start..end,
        value_span: None,
        tokens: Vec::new(),
    }
}

fn param_type(name: &[u8]) -> Option<ParamType> {
    match name {
        b"String" => Some(ParamType::String),
        b"Long" => Some(ParamType::Long),
        b"Double" => Some(ParamType::Double),
        b"Bool" => Some(ParamType::Bool),
        b"Choice" => Some(ParamType::Choice),
        // Containers (Map, Array, Functor, ...) open sections and stay opaque
        _ => None,
    }
}

fn parse_param(text: &[u8], start: usize, line_end: usize) -> Option<ProtocolEntry> {
    let line = line_content(text, start, line_end);
    let caps = PARAM_OPEN.captures(line)?;
    let ty = param_type(caps.get(1)?.as_bytes())?;
    let key = decode_latin1(caps.get(2)?.as_bytes());
    let body_start = start + caps.get(0)?.end();

    let body = scan_body(text, body_start)?;
    let span_end = next_line_end(text, body.close);

    Some(ProtocolEntry {
        kind: EntryKind::Param(ty),
        key,
        span: start..span_end,
        value_span: body.values(),
        tokens: body.tokens,
    })
}

struct Body {
    /// Offset of the closing `}`
    close: usize,
    /// Value tokens, quotes excluded
    tokens: Vec<Range<usize>>,
}

impl Body {
    /// First to last value token
    fn values(&self) -> Option<Range<usize>> {
        let first = self.tokens.first()?;
        let last = self.tokens.last()?;
        Some(first.start..last.end)
    }
}

/// Scans `{ ... }` of a leaf parameter, skipping `<Attribute> value` pairs.
///
/// Returns `None` for anything that is not a leaf body, which makes the
/// caller fall back to an opaque entry.
fn scan_body(text: &[u8], from: usize) -> Option<Body> {
    let mut pos = from;
    let mut lines = 0;

    // Opening brace, possibly on a following line
    loop {
        match *text.get(pos)? {
            b'\n' => {
                lines += 1;
                pos += 1;
            }
            b' ' | b'\t' | b'\r' => pos += 1,
            b'{' => {
                pos += 1;
                break;
            }
            _ => return None,
        }
        if lines > MAX_PARAM_LINES {
            return None;
        }
    }

    let mut tokens = Vec::new();
    let mut attribute_pending = false;

    loop {
        if lines > MAX_PARAM_LINES {
            return None;
        }
        match *text.get(pos)? {
            b'\n' => {
                lines += 1;
                pos += 1;
            }
            b' ' | b'\t' | b'\r' => pos += 1,
            b'}' => {
                return Some(Body { close: pos, tokens });
            }
            b'"' => {
                let inner = pos + 1;
                let close = inner + text[inner..].iter().position(|&b| b == b'"')?;
                lines += text[inner..close].iter().filter(|&&b| b == b'\n').count();
                if attribute_pending {
                    attribute_pending = false;
                } else {
                    tokens.push(inner..close);
                }
                pos = close + 1;
            }
            b'<' => {
                let close = pos + text[pos..].iter().position(|&b| b == b'>' || b == b'\n')?;
                if text[close] != b'>' {
                    return None;
                }
                attribute_pending = true;
                pos = close + 1;
            }
            b'{' => {
                // Only attribute values (`<Limit> { ... }`) may nest
                if !attribute_pending {
                    return None;
                }
                let (close, crossed) = matching_brace(text, pos)?;
                lines += crossed;
                attribute_pending = false;
                pos = close + 1;
            }
            _ => {
                let word_end = pos
                    + text[pos..]
                        .iter()
                        .position(|&b| b.is_ascii_whitespace() || matches!(b, b'{' | b'}' | b'<' | b'"'))
                        .unwrap_or(text.len() - pos);
                if attribute_pending {
                    attribute_pending = false;
                } else {
                    tokens.push(pos..word_end);
                }
                pos = word_end;
            }
        }
    }
}

/// Finds the `}` matching the `{` at `open`, honouring quotes
fn matching_brace(text: &[u8], open: usize) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut lines = 0;
    for (i, &b) in text.iter().enumerate().skip(open) {
        match b {
            b'\n' => {
                lines += 1;
                if lines > MAX_PARAM_LINES {
                    return None;
                }
            }
            b'"' => in_quote = !in_quote,
            b'{' if !in_quote => depth += 1,
            b'}' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some((i, lines));
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_assignment(text: &[u8], start: usize, line_end: usize) -> Option<ProtocolEntry> {
    let line = line_content(text, start, line_end);
    let caps = ASSIGNMENT_KEY.captures(line)?;
    let key = decode_latin1(caps.get(1)?.as_bytes());
    let rest_start = caps.get(0)?.end();
    let rest = &line[rest_start..];

    // Cut a trailing `# comment` that is not inside quotes
    let mut in_quote = false;
    let mut value_len = rest.len();
    for (i, &b) in rest.iter().enumerate() {
        match b {
            b'"' => in_quote = !in_quote,
            b'#' if !in_quote => {
                value_len = i;
                break;
            }
            _ => {}
        }
    }
    let raw = &rest[..value_len];
    let trimmed_len = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|p| p + 1)?;
    let raw = &raw[..trimmed_len];

    let quote = if raw.len() >= 4 && raw.starts_with(b"\"\"") && raw.ends_with(b"\"\"") {
        2
    } else if raw.len() >= 2 && raw.starts_with(b"\"") && raw.ends_with(b"\"") {
        1
    } else {
        0
    };

    let value_start = start + rest_start + quote;
    let value_end = start + rest_start + raw.len() - quote;

    Some(ProtocolEntry {
        kind: EntryKind::Assignment,
        key,
        span: start..line_end,
        value_span: Some(value_start..value_end),
        tokens: vec![value_start..value_end],
    })
}
