//! Protocol text header model (`hdr_string`).
//!
//! A measurement header carries several named text buffers (`Config`,
//! `Dicom`, `Meas`, `MeasYaps`, `Phoenix`, ...). Each buffer becomes a
//! [`ProtocolSection`]: its bytes plus an ordered list of [`ProtocolEntry`]s
//! that tile the text exactly. Unrecognized lines are kept as opaque entries,
//! so joining all entries always reproduces the original bytes.
//!
//! ## Rewriting
//!
//! [`ProtocolHeader::apply`] takes byte-span replacements and rebuilds every
//! affected section in one left-to-right pass. Replaced spans may change
//! length; the running delta is added to the spans of every later entry.

mod parse;

use crate::error::{Error, Result};
use crate::structured::decode_latin1;
use serde::Serialize;
use std::ops::Range;
use tracing::trace;

/// Type tag of an XProtocol parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// `<ParamString."...">`
    String,
    /// `<ParamLong."...">`
    Long,
    /// `<ParamDouble."...">`
    Double,
    /// `<ParamBool."...">`
    Bool,
    /// `<ParamChoice."...">`
    Choice,
}

/// What kind of line(s) an entry was parsed from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// XProtocol leaf parameter
    Param(ParamType),
    /// ASCCONV `key = value` line
    Assignment,
    /// Anything else, kept verbatim
    Opaque,
}

/// One entry of a protocol section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEntry {
    /// Entry kind
    pub kind: EntryKind,
    /// Parameter name, assignment path, or the raw line for opaque entries
    pub key: String,
    /// Byte span within the section text
    pub span: Range<usize>,
    /// Byte span of the value (quotes excluded) within the section text
    pub value_span: Option<Range<usize>>,
    /// Byte spans of the individual value tokens, in order, each within
    /// `value_span`. A multi-valued leaf like `{ "DOE" "JANE" }` has two.
    pub tokens: Vec<Range<usize>>,
}

impl ProtocolEntry {
    /// Returns true for opaque passthrough entries
    pub fn is_opaque(&self) -> bool {
        self.kind == EntryKind::Opaque
    }
}

/// One named text buffer of a measurement header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSection {
    name: String,
    text: Vec<u8>,
    entries: Vec<ProtocolEntry>,
}

impl ProtocolSection {
    /// Parses a section from its raw text
    pub fn parse(name: impl Into<String>, text: &[u8]) -> Self {
        let name = name.into();
        let entries = parse::parse_entries(text);
        trace!("Parsed section {} into {} entries", name, entries.len());
        Self {
            name,
            text: text.to_vec(),
            entries,
        }
    }

    /// Section (buffer) name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw section text
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Entries in source order
    pub fn entries(&self) -> &[ProtocolEntry] {
        &self.entries
    }

    /// Raw bytes of an entry
    pub fn raw(&self, entry: &ProtocolEntry) -> &[u8] {
        &self.text[entry.span.clone()]
    }

    /// Decoded value of an entry, if it has one
    pub fn value(&self, entry: &ProtocolEntry) -> Option<String> {
        entry
            .value_span
            .as_ref()
            .map(|span| decode_latin1(&self.text[span.clone()]))
    }

    /// Re-serializes the section by joining every entry
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.text.len());
        for entry in &self.entries {
            out.extend_from_slice(self.raw(entry));
        }
        out
    }

    /// Number of bytes in the section
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Returns true if the section holds no text
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Address of an entry inside a [`ProtocolHeader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryRef {
    /// Section position
    pub section: usize,
    /// Entry position within the section
    pub entry: usize,
}

/// A byte-span replacement inside one section.
///
/// The span is in the section's original coordinates and must lie inside a
/// single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextReplacement {
    /// Section position
    pub section: usize,
    /// Span to replace
    pub span: Range<usize>,
    /// New bytes, any length
    pub bytes: Vec<u8>,
}

impl TextReplacement {
    /// Signed length change introduced by this replacement
    pub fn delta(&self) -> isize {
        self.bytes.len() as isize - self.span.len() as isize
    }
}

/// Result of [`ProtocolHeader::apply`]
#[derive(Debug, Clone)]
pub struct Reflow {
    /// The rewritten header with shifted spans
    pub header: ProtocolHeader,
    /// Length change per section
    pub section_deltas: Vec<isize>,
}

impl Reflow {
    /// Sum of all section deltas
    pub fn total_delta(&self) -> isize {
        self.section_deltas.iter().sum()
    }
}

/// Protocol text header of one measurement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolHeader {
    sections: Vec<ProtocolSection>,
}

impl ProtocolHeader {
    /// Parses every `(name, text)` buffer into a section
    pub fn parse<'a, I, S>(buffers: I) -> Self
    where
        I: IntoIterator<Item = (S, &'a [u8])>,
        S: Into<String>,
    {
        let sections = buffers
            .into_iter()
            .map(|(name, text)| ProtocolSection::parse(name, text))
            .collect();
        Self { sections }
    }

    /// Sections in buffer order
    pub fn sections(&self) -> &[ProtocolSection] {
        &self.sections
    }

    /// Looks up a section by name
    pub fn section(&self, name: &str) -> Option<&ProtocolSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Iterates every entry together with its address and section
    pub fn entries(&self) -> impl Iterator<Item = (EntryRef, &ProtocolSection, &ProtocolEntry)> {
        self.sections.iter().enumerate().flat_map(|(si, section)| {
            section.entries.iter().enumerate().map(move |(ei, entry)| {
                (
                    EntryRef {
                        section: si,
                        entry: ei,
                    },
                    section,
                    entry,
                )
            })
        })
    }

    /// Value of the first non-opaque entry named `key` that has a value
    pub fn find(&self, key: &str) -> Option<String> {
        self.entries()
            .filter(|(_, _, e)| !e.is_opaque() && e.key == key)
            .find_map(|(_, section, entry)| section.value(entry))
    }

    /// Total number of text bytes across sections
    pub fn len(&self) -> usize {
        self.sections.iter().map(ProtocolSection::len).sum()
    }

    /// Returns true if there is no text at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies replacements in a single left-to-right pass per section.
    ///
    /// Entries after a replacement have their spans shifted by the
    /// accumulated delta; untouched sections are copied as they are.
    pub fn apply(&self, replacements: &[TextReplacement]) -> Result<Reflow> {
        let mut sorted: Vec<&TextReplacement> = replacements.iter().collect();
        sorted.sort_by_key(|r| (r.section, r.span.start));

        for pair in sorted.windows(2) {
            if pair[0].section == pair[1].section && pair[1].span.start < pair[0].span.end {
                return Err(Error::internal(format!(
                    "overlapping text replacements at {:?} and {:?} in section {}",
                    pair[0].span, pair[1].span, pair[0].section
                )));
            }
        }
        if let Some(r) = sorted.iter().find(|r| r.section >= self.sections.len()) {
            return Err(Error::internal(format!(
                "text replacement targets missing section {}",
                r.section
            )));
        }

        let mut sections = Vec::with_capacity(self.sections.len());
        let mut section_deltas = Vec::with_capacity(self.sections.len());

        for (si, section) in self.sections.iter().enumerate() {
            let edits: Vec<&TextReplacement> =
                sorted.iter().copied().filter(|r| r.section == si).collect();
            if edits.is_empty() {
                sections.push(section.clone());
                section_deltas.push(0);
                continue;
            }
            let rebuilt = reflow_section(section, &edits)?;
            section_deltas.push(rebuilt.text.len() as isize - section.text.len() as isize);
            sections.push(rebuilt);
        }

        Ok(Reflow {
            header: ProtocolHeader { sections },
            section_deltas,
        })
    }
}

fn reflow_section(section: &ProtocolSection, edits: &[&TextReplacement]) -> Result<ProtocolSection> {
    let delta: isize = edits.iter().map(|e| e.delta()).sum();
    let capacity = (section.text.len() as isize + delta).max(0) as usize;
    let mut text = Vec::with_capacity(capacity);
    let mut entries = Vec::with_capacity(section.entries.len());
    let mut next = 0;

    for entry in &section.entries {
        let new_start = text.len();
        let mut local: Vec<&TextReplacement> = Vec::new();
        while next < edits.len() && edits[next].span.start < entry.span.end {
            let edit = edits[next];
            if edit.span.start < entry.span.start || edit.span.end > entry.span.end {
                return Err(Error::internal(format!(
                    "replacement {:?} crosses entry {:?} in section {}",
                    edit.span, entry.span, section.name
                )));
            }
            local.push(edit);
            next += 1;
        }

        let mut cursor = entry.span.start;
        for edit in &local {
            text.extend_from_slice(&section.text[cursor..edit.span.start]);
            text.extend_from_slice(&edit.bytes);
            cursor = edit.span.end;
        }
        text.extend_from_slice(&section.text[cursor..entry.span.end]);

        let map_start = |p: usize| -> usize {
            let shift: isize = local
                .iter()
                .filter(|e| e.span.end <= p)
                .map(|e| e.delta())
                .sum();
            (new_start as isize + (p - entry.span.start) as isize + shift) as usize
        };
        let map_end = |p: usize| -> usize {
            let shift: isize = local
                .iter()
                .filter(|e| e.span.start < p)
                .map(|e| e.delta())
                .sum();
            (new_start as isize + (p - entry.span.start) as isize + shift) as usize
        };

        let span = new_start..text.len();
        let value_span = entry
            .value_span
            .as_ref()
            .map(|v| map_start(v.start)..map_end(v.end));
        let tokens = entry
            .tokens
            .iter()
            .map(|t| map_start(t.start)..map_end(t.end))
            .collect();
        let key = if entry.is_opaque() && !local.is_empty() {
            let mut line = &text[span.clone()];
            line = line.strip_suffix(b"\n").unwrap_or(line);
            line = line.strip_suffix(b"\r").unwrap_or(line);
            decode_latin1(line)
        } else {
            entry.key.clone()
        };

        entries.push(ProtocolEntry {
            kind: entry.kind,
            key,
            span,
            value_span,
            tokens,
        });
    }

    if next < edits.len() {
        return Err(Error::internal(format!(
            "replacement {:?} lies outside section {} ({} bytes)",
            edits[next].span,
            section.name,
            section.text.len()
        )));
    }

    Ok(ProtocolSection {
        name: section.name.clone(),
        text,
        entries,
    })
}
