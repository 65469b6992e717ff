//! Structured (fixed-layout binary) header model.
//!
//! A structured header is decoded from a segment with a schema of
//! [`FieldSpec`]s: name, offset, width and kind. Every field keeps its raw
//! bytes next to the decoded value, so redaction can overwrite a field in
//! place without touching a single byte outside of it.
//!
//! Decoding never fails as a whole. A field whose bytes do not fit its kind is
//! kept with a [`DecodeIssue`] and left for the caller to report.

use crate::error::{Error, Result};
use bytes::Buf;
use std::fmt;

/// Filler byte used after a redacted text value
pub const TEXT_FILLER: u8 = b' ';

/// How the bytes of a field are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Little-endian unsigned 32-bit integer
    U32,
    /// Little-endian unsigned 64-bit integer
    U64,
    /// Fixed-width, NUL-terminated latin-1 text
    Text,
    /// Opaque byte block
    Bytes,
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Unsigned integer (from a `U32` or `U64` field)
    Unsigned(u64),
    /// Text up to the terminator, with trailing filler removed
    Text(String),
    /// Opaque bytes
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Returns the text if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an unsigned value
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Why a field could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeIssue {
    /// Human readable reason
    pub reason: String,
}

impl DecodeIssue {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Schema entry for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name, shared by every repeat of the field
    pub name: &'static str,
    /// Repeat index (raid entry, buffer number) if the field repeats
    pub index: Option<usize>,
    /// Offset relative to the start of the segment
    pub offset: usize,
    /// Width in bytes, immutable
    pub width: usize,
    /// Value kind
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Creates a new schema entry
    pub fn new(name: &'static str, offset: usize, width: usize, kind: FieldKind) -> Self {
        Self {
            name,
            index: None,
            offset,
            width,
            kind,
        }
    }

    /// Sets the repeat index
    pub fn indexed(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// A decoded structured header field
#[derive(Debug, Clone)]
pub struct HeaderField {
    /// Field name
    pub name: &'static str,
    /// Repeat index
    pub index: Option<usize>,
    /// Offset relative to the start of the segment
    pub offset: usize,
    /// Width in bytes
    pub width: usize,
    /// Value kind
    pub kind: FieldKind,
    /// Raw bytes as found (shorter than `width` only if the region was short)
    pub raw: Vec<u8>,
    /// Decoded value, or why decoding failed
    pub value: std::result::Result<FieldValue, DecodeIssue>,
}

impl HeaderField {
    fn decode(spec: &FieldSpec, region: &[u8]) -> Self {
        let end = spec.offset.saturating_add(spec.width).min(region.len());
        let start = spec.offset.min(end);
        let raw = region[start..end].to_vec();

        let value = if raw.len() < spec.width {
            Err(DecodeIssue::new(format!(
                "field needs {} bytes but only {} are present",
                spec.width,
                raw.len()
            )))
        } else {
            decode_value(spec.kind, &raw)
        };

        Self {
            name: spec.name,
            index: spec.index,
            offset: spec.offset,
            width: spec.width,
            kind: spec.kind,
            raw,
            value,
        }
    }

    /// Stable identifier such as `PatientName[0]`
    pub fn identifier(&self) -> String {
        match self.index {
            Some(i) => format!("{}[{}]", self.name, i),
            None => self.name.to_string(),
        }
    }

    /// Returns true if the field decoded cleanly
    pub fn is_decoded(&self) -> bool {
        self.value.is_ok()
    }

    /// Converts the decode issue (if any) into an [`Error::HeaderDecode`]
    pub fn decode_error(&self) -> Option<Error> {
        self.value
            .as_ref()
            .err()
            .map(|issue| Error::header_decode(self.identifier(), self.offset, issue.reason.clone()))
    }

    /// Encodes a text value into exactly `width` bytes.
    ///
    /// Returns the bytes and whether the value had to be truncated.
    pub fn encode_text(&self, value: &str) -> (Vec<u8>, bool) {
        let mut bytes = encode_latin1(value);
        let truncated = bytes.len() > self.width;
        bytes.truncate(self.width);
        bytes.resize(self.width, TEXT_FILLER);
        (bytes, truncated)
    }

    /// Encodes an all-NUL blank of exactly `width` bytes
    pub fn encode_blank(&self) -> Vec<u8> {
        vec![0; self.width]
    }

    /// Encodes an unsigned integer into the field's width
    pub fn encode_unsigned(&self, value: u64) -> Result<Vec<u8>> {
        match (self.kind, self.width) {
            (FieldKind::U32, 4) => {
                let v = u32::try_from(value).map_err(|_| {
                    Error::serialization(format!(
                        "value {} does not fit the 4-byte field {}",
                        value,
                        self.identifier()
                    ))
                })?;
                Ok(v.to_le_bytes().to_vec())
            }
            (FieldKind::U64, 8) => Ok(value.to_le_bytes().to_vec()),
            _ => Err(Error::serialization(format!(
                "field {} is not an unsigned integer field",
                self.identifier()
            ))),
        }
    }
}

fn decode_value(kind: FieldKind, raw: &[u8]) -> std::result::Result<FieldValue, DecodeIssue> {
    match kind {
        FieldKind::U32 => Ok(FieldValue::Unsigned((&raw[..4]).get_u32_le() as u64)),
        FieldKind::U64 => Ok(FieldValue::Unsigned((&raw[..8]).get_u64_le())),
        FieldKind::Bytes => Ok(FieldValue::Bytes(raw.to_vec())),
        FieldKind::Text => {
            let content = match raw.iter().position(|&b| b == 0) {
                Some(nul) => &raw[..nul],
                None => raw,
            };
            if let Some(pos) = content.iter().position(|&b| b < 0x20 || b == 0x7f) {
                return Err(DecodeIssue::new(format!(
                    "control byte 0x{:02x} at position {} in text",
                    content[pos], pos
                )));
            }
            let text = decode_latin1(content);
            Ok(FieldValue::Text(
                text.trim_end_matches(TEXT_FILLER as char).to_string(),
            ))
        }
    }
}

/// A fixed-width replacement for one field of a structured header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReplacement {
    /// Position of the field in [`StructuredHeader::fields`]
    pub field: usize,
    /// New bytes, exactly the field's width
    pub bytes: Vec<u8>,
}

/// Structured header of one segment
#[derive(Debug, Clone, Default)]
pub struct StructuredHeader {
    fields: Vec<HeaderField>,
}

impl StructuredHeader {
    /// Decodes every field of `schema` out of `region` (the segment bytes)
    pub fn decode(region: &[u8], schema: &[FieldSpec]) -> Self {
        let fields = schema
            .iter()
            .map(|spec| HeaderField::decode(spec, region))
            .collect();
        Self { fields }
    }

    /// All fields in schema order
    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    /// Looks up a field by name and repeat index
    pub fn get(&self, name: &str, index: Option<usize>) -> Option<&HeaderField> {
        self.position(name, index).map(|i| &self.fields[i])
    }

    /// Position of a field in [`Self::fields`]
    pub fn position(&self, name: &str, index: Option<usize>) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name && f.index == index)
    }

    /// Fields whose bytes could not be decoded
    pub fn undecodable(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter().filter(|f| !f.is_decoded())
    }

    /// Builds a replacement that sets an integer field to `value`
    pub fn unsigned_replacement(
        &self,
        name: &str,
        index: Option<usize>,
        value: u64,
    ) -> Result<FieldReplacement> {
        let position = self.position(name, index).ok_or_else(|| {
            Error::internal(format!("structured header has no field {} {:?}", name, index))
        })?;
        let bytes = self.fields[position].encode_unsigned(value)?;
        Ok(FieldReplacement {
            field: position,
            bytes,
        })
    }

    /// Writes replacements into `segment` in place.
    ///
    /// Each replacement must be exactly as wide as its field; nothing outside
    /// the field is touched.
    pub fn apply(&self, segment: &mut [u8], replacements: &[FieldReplacement]) -> Result<()> {
        for replacement in replacements {
            let field = self.fields.get(replacement.field).ok_or_else(|| {
                Error::internal(format!("no structured field at position {}", replacement.field))
            })?;
            if replacement.bytes.len() != field.width {
                return Err(Error::serialization(format!(
                    "replacement for {} is {} bytes, field width is {}",
                    field.identifier(),
                    replacement.bytes.len(),
                    field.width
                )));
            }
            let end = field.offset + field.width;
            if end > segment.len() {
                return Err(Error::serialization(format!(
                    "field {} ends at {} beyond segment length {}",
                    field.identifier(),
                    end,
                    segment.len()
                )));
            }
            segment[field.offset..end].copy_from_slice(&replacement.bytes);
        }
        Ok(())
    }
}

/// Decodes latin-1 bytes (every byte is one character)
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Encodes a string as latin-1; characters outside the range become `?`
pub fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}
