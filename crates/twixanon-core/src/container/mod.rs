//! Twix container reading and writing.
//!
//! A container is split into contiguous [`Segment`]s whose lengths add up to
//! the file length:
//!
//! - VB files hold exactly one measurement segment starting at offset 0.
//! - VD/VE files start with a multi-raid preamble segment, followed by one
//!   segment per declared measurement.
//!
//! Each segment owns its decoded [`StructuredHeader`] and, for measurements,
//! its [`ProtocolHeader`]. Reading is read-only; [`ContainerWriter`] produces
//! new bytes from the original segments and a redaction plan.
//!
//! ## Example
//!
//! ```no_run
//! use twixanon_core::ContainerReader;
//!
//! let data = std::fs::read("meas_MID00042_FID01234_t1_mprage.dat")?;
//! let container = ContainerReader::new().read(data)?;
//! for segment in container.segments() {
//!     println!("segment {} at {} ({} bytes)", segment.index, segment.offset, segment.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod layout;
mod writer;

use crate::error::{Error, Result};
use crate::protocol::ProtocolHeader;
use crate::structured::{decode_latin1, StructuredHeader};
use bytes::Bytes;
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, trace};

use layout::{read_u32, read_u64};

pub use writer::{ContainerWriter, ResizePolicy, WriteOutput, WriterConfig};

/// Container variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// Single measurement, header at offset 0
    Vb,
    /// Multi-raid preamble followed by measurements
    Vd,
}

impl ContainerKind {
    /// Detects the variant from the first two words of the file
    pub fn detect(data: &[u8]) -> Result<Self> {
        let (Some(first), Some(second)) = (read_u32(data, 0), read_u32(data, 4)) else {
            return Err(Error::malformed(0, format!("file is only {} bytes", data.len())));
        };
        if first == 0 && second as usize <= layout::MAX_RAID_ENTRIES {
            Ok(ContainerKind::Vd)
        } else {
            Ok(ContainerKind::Vb)
        }
    }

    /// Short name used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Vb => "VB",
            ContainerKind::Vd => "VD",
        }
    }
}

/// One text buffer in a measurement header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    /// Buffer name (without the NUL)
    pub name: String,
    /// Offset of the name within the segment
    pub name_offset: usize,
    /// Offset of the `u32` length that follows the name
    pub length_offset: usize,
    /// Byte range of the text within the segment
    pub text: Range<usize>,
}

/// Layout of a measurement header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementLayout {
    /// Declared `HeaderLength`
    pub header_len: usize,
    /// Buffer table in file order
    pub buffers: Vec<BufferLayout>,
    /// Unknown bytes between the last buffer and `header_len`
    pub padding: Range<usize>,
}

impl MeasurementLayout {
    /// Offset where the protocol text begins
    pub fn text_start(&self) -> usize {
        self.buffers
            .first()
            .map(|b| b.text.start)
            .unwrap_or(self.padding.start)
    }
}

/// What a segment contains
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentLayout {
    /// VD multi-raid preamble with `entries` decoded raid entries
    RaidPreamble {
        /// Number of raid entries
        entries: usize,
    },
    /// A measurement (header + acquisition data)
    Measurement(MeasurementLayout),
}

/// One contiguous unit of the container
#[derive(Debug, Clone)]
pub struct Segment {
    /// Position in the container
    pub index: usize,
    /// Absolute byte offset
    pub offset: usize,
    /// Raw bytes, exactly the declared length
    pub bytes: Bytes,
    /// Parsed layout
    pub layout: SegmentLayout,
    /// Structured header fields
    pub structured: StructuredHeader,
    /// Protocol text header (measurements only)
    pub protocol: Option<ProtocolHeader>,
}

impl Segment {
    /// Declared length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-length segment
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Measurement layout, if this is a measurement segment
    pub fn measurement(&self) -> Option<&MeasurementLayout> {
        match &self.layout {
            SegmentLayout::Measurement(m) => Some(m),
            SegmentLayout::RaidPreamble { .. } => None,
        }
    }

    /// Offset (relative to the segment) where the structured header ends
    /// and the protocol text begins
    pub fn text_start(&self) -> Option<usize> {
        self.measurement().map(MeasurementLayout::text_start)
    }
}

/// A parsed twix container
#[derive(Debug, Clone)]
pub struct Container {
    kind: ContainerKind,
    segments: Vec<Segment>,
    len: usize,
}

impl Container {
    /// Container variant
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// All segments in file order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the container holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Measurement segments in file order
    pub fn measurements(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.measurement().is_some())
    }

    /// Last measurement that carries a protocol header
    pub fn last_protocol(&self) -> Option<&ProtocolHeader> {
        self.segments.iter().rev().find_map(|s| s.protocol.as_ref())
    }
}

/// Configuration for the container reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum number of measurements accepted in a VD preamble
    pub max_measurements: usize,
    /// Maximum number of text buffers in a measurement header
    pub max_buffers: usize,
    /// Maximum length of a buffer name
    pub max_buffer_name: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_measurements: layout::MAX_RAID_ENTRIES,
            max_buffers: 64,
            max_buffer_name: 64,
        }
    }
}

impl ReaderConfig {
    /// Creates a new reader config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum measurement count
    pub fn max_measurements(mut self, max: usize) -> Self {
        self.max_measurements = max;
        self
    }

    /// Sets the maximum buffer count
    pub fn max_buffers(mut self, max: usize) -> Self {
        self.max_buffers = max;
        self
    }
}

/// Parses raw bytes into a [`Container`]
#[derive(Debug, Clone, Default)]
pub struct ContainerReader {
    config: ReaderConfig,
}

impl ContainerReader {
    /// Creates a new reader with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new reader with custom configuration
    pub fn with_config(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Parses a whole file
    pub fn read(&self, data: impl Into<Bytes>) -> Result<Container> {
        let data: Bytes = data.into();
        let kind = ContainerKind::detect(&data)?;
        debug!("Reading {} container of {} bytes", kind.as_str(), data.len());

        let segments = match kind {
            ContainerKind::Vb => vec![self.read_measurement(0, 0, data.clone())?],
            ContainerKind::Vd => self.read_vd(&data)?,
        };

        Ok(Container {
            kind,
            segments,
            len: data.len(),
        })
    }

    fn read_vd(&self, data: &Bytes) -> Result<Vec<Segment>> {
        let count = read_u32(data, 4).unwrap_or(0) as usize;
        if count == 0 || count > self.config.max_measurements {
            return Err(Error::malformed(
                4,
                format!(
                    "measurement count {} outside 1..={}",
                    count, self.config.max_measurements
                ),
            ));
        }

        let table_end = layout::raid_entry_offset(count);
        if data.len() < table_end {
            return Err(Error::malformed(
                data.len(),
                format!("raid table needs {} bytes, file has {}", table_end, data.len()),
            ));
        }

        let mut ranges = Vec::with_capacity(count);
        for i in 0..count {
            let base = layout::raid_entry_offset(i);
            let offset = read_u64(data, base + 8).unwrap_or(0);
            let length = read_u64(data, base + 16).unwrap_or(0);
            let start = usize::try_from(offset)
                .map_err(|_| Error::malformed(base + 8, "measurement offset overflows"))?;
            let end = usize::try_from(length)
                .ok()
                .and_then(|len| start.checked_add(len))
                .ok_or_else(|| Error::malformed(base + 16, "measurement length overflows"))?;
            ranges.push(start..end);
        }

        let preamble_end = ranges[0].start;
        if preamble_end < table_end {
            return Err(Error::malformed(
                preamble_end,
                "first measurement overlaps the raid table",
            ));
        }

        let mut expected = preamble_end;
        for (i, range) in ranges.iter().enumerate() {
            if range.start != expected {
                return Err(Error::malformed(
                    range.start,
                    format!(
                        "measurement {} starts at {} but the previous segment ends at {}",
                        i, range.start, expected
                    ),
                ));
            }
            if range.end > data.len() {
                return Err(Error::malformed(
                    range.start,
                    format!(
                        "measurement {} ends at {} beyond the file length {}",
                        i,
                        range.end,
                        data.len()
                    ),
                ));
            }
            expected = range.end;
        }
        if expected != data.len() {
            return Err(Error::malformed(
                expected,
                format!(
                    "declared segments cover {} bytes but the file has {}",
                    expected,
                    data.len()
                ),
            ));
        }

        let preamble_bytes = data.slice(0..preamble_end);
        let structured = StructuredHeader::decode(&preamble_bytes, &layout::raid_schema(count));
        let mut segments = vec![Segment {
            index: 0,
            offset: 0,
            bytes: preamble_bytes,
            layout: SegmentLayout::RaidPreamble { entries: count },
            structured,
            protocol: None,
        }];

        for (i, range) in ranges.into_iter().enumerate() {
            let start = range.start;
            segments.push(self.read_measurement(i + 1, start, data.slice(range))?);
        }

        Ok(segments)
    }

    fn read_measurement(&self, index: usize, offset: usize, bytes: Bytes) -> Result<Segment> {
        let header_len = read_u32(&bytes, 0)
            .ok_or_else(|| Error::malformed(offset, "measurement is shorter than its header length word"))?
            as usize;
        if header_len < layout::MEAS_PREFIX_SIZE || header_len > bytes.len() {
            return Err(Error::malformed(
                offset,
                format!(
                    "header length {} outside {}..={}",
                    header_len,
                    layout::MEAS_PREFIX_SIZE,
                    bytes.len()
                ),
            ));
        }

        let buffer_count = read_u32(&bytes, 4).unwrap_or(0) as usize;
        if buffer_count > self.config.max_buffers {
            return Err(Error::malformed(
                offset + 4,
                format!(
                    "buffer count {} exceeds {}",
                    buffer_count, self.config.max_buffers
                ),
            ));
        }

        let header = &bytes[..header_len];
        let mut cursor = layout::MEAS_PREFIX_SIZE;
        let mut buffers = Vec::with_capacity(buffer_count);

        for j in 0..buffer_count {
            let search_end = header_len.min(cursor + self.config.max_buffer_name + 1);
            let nul = header[cursor..search_end]
                .iter()
                .position(|&b| b == 0)
                .map(|p| cursor + p)
                .ok_or_else(|| {
                    Error::malformed(
                        offset + cursor,
                        format!("name delimiter of buffer {} not found", j),
                    )
                })?;
            let name = decode_latin1(&header[cursor..nul]);
            let name_offset = cursor;
            let length_offset = nul + 1;

            let length = read_u32(header, length_offset).ok_or_else(|| {
                Error::malformed(
                    offset + length_offset,
                    format!("length of buffer '{}' runs past the header", name),
                )
            })? as usize;
            let text_start = length_offset + 4;
            let text_end = text_start + length;
            if text_end > header_len {
                return Err(Error::malformed(
                    offset + text_start,
                    format!(
                        "buffer '{}' ({} bytes) runs past the header end at {}",
                        name, length, header_len
                    ),
                ));
            }

            trace!("Buffer {} '{}' at {}..{}", j, name, text_start, text_end);
            buffers.push(BufferLayout {
                name,
                name_offset,
                length_offset,
                text: text_start..text_end,
            });
            cursor = text_end;
        }

        let measurement = MeasurementLayout {
            header_len,
            padding: cursor..header_len,
            buffers,
        };

        let structured =
            StructuredHeader::decode(&bytes[..header_len], &layout::measurement_schema(&measurement.buffers));
        let protocol = ProtocolHeader::parse(
            measurement
                .buffers
                .iter()
                .map(|b| (b.name.clone(), &bytes[b.text.clone()])),
        );

        debug!(
            "Measurement segment {} at {}: header {} bytes, {} buffers, {} padding bytes",
            index,
            offset,
            header_len,
            measurement.buffers.len(),
            measurement.padding.len()
        );

        Ok(Segment {
            index,
            offset,
            bytes,
            layout: SegmentLayout::Measurement(measurement),
            structured,
            protocol: Some(protocol),
        })
    }
}
