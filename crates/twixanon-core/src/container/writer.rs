//! Container serialization.
//!
//! The writer rebuilds a container from its original segments and a
//! [`RedactionPlan`]. Structured replacements are written in place; text
//! replacements are reflowed per buffer and the resulting length change is
//! either absorbed by header padding ([`ResizePolicy::Fixed`]) or propagated
//! to every length and offset field that depends on it
//! ([`ResizePolicy::Reflow`]).

use super::{layout, Container, MeasurementLayout, Segment, SegmentLayout};
use crate::error::{Error, Result};
use crate::redact::{RedactionPlan, SegmentPlan};
use crate::structured::{FieldReplacement, StructuredHeader};
use bytes::{BufMut, Bytes, BytesMut};
use std::str::FromStr;
use tracing::debug;

/// How a change in protocol text length is reconciled with the container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Keep every segment length; absorb the change in header padding
    #[default]
    Fixed,
    /// Let measurement headers grow or shrink and update dependent fields
    Reflow,
}

impl FromStr for ResizePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(ResizePolicy::Fixed),
            "reflow" => Ok(ResizePolicy::Reflow),
            other => Err(format!("unknown resize policy '{}'", other)),
        }
    }
}

/// Configuration for the container writer
#[derive(Debug, Clone, Default)]
pub struct WriterConfig {
    /// Resize policy for text length changes
    pub resize: ResizePolicy,
}

impl WriterConfig {
    /// Creates a new writer config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resize policy
    pub fn resize(mut self, resize: ResizePolicy) -> Self {
        self.resize = resize;
        self
    }
}

/// Serialized container
#[derive(Debug, Clone)]
pub struct WriteOutput {
    /// Output bytes
    pub bytes: Bytes,
    /// Output length minus input length
    pub delta: i64,
}

/// Serializes a container with a redaction plan applied
#[derive(Debug, Clone, Default)]
pub struct ContainerWriter {
    config: WriterConfig,
}

/// A measurement rebuilt in memory
struct RebuiltSegment {
    bytes: Vec<u8>,
    delta: i64,
}

impl ContainerWriter {
    /// Creates a new writer with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new writer with custom configuration
    pub fn with_config(config: WriterConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Writes `container` with `plan` applied.
    ///
    /// Nothing is returned unless every segment could be rebuilt, so a failure
    /// never yields a partial container.
    pub fn write(&self, container: &Container, plan: &RedactionPlan) -> Result<WriteOutput> {
        if plan.segments.len() != container.segments().len() {
            return Err(Error::internal(format!(
                "plan covers {} segments, container has {}",
                plan.segments.len(),
                container.segments().len()
            )));
        }

        // Measurements first: the preamble depends on their new lengths
        let mut rebuilt: Vec<Option<RebuiltSegment>> = Vec::with_capacity(plan.segments.len());
        for (segment, segment_plan) in container.segments().iter().zip(&plan.segments) {
            rebuilt.push(match &segment.layout {
                SegmentLayout::Measurement(layout) => {
                    Some(self.write_measurement(segment, layout, segment_plan)?)
                }
                SegmentLayout::RaidPreamble { .. } => None,
            });
        }

        let deltas: Vec<i64> = rebuilt
            .iter()
            .flatten()
            .map(|r| r.delta)
            .collect();
        let total_delta: i64 = deltas.iter().sum();

        let mut out = BytesMut::with_capacity(shifted(container.len(), total_delta)?);
        for ((segment, segment_plan), rebuilt) in container
            .segments()
            .iter()
            .zip(&plan.segments)
            .zip(rebuilt)
        {
            match rebuilt {
                Some(r) => out.put_slice(&r.bytes),
                None => out.put_slice(&self.write_preamble(segment, segment_plan, &deltas)?),
            }
        }

        let expected = shifted(container.len(), total_delta)?;
        if out.len() != expected {
            return Err(Error::internal(format!(
                "output is {} bytes, expected {}",
                out.len(),
                expected
            )));
        }

        debug!(
            "Wrote {} container: {} -> {} bytes",
            container.kind().as_str(),
            container.len(),
            out.len()
        );

        Ok(WriteOutput {
            bytes: out.freeze(),
            delta: total_delta,
        })
    }

    fn write_preamble(&self, segment: &Segment, plan: &SegmentPlan, deltas: &[i64]) -> Result<Vec<u8>> {
        let mut bytes = segment.bytes.to_vec();
        let header = &segment.structured;
        header.apply(&mut bytes, &plan.structured)?;

        if self.config.resize == ResizePolicy::Reflow && deltas.iter().any(|d| *d != 0) {
            let mut shift = 0i64;
            let mut lengths = Vec::with_capacity(deltas.len() * 2);
            for (i, delta) in deltas.iter().enumerate() {
                let offset = unsigned_field(header, layout::MEAS_OFFSET, i)?;
                let length = unsigned_field(header, layout::MEAS_LENGTH, i)?;
                lengths.push(header.unsigned_replacement(
                    layout::MEAS_OFFSET,
                    Some(i),
                    shifted_u64(offset, shift)?,
                )?);
                lengths.push(header.unsigned_replacement(
                    layout::MEAS_LENGTH,
                    Some(i),
                    shifted_u64(length, *delta)?,
                )?);
                shift += delta;
            }
            header.apply(&mut bytes, &lengths)?;
        }

        Ok(bytes)
    }

    fn write_measurement(
        &self,
        segment: &Segment,
        layout: &MeasurementLayout,
        plan: &SegmentPlan,
    ) -> Result<RebuiltSegment> {
        let header = &segment.structured;
        let mut original = segment.bytes.to_vec();
        header.apply(&mut original, &plan.structured)?;

        let Some(protocol) = segment.protocol.as_ref() else {
            return Ok(RebuiltSegment {
                bytes: original,
                delta: 0,
            });
        };
        let reflow = protocol.apply(&plan.text)?;
        let text_delta = reflow.total_delta() as i64;
        if reflow.header.sections().len() != layout.buffers.len() {
            return Err(Error::internal(format!(
                "segment {} has {} buffers but {} sections",
                segment.index,
                layout.buffers.len(),
                reflow.header.sections().len()
            )));
        }

        // Length fields go through the same fixed-width path as any other field
        let mut lengths: Vec<FieldReplacement> = Vec::new();
        for (j, section) in reflow.header.sections().iter().enumerate() {
            if reflow.section_deltas[j] != 0 {
                lengths.push(header.unsigned_replacement(
                    layout::BUFFER_LENGTH,
                    Some(j),
                    section.len() as u64,
                )?);
            }
        }

        let padding = &segment.bytes[layout.padding.clone()];
        let (padding, delta): (Vec<u8>, i64) = match self.config.resize {
            ResizePolicy::Fixed => (absorb(segment, padding, text_delta)?, 0),
            ResizePolicy::Reflow => {
                if text_delta != 0 {
                    let header_len = shifted_u64(layout.header_len as u64, text_delta)?;
                    lengths.push(header.unsigned_replacement(
                        layout::HEADER_LENGTH,
                        None,
                        header_len,
                    )?);
                }
                (padding.to_vec(), text_delta)
            }
        };
        header.apply(&mut original, &lengths)?;

        let mut out = Vec::with_capacity(shifted(original.len(), delta)?);
        out.extend_from_slice(&original[..layout::MEAS_PREFIX_SIZE]);
        for (buffer, section) in layout.buffers.iter().zip(reflow.header.sections()) {
            out.extend_from_slice(&original[buffer.name_offset..buffer.text.start]);
            out.extend_from_slice(section.text());
        }
        out.extend_from_slice(&padding);
        out.extend_from_slice(&original[layout.header_len..]);

        if out.len() != shifted(segment.len(), delta)? {
            return Err(Error::internal(format!(
                "segment {} rebuilt to {} bytes, expected {}",
                segment.index,
                out.len(),
                shifted(segment.len(), delta)?
            )));
        }

        if text_delta != 0 {
            debug!(
                "Segment {}: text delta {} ({:?} policy)",
                segment.index, text_delta, self.config.resize
            );
        }

        Ok(RebuiltSegment { bytes: out, delta })
    }
}

/// Absorbs a text length change in the padding after the last buffer
fn absorb(segment: &Segment, padding: &[u8], delta: i64) -> Result<Vec<u8>> {
    if delta <= 0 {
        let mut out = vec![0u8; delta.unsigned_abs() as usize];
        out.extend_from_slice(padding);
        return Ok(out);
    }

    let grow = delta as usize;
    let free = padding.iter().take_while(|&&b| b == 0).count();
    if free < grow {
        return Err(Error::serialization(format!(
            "segment {} text grows by {} bytes but only {} bytes of NUL padding are free",
            segment.index, grow, free
        )));
    }
    Ok(padding[grow..].to_vec())
}

fn unsigned_field(header: &StructuredHeader, name: &str, index: usize) -> Result<u64> {
    header
        .get(name, Some(index))
        .and_then(|f| f.value.as_ref().ok())
        .and_then(|v| v.as_unsigned())
        .ok_or_else(|| Error::internal(format!("{}[{}] is not a decoded integer", name, index)))
}

fn shifted(len: usize, delta: i64) -> Result<usize> {
    usize::try_from(len as i64 + delta)
        .map_err(|_| Error::serialization(format!("length {} shifted by {} is negative", len, delta)))
}

fn shifted_u64(value: u64, delta: i64) -> Result<u64> {
    i64::try_from(value)
        .ok()
        .and_then(|v| v.checked_add(delta))
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| Error::serialization(format!("value {} shifted by {} is out of range", value, delta)))
}
