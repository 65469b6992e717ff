//! Binary layout of the twix container.
//!
//! ## VD/VE multi-raid preamble
//!
//! ```text
//! 0     u32  TwixId
//! 4     u32  MeasurementCount
//! 8 + 152 * i:
//!   +0   u32      MeasID
//!   +4   u32      FileID
//!   +8   u64      MeasOffset
//!   +16  u64      MeasLength
//!   +24  [u8;64]  PatientName
//!   +88  [u8;64]  ProtocolName
//! ```
//!
//! ## Measurement header (VB file start, or each VD measurement)
//!
//! ```text
//! 0     u32  HeaderLength
//! 4     u32  BufferCount
//! then per buffer: name\0, u32 BufferLength, text
//! then padding up to HeaderLength
//! ```

use crate::structured::{FieldKind, FieldSpec};
use bytes::Buf;

/// Size of the preamble prefix before the raid entries
pub const RAID_PREFIX_SIZE: usize = 8;
/// Size of one raid entry
pub const RAID_ENTRY_SIZE: usize = 152;
/// Width of the raid text fields
pub const RAID_TEXT_WIDTH: usize = 64;
/// Highest measurement count a VD preamble can declare
pub const MAX_RAID_ENTRIES: usize = 64;
/// Size of `HeaderLength` + `BufferCount`
pub const MEAS_PREFIX_SIZE: usize = 8;

/// `TwixId` field
pub const TWIX_ID: &str = "TwixId";
/// `MeasurementCount` field
pub const MEASUREMENT_COUNT: &str = "MeasurementCount";
/// Raid `MeasID` field
pub const MEAS_ID: &str = "MeasID";
/// Raid `FileID` field
pub const FILE_ID: &str = "FileID";
/// Raid `MeasOffset` field
pub const MEAS_OFFSET: &str = "MeasOffset";
/// Raid `MeasLength` field
pub const MEAS_LENGTH: &str = "MeasLength";
/// Raid `PatientName` field
pub const PATIENT_NAME: &str = "PatientName";
/// Raid `ProtocolName` field
pub const PROTOCOL_NAME: &str = "ProtocolName";
/// Measurement `HeaderLength` field
pub const HEADER_LENGTH: &str = "HeaderLength";
/// Measurement `BufferCount` field
pub const BUFFER_COUNT: &str = "BufferCount";
/// Buffer name field (name plus its NUL)
pub const BUFFER_NAME: &str = "BufferName";
/// Buffer length field
pub const BUFFER_LENGTH: &str = "BufferLength";

/// Fields that locate data in the file and are owned by the writer
pub const LAYOUT_FIELDS: [&str; 8] = [
    TWIX_ID,
    MEASUREMENT_COUNT,
    MEAS_OFFSET,
    MEAS_LENGTH,
    HEADER_LENGTH,
    BUFFER_COUNT,
    BUFFER_NAME,
    BUFFER_LENGTH,
];

/// Reads a little-endian `u32` at `at`, if present
pub(crate) fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let mut bytes = data.get(at..at.checked_add(4)?)?;
    Some(bytes.get_u32_le())
}

/// Reads a little-endian `u64` at `at`, if present
pub(crate) fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let mut bytes = data.get(at..at.checked_add(8)?)?;
    Some(bytes.get_u64_le())
}

/// Offset of raid entry `i`
pub fn raid_entry_offset(i: usize) -> usize {
    RAID_PREFIX_SIZE + RAID_ENTRY_SIZE * i
}

/// Schema of a VD preamble declaring `count` measurements
pub fn raid_schema(count: usize) -> Vec<FieldSpec> {
    let mut schema = vec![
        FieldSpec::new(TWIX_ID, 0, 4, FieldKind::U32),
        FieldSpec::new(MEASUREMENT_COUNT, 4, 4, FieldKind::U32),
    ];
    for i in 0..count {
        let base = raid_entry_offset(i);
        schema.extend([
            FieldSpec::new(MEAS_ID, base, 4, FieldKind::U32).indexed(i),
            FieldSpec::new(FILE_ID, base + 4, 4, FieldKind::U32).indexed(i),
            FieldSpec::new(MEAS_OFFSET, base + 8, 8, FieldKind::U64).indexed(i),
            FieldSpec::new(MEAS_LENGTH, base + 16, 8, FieldKind::U64).indexed(i),
            FieldSpec::new(PATIENT_NAME, base + 24, RAID_TEXT_WIDTH, FieldKind::Text).indexed(i),
            FieldSpec::new(PROTOCOL_NAME, base + 88, RAID_TEXT_WIDTH, FieldKind::Text).indexed(i),
        ]);
    }
    schema
}

/// Schema of a measurement header with the given buffer table
pub fn measurement_schema(buffers: &[super::BufferLayout]) -> Vec<FieldSpec> {
    let mut schema = vec![
        FieldSpec::new(HEADER_LENGTH, 0, 4, FieldKind::U32),
        FieldSpec::new(BUFFER_COUNT, 4, 4, FieldKind::U32),
    ];
    for (j, buffer) in buffers.iter().enumerate() {
        schema.push(
            FieldSpec::new(
                BUFFER_NAME,
                buffer.name_offset,
                buffer.length_offset - buffer.name_offset,
                FieldKind::Text,
            )
            .indexed(j),
        );
        schema.push(FieldSpec::new(BUFFER_LENGTH, buffer.length_offset, 4, FieldKind::U32).indexed(j));
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_integers() {
        let data = [1u8, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(read_u32(&data, 0), Some(1));
        assert_eq!(read_u32(&data, 4), Some(2));
        assert_eq!(read_u64(&data, 4), Some(2));
        assert_eq!(read_u32(&data, 10), None);
        assert_eq!(read_u64(&data, usize::MAX - 2), None);
    }

    #[test]
    fn test_raid_schema_layout() {
        let schema = raid_schema(2);
        assert_eq!(schema.len(), 2 + 12);
        let name = schema
            .iter()
            .find(|f| f.name == PATIENT_NAME && f.index == Some(1))
            .unwrap();
        assert_eq!(name.offset, 8 + 152 + 24);
        assert_eq!(name.width, 64);
        let last = schema.last().unwrap();
        assert_eq!(last.offset + last.width, raid_entry_offset(2));
    }
}
