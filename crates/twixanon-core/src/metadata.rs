//! Scan metadata extraction.
//!
//! Metadata keys and PII keys are disjoint, so a record extracted before and
//! after redaction is the same. Missing keys are `None`, never an error.

use crate::container::Container;
use crate::protocol::ProtocolHeader;
use serde::Serialize;

/// Non-identifying scan parameters of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataRecord {
    /// Sequence description
    pub sequence_name: Option<String>,
    /// Repetition time in ms
    pub tr: Option<String>,
    /// Inversion time in ms
    pub ti: Option<String>,
    /// Flip angle in degrees
    pub flip_angle: Option<String>,
    /// Parallel imaging acceleration factor (phase encoding)
    pub acceleration_factor: Option<String>,
    /// Scanner model name
    pub scanner_model: Option<String>,
    /// Scanner software version
    pub software_version: Option<String>,
    /// Main field strength in tesla
    pub field_strength: Option<String>,
    /// Body part examined
    pub body_part: Option<String>,
    /// Patient position (HFS, FFS, ...)
    pub patient_position: Option<String>,
    /// Turbo factor
    pub turbo_factor: Option<String>,
    /// Readout oversampling factor
    pub readout_oversampling: Option<String>,
    /// Number of slices
    pub slices: Option<String>,
    /// Number of phase encoding lines
    pub phase_encoding_lines: Option<String>,
    /// Read field of view in mm
    pub read_fov: Option<String>,
    /// Phase field of view in mm
    pub phase_fov: Option<String>,
    /// Phase resolution
    pub phase_resolution: Option<String>,
}

impl MetadataRecord {
    /// Column names in CSV order
    pub const COLUMNS: [&'static str; 17] = [
        "sequence_name",
        "tr",
        "ti",
        "flip_angle",
        "acceleration_factor",
        "scanner_model",
        "software_version",
        "field_strength",
        "body_part",
        "patient_position",
        "turbo_factor",
        "readout_oversampling",
        "slices",
        "phase_encoding_lines",
        "read_fov",
        "phase_fov",
        "phase_resolution",
    ];

    /// Values in [`Self::COLUMNS`] order
    pub fn values(&self) -> [Option<&str>; 17] {
        [
            self.sequence_name.as_deref(),
            self.tr.as_deref(),
            self.ti.as_deref(),
            self.flip_angle.as_deref(),
            self.acceleration_factor.as_deref(),
            self.scanner_model.as_deref(),
            self.software_version.as_deref(),
            self.field_strength.as_deref(),
            self.body_part.as_deref(),
            self.patient_position.as_deref(),
            self.turbo_factor.as_deref(),
            self.readout_oversampling.as_deref(),
            self.slices.as_deref(),
            self.phase_encoding_lines.as_deref(),
            self.read_fov.as_deref(),
            self.phase_fov.as_deref(),
            self.phase_resolution.as_deref(),
        ]
    }

    /// CSV row: values in column order, missing ones as empty cells
    pub fn to_row(&self) -> Vec<&str> {
        self.values().iter().map(|v| v.unwrap_or("")).collect()
    }

    /// Number of columns that have a value
    pub fn filled(&self) -> usize {
        self.values().iter().filter(|v| v.is_some()).count()
    }
}

/// A lookup key with an optional unit divisor
struct Candidate {
    key: &'static str,
    divisor: Option<f64>,
}

const fn key(key: &'static str) -> Candidate {
    Candidate { key, divisor: None }
}

/// ASCCONV times are stored in microseconds
const fn micros(key: &'static str) -> Candidate {
    Candidate {
        key,
        divisor: Some(1000.0),
    }
}

const SEQUENCE_NAME: &[Candidate] = &[key("SequenceDescription"), key("tSequenceFileName")];
const TR: &[Candidate] = &[key("TR"), micros("alTR[0]")];
const TI: &[Candidate] = &[key("TI"), micros("alTI[0]")];
const FLIP_ANGLE: &[Candidate] = &[key("FlipAngle"), key("adFlipAngleDegree[0]")];
const ACCELERATION: &[Candidate] = &[
    key("sPat.lAccelFactPE"),
    key("lAccelFactPE"),
    key("AccelFactorPE"),
];
const SCANNER_MODEL: &[Candidate] = &[key("ManufacturersModelName"), key("tModelName")];
const SOFTWARE_VERSION: &[Candidate] = &[
    key("SoftwareVersions"),
    key("sProtConsistencyInfo.tBaselineString"),
];
const FIELD_STRENGTH: &[Candidate] = &[
    key("flMagneticFieldStrength"),
    key("sProtConsistencyInfo.flNominalB0"),
];
const BODY_PART: &[Candidate] = &[key("tBodyPartExamined")];
const PATIENT_POSITION: &[Candidate] = &[key("PatientPosition")];
const TURBO_FACTOR: &[Candidate] = &[key("TurboFactor"), key("sFastImaging.lTurboFactor")];
const READOUT_OVERSAMPLING: &[Candidate] = &[key("ReadoutOversamplingFactor")];
const SLICES: &[Candidate] = &[key("NSlc")];
const PHASE_ENCODING_LINES: &[Candidate] = &[key("PhaseEncodingLines")];
const READ_FOV: &[Candidate] = &[key("ReadFoV")];
const PHASE_FOV: &[Candidate] = &[key("PhaseFoV")];
const PHASE_RESOLUTION: &[Candidate] = &[key("PhaseResolution")];

/// Reads a [`MetadataRecord`] out of a protocol header
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Creates a new extractor
    pub fn new() -> Self {
        Self
    }

    /// Extracts metadata from the last measurement of a container
    pub fn extract_container(&self, container: &Container) -> MetadataRecord {
        container
            .last_protocol()
            .map(|protocol| self.extract(protocol))
            .unwrap_or_default()
    }

    /// Extracts metadata from one protocol header
    pub fn extract(&self, protocol: &ProtocolHeader) -> MetadataRecord {
        let get = |candidates: &[Candidate]| lookup(protocol, candidates);
        MetadataRecord {
            sequence_name: get(SEQUENCE_NAME),
            tr: get(TR),
            ti: get(TI),
            flip_angle: get(FLIP_ANGLE),
            acceleration_factor: get(ACCELERATION),
            scanner_model: get(SCANNER_MODEL),
            software_version: get(SOFTWARE_VERSION),
            field_strength: get(FIELD_STRENGTH),
            body_part: get(BODY_PART),
            patient_position: get(PATIENT_POSITION),
            turbo_factor: get(TURBO_FACTOR),
            readout_oversampling: get(READOUT_OVERSAMPLING),
            slices: get(SLICES),
            phase_encoding_lines: get(PHASE_ENCODING_LINES),
            read_fov: get(READ_FOV),
            phase_fov: get(PHASE_FOV),
            phase_resolution: get(PHASE_RESOLUTION),
        }
    }
}

fn lookup(protocol: &ProtocolHeader, candidates: &[Candidate]) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        let value = protocol.find(candidate.key)?;
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match candidate.divisor {
            Some(divisor) => {
                let scaled = value.parse::<f64>().ok()? / divisor;
                Some(format_number(scaled))
            }
            None => Some(value.to_string()),
        }
    })
}

/// Formats without a trailing `.0` for whole numbers
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
