//! # twixanon-core
//!
//! A library for removing patient information from Siemens twix MRI raw-data
//! files without disturbing the byte layout that reconstruction tools rely on.
//!
//! This crate provides the core functionality for:
//! - Splitting VB and VD/VE containers into measurement segments
//! - Decoding the fixed-layout structured header and the protocol text header
//! - Redacting identifying values consistently in both header copies
//! - Rewriting the container with every non-redacted byte in place
//! - Extracting non-identifying scan metadata
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`container`]: Container reading, segment layout and writing
//! - [`structured`]: Fixed-width binary header fields
//! - [`protocol`]: Protocol text sections and their entries
//! - [`rules`]: PII rules and redaction policies
//! - [`redact`]: Redaction planning, verification and reporting
//! - [`metadata`]: Scan metadata extraction
//! - [`anonymize`]: The per-file pipeline
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use twixanon_core::{Anonymizer, Mode, RuleSet};
//! use std::fs;
//!
//! let anonymizer = Anonymizer::new(RuleSet::builtin());
//! let outcome = anonymizer.process_file("meas_MID00042_FID01234_t1_mprage.dat", Mode::Full)?;
//!
//! if let Some(bytes) = &outcome.output {
//!     fs::write("anonymized.dat", bytes)?;
//! }
//! println!("TR = {:?}", outcome.metadata.tr);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! - [`RuleSet::from_json`]: Load site-specific PII rules
//! - [`ResizePolicy`]: Choose how text length changes are reconciled
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod anonymize;
pub mod container;
pub mod error;
pub mod metadata;
pub mod protocol;
pub mod redact;
pub mod rules;
pub mod structured;

// Re-export primary types for convenience
pub use anonymize::{Anonymizer, AnonymizerConfig, FileOutcome, Mode};
pub use container::{
    Container, ContainerKind, ContainerReader, ContainerWriter, ReaderConfig, ResizePolicy,
    Segment, WriterConfig,
};
pub use error::{Error, Result};
pub use metadata::{MetadataExtractor, MetadataRecord};
pub use protocol::{ProtocolHeader, ProtocolSection};
pub use redact::{AnonymizationReport, RedactionOutcome, RedactionPlan, Redactor, RedactorConfig};
pub use rules::{PiiRule, RedactionPolicy, RuleMatcher, RuleSet};
pub use structured::{HeaderField, StructuredHeader};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
