//! Per-file anonymization pipeline.
//!
//! [`Anonymizer::process`] runs one file through
//! reader → redactor → writer → metadata extractor, or only
//! reader → metadata extractor in [`Mode::MetaOnly`]. Nothing is shared
//! between calls, so one `Anonymizer` can serve any number of worker threads.

use crate::container::{
    Container, ContainerKind, ContainerReader, ContainerWriter, ReaderConfig, WriterConfig,
};
use crate::error::{Error, Result};
use crate::metadata::{MetadataExtractor, MetadataRecord};
use crate::redact::{AnonymizationReport, Redactor, RedactorConfig};
use crate::rules::RuleSet;
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

/// What to do with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Redact and write an anonymized container
    Full,
    /// Only extract metadata; nothing is redacted or written
    MetaOnly,
}

/// Configuration for every stage of the pipeline
#[derive(Debug, Clone, Default)]
pub struct AnonymizerConfig {
    /// Container reader settings
    pub reader: ReaderConfig,
    /// Redactor settings
    pub redactor: RedactorConfig,
    /// Container writer settings
    pub writer: WriterConfig,
}

/// Result of processing one file
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// Container variant
    pub kind: ContainerKind,
    /// Scan metadata
    pub metadata: MetadataRecord,
    /// Anonymized container (full mode only)
    pub output: Option<Bytes>,
    /// Redaction report (full mode only)
    pub report: Option<AnonymizationReport>,
    /// Output length minus input length
    pub delta: i64,
}

/// Runs the anonymization pipeline on whole files
#[derive(Debug, Clone, Default)]
pub struct Anonymizer {
    reader: ContainerReader,
    redactor: Redactor,
    writer: ContainerWriter,
    extractor: MetadataExtractor,
}

impl Anonymizer {
    /// Creates an anonymizer with default configuration
    pub fn new(rules: RuleSet) -> Self {
        Self::with_config(rules, AnonymizerConfig::default())
    }

    /// Creates an anonymizer with custom configuration
    pub fn with_config(rules: RuleSet, config: AnonymizerConfig) -> Self {
        Self {
            reader: ContainerReader::with_config(config.reader),
            redactor: Redactor::with_config(rules, config.redactor),
            writer: ContainerWriter::with_config(config.writer),
            extractor: MetadataExtractor::new(),
        }
    }

    /// Returns the rule set
    pub fn rules(&self) -> &RuleSet {
        self.redactor.rules()
    }

    /// Processes the bytes of one file
    pub fn process(&self, data: impl Into<Bytes>, mode: Mode) -> Result<FileOutcome> {
        let container = self.reader.read(data)?;
        match mode {
            Mode::MetaOnly => Ok(self.metadata_only(&container)),
            Mode::Full => self.anonymize(&container),
        }
    }

    /// Reads and processes one file from disk
    pub fn process_file(&self, path: impl AsRef<Path>, mode: Mode) -> Result<FileOutcome> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        debug!("Processing {} ({} bytes, {:?})", path.display(), data.len(), mode);
        self.process(data, mode)
    }

    fn metadata_only(&self, container: &Container) -> FileOutcome {
        FileOutcome {
            kind: container.kind(),
            metadata: self.extractor.extract_container(container),
            output: None,
            report: None,
            delta: 0,
        }
    }

    fn anonymize(&self, container: &Container) -> Result<FileOutcome> {
        let plan = self.redactor.plan(container)?;
        let written = self.writer.write(container, &plan)?;
        Ok(FileOutcome {
            kind: container.kind(),
            metadata: self.extractor.extract_container(container),
            output: Some(written.bytes),
            report: Some(plan.report),
            delta: written.delta,
        })
    }
}
