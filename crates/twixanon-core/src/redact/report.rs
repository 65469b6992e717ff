//! Anonymization report.

use crate::error::{Error, Result};
use crate::rules::HeaderSource;
use serde::Serialize;

/// What happened to one matched occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RedactionOutcome {
    /// Replaced by the rule's policy
    Redacted,
    /// Already empty or already an output of the policy; left as is
    AlreadyRedacted,
    /// Replaced, but the replacement was cut to the maximum length
    Truncated,
    /// The field could not be decoded and was left untouched
    Undecodable {
        /// Why decoding failed
        reason: String,
    },
}

impl RedactionOutcome {
    /// Returns true if the occurrence was rewritten
    pub fn is_rewrite(&self) -> bool {
        matches!(self, RedactionOutcome::Redacted | RedactionOutcome::Truncated)
    }
}

/// One line of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// Segment index
    pub segment: usize,
    /// Field identifier (`PatientName[0]`, `Dicom/PatientID`, ...)
    pub field: String,
    /// Which header copy the occurrence lives in
    pub source: HeaderSource,
    /// Id of the rule that matched
    pub rule: String,
    /// Outcome
    #[serde(flatten)]
    pub outcome: RedactionOutcome,
}

/// Outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// Occurrences rewritten in full
    pub redacted: usize,
    /// Occurrences that needed no change
    pub already_redacted: usize,
    /// Occurrences rewritten with a truncated value
    pub truncated: usize,
    /// Occurrences that could not be decoded
    pub undecodable: usize,
}

/// Per-file list of every matched occurrence and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnonymizationReport {
    /// Version of the rule set that produced the report
    pub ruleset: String,
    /// Entries in container order
    pub entries: Vec<ReportEntry>,
}

impl AnonymizationReport {
    /// Creates an empty report
    pub fn new(ruleset: impl Into<String>) -> Self {
        Self {
            ruleset: ruleset.into(),
            entries: Vec::new(),
        }
    }

    /// Appends an entry
    pub fn push(
        &mut self,
        segment: usize,
        field: impl Into<String>,
        source: HeaderSource,
        rule: impl Into<String>,
        outcome: RedactionOutcome,
    ) {
        self.entries.push(ReportEntry {
            segment,
            field: field.into(),
            source,
            rule: rule.into(),
            outcome,
        });
    }

    /// Entries produced by `rule`
    pub fn for_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a ReportEntry> + 'a {
        self.entries.iter().filter(move |e| e.rule == rule)
    }

    /// Counts entries by outcome
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for entry in &self.entries {
            match entry.outcome {
                RedactionOutcome::Redacted => summary.redacted += 1,
                RedactionOutcome::AlreadyRedacted => summary.already_redacted += 1,
                RedactionOutcome::Truncated => summary.truncated += 1,
                RedactionOutcome::Undecodable { .. } => summary.undecodable += 1,
            }
        }
        summary
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }
}
