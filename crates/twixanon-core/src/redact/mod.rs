//! Redaction engine.
//!
//! The [`Redactor`] walks every structured field and every text entry of a
//! container, matches them against a [`RuleSet`], and produces a
//! [`RedactionPlan`]:
//!
//! - fixed-width [`FieldReplacement`]s for the structured headers,
//! - variable-length [`TextReplacement`]s for the protocol text,
//! - an [`AnonymizationReport`] listing every matched occurrence.
//!
//! The plan is verified before it is returned. A rule that rewrites one copy
//! of a value but leaves another copy in place is an
//! [`Error::PartialRedaction`], never a success.

mod report;

pub use report::{AnonymizationReport, RedactionOutcome, ReportEntry, ReportSummary};

use crate::container::layout::LAYOUT_FIELDS;
use crate::container::{Container, Segment};
use crate::error::{Error, Result};
use crate::protocol::{EntryRef, ProtocolEntry, ProtocolHeader, ProtocolSection, TextReplacement};
use crate::rules::{HeaderSource, PiiRule, RuleScope, RuleSet};
use crate::structured::{
    decode_latin1, encode_latin1, FieldKind, FieldReplacement, FieldValue, HeaderField,
};
use regex::bytes::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Rule id reported for exam date stamps masked outside of any rule
pub const EXAM_DATE_STAMP: &str = "exam_date_stamp";

/// Key whose value carries the exam date stamp
const FRAME_OF_REFERENCE: &str = "FrameOfReference";

/// Shortest original value looked for by the leak scan
const MIN_LEAK_LEN: usize = 3;

/// Configuration for the redactor
#[derive(Debug, Clone)]
pub struct RedactorConfig {
    /// Hard maximum length of a text replacement value
    pub max_value_len: usize,
    /// Mask exam date stamps wherever they appear in the text
    pub exam_date_sweep: bool,
    /// Look for leftover copies of both-scope values anywhere in the headers
    pub leak_scan: bool,
}

impl Default for RedactorConfig {
    fn default() -> Self {
        Self {
            max_value_len: 64,
            exam_date_sweep: true,
            leak_scan: true,
        }
    }
}

impl RedactorConfig {
    /// Creates a new redactor config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum text replacement length
    pub fn max_value_len(mut self, len: usize) -> Self {
        self.max_value_len = len;
        self
    }

    /// Enables or disables the exam date sweep
    pub fn exam_date_sweep(mut self, enabled: bool) -> Self {
        self.exam_date_sweep = enabled;
        self
    }

    /// Enables or disables the leak scan
    pub fn leak_scan(mut self, enabled: bool) -> Self {
        self.leak_scan = enabled;
        self
    }
}

/// Replacements for one segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentPlan {
    /// Structured header replacements
    pub structured: Vec<FieldReplacement>,
    /// Protocol text replacements
    pub text: Vec<TextReplacement>,
}

impl SegmentPlan {
    /// Returns true if nothing in the segment changes
    pub fn is_empty(&self) -> bool {
        self.structured.is_empty() && self.text.is_empty()
    }
}

/// Everything the writer needs to produce an anonymized container
#[derive(Debug, Clone)]
pub struct RedactionPlan {
    /// One plan per container segment, in segment order
    pub segments: Vec<SegmentPlan>,
    /// Report of every matched occurrence
    pub report: AnonymizationReport,
}

impl RedactionPlan {
    /// A plan that changes nothing
    pub fn empty(container: &Container, ruleset: impl Into<String>) -> Self {
        Self {
            segments: vec![SegmentPlan::default(); container.segments().len()],
            report: AnonymizationReport::new(ruleset),
        }
    }

    /// Returns true if no segment changes
    pub fn is_noop(&self) -> bool {
        self.segments.iter().all(SegmentPlan::is_empty)
    }
}

/// A rewritten occurrence, kept for verification
#[derive(Debug)]
struct Rewrite {
    rule: String,
    segment: usize,
    field: String,
    location: Location,
    original: String,
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Structured { field: usize },
    Text(EntryRef),
}

/// Working state of one planning run
struct Planner<'a> {
    rules: &'a RuleSet,
    config: &'a RedactorConfig,
    segments: Vec<SegmentPlan>,
    report: AnonymizationReport,
    rewrites: Vec<Rewrite>,
    touched: HashSet<(usize, EntryRef)>,
}

/// Plans and verifies the redaction of a container
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    rules: RuleSet,
    config: RedactorConfig,
}

impl Redactor {
    /// Creates a redactor with default configuration
    pub fn new(rules: RuleSet) -> Self {
        Self::with_config(rules, RedactorConfig::default())
    }

    /// Creates a redactor with custom configuration
    pub fn with_config(rules: RuleSet, config: RedactorConfig) -> Self {
        Self { rules, config }
    }

    /// Returns the rule set
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Returns the configuration
    pub fn config(&self) -> &RedactorConfig {
        &self.config
    }

    /// Builds and verifies the plan for `container`
    pub fn plan(&self, container: &Container) -> Result<RedactionPlan> {
        let mut planner = Planner {
            rules: &self.rules,
            config: &self.config,
            segments: vec![SegmentPlan::default(); container.segments().len()],
            report: AnonymizationReport::new(self.rules.version()),
            rewrites: Vec::new(),
            touched: HashSet::new(),
        };

        for segment in container.segments() {
            planner.structured(segment)?;
            if let Some(protocol) = &segment.protocol {
                planner.text(segment.index, protocol);
            }
        }

        if self.config.exam_date_sweep {
            planner.sweep_exam_dates(container);
        }

        planner.verify(container)?;

        let summary = planner.report.summary();
        debug!(
            "Planned redaction: {} redacted, {} already redacted, {} truncated, {} undecodable",
            summary.redacted, summary.already_redacted, summary.truncated, summary.undecodable
        );

        Ok(RedactionPlan {
            segments: planner.segments,
            report: planner.report,
        })
    }
}

impl Planner<'_> {
    fn structured(&mut self, segment: &Segment) -> Result<()> {
        for (position, field) in segment.structured.fields().iter().enumerate() {
            let Some(rule) = self.rules.match_structured(field.name) else {
                continue;
            };
            let identifier = field.identifier();
            if LAYOUT_FIELDS.contains(&field.name) {
                return Err(Error::invalid_rule(
                    &rule.id,
                    format!("{} locates data in the file and cannot be redacted", identifier),
                ));
            }

            let value = match &field.value {
                Ok(value) => value,
                Err(issue) => {
                    if let Some(error) = field.decode_error() {
                        warn!("Segment {}: rule {} matched but {}", segment.index, rule.id, error);
                    }
                    self.report.push(
                        segment.index,
                        identifier,
                        HeaderSource::Structured,
                        &rule.id,
                        RedactionOutcome::Undecodable {
                            reason: issue.reason.clone(),
                        },
                    );
                    continue;
                }
            };

            let original = value.to_string();
            if is_redacted(rule, field, value, &original) {
                self.already_redacted(segment.index, identifier, HeaderSource::Structured, rule);
                continue;
            }

            let replacement = rule.policy.apply(&original);
            let (bytes, truncated) = match field.kind {
                FieldKind::Text if replacement.is_empty() => (field.encode_blank(), false),
                FieldKind::Text => field.encode_text(&replacement),
                FieldKind::U32 | FieldKind::U64 => {
                    let number = unsigned_output(rule, &identifier, &replacement)?;
                    (field.encode_unsigned(number)?, false)
                }
                FieldKind::Bytes => (field.encode_blank(), false),
            };

            // A truncated or numeric output can reproduce the stored bytes
            if bytes == field.raw {
                self.already_redacted(segment.index, identifier, HeaderSource::Structured, rule);
                continue;
            }

            let outcome = if truncated {
                warn!(
                    "Segment {}: replacement for {} truncated to {} bytes",
                    segment.index, identifier, field.width
                );
                RedactionOutcome::Truncated
            } else {
                RedactionOutcome::Redacted
            };

            self.segments[segment.index].structured.push(FieldReplacement {
                field: position,
                bytes,
            });
            self.rewrites.push(Rewrite {
                rule: rule.id.clone(),
                segment: segment.index,
                field: identifier.clone(),
                location: Location::Structured { field: position },
                original,
            });
            self.report
                .push(segment.index, identifier, HeaderSource::Structured, &rule.id, outcome);
        }
        Ok(())
    }

    /// Rewrites each value token of a matched entry on its own, so the
    /// quotes between the tokens of a multi-valued leaf survive
    fn text(&mut self, segment: usize, protocol: &ProtocolHeader) {
        for (entry_ref, section, entry) in protocol.entries() {
            if entry.is_opaque() {
                continue;
            }
            let Some(original) = section.value(entry) else {
                continue;
            };
            let Some(rule) = self.rules.match_text(section.name(), &entry.key) else {
                continue;
            };
            let identifier = entry_identifier(section, entry);

            let mut edits = Vec::new();
            let mut truncated = false;
            for token in &entry.tokens {
                let raw = &section.text()[token.clone()];
                let value = decode_latin1(raw);
                if value.is_empty() || rule.policy.is_applied(&value) {
                    continue;
                }
                let mut bytes = encode_latin1(&rule.policy.apply(&value));
                let cut = bytes.len() > self.config.max_value_len;
                bytes.truncate(self.config.max_value_len);
                if bytes == raw {
                    continue;
                }
                truncated |= cut;
                edits.push(TextReplacement {
                    section: entry_ref.section,
                    span: token.clone(),
                    bytes,
                });
            }

            if edits.is_empty() {
                self.already_redacted(segment, identifier, HeaderSource::Text, rule);
                continue;
            }

            let outcome = if truncated {
                warn!(
                    "Segment {}: replacement for {} truncated to {} bytes",
                    segment, identifier, self.config.max_value_len
                );
                RedactionOutcome::Truncated
            } else {
                RedactionOutcome::Redacted
            };

            self.segments[segment].text.extend(edits);
            self.touched.insert((segment, entry_ref));
            self.rewrites.push(Rewrite {
                rule: rule.id.clone(),
                segment,
                field: identifier.clone(),
                location: Location::Text(entry_ref),
                original,
            });
            self.report
                .push(segment, identifier, HeaderSource::Text, &rule.id, outcome);
        }
    }

    fn already_redacted(&mut self, segment: usize, field: String, source: HeaderSource, rule: &PiiRule) {
        self.report
            .push(segment, field, source, &rule.id, RedactionOutcome::AlreadyRedacted);
    }

    /// Masks quoted digit runs that embed the exam date taken from the
    /// frame of reference UID
    fn sweep_exam_dates(&mut self, container: &Container) {
        let mut stamps = BTreeSet::new();
        for segment in container.segments() {
            let Some(protocol) = &segment.protocol else {
                continue;
            };
            for (_, section, entry) in protocol.entries() {
                if entry.is_opaque() || entry.key != FRAME_OF_REFERENCE {
                    continue;
                }
                let Some(value) = section.value(entry) else {
                    continue;
                };
                let redacted = self
                    .rules
                    .match_text(section.name(), &entry.key)
                    .map(|rule| rule.policy.is_applied(&value))
                    .unwrap_or(false);
                if redacted {
                    continue;
                }
                if let Some(stamp) = exam_date_stamp(&value) {
                    stamps.insert(stamp);
                }
            }
        }
        if stamps.is_empty() {
            return;
        }

        let alternatives: Vec<String> = stamps.iter().map(|s| regex::escape(s)).collect();
        let pattern = format!("\"[0-9.]*(?:{})[0-9.]*\"", alternatives.join("|"));
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("Exam date sweep disabled: {}", e);
                return;
            }
        };
        debug!("Sweeping {} exam date stamp(s)", stamps.len());

        for segment in container.segments() {
            let Some(protocol) = &segment.protocol else {
                continue;
            };
            for (entry_ref, section, entry) in protocol.entries() {
                if self.touched.contains(&(segment.index, entry_ref)) {
                    continue;
                }
                let raw = section.raw(entry);
                let mut hits = 0;
                for m in re.find_iter(raw) {
                    let masked: Vec<u8> = m
                        .as_bytes()
                        .iter()
                        .map(|&b| if b.is_ascii_alphanumeric() { b'x' } else { b })
                        .collect();
                    self.segments[segment.index].text.push(TextReplacement {
                        section: entry_ref.section,
                        span: entry.span.start + m.start()..entry.span.start + m.end(),
                        bytes: masked,
                    });
                    hits += 1;
                }
                if hits > 0 {
                    self.touched.insert((segment.index, entry_ref));
                    self.report.push(
                        segment.index,
                        entry_identifier(section, entry),
                        HeaderSource::Text,
                        EXAM_DATE_STAMP,
                        RedactionOutcome::Redacted,
                    );
                }
            }
        }
    }

    fn verify(&self, container: &Container) -> Result<()> {
        // A rule that rewrote something must not have skipped another copy
        let rewritten: HashSet<&str> = self
            .report
            .entries
            .iter()
            .filter(|e| e.outcome.is_rewrite())
            .map(|e| e.rule.as_str())
            .collect();
        if let Some(entry) = self.report.entries.iter().find(|e| {
            matches!(e.outcome, RedactionOutcome::Undecodable { .. }) && rewritten.contains(e.rule.as_str())
        }) {
            return Err(Error::partial_redaction(&entry.rule, &entry.field));
        }

        let mut redacted_text: HashMap<usize, ProtocolHeader> = HashMap::new();
        for segment in container.segments() {
            if let Some(protocol) = &segment.protocol {
                let reflow = protocol.apply(&self.segments[segment.index].text)?;
                redacted_text.insert(segment.index, reflow.header);
            }
        }

        // No rewritten occurrence may still hold its original value
        for rewrite in &self.rewrites {
            let leaked = match rewrite.location {
                Location::Structured { field } => {
                    let raw = container
                        .segments()
                        .get(rewrite.segment)
                        .and_then(|s| s.structured.fields().get(field))
                        .map(|f| f.raw.as_slice());
                    self.segments[rewrite.segment]
                        .structured
                        .iter()
                        .find(|r| r.field == field)
                        .map_or(true, |r| Some(r.bytes.as_slice()) == raw)
                }
                Location::Text(entry_ref) => redacted_text
                    .get(&rewrite.segment)
                    .and_then(|h| {
                        let section = h.sections().get(entry_ref.section)?;
                        section.value(section.entries().get(entry_ref.entry)?)
                    })
                    .map_or(true, |value| value == rewrite.original),
            };
            if leaked {
                return Err(Error::partial_redaction(&rewrite.rule, &rewrite.field));
            }
        }

        if self.config.leak_scan {
            self.leak_scan(container, &redacted_text)?;
        }
        Ok(())
    }

    /// Looks for originals of both-scope rules anywhere in the redacted headers
    fn leak_scan(
        &self,
        container: &Container,
        redacted_text: &HashMap<usize, ProtocolHeader>,
    ) -> Result<()> {
        let needles: Vec<(&Rewrite, Vec<u8>)> = self
            .rewrites
            .iter()
            .filter(|r| {
                self.rules.get(&r.rule).and_then(PiiRule::scope) == Some(RuleScope::Both)
                    && r.original.len() >= MIN_LEAK_LEN
            })
            .map(|r| (r, encode_latin1(&r.original)))
            .collect();
        if needles.is_empty() {
            return Ok(());
        }

        let mut haystacks: Vec<(usize, String, Vec<u8>)> = Vec::new();
        for segment in container.segments() {
            let replaced: HashMap<usize, &[u8]> = self.segments[segment.index]
                .structured
                .iter()
                .map(|r| (r.field, r.bytes.as_slice()))
                .collect();
            for (position, field) in segment.structured.fields().iter().enumerate() {
                if field.kind != FieldKind::Text {
                    continue;
                }
                let bytes = replaced.get(&position).copied().unwrap_or(field.raw.as_slice());
                haystacks.push((segment.index, field.identifier(), bytes.to_vec()));
            }
            if let Some(header) = redacted_text.get(&segment.index) {
                for section in header.sections() {
                    haystacks.push((segment.index, section.name().to_string(), section.text().to_vec()));
                }
            }
        }

        for (rewrite, needle) in &needles {
            if let Some((segment, location, _)) = haystacks
                .iter()
                .find(|(_, _, hay)| contains(hay, needle))
            {
                warn!(
                    "Value redacted by rule {} still present in segment {} ({})",
                    rewrite.rule, segment, location
                );
                return Err(Error::partial_redaction(&rewrite.rule, location.as_str()));
            }
        }
        Ok(())
    }
}

fn is_redacted(rule: &PiiRule, field: &HeaderField, value: &FieldValue, original: &str) -> bool {
    match value {
        FieldValue::Text(text) => text.is_empty() || rule.policy.is_applied(text),
        FieldValue::Unsigned(_) => rule.policy.is_applied(original),
        FieldValue::Bytes(bytes) => bytes.iter().all(|&b| b == 0) || field.width == 0,
    }
}

/// Numeric fields take the policy output as a decimal number, blank as zero
fn unsigned_output(rule: &PiiRule, identifier: &str, replacement: &str) -> Result<u64> {
    if replacement.is_empty() {
        return Ok(0);
    }
    replacement.parse().map_err(|_| {
        Error::invalid_rule(
            &rule.id,
            format!("output '{}' for numeric field {} is not an integer", replacement, identifier),
        )
    })
}

fn entry_identifier(section: &ProtocolSection, entry: &ProtocolEntry) -> String {
    if entry.is_opaque() {
        format!("{}@{}", section.name(), entry.span.start)
    } else {
        format!("{}/{}", section.name(), entry.key)
    }
}

/// Characters 2..8 of the eleventh component of a frame of reference UID
fn exam_date_stamp(frame_of_reference: &str) -> Option<String> {
    let component = frame_of_reference.split('.').nth(10)?;
    let stamp = component.get(2..8)?;
    let valid = stamp.bytes().all(|b| b.is_ascii_digit()) && stamp.bytes().any(|b| b != b'0');
    valid.then(|| stamp.to_string())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerReader;
    use crate::rules::{RedactionPolicy, RuleMatcher};
    use pretty_assertions::assert_eq;

    const FOR: &str = "1.3.12.2.1107.5.2.43.66035.1.20230117120305123.0.0.0";

    fn vb_file(buffers: &[(&str, String)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, text) in buffers {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&(text.len() as u32).to_le_bytes());
            body.extend_from_slice(text.as_bytes());
        }
        let header_len = 8 + body.len() + 32;
        let mut out = (header_len as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&(buffers.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out.resize(header_len, 0);
        out.extend_from_slice(b"DATA");
        out
    }

    fn dicom() -> String {
        format!(
            concat!(
                "<XProtocol>\n{{\n",
                "<ParamString.\"PatientName\">  {{ \"DOE^JANE\"  }}\n",
                "<ParamString.\"PatientID\">  {{ \"12345\"  }}\n",
                "<ParamString.\"FrameOfReference\">  {{ \"{}\"  }}\n",
                "<ParamString.\"SequenceDescription\">  {{ \"t1_mprage\"  }}\n",
                "}}\n"
            ),
            FOR
        )
    }

    fn plan(file: Vec<u8>) -> Result<RedactionPlan> {
        let container = ContainerReader::new().read(file)?;
        Redactor::new(RuleSet::builtin()).plan(&container)
    }

    #[test]
    fn test_plan_text_rules() {
        let plan = plan(vb_file(&[("Dicom", dicom())])).unwrap();
        let summary = plan.report.summary();
        assert_eq!(summary.redacted, 3);
        assert_eq!(summary.undecodable, 0);

        let rules: Vec<&str> = plan.report.entries.iter().map(|e| e.rule.as_str()).collect();
        assert_eq!(rules, vec!["patient_name", "patient_id", "frame_of_reference"]);
        assert_eq!(plan.segments[0].text.len(), 3);
        assert_eq!(plan.segments[0].text[0].bytes, b"ANON".to_vec());
        assert_eq!(plan.segments[0].text[1].bytes, b"00000".to_vec());
    }

    #[test]
    fn test_exam_date_sweep_masks_stamped_values() {
        let yaps = "sStudy.tTimeStamp = \"20230117.120305\"\nlSeq = 3\n".to_string();
        let plan = plan(vb_file(&[("Dicom", dicom()), ("MeasYaps", yaps)])).unwrap();

        let swept: Vec<&ReportEntry> = plan.report.for_rule(EXAM_DATE_STAMP).collect();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].field, "MeasYaps/sStudy.tTimeStamp");
        let replacement = plan.segments[0]
            .text
            .iter()
            .find(|r| r.section == 1)
            .unwrap();
        assert_eq!(replacement.bytes, b"\"xxxxxxxx.xxxxxx\"".to_vec());
    }

    #[test]
    fn test_exam_date_stamp() {
        assert_eq!(exam_date_stamp(FOR).as_deref(), Some("230117"));
        assert_eq!(exam_date_stamp("1.2.3"), None);
        assert_eq!(exam_date_stamp("0.0.00.0.0000.0.0.00.00000.0.00000000000000000.0.0.0"), None);
    }

    #[test]
    fn test_leak_in_opaque_line_is_partial_redaction() {
        let text = format!("{}junk line mentioning DOE^JANE\n", dicom());
        let err = plan(vb_file(&[("Dicom", text)])).unwrap_err();
        assert!(matches!(err, Error::PartialRedaction { ref rule, .. } if rule == "patient_name"));
    }

    #[test]
    fn test_text_only_rule_does_not_leak_scan() {
        // patient_id is text-only, so a stray copy is not a leak
        let text = format!("{}junk 12345\n", dicom());
        assert!(plan(vb_file(&[("Dicom", text)])).is_ok());
    }

    #[test]
    fn test_long_replacement_is_truncated() {
        let rules = RuleSet::new(
            "test",
            vec![PiiRule::new("name", RedactionPolicy::Placeholder("N".repeat(100)))
                .text(RuleMatcher::Key("PatientName".into()))],
        )
        .unwrap();
        let container = ContainerReader::new()
            .read(vb_file(&[("Dicom", dicom())]))
            .unwrap();
        let plan = Redactor::with_config(rules, RedactorConfig::new().max_value_len(16))
            .plan(&container)
            .unwrap();
        assert_eq!(plan.report.entries[0].outcome, RedactionOutcome::Truncated);
        assert_eq!(plan.segments[0].text[0].bytes.len(), 16);
    }

    #[test]
    fn test_truncated_replacement_is_stable() {
        use crate::container::ContainerWriter;

        let rules = RuleSet::new(
            "test",
            vec![PiiRule::new("name", RedactionPolicy::Placeholder("N".repeat(100)))
                .text(RuleMatcher::Key("PatientName".into()))],
        )
        .unwrap();
        let redactor = Redactor::with_config(rules, RedactorConfig::new().max_value_len(16));
        let container = ContainerReader::new()
            .read(vb_file(&[("Dicom", dicom())]))
            .unwrap();
        let first = redactor.plan(&container).unwrap();
        let output = ContainerWriter::new().write(&container, &first).unwrap();

        let again = ContainerReader::new().read(output.bytes).unwrap();
        let second = redactor.plan(&again).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.report.entries[0].rule, "name");
        assert_eq!(second.report.entries[0].outcome, RedactionOutcome::AlreadyRedacted);
    }

    #[test]
    fn test_multi_valued_entry_is_rewritten_per_token() {
        let text = "<XProtocol>\n{\n<ParamString.\"PatientName\">  { \"DOE\" \"JANE\"  }\n}\n";
        let container = ContainerReader::new()
            .read(vb_file(&[("Dicom", text.to_string())]))
            .unwrap();
        let plan = Redactor::new(RuleSet::builtin()).plan(&container).unwrap();

        let edits = &plan.segments[0].text;
        assert_eq!(edits.len(), 2);
        assert!(edits.iter().all(|e| e.bytes == b"ANON".to_vec()));
        assert_eq!(plan.report.summary().redacted, 1);

        let protocol = container.segments()[0].protocol.as_ref().unwrap();
        let reflow = protocol.apply(edits).unwrap();
        assert_eq!(reflow.header.find("PatientName").as_deref(), Some("ANON\" \"ANON"));
    }

    #[test]
    fn test_second_pass_changes_nothing() {
        use crate::container::ContainerWriter;

        let container = ContainerReader::new()
            .read(vb_file(&[("Dicom", dicom())]))
            .unwrap();
        let redactor = Redactor::new(RuleSet::builtin());
        let first = redactor.plan(&container).unwrap();
        let output = ContainerWriter::new().write(&container, &first).unwrap();

        let again = ContainerReader::new().read(output.bytes).unwrap();
        let second = redactor.plan(&again).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.report.summary().redacted, 0);
    }
}
