//! End-to-end tests of the anonymization pipeline on synthetic twix files.

mod common;

use common::{contains, vb_file, vd_file, vd_file_with, DATA, PADDING};
use pretty_assertions::assert_eq;
use twixanon_core::container::layout::{MEAS_ID, MEAS_OFFSET, PATIENT_NAME, PROTOCOL_NAME};
use twixanon_core::structured::FieldValue;
use twixanon_core::{
    Anonymizer, AnonymizerConfig, ContainerKind, ContainerReader, Error, MetadataRecord, Mode,
    PiiRule, RedactionOutcome, RedactionPolicy, Redactor, ResizePolicy, RuleMatcher, RuleSet,
    WriterConfig,
};

fn anonymize(data: Vec<u8>) -> twixanon_core::FileOutcome {
    Anonymizer::new(RuleSet::builtin())
        .process(data, Mode::Full)
        .unwrap()
}

fn hashing_rules() -> RuleSet {
    RuleSet::new(
        "hash",
        vec![PiiRule::new("patient_name", RedactionPolicy::Hash)
            .structured(RuleMatcher::Key(PATIENT_NAME.into()))
            .text(RuleMatcher::pattern("patient_name", "^t?PatientName$").unwrap())],
    )
    .unwrap()
}

/// Every policy kind on both header kinds, with `name` for the patient name
fn policy_rules(name: RedactionPolicy) -> RuleSet {
    let key = |k: &str| RuleMatcher::Key(k.to_string());
    RuleSet::new(
        "policies",
        vec![
            PiiRule::new("patient_name", name)
                .structured(key(PATIENT_NAME))
                .text(RuleMatcher::pattern("patient_name", "^t?PatientName$").unwrap()),
            PiiRule::new("patient_id", RedactionPolicy::Hash).text(key("PatientID")),
            PiiRule::new("institution", RedactionPolicy::Mask('x')).text(key("InstitutionName")),
            PiiRule::new("protocol_name", RedactionPolicy::Mask('x')).structured(key(PROTOCOL_NAME)),
            PiiRule::new("meas_id", RedactionPolicy::Blank).structured(key(MEAS_ID)),
        ],
    )
    .unwrap()
}

fn reflow_config() -> AnonymizerConfig {
    AnonymizerConfig {
        writer: WriterConfig::new().resize(ResizePolicy::Reflow),
        ..Default::default()
    }
}

#[test]
fn test_text_round_trip_is_byte_exact() {
    let file = vd_file("DOE^JANE", 2);
    let container = ContainerReader::new().read(file).unwrap();

    for segment in container.measurements() {
        let layout = segment.measurement().unwrap();
        let protocol = segment.protocol.as_ref().unwrap();
        for (buffer, section) in layout.buffers.iter().zip(protocol.sections()) {
            assert_eq!(section.to_bytes(), segment.bytes[buffer.text.clone()].to_vec());
        }
    }
}

#[test]
fn test_structured_replacements_keep_field_width() {
    let container = ContainerReader::new().read(vd_file("DOE^JANE", 3)).unwrap();
    let plan = Redactor::new(RuleSet::builtin()).plan(&container).unwrap();

    let mut checked = 0;
    for (segment, segment_plan) in container.segments().iter().zip(&plan.segments) {
        for replacement in &segment_plan.structured {
            let field = &segment.structured.fields()[replacement.field];
            assert_eq!(replacement.bytes.len(), field.width, "{}", field.identifier());
            checked += 1;
        }
    }
    assert_eq!(checked, 3);
}

#[test]
fn test_vd_patient_name_removed_from_both_headers() {
    let file = vd_file("DOE^JANE", 2);
    let outcome = anonymize(file.clone());
    let output = outcome.output.unwrap();

    assert_eq!(outcome.kind, ContainerKind::Vd);
    assert!(contains(&file, b"DOE^JANE"));
    assert!(!contains(&output, b"DOE^JANE"));
    assert!(!contains(&output, b"General Hospital"));
    assert!(!contains(&output, b"19800101"));

    let container = ContainerReader::new().read(output).unwrap();
    let preamble = &container.segments()[0];
    for i in 0..2 {
        assert_eq!(
            preamble.structured.get(PATIENT_NAME, Some(i)).unwrap().value,
            Ok(FieldValue::Text("ANON".into()))
        );
    }
    for segment in container.measurements() {
        let protocol = segment.protocol.as_ref().unwrap();
        assert_eq!(protocol.find("PatientName").as_deref(), Some("ANON"));
        assert_eq!(protocol.find("tPatientName").as_deref(), Some("ANON"));
        assert_eq!(protocol.find("PatientID").as_deref(), Some("00000"));
        assert_eq!(protocol.find("PatientSex").as_deref(), Some("0"));
    }
}

#[test]
fn test_raid_patient_name_fills_width_with_filler() {
    let output = anonymize(vd_file("DOE^JANE", 1)).output.unwrap();

    // PatientName of raid entry 0 sits at 8 + 24 and is 64 bytes wide
    let mut expected = b"ANON".to_vec();
    expected.resize(64, b' ');
    assert_eq!(output[32..96].to_vec(), expected);
}

#[test]
fn test_matching_copies_agree_after_redaction() {
    let output = anonymize(vd_file("Jane Doe", 1)).output.unwrap();
    assert!(!contains(&output, b"Jane Doe"));

    let container = ContainerReader::new().read(output).unwrap();
    let structured = container.segments()[0]
        .structured
        .get(PATIENT_NAME, Some(0))
        .unwrap()
        .value
        .clone()
        .unwrap();
    let protocol = container.segments()[1].protocol.as_ref().unwrap();
    assert_eq!(structured.as_text(), protocol.find("tPatientName").as_deref());
    assert_eq!(structured.as_text(), protocol.find("PatientName").as_deref());
}

#[test]
fn test_second_run_is_identity() {
    for file in [vb_file("DOE^JANE"), vd_file("DOE^JANE", 2)] {
        let first = anonymize(file).output.unwrap();
        let second = anonymize(first.to_vec());

        assert_eq!(second.output.unwrap(), first);
        let summary = second.report.unwrap().summary();
        assert_eq!(summary.redacted, 0);
        assert_eq!(summary.truncated, 0);
        assert!(summary.already_redacted > 0);
    }
}

#[test]
fn test_second_run_is_identity_for_every_policy() {
    // The placeholder is longer than both the raid field and the text limit
    let policies = [
        RedactionPolicy::Placeholder("REDACTED-".repeat(10)),
        RedactionPolicy::Hash,
        RedactionPolicy::Mask('x'),
    ];
    for policy in policies {
        let anonymizer = Anonymizer::new(policy_rules(policy.clone()));
        for file in [vb_file("DOE^JANE"), vd_file("DOE^JANE", 2)] {
            let first = anonymizer.process(file, Mode::Full).unwrap();
            assert!(first.report.unwrap().summary().redacted > 0);
            let first = first.output.unwrap();
            assert!(!contains(&first, b"DOE^JANE"));

            let second = anonymizer
                .process(first.to_vec(), Mode::Full)
                .unwrap_or_else(|e| panic!("{:?}: {}", policy, e));
            assert_eq!(second.output.unwrap(), first, "{:?}", policy);
            let summary = second.report.unwrap().summary();
            assert_eq!(summary.redacted, 0, "{:?}", policy);
            assert_eq!(summary.truncated, 0, "{:?}", policy);
        }
    }
}

#[test]
fn test_truncated_placeholder_fills_raid_field() {
    let rules = policy_rules(RedactionPolicy::Placeholder("REDACTED-".repeat(10)));
    let output = Anonymizer::new(rules)
        .process(vd_file("DOE^JANE", 1), Mode::Full)
        .unwrap()
        .output
        .unwrap();

    let long = "REDACTED-".repeat(10);
    let container = ContainerReader::new().read(output).unwrap();
    assert_eq!(
        container.segments()[0].structured.get(PATIENT_NAME, Some(0)).unwrap().value,
        Ok(FieldValue::Text(long[..64].to_string()))
    );
    let protocol = container.segments()[1].protocol.as_ref().unwrap();
    assert_eq!(protocol.find("PatientName").as_deref(), Some(&long[..64]));
}

#[test]
fn test_blank_numeric_field_is_zero() {
    let anonymizer = Anonymizer::new(policy_rules(RedactionPolicy::Blank));
    let output = anonymizer
        .process(vd_file("DOE^JANE", 2), Mode::Full)
        .unwrap()
        .output
        .unwrap();

    let container = ContainerReader::new().read(output.to_vec()).unwrap();
    for i in 0..2 {
        assert_eq!(
            container.segments()[0].structured.get(MEAS_ID, Some(i)).unwrap().value,
            Ok(FieldValue::Unsigned(0))
        );
    }

    let again = anonymizer.process(output.to_vec(), Mode::Full).unwrap();
    assert_eq!(again.output.unwrap(), output);
}

#[test]
fn test_non_numeric_output_for_numeric_field_is_invalid_rule() {
    let rules = RuleSet::new(
        "hash_ids",
        vec![PiiRule::new("meas_id", RedactionPolicy::Hash)
            .structured(RuleMatcher::Key(MEAS_ID.into()))],
    )
    .unwrap();
    let err = Anonymizer::new(rules)
        .process(vd_file("DOE^JANE", 1), Mode::Full)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRule { ref rule, .. } if rule == "meas_id"));
}

#[test]
fn test_rule_on_layout_field_is_invalid_rule() {
    let rules = RuleSet::new(
        "offsets",
        vec![PiiRule::new("offset", RedactionPolicy::Blank)
            .structured(RuleMatcher::Key(MEAS_OFFSET.into()))],
    )
    .unwrap();
    let err = Anonymizer::new(rules)
        .process(vd_file("DOE^JANE", 1), Mode::Full)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRule { ref rule, .. } if rule == "offset"));
}

#[test]
fn test_fixed_policy_keeps_file_length() {
    for file in [vb_file("DOE^JANE"), vd_file("DOE^JANE", 2)] {
        let outcome = anonymize(file.clone());
        let output = outcome.output.unwrap();
        assert_eq!(outcome.delta, 0);
        assert_eq!(output.len(), file.len());
        assert!(output.ends_with(DATA));
    }
}

#[test]
fn test_fixed_policy_growth_uses_padding() {
    let file = vd_file("DOE^JANE", 2);
    let anonymizer = Anonymizer::new(hashing_rules());
    let outcome = anonymizer.process(file.clone(), Mode::Full).unwrap();
    assert_eq!(outcome.output.unwrap().len(), file.len());
}

#[test]
fn test_fixed_policy_without_padding_fails() {
    let meas = common::measurement(&common::buffers("DOE^JANE"), 0, DATA);
    let file = vd_file_with(b"DOE^JANE", &[meas]);
    let err = Anonymizer::new(hashing_rules())
        .process(file, Mode::Full)
        .unwrap_err();
    assert!(matches!(err, Error::Serialization { .. }));
    assert!(!err.is_skippable());
}

#[test]
fn test_reflow_policy_adds_exact_delta() {
    let file = vd_file("DOE^JANE", 3);
    let anonymizer = Anonymizer::with_config(hashing_rules(), reflow_config());
    let outcome = anonymizer.process(file.clone(), Mode::Full).unwrap();
    let output = outcome.output.unwrap();

    // Two text copies per measurement grow from 8 to 17 bytes
    assert_eq!(outcome.delta, 3 * 2 * 9);
    assert_eq!(output.len() as i64, file.len() as i64 + outcome.delta);

    let container = ContainerReader::new().read(output).unwrap();
    assert_eq!(container.measurements().count(), 3);
    for segment in container.measurements() {
        let layout = segment.measurement().unwrap();
        assert_eq!(layout.padding.len(), PADDING);
        assert_eq!(&segment.bytes[layout.header_len..], DATA);
        let name = segment.protocol.as_ref().unwrap().find("PatientName").unwrap();
        assert!(name.starts_with("ANON-"));
    }
}

#[test]
fn test_reflow_policy_shrink_on_vb() {
    let file = vb_file("DOE^JANE");
    let outcome = Anonymizer::with_config(RuleSet::builtin(), reflow_config())
        .process(file.clone(), Mode::Full)
        .unwrap();
    let output = outcome.output.unwrap();
    assert!(outcome.delta < 0);
    assert_eq!(output.len() as i64, file.len() as i64 + outcome.delta);
    assert!(output.ends_with(DATA));
}

#[test]
fn test_metadata_is_identical_before_and_after_redaction() {
    let file = vd_file("DOE^JANE", 2);
    let anonymizer = Anonymizer::new(RuleSet::builtin());
    let full = anonymizer.process(file.clone(), Mode::Full).unwrap();
    let meta = anonymizer.process(file, Mode::MetaOnly).unwrap();
    let again = anonymizer
        .process(full.output.clone().unwrap(), Mode::MetaOnly)
        .unwrap();

    assert_eq!(full.metadata, meta.metadata);
    assert_eq!(meta.metadata, again.metadata);
    assert_eq!(meta.metadata.sequence_name.as_deref(), Some("t1_mprage_sag"));
    assert_eq!(meta.metadata.tr.as_deref(), Some("2300.000000"));
    assert_eq!(meta.metadata.ti.as_deref(), Some("900"));
    assert_eq!(meta.metadata.acceleration_factor.as_deref(), Some("2"));
    assert_eq!(meta.metadata.slices.as_deref(), Some("176"));
}

#[test]
fn test_missing_acceleration_factor_is_empty_cell() {
    let meas = common::measurement(&[("Meas", common::meas_text("DOE^JANE").into_bytes())], 16, DATA);
    let outcome = Anonymizer::new(RuleSet::builtin())
        .process(meas, Mode::MetaOnly)
        .unwrap();

    assert_eq!(outcome.metadata.acceleration_factor, None);
    let row = outcome.metadata.to_row();
    assert_eq!(row.len(), MetadataRecord::COLUMNS.len());
    let column = MetadataRecord::COLUMNS
        .iter()
        .position(|c| *c == "acceleration_factor")
        .unwrap();
    assert_eq!(row[column], "");
}

#[test]
fn test_meta_only_tolerates_garbage_text() {
    let mut text = common::meas_text("DOE^JANE").into_bytes();
    text.extend_from_slice(b"<ParamString.\"Broken\">  { \"unterminated\n\x01\x02\xff\xfe");
    let file = common::measurement(&[("Meas", text)], 0, DATA);

    let outcome = Anonymizer::new(RuleSet::builtin())
        .process(file, Mode::MetaOnly)
        .unwrap();
    assert!(outcome.output.is_none());
    assert!(outcome.report.is_none());
    assert_eq!(outcome.metadata.sequence_name.as_deref(), Some("t1_mprage_sag"));
    assert_eq!(outcome.metadata.patient_position.as_deref(), Some("HFS"));
}

#[test]
fn test_undecodable_copy_is_partial_redaction() {
    let measurements = vec![
        common::measurement(&common::buffers("DOE^JANE"), PADDING, DATA),
        common::measurement(&common::buffers("DOE^JANE"), PADDING, DATA),
    ];
    let mut file = vd_file_with(b"DOE^JANE", &measurements);
    // Control byte in the raid PatientName of entry 1
    file[8 + 152 + 24 + 2] = 0x01;

    let anonymizer = Anonymizer::new(RuleSet::builtin());
    let err = anonymizer.process(file.clone(), Mode::Full).unwrap_err();
    assert!(matches!(err, Error::PartialRedaction { ref rule, .. } if rule == "patient_name"));

    // Metadata-only runs never redact, so they cannot fail this way
    assert!(anonymizer.process(file, Mode::MetaOnly).is_ok());
}

#[test]
fn test_report_lists_every_copy() {
    let report = anonymize(vd_file("DOE^JANE", 2)).report.unwrap();
    let names: Vec<_> = report.for_rule("patient_name").collect();

    // Two raid slots plus two text copies in each measurement
    assert_eq!(names.len(), 6);
    assert!(names.iter().all(|e| e.outcome == RedactionOutcome::Redacted));
    assert_eq!(report.for_rule("exam_date_stamp").count(), 2);
}

#[test]
fn test_truncated_vd_file_is_malformed() {
    let mut file = vd_file("DOE^JANE", 2);
    file.truncate(file.len() - 10);
    let err = ContainerReader::new().read(file).unwrap_err();
    assert!(matches!(err, Error::MalformedContainer { .. }));
    assert!(err.is_skippable());
}

#[test]
fn test_gap_between_segments_is_malformed() {
    let mut file = vd_file("DOE^JANE", 2);
    // Shift MeasOffset of entry 1 by one byte
    let at = 8 + 152 + 8;
    let offset = u64::from_le_bytes(file[at..at + 8].try_into().unwrap());
    file[at..at + 8].copy_from_slice(&(offset + 1).to_le_bytes());
    assert!(matches!(
        ContainerReader::new().read(file),
        Err(Error::MalformedContainer { .. })
    ));
}

#[test]
fn test_trailing_bytes_are_malformed() {
    let mut file = vd_file("DOE^JANE", 1);
    file.extend_from_slice(b"extra");
    assert!(ContainerReader::new().read(file).is_err());
}

#[test]
fn test_tiny_file_is_malformed() {
    let err = Anonymizer::new(RuleSet::builtin())
        .process(vec![0u8; 5], Mode::MetaOnly)
        .unwrap_err();
    assert!(err.is_skippable());
}

#[test]
fn test_process_file_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &vb_file("DOE^JANE")).unwrap();

    let outcome = Anonymizer::new(RuleSet::builtin())
        .process_file(file.path(), Mode::Full)
        .unwrap();
    assert_eq!(outcome.kind, ContainerKind::Vb);
    assert!(!contains(&outcome.output.unwrap(), b"DOE^JANE"));
}

#[test]
fn test_missing_file_is_read_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = Anonymizer::new(RuleSet::builtin())
        .process_file(dir.path().join("missing.dat"), Mode::MetaOnly)
        .unwrap_err();
    assert!(matches!(err, Error::FileRead { .. }));
    assert!(!err.is_skippable());
}
