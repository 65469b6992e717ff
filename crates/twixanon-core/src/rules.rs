//! PII rule set.
//!
//! A rule names the identifying fields it covers in each header copy and the
//! policy used to replace their values. The same rule may target the raid
//! `PatientName` slot of the structured header and the `tPatientName`
//! parameter of the text header, which is how the redactor keeps both copies
//! consistent.
//!
//! Rule sets are plain data: [`RuleSet::builtin`] carries the known twix
//! identifiers, and [`RuleSet::from_json`] loads a site-specific list.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;

/// Version tag of the built-in rule list
pub const RULESET_VERSION: &str = "twix-pii/1";

/// Prefix of values produced by [`RedactionPolicy::Hash`]
pub const HASH_PREFIX: &str = "ANON-";

/// Hex digits kept from the hash
const HASH_LEN: usize = 12;

/// Which header copy a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderSource {
    /// Fixed-layout binary header
    Structured,
    /// Protocol text header
    Text,
}

/// Header copies a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Structured header only
    Structured,
    /// Text header only
    Text,
    /// Both copies
    Both,
}

/// How specific a matcher is; higher wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// Every valued entry of a section
    Section,
    /// Regex over the key
    Pattern,
    /// Exact key
    Key,
}

/// Selects the fields a rule applies to
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// Exact key (field name or parameter name)
    Key(String),
    /// Regular expression over the key
    Pattern(Regex),
    /// Every entry of a text section; never matches structured fields
    Section(String),
}

impl RuleMatcher {
    /// Compiles a pattern matcher
    pub fn pattern(rule: &str, pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(RuleMatcher::Pattern)
            .map_err(|e| Error::invalid_rule(rule, e.to_string()))
    }

    /// Returns true if the matcher selects `key` (in `section`, if any)
    pub fn matches(&self, key: &str, section: Option<&str>) -> bool {
        match self {
            RuleMatcher::Key(k) => k == key,
            RuleMatcher::Pattern(re) => re.is_match(key),
            RuleMatcher::Section(s) => section == Some(s.as_str()),
        }
    }

    /// Specificity used to break ties between rules
    pub fn specificity(&self) -> Specificity {
        match self {
            RuleMatcher::Key(_) => Specificity::Key,
            RuleMatcher::Pattern(_) => Specificity::Pattern,
            RuleMatcher::Section(_) => Specificity::Section,
        }
    }
}

/// Replacement policy for a matched value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RedactionPolicy {
    /// Empty value
    Blank,
    /// Fixed placeholder text
    Placeholder(String),
    /// `ANON-` followed by a truncated blake3 digest of the value
    Hash,
    /// Fixed default value
    Default(String),
    /// Every ASCII alphanumeric character replaced by the given character
    Mask(char),
}

impl RedactionPolicy {
    /// Produces the replacement for `original`
    pub fn apply(&self, original: &str) -> String {
        match self {
            RedactionPolicy::Blank => String::new(),
            RedactionPolicy::Placeholder(p) | RedactionPolicy::Default(p) => p.clone(),
            RedactionPolicy::Hash => {
                let hash = blake3::hash(original.as_bytes());
                format!("{}{}", HASH_PREFIX, &hash.to_hex()[..HASH_LEN])
            }
            RedactionPolicy::Mask(mask) => original
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { *mask } else { c })
                .collect(),
        }
    }

    /// Returns true if `value` already is an output of this policy
    pub fn is_applied(&self, value: &str) -> bool {
        match self {
            RedactionPolicy::Blank => value.is_empty(),
            RedactionPolicy::Placeholder(p) | RedactionPolicy::Default(p) => value == p,
            RedactionPolicy::Hash => value
                .strip_prefix(HASH_PREFIX)
                .map(|h| h.len() == HASH_LEN && h.bytes().all(|b| b.is_ascii_hexdigit()))
                .unwrap_or(false),
            RedactionPolicy::Mask(mask) => value
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .all(|c| c == *mask),
        }
    }
}

/// A single PII rule
#[derive(Debug, Clone)]
pub struct PiiRule {
    /// Stable identifier used in reports
    pub id: String,
    /// Matcher for structured header fields
    pub structured: Option<RuleMatcher>,
    /// Matcher for text header entries
    pub text: Option<RuleMatcher>,
    /// Replacement policy
    pub policy: RedactionPolicy,
}

impl PiiRule {
    /// Creates a rule without matchers
    pub fn new(id: impl Into<String>, policy: RedactionPolicy) -> Self {
        Self {
            id: id.into(),
            structured: None,
            text: None,
            policy,
        }
    }

    /// Sets the text header matcher
    pub fn text(mut self, matcher: RuleMatcher) -> Self {
        self.text = Some(matcher);
        self
    }

    /// Sets the structured header matcher
    pub fn structured(mut self, matcher: RuleMatcher) -> Self {
        self.structured = Some(matcher);
        self
    }

    /// Header copies covered by this rule
    pub fn scope(&self) -> Option<RuleScope> {
        match (&self.structured, &self.text) {
            (Some(_), Some(_)) => Some(RuleScope::Both),
            (Some(_), None) => Some(RuleScope::Structured),
            (None, Some(_)) => Some(RuleScope::Text),
            (None, None) => None,
        }
    }
}

/// Ordered, versioned list of PII rules
#[derive(Debug, Clone)]
pub struct RuleSet {
    version: String,
    rules: Vec<PiiRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleSet {
    /// Creates a rule set, validating ids and matchers
    pub fn new(version: impl Into<String>, rules: Vec<PiiRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.scope().is_none() {
                return Err(Error::invalid_rule(&rule.id, "rule has no matcher"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::invalid_rule(&rule.id, "duplicate rule id"));
            }
        }
        Ok(Self {
            version: version.into(),
            rules,
        })
    }

    /// Built-in rules for identifiers known to appear in twix headers
    pub fn builtin() -> Self {
        use RedactionPolicy::{Blank, Mask, Placeholder};

        let key = |k: &str| RuleMatcher::Key(k.to_string());
        let pattern = |p: &str| RuleMatcher::Pattern(Regex::new(p).expect("built-in pattern is valid"));
        let zero = Mask('0');
        let cross = Mask('x');

        let rules = vec![
            PiiRule::new("patient_name", Placeholder("ANON".into()))
                .structured(key(crate::container::layout::PATIENT_NAME))
                .text(pattern(r"^t?Patients?Name$")),
            PiiRule::new("patient_id", zero.clone()).text(key("PatientID")),
            PiiRule::new("patient_birth_date", zero.clone()).text(key("PatientBirthDay")),
            PiiRule::new("patient_sex", zero.clone()).text(pattern(r"^l?PatientSex$")),
            PiiRule::new("patient_age", zero.clone()).text(key("flPatientAge")),
            PiiRule::new("patient_weight", zero.clone()).text(key("flUsedPatientWeight")),
            PiiRule::new("patient_height", zero.clone()).text(key("flPatientHeight")),
            PiiRule::new("institution_name", cross.clone()).text(key("InstitutionName")),
            PiiRule::new("institution_address", cross.clone()).text(key("InstitutionAddress")),
            PiiRule::new("physician", cross.clone())
                .text(pattern(r"(?i)^t?(referring|performing)physicians?(name)?$")),
            PiiRule::new("operator", cross.clone()).text(pattern(r"(?i)^t?operators?s?name$")),
            PiiRule::new("device_serial", zero.clone()).text(key("DeviceSerialNumber")),
            PiiRule::new("exam_memory_uid", zero.clone()).text(key("ExamMemoryUID")),
            PiiRule::new("loid", zero.clone()).text(pattern(r"^(Patient|Study|Series)LOID$")),
            PiiRule::new("study_uid", zero.clone()).text(key("Study")),
            PiiRule::new("patient_uid", zero.clone()).text(key("Patient")),
            PiiRule::new("frame_of_reference", zero.clone()).text(key("FrameOfReference")),
            PiiRule::new("measurement_uid", zero.clone()).text(key("MeasUID")),
            PiiRule::new("exam_date", zero.clone())
                .text(pattern(r"^(Study|Series|Acquisition|Content|Exam)Date$")),
            PiiRule::new("comment", Blank).text(pattern(r"(?i)^t?(patient|study|series)?comments?$")),
            PiiRule::new("protocol_version", zero).text(key("ulVersion")),
        ];

        Self {
            version: RULESET_VERSION.to_string(),
            rules,
        }
    }

    /// Loads a rule set from its JSON description
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: RuleSetDoc = serde_json::from_str(json)?;
        let rules = doc
            .rules
            .into_iter()
            .map(RuleDoc::into_rule)
            .collect::<Result<Vec<_>>>()?;
        Self::new(doc.version, rules)
    }

    /// Version tag
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All rules in declaration order
    pub fn rules(&self) -> &[PiiRule] {
        &self.rules
    }

    /// Looks up a rule by id
    pub fn get(&self, id: &str) -> Option<&PiiRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Most specific rule for a text entry
    pub fn match_text(&self, section: &str, key: &str) -> Option<&PiiRule> {
        self.most_specific(|rule| rule.text.as_ref(), key, Some(section))
    }

    /// Most specific rule for a structured field
    pub fn match_structured(&self, name: &str) -> Option<&PiiRule> {
        self.most_specific(|rule| rule.structured.as_ref(), name, None)
    }

    fn most_specific<'a>(
        &'a self,
        matcher: impl Fn(&'a PiiRule) -> Option<&'a RuleMatcher>,
        key: &str,
        section: Option<&str>,
    ) -> Option<&'a PiiRule> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(i, rule)| {
                matcher(rule)
                    .filter(|m| m.matches(key, section))
                    .map(|m| (m.specificity(), Reverse(i), rule))
            })
            .max_by_key(|(specificity, order, _)| (*specificity, *order))
            .map(|(_, _, rule)| rule)
    }
}

#[derive(Debug, Deserialize)]
struct RuleSetDoc {
    version: String,
    rules: Vec<RuleDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDoc {
    id: String,
    #[serde(default)]
    structured_key: Option<String>,
    #[serde(default)]
    structured_pattern: Option<String>,
    #[serde(default)]
    text_key: Option<String>,
    #[serde(default)]
    text_pattern: Option<String>,
    #[serde(default)]
    text_section: Option<String>,
    policy: RedactionPolicy,
}

impl RuleDoc {
    fn into_rule(self) -> Result<PiiRule> {
        let id = self.id;
        let structured = match (self.structured_key, self.structured_pattern) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_rule(&id, "more than one structured matcher"));
            }
            (Some(k), None) => Some(RuleMatcher::Key(k)),
            (None, Some(p)) => Some(RuleMatcher::pattern(&id, &p)?),
            (None, None) => None,
        };
        let text = match (self.text_key, self.text_pattern, self.text_section) {
            (Some(k), None, None) => Some(RuleMatcher::Key(k)),
            (None, Some(p), None) => Some(RuleMatcher::pattern(&id, &p)?),
            (None, None, Some(s)) => Some(RuleMatcher::Section(s)),
            (None, None, None) => None,
            _ => return Err(Error::invalid_rule(&id, "more than one text matcher")),
        };
        Ok(PiiRule {
            id,
            structured,
            text,
            policy: self.policy,
        })
    }
}
