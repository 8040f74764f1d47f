use crate::qname::{QName, ENUM2_NS, XBRLI_NS};
use ahash::AHashMap;
use bitflags::bitflags;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

pub const STANDARD_LABEL_ROLE: &str = "http://www.xbrl.org/2003/role/label";
pub const DOCUMENTATION_LABEL_ROLE: &str = "http://www.xbrl.org/2003/role/documentation";
pub const MEASUREMENT_GUIDANCE_LABEL_ROLE: &str =
    "http://www.xbrl.org/2003/role/measurementGuidance";

pub const DEFAULT_LANGUAGE: &str = "en";

static LABEL_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[[a-z ]+\]\s*$").expect("valid regex"));

/// Unifies em and en dashes to a hyphen and trims.
pub fn clean_label(label: &str) -> String {
    label.replace(&['\u{2014}', '\u{2013}'][..], "-").trim().to_string()
}

/// Drops a trailing `[member]`/`[abstract]` style suffix.
pub fn strip_label_suffix(label: &str) -> Cow<'_, str> {
    LABEL_SUFFIX_RE.replace(label, "")
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConceptFlags: u8 {
        const ABSTRACT = 1 << 0;
        const DIMENSION = 1 << 1;
        const HYPERCUBE = 1 << 2;
        const NILLABLE = 1 << 3;
        const NUMERIC = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Duration,
    Instant,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Duration => "duration",
            PeriodType::Instant => "instant",
        }
    }
}

/// Index of a concept inside its taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConceptId(pub(crate) u32);

impl ConceptId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Concept {
    pub(crate) id: ConceptId,
    pub(crate) qname: QName,
    pub(crate) data_type: QName,
    pub(crate) base_data_type: QName,
    pub(crate) period_type: PeriodType,
    pub(crate) flags: ConceptFlags,
    pub(crate) typed_element: Option<QName>,
    pub(crate) domain: Vec<ConceptId>,
    pub(crate) labels: AHashMap<String, AHashMap<String, String>>,
    pub(crate) required_units: Vec<QName>,
}

impl Concept {
    pub fn id(&self) -> ConceptId {
        self.id
    }

    pub fn qname(&self) -> &QName {
        &self.qname
    }

    pub fn data_type(&self) -> &QName {
        &self.data_type
    }

    pub fn base_data_type(&self) -> &QName {
        &self.base_data_type
    }

    pub fn period_type(&self) -> PeriodType {
        self.period_type
    }

    pub fn flags(&self) -> ConceptFlags {
        self.flags
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ConceptFlags::ABSTRACT)
    }

    pub fn is_dimension(&self) -> bool {
        self.flags.contains(ConceptFlags::DIMENSION)
    }

    pub fn is_hypercube(&self) -> bool {
        self.flags.contains(ConceptFlags::HYPERCUBE)
    }

    pub fn is_nillable(&self) -> bool {
        self.flags.contains(ConceptFlags::NILLABLE)
    }

    pub fn is_numeric(&self) -> bool {
        self.flags.contains(ConceptFlags::NUMERIC)
    }

    pub fn is_typed_dimension(&self) -> bool {
        self.is_dimension() && self.typed_element.is_some()
    }

    pub fn is_explicit_dimension(&self) -> bool {
        self.is_dimension() && self.typed_element.is_none()
    }

    pub fn is_reportable(&self) -> bool {
        !self.is_abstract()
    }

    pub fn is_monetary(&self) -> bool {
        self.base_data_type.is(XBRLI_NS, "monetaryItemType")
    }

    pub fn is_boolean(&self) -> bool {
        self.base_data_type.is(XBRLI_NS, "booleanItemType")
    }

    pub fn is_date(&self) -> bool {
        self.base_data_type.is(XBRLI_NS, "dateItemType")
    }

    pub fn is_percent(&self) -> bool {
        self.data_type.local_name() == "percentItemType"
    }

    pub fn is_text_block(&self) -> bool {
        self.data_type.local_name() == "textBlockItemType"
    }

    pub fn is_enumeration_single(&self) -> bool {
        self.data_type.is(ENUM2_NS, "enumerationItemType")
    }

    pub fn is_enumeration_set(&self) -> bool {
        self.data_type.is(ENUM2_NS, "enumerationSetItemType")
    }

    pub fn expanded_name(&self) -> String {
        self.qname.expanded_name()
    }

    pub fn typed_element(&self) -> Option<&QName> {
        self.typed_element.as_ref()
    }

    /// Enumeration domain members in declaration order.
    pub fn domain(&self) -> &[ConceptId] {
        &self.domain
    }

    pub fn label(&self, lang: &str, role: &str) -> Option<&str> {
        self.labels.get(lang)?.get(role).map(String::as_str)
    }

    pub fn standard_label(&self) -> Option<&str> {
        self.label(DEFAULT_LANGUAGE, STANDARD_LABEL_ROLE)
    }

    /// Standard label without a trailing `[...]` suffix, falling back to the QName.
    pub fn display_label(&self) -> String {
        match self.standard_label() {
            Some(label) => strip_label_suffix(label).into_owned(),
            None => self.qname.to_string(),
        }
    }

    pub fn documentation_label(&self) -> Option<&str> {
        self.label(DEFAULT_LANGUAGE, DOCUMENTATION_LABEL_ROLE)
    }

    pub fn measurement_guidance_label(&self) -> Option<&str> {
        self.label(DEFAULT_LANGUAGE, MEASUREMENT_GUIDANCE_LABEL_ROLE)
    }

    /// Units demanded by the measurement guidance label, resolved at load.
    pub fn required_units(&self) -> &[QName] {
        &self.required_units
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("  Scope 1 \u{2014} gross "), "Scope 1 - gross");
        assert_eq!(clean_label("a\u{2013}b"), "a-b");
    }

    #[test]
    fn test_strip_label_suffix() {
        assert_eq!(strip_label_suffix("Retail [member]"), "Retail");
        assert_eq!(strip_label_suffix("Segments [axis] "), "Segments");
        assert_eq!(strip_label_suffix("Plain label"), "Plain label");
        // Only lowercase words are suffixes
        assert_eq!(strip_label_suffix("Unit [EUR]"), "Unit [EUR]");
    }

    #[test]
    fn test_flags() {
        let flags = ConceptFlags::ABSTRACT | ConceptFlags::HYPERCUBE;
        assert!(flags.contains(ConceptFlags::HYPERCUBE));
        assert!(!flags.contains(ConceptFlags::NUMERIC));
    }
}
