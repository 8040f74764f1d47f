use crate::qname::QName;
use crate::taxonomy::ConceptId;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

static TYPED_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r">(.*?)</").expect("valid regex"));

/// Text between the tags of a wrapped typed dimension value.
pub fn unwrap_typed_value(wrapped: &str) -> &str {
    TYPED_VALUE_RE
        .captures(wrapped)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(wrapped)
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Integer(i64),
    Decimal(f64),
    Text(String),
    Date(NaiveDate),
}

impl FactValue {
    fn rank(&self) -> u8 {
        match self {
            FactValue::Bool(_) => 0,
            FactValue::Integer(_) => 1,
            FactValue::Decimal(_) => 2,
            FactValue::Text(_) => 3,
            FactValue::Date(_) => 4,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, FactValue::Integer(_) | FactValue::Decimal(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FactValue::Integer(i) => Some(*i as f64),
            FactValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FactValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, FactValue::Text(s) if s.is_empty())
    }
}

impl PartialEq for FactValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FactValue {}

impl Ord for FactValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FactValue::Bool(a), FactValue::Bool(b)) => a.cmp(b),
            (FactValue::Integer(a), FactValue::Integer(b)) => a.cmp(b),
            (FactValue::Decimal(a), FactValue::Decimal(b)) => a.total_cmp(b),
            (FactValue::Text(a), FactValue::Text(b)) => a.cmp(b),
            (FactValue::Date(a), FactValue::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for FactValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for FactValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            FactValue::Bool(b) => b.hash(state),
            FactValue::Integer(i) => i.hash(state),
            FactValue::Decimal(d) => d.to_bits().hash(state),
            FactValue::Text(s) => s.hash(state),
            FactValue::Date(d) => d.hash(state),
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Bool(b) => write!(f, "{b}"),
            FactValue::Integer(i) => write!(f, "{i}"),
            FactValue::Decimal(d) => write!(f, "{d}"),
            FactValue::Text(s) => f.write_str(s),
            FactValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        FactValue::Integer(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        FactValue::Decimal(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Text(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Text(value)
    }
}

impl From<NaiveDate> for FactValue {
    fn from(value: NaiveDate) -> Self {
        FactValue::Date(value)
    }
}

// ============================================================================
// Aspects
// ============================================================================

/// Everything about a fact beyond its concept and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AspectKey {
    ExplicitDimension(QName),
    TypedDimension(QName),
    Unit,
    MonetaryUnit,
    ComplexUnit,
    Decimals,
    NumericScale,
    Period,
    PeriodType,
    HiddenValue,
    Transform,
}

impl AspectKey {
    pub fn is_dimension(&self) -> bool {
        matches!(
            self,
            AspectKey::ExplicitDimension(_) | AspectKey::TypedDimension(_)
        )
    }
}

impl fmt::Display for AspectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectKey::ExplicitDimension(dim) => write!(f, "{dim}"),
            AspectKey::TypedDimension(dim) => write!(f, "typed {dim}"),
            AspectKey::Unit => f.write_str("units"),
            AspectKey::MonetaryUnit => f.write_str("monetary-units"),
            AspectKey::ComplexUnit => f.write_str("complex-units"),
            AspectKey::Decimals => f.write_str("decimals"),
            AspectKey::NumericScale => f.write_str("numeric-scale"),
            AspectKey::Period => f.write_str("period"),
            AspectKey::PeriodType => f.write_str("period-type"),
            AspectKey::HiddenValue => f.write_str("hidden-value"),
            AspectKey::Transform => f.write_str("transform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AspectValue {
    QName(QName),
    Integer(i32),
    Text(String),
}

impl AspectValue {
    pub fn as_qname(&self) -> Option<&QName> {
        match self {
            AspectValue::QName(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AspectValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            AspectValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for AspectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectValue::QName(q) => write!(f, "{q}"),
            AspectValue::Integer(i) => write!(f, "{i}"),
            AspectValue::Text(s) => f.write_str(s),
        }
    }
}

pub type Aspects = BTreeMap<AspectKey, AspectValue>;

// ============================================================================
// Fact
// ============================================================================

/// One reported data point. Identity is (concept, value, aspects).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fact {
    qname: QName,
    value: FactValue,
    #[serde(serialize_with = "serialize_aspects")]
    aspects: Aspects,
    #[serde(skip)]
    concept: ConceptId,
}

impl Fact {
    pub(crate) fn new(concept: ConceptId, qname: QName, value: FactValue, aspects: Aspects) -> Self {
        Self {
            qname,
            value,
            aspects,
            concept,
        }
    }

    pub fn concept(&self) -> ConceptId {
        self.concept
    }

    pub fn qname(&self) -> &QName {
        &self.qname
    }

    pub fn value(&self) -> &FactValue {
        &self.value
    }

    pub fn aspects(&self) -> &Aspects {
        &self.aspects
    }

    pub fn aspect(&self, key: &AspectKey) -> Option<&AspectValue> {
        self.aspects.get(key)
    }

    pub fn has_taxonomy_dimensions(&self) -> bool {
        self.aspects.keys().any(AspectKey::is_dimension)
    }

    /// Explicit dimension to member pairs.
    pub fn explicit_dimensions(&self) -> impl Iterator<Item = (&QName, &QName)> {
        self.aspects.iter().filter_map(|(key, value)| match (key, value) {
            (AspectKey::ExplicitDimension(dim), AspectValue::QName(member)) => Some((dim, member)),
            _ => None,
        })
    }

    pub fn explicit_member(&self, dimension: &QName) -> Option<&QName> {
        self.aspects
            .get(&AspectKey::ExplicitDimension(dimension.clone()))
            .and_then(AspectValue::as_qname)
    }

    /// Wrapped, escaped value of a typed dimension.
    pub fn typed_member(&self, dimension: &QName) -> Option<&str> {
        self.aspects
            .get(&AspectKey::TypedDimension(dimension.clone()))
            .and_then(AspectValue::as_text)
    }

    pub fn period_name(&self) -> Option<&str> {
        self.aspects.get(&AspectKey::Period).and_then(AspectValue::as_text)
    }

    pub fn decimals(&self) -> Option<i32> {
        self.aspects.get(&AspectKey::Decimals).and_then(AspectValue::as_integer)
    }

    /// Value as a reader would see it: numbers rounded to their decimals
    /// with thousands separators.
    pub fn display_value(&self) -> String {
        match &self.value {
            FactValue::Integer(i) => group_thousands(&i.to_string()),
            FactValue::Decimal(d) => {
                let places = self.decimals().unwrap_or(0).max(0) as usize;
                group_thousands(&format!("{d:.places$}"))
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let aspects: Vec<String> = self.aspects.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}[{}] = {}", self.qname, aspects.join(", "), self.value)
    }
}

fn serialize_aspects<S: Serializer>(aspects: &Aspects, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(aspects.iter().map(|(k, v)| (k.to_string(), v.to_string())))
}

fn group_thousands(number: &str) -> String {
    let (sign, rest) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}
