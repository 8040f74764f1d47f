//! The in-memory report a conversion fills: facts, named periods and the
//! aspects every fact shares unless it says otherwise.

pub mod builder;
pub mod fact;
pub mod layout;

pub use builder::FactBuilder;
pub use fact::{AspectKey, AspectValue, Aspects, Fact, FactValue};

use crate::qname::ISO4217_NS;
use crate::taxonomy::{PeriodType, Taxonomy};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub const ENTITY_IDENTIFIER: &str = "entity-identifier";
pub const ENTITY_SCHEME: &str = "entity-scheme";
pub const MONETARY_UNITS: &str = "monetary-units";
pub const UNITS: &str = "units";
pub const COMPLEX_UNITS: &str = "complex-units";
pub const NUMERIC_TRANSFORM: &str = "numeric-transform";
pub const DECIMALS: &str = "decimals";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Period {
    Instant { date: NaiveDate },
    Duration { start: NaiveDate, end: NaiveDate },
}

impl Period {
    pub fn instant(date: NaiveDate) -> Self {
        Period::Instant { date }
    }

    pub fn duration(start: NaiveDate, end: NaiveDate) -> Self {
        Period::Duration { start, end }
    }

    pub fn end(&self) -> NaiveDate {
        match self {
            Period::Instant { date } => *date,
            Period::Duration { end, .. } => *end,
        }
    }

    pub fn start(&self) -> Option<NaiveDate> {
        match self {
            Period::Instant { .. } => None,
            Period::Duration { start, .. } => Some(*start),
        }
    }

    pub fn is_instant(&self) -> bool {
        matches!(self, Period::Instant { .. })
    }

    /// The same period seen as the concept's period type needs it.
    pub fn as_type(&self, period_type: PeriodType) -> Period {
        match (period_type, self) {
            (PeriodType::Instant, Period::Duration { end, .. }) => Period::instant(*end),
            _ => *self,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Instant { date } => write!(f, "{}", date.format("%Y-%m-%d")),
            Period::Duration { start, end } => write!(
                f,
                "{} to {}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ),
        }
    }
}

pub struct Report {
    taxonomy: Arc<Taxonomy>,
    facts: Vec<Fact>,
    default_aspects: BTreeMap<String, String>,
    periods: Vec<(String, Period)>,
    default_period: Option<String>,
    entity_name: String,
    schema_refs: BTreeSet<String>,
}

impl Report {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        let mut default_aspects = BTreeMap::new();
        default_aspects.insert(NUMERIC_TRANSFORM.to_string(), "num-dot-decimal".to_string());
        default_aspects.insert(DECIMALS.to_string(), "0".to_string());
        Self {
            taxonomy,
            facts: Vec::new(),
            default_aspects,
            periods: Vec::new(),
            default_period: None,
            entity_name: "Sample".to_string(),
            schema_refs: BTreeSet::new(),
        }
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn add_fact(&mut self, fact: Fact) {
        self.facts.push(fact);
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn has_facts(&self) -> bool {
        !self.facts.is_empty()
    }

    pub fn default_aspects(&self) -> &BTreeMap<String, String> {
        &self.default_aspects
    }

    pub fn default_aspect(&self, key: &str) -> Option<&str> {
        self.default_aspects.get(key).map(String::as_str)
    }

    pub fn set_default_aspect(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.default_aspects.insert(key.into(), value.into());
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn set_entity_name(&mut self, name: impl Into<String>) {
        self.entity_name = name.into();
    }

    /// Adds a named period. Returns false if the name is taken.
    pub fn add_duration_period(&mut self, name: &str, start: NaiveDate, end: NaiveDate) -> bool {
        if self.has_named_period(name) {
            return false;
        }
        self.periods.push((name.to_string(), Period::duration(start, end)));
        true
    }

    pub fn has_named_period(&self, name: &str) -> bool {
        self.period(name).is_some()
    }

    pub fn period(&self, name: &str) -> Option<&Period> {
        self.periods.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    /// Named periods in the order they were added.
    pub fn periods(&self) -> impl Iterator<Item = (&str, &Period)> {
        self.periods.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn set_default_period(&mut self, name: &str) -> Result<()> {
        if !self.has_named_period(name) {
            return Err(Error::Report(format!(
                "Can't set default period as no such period {name} exists."
            )));
        }
        self.default_period = Some(name.to_string());
        Ok(())
    }

    pub fn default_period_name(&self) -> Option<&str> {
        self.default_period.as_deref()
    }

    pub fn default_period(&self) -> Option<&Period> {
        self.default_period.as_deref().and_then(|name| self.period(name))
    }

    /// Period a fact reports against, shaped by its concept's period type.
    pub fn fact_period(&self, fact: &Fact) -> Option<Period> {
        let period = match fact.period_name() {
            Some(name) => self.period(name)?,
            None => self.default_period()?,
        };
        let concept = self.taxonomy.concept(fact.concept());
        Some(period.as_type(concept.period_type()))
    }

    pub fn add_schema_ref(&mut self, schema_ref: impl Into<String>) {
        self.schema_refs.insert(schema_ref.into());
    }

    /// Schema references, the taxonomy entry point if none were added.
    pub fn schema_refs(&self) -> Vec<&str> {
        if self.schema_refs.is_empty() {
            vec![self.taxonomy.entry_point()]
        } else {
            self.schema_refs.iter().map(String::as_str).collect()
        }
    }

    /// Display symbol for a numeric fact's unit; empty when it has none.
    pub fn unit_symbol(&self, fact: &Fact) -> String {
        let concept = self.taxonomy.concept(fact.concept());
        let utr = self.taxonomy.utr();
        let symbol_for = |qname: &str| -> String {
            self.taxonomy
                .parse_qname(qname)
                .ok()
                .and_then(|q| utr.symbol_for_unit(&q).map(str::to_string))
                .unwrap_or_else(|| qname.to_string())
        };

        if let Some(complex) = fact.aspect(&AspectKey::ComplexUnit).and_then(AspectValue::as_text) {
            let (numerator, denominator) = complex.rsplit_once('/').unwrap_or((complex, ""));
            return format!("{} per {}", symbol_for(numerator), symbol_for(denominator));
        }

        if concept.is_monetary() {
            let code = fact
                .aspect(&AspectKey::MonetaryUnit)
                .and_then(AspectValue::as_text)
                .or_else(|| self.default_aspect(MONETARY_UNITS));
            return code
                .and_then(|code| utr.namespaces().qname(ISO4217_NS, code).ok())
                .and_then(|q| utr.symbol_for_unit(&q).map(str::to_string))
                .or_else(|| code.map(str::to_string))
                .unwrap_or_default();
        }

        if !concept.is_numeric() {
            return String::new();
        }
        match fact.aspect(&AspectKey::Unit).and_then(AspectValue::as_qname) {
            Some(unit) => match utr.symbol_for_unit(unit) {
                Some(symbol) => symbol.to_string(),
                None if concept.is_percent() => "%".to_string(),
                None => unit.local_name().to_string(),
            },
            None => String::new(),
        }
    }

    /// Key/value summary of who reports, for when and in what currency.
    pub fn document_information(&self) -> Vec<(String, String)> {
        let aspect = |key: &str| self.default_aspect(key).unwrap_or_default().to_string();
        let separator = match self.default_aspect(NUMERIC_TRANSFORM) {
            Some("num-dot-decimal") => "FULL STOP (.)",
            Some("num-comma-decimal") => "COMMA (,)",
            _ => "unknown",
        };
        vec![
            ("Entity Name".to_string(), self.entity_name.clone()),
            ("Entity Identifier".to_string(), aspect(ENTITY_IDENTIFIER)),
            ("Entity Identifier Scheme".to_string(), aspect(ENTITY_SCHEME)),
            ("Report currency".to_string(), aspect(MONETARY_UNITS)),
            (
                "Report period".to_string(),
                self.default_period().map(Period::to_string).unwrap_or_default(),
            ),
            ("Decimal separator".to_string(), separator.to_string()),
        ]
    }
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("taxonomy", &self.taxonomy.entry_point())
            .field("facts", &self.facts.len())
            .field("periods", &self.periods)
            .field("default_period", &self.default_period)
            .field("entity_name", &self.entity_name)
            .finish()
    }
}
