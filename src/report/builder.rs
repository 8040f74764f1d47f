use super::fact::{AspectKey, AspectValue, Aspects, Fact, FactValue};
use super::{Report, COMPLEX_UNITS, MONETARY_UNITS, UNITS};
use crate::qname::QName;
use crate::taxonomy::{Concept, ConceptId, Taxonomy};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Accumulates one fact for a reportable concept and checks it on `build`.
///
/// Checks run in a fixed order and the first failure wins: value present,
/// value shape for the concept's type, then dimensional validity.
pub struct FactBuilder {
    taxonomy: Arc<Taxonomy>,
    concept: ConceptId,
    value: Option<FactValue>,
    aspects: Aspects,
    percentage: bool,
}

impl FactBuilder {
    pub fn new(taxonomy: Arc<Taxonomy>, concept: ConceptId) -> Result<Self> {
        let c = taxonomy.concept(concept);
        if !c.is_reportable() {
            return Err(Error::Report(format!(
                "Fact cannot be reported against concept {c}."
            )));
        }
        Ok(Self {
            taxonomy,
            concept,
            value: None,
            aspects: Aspects::new(),
            percentage: false,
        })
    }

    pub fn concept(&self) -> &Concept {
        self.taxonomy.concept(self.concept)
    }

    pub fn set_value(&mut self, value: impl Into<FactValue>) -> &mut Self {
        self.value = Some(value.into());
        self
    }

    /// Sets a percentage. Decimal-form input (0.25 for 25%) is shown
    /// multiplied up and stored with a scale of -2.
    pub fn set_percentage_value(&mut self, value: f64, decimals: u32, decimal_form: bool) -> &mut Self {
        self.percentage = true;
        let places = decimals as usize;
        if decimal_form {
            self.set_value(format!("{:.places$}", value * 100.0));
            self.set_scale(-2);
            self.set_decimals(decimals as i32 + 2);
        } else {
            self.set_value(format!("{value:.places$}"));
            self.set_decimals(decimals as i32);
        }
        self
    }

    pub fn set_decimals(&mut self, decimals: i32) -> &mut Self {
        self.aspects.insert(AspectKey::Decimals, AspectValue::Integer(decimals));
        self
    }

    pub fn set_scale(&mut self, scale: i32) -> &mut Self {
        self.aspects.insert(AspectKey::NumericScale, AspectValue::Integer(scale));
        self
    }

    /// Reports against a named period; it must exist when the fact is built.
    pub fn set_named_period(&mut self, name: &str) -> &mut Self {
        self.aspects
            .insert(AspectKey::Period, AspectValue::Text(name.to_string()));
        self
    }

    pub fn set_hidden_value(&mut self, value: impl Into<String>) -> &mut Self {
        self.aspects
            .insert(AspectKey::HiddenValue, AspectValue::Text(value.into()));
        self
    }

    pub fn set_simple_unit(&mut self, unit: QName) -> &mut Self {
        self.aspects.insert(AspectKey::Unit, AspectValue::QName(unit));
        self
    }

    pub fn set_currency(&mut self, code: &str) -> Result<&mut Self> {
        if !self.taxonomy.utr().valid_currency_code(code) {
            return Err(Error::Report(format!(
                "Currency '{code}' does not look like a valid currency code."
            )));
        }
        self.aspects
            .insert(AspectKey::MonetaryUnit, AspectValue::Text(code.to_string()));
        Ok(self)
    }

    pub fn set_complex_unit(&mut self, numerator: &[QName], denominator: &[QName]) -> Result<&mut Self> {
        match (numerator, denominator) {
            ([num], [den]) => {
                self.aspects
                    .insert(AspectKey::ComplexUnit, AspectValue::Text(format!("{num}/{den}")));
                Ok(self)
            }
            ([], _) | (_, []) => Err(Error::Unit(format!(
                "At least one numerator ({numerator:?}) and denominator ({denominator:?}) required for a complex unit."
            ))),
            _ => Err(Error::Unit(format!(
                "More than one measure in the numerator ({numerator:?}) or denominator ({denominator:?}) is not supported."
            ))),
        }
    }

    pub fn set_explicit_dimension(&mut self, dimension: ConceptId, member: ConceptId) -> Result<&mut Self> {
        let dim = self.taxonomy.concept(dimension);
        if !dim.is_explicit_dimension() {
            return Err(Error::Report(format!(
                "Concept {dim} is not an explicit dimension."
            )));
        }
        let member = self.taxonomy.concept(member).qname().clone();
        self.aspects.insert(
            AspectKey::ExplicitDimension(dim.qname().clone()),
            AspectValue::QName(member),
        );
        Ok(self)
    }

    /// Stores the value wrapped in the dimension's typed element, escaped.
    pub fn set_typed_dimension(&mut self, dimension: ConceptId, value: &str) -> Result<&mut Self> {
        let dim = self.taxonomy.concept(dimension);
        let element = match (dim.is_typed_dimension(), dim.typed_element()) {
            (true, Some(element)) => element,
            (false, _) => {
                return Err(Error::Report(format!("Concept {dim} is not a typed dimension.")))
            }
            (true, None) => {
                return Err(Error::Report(format!(
                    "Typed dimension {dim} has no wrapper element defined."
                )))
            }
        };
        let wrapped = format!(
            "<{element}>{}</{element}>",
            quick_xml::escape::escape(value)
        );
        self.aspects.insert(
            AspectKey::TypedDimension(dim.qname().clone()),
            AspectValue::Text(wrapped),
        );
        Ok(self)
    }

    pub fn has_aspects(&self) -> bool {
        !self.aspects.is_empty()
    }

    pub fn has_taxonomy_dimensions(&self) -> bool {
        self.aspects.keys().any(AspectKey::is_dimension)
    }

    pub fn build(mut self, report: &Report) -> Result<Fact> {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(self.concept);
        let Some(value) = self.value.take() else {
            return Err(Error::Report(format!(
                "Value must be set before building a fact for {concept}."
            )));
        };

        if concept.is_boolean() {
            self.check_boolean(&value)?;
        } else if concept.is_enumeration_single() {
            self.check_enumeration(&value, false)?;
        } else if concept.is_enumeration_set() {
            self.check_enumeration(&value, true)?;
        } else if concept.is_numeric() {
            self.check_numeric(&value, report)?;
        }

        if let Some(name) = self.aspects.get(&AspectKey::Period).and_then(AspectValue::as_text) {
            if !report.has_named_period(name) {
                return Err(Error::Report(format!(
                    "Period '{name}' does not exist in the report."
                )));
            }
        }

        self.aspects.insert(
            AspectKey::PeriodType,
            AspectValue::Text(concept.period_type().as_str().to_string()),
        );
        self.check_typed_dimensions()?;
        self.check_explicit_dimensions()?;

        Ok(Fact::new(self.concept, concept.qname().clone(), value, self.aspects))
    }

    fn check_boolean(&mut self, value: &FactValue) -> Result<()> {
        let truth = match value {
            FactValue::Bool(b) => Some(*b),
            other => match other.to_string().trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
        };
        let truth = truth.ok_or_else(|| {
            Error::Report(format!("Unable to determine boolean value for value {value}"))
        })?;
        let transform = if truth { "fixed-true" } else { "fixed-false" };
        self.aspects
            .insert(AspectKey::Transform, AspectValue::Text(transform.to_string()));
        Ok(())
    }

    fn check_enumeration(&self, value: &FactValue, set: bool) -> Result<()> {
        if value.is_empty_text() {
            return Err(Error::Report(
                "Unable to create enumeration fact with no human readable value".to_string(),
            ));
        }
        match self.aspects.get(&AspectKey::HiddenValue).and_then(AspectValue::as_text) {
            None => Err(Error::Report(
                "Unable to create enumeration fact with no expanded name value".to_string(),
            )),
            Some("") if !set => Err(Error::Report(
                "Domain members not specified for enumeration fact".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    fn check_numeric(&self, value: &FactValue, report: &Report) -> Result<()> {
        if self.percentage {
            return Ok(());
        }
        if !value.is_number() {
            return Err(Error::Report(format!(
                "Unable to create numeric fact from non-numeric value {value}"
            )));
        }
        let has = |key: AspectKey, default: &str| {
            self.aspects.contains_key(&key) || report.default_aspect(default).is_some()
        };
        if self.concept().is_monetary() {
            if !has(AspectKey::MonetaryUnit, MONETARY_UNITS) {
                return Err(Error::Report("Monetary concepts require a currency unit".to_string()));
            }
        } else if !(has(AspectKey::Unit, UNITS) || has(AspectKey::ComplexUnit, COMPLEX_UNITS)) {
            return Err(Error::Report("Numeric concepts require a unit".to_string()));
        }
        Ok(())
    }

    fn chosen_dimensions<T>(&self, pick: impl Fn(&AspectKey, &AspectValue) -> Option<(ConceptId, T)>) -> BTreeMap<ConceptId, T> {
        self.aspects
            .iter()
            .filter_map(|(key, value)| pick(key, value))
            .collect()
    }

    fn names(&self, ids: impl IntoIterator<Item = ConceptId>) -> String {
        ids.into_iter()
            .map(|id| self.taxonomy.concept(id).qname().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn check_typed_dimensions(&self) -> Result<()> {
        let taxonomy = &self.taxonomy;
        let chosen: BTreeSet<ConceptId> = self
            .chosen_dimensions(|key, _| match key {
                AspectKey::TypedDimension(dim) => taxonomy.concept_by_qname(dim).map(|c| (c.id(), ())),
                _ => None,
            })
            .into_keys()
            .collect();
        let needed = taxonomy.typed_dimensions_for_primary_item(self.concept);
        let unexpected: Vec<ConceptId> = chosen.difference(&needed).copied().collect();
        if !unexpected.is_empty() {
            return Err(Error::Report(format!(
                "Unexpected typed dimension(s) [{}] set for {}",
                self.names(unexpected),
                self.concept()
            )));
        }
        let missing: Vec<ConceptId> = needed.difference(&chosen).copied().collect();
        if !missing.is_empty() {
            return Err(Error::Report(format!(
                "Missing required typed dimension(s) [{}] for {}",
                self.names(missing),
                self.concept()
            )));
        }
        Ok(())
    }

    fn check_explicit_dimensions(&mut self) -> Result<()> {
        let taxonomy = self.taxonomy.clone();
        let mut chosen: BTreeMap<ConceptId, ConceptId> = self.chosen_dimensions(|key, value| {
            match (key, value) {
                (AspectKey::ExplicitDimension(dim), AspectValue::QName(member)) => Some((
                    taxonomy.concept_by_qname(dim)?.id(),
                    taxonomy.concept_by_qname(member)?.id(),
                )),
                _ => None,
            }
        });
        let mut needed = taxonomy.explicit_dimensions_for_primary_item(self.concept);

        for dimension in needed.clone() {
            let Some(default) = taxonomy.dimension_default(dimension) else {
                continue;
            };
            match chosen.get(&dimension) {
                None => {
                    needed.remove(&dimension);
                }
                Some(member) if *member == default => {
                    needed.remove(&dimension);
                    chosen.remove(&dimension);
                    let qname = taxonomy.concept(dimension).qname().clone();
                    self.aspects.remove(&AspectKey::ExplicitDimension(qname));
                }
                Some(_) => {}
            }
        }

        let chosen_dims: BTreeSet<ConceptId> = chosen.keys().copied().collect();
        let unexpected: Vec<ConceptId> = chosen_dims.difference(&needed).copied().collect();
        if !unexpected.is_empty() {
            return Err(Error::Report(format!(
                "Unexpected explicit dimension(s) [{}] set for {}",
                self.names(unexpected),
                self.concept()
            )));
        }
        let missing: Vec<ConceptId> = needed.difference(&chosen_dims).copied().collect();
        if !missing.is_empty() {
            return Err(Error::Report(format!(
                "Missing explicit dimension(s) [{}] for {}",
                self.names(missing),
                self.concept()
            )));
        }
        for (dimension, member) in chosen {
            if !taxonomy.is_domain_member(dimension, member) {
                return Err(Error::Report(format!(
                    "Explicit dimension {} cannot be set to {} for {}",
                    taxonomy.concept(dimension),
                    taxonomy.concept(member),
                    self.concept()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FactBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactBuilder")
            .field("concept", self.concept().qname())
            .field("value", &self.value)
            .field("aspects", &self.aspects)
            .finish()
    }
}
