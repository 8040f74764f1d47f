// Declarative conversion defaults: which named ranges hold the report
// metadata, plus static unit and label overrides.
use crate::Result;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::path::Path;

/// A JSON object kept as entries in document order.
///
/// Repeated keys are kept too, so callers can reject them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedMap<K, V>(pub Vec<(K, V)>);

impl<K, V> OrderedMap<K, V> {
    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<K, V> IntoIterator for OrderedMap<K, V> {
    type Item = (K, V);
    type IntoIter = std::vec::IntoIter<(K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

struct OrderedMapVisitor<K, V>(PhantomData<(K, V)>);

impl<'de, K, V> Visitor<'de> for OrderedMapVisitor<K, V>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
{
    type Value = OrderedMap<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(entry) = access.next_entry()? {
            entries.push(entry);
        }
        Ok(OrderedMap(entries))
    }
}

impl<'de, K, V> Deserialize<'de> for OrderedMap<K, V>
where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PeriodBinding {
    pub name: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportBindings {
    #[serde(rename = "entity-name")]
    pub entity_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RatioMeasures {
    #[serde(default)]
    pub numerator: Vec<String>,
    #[serde(default)]
    pub denominator: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionConfig {
    /// Named range holding the taxonomy entry point.
    #[serde(default)]
    pub entry_point: String,
    #[serde(default)]
    pub entity_identifier_labels_to_schemes: BTreeMap<String, String>,
    /// Default aspect name to the named range holding its value.
    #[serde(default)]
    pub aoix: Option<OrderedMap<String, String>>,
    #[serde(default)]
    pub periods: Vec<PeriodBinding>,
    #[serde(default)]
    pub report: Option<ReportBindings>,
    #[serde(default)]
    pub data_types_to_units: BTreeMap<String, String>,
    #[serde(default)]
    pub unit_ids_to_measures: BTreeMap<String, RatioMeasures>,
    #[serde(default)]
    pub concepts_to_units: BTreeMap<String, String>,
    #[serde(default)]
    pub cell_values_to_taxonomy_labels: BTreeMap<String, String>,
    /// Applied in order when unit cell text fails to resolve.
    #[serde(default)]
    pub cell_unit_replacements: OrderedMap<String, String>,
}

impl ConversionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Scheme URI for a human label, matched ignoring case and spaces.
    pub fn scheme_for_label(&self, label: &str) -> Option<&str> {
        let wanted = normalise_scheme_label(label);
        self.entity_identifier_labels_to_schemes
            .iter()
            .find(|(k, _)| normalise_scheme_label(k) == wanted)
            .map(|(_, v)| v.as_str())
    }

    /// Named ranges read as report metadata rather than facts.
    pub fn metadata_names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        if !self.entry_point.is_empty() {
            names.insert(&self.entry_point);
        }
        if let Some(aoix) = &self.aoix {
            names.extend(aoix.iter().map(|(_, range)| range.as_str()));
        }
        for period in &self.periods {
            names.insert(&period.start);
            names.insert(&period.end);
        }
        if let Some(report) = &self.report {
            names.insert(&report.entity_name);
        }
        names
    }

    pub fn replace_unit_text(&self, text: &str) -> String {
        self.cell_unit_replacements
            .iter()
            .fold(text.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
    }
}

fn normalise_scheme_label(label: &str) -> String {
    label.trim().replace(' ', "").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"{
        "entryPoint": "template_entry_point",
        "entityIdentifierLabelsToSchemes": {"lei": "http://standards.iso.org/iso/17442"},
        "aoix": {"entity-identifier": "entity_identifier", "entity-scheme": "entity_scheme"},
        "periods": [{"name": "FY", "start": "period_start", "end": "period_end"}],
        "report": {"entity-name": "entity_name"},
        "dataTypesToUnits": {"xbrli:decimalItemType": "xbrli:pure"},
        "unitIdsToMeasures": {"tCO2ePerEUR": {"numerator": ["utr:tCO2e"], "denominator": ["iso4217:EUR"]}},
        "cellUnitReplacements": {"m³": "m3", "²": "2"}
    }"#;

    #[test]
    fn test_parse_config() {
        let config = ConversionConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(config.entry_point, "template_entry_point");
        assert_eq!(config.periods.len(), 1);
        assert_eq!(config.report.unwrap().entity_name, "entity_name");
        let aoix: Vec<&str> = config
            .aoix
            .as_ref()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(aoix, vec!["entity-identifier", "entity-scheme"]);
        assert_eq!(
            config.unit_ids_to_measures["tCO2ePerEUR"].denominator,
            vec!["iso4217:EUR".to_string()]
        );
    }

    #[test]
    fn test_scheme_lookup_ignores_case_and_spaces() {
        let config = ConversionConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(
            config.scheme_for_label(" L E I "),
            Some("http://standards.iso.org/iso/17442")
        );
        assert_eq!(config.scheme_for_label("duns"), None);
    }

    #[test]
    fn test_unit_replacements_apply_in_order() {
        let config = ConversionConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(config.replace_unit_text("m³ and m²"), "m3 and m2");
    }

    #[test]
    fn test_metadata_names() {
        let config = ConversionConfig::from_json_str(CONFIG).unwrap();
        let names: Vec<&str> = config.metadata_names().into_iter().collect();
        assert_eq!(
            names,
            vec![
                "entity_identifier",
                "entity_name",
                "entity_scheme",
                "period_end",
                "period_start",
                "template_entry_point",
            ]
        );
    }

    #[test]
    fn test_ordered_map_keeps_duplicates() {
        let map: OrderedMap<String, u32> = serde_json::from_str(r#"{"b": 1, "a": 2, "b": 3}"#).unwrap();
        let keys: Vec<&str> = map.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "b"]);
    }
}
