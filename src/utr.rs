// Unit Type Registry: which units are permissible for which data types
use crate::qname::{NamespaceManager, QName, ISO4217_NS, XBRLI_NS};
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitEntry {
    pub unit_id: String,
    #[serde(default)]
    pub ns_unit: Option<String>,
    pub item_type: String,
    #[serde(default)]
    pub ns_item_type: Option<String>,
    #[serde(default)]
    pub numerator_item_type: Option<String>,
    #[serde(default)]
    pub ns_numerator_item_type: Option<String>,
    #[serde(default)]
    pub denominator_item_type: Option<String>,
    #[serde(default)]
    pub ns_denominator_item_type: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub unit_name: Option<String>,
}

impl UnitEntry {
    pub fn is_ratio(&self) -> bool {
        self.numerator_item_type.is_some()
    }
}

/// The `{"utr": [...]}` document.
#[derive(Debug, Clone, Deserialize)]
pub struct UtrDocument {
    pub utr: Vec<UnitEntry>,
}

impl UtrDocument {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Data types are matched on their QName when the registry entry names a
/// namespace, otherwise on the bare local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DataTypeKey {
    Qualified(QName),
    Local(CompactString),
}

#[derive(Debug, Clone)]
pub struct RatioUnit {
    pub unit_id: String,
    pub numerator_item_type: String,
    pub denominator_item_type: String,
}

pub struct UnitRegistry {
    namespaces: Arc<NamespaceManager>,
    namespaces_by_unit_id: AHashMap<String, Vec<String>>,
    unit_ids_by_data_type: AHashMap<DataTypeKey, Vec<String>>,
    units_by_data_type: AHashMap<DataTypeKey, Vec<QName>>,
    entries: AHashMap<QName, UnitEntry>,
    ratio_units: AHashMap<DataTypeKey, Vec<RatioUnit>>,
}

impl UnitRegistry {
    /// Builds the registry and finalises the namespace table: namespaces
    /// used by the registry get generated prefixes when they have none.
    pub fn load(document: UtrDocument, mut namespaces: NamespaceManager) -> Result<Self> {
        let mut namespaces_by_unit_id: AHashMap<String, Vec<String>> = AHashMap::new();
        let mut unit_ids_by_data_type: AHashMap<DataTypeKey, Vec<String>> = AHashMap::new();
        let mut units_by_data_type: AHashMap<DataTypeKey, Vec<QName>> = AHashMap::new();
        let mut entries = AHashMap::new();
        let mut ratio_units: AHashMap<DataTypeKey, Vec<RatioUnit>> = AHashMap::new();

        for entry in document.utr {
            let key = match &entry.ns_item_type {
                Some(ns) => DataTypeKey::Qualified(namespaces.qname_or_generate(ns, &entry.item_type)?),
                None => DataTypeKey::Local(CompactString::from(entry.item_type.as_str())),
            };
            unit_ids_by_data_type
                .entry(key.clone())
                .or_default()
                .push(entry.unit_id.clone());

            if let (Some(numerator), Some(denominator)) =
                (&entry.numerator_item_type, &entry.denominator_item_type)
            {
                ratio_units.entry(key).or_default().push(RatioUnit {
                    unit_id: entry.unit_id.clone(),
                    numerator_item_type: numerator.clone(),
                    denominator_item_type: denominator.clone(),
                });
                continue;
            }

            let unit_ns = entry.ns_unit.as_deref().ok_or_else(|| {
                Error::Unit(format!("Unit {} does not declare a namespace", entry.unit_id))
            })?;
            let unit = namespaces.qname_or_generate(unit_ns, &entry.unit_id)?;
            let registered = namespaces_by_unit_id.entry(entry.unit_id.clone()).or_default();
            if !registered.iter().any(|ns| ns == unit_ns) {
                registered.push(unit_ns.to_string());
            }
            units_by_data_type.entry(key).or_default().push(unit.clone());
            entries.insert(unit, entry);
        }

        for units in units_by_data_type.values_mut() {
            units.sort();
            units.dedup();
        }

        log::debug!(
            "Loaded unit registry: {} simple units, {} data types",
            entries.len(),
            unit_ids_by_data_type.len()
        );

        Ok(Self {
            namespaces: Arc::new(namespaces),
            namespaces_by_unit_id,
            unit_ids_by_data_type,
            units_by_data_type,
            entries,
            ratio_units,
        })
    }

    pub fn namespaces(&self) -> &Arc<NamespaceManager> {
        &self.namespaces
    }

    /// Resolves a unit id (or a QName string) to the unit's QName.
    ///
    /// An id registered under several namespaces is an error: callers must
    /// spell it as a QName.
    pub fn qname_for_unit_id(&self, unit_id: &str) -> Result<Option<QName>> {
        if let Ok(qname) = self.namespaces.parse(unit_id) {
            return Ok(Some(qname));
        }
        match self.namespaces_by_unit_id.get(unit_id).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([namespace]) => self.namespaces.qname(namespace, unit_id).map(Some),
            Some(_) => Err(Error::Unit(format!(
                "Found non unique unit identifier {unit_id}. Specify a QName instead."
            ))),
        }
    }

    fn lookup<'a, T>(&self, map: &'a AHashMap<DataTypeKey, T>, data_type: &QName) -> Option<&'a T> {
        map.get(&DataTypeKey::Qualified(data_type.clone())).or_else(|| {
            map.get(&DataTypeKey::Local(CompactString::from(data_type.local_name())))
        })
    }

    /// Simple units registered for the data type, sorted.
    pub fn units_for_data_type(&self, data_type: &QName) -> &[QName] {
        self.lookup(&self.units_by_data_type, data_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every unit id (simple and ratio) registered for the data type, under
    /// either its QName or its local name.
    pub fn unit_ids_for_data_type(&self, data_type: &QName) -> BTreeSet<&str> {
        let qualified = DataTypeKey::Qualified(data_type.clone());
        let local = DataTypeKey::Local(CompactString::from(data_type.local_name()));
        [qualified, local]
            .iter()
            .filter_map(|key| self.unit_ids_by_data_type.get(key))
            .flatten()
            .map(String::as_str)
            .collect()
    }

    pub fn ratio_units_for_data_type(&self, data_type: &QName) -> &[RatioUnit] {
        self.lookup(&self.ratio_units, data_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// True when the data type is unconstrained or the unit is registered for it.
    pub fn valid(&self, data_type: &QName, unit: &QName) -> bool {
        let units = self.units_for_data_type(data_type);
        units.is_empty() || units.contains(unit)
    }

    pub fn valid_currency(&self, unit: &QName) -> bool {
        unit.namespace() == ISO4217_NS && self.valid_currency_code(unit.local_name())
    }

    pub fn valid_currency_code(&self, code: &str) -> bool {
        self.namespaces
            .qname(XBRLI_NS, "monetaryItemType")
            .map(|monetary| self.unit_ids_for_data_type(&monetary).contains(code))
            .unwrap_or(false)
    }

    pub fn entry(&self, unit: &QName) -> Option<&UnitEntry> {
        self.entries.get(unit)
    }

    pub fn symbol_for_unit(&self, unit: &QName) -> Option<&str> {
        self.entries.get(unit).and_then(|e| e.symbol.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &self.entries.len())
            .field("data_types", &self.unit_ids_by_data_type.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qname::UTR_NS;

    const DTR: &str = "http://www.xbrl.org/dtr/type/2022-03-31";

    fn registry() -> UnitRegistry {
        let doc = UtrDocument::from_json_str(&format!(
            r#"{{"utr": [
                {{"unitId": "EUR", "nsUnit": "{ISO4217_NS}", "itemType": "monetaryItemType", "nsItemType": "{XBRLI_NS}", "symbol": "€"}},
                {{"unitId": "USD", "nsUnit": "{ISO4217_NS}", "itemType": "monetaryItemType", "nsItemType": "{XBRLI_NS}", "symbol": "$"}},
                {{"unitId": "MWh", "nsUnit": "{UTR_NS}", "itemType": "energyItemType", "nsItemType": "{DTR}", "symbol": "MWh"}},
                {{"unitId": "GJ", "nsUnit": "{UTR_NS}", "itemType": "energyItemType", "symbol": "GJ"}},
                {{"unitId": "t", "nsUnit": "{UTR_NS}", "itemType": "massItemType"}},
                {{"unitId": "t", "nsUnit": "https://example.com/other-units", "itemType": "massItemType"}},
                {{"unitId": "EURPerMWh", "nsUnit": "{UTR_NS}", "itemType": "pricePerEnergyItemType",
                  "numeratorItemType": "monetaryItemType", "denominatorItemType": "energyItemType"}}
            ]}}"#
        ))
        .unwrap();
        let mut ns = NamespaceManager::bootstrap();
        ns.add("dtr-types", DTR).unwrap();
        UnitRegistry::load(doc, ns).unwrap()
    }

    #[test]
    fn test_units_for_data_type_uses_qname_then_local_name() {
        let utr = registry();
        let energy = utr.namespaces().parse("dtr-types:energyItemType").unwrap();
        let units: Vec<String> = utr
            .units_for_data_type(&energy)
            .iter()
            .map(|u| u.to_string())
            .collect();
        // MWh is keyed on the QName; GJ only on the local name
        assert_eq!(units, vec!["utr:MWh"]);

        let ids = utr.unit_ids_for_data_type(&energy);
        assert!(ids.contains("MWh"));
        assert!(ids.contains("GJ"));
    }

    #[test]
    fn test_unconstrained_data_type_accepts_anything() {
        let utr = registry();
        let string_type = utr.namespaces().parse("xbrli:stringItemType").unwrap();
        let eur = utr.namespaces().parse("iso4217:EUR").unwrap();
        assert!(utr.valid(&string_type, &eur));

        let monetary = utr.namespaces().parse("xbrli:monetaryItemType").unwrap();
        let mwh = utr.namespaces().parse("utr:MWh").unwrap();
        assert!(utr.valid(&monetary, &eur));
        assert!(!utr.valid(&monetary, &mwh));
    }

    #[test]
    fn test_qname_for_unit_id() {
        let utr = registry();
        let eur = utr.qname_for_unit_id("EUR").unwrap().unwrap();
        assert_eq!(eur.to_string(), "iso4217:EUR");
        assert_eq!(
            utr.qname_for_unit_id("utr:MWh").unwrap().unwrap().local_name(),
            "MWh"
        );
        assert!(utr.qname_for_unit_id("furlong").unwrap().is_none());
        assert!(matches!(utr.qname_for_unit_id("t"), Err(Error::Unit(_))));
    }

    #[test]
    fn test_currency_validity() {
        let utr = registry();
        assert!(utr.valid_currency_code("EUR"));
        assert!(!utr.valid_currency_code("MWh"));
        let usd = utr.namespaces().parse("iso4217:USD").unwrap();
        assert!(utr.valid_currency(&usd));
        let mwh = utr.namespaces().parse("utr:MWh").unwrap();
        assert!(!utr.valid_currency(&mwh));
    }

    #[test]
    fn test_ratio_units_kept_apart_from_simple_units() {
        let utr = registry();
        let price = utr
            .namespaces()
            .parse("utr:pricePerEnergyItemType")
            .unwrap();
        assert!(utr.units_for_data_type(&price).is_empty());
        assert!(utr.unit_ids_for_data_type(&price).contains("EURPerMWh"));
        assert_eq!(utr.ratio_units_for_data_type(&price).len(), 1);
        assert_eq!(utr.symbol_for_unit(&utr.namespaces().parse("iso4217:EUR").unwrap()), Some("€"));
    }

    #[test]
    fn test_generated_prefix_for_unknown_unit_namespace() {
        let utr = registry();
        assert!(utr
            .namespaces()
            .prefix_for_namespace("https://example.com/other-units")
            .is_some());
    }
}
