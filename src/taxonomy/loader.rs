// Builds a Taxonomy from its JSON description in two passes: concepts
// first, then everything that refers to other concepts.
use super::{
    clean_label, BaseSet, Concept, ConceptFlags, ConceptId, Cube, DimensionContainer,
    PeriodType, PresentationGroup, PresentationStyle, Relationship, Taxonomy,
    DEFAULT_LANGUAGE,
};
use crate::config::OrderedMap;
use crate::qname::{NamespaceManager, QName, NCNAME_TOKEN_RE, QNAME_TOKEN_RE};
use crate::utr::{UnitRegistry, UtrDocument};
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

static SQUARE_BRACKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]").expect("valid regex"));

const DEFAULTS_KEY: &str = "_defaults";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyDescription {
    pub entry_point: String,
    #[serde(default)]
    pub namespaces: OrderedMap<String, String>,
    pub concepts: OrderedMap<String, ConceptDescription>,
    #[serde(default)]
    pub presentation: OrderedMap<String, GroupDescription>,
    #[serde(default)]
    pub dimensions: DimensionsDescription,
}

impl TaxonomyDescription {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptDescription {
    pub data_type: Option<String>,
    pub base_data_type: Option<String>,
    pub period_type: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub dimension: bool,
    #[serde(default)]
    pub hypercube: bool,
    #[serde(default)]
    pub nillable: bool,
    #[serde(default)]
    pub numeric: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub other: OtherDescription,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherDescription {
    pub typed_element: Option<String>,
    pub ee20_domain_members: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupDescription {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub rows: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CubeDescription {
    #[serde(default, rename = "xbrldt:closed")]
    pub closed: bool,
    #[serde(default, rename = "xbrldt:contextElement")]
    pub context_element: Option<String>,
    #[serde(default, rename = "primaryItems")]
    pub primary_items: Vec<(u32, String)>,
    #[serde(default, rename = "explicitDimensions")]
    pub explicit_dimensions: OrderedMap<String, Vec<String>>,
    #[serde(default, rename = "typedDimensions")]
    pub typed_dimensions: Vec<String>,
}

/// Base sets keyed by role, plus the reserved `_defaults` entry.
#[derive(Debug, Clone, Default)]
pub struct DimensionsDescription {
    pub base_sets: Vec<(String, OrderedMap<String, CubeDescription>)>,
    pub defaults: Vec<(String, String)>,
}

struct DimensionsVisitor;

impl<'de> Visitor<'de> for DimensionsVisitor {
    type Value = DimensionsDescription;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of base sets")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut description = DimensionsDescription::default();
        while let Some(key) = access.next_key::<String>()? {
            if key == DEFAULTS_KEY {
                let defaults: OrderedMap<String, String> = access.next_value()?;
                description.defaults.extend(defaults);
            } else {
                description.base_sets.push((key, access.next_value()?));
            }
        }
        Ok(description)
    }
}

impl<'de> Deserialize<'de> for DimensionsDescription {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DimensionsVisitor)
    }
}

fn parse_period_type(qname: &QName, period_type: Option<&str>) -> Result<PeriodType> {
    match period_type {
        Some("duration") => Ok(PeriodType::Duration),
        Some("instant") => Ok(PeriodType::Instant),
        Some(other) => Err(Error::Taxonomy(format!(
            "Concept {qname} has unknown period type '{other}'."
        ))),
        None => Err(Error::Taxonomy(format!(
            "Concept {qname} does not specify a period type."
        ))),
    }
}

fn required_qname(namespaces: &NamespaceManager, qname: &QName, value: Option<&str>, what: &str) -> Result<QName> {
    match value {
        Some(value) => namespaces.parse(value),
        None => Err(Error::Taxonomy(format!(
            "Concept {qname} does not specify a {what}."
        ))),
    }
}

/// Units named by a measurement guidance label, restricted to `valid`.
fn units_from_guidance(utr: &UnitRegistry, label: &str, valid: &[QName]) -> Vec<QName> {
    let namespaces = utr.namespaces();

    if let Ok(Some(unit)) = utr.qname_for_unit_id(label) {
        if valid.contains(&unit) {
            return vec![unit];
        }
    }
    if let Ok(unit) = namespaces.parse(label) {
        if valid.contains(&unit) {
            return vec![unit];
        }
    }

    let mut found: Vec<QName> = SQUARE_BRACKETS_RE
        .captures_iter(label)
        .filter_map(|caps| caps.get(1))
        .flat_map(|inner| QNAME_TOKEN_RE.find_iter(inner.as_str()))
        .filter_map(|m| namespaces.parse(m.as_str()).ok())
        .filter(|unit| valid.contains(unit))
        .collect();

    if found.is_empty() && label.contains(&[' ', ',', '*', '/'][..]) {
        let by_local_name: AHashMap<&str, &QName> =
            valid.iter().map(|u| (u.local_name(), u)).collect();
        found = NCNAME_TOKEN_RE
            .find_iter(label)
            .filter_map(|m| by_local_name.get(m.as_str()).map(|u| (*u).clone()))
            .collect();
    }

    found.sort();
    found.dedup();
    found
}

fn identify_style(concepts: &[Concept], relationships: &[Relationship]) -> PresentationStyle {
    let concept = |id: ConceptId| &concepts[id.index()];
    if !relationships.iter().any(|r| concept(r.concept).is_reportable()) {
        return PresentationStyle::Empty;
    }
    if !relationships.iter().any(|r| concept(r.concept).is_hypercube()) {
        return PresentationStyle::List;
    }

    let mut table = false;
    let mut list = false;
    // Depths of the hypercubes whose scope is still open
    let mut scopes: Vec<u32> = Vec::new();
    for rel in relationships {
        if let Some(&depth) = scopes.last() {
            if rel.depth == 0 || rel.depth < depth {
                scopes.pop();
            }
        }
        let c = concept(rel.concept);
        if c.is_hypercube() {
            scopes.push(rel.depth);
        }
        if c.is_reportable() {
            match scopes.last() {
                Some(&depth) if rel.depth >= depth => table = true,
                _ => list = true,
            }
        }
    }

    match (table, list) {
        (true, true) => PresentationStyle::Hybrid,
        (true, false) => PresentationStyle::Table,
        (false, true) => PresentationStyle::List,
        (false, false) => PresentationStyle::Empty,
    }
}

struct Builder {
    concepts: Vec<Concept>,
    by_qname: AHashMap<QName, ConceptId>,
    namespaces: Arc<NamespaceManager>,
}

impl Builder {
    fn lookup(&self, qname: &str) -> Result<ConceptId> {
        let parsed = self.namespaces.parse(qname)?;
        self.by_qname
            .get(&parsed)
            .copied()
            .ok_or_else(|| Error::Taxonomy(format!("Reference to unknown concept {qname}")))
    }
}

impl Taxonomy {
    /// Builds the taxonomy and its own unit registry. All errors are fatal.
    pub fn load(description: TaxonomyDescription, utr: UtrDocument) -> Result<Self> {
        let TaxonomyDescription {
            entry_point,
            namespaces: declared,
            concepts: concept_descriptions,
            presentation: group_descriptions,
            dimensions,
        } = description;

        let mut namespaces = NamespaceManager::bootstrap();
        for (prefix, namespace) in declared.iter() {
            namespaces.add(prefix, namespace)?;
        }
        let utr = UnitRegistry::load(utr, namespaces)?;

        // Pass one: concepts on their own
        let mut builder = Builder {
            concepts: Vec::with_capacity(concept_descriptions.len()),
            by_qname: AHashMap::with_capacity(concept_descriptions.len()),
            namespaces: utr.namespaces().clone(),
        };
        let mut pending_domains: Vec<(ConceptId, Vec<String>)> = Vec::new();

        for (name, details) in concept_descriptions {
            let ns = &builder.namespaces;
            let qname = ns.parse(&name)?;
            if builder.by_qname.contains_key(&qname) {
                return Err(Error::Taxonomy(format!("Concept {qname} is defined twice")));
            }
            let period_type = parse_period_type(&qname, details.period_type.as_deref())?;
            let data_type = required_qname(ns, &qname, details.data_type.as_deref(), "data type")?;
            let base_data_type =
                required_qname(ns, &qname, details.base_data_type.as_deref(), "base data type")?;
            let typed_element = details
                .other
                .typed_element
                .as_deref()
                .map(|t| ns.parse(t))
                .transpose()?;

            let mut flags = ConceptFlags::empty();
            flags.set(ConceptFlags::ABSTRACT, details.is_abstract);
            flags.set(ConceptFlags::DIMENSION, details.dimension);
            flags.set(ConceptFlags::HYPERCUBE, details.hypercube);
            flags.set(ConceptFlags::NILLABLE, details.nillable);
            flags.set(ConceptFlags::NUMERIC, details.numeric);

            let id = ConceptId(builder.concepts.len() as u32);
            if let Some(members) = details.other.ee20_domain_members {
                pending_domains.push((id, members));
            }
            builder.by_qname.insert(qname.clone(), id);
            builder.concepts.push(Concept {
                id,
                qname,
                data_type,
                base_data_type,
                period_type,
                flags,
                typed_element,
                domain: Vec::new(),
                labels: details
                    .labels
                    .into_iter()
                    .map(|(lang, roles)| (lang, roles.into_iter().collect()))
                    .collect(),
                required_units: Vec::new(),
            });
        }

        // Pass two: enumeration domains and guidance units
        for (id, members) in pending_domains {
            let domain = members
                .iter()
                .map(|m| builder.lookup(m))
                .collect::<Result<Vec<_>>>()?;
            builder.concepts[id.index()].domain = domain;
        }
        for concept in builder.concepts.iter_mut() {
            if !concept.is_numeric() {
                continue;
            }
            let Some(label) = concept.measurement_guidance_label() else {
                continue;
            };
            let valid = utr.units_for_data_type(&concept.data_type);
            if label.is_empty() || valid.is_empty() {
                continue;
            }
            let units = units_from_guidance(&utr, label, valid);
            concept.required_units = units;
        }

        let mut by_local_name: AHashMap<CompactString, Vec<ConceptId>> = AHashMap::new();
        let mut by_standard_label: AHashMap<String, BTreeSet<ConceptId>> = AHashMap::new();
        let mut by_clean_label: AHashMap<String, BTreeSet<ConceptId>> = AHashMap::new();
        for concept in &builder.concepts {
            by_local_name
                .entry(CompactString::from(concept.qname.local_name()))
                .or_default()
                .push(concept.id);
            let Some(label) = concept.standard_label() else {
                continue;
            };
            by_standard_label.entry(label.to_string()).or_default().insert(concept.id);
            let cleaned = clean_label(label);
            let mut keys = vec![cleaned.clone()];
            match cleaned.rfind('[') {
                Some(pos) => {
                    let without_suffix = cleaned[..pos].trim();
                    keys.push(without_suffix.to_string());
                    keys.push(without_suffix.to_lowercase());
                }
                None => keys.push(cleaned.to_lowercase()),
            }
            for key in keys {
                by_clean_label.entry(key).or_default().insert(concept.id);
            }
        }

        let mut presentation = Vec::with_capacity(group_descriptions.len());
        for (role, group) in group_descriptions {
            let role: Arc<str> = Arc::from(role);
            let relationships = group
                .rows
                .iter()
                .map(|(depth, qname)| {
                    Ok(Relationship {
                        role: role.clone(),
                        depth: *depth,
                        concept: builder.lookup(qname)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let style = identify_style(&builder.concepts, &relationships);
            let label = group
                .labels
                .get(DEFAULT_LANGUAGE)
                .cloned()
                .unwrap_or_else(|| role.to_string());
            presentation.push(PresentationGroup {
                role,
                label,
                labels: group.labels,
                relationships,
                style,
            });
        }

        let mut defaults: AHashMap<ConceptId, ConceptId> = AHashMap::new();
        for (dimension, member) in &dimensions.defaults {
            let dimension_id = builder.lookup(dimension)?;
            let member_id = builder.lookup(member)?;
            if defaults.insert(dimension_id, member_id).is_some() {
                return Err(Error::Taxonomy(format!(
                    "Dimension {dimension} has more than one default member"
                )));
            }
        }

        let mut base_sets = Vec::with_capacity(dimensions.base_sets.len());
        let mut base_sets_by_hypercube: AHashMap<ConceptId, Vec<usize>> = AHashMap::new();
        let mut base_sets_by_primary_item: AHashMap<ConceptId, Vec<usize>> = AHashMap::new();
        let mut domains: AHashMap<ConceptId, BTreeSet<ConceptId>> = AHashMap::new();
        let mut containers: BTreeSet<&'static str> = BTreeSet::new();
        let mut open_hypercubes: Vec<String> = Vec::new();

        for (role, cubes) in dimensions.base_sets {
            let mut cubes = cubes.into_iter();
            let (Some((hypercube_name, details)), None) = (cubes.next(), cubes.next()) else {
                return Err(Error::Taxonomy(format!(
                    "Base set {role} must declare exactly one hypercube"
                )));
            };
            let hypercube = builder.lookup(&hypercube_name)?;
            if !details.closed {
                open_hypercubes.push(hypercube_name.clone());
            }
            let container = match details.context_element.as_deref() {
                Some("segment") => DimensionContainer::Segment,
                _ => DimensionContainer::Scenario,
            };
            containers.insert(container.as_str());

            let role: Arc<str> = Arc::from(role);
            let primary_items = details
                .primary_items
                .iter()
                .map(|(depth, qname)| {
                    Ok(Relationship {
                        role: role.clone(),
                        depth: *depth,
                        concept: builder.lookup(qname)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let mut explicit_dimensions = Vec::with_capacity(details.explicit_dimensions.len());
            for (dimension, members) in details.explicit_dimensions {
                let dimension = builder.lookup(&dimension)?;
                let members = members
                    .iter()
                    .map(|m| builder.lookup(m))
                    .collect::<Result<BTreeSet<_>>>()?;
                domains.entry(dimension).or_default().extend(members.iter().copied());
                explicit_dimensions.push((dimension, members));
            }
            let typed_dimensions = details
                .typed_dimensions
                .iter()
                .map(|d| builder.lookup(d))
                .collect::<Result<Vec<_>>>()?;

            let index = base_sets.len();
            base_sets_by_hypercube.entry(hypercube).or_default().push(index);
            for item in &primary_items {
                base_sets_by_primary_item.entry(item.concept).or_default().push(index);
            }
            base_sets.push(BaseSet {
                role,
                cube: Cube {
                    hypercube,
                    closed: details.closed,
                    container,
                    primary_items,
                    explicit_dimensions,
                    typed_dimensions,
                },
            });
        }

        if !open_hypercubes.is_empty() {
            return Err(Error::Taxonomy(format!(
                "Taxonomy contains open hypercubes {}. Not currently supported",
                open_hypercubes.join(", ")
            )));
        }
        let container = match containers.len() {
            0 => DimensionContainer::Scenario,
            1 if containers.contains("segment") => DimensionContainer::Segment,
            1 => DimensionContainer::Scenario,
            _ => {
                return Err(Error::Taxonomy(
                    "Multiple dimension containers specified. Not currently supported".to_string(),
                ))
            }
        };

        let hypercubes: BTreeSet<ConceptId> = base_sets.iter().map(|b| b.cube.hypercube).collect();
        let empty_hypercubes = builder
            .concepts
            .iter()
            .filter(|c| c.is_hypercube() && !hypercubes.contains(&c.id))
            .map(|c| c.id)
            .collect();

        log::debug!(
            "Loaded taxonomy {entry_point}: {} concepts, {} groups, {} base sets",
            builder.concepts.len(),
            presentation.len(),
            base_sets.len()
        );

        Ok(Taxonomy {
            entry_point,
            utr,
            concepts: builder.concepts,
            by_qname: builder.by_qname,
            by_local_name,
            by_standard_label,
            by_clean_label,
            presentation,
            base_sets,
            base_sets_by_hypercube,
            base_sets_by_primary_item,
            domains,
            defaults,
            hypercubes,
            empty_hypercubes,
            container,
        })
    }
}
