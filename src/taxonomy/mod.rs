//! Queryable taxonomy model: concepts, presentation groups and the
//! dimensional (hypercube) structure, built once and read-only afterwards.

mod concept;
pub mod loader;
pub mod registry;

pub use concept::{
    clean_label, strip_label_suffix, Concept, ConceptFlags, ConceptId, PeriodType,
    DEFAULT_LANGUAGE, DOCUMENTATION_LABEL_ROLE, MEASUREMENT_GUIDANCE_LABEL_ROLE,
    STANDARD_LABEL_ROLE,
};
pub use loader::TaxonomyDescription;

use crate::qname::QName;
use crate::utr::UnitRegistry;
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PresentationStyle {
    /// No reportable concepts.
    Empty,
    /// Reportable concepts, none dimensionally qualified.
    List,
    /// Every reportable concept sits inside a hypercube.
    Table,
    /// A mixture of the two. Not supported downstream.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionContainer {
    Segment,
    Scenario,
}

impl DimensionContainer {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionContainer::Segment => "segment",
            DimensionContainer::Scenario => "scenario",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub role: Arc<str>,
    pub depth: u32,
    pub concept: ConceptId,
}

#[derive(Debug, Clone)]
pub struct PresentationGroup {
    pub role: Arc<str>,
    pub label: String,
    pub labels: BTreeMap<String, String>,
    pub relationships: Vec<Relationship>,
    pub style: PresentationStyle,
}

/// One hypercube definition inside a base set.
#[derive(Debug, Clone)]
pub struct Cube {
    pub hypercube: ConceptId,
    pub closed: bool,
    pub container: DimensionContainer,
    pub primary_items: Vec<Relationship>,
    pub explicit_dimensions: Vec<(ConceptId, BTreeSet<ConceptId>)>,
    pub typed_dimensions: Vec<ConceptId>,
}

#[derive(Debug, Clone)]
pub struct BaseSet {
    pub role: Arc<str>,
    pub cube: Cube,
}

pub struct Taxonomy {
    pub(crate) entry_point: String,
    pub(crate) utr: UnitRegistry,
    pub(crate) concepts: Vec<Concept>,
    pub(crate) by_qname: AHashMap<QName, ConceptId>,
    pub(crate) by_local_name: AHashMap<CompactString, Vec<ConceptId>>,
    pub(crate) by_standard_label: AHashMap<String, BTreeSet<ConceptId>>,
    pub(crate) by_clean_label: AHashMap<String, BTreeSet<ConceptId>>,
    pub(crate) presentation: Vec<PresentationGroup>,
    pub(crate) base_sets: Vec<BaseSet>,
    pub(crate) base_sets_by_hypercube: AHashMap<ConceptId, Vec<usize>>,
    pub(crate) base_sets_by_primary_item: AHashMap<ConceptId, Vec<usize>>,
    pub(crate) domains: AHashMap<ConceptId, BTreeSet<ConceptId>>,
    pub(crate) defaults: AHashMap<ConceptId, ConceptId>,
    pub(crate) hypercubes: BTreeSet<ConceptId>,
    pub(crate) empty_hypercubes: BTreeSet<ConceptId>,
    pub(crate) container: DimensionContainer,
}

impl Taxonomy {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn utr(&self) -> &UnitRegistry {
        &self.utr
    }

    /// Prefix/namespace bindings in declaration order.
    pub fn namespace_prefixes(&self) -> Vec<(&str, &str)> {
        self.utr.namespaces().bindings().collect()
    }

    pub fn parse_qname(&self, qname: &str) -> Result<QName> {
        self.utr.namespaces().parse(qname)
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn concept(&self, id: ConceptId) -> &Concept {
        &self.concepts[id.index()]
    }

    pub fn concept_by_qname(&self, qname: &QName) -> Option<&Concept> {
        self.by_qname.get(qname).map(|id| self.concept(*id))
    }

    /// Looks up a `prefix:local` string, failing when it names no concept.
    pub fn resolve(&self, qname: &str) -> Result<&Concept> {
        let parsed = self.parse_qname(qname)?;
        self.concept_by_qname(&parsed)
            .ok_or_else(|| Error::Taxonomy(format!("Unknown concept {qname}")))
    }

    /// Concept with the given local name in any namespace.
    pub fn concept_for_name(&self, name: &str) -> Result<Option<&Concept>> {
        match self.by_local_name.get(name).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([id]) => Ok(Some(self.concept(*id))),
            Some(ids) => Err(Error::AmbiguousComponent(format!(
                "Ambiguous name specified. Candidate concepts: {}",
                self.join_qnames(ids.iter())
            ))),
        }
    }

    /// Exact standard label first, then the cleaned label, then the cleaned
    /// label lowercased.
    pub fn concept_for_label(&self, label: &str) -> Result<Option<&Concept>> {
        let empty = BTreeSet::new();
        let mut possible = self.by_standard_label.get(label).unwrap_or(&empty);
        if possible.is_empty() {
            let cleaned = clean_label(label);
            possible = self.by_clean_label.get(&cleaned).unwrap_or(&empty);
            if possible.is_empty() {
                possible = self
                    .by_clean_label
                    .get(&cleaned.to_lowercase())
                    .unwrap_or(&empty);
            }
        }
        let mut iter = possible.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Ok(None),
            (Some(id), None) => Ok(Some(self.concept(*id))),
            _ => {
                let mut names: Vec<String> =
                    possible.iter().map(|id| self.concept(*id).qname().to_string()).collect();
                names.sort();
                Err(Error::AmbiguousComponent(format!(
                    "Ambiguous label specified. Candidate concepts: {}",
                    names.join(", ")
                )))
            }
        }
    }

    fn join_qnames<'a>(&self, ids: impl Iterator<Item = &'a ConceptId>) -> String {
        ids.map(|id| self.concept(*id).qname().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn presentation(&self) -> &[PresentationGroup] {
        &self.presentation
    }

    pub fn base_sets(&self) -> &[BaseSet] {
        &self.base_sets
    }

    /// Hypercubes used in the dimensional structure.
    pub fn hypercubes(&self) -> &BTreeSet<ConceptId> {
        &self.hypercubes
    }

    /// Hypercube concepts that no base set uses.
    pub fn empty_hypercubes(&self) -> &BTreeSet<ConceptId> {
        &self.empty_hypercubes
    }

    pub fn dimension_container(&self) -> DimensionContainer {
        self.container
    }

    fn cubes_for_hypercube(&self, hypercube: ConceptId) -> impl Iterator<Item = &Cube> {
        self.base_sets_by_hypercube
            .get(&hypercube)
            .into_iter()
            .flatten()
            .map(|i| &self.base_sets[*i].cube)
    }

    fn cubes_for_primary_item(&self, primary_item: ConceptId) -> impl Iterator<Item = &Cube> {
        self.base_sets_by_primary_item
            .get(&primary_item)
            .into_iter()
            .flatten()
            .map(|i| &self.base_sets[*i].cube)
    }

    pub fn hypercubes_for_primary_item(&self, primary_item: ConceptId) -> BTreeSet<ConceptId> {
        self.cubes_for_primary_item(primary_item)
            .map(|cube| cube.hypercube)
            .collect()
    }

    pub fn typed_dimensions_for_hypercube(&self, hypercube: ConceptId) -> BTreeSet<ConceptId> {
        self.cubes_for_hypercube(hypercube)
            .flat_map(|cube| cube.typed_dimensions.iter().copied())
            .collect()
    }

    pub fn explicit_dimensions_for_hypercube(&self, hypercube: ConceptId) -> BTreeSet<ConceptId> {
        self.cubes_for_hypercube(hypercube)
            .flat_map(|cube| cube.explicit_dimensions.iter().map(|(dim, _)| *dim))
            .collect()
    }

    pub fn dimensions_for_hypercube(&self, hypercube: ConceptId) -> BTreeSet<ConceptId> {
        let mut dimensions = self.explicit_dimensions_for_hypercube(hypercube);
        dimensions.extend(self.typed_dimensions_for_hypercube(hypercube));
        dimensions
    }

    pub fn primary_items_for_hypercube(&self, hypercube: ConceptId) -> BTreeSet<ConceptId> {
        self.cubes_for_hypercube(hypercube)
            .flat_map(|cube| cube.primary_items.iter().map(|r| r.concept))
            .collect()
    }

    pub fn explicit_dimensions_for_primary_item(&self, primary_item: ConceptId) -> BTreeSet<ConceptId> {
        self.hypercubes_for_primary_item(primary_item)
            .into_iter()
            .flat_map(|hc| self.explicit_dimensions_for_hypercube(hc))
            .collect()
    }

    pub fn typed_dimensions_for_primary_item(&self, primary_item: ConceptId) -> BTreeSet<ConceptId> {
        self.hypercubes_for_primary_item(primary_item)
            .into_iter()
            .flat_map(|hc| self.typed_dimensions_for_hypercube(hc))
            .collect()
    }

    /// The explicit dimension on the primary item whose domain admits the member.
    pub fn explicit_dimension_for_domain_member(
        &self,
        primary_item: ConceptId,
        member: ConceptId,
    ) -> Result<Option<ConceptId>> {
        let possible: BTreeSet<ConceptId> = self
            .cubes_for_primary_item(primary_item)
            .flat_map(|cube| cube.explicit_dimensions.iter())
            .filter(|(_, domain)| domain.contains(&member))
            .map(|(dim, _)| *dim)
            .collect();
        let mut iter = possible.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Ok(None),
            (Some(dim), None) => Ok(Some(*dim)),
            _ => Err(Error::AmbiguousComponent(format!(
                "Ambiguous domain member specified. Candidate dimensions: {}",
                self.join_qnames(possible.iter())
            ))),
        }
    }

    /// Domain members of the dimension, aggregated over every base set.
    pub fn domain_members_for_explicit_dimension(&self, dimension: ConceptId) -> Option<&BTreeSet<ConceptId>> {
        self.domains.get(&dimension)
    }

    pub fn is_domain_member(&self, dimension: ConceptId, member: ConceptId) -> bool {
        self.domains
            .get(&dimension)
            .is_some_and(|domain| domain.contains(&member))
    }

    pub fn dimension_default(&self, dimension: ConceptId) -> Option<ConceptId> {
        self.defaults.get(&dimension).copied()
    }

    pub fn defaulted_dimensions(&self) -> BTreeSet<ConceptId> {
        self.defaults.keys().copied().collect()
    }

    pub fn required_units(&self, concept: ConceptId) -> &[QName] {
        self.concept(concept).required_units()
    }
}

impl std::fmt::Debug for Taxonomy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Taxonomy")
            .field("entry_point", &self.entry_point)
            .field("concepts", &self.concepts.len())
            .field("groups", &self.presentation.len())
            .field("hypercubes", &self.hypercubes.len())
            .finish()
    }
}
