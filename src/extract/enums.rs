//! Enumeration values: cell text or ticked boxes to domain members.

use super::fuzzy::close_matches;
use super::{BoundRange, Extractor, EMPTY_SET_PLACEHOLDER};
use crate::report::FactBuilder;
use crate::results::{Message, MessageType, Severity};
use crate::taxonomy::{strip_label_suffix, ConceptId, Taxonomy};
use crate::workbook::CellValue;
use std::collections::BTreeSet;

const FUZZY_CUTOFF: f64 = 0.6;

fn domain_as_text(taxonomy: &Taxonomy, domain: &[ConceptId]) -> String {
    domain
        .iter()
        .map(|id| taxonomy.concept(*id).qname().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn checkbox_index(holder: &BoundRange<'_>, row: u32, col: u32) -> usize {
    let range = &holder.range;
    let row_index = (row - range.min_row) as usize;
    let col_index = (col - range.min_col) as usize;
    if range.height() == 1 {
        col_index
    } else if range.width() == 1 {
        row_index
    } else if holder.effective_height < holder.effective_width {
        col_index
    } else {
        row_index
    }
}

impl<'a> Extractor<'a> {
    fn concept_for_label_in(&mut self, label: &str, domain: &[ConceptId]) -> Option<ConceptId> {
        let taxonomy = self.taxonomy.clone();
        match taxonomy.concept_for_label(label) {
            Ok(found) => found.map(|c| c.id()).filter(|id| domain.contains(id)),
            Err(e) => {
                self.add(
                    format!("Unable to resolve label '{label}'. {e}"),
                    Severity::Error,
                    MessageType::Conversion,
                );
                None
            }
        }
    }

    pub(crate) fn member_for_label(&mut self, label: &str, domain: &[ConceptId]) -> Option<(ConceptId, bool)> {
        if let Some(member) = self.concept_for_label_in(label, domain) {
            return Some((member, false));
        }
        let config = self.config;
        let alias = config.cell_values_to_taxonomy_labels.get(label)?;
        self.concept_for_label_in(alias, domain)
            .map(|member| (member, true))
    }

    pub(crate) fn workaround_performed(&mut self, concept: ConceptId, member: ConceptId, value: &str, reference: String) {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(concept);
        let label = taxonomy.concept(member).standard_label().unwrap_or_default();
        self.push(
            Message::new(
                format!(
                    "Workaround performed for EE member label mismatch when reporting {concept}. Cell value '{value}'. Concept label '{label}'"
                ),
                Severity::Warning,
                MessageType::DevInfo,
            )
            .with_concept(concept)
            .with_cell(reference),
        );
    }

    pub(crate) fn resolve_enumeration_single(
        &mut self,
        concept: ConceptId,
        value: &str,
        reference: &str,
    ) -> Option<ConceptId> {
        let taxonomy = self.taxonomy.clone();
        let domain = taxonomy.concept(concept).domain();

        if let Some((member, aliased)) = self.member_for_label(value, domain) {
            if aliased {
                self.workaround_performed(concept, member, value, reference.to_string());
            }
            return Some(member);
        }

        let labels: Vec<(String, ConceptId)> = domain
            .iter()
            .filter_map(|id| {
                let label = taxonomy.concept(*id).standard_label()?;
                Some((strip_label_suffix(label).trim().to_string(), *id))
            })
            .collect();
        let matches = close_matches(value, labels.iter().map(|(l, _)| l.as_str()), FUZZY_CUTOFF);
        let concept = taxonomy.concept(concept);

        if let [(label, _)] = matches.as_slice() {
            if let Some((_, member)) = labels.iter().find(|(l, _)| l == label) {
                self.push(
                    Message::new(
                        format!(
                            "Using closest match EE concept when reporting {concept}. Cell value '{value}'. Chosen EE domain member: {}; part of label used: '{label}'",
                            taxonomy.concept(*member).qname()
                        ),
                        Severity::Warning,
                        MessageType::Conversion,
                    )
                    .with_concept(concept)
                    .with_cell(reference),
                );
                return Some(*member);
            }
        }

        self.push(
            Message::new(
                format!(
                    "Unable to find EE concept when reporting {concept}. Cell value '{value}'. EE domain: {}",
                    domain_as_text(&taxonomy, domain)
                ),
                Severity::Error,
                MessageType::Conversion,
            )
            .with_concept(concept)
            .with_cell(reference),
        );
        None
    }

    pub(crate) fn create_enumeration_set_fact(&mut self, holder: &BoundRange<'a>, mut fb: FactBuilder) {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(holder.concept);
        let domain = concept.domain();
        let worksheet = holder.worksheet;
        let mut members: BTreeSet<ConceptId> = BTreeSet::new();
        let mut labels: Vec<String> = Vec::new();
        self.unused_names.remove(&holder.name);

        for row in holder.range.rows() {
            for col in holder.range.columns() {
                let Some(value) = worksheet.value(row, col) else {
                    continue;
                };
                let reference = worksheet.cell_reference(row, col);
                match value {
                    CellValue::Bool(false) => {}
                    CellValue::Bool(true) => {
                        let index = checkbox_index(holder, row, col);
                        match domain.get(index) {
                            Some(member) => {
                                members.insert(*member);
                                labels.push(taxonomy.concept(*member).display_label());
                            }
                            None => {
                                log::error!(
                                    "Ticked box outside domain in named range {} at {reference}: index {index} of {}",
                                    holder.name,
                                    domain.len()
                                );
                                self.push(
                                    Message::new(
                                        "Failed to process enumeration value",
                                        Severity::Error,
                                        MessageType::SpreadsheetParsing,
                                    )
                                    .with_concept(concept)
                                    .with_cell(reference),
                                );
                            }
                        }
                    }
                    CellValue::Text(text) if text == EMPTY_SET_PLACEHOLDER => labels.push(text.clone()),
                    CellValue::Text(text) => match self.member_for_label(text, domain) {
                        Some((member, aliased)) => {
                            if aliased {
                                self.workaround_performed(holder.concept, member, text, reference);
                            }
                            members.insert(member);
                            labels.push(text.clone());
                        }
                        None => self.push(
                            Message::new(
                                format!("Unable to find EE member when reporting {concept}. Cell value '{text}'."),
                                Severity::Error,
                                MessageType::SpreadsheetParsing,
                            )
                            .with_concept(concept)
                            .with_cell(reference),
                        ),
                    },
                    other => self.push(
                        Message::new(
                            format!("Unable to find EE domain member when reporting {concept}. Cell value '{other}'"),
                            Severity::Error,
                            MessageType::Conversion,
                        )
                        .with_concept(concept)
                        .with_cell(reference),
                    ),
                }
            }
        }

        if labels.iter().any(|l| l == EMPTY_SET_PLACEHOLDER) {
            if labels.iter().any(|l| l != EMPTY_SET_PLACEHOLDER) {
                self.push(
                    Message::new(
                        format!(
                            "Inconsistent values found for EE set {concept}. Not creating an XBRL fact. Cell values '{}'",
                            labels.join(", ")
                        ),
                        Severity::Error,
                        MessageType::Conversion,
                    )
                    .with_concept(concept)
                    .with_cell(holder.reference()),
                );
                return;
            }
            fb.set_hidden_value("").set_value(EMPTY_SET_PLACEHOLDER);
        } else if members.is_empty() {
            self.push(
                Message::new(
                    format!("No values found for {concept} so not creating an empty XBRL fact."),
                    Severity::Info,
                    MessageType::DevInfo,
                )
                .with_concept(concept)
                .with_cell(holder.reference()),
            );
            return;
        } else {
            let mut expanded: Vec<String> = members
                .iter()
                .map(|id| taxonomy.concept(*id).expanded_name())
                .collect();
            expanded.sort();
            fb.set_hidden_value(expanded.join(" ")).set_value(labels.join("\n"));
        }

        self.apply_preset_dimensions(holder, &mut fb);
        self.add_fact_to_report(fb, holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::{entry_config, entry_workbook, registry_for, texts};
    use crate::results::ConversionResultsBuilder;
    use crate::taxonomy::TaxonomyDescription;
    use crate::utr::UtrDocument;
    use pretty_assertions::assert_eq;

    const ENTRY_POINT: &str = "https://example.com/waste.xsd";
    const UTR_JSON: &str = include_str!("../../tests/fixtures/utr.json");

    fn member(label: &str) -> String {
        format!(
            r#"{{"dataType": "xbrli:stringItemType", "baseDataType": "xbrli:stringItemType", "periodType": "duration", "abstract": true, "labels": {{"en": {{"http://www.xbrl.org/2003/role/label": "{label} [member]"}}}}}}"#
        )
    }

    fn waste_taxonomy() -> Taxonomy {
        let json = format!(
            r#"{{
            "entryPoint": "{ENTRY_POINT}",
            "namespaces": {{"w": "https://example.com/waste"}},
            "concepts": {{
                "w:Treatment": {{"dataType": "enum2:enumerationItemType", "baseDataType": "xbrli:tokenItemType", "periodType": "duration", "labels": {{}}, "other": {{"ee20DomainMembers": ["w:RecycledMember", "w:RecyclingMember", "w:LandfillMember"]}}}},
                "w:RecycledMember": {},
                "w:RecyclingMember": {},
                "w:LandfillMember": {}
            }}
        }}"#,
            member("Recycled"),
            member("Recycling"),
            member("Landfill"),
        );
        let description = TaxonomyDescription::from_json_str(&json).unwrap();
        Taxonomy::load(description, UtrDocument::from_json_str(UTR_JSON).unwrap()).unwrap()
    }

    fn resolve(value: &str) -> (Option<String>, ConversionResultsBuilder) {
        let registry = registry_for(waste_taxonomy());
        let workbook = entry_workbook(ENTRY_POINT);
        let config = entry_config();
        let mut results = ConversionResultsBuilder::new();
        let mut extractor = Extractor::new(&registry, &workbook, &config, &mut results).unwrap();
        let taxonomy = extractor.taxonomy().clone();
        let treatment = taxonomy.resolve("w:Treatment").unwrap().id();
        let found = extractor
            .resolve_enumeration_single(treatment, value, "Cover!$B$2")
            .map(|id| taxonomy.concept(id).qname().local_name().to_string());
        (found, results)
    }

    #[test]
    fn test_exact_label_needs_no_close_match() {
        let (found, results) = resolve("Recycled");
        assert_eq!(found.as_deref(), Some("RecycledMember"));
        assert!(results.messages().is_empty());
    }

    #[test]
    fn test_single_close_match_is_a_warning() {
        let (found, results) = resolve("Landfil");
        assert_eq!(found.as_deref(), Some("LandfillMember"));
        let warnings = texts(&results, Severity::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Using closest match"));
    }

    #[test]
    fn test_two_close_matches_are_an_error() {
        // "Recycled" and "Recycling" both clear the cutoff
        let (found, results) = resolve("Recycle");
        assert_eq!(found, None);
        assert!(texts(&results, Severity::Warning).is_empty());
        let errors = texts(&results, Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Unable to find EE concept"));
    }

    #[test]
    fn test_nothing_close_is_an_error() {
        let (found, results) = resolve("Incineration");
        assert_eq!(found, None);
        assert_eq!(texts(&results, Severity::Error).len(), 1);
    }

    #[test]
    fn test_checkbox_index_follows_the_longer_side() {
        let sheet = crate::workbook::Worksheet::new("Sheet1");
        let holder = BoundRange {
            name: "Certifications".to_string(),
            worksheet: &sheet,
            range: crate::workbook::CellRange::parse("B10:E10").unwrap(),
            effective_width: 4,
            effective_height: 1,
            cells_populated: 4,
            concept: ConceptId(0),
        };
        assert_eq!(checkbox_index(&holder, 10, 3), 1);
        assert_eq!(checkbox_index(&holder, 10, 5), 3);
    }
}
