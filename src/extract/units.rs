//! Unit resolution for numeric facts. Tiers run in order and the first one
//! that settles the unit wins.

use super::{BoundRange, CellAt, Extractor};
use crate::qname::{QName, XBRLI_NS};
use crate::report::{FactBuilder, MONETARY_UNITS};
use crate::results::{Message, MessageType, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

static PARENTHESIZED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((.*?)\)").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RatioUnitMeasures {
    pub numerator: Vec<QName>,
    pub denominator: Vec<QName>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CellUnit {
    Resolved(QName),
    Unresolved,
    /// Already reported; the fact must be dropped.
    Ambiguous,
}

pub(crate) fn unit_candidates(text: &str) -> Vec<String> {
    let text = text.trim();
    let mut candidates = vec![text.to_string()];
    candidates.extend(
        PARENTHESIZED_RE
            .captures_iter(text)
            .map(|c| c[1].trim().to_string()),
    );
    candidates
}

impl<'a> Extractor<'a> {
    fn units_for_candidates(&self, candidates: &[String]) -> crate::Result<Vec<QName>> {
        let utr = self.taxonomy.utr();
        let mut units: Vec<QName> = Vec::new();
        for candidate in candidates {
            if let Some(unit) = utr.qname_for_unit_id(candidate)? {
                if !units.contains(&unit) {
                    units.push(unit);
                }
            }
        }
        Ok(units)
    }

    pub(crate) fn unit_from_cell(&mut self, unit_holder: &BoundRange<'a>, cell: &CellAt<'a>) -> CellUnit {
        let text = cell.value().to_string().trim().to_string();
        if text.is_empty() {
            return CellUnit::Unresolved;
        }
        let reference = unit_holder.worksheet.cell_reference(cell.row, cell.col);
        let candidates = unit_candidates(&text);

        let mut found = self.units_for_candidates(&candidates);
        if matches!(&found, Ok(units) if units.is_empty()) {
            let cleaned: Vec<String> = candidates
                .iter()
                .map(|c| self.config.replace_unit_text(c))
                .collect();
            found = self.units_for_candidates(&cleaned);
            if let Ok(units) = &found {
                if !units.is_empty() {
                    let guessed: Vec<String> = units.iter().map(QName::to_string).collect();
                    let concept = self.taxonomy.concept(unit_holder.concept).qname().clone();
                    self.push(
                        Message::new(
                            format!(
                                "Workaround performed for mislabelled unit for {concept}. Cell value '{text}'. Unit ids now guessed '{}'",
                                guessed.join(", ")
                            ),
                            Severity::Warning,
                            MessageType::DevInfo,
                        )
                        .with_concept(concept)
                        .with_cell(reference.clone()),
                    );
                }
            }
        }

        match found {
            Ok(units) => match units.as_slice() {
                [] => CellUnit::Unresolved,
                [unit] => CellUnit::Resolved(unit.clone()),
                many => {
                    let names: Vec<String> = many.iter().map(QName::to_string).collect();
                    self.push(
                        Message::new(
                            format!(
                                "Ambiguous unit specified in cell '{text}'. Identified possible units: {}",
                                names.join(", ")
                            ),
                            Severity::Error,
                            MessageType::SpreadsheetParsing,
                        )
                        .with_cell(reference),
                    );
                    CellUnit::Ambiguous
                }
            },
            Err(e) => {
                self.push(
                    Message::new(
                        format!("Ambiguous unit specified in cell '{text}'. {e}"),
                        Severity::Error,
                        MessageType::SpreadsheetParsing,
                    )
                    .with_cell(reference),
                );
                CellUnit::Ambiguous
            }
        }
    }

    pub(crate) fn process_numeric(&mut self, holder: &BoundRange<'a>, cell: &CellAt<'a>, fb: &mut FactBuilder) {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(holder.concept);
        let decimals = cell.cell.decimal_places();
        let cell_is_percentage = cell.cell.is_percentage_format();

        if cell_is_percentage != concept.is_percent() {
            self.push(
                Message::new(
                    format!(
                        "Cell number format and XBRL Taxonomy data type disagree about percentages. Cell number format '{}'. Concept data type {}.",
                        cell.cell.number_format,
                        concept.data_type()
                    ),
                    Severity::Warning,
                    MessageType::DevInfo,
                )
                .with_concept(concept)
                .with_cell(holder.worksheet.cell_reference(cell.row, cell.col)),
            );
        }

        match cell.value().as_number() {
            Some(number) if cell_is_percentage => {
                fb.set_percentage_value(number, decimals, true);
            }
            _ => {
                fb.set_decimals(decimals as i32);
            }
        }
    }

    pub(crate) fn set_currency_for_name(
        &mut self,
        holder: &BoundRange<'a>,
        fb: &mut FactBuilder,
        row: Option<u32>,
        specified: Option<&BoundRange<'a>>,
    ) -> bool {
        let taxonomy = self.taxonomy.clone();
        let utr = taxonomy.utr();
        let unit_holder = specified
            .cloned()
            .or_else(|| self.unit_ranges.get(&holder.concept).cloned());

        if let Some(unit_holder) = unit_holder {
            if let Some(cell) = self.single_cell(&unit_holder, row, None) {
                match self.unit_from_cell(&unit_holder, &cell) {
                    CellUnit::Resolved(unit) if utr.valid_currency(&unit) => {
                        return match fb.set_currency(unit.local_name()) {
                            Ok(_) => true,
                            Err(e) => {
                                self.push(
                                    Message::new(e.to_string(), Severity::Error, MessageType::Conversion)
                                        .with_cell(unit_holder.reference()),
                                );
                                false
                            }
                        };
                    }
                    CellUnit::Resolved(unit) => self.push(
                        Message::new(
                            format!(
                                "Unit {unit} in {} is not a currency. Using the report currency.",
                                unit_holder.name
                            ),
                            Severity::Warning,
                            MessageType::DevInfo,
                        )
                        .with_cell(unit_holder.worksheet.cell_reference(cell.row, cell.col)),
                    ),
                    CellUnit::Ambiguous => return false,
                    CellUnit::Unresolved => {}
                }
            }
        }

        if self.report.default_aspect(MONETARY_UNITS).is_none() {
            self.push(
                Message::new(
                    format!("No currency found for {} and the report has no default currency.", holder.name),
                    Severity::Error,
                    MessageType::Conversion,
                )
                .with_cell(holder.reference()),
            );
            return false;
        }
        true
    }

    pub(crate) fn set_unit_for_name(
        &mut self,
        holder: &BoundRange<'a>,
        fb: &mut FactBuilder,
        row: Option<u32>,
        specified: Option<&BoundRange<'a>>,
        shared_range: bool,
    ) -> bool {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(holder.concept);
        let data_type = concept.data_type();
        let utr = taxonomy.utr();
        let in_table = specified.is_some();
        let unit_holder = specified
            .cloned()
            .or_else(|| self.unit_ranges.get(&holder.concept).cloned());

        if let Some(unit_holder) = unit_holder {
            let Some(cell) = self.single_cell(&unit_holder, row, None) else {
                self.push(
                    Message::new(
                        format!(
                            "Unable to find unit in expected part of {}. Related concept {} has coordinates {}.",
                            unit_holder.name,
                            holder.name,
                            holder.reference()
                        ),
                        Severity::Error,
                        MessageType::DevInfo,
                    )
                    .with_cell(unit_holder.reference()),
                );
                return false;
            };
            let reference = unit_holder.worksheet.cell_reference(cell.row, cell.col);
            let value = cell.value();
            match self.unit_from_cell(&unit_holder, &cell) {
                CellUnit::Resolved(unit) if utr.valid(data_type, &unit) => {
                    fb.set_simple_unit(unit);
                    return true;
                }
                CellUnit::Resolved(_) if in_table => {
                    if !shared_range {
                        self.push(
                            Message::new(
                                format!(
                                    "Unable to create fact due to specified cell value '{value}' not matching data type '{data_type}'."
                                ),
                                Severity::Warning,
                                MessageType::Conversion,
                            )
                            .with_concept(concept)
                            .with_cell(reference),
                        );
                    }
                    return false;
                }
                CellUnit::Resolved(unit) => {
                    self.push(
                        Message::new(
                            format!(
                                "Found unit {unit} for {} but it is not valid for {concept} with dataType {data_type}. Attempting fallback unit. Cell value '{value}'.",
                                unit_holder.name
                            ),
                            Severity::Error,
                            MessageType::DevInfo,
                        )
                        .with_cell(reference),
                    );
                    return self.set_fallback_unit(holder, fb);
                }
                CellUnit::Ambiguous => return false,
                CellUnit::Unresolved => self.push(
                    Message::new(
                        format!(
                            "Unable to find unit for {} using named range. Attempting to find unit via taxonomy. Cell value '{value}'.",
                            unit_holder.name
                        ),
                        Severity::Error,
                        MessageType::DevInfo,
                    )
                    .with_cell(reference),
                ),
            }
        }

        if let Some(unit) = self.concept_units.get(&holder.concept).cloned() {
            if utr.valid(data_type, &unit) {
                log::debug!("Using configured unit {unit} for {concept}");
                fb.set_simple_unit(unit);
                return true;
            }
            self.push(
                Message::new(
                    format!(
                        "Unit override in config is broken. Unit {unit} is not valid for {concept} with dataType {data_type}."
                    ),
                    Severity::Error,
                    MessageType::DevInfo,
                )
                .with_cell(holder.reference()),
            );
        }

        match concept.required_units() {
            [] => {}
            [unit] => {
                fb.set_simple_unit(unit.clone());
                return true;
            }
            units => {
                let names: Vec<String> = units.iter().map(QName::to_string).collect();
                self.push(
                    Message::new(
                        format!(
                            "No unit found in Excel for {}. More than one unit specified as possible in the taxonomy: {}.",
                            holder.name,
                            names.join(", ")
                        ),
                        Severity::Warning,
                        MessageType::Conversion,
                    )
                    .with_concept(concept)
                    .with_cell(holder.reference()),
                );
                return false;
            }
        }

        for unit_id in utr.unit_ids_for_data_type(data_type) {
            let Some(measures) = self.ratio_units.get(unit_id) else {
                continue;
            };
            return match fb.set_complex_unit(&measures.numerator, &measures.denominator) {
                Ok(_) => true,
                Err(e) => {
                    self.add(
                        format!("Configured unit {unit_id} cannot be used for {concept}. {e}"),
                        Severity::Error,
                        MessageType::DevInfo,
                    );
                    false
                }
            };
        }

        self.set_fallback_unit(holder, fb)
    }

    fn set_fallback_unit(&mut self, holder: &BoundRange<'a>, fb: &mut FactBuilder) -> bool {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(holder.concept);
        if !concept.is_numeric() {
            return false;
        }
        let data_type = concept.data_type();
        let utr = taxonomy.utr();

        if let Some(unit) = self.data_type_units.get(data_type).cloned() {
            if utr.valid(data_type, &unit) {
                fb.set_simple_unit(unit);
                return true;
            }
        }

        if let Some(chosen) = utr.units_for_data_type(data_type).first() {
            self.add(
                format!("Picked fallback unit (from UTR) {chosen} for {}", holder.name),
                Severity::Warning,
                MessageType::DevInfo,
            );
            fb.set_simple_unit(chosen.clone());
            return true;
        }

        // no registered units, so pure cannot fail registry validation
        match utr.namespaces().qname(XBRLI_NS, "pure") {
            Ok(pure) => {
                self.add(
                    format!("Used ultimate fallback unit {pure} for {}", holder.name),
                    Severity::Warning,
                    MessageType::DevInfo,
                );
                fb.set_simple_unit(pure);
                true
            }
            Err(e) => {
                self.add(e.to_string(), Severity::Error, MessageType::DevInfo);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::{entry_config, entry_workbook, registry_for, texts};
    use crate::results::ConversionResultsBuilder;
    use crate::taxonomy::tests::fixture;
    use crate::workbook::CellRange;
    use pretty_assertions::assert_eq;

    const ENTRY_POINT: &str = "https://example.com/xbrl/demo/demo-all.xsd";

    fn unit_without_cell(concept: &str) -> (bool, ConversionResultsBuilder) {
        let registry = registry_for(fixture());
        let workbook = entry_workbook(ENTRY_POINT);
        let config = entry_config();
        let mut results = ConversionResultsBuilder::new();
        let mut extractor = Extractor::new(&registry, &workbook, &config, &mut results).unwrap();
        let taxonomy = extractor.taxonomy().clone();
        let id = taxonomy.resolve(concept).unwrap().id();
        let holder = BoundRange {
            name: taxonomy.concept(id).qname().local_name().to_string(),
            worksheet: workbook.sheet("Cover").unwrap(),
            range: CellRange::parse("B2").unwrap(),
            effective_width: 1,
            effective_height: 1,
            cells_populated: 1,
            concept: id,
        };
        let mut fb = FactBuilder::new(taxonomy.clone(), id).unwrap();
        let set = extractor.set_unit_for_name(&holder, &mut fb, None, None, false);
        (set, results)
    }

    #[test]
    fn test_single_required_unit_is_used() {
        let (set, results) = unit_without_cell("demo:Energy");
        assert!(set);
        assert!(results.messages().is_empty());
    }

    #[test]
    fn test_several_required_units_drop_the_fact() {
        // "ha or m2"
        let (set, results) = unit_without_cell("demo:Area");
        assert!(!set);
        let warnings: Vec<&Message> = results
            .messages()
            .iter()
            .filter(|m| m.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message_type, MessageType::Conversion);
        assert!(warnings[0].text.contains("More than one unit specified as possible in the taxonomy"));
    }

    #[test]
    fn test_first_registered_unit_is_the_fallback() {
        let (set, results) = unit_without_cell("demo:SiteArea");
        assert!(set);
        assert_eq!(
            texts(&results, Severity::Warning),
            vec!["Picked fallback unit (from UTR) utr:ha for SiteArea".to_string()]
        );
    }

    #[test]
    fn test_unit_candidates() {
        assert_eq!(unit_candidates(" EUR "), vec!["EUR"]);
        assert_eq!(unit_candidates("Tonnes (t)"), vec!["Tonnes (t)", "t"]);
        assert_eq!(
            unit_candidates("Megawatt hours (MWh) or (GJ)"),
            vec!["Megawatt hours (MWh) or (GJ)", "MWh", "GJ"]
        );
    }
}
