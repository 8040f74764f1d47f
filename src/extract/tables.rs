//! Table detection and row-by-row table facts.
//!
//! A range bound to a hypercube is a table envelope. Ranges wholly inside it
//! whose concepts the hypercube permits are its members; member ranges must
//! be disjoint, or share a rectangle when both are primary items.

use super::{date_from_value, fact_value, is_empty_value, join_names, BoundRange, CellAt, Extractor};
use crate::report::{FactBuilder, FactValue};
use crate::results::{Message, MessageType, Severity};
use crate::taxonomy::ConceptId;
use crate::Result;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub(crate) struct TableContents<'a> {
    pub primary_items: Vec<BoundRange<'a>>,
    pub explicit_dimensions: Vec<BoundRange<'a>>,
    pub typed_dimensions: Vec<BoundRange<'a>>,
    /// Unit ranges of the primary items.
    pub units: Vec<BoundRange<'a>>,
}

fn overlapping_pair<'r, 'a>(
    candidates: &'r [BoundRange<'a>],
    is_primary_item: impl Fn(ConceptId) -> bool,
) -> Option<(&'r BoundRange<'a>, &'r BoundRange<'a>)> {
    candidates.iter().enumerate().find_map(|(i, first)| {
        candidates[i + 1..].iter().find_map(|second| {
            let disjoint = first.range.is_disjoint(&second.range);
            let same = is_primary_item(first.concept)
                && is_primary_item(second.concept)
                && first.range == second.range;
            (!(disjoint || same)).then_some((first, second))
        })
    })
}

impl<'a> Extractor<'a> {
    pub(super) fn process_tables(&mut self) {
        let taxonomy = self.taxonomy.clone();
        let hypercubes = taxonomy.hypercubes();
        let tables: Vec<BoundRange<'a>> = self
            .bound
            .values()
            .filter(|h| hypercubes.contains(&h.concept))
            .cloned()
            .collect();
        let concepts_in_excel: BTreeSet<ConceptId> = self.bound.values().map(|h| h.concept).collect();

        let unusable: BTreeSet<ConceptId> = taxonomy
            .empty_hypercubes()
            .intersection(&concepts_in_excel)
            .copied()
            .collect();
        if !unusable.is_empty() {
            self.add(
                format!(
                    "The following hypercubes exist and have corresponding named ranges but they cannot be used due to missing taxonomy definitions: {}.",
                    join_names(&taxonomy, &unusable)
                ),
                Severity::Error,
                MessageType::DevInfo,
            );
        }

        let defaulted = taxonomy.defaulted_dimensions();
        for table in tables {
            let hypercube = table.concept;
            let mut permitted = taxonomy.dimensions_for_hypercube(hypercube);
            permitted.extend(
                taxonomy
                    .primary_items_for_hypercube(hypercube)
                    .into_iter()
                    .filter(|id| {
                        let concept = taxonomy.concept(*id);
                        concept.is_reportable() || concept.is_dimension()
                    }),
            );

            let missing: BTreeSet<ConceptId> = permitted.difference(&concepts_in_excel).copied().collect();
            if !missing.is_empty() {
                self.add(
                    format!(
                        "Expected Dimensions or Primary Items for hypercube {} have not been found: {}.",
                        table.name,
                        join_names(&taxonomy, &missing)
                    ),
                    Severity::Warning,
                    MessageType::DevInfo,
                );
            }

            let mut candidates: Vec<BoundRange<'a>> = Vec::new();
            let mut extras: Vec<String> = Vec::new();
            for holder in self.bound.values() {
                if holder.name == table.name || holder.worksheet.name() != table.worksheet.name() {
                    continue;
                }
                let concept = taxonomy.concept(holder.concept);
                if !(concept.is_reportable() || concept.is_dimension()) {
                    continue;
                }
                if table.range.is_superset(&holder.range) {
                    if permitted.contains(&holder.concept) {
                        candidates.push(holder.clone());
                    } else {
                        extras.push(holder.name.clone());
                    }
                } else if !table.range.is_disjoint(&holder.range) {
                    extras.push(holder.name.clone());
                }
            }
            if !extras.is_empty() {
                self.add(
                    format!(
                        "Extra named ranges found within/overlapping bounds of {} named range but not supported by Hypercube {}: {}.",
                        table.name,
                        taxonomy.concept(hypercube).qname(),
                        extras.join(", ")
                    ),
                    Severity::Warning,
                    MessageType::DevInfo,
                );
            }

            let absent_dimensions: BTreeSet<ConceptId> = missing
                .iter()
                .filter(|id| taxonomy.concept(**id).is_dimension() && !defaulted.contains(id))
                .copied()
                .collect();
            if !absent_dimensions.is_empty() {
                self.push(
                    Message::new(
                        format!(
                            "Table {} has no named range for required dimensions {}. No facts will be created for it.",
                            table.name,
                            join_names(&taxonomy, &absent_dimensions)
                        ),
                        Severity::Warning,
                        MessageType::Conversion,
                    )
                    .with_cell(table.reference()),
                );
                self.consume(&table, &candidates);
                continue;
            }

            if let Some((first, second)) = overlapping_pair(&candidates, |id| taxonomy.concept(id).is_reportable()) {
                self.add(
                    format!(
                        "Named range (table) {} has named ranges (primary items or dimensions) {} and {} that are neither the same nor disjoint. Ignoring table.",
                        table.name, first.name, second.name
                    ),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                );
                continue;
            }

            let mut contents = TableContents::default();
            for holder in &candidates {
                let concept = taxonomy.concept(holder.concept);
                if concept.is_reportable() {
                    if let Some(unit) = self.unit_ranges.get(&holder.concept) {
                        contents.units.push(unit.clone());
                    }
                    contents.primary_items.push(holder.clone());
                } else if concept.is_explicit_dimension() {
                    contents.explicit_dimensions.push(holder.clone());
                } else if concept.is_typed_dimension() {
                    contents.typed_dimensions.push(holder.clone());
                }
            }
            log::debug!(
                "Table {} has {} primary items, {} explicit and {} typed dimensions",
                table.name,
                contents.primary_items.len(),
                contents.explicit_dimensions.len(),
                contents.typed_dimensions.len()
            );
            self.consume(&table, &candidates);
            self.tables.push((table, contents));
        }
    }

    fn consume(&mut self, table: &BoundRange<'a>, members: &[BoundRange<'a>]) {
        self.bound.remove(&table.name);
        self.unused_names.remove(&table.name);
        for holder in members {
            self.bound.remove(&holder.name);
            self.unit_ranges.remove(&holder.concept);
        }
    }

    pub(super) fn create_table_facts(&mut self) -> Result<()> {
        let tables = std::mem::take(&mut self.tables);
        for (table, contents) in &tables {
            if contents.primary_items.is_empty() {
                self.push(
                    Message::new(
                        format!("Table {} has no primary items defined. Skipping.", table.name),
                        Severity::Error,
                        MessageType::SpreadsheetParsing,
                    )
                    .with_cell(table.reference()),
                );
                continue;
            }
            for item in &contents.primary_items {
                self.create_primary_item_facts(item, contents)?;
            }
        }
        Ok(())
    }

    fn create_primary_item_facts(&mut self, item: &BoundRange<'a>, contents: &TableContents<'a>) -> Result<()> {
        let taxonomy = self.taxonomy.clone();
        let concept = taxonomy.concept(item.concept);
        let worksheet = item.worksheet;
        let unit_holder = contents.units.iter().find(|u| u.concept == item.concept);
        let shared_range = unit_holder
            .map(|u| contents.units.iter().any(|o| o.concept != u.concept && o.same_place(u)))
            .unwrap_or(false);

        for row in item.range.rows() {
            let cells: Vec<CellAt<'a>> = item
                .range
                .columns()
                .filter_map(|col| {
                    let cell = worksheet.cell(row, col)?;
                    cell.value.as_ref()?;
                    Some(CellAt { row, col, cell })
                })
                .collect();

            // merged cells span columns but hold one value
            let cell = match cells.as_slice() {
                [] => continue,
                [only] => *only,
                [first, ..] if concept.is_enumeration_set() => *first,
                [first, ..] => {
                    let values: Vec<String> = cells.iter().map(|c| c.value().to_string()).collect();
                    self.push(
                        Message::new(
                            format!(
                                "Primary item {} spans multiple columns and has multiple values ({}) in one row. Skipping that row.",
                                item.name,
                                values.join(", ")
                            ),
                            Severity::Error,
                            MessageType::SpreadsheetParsing,
                        )
                        .with_cell(worksheet.cell_reference(first.row, first.col)),
                    );
                    continue;
                }
            };
            let values: Vec<_> = cells.iter().map(|c| c.value()).filter(|v| !is_empty_value(v)).collect();
            if values.is_empty() {
                continue;
            }

            let value = cell.value();
            let reference = worksheet.cell_reference(cell.row, cell.col);
            let display: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            let mut fb = FactBuilder::new(taxonomy.clone(), item.concept)?;
            let mut broken = false;

            if concept.is_enumeration_set() {
                fb.set_value(display.join("\n"));
            } else if concept.is_date() {
                match date_from_value(value) {
                    Ok(date) => {
                        fb.set_value(FactValue::Date(date));
                    }
                    Err(e) => {
                        broken = true;
                        self.push(
                            Message::new(e.to_string(), Severity::Error, MessageType::SpreadsheetParsing)
                                .with_concept(concept)
                                .with_cell(reference.clone()),
                        );
                    }
                }
            } else {
                fb.set_value(fact_value(value));
            }

            self.apply_preset_dimensions(item, &mut fb);

            if concept.is_numeric() {
                self.process_numeric(item, &cell, &mut fb);
                let unit_set = if concept.is_monetary() {
                    self.set_currency_for_name(item, &mut fb, Some(row), unit_holder)
                } else {
                    self.set_unit_for_name(item, &mut fb, Some(row), unit_holder, shared_range)
                };
                if !unit_set {
                    continue;
                }
            }

            for td in &contents.typed_dimensions {
                let dimension = taxonomy.concept(td.concept);
                let found = self
                    .single_cell(td, Some(row), None)
                    .filter(|at| !is_empty_value(at.value()));
                let Some(at) = found else {
                    broken = true;
                    self.push(
                        Message::new(
                            format!("Required typed dimension {dimension} not set"),
                            Severity::Error,
                            MessageType::Conversion,
                        )
                        .with_cell(td.reference()),
                    );
                    continue;
                };
                if let Err(e) = fb.set_typed_dimension(td.concept, &at.value().to_string()) {
                    broken = true;
                    self.add(e.to_string(), Severity::Error, MessageType::Conversion);
                }
            }

            for ed in &contents.explicit_dimensions {
                let dimension = taxonomy.concept(ed.concept);
                let at = self.single_cell(ed, Some(row), None);
                let text = at.map(|at| at.value().to_string()).unwrap_or_default();
                let cell_reference = at
                    .map(|at| worksheet.cell_reference(at.row, at.col))
                    .unwrap_or_else(|| ed.reference());
                let domain: Vec<ConceptId> = taxonomy
                    .domain_members_for_explicit_dimension(ed.concept)
                    .map(|members| members.iter().copied().collect())
                    .unwrap_or_default();

                let member = if text.trim().is_empty() {
                    None
                } else {
                    self.member_for_label(text.trim(), &domain)
                };
                match member {
                    Some((member, aliased)) => {
                        if aliased {
                            self.workaround_performed(ed.concept, member, &text, cell_reference);
                        }
                        if let Err(e) = fb.set_explicit_dimension(ed.concept, member) {
                            broken = true;
                            self.add(e.to_string(), Severity::Error, MessageType::Conversion);
                        }
                    }
                    None => {
                        broken = true;
                        self.push(
                            Message::new(
                                format!("Required explicit dimension {dimension} not set. Cell value '{text}'"),
                                Severity::Error,
                                MessageType::Conversion,
                            )
                            .with_cell(cell_reference),
                        );
                    }
                }
            }

            if concept.is_enumeration_single() {
                match self.resolve_enumeration_single(item.concept, &value.to_string(), &reference) {
                    Some(member) => {
                        fb.set_hidden_value(taxonomy.concept(member).expanded_name());
                    }
                    None => broken = true,
                }
            } else if concept.is_enumeration_set() {
                let mut expanded = BTreeSet::new();
                for text in &display {
                    match self.member_for_label(text.trim(), concept.domain()) {
                        Some((member, _)) => {
                            expanded.insert(taxonomy.concept(member).expanded_name());
                        }
                        None => {
                            broken = true;
                            self.push(
                                Message::new(
                                    format!("Unable to find EE concept for cell value '{text}'"),
                                    Severity::Error,
                                    MessageType::Conversion,
                                )
                                .with_concept(concept)
                                .with_cell(reference.clone()),
                            );
                        }
                    }
                }
                fb.set_hidden_value(expanded.into_iter().collect::<Vec<_>>().join(" "));
            }

            if broken {
                self.push(
                    Message::new(
                        format!("Unable to add fact with value '{}'", display.join(", ")),
                        Severity::Warning,
                        MessageType::Conversion,
                    )
                    .with_cell(reference),
                );
                continue;
            }
            self.add_fact_to_report(fb, item);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::{CellRange, Worksheet};
    use pretty_assertions::assert_eq;

    fn holder<'a>(worksheet: &'a Worksheet, name: &str, range: &str, concept: u32) -> BoundRange<'a> {
        BoundRange {
            name: name.to_string(),
            worksheet,
            range: CellRange::parse(range).unwrap(),
            effective_width: 1,
            effective_height: 1,
            cells_populated: 0,
            concept: ConceptId(concept),
        }
    }

    #[test]
    fn test_shared_primary_item_rectangle_is_not_an_overlap() {
        let sheet = Worksheet::new("Sheet1");
        let candidates = vec![
            holder(&sheet, "Revenue", "B2:B4", 1),
            holder(&sheet, "ProfitLoss", "B2:B4", 2),
            holder(&sheet, "SegmentAxis", "A2:A4", 3),
        ];
        assert!(overlapping_pair(&candidates, |id| id != ConceptId(3)).is_none());
    }

    #[test]
    fn test_partial_overlap_is_reported() {
        let sheet = Worksheet::new("Sheet1");
        let candidates = vec![
            holder(&sheet, "Revenue", "B2:B4", 1),
            holder(&sheet, "SegmentAxis", "A2:B3", 3),
        ];
        let (first, second) = overlapping_pair(&candidates, |id| id != ConceptId(3)).unwrap();
        assert_eq!(first.name, "Revenue");
        assert_eq!(second.name, "SegmentAxis");
    }
}
