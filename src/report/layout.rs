// Rebuilds presentation sections and tables from a flat fact set
use super::fact::{unwrap_typed_value, Fact};
use super::{Period, Report};
use crate::taxonomy::{Concept, ConceptId, PresentationGroup, PresentationStyle, Relationship, Taxonomy};
use crate::{Error, Result};
use ahash::AHashMap;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TableStyle {
    /// Rows are typed dimension values, columns are reportable concepts.
    SingleTypedDimensionColumn,
    /// Rows are reportable concepts, columns are domain members.
    SingleExplicitDimensionColumn,
    /// Rows are domain members, columns are reportable concepts.
    SingleExplicitDimensionRow,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeadingValue {
    Concept(ConceptId),
    Period(Period),
    Text(String),
    Empty,
}

impl HeadingValue {
    pub fn is_period(&self) -> bool {
        matches!(self, HeadingValue::Period(_))
    }

    pub fn is_concept(&self) -> bool {
        matches!(self, HeadingValue::Concept(_))
    }

    /// Human text for the heading: concept labels lose their `[...]` suffix.
    pub fn render(&self, taxonomy: &Taxonomy) -> String {
        match self {
            HeadingValue::Concept(id) => taxonomy.concept(*id).display_label(),
            HeadingValue::Period(period) => period.to_string(),
            HeadingValue::Text(text) => text.clone(),
            HeadingValue::Empty => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableHeadingCell {
    pub value: HeadingValue,
    pub colspan: usize,
    pub rowspan: usize,
    pub numeric: bool,
}

impl TableHeadingCell {
    fn new(value: HeadingValue, colspan: usize, rowspan: usize, numeric: bool) -> Self {
        Self {
            value,
            colspan,
            rowspan,
            numeric,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableLayout<'a> {
    pub style: TableStyle,
    /// Heading over the row headings, then one heading per data column.
    pub columns: Vec<HeadingValue>,
    pub row_headings: Vec<HeadingValue>,
    pub data: Vec<Vec<Option<&'a Fact>>>,
    pub column_units: Vec<Option<String>>,
    pub column_periods: Vec<Option<Period>>,
    pub heading_rows: Vec<Vec<TableHeadingCell>>,
    pub numeric: bool,
    pub unit_symbol: Option<String>,
    pub period: Option<Period>,
}

impl TableLayout<'_> {
    pub fn row_headings_have_title(&self) -> bool {
        self.columns
            .first()
            .is_some_and(|c| !matches!(c, HeadingValue::Empty))
    }

    pub fn column_has_unit(&self, column: usize) -> bool {
        self.column_units.get(column).is_some_and(Option::is_some)
    }
}

#[derive(Debug, Clone)]
pub struct ReportSection<'a> {
    pub group: &'a PresentationGroup,
    pub facts: Vec<(&'a Relationship, Vec<&'a Fact>)>,
    pub table: Option<TableLayout<'a>>,
}

impl<'a> ReportSection<'a> {
    pub fn title(&self) -> &str {
        &self.group.label
    }

    pub fn style(&self) -> PresentationStyle {
        self.group.style
    }

    pub fn is_tabular(&self) -> bool {
        self.table.is_some()
    }

    pub fn has_facts(&self) -> bool {
        match &self.table {
            Some(table) => table.data.iter().flatten().any(Option::is_some),
            None => {
                self.group.style != PresentationStyle::Empty
                    && self.facts.iter().any(|(_, facts)| !facts.is_empty())
            }
        }
    }

    fn referenced_facts(&self) -> Vec<&'a Fact> {
        match &self.table {
            Some(table) => table.data.iter().flatten().flatten().copied().collect(),
            None => self.facts.iter().flat_map(|(_, f)| f.iter().copied()).collect(),
        }
    }
}

/// A fact no section shows, with same-aspect facts that disagree on value.
#[derive(Debug, Clone)]
pub struct UnusedFact<'a> {
    pub fact: &'a Fact,
    pub inconsistent_duplicates: Vec<&'a Fact>,
}

pub struct ReportLayoutOrganiser<'a> {
    report: &'a Report,
    taxonomy: &'a Taxonomy,
    facts_by_concept: AHashMap<ConceptId, Vec<&'a Fact>>,
}

fn numeric_string_key(value: &str) -> (u8, i64, String) {
    match value.trim().parse::<i64>() {
        Ok(n) => (0, n, String::new()),
        Err(_) => (1, 0, value.to_string()),
    }
}

impl<'a> ReportLayoutOrganiser<'a> {
    pub fn new(report: &'a Report) -> Self {
        let mut facts_by_concept: AHashMap<ConceptId, Vec<&'a Fact>> = AHashMap::new();
        for fact in report.facts() {
            facts_by_concept.entry(fact.concept()).or_default().push(fact);
        }
        Self {
            report,
            taxonomy: report.taxonomy(),
            facts_by_concept,
        }
    }

    fn facts_for(&self, concept: ConceptId) -> &[&'a Fact] {
        self.facts_by_concept
            .get(&concept)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sections sorted by group label, tables filled in.
    pub fn organise(&self) -> Result<Vec<ReportSection<'a>>> {
        let mut sections = self
            .taxonomy
            .presentation()
            .iter()
            .map(|group| self.section(group))
            .collect::<Result<Vec<_>>>()?;
        sections.sort_by(|a, b| a.group.label.cmp(&b.group.label));

        for unused in self.unused_facts(&sections) {
            if unused.inconsistent_duplicates.is_empty() {
                log::warn!("Fact not shown in any section: {}", unused.fact);
            } else {
                let others: Vec<String> = unused
                    .inconsistent_duplicates
                    .iter()
                    .map(|f| f.to_string())
                    .collect();
                log::warn!(
                    "Fact has inconsistent duplicates. Unused: {} Others: {}",
                    unused.fact,
                    others.join("; ")
                );
            }
        }
        Ok(sections)
    }

    fn section(&self, group: &'a PresentationGroup) -> Result<ReportSection<'a>> {
        let mut facts: Vec<(&'a Relationship, Vec<&'a Fact>)> = Vec::new();
        if group.style != PresentationStyle::Empty {
            for rel in &group.relationships {
                let Some(for_concept) = self.facts_by_concept.get(&rel.concept) else {
                    continue;
                };
                let chosen: Vec<&'a Fact> = match group.style {
                    PresentationStyle::List => for_concept
                        .iter()
                        .copied()
                        .filter(|f| !f.has_taxonomy_dimensions())
                        .collect(),
                    _ => for_concept.clone(),
                };
                facts.push((rel, chosen));
            }
        }

        let table = match group.style {
            PresentationStyle::Empty | PresentationStyle::List => None,
            PresentationStyle::Hybrid => {
                return Err(Error::Report(format!(
                    "Presentation group style (Hybrid) of [{}] is not currently supported.",
                    group.role
                )))
            }
            PresentationStyle::Table => Some(self.table(group)?),
        };
        Ok(ReportSection { group, facts, table })
    }

    fn concepts_where(&self, group: &PresentationGroup, pred: impl Fn(&Concept) -> bool) -> Vec<ConceptId> {
        group
            .relationships
            .iter()
            .map(|r| r.concept)
            .filter(|id| pred(self.taxonomy.concept(*id)))
            .collect()
    }

    fn table(&self, group: &PresentationGroup) -> Result<TableLayout<'a>> {
        let hypercubes = self.concepts_where(group, Concept::is_hypercube);
        if hypercubes.len() != 1 {
            return Err(Error::Report(format!(
                "Presentation structure of [{}] is not currently supported.",
                group.role
            )));
        }
        let typed = self.concepts_where(group, Concept::is_typed_dimension);
        let explicit = self.concepts_where(group, Concept::is_explicit_dimension);
        let reportable = self.concepts_where(group, Concept::is_reportable);

        let mut style = TableStyle::Other;
        let mut columns: Vec<HeadingValue> = Vec::new();
        let mut row_headings: Vec<HeadingValue> = Vec::new();
        let mut data: Vec<Vec<Option<&'a Fact>>> = Vec::new();

        match (typed.as_slice(), explicit.as_slice()) {
            ([typed_dim], []) => {
                style = TableStyle::SingleTypedDimensionColumn;
                let dim = self.taxonomy.concept(*typed_dim).qname();
                let values: BTreeSet<&str> = reportable
                    .iter()
                    .flat_map(|c| self.facts_for(*c))
                    .filter_map(|f| f.typed_member(dim))
                    .collect();
                let mut keyed: Vec<(&str, &str)> =
                    values.into_iter().map(|v| (unwrap_typed_value(v), v)).collect();
                keyed.sort_by_key(|(pretty, _)| numeric_string_key(pretty));

                for (pretty, raw) in keyed {
                    let row: Vec<Option<&'a Fact>> = reportable
                        .iter()
                        .map(|c| self.find(group, style, *c, |f| f.typed_member(dim) == Some(raw)))
                        .collect();
                    if row.iter().any(Option::is_some) {
                        data.push(row);
                        row_headings.push(HeadingValue::Text(pretty.to_string()));
                    }
                }
                columns.push(HeadingValue::Concept(*typed_dim));
                columns.extend(reportable.iter().map(|c| HeadingValue::Concept(*c)));
            }
            ([], [explicit_dim]) => {
                let dim_qname = self.taxonomy.concept(*explicit_dim).qname();
                let domain: Vec<ConceptId> = self
                    .taxonomy
                    .domain_members_for_explicit_dimension(*explicit_dim)
                    .map(|members| {
                        group
                            .relationships
                            .iter()
                            .map(|r| r.concept)
                            .filter(|c| members.contains(c))
                            .collect()
                    })
                    .unwrap_or_default();
                let default = self.taxonomy.dimension_default(*explicit_dim);
                let matches_member = |fact: &Fact, member: ConceptId| match fact.explicit_member(dim_qname) {
                    None => default == Some(member),
                    Some(chosen) => chosen == self.taxonomy.concept(member).qname(),
                };

                if domain.len() <= reportable.len() {
                    style = TableStyle::SingleExplicitDimensionColumn;
                    for concept in &reportable {
                        let row: Vec<Option<&'a Fact>> = domain
                            .iter()
                            .map(|member| self.find(group, style, *concept, |f| matches_member(f, *member)))
                            .collect();
                        if row.iter().any(Option::is_some) {
                            data.push(row);
                            row_headings.push(HeadingValue::Concept(*concept));
                        }
                    }
                    columns.push(HeadingValue::Empty);
                    columns.extend(domain.iter().map(|m| HeadingValue::Concept(*m)));
                } else {
                    style = TableStyle::SingleExplicitDimensionRow;
                    for member in &domain {
                        let row: Vec<Option<&'a Fact>> = reportable
                            .iter()
                            .map(|concept| self.find(group, style, *concept, |f| matches_member(f, *member)))
                            .collect();
                        if row.iter().any(Option::is_some) {
                            data.push(row);
                            row_headings.push(HeadingValue::Concept(*member));
                        }
                    }
                    columns.push(HeadingValue::Concept(*explicit_dim));
                    columns.extend(reportable.iter().map(|c| HeadingValue::Concept(*c)));
                }
            }
            _ => {
                log::warn!(
                    "Table layout of [{}] with {} typed and {} explicit dimensions is not supported",
                    group.role,
                    typed.len(),
                    explicit.len()
                );
                columns.push(HeadingValue::Empty);
            }
        }

        Ok(self.finish_table(style, columns, row_headings, data))
    }

    fn find(
        &self,
        group: &PresentationGroup,
        style: TableStyle,
        concept: ConceptId,
        pred: impl Fn(&Fact) -> bool,
    ) -> Option<&'a Fact> {
        let mut found: Option<&'a Fact> = None;
        for fact in self.facts_for(concept) {
            if pred(fact) {
                if let Some(previous) = found {
                    log::debug!(
                        "Multiple facts found for one cell in [{}] ({style:?}): {previous} and {fact}",
                        group.role
                    );
                }
                found = Some(*fact);
            }
        }
        found
    }

    fn finish_table(
        &self,
        style: TableStyle,
        mut columns: Vec<HeadingValue>,
        row_headings: Vec<HeadingValue>,
        data: Vec<Vec<Option<&'a Fact>>>,
    ) -> TableLayout<'a> {
        let unit_symbol = self.table_unit(&data);
        let column_units = self.column_units(&data);
        let period = self.table_period(&data);
        let column_periods = self.column_periods(&data);

        let data_columns = columns.len().saturating_sub(1);
        let mut all_numeric = true;
        let mut column_numeric = vec![true; data_columns];
        for row in &data {
            for (i, fact) in row.iter().enumerate() {
                let Some(fact) = fact else { continue };
                if !self.taxonomy.concept(fact.concept()).is_numeric() {
                    all_numeric = false;
                    if let Some(flag) = column_numeric.get_mut(i) {
                        *flag = false;
                    }
                }
            }
        }
        let numeric_at = |i: usize| all_numeric || column_numeric.get(i).copied().unwrap_or(false);

        let span = data_columns.max(1);
        let mut heading_rows: Vec<Vec<TableHeadingCell>> = Vec::new();
        if let Some(period) = period {
            heading_rows.push(vec![TableHeadingCell::new(HeadingValue::Period(period), span, 1, false)]);
        }
        if let Some(unit) = &unit_symbol {
            heading_rows.push(vec![TableHeadingCell::new(HeadingValue::Text(unit.clone()), span, 1, true)]);
        }
        let corner = if columns.is_empty() {
            HeadingValue::Empty
        } else {
            columns.remove(0)
        };
        heading_rows.push(
            columns
                .iter()
                .enumerate()
                .map(|(i, c)| TableHeadingCell::new(c.clone(), 1, 1, numeric_at(i)))
                .collect(),
        );
        if period.is_none() && !column_periods.is_empty() {
            heading_rows.push(
                column_periods
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let value = p.map(HeadingValue::Period).unwrap_or(HeadingValue::Empty);
                        TableHeadingCell::new(value, 1, 1, numeric_at(i))
                    })
                    .collect(),
            );
        }
        if unit_symbol.is_none() && !column_units.is_empty() {
            heading_rows.push(
                column_units
                    .iter()
                    .enumerate()
                    .map(|(i, u)| {
                        let value = u.clone().map(HeadingValue::Text).unwrap_or(HeadingValue::Empty);
                        TableHeadingCell::new(value, 1, 1, numeric_at(i))
                    })
                    .collect(),
            );
        }
        let depth = heading_rows.len();
        heading_rows[0].insert(0, TableHeadingCell::new(corner.clone(), 1, depth, false));
        columns.insert(0, corner);

        TableLayout {
            style,
            columns,
            row_headings,
            data,
            column_units,
            column_periods,
            heading_rows,
            numeric: all_numeric,
            unit_symbol,
            period,
        }
    }

    fn numeric_units(&self, facts: impl Iterator<Item = &'a Fact>) -> BTreeSet<String> {
        facts
            .filter(|f| self.taxonomy.concept(f.concept()).is_numeric())
            .map(|f| self.report.unit_symbol(f))
            .collect()
    }

    fn table_unit(&self, data: &[Vec<Option<&'a Fact>>]) -> Option<String> {
        let units = self.numeric_units(data.iter().flatten().flatten().copied());
        match units.len() {
            1 => units.into_iter().next().filter(|u| !u.is_empty()),
            _ => None,
        }
    }

    fn table_period(&self, data: &[Vec<Option<&'a Fact>>]) -> Option<Period> {
        let periods: BTreeSet<Period> = data
            .iter()
            .flatten()
            .flatten()
            .filter_map(|f| self.report.fact_period(f))
            .collect();
        match periods.len() {
            1 => periods.into_iter().next(),
            _ => None,
        }
    }

    fn column<'d>(data: &'d [Vec<Option<&'a Fact>>], i: usize) -> impl Iterator<Item = &'a Fact> + 'd {
        data.iter().filter_map(move |row| row.get(i).copied().flatten())
    }

    fn width(data: &[Vec<Option<&'a Fact>>]) -> usize {
        data.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn column_units(&self, data: &[Vec<Option<&'a Fact>>]) -> Vec<Option<String>> {
        let units: Vec<Option<String>> = (0..Self::width(data))
            .map(|i| {
                let units = self.numeric_units(Self::column(data, i));
                match units.len() {
                    1 => units.into_iter().next().filter(|u| !u.is_empty()),
                    _ => None,
                }
            })
            .collect();
        if units.iter().all(Option::is_none) {
            Vec::new()
        } else {
            units
        }
    }

    fn column_periods(&self, data: &[Vec<Option<&'a Fact>>]) -> Vec<Option<Period>> {
        let periods: Vec<Option<Period>> = (0..Self::width(data))
            .map(|i| {
                let periods: BTreeSet<Period> = Self::column(data, i)
                    .filter_map(|f| self.report.fact_period(f))
                    .collect();
                match periods.len() {
                    1 => periods.into_iter().next(),
                    _ => None,
                }
            })
            .collect();
        if periods.iter().all(Option::is_none) {
            Vec::new()
        } else {
            periods
        }
    }

    /// Facts no section references. Facts with the same concept and aspects
    /// but a different value are grouped with the first one found.
    pub fn unused_facts(&self, sections: &[ReportSection<'a>]) -> Vec<UnusedFact<'a>> {
        let used: BTreeSet<*const Fact> = sections
            .iter()
            .flat_map(ReportSection::referenced_facts)
            .map(|f| f as *const Fact)
            .collect();
        let mut handled: BTreeSet<*const Fact> = BTreeSet::new();
        let mut unused = Vec::new();
        for fact in self.report.facts() {
            let ptr = fact as *const Fact;
            if used.contains(&ptr) || handled.contains(&ptr) {
                continue;
            }
            handled.insert(ptr);
            let duplicates: Vec<&'a Fact> = self
                .facts_for(fact.concept())
                .iter()
                .copied()
                .filter(|other| {
                    !std::ptr::eq(*other, fact)
                        && other.aspects() == fact.aspects()
                        && other.value() != fact.value()
                })
                .collect();
            handled.extend(duplicates.iter().map(|f| *f as *const Fact));
            unused.push(UnusedFact {
                fact,
                inconsistent_duplicates: duplicates,
            });
        }
        unused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_string_key_orders_integers_first() {
        let mut values = vec!["10", "b", "2", "a", "1"];
        values.sort_by_key(|v| numeric_string_key(v));
        assert_eq!(values, vec!["1", "2", "10", "a", "b"]);
    }
}
