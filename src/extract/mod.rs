//! Named ranges in, validated facts out.
//!
//! One [`Extractor`] runs per conversion and owns all of that conversion's
//! mutable state: resolved ranges, preset dimensions, detected tables and
//! the configured unit overrides. The taxonomy it reads is shared and never
//! written.
//!
//! Steps run in a fixed order. Failing to resolve the entry point or the
//! report metadata aborts with [`Error::EarlyAbort`]; everything later is
//! reported as messages and only drops the fact concerned.

mod enums;
pub mod fuzzy;
mod tables;
mod units;

use crate::config::ConversionConfig;
use crate::qname::QName;
use crate::report::{FactBuilder, FactValue, Report, ENTITY_SCHEME, MONETARY_UNITS};
use crate::results::{
    ConversionResults, ConversionResultsBuilder, Message, MessageType, ProcessingContext, Severity,
};
use crate::taxonomy::registry::TaxonomyRegistry;
use crate::taxonomy::{ConceptId, Taxonomy};
use crate::workbook::{Cell, CellRange, CellValue, Workbook, Worksheet, EXCEL_PLACEHOLDER_VALUE};
use crate::{Error, Result};
use ahash::AHashMap;
use chrono::{Datelike, Months, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tables::TableContents;
use units::RatioUnitMeasures;

/// Cell text asking for an enumeration set fact with no members.
pub const EMPTY_SET_PLACEHOLDER: &str = "None";

const EMPTY_VALUE_PLACEHOLDERS: [&str; 2] = ["-", EXCEL_PLACEHOLDER_VALUE];

static UNSET: CellValue = CellValue::Bool(false);

const IGNORED_NAME_PREFIXES: [&str; 2] = ["enum_", "template_"];

const ABORT_REASON: &str =
    "Excel report is missing required named ranges or data. Please check the report and try again.";

/// Placeholders and unticked boxes count as no value.
pub fn is_empty_value(value: &CellValue) -> bool {
    match value {
        CellValue::Bool(false) => true,
        CellValue::Text(s) => EMPTY_VALUE_PLACEHOLDERS.contains(&s.as_str()),
        _ => false,
    }
}

/// Whole numbers become integers.
pub fn fact_value(value: &CellValue) -> FactValue {
    match value {
        CellValue::Bool(b) => FactValue::Bool(*b),
        CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => FactValue::Integer(*n as i64),
        CellValue::Number(n) => FactValue::Decimal(*n),
        CellValue::DateTime(dt) => FactValue::Date(dt.date()),
        CellValue::Date(d) => FactValue::Date(*d),
        CellValue::Text(s) => FactValue::Text(s.clone()),
    }
}

/// Date cells, ISO `YYYY-MM-DD` text or day-first `DD/MM/YYYY` text.
pub fn date_from_value(value: &CellValue) -> Result<NaiveDate> {
    if let Some(date) = value.as_date() {
        return Ok(date);
    }
    let parse = |s: &str, format: &str| {
        NaiveDate::parse_from_str(s.trim(), format)
            .map_err(|e| Error::Report(format!("Unable to parse date '{s}': {e}")))
    };
    match value {
        CellValue::Text(s) if s.contains('-') => parse(s, "%Y-%m-%d"),
        CellValue::Text(s) if s.contains('/') => parse(s, "%d/%m/%Y"),
        CellValue::Text(s) => Err(Error::Report(format!("Unsupported date string: '{s}'"))),
        other => Err(Error::Report(format!(
            "Unsupported value for date conversion: '{other}'"
        ))),
    }
}

/// End date moved into `year`, start the day after one year earlier.
pub fn period_for_year(template_end: NaiveDate, year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let end = template_end.with_year(year).or_else(|| {
        // 29 February in a non-leap year
        NaiveDate::from_ymd_opt(year, template_end.month(), 28)
    })?;
    let start = end.checked_sub_months(Months::new(12))?.succ_opt()?;
    Some((start, end))
}

fn at(message: Message, reference: Option<String>) -> Message {
    match reference {
        Some(reference) => message.with_cell(reference),
        None => message,
    }
}

fn join_names<'t>(taxonomy: &Taxonomy, ids: impl IntoIterator<Item = &'t ConceptId>) -> String {
    let mut names: Vec<String> = ids
        .into_iter()
        .map(|id| taxonomy.concept(*id).qname().to_string())
        .collect();
    names.sort();
    names.join(", ")
}

#[derive(Debug, Clone)]
pub(crate) struct BoundRange<'a> {
    pub name: String,
    pub worksheet: &'a Worksheet,
    pub range: CellRange,
    pub effective_width: u32,
    pub effective_height: u32,
    pub cells_populated: usize,
    pub concept: ConceptId,
}

impl BoundRange<'_> {
    pub fn reference(&self) -> String {
        self.worksheet.range_reference(&self.range)
    }

    pub fn same_place(&self, other: &BoundRange<'_>) -> bool {
        self.worksheet.name() == other.worksheet.name() && self.range == other.range
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CellAt<'a> {
    pub row: u32,
    pub col: u32,
    pub cell: &'a Cell,
}

impl<'a> CellAt<'a> {
    pub fn value(&self) -> &'a CellValue {
        // only built for cells holding a value
        self.cell.value.as_ref().unwrap_or(&UNSET)
    }
}

/// Outcome of converting one workbook.
#[derive(Debug)]
pub struct Conversion {
    /// Absent when the conversion aborted early.
    pub report: Option<Report>,
    pub results: ConversionResults,
}

impl Conversion {
    pub fn successful(&self) -> bool {
        self.report.is_some() && self.results.conversion_successful()
    }
}

/// Converts one workbook against the taxonomy it names.
///
/// Early aborts come back as a [`Conversion`] with no report. Any other
/// error is a broken contract and is returned as is.
pub fn convert_workbook(
    registry: &TaxonomyRegistry,
    workbook: &Workbook,
    config: &ConversionConfig,
) -> Result<Conversion> {
    let mut results = ConversionResultsBuilder::new();
    let mut context = ProcessingContext::start("Excel conversion", &mut results);

    let outcome = extract(registry, workbook, config, &mut results, &mut context);
    match &outcome {
        Err(Error::EarlyAbort(reason)) => results.add(
            format!("Excel conversion aborted early. {reason}"),
            Severity::Error,
            MessageType::SpreadsheetParsing,
        ),
        Err(e) => log::error!("Exception encountered during processing: {e}"),
        Ok(_) => {}
    }

    let report = context.finish(&mut results, outcome)?;
    Ok(Conversion {
        report,
        results: results.build(),
    })
}

fn extract(
    registry: &TaxonomyRegistry,
    workbook: &Workbook,
    config: &ConversionConfig,
    results: &mut ConversionResultsBuilder,
    context: &mut ProcessingContext,
) -> Result<Report> {
    let mut extractor = Extractor::new(registry, workbook, config, results)?;
    extractor.run(context)?;
    Ok(extractor.into_report())
}

pub struct Extractor<'a> {
    workbook: &'a Workbook,
    config: &'a ConversionConfig,
    results: &'a mut ConversionResultsBuilder,
    taxonomy: Arc<Taxonomy>,
    report: Report,

    // from the configuration
    data_type_units: AHashMap<QName, QName>,
    ratio_units: BTreeMap<String, RatioUnitMeasures>,
    concept_units: AHashMap<ConceptId, QName>,

    // from the workbook
    unused_names: BTreeSet<String>,
    unit_ranges: BTreeMap<ConceptId, BoundRange<'a>>,
    bound: BTreeMap<String, BoundRange<'a>>,
    preset_dimensions: BTreeMap<String, BTreeMap<ConceptId, ConceptId>>,
    tables: Vec<(BoundRange<'a>, TableContents<'a>)>,
}

impl<'a> Extractor<'a> {
    /// Resolves the taxonomy the workbook names and starts its report.
    pub fn new(
        registry: &TaxonomyRegistry,
        workbook: &'a Workbook,
        config: &'a ConversionConfig,
        results: &'a mut ConversionResultsBuilder,
    ) -> Result<Self> {
        let name = config.entry_point.as_str();
        let entry_point = workbook
            .destination(name)
            .ok()
            .flatten()
            .and_then(|(worksheet, range)| worksheet.value(range.min_row, range.min_col))
            .map(|value| value.to_string().trim().to_string())
            .unwrap_or_default();

        if entry_point.is_empty() {
            results.push(at(
                Message::new(
                    "Excel template does not specify taxonomy entry point. Please use an official template.",
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                ),
                workbook.defined_name_reference(name),
            ));
        } else if !registry.contains(&entry_point) {
            results.push(at(
                Message::new(
                    format!(
                        "Excel report is for an unsupported taxonomy. Excel wants: '{entry_point}'. We support: {:?}",
                        registry.entry_points()
                    ),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                ),
                workbook.defined_name_reference(name),
            ));
        }
        if results.has_errors() {
            return Err(Error::EarlyAbort(ABORT_REASON.to_string()));
        }

        let taxonomy = registry.get(&entry_point)?;
        let mut report = Report::new(taxonomy.clone());
        report.add_schema_ref(entry_point);

        Ok(Self {
            workbook,
            config,
            results,
            taxonomy,
            report,
            data_type_units: AHashMap::new(),
            ratio_units: BTreeMap::new(),
            concept_units: AHashMap::new(),
            unused_names: BTreeSet::new(),
            unit_ranges: BTreeMap::new(),
            bound: BTreeMap::new(),
            preset_dimensions: BTreeMap::new(),
            tables: Vec::new(),
        })
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn into_report(self) -> Report {
        self.report
    }

    /// Defined names nothing has read, sorted.
    pub fn unused_names(&self) -> impl Iterator<Item = &str> {
        self.unused_names.iter().map(String::as_str)
    }

    pub fn run(&mut self, context: &mut ProcessingContext) -> Result<()> {
        self.mark(context, "Report metadata");
        self.validate_required_metadata()?;
        self.ingest_configuration();
        self.abort_early_if_errors()?;

        self.mark(context, "Named ranges");
        self.record_named_ranges();
        self.process_named_ranges();

        self.mark(context, "Tables");
        self.process_tables();

        self.mark(context, "Facts");
        self.create_named_periods();
        self.create_simple_facts()?;
        self.create_table_facts()?;
        self.check_for_unhandled_ranges();
        log::debug!(
            "Extracted {} facts from {} named ranges",
            self.report.fact_count(),
            self.workbook.defined_names().count()
        );
        Ok(())
    }

    fn mark(&mut self, context: &mut ProcessingContext, section: &str) {
        context.mark(self.results, Some(section), "");
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.results.push(message);
    }

    pub(crate) fn add(&mut self, text: impl Into<String>, severity: Severity, message_type: MessageType) {
        self.results.add(text, severity, message_type);
    }

    fn abort_early_if_errors(&self) -> Result<()> {
        if self.results.has_errors() {
            return Err(Error::EarlyAbort(ABORT_REASON.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Cell access
    // ========================================================================

    fn cell_in(
        &mut self,
        name: &str,
        worksheet: &'a Worksheet,
        range: &CellRange,
        row: Option<u32>,
        col: Option<u32>,
    ) -> Option<CellAt<'a>> {
        self.unused_names.remove(name);

        let mut row = row.unwrap_or(range.min_row);
        let mut col = col.unwrap_or(range.min_col);
        if range.min_row == range.max_row {
            row = range.min_row;
        }
        if range.min_col == range.max_col {
            col = range.min_col;
        }
        if !range.rows().contains(&row) {
            self.push(
                Message::new(
                    format!("Row {row} has not been specified correctly."),
                    Severity::Error,
                    MessageType::DevInfo,
                )
                .with_cell(worksheet.range_reference(range)),
            );
            row = range.min_row;
        }
        if !range.columns().contains(&col) {
            self.push(
                Message::new(
                    format!("Column {col} has not been specified correctly."),
                    Severity::Error,
                    MessageType::DevInfo,
                )
                .with_cell(worksheet.range_reference(range)),
            );
            col = range.min_col;
        }

        let cell = worksheet.cell(row, col)?;
        let value = cell.value.as_ref()?;
        if value.as_text() == Some(EXCEL_PLACEHOLDER_VALUE) {
            self.push(
                Message::new(
                    format!(
                        "Excel cell has an invalid stored value {EXCEL_PLACEHOLDER_VALUE}. Please check the Excel formula for this specific cell."
                    ),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                )
                .with_cell(worksheet.cell_reference(row, col)),
            );
            return None;
        }
        Some(CellAt { row, col, cell })
    }

    pub(crate) fn single_cell(
        &mut self,
        holder: &BoundRange<'a>,
        row: Option<u32>,
        col: Option<u32>,
    ) -> Option<CellAt<'a>> {
        self.cell_in(&holder.name, holder.worksheet, &holder.range, row, col)
    }

    fn single_value_for_name(&mut self, name: &str) -> Option<&'a CellValue> {
        let workbook: &'a Workbook = self.workbook;
        let (worksheet, range) = match self.bound.get(name) {
            Some(holder) => (holder.worksheet, holder.range),
            None => workbook.destination(name).ok().flatten()?,
        };
        self.cell_in(name, worksheet, &range, None, None)
            .map(|at| at.value())
    }

    fn single_string_for_name(&mut self, name: &str) -> String {
        self.single_value_for_name(name)
            .map(CellValue::to_string)
            .unwrap_or_default()
    }

    fn date_for_name(&mut self, name: &str) -> Option<NaiveDate> {
        let outcome = match self.single_value_for_name(name) {
            Some(value) => date_from_value(value),
            None => Err(Error::Report("No value found.".to_string())),
        };
        match outcome {
            Ok(date) => Some(date),
            Err(e) => {
                let message = Message::new(
                    format!("Excel report must have a valid date for named range {name}. {e}"),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                );
                self.push(at(message, self.workbook.defined_name_reference(name)));
                None
            }
        }
    }

    fn bind(&mut self, name: &str, concept: ConceptId) -> Option<BoundRange<'a>> {
        let workbook: &'a Workbook = self.workbook;
        let (worksheet, range) = match workbook.destination(name) {
            Ok(Some(found)) => found,
            Ok(None) => {
                self.add(
                    format!("Named range {name} has no destinations specified. Ignoring."),
                    Severity::Error,
                    MessageType::DevInfo,
                );
                return None;
            }
            Err(e) => {
                self.add(
                    format!("Named range {name} has damaged cell reference. {e}"),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                );
                return None;
            }
        };
        let dims = worksheet.effective_dimensions(&range);
        let cells_populated = dims.populated.len();
        self.results.add_cell_queries(dims.accessed);
        self.results.add_cells_with_data(dims.populated);
        Some(BoundRange {
            name: name.to_string(),
            worksheet,
            range,
            effective_width: dims.width,
            effective_height: dims.height,
            cells_populated,
            concept,
        })
    }

    // ========================================================================
    // Metadata and configuration
    // ========================================================================

    fn validate_required_metadata(&mut self) -> Result<()> {
        let config = self.config;

        if let Some(aoix) = &config.aoix {
            for (aspect, range_name) in aoix.iter() {
                if !self.workbook.has_defined_name(range_name) {
                    self.add(
                        format!("Excel report must have a value for named range {range_name}."),
                        Severity::Error,
                        MessageType::SpreadsheetParsing,
                    );
                    continue;
                }
                let raw = self.single_string_for_name(range_name);
                let value = if aspect == ENTITY_SCHEME {
                    config.scheme_for_label(&raw).unwrap_or_default().to_string()
                } else {
                    raw.trim().to_string()
                };
                if value.is_empty() || EMPTY_VALUE_PLACEHOLDERS.contains(&value.as_str()) {
                    let message = Message::new(
                        format!("Excel report must have a valid value for named range {range_name}."),
                        Severity::Error,
                        MessageType::SpreadsheetParsing,
                    );
                    self.push(at(message, self.workbook.defined_name_reference(range_name)));
                    continue;
                }
                if aspect == MONETARY_UNITS && !self.taxonomy.utr().valid_currency_code(&value) {
                    let message = Message::new(
                        format!("Excel report currency '{value}' in named range {range_name} is not a valid ISO 4217 code."),
                        Severity::Error,
                        MessageType::SpreadsheetParsing,
                    );
                    self.push(at(message, self.workbook.defined_name_reference(range_name)));
                    continue;
                }
                self.report.set_default_aspect(aspect.as_str(), value);
            }
        }

        for period in &config.periods {
            let start = self.date_for_name(&period.start);
            let end = self.date_for_name(&period.end);
            let (Some(start), Some(end)) = (start, end) else {
                continue;
            };
            if start > end {
                let message = Message::new(
                    format!("Start date {start} is after end date {end}."),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                );
                self.push(at(message, self.workbook.defined_name_reference(&period.start)));
                continue;
            }
            if self.report.add_duration_period(&period.name, start, end) {
                self.report.set_default_period(&period.name)?;
            }
        }

        if let Some(bindings) = &config.report {
            if self.workbook.has_defined_name(&bindings.entity_name) {
                let name = self.single_string_for_name(&bindings.entity_name);
                self.report.set_entity_name(name.trim());
            } else {
                self.add(
                    format!(
                        "Excel report must have a value for named range {}.",
                        bindings.entity_name
                    ),
                    Severity::Error,
                    MessageType::SpreadsheetParsing,
                );
            }
        }
        Ok(())
    }

    fn ingest_configuration(&mut self) {
        let config = self.config;
        let taxonomy = self.taxonomy.clone();

        for (data_type, unit) in &config.data_types_to_units {
            match (taxonomy.parse_qname(data_type), taxonomy.parse_qname(unit)) {
                (Ok(data_type), Ok(unit)) => {
                    self.data_type_units.insert(data_type, unit);
                }
                (Err(e), _) | (_, Err(e)) => self.configuration_error("dataTypesToUnits", data_type, e),
            }
        }

        for (unit_id, measures) in &config.unit_ids_to_measures {
            let mut resolved = RatioUnitMeasures::default();
            for (measure, side) in measures
                .numerator
                .iter()
                .map(|m| (m, true))
                .chain(measures.denominator.iter().map(|m| (m, false)))
            {
                match taxonomy.utr().qname_for_unit_id(measure) {
                    Ok(Some(qname)) if side => resolved.numerator.push(qname),
                    Ok(Some(qname)) => resolved.denominator.push(qname),
                    Ok(None) => log::warn!("Unknown measure {measure} for configured unit {unit_id}"),
                    Err(e) => self.configuration_error("unitIdsToMeasures", unit_id, e),
                }
            }
            self.ratio_units.insert(unit_id.clone(), resolved);
        }

        for (concept, unit) in &config.concepts_to_units {
            match (taxonomy.resolve(concept), taxonomy.parse_qname(unit)) {
                (Ok(concept), Ok(unit)) => {
                    self.concept_units.insert(concept.id(), unit);
                }
                (Err(e), _) | (_, Err(e)) => self.configuration_error("conceptsToUnits", concept, e),
            }
        }
    }

    fn configuration_error(&mut self, section: &str, key: &str, error: Error) {
        self.add(
            format!("Configuration entry {key} in {section} is invalid. {error}"),
            Severity::Error,
            MessageType::Conversion,
        );
    }

    // ========================================================================
    // Named ranges
    // ========================================================================

    fn record_named_ranges(&mut self) {
        let workbook: &'a Workbook = self.workbook;
        let config: &'a ConversionConfig = self.config;
        let metadata = config.metadata_names();
        self.unused_names.extend(
            workbook
                .defined_names()
                .map(|(name, _)| name)
                .filter(|name| !IGNORED_NAME_PREFIXES.iter().any(|p| name.starts_with(p)))
                .filter(|name| !metadata.contains(name))
                .map(str::to_string),
        );
    }

    fn process_named_ranges(&mut self) {
        let taxonomy = self.taxonomy.clone();
        let names: Vec<String> = self.unused_names.iter().cloned().collect();

        for name in names {
            let concept = match taxonomy.concept_for_name(&name) {
                Ok(concept) => concept.map(|c| c.id()),
                Err(e) => {
                    self.add(
                        format!("Named range {name} is ambiguous. {e}"),
                        Severity::Error,
                        MessageType::DevInfo,
                    );
                    None
                }
            };

            if let Some(concept) = concept {
                if let Some(holder) = self.bind(&name, concept) {
                    self.bound.insert(name.clone(), holder);
                }
            } else if let Some((concept_name, member_name)) = name.split_once('_') {
                let concept = taxonomy.concept_for_name(concept_name).ok().flatten();
                if member_name == "unit" {
                    if let Some(concept) = concept {
                        if let Some(holder) = self.bind(&name, concept.id()) {
                            self.unit_ranges.insert(concept.id(), holder);
                            self.unused_names.remove(&name);
                        }
                    }
                } else {
                    let member = taxonomy.concept_for_name(member_name).ok().flatten();
                    let (Some(concept), Some(member)) = (concept, member) else {
                        continue;
                    };
                    let Some(holder) = self.bind(&name, concept.id()) else {
                        continue;
                    };
                    match taxonomy.explicit_dimension_for_domain_member(concept.id(), member.id()) {
                        Ok(Some(dimension)) => {
                            self.bound.insert(name.clone(), holder);
                            self.preset_dimensions
                                .entry(name.clone())
                                .or_default()
                                .insert(dimension, member.id());
                        }
                        Ok(None) => self.add(
                            format!(
                                "Domain member qualification set in named range {name} but no dimension can be found for member."
                            ),
                            Severity::Error,
                            MessageType::DevInfo,
                        ),
                        Err(e) => self.add(
                            format!("Domain member qualification set in named range {name} is ambiguous. {e}"),
                            Severity::Error,
                            MessageType::DevInfo,
                        ),
                    }
                }
            }

            if self.bound.contains_key(&name) {
                self.unused_names.remove(&name);
            }
        }

        let populated = self.results.num_cells_populated();
        let queried = self.results.num_cells_queried();
        self.add(
            format!("Excel file parsed ({populated} cells had data, with {queried} cells accessed)."),
            Severity::Info,
            MessageType::SpreadsheetParsing,
        );
    }

    // ========================================================================
    // Periods
    // ========================================================================

    fn create_named_periods(&mut self) {
        let taxonomy = self.taxonomy.clone();
        let members: BTreeSet<ConceptId> = self
            .preset_dimensions
            .values()
            .flat_map(|dims| dims.values().copied())
            .collect();
        let holders: Vec<BoundRange<'a>> = self
            .bound
            .values()
            .filter(|h| taxonomy.concept(h.concept).is_abstract() && members.contains(&h.concept))
            .cloned()
            .collect();

        for holder in holders {
            let value = self.single_cell(&holder, None, None).map(|at| at.value());
            let Some(value) = value.filter(|v| !is_empty_value(v)) else {
                self.bound.remove(&holder.name);
                continue;
            };
            let concept = taxonomy.concept(holder.concept);
            let year = match value {
                CellValue::Number(n) => Some(n.trunc() as i32),
                CellValue::Text(s) => s.trim().parse::<i32>().ok(),
                other => {
                    self.push(
                        Message::new(
                            format!("Unable to extract year for {}. Cell value '{other}'", holder.name),
                            Severity::Error,
                            MessageType::SpreadsheetParsing,
                        )
                        .with_concept(concept)
                        .with_cell(holder.reference()),
                    );
                    self.bound.remove(&holder.name);
                    continue;
                }
            };
            match year {
                Some(year) => {
                    self.named_period_for_year(&holder.name, year);
                    self.bound.remove(&holder.name);
                }
                None => self.push(
                    Message::new(
                        format!("Unable to convert value '{value}' to an integer."),
                        Severity::Error,
                        MessageType::SpreadsheetParsing,
                    )
                    .with_concept(concept)
                    .with_cell(holder.reference()),
                ),
            }
        }
    }

    fn named_period_for_year(&mut self, name: &str, year: i32) {
        if self.report.has_named_period(name) {
            return;
        }
        let Some(default) = self.report.default_period().copied() else {
            self.add(
                format!("Unable to create period {name} for {year} as the report has no default period."),
                Severity::Error,
                MessageType::Conversion,
            );
            return;
        };
        match period_for_year(default.end(), year) {
            Some((start, end)) => {
                self.report.add_duration_period(name, start, end);
            }
            None => self.add(
                format!("Unable to create period {name} for year {year}."),
                Severity::Error,
                MessageType::SpreadsheetParsing,
            ),
        }
    }

    // ========================================================================
    // Facts
    // ========================================================================

    fn apply_preset_dimensions(&mut self, holder: &BoundRange<'a>, fb: &mut FactBuilder) {
        let Some(preset) = self.preset_dimensions.get(&holder.name).cloned() else {
            return;
        };
        let taxonomy = self.taxonomy.clone();
        for (dimension, member) in preset {
            let default = taxonomy.dimension_default(dimension);
            if default != Some(member) {
                if let Err(e) = fb.set_explicit_dimension(dimension, member) {
                    self.add(e.to_string(), Severity::Error, MessageType::DevInfo);
                }
            }
            let local_name = taxonomy.concept(member).qname().local_name();
            if self.workbook.has_defined_name(local_name) && self.report.has_named_period(local_name) {
                fb.set_named_period(local_name);
            }
        }
    }

    pub(crate) fn add_fact_to_report(&mut self, fb: FactBuilder, holder: &BoundRange<'a>) -> bool {
        match fb.build(&self.report) {
            Ok(fact) => {
                self.report.add_fact(fact);
                true
            }
            Err(e) => {
                self.push(
                    Message::new(
                        format!("Unable to add fact. Encountered error: {e}"),
                        Severity::Warning,
                        MessageType::Conversion,
                    )
                    .with_cell(holder.reference()),
                );
                false
            }
        }
    }

    fn create_simple_facts(&mut self) -> Result<()> {
        let taxonomy = self.taxonomy.clone();
        let defaulted = taxonomy.defaulted_dimensions();
        let reportable: Vec<BoundRange<'a>> = self
            .bound
            .values()
            .filter(|h| taxonomy.concept(h.concept).is_reportable())
            .cloned()
            .collect();

        let mut ready = Vec::with_capacity(reportable.len());
        for holder in reportable {
            let required = taxonomy.explicit_dimensions_for_primary_item(holder.concept);
            let preset: BTreeSet<ConceptId> = self
                .preset_dimensions
                .get(&holder.name)
                .map(|dims| dims.keys().copied().collect())
                .unwrap_or_default();
            let unset: BTreeSet<ConceptId> = required
                .iter()
                .filter(|d| !defaulted.contains(d) && !preset.contains(d))
                .copied()
                .collect();
            if unset.is_empty() {
                ready.push(holder);
            } else {
                self.add(
                    format!(
                        "The named range {} has required dimensions that have not been set. The required dimensions {}. Missing: {}.",
                        holder.name,
                        join_names(&taxonomy, &required),
                        join_names(&taxonomy, &unset)
                    ),
                    Severity::Error,
                    MessageType::DevInfo,
                );
            }
        }

        for holder in ready {
            self.bound.remove(&holder.name);
            let concept = taxonomy.concept(holder.concept);
            let mut fb = FactBuilder::new(taxonomy.clone(), holder.concept)?;

            if concept.is_enumeration_set() {
                self.create_enumeration_set_fact(&holder, fb);
                continue;
            }

            let Some(cell) = self.single_cell(&holder, None, None) else {
                continue;
            };
            let value = cell.value();
            if is_empty_value(value) {
                continue;
            }

            let mut fact = fact_value(value);
            if concept.is_date() {
                match date_from_value(value) {
                    Ok(date) => fact = FactValue::Date(date),
                    Err(_) => {
                        self.push(
                            Message::new(
                                format!(
                                    "Unable to parse date from cell value '{value}' for {}.",
                                    concept.qname()
                                ),
                                Severity::Error,
                                MessageType::SpreadsheetParsing,
                            )
                            .with_concept(concept)
                            .with_cell(holder.worksheet.cell_reference(cell.row, cell.col)),
                        );
                        continue;
                    }
                }
            }
            fb.set_value(fact);

            if concept.is_numeric() {
                self.process_numeric(&holder, &cell, &mut fb);
                let unit_set = if concept.is_monetary() {
                    self.set_currency_for_name(&holder, &mut fb, None, None)
                } else {
                    self.set_unit_for_name(&holder, &mut fb, None, None, false)
                };
                if !unit_set {
                    continue;
                }
            } else if concept.is_enumeration_single() {
                let reference = holder.worksheet.cell_reference(cell.row, cell.col);
                match self.resolve_enumeration_single(holder.concept, &value.to_string(), &reference) {
                    Some(member) => {
                        fb.set_hidden_value(taxonomy.concept(member).expanded_name());
                    }
                    None => continue,
                }
            }

            self.apply_preset_dimensions(&holder, &mut fb);
            self.add_fact_to_report(fb, &holder);
        }
        Ok(())
    }

    fn check_for_unhandled_ranges(&mut self) {
        let names: Vec<String> = self.bound.keys().cloned().collect();
        for name in names {
            self.add(
                format!("Failed to handle XBRL related Excel named range {name}."),
                Severity::Error,
                MessageType::Conversion,
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn registry_for(taxonomy: Taxonomy) -> TaxonomyRegistry {
        let registry = TaxonomyRegistry::new();
        registry.register(taxonomy).unwrap();
        registry
    }

    pub(crate) fn entry_workbook(entry_point: &str) -> Workbook {
        let mut workbook = Workbook::new();
        workbook.add_sheet("Cover").set("B1", entry_point).unwrap();
        workbook.define_name("template_entry_point", "Cover!$B$1");
        workbook
    }

    pub(crate) fn entry_config() -> ConversionConfig {
        ConversionConfig {
            entry_point: "template_entry_point".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn texts(results: &ConversionResultsBuilder, severity: Severity) -> Vec<String> {
        results
            .messages()
            .iter()
            .filter(|m| m.severity == severity)
            .map(|m| m.text.clone())
            .collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_empty_values() {
        assert!(is_empty_value(&CellValue::from("-")));
        assert!(is_empty_value(&CellValue::from(EXCEL_PLACEHOLDER_VALUE)));
        assert!(is_empty_value(&CellValue::Bool(false)));
        assert!(!is_empty_value(&CellValue::Bool(true)));
        assert!(!is_empty_value(&CellValue::from(0)));
    }

    #[test]
    fn test_dates_from_cells() {
        assert_eq!(date_from_value(&CellValue::from("2024-03-01")).unwrap(), date(2024, 3, 1));
        assert_eq!(date_from_value(&CellValue::from("01/03/2024")).unwrap(), date(2024, 3, 1));
        assert_eq!(date_from_value(&CellValue::from(date(2024, 3, 1))).unwrap(), date(2024, 3, 1));
        assert!(date_from_value(&CellValue::from("March 2024")).is_err());
        assert!(date_from_value(&CellValue::from(45000)).is_err());
    }

    #[test]
    fn test_fact_values_keep_whole_numbers_integral() {
        assert_eq!(fact_value(&CellValue::from(1000)), FactValue::Integer(1000));
        assert_eq!(fact_value(&CellValue::from(0.5)), FactValue::Decimal(0.5));
        assert_eq!(fact_value(&CellValue::from("x")), FactValue::Text("x".to_string()));
    }

    #[test]
    fn test_period_for_year() {
        assert_eq!(
            period_for_year(date(2024, 12, 31), 2023),
            Some((date(2023, 1, 1), date(2023, 12, 31)))
        );
        assert_eq!(
            period_for_year(date(2024, 6, 30), 2022),
            Some((date(2021, 7, 1), date(2022, 6, 30)))
        );
        assert_eq!(
            period_for_year(date(2024, 2, 29), 2023),
            Some((date(2022, 3, 1), date(2023, 2, 28)))
        );
    }
}
