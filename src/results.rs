// Messages and statistics collected while converting one workbook
use crate::workbook::CellKey;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

/// Formats an elapsed time the way progress messages show it.
pub fn format_time(elapsed: Duration) -> String {
    let ns = elapsed.as_nanos();
    match ns {
        0..=999 => format!("{ns} ns"),
        1_000..=999_999 => format!("{} µs", ns / 1_000),
        1_000_000..=999_999_999 => format!("{} ms", ns / 1_000_000),
        _ => format!("{:.1} s", elapsed.as_secs_f64()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    DevInfo,
    SpreadsheetParsing,
    Conversion,
    XbrlValidation,
    Progress,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::DevInfo => "Dev Info",
            MessageType::SpreadsheetParsing => "Spreadsheet Parsing",
            MessageType::Conversion => "Conversion",
            MessageType::XbrlValidation => "XBRL Validation",
            MessageType::Progress => "Progress Status",
        }
    }

    /// Developer diagnostics and progress notes are hidden from users.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, MessageType::DevInfo | MessageType::Progress)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "m")]
    pub text: String,
    #[serde(rename = "s")]
    pub severity: Severity,
    #[serde(rename = "mt")]
    pub message_type: MessageType,
    #[serde(rename = "c")]
    pub concept: Option<String>,
    #[serde(rename = "e")]
    pub cell_reference: Option<String>,
}

impl Message {
    pub fn new(text: impl Into<String>, severity: Severity, message_type: MessageType) -> Self {
        Self {
            text: text.into(),
            severity,
            message_type,
            concept: None,
            cell_reference: None,
        }
    }

    pub fn with_concept(mut self, concept: impl fmt::Display) -> Self {
        self.concept = Some(concept.to_string());
        self
    }

    pub fn with_cell(mut self, reference: impl Into<String>) -> Self {
        self.cell_reference = Some(reference.into());
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:7}: {:19} {}", self.severity, self.message_type, self.text)?;
        if let Some(reference) = &self.cell_reference {
            write!(f, " (cell: {reference})")?;
        }
        if let Some(concept) = &self.concept {
            write!(f, " (taxonomy concept: {concept})")?;
        }
        Ok(())
    }
}

/// Finished, serialisable outcome of a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResults {
    #[serde(rename = "id")]
    pub conversion_id: String,
    #[serde(rename = "m")]
    pub messages: Vec<Message>,
    #[serde(rename = "q")]
    pub cells_queried: usize,
    #[serde(rename = "p")]
    pub cells_populated: usize,
    #[serde(rename = "success")]
    conversion_successful: bool,
}

impl ConversionResults {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.message_type.is_user_facing())
    }

    /// Every message, diagnostics included.
    pub fn developer_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.user_messages().any(|m| m.severity == Severity::Error)
    }

    pub fn has_errors_or_warnings(&self) -> bool {
        self.user_messages()
            .any(|m| matches!(m.severity, Severity::Error | Severity::Warning))
    }

    pub fn conversion_successful(&self) -> bool {
        self.conversion_successful
    }

    pub fn is_xbrl_valid(&self) -> bool {
        self.conversion_successful
            && !self.messages.iter().any(|m| {
                m.severity == Severity::Error && m.message_type == MessageType::XbrlValidation
            })
    }
}

pub struct ConversionResultsBuilder {
    conversion_id: String,
    messages: Vec<Message>,
    cells_queried: BTreeSet<CellKey>,
    cells_populated: BTreeSet<CellKey>,
}

impl Default for ConversionResultsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionResultsBuilder {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(conversion_id: impl Into<String>) -> Self {
        Self {
            conversion_id: conversion_id.into(),
            messages: Vec::new(),
            cells_queried: BTreeSet::new(),
            cells_populated: BTreeSet::new(),
        }
    }

    pub fn conversion_id(&self) -> &str {
        &self.conversion_id
    }

    pub fn push(&mut self, message: Message) {
        log::debug!("{message}");
        self.messages.push(message);
    }

    pub fn add(&mut self, text: impl Into<String>, severity: Severity, message_type: MessageType) {
        self.push(Message::new(text, severity, message_type));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn add_cell_queries(&mut self, cells: impl IntoIterator<Item = CellKey>) {
        self.cells_queried.extend(cells);
    }

    pub fn add_cells_with_data(&mut self, cells: impl IntoIterator<Item = CellKey>) {
        self.cells_populated.extend(cells);
    }

    pub fn num_cells_queried(&self) -> usize {
        self.cells_queried.len()
    }

    pub fn num_cells_populated(&self) -> usize {
        self.cells_populated.len()
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == Severity::Error && m.message_type.is_user_facing())
    }

    /// No error or warning about the spreadsheet or its conversion.
    pub fn conversion_successful(&self) -> bool {
        !self.messages.iter().any(|m| {
            matches!(m.severity, Severity::Error | Severity::Warning)
                && matches!(
                    m.message_type,
                    MessageType::Conversion | MessageType::SpreadsheetParsing
                )
        })
    }

    pub fn build(self) -> ConversionResults {
        let conversion_successful = self.conversion_successful();
        ConversionResults {
            conversion_id: self.conversion_id,
            messages: self.messages,
            cells_queried: self.cells_queried.len(),
            cells_populated: self.cells_populated.len(),
            conversion_successful,
        }
    }
}

/// Progress bookkeeping for one named piece of work and its sections.
pub struct ProcessingContext {
    name: String,
    started: Instant,
    section: Option<(String, Instant)>,
    succeeded: bool,
}

impl ProcessingContext {
    pub fn start(name: impl Into<String>, results: &mut ConversionResultsBuilder) -> Self {
        let name = name.into();
        results.add(format!("Starting: \"{name}\"."), Severity::Info, MessageType::Progress);
        Self {
            name,
            started: Instant::now(),
            section: None,
            succeeded: false,
        }
    }

    /// Closes the current section, if any, and opens `next` when given.
    pub fn mark(&mut self, results: &mut ConversionResultsBuilder, next: Option<&str>, info: &str) {
        let now = Instant::now();
        if let Some((section, since)) = self.section.take() {
            results.add(
                format!("Finished: [{section}] in {}.", format_time(now - since)),
                Severity::Info,
                MessageType::Progress,
            );
        }
        if let Some(next) = next {
            results.add(
                format!("Starting: [{next}]. {info}").trim_end().to_string(),
                Severity::Info,
                MessageType::Progress,
            );
            self.section = Some((next.to_string(), now));
        }
    }

    /// Records how the work ended. An early abort is absorbed; any other
    /// error is handed back.
    pub fn finish<T>(
        mut self,
        results: &mut ConversionResultsBuilder,
        outcome: Result<T>,
    ) -> Result<Option<T>> {
        self.mark(results, None, "");
        let elapsed = format_time(self.started.elapsed());
        match outcome {
            Ok(value) => {
                self.succeeded = true;
                results.add(
                    format!("Finished: \"{}\" in {elapsed}.", self.name),
                    Severity::Info,
                    MessageType::Progress,
                );
                Ok(Some(value))
            }
            Err(Error::EarlyAbort(reason)) => {
                log::debug!("{} aborted: {reason}", self.name);
                results.add(
                    format!("Processing of \"{}\" aborted after {elapsed}.", self.name),
                    Severity::Info,
                    MessageType::Progress,
                );
                Ok(None)
            }
            Err(e) => {
                results.add(
                    format!(
                        "Processing of \"{}\" finished abnormally after {elapsed}.",
                        self.name
                    ),
                    Severity::Error,
                    MessageType::Progress,
                );
                Err(e)
            }
        }
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_nanos(999)), "999 ns");
        assert_eq!(format_time(Duration::from_micros(12)), "12 µs");
        assert_eq!(format_time(Duration::from_millis(250)), "250 ms");
        assert_eq!(format_time(Duration::from_millis(2500)), "2.5 s");
    }

    #[test]
    fn test_success_ignores_diagnostics() {
        let mut builder = ConversionResultsBuilder::new();
        builder.add("internal detail", Severity::Error, MessageType::DevInfo);
        builder.add("step done", Severity::Info, MessageType::Progress);
        assert!(builder.conversion_successful());
        assert!(!builder.has_errors());

        builder.add("bad unit", Severity::Warning, MessageType::Conversion);
        let results = builder.build();
        assert!(!results.conversion_successful());
        assert!(!results.is_xbrl_valid());
        assert_eq!(results.user_messages().count(), 1);
        assert_eq!(results.developer_messages().len(), 3);
    }

    #[test]
    fn test_cell_statistics_count_distinct_cells() {
        let mut builder = ConversionResultsBuilder::with_id("fixed");
        let cell = ("Data".to_string(), 2, 2);
        builder.add_cell_queries([cell.clone(), cell.clone(), ("Data".to_string(), 3, 2)]);
        builder.add_cells_with_data([cell]);
        let results = builder.build();
        assert_eq!(results.conversion_id, "fixed");
        assert_eq!(results.cells_queried, 2);
        assert_eq!(results.cells_populated, 1);
    }

    #[test]
    fn test_serialised_keys() {
        let mut builder = ConversionResultsBuilder::with_id("abc");
        builder.push(
            Message::new("Bad value", Severity::Error, MessageType::SpreadsheetParsing)
                .with_cell("Data!$B$2"),
        );
        let json = serde_json::to_value(builder.build()).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["success"], false);
        assert_eq!(json["m"][0]["s"], "Error");
        assert_eq!(json["m"][0]["mt"], "SpreadsheetParsing");
        assert_eq!(json["m"][0]["e"], "Data!$B$2");
        assert!(json["m"][0]["c"].is_null());
        let back: ConversionResults = serde_json::from_value(json).unwrap();
        assert!(back.has_errors());
    }

    #[test]
    fn test_processing_context_swallows_early_abort() {
        let mut builder = ConversionResultsBuilder::new();
        let mut context = ProcessingContext::start("Conversion", &mut builder);
        context.mark(&mut builder, Some("Metadata"), "");
        let outcome: Result<()> = Err(Error::EarlyAbort("missing entity".into()));
        assert!(context.finish(&mut builder, outcome).unwrap().is_none());
        let texts: Vec<&str> = builder.messages().iter().map(|m| m.text.as_str()).collect();
        assert!(texts[0].starts_with("Starting: \"Conversion\""));
        assert!(texts[1].starts_with("Starting: [Metadata]"));
        assert!(texts[2].starts_with("Finished: [Metadata]"));
        assert!(texts[3].contains("aborted"));
    }

    #[test]
    fn test_processing_context_propagates_other_errors() {
        let mut builder = ConversionResultsBuilder::new();
        let context = ProcessingContext::start("Conversion", &mut builder);
        let outcome: Result<()> = Err(Error::Report("broken".into()));
        assert!(context.finish(&mut builder, outcome).is_err());
        assert!(builder.messages().last().unwrap().text.contains("abnormally"));
    }
}
