// In-memory workbook: worksheets of cells plus the defined names that point
// into them. Hosts load it from JSON; tests build it directly.
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Value Excel shows when a formula failed.
pub const EXCEL_PLACEHOLDER_VALUE: &str = "#VALUE!";

static DECIMALS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.(0+)").expect("valid regex"));

static COORDINATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$?([A-Za-z]{1,3})\$?([0-9]+)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Text(String),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::DateTime(dt) => Some(dt.date()),
            _ => None,
        }
    }

    pub fn is_false(&self) -> bool {
        matches!(self, CellValue::Bool(false))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

fn general_format() -> String {
    "General".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellObject {
    #[serde(default)]
    value: Option<CellValue>,
    #[serde(default = "general_format")]
    number_format: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CellRepr {
    Full(CellObject),
    Bare(CellValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CellRepr", rename_all = "camelCase")]
pub struct Cell {
    pub value: Option<CellValue>,
    pub number_format: String,
}

impl From<CellRepr> for Cell {
    fn from(repr: CellRepr) -> Self {
        match repr {
            CellRepr::Full(CellObject { value, number_format }) => Cell { value, number_format },
            CellRepr::Bare(value) => Cell {
                value: Some(value),
                number_format: general_format(),
            },
        }
    }
}

impl Cell {
    /// Decimal places shown by the number format (`0.00` gives 2).
    pub fn decimal_places(&self) -> u32 {
        decimal_places(&self.number_format)
    }

    pub fn is_percentage_format(&self) -> bool {
        self.number_format.contains('%')
    }
}

pub fn decimal_places(number_format: &str) -> u32 {
    DECIMALS_RE
        .captures(number_format)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().len() as u32)
        .unwrap_or(0)
}

pub fn column_letters(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        column = (column - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn column_index(letters: &str) -> u32 {
    letters
        .bytes()
        .fold(0, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32)
}

/// Parses `B2` or `$B$2` into (row, column), both 1-based.
pub fn parse_coordinate(coordinate: &str) -> Result<(u32, u32)> {
    let caps = COORDINATE_RE
        .captures(coordinate.trim())
        .ok_or_else(|| Error::CellRange(format!("Invalid cell coordinate {coordinate}")))?;
    let column = column_index(&caps[1]);
    let row: u32 = caps[2]
        .parse()
        .map_err(|_| Error::CellRange(format!("Invalid row in {coordinate}")))?;
    if row == 0 {
        return Err(Error::CellRange(format!("Invalid row in {coordinate}")));
    }
    Ok((row, column))
}

/// `'My sheet'` for names that need quoting, the bare name otherwise.
pub fn quote_sheet_name(name: &str) -> String {
    if name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// A rectangular block of cells, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRange {
    pub min_row: u32,
    pub min_col: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl CellRange {
    pub fn single(row: u32, col: u32) -> Self {
        Self {
            min_row: row,
            min_col: col,
            max_row: row,
            max_col: col,
        }
    }

    /// Parses `A1`, `$A$1` or `A1:C3`.
    pub fn parse(range: &str) -> Result<Self> {
        let (start, end) = range.split_once(':').unwrap_or((range, range));
        let (r1, c1) = parse_coordinate(start)?;
        let (r2, c2) = parse_coordinate(end)?;
        Ok(Self {
            min_row: r1.min(r2),
            min_col: c1.min(c2),
            max_row: r1.max(r2),
            max_col: c1.max(c2),
        })
    }

    pub fn width(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn height(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn contains_cell(&self, row: u32, col: u32) -> bool {
        (self.min_row..=self.max_row).contains(&row) && (self.min_col..=self.max_col).contains(&col)
    }

    /// True when `other` lies wholly inside this range.
    pub fn is_superset(&self, other: &CellRange) -> bool {
        self.min_row <= other.min_row
            && self.min_col <= other.min_col
            && self.max_row >= other.max_row
            && self.max_col >= other.max_col
    }

    pub fn is_disjoint(&self, other: &CellRange) -> bool {
        self.max_row < other.min_row
            || other.max_row < self.min_row
            || self.max_col < other.min_col
            || other.max_col < self.min_col
    }

    pub fn rows(&self) -> std::ops::RangeInclusive<u32> {
        self.min_row..=self.max_row
    }

    pub fn columns(&self) -> std::ops::RangeInclusive<u32> {
        self.min_col..=self.max_col
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}${}", column_letters(self.min_col), self.min_row)?;
        if self.min_row != self.max_row || self.min_col != self.max_col {
            write!(f, ":${}${}", column_letters(self.max_col), self.max_row)?;
        }
        Ok(())
    }
}

/// Parses a defined name destination such as `'My Sheet'!$A$1:$B$3`.
pub fn parse_destination(reference: &str) -> Result<(String, CellRange)> {
    let (sheet, range) = reference
        .rsplit_once('!')
        .ok_or_else(|| Error::CellRange(format!("Destination {reference} names no worksheet")))?;
    let sheet = match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => sheet.to_string(),
    };
    if sheet.is_empty() {
        return Err(Error::CellRange(format!("Destination {reference} names no worksheet")));
    }
    Ok((sheet, CellRange::parse(range)?))
}

/// A cell identity for access statistics.
pub type CellKey = (String, u32, u32);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeDimensions {
    pub width: u32,
    pub height: u32,
    pub accessed: BTreeSet<CellKey>,
    pub populated: BTreeSet<CellKey>,
}

#[derive(Debug, Clone, Default)]
pub struct Worksheet {
    name: String,
    cells: BTreeMap<(u32, u32), Cell>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&mut self, coordinate: &str, value: impl Into<CellValue>) -> Result<&mut Self> {
        self.set_with_format(coordinate, value, "General")
    }

    pub fn set_with_format(
        &mut self,
        coordinate: &str,
        value: impl Into<CellValue>,
        number_format: &str,
    ) -> Result<&mut Self> {
        let key = parse_coordinate(coordinate)?;
        self.cells.insert(
            key,
            Cell {
                value: Some(value.into()),
                number_format: number_format.to_string(),
            },
        );
        Ok(self)
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cell(row, col).and_then(|c| c.value.as_ref())
    }

    /// Width and height after dropping rows and columns with no values.
    pub fn effective_dimensions(&self, range: &CellRange) -> RangeDimensions {
        let mut dims = RangeDimensions::default();
        let mut rows = BTreeSet::new();
        let mut cols = BTreeSet::new();
        for row in range.rows() {
            for col in range.columns() {
                let key = (self.name.clone(), row, col);
                if self.value(row, col).is_some() {
                    rows.insert(row);
                    cols.insert(col);
                    dims.populated.insert(key.clone());
                }
                dims.accessed.insert(key);
            }
        }
        dims.width = (cols.len() as u32).max(1);
        dims.height = (rows.len() as u32).max(1);
        dims
    }

    pub fn cell_reference(&self, row: u32, col: u32) -> String {
        format!(
            "{}!{}",
            quote_sheet_name(&self.name),
            CellRange::single(row, col)
        )
    }

    pub fn range_reference(&self, range: &CellRange) -> String {
        format!("{}!{}", quote_sheet_name(&self.name), range)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkbookDocument {
    sheets: Vec<SheetDocument>,
    #[serde(default)]
    defined_names: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct SheetDocument {
    name: String,
    #[serde(default)]
    cells: BTreeMap<String, Cell>,
}

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
    defined_names: BTreeMap<String, String>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: WorkbookDocument = serde_json::from_str(json)?;
        let mut workbook = Workbook::new();
        for sheet in document.sheets {
            let worksheet = workbook.add_sheet(sheet.name);
            for (coordinate, cell) in sheet.cells {
                let key = parse_coordinate(&coordinate)?;
                worksheet.cells.insert(key, cell);
            }
        }
        workbook.defined_names = document.defined_names;
        Ok(workbook)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Adds a worksheet, or returns the existing one with that name.
    pub fn add_sheet(&mut self, name: impl Into<String>) -> &mut Worksheet {
        let name = name.into();
        let index = match self.sheets.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sheets.push(Worksheet::new(name));
                self.sheets.len() - 1
            }
        };
        &mut self.sheets[index]
    }

    pub fn sheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    pub fn define_name(&mut self, name: impl Into<String>, refers_to: impl Into<String>) -> &mut Self {
        self.defined_names.insert(name.into(), refers_to.into());
        self
    }

    pub fn has_defined_name(&self, name: &str) -> bool {
        self.defined_names.contains_key(name)
    }

    /// Defined names with their destinations, sorted by name.
    pub fn defined_names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defined_names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Worksheet and range a defined name points at.
    pub fn destination(&self, name: &str) -> Result<Option<(&Worksheet, CellRange)>> {
        let Some(refers_to) = self.defined_names.get(name) else {
            return Ok(None);
        };
        let (sheet, range) = parse_destination(refers_to)?;
        let worksheet = self.sheet(&sheet).ok_or_else(|| {
            Error::CellRange(format!("Named range {name} refers to missing worksheet {sheet}"))
        })?;
        Ok(Some((worksheet, range)))
    }

    /// `Sheet!$A$1` style reference for a defined name, if it resolves.
    pub fn defined_name_reference(&self, name: &str) -> Option<String> {
        self.defined_names.get(name).and_then(|refers_to| {
            let (sheet, range) = parse_destination(refers_to).ok()?;
            Some(format!("{}!{}", quote_sheet_name(&sheet), range))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_coordinates() {
        assert_eq!(parse_coordinate("B2").unwrap(), (2, 2));
        assert_eq!(parse_coordinate("$AA$10").unwrap(), (10, 27));
        assert!(parse_coordinate("B0").is_err());
        assert!(parse_coordinate("2B").is_err());
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(703), "AAA");
    }

    #[test]
    fn test_range_geometry() {
        let table = CellRange::parse("$A$1:$D$10").unwrap();
        let inside = CellRange::parse("B2:B5").unwrap();
        let overlapping = CellRange::parse("C9:E12").unwrap();
        let outside = CellRange::parse("F1").unwrap();
        assert!(table.is_superset(&inside));
        assert!(!table.is_superset(&overlapping));
        assert!(!table.is_disjoint(&overlapping));
        assert!(table.is_disjoint(&outside));
        assert_eq!(inside.width(), 1);
        assert_eq!(inside.height(), 4);
        assert_eq!(table.to_string(), "$A$1:$D$10");
        assert_eq!(outside.to_string(), "$F$1");
    }

    #[test]
    fn test_destinations() {
        let (sheet, range) = parse_destination("'Bob''s sheet'!$B$2:$C$3").unwrap();
        assert_eq!(sheet, "Bob's sheet");
        assert_eq!(range, CellRange::parse("B2:C3").unwrap());
        let (sheet, _) = parse_destination("Data!A1").unwrap();
        assert_eq!(sheet, "Data");
        assert!(parse_destination("A1").is_err());
        assert_eq!(quote_sheet_name("Data"), "Data");
        assert_eq!(quote_sheet_name("My Sheet"), "'My Sheet'");
    }

    #[test]
    fn test_effective_dimensions_trim_empty_rows_and_columns() {
        let mut sheet = Worksheet::new("Data");
        sheet.set("B2", 1.0).unwrap().set("B4", 2.0).unwrap();
        let dims = sheet.effective_dimensions(&CellRange::parse("A1:C5").unwrap());
        assert_eq!(dims.width, 1);
        assert_eq!(dims.height, 2);
        assert_eq!(dims.accessed.len(), 15);
        assert_eq!(dims.populated.len(), 2);

        let empty = sheet.effective_dimensions(&CellRange::parse("E1:F2").unwrap());
        assert_eq!((empty.width, empty.height), (1, 1));
    }

    #[test]
    fn test_decimal_places() {
        assert_eq!(decimal_places("0.00"), 2);
        assert_eq!(decimal_places("#,##0.000"), 3);
        assert_eq!(decimal_places("0.0%"), 1);
        assert_eq!(decimal_places("0.00E+00"), 2);
        assert_eq!(decimal_places("General"), 0);
    }

    #[test]
    fn test_workbook_from_json() {
        let workbook = Workbook::from_json_str(
            r#"{
                "sheets": [{"name": "Report data", "cells": {
                    "B2": 1000,
                    "C2": {"value": "EUR"},
                    "D2": {"value": 0.25, "numberFormat": "0.0%"},
                    "E2": true,
                    "F2": "2024-12-31"
                }}],
                "definedNames": {"ProfitLoss": "'Report data'!$B$2"}
            }"#,
        )
        .unwrap();
        let (sheet, range) = workbook.destination("ProfitLoss").unwrap().unwrap();
        assert_eq!(range, CellRange::single(2, 2));
        assert_eq!(sheet.value(2, 2), Some(&CellValue::Number(1000.0)));
        assert_eq!(sheet.value(2, 3), Some(&CellValue::Text("EUR".into())));
        assert!(sheet.cell(2, 4).unwrap().is_percentage_format());
        assert_eq!(sheet.value(2, 5), Some(&CellValue::Bool(true)));
        assert_eq!(
            sheet.value(2, 6).and_then(CellValue::as_date),
            NaiveDate::from_ymd_opt(2024, 12, 31)
        );
        assert_eq!(
            workbook.defined_name_reference("ProfitLoss").as_deref(),
            Some("'Report data'!$B$2")
        );
        assert!(workbook.destination("Missing").unwrap().is_none());
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Number(1000.0).to_string(), "1000");
        assert_eq!(CellValue::Number(0.5).to_string(), "0.5");
        assert_eq!(CellValue::from("x").to_string(), "x");
    }
}
