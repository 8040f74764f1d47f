#![allow(dead_code)]

use std::path::PathBuf;
use xbrl_sheets::report::fact::{AspectKey, AspectValue};
use xbrl_sheets::taxonomy::TaxonomyDescription;
use xbrl_sheets::utr::UtrDocument;
use xbrl_sheets::{
    convert_workbook, Conversion, ConversionConfig, Fact, Message, Taxonomy, TaxonomyRegistry,
    Workbook,
};

pub const ENTRY_POINT: &str = "https://example.com/xbrl/demo/demo-all.xsd";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn registry() -> TaxonomyRegistry {
    let description = TaxonomyDescription::from_path(fixture_path("taxonomy.json")).unwrap();
    let utr_json = std::fs::read_to_string(fixture_path("utr.json")).unwrap();
    let utr = UtrDocument::from_json_str(&utr_json).unwrap();
    let registry = TaxonomyRegistry::new();
    registry.register(Taxonomy::load(description, utr).unwrap()).unwrap();
    registry
}

pub fn config() -> ConversionConfig {
    ConversionConfig::from_path(fixture_path("config.json")).unwrap()
}

pub fn fixture_workbook() -> Workbook {
    Workbook::from_path(fixture_path("workbook.json")).unwrap()
}

/// A workbook holding only the cover sheet metadata.
pub fn cover_workbook() -> Workbook {
    let mut workbook = Workbook::new();
    let cover = workbook.add_sheet("Cover");
    cover.set("B1", ENTRY_POINT).unwrap();
    cover.set("B2", "Acme Manufacturing Ltd").unwrap();
    cover.set("B3", "529900T8BM49AURSDO55").unwrap();
    cover.set("B4", "LEI").unwrap();
    cover.set("B5", "EUR").unwrap();
    cover.set("B6", "2024-01-01").unwrap();
    cover.set("B7", "2024-12-31").unwrap();
    workbook
        .define_name("template_entry_point", "Cover!$B$1")
        .define_name("entity_name", "Cover!$B$2")
        .define_name("entity_identifier", "Cover!$B$3")
        .define_name("entity_scheme", "Cover!$B$4")
        .define_name("currency", "Cover!$B$5")
        .define_name("period_start", "Cover!$B$6")
        .define_name("period_end", "Cover!$B$7");
    workbook
}

pub fn convert(workbook: &Workbook) -> Conversion {
    convert_workbook(&registry(), workbook, &config()).unwrap()
}

pub fn facts_for<'a>(conversion: &'a Conversion, local_name: &str) -> Vec<&'a Fact> {
    conversion
        .report
        .as_ref()
        .map(|report| {
            report
                .facts()
                .iter()
                .filter(|f| f.qname().local_name() == local_name)
                .collect()
        })
        .unwrap_or_default()
}

pub fn aspect_text(fact: &Fact, key: AspectKey) -> Option<String> {
    fact.aspect(&key).map(AspectValue::to_string)
}

/// Messages whose text contains `needle`, developer messages included.
pub fn messages_containing<'a>(conversion: &'a Conversion, needle: &str) -> Vec<&'a Message> {
    conversion
        .results
        .developer_messages()
        .iter()
        .filter(|m| m.text.contains(needle))
        .collect()
}
