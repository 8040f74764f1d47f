mod common;

use common::*;
use pretty_assertions::assert_eq;
use xbrl_sheets::report::fact::{AspectKey, FactValue};
use xbrl_sheets::{MessageType, QName, Severity};

fn qname(conversion: &xbrl_sheets::Conversion, name: &str) -> QName {
    let report = conversion.report.as_ref().unwrap();
    report.taxonomy().resolve(name).unwrap().qname().clone()
}

#[test]
fn test_fixture_workbook_converts_cleanly() {
    let conversion = convert(&fixture_workbook());
    let report = conversion.report.as_ref().unwrap();

    let problems: Vec<String> = conversion
        .results
        .user_messages()
        .filter(|m| matches!(m.severity, Severity::Error | Severity::Warning))
        .map(|m| m.to_string())
        .collect();
    assert_eq!(problems, Vec::<String>::new());
    assert!(conversion.successful());

    // 9 general, 3 revenue, 4 sites, 6 workforce, 10 waste, 2 emissions
    assert_eq!(report.fact_count(), 34);
    assert_eq!(report.entity_name(), "Acme Manufacturing Ltd");
    assert_eq!(report.default_aspect("entity-identifier"), Some("529900T8BM49AURSDO55"));
    assert_eq!(
        report.default_aspect("entity-scheme"),
        Some("http://standards.iso.org/iso/17442")
    );
    assert_eq!(report.default_aspect("monetary-units"), Some("EUR"));
    assert_eq!(report.schema_refs(), vec![ENTRY_POINT]);
    assert!(conversion.results.cells_populated > 0);
    assert!(conversion.results.cells_queried >= conversion.results.cells_populated);
}

#[test]
fn test_monetary_fact_takes_currency_from_unit_cell() {
    let conversion = convert(&fixture_workbook());
    let facts = facts_for(&conversion, "ProfitLoss");
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].value(), &FactValue::Integer(1000));
    assert_eq!(aspect_text(facts[0], AspectKey::MonetaryUnit), Some("EUR".to_string()));
    assert_eq!(facts[0].decimals(), Some(0));
}

#[test]
fn test_every_numeric_fact_has_a_unit() {
    let conversion = convert(&fixture_workbook());
    let report = conversion.report.as_ref().unwrap();
    let taxonomy = report.taxonomy();
    for fact in report.facts() {
        let concept = taxonomy.concept(fact.concept());
        if !concept.is_numeric() {
            continue;
        }
        let has_unit = [AspectKey::Unit, AspectKey::MonetaryUnit, AspectKey::ComplexUnit]
            .iter()
            .any(|key| fact.aspect(key).is_some());
        let defaulted_currency = concept.is_monetary() && report.default_aspect("monetary-units").is_some();
        assert!(has_unit || defaulted_currency, "no unit for {fact}");
    }
}

#[test]
fn test_unit_cells_and_fallbacks() {
    let conversion = convert(&fixture_workbook());

    let energy = facts_for(&conversion, "Energy");
    assert_eq!(aspect_text(energy[0], AspectKey::Unit), Some("utr:MWh".to_string()));
    assert_eq!(energy[0].decimals(), Some(1));

    // "m²" only resolves after the configured replacements
    let area = facts_for(&conversion, "Area");
    assert_eq!(aspect_text(area[0], AspectKey::Unit), Some("utr:m2".to_string()));
    let workaround = messages_containing(&conversion, "Workaround performed for mislabelled unit");
    assert_eq!(workaround.len(), 1);
    assert_eq!(workaround[0].message_type, MessageType::DevInfo);

    let intensity = facts_for(&conversion, "EmissionIntensity");
    assert_eq!(
        aspect_text(intensity[0], AspectKey::ComplexUnit),
        Some("utr:tCO2e/iso4217:EUR".to_string())
    );

    let ghg = facts_for(&conversion, "GhgEmissions");
    assert!(ghg
        .iter()
        .all(|f| aspect_text(f, AspectKey::Unit) == Some("utr:tCO2e".to_string())));

    let headcount = facts_for(&conversion, "Headcount");
    assert!(headcount
        .iter()
        .all(|f| aspect_text(f, AspectKey::Unit) == Some("xbrli:pure".to_string())));
}

#[test]
fn test_boolean_date_and_enumeration_facts() {
    let conversion = convert(&fixture_workbook());

    let policy = facts_for(&conversion, "HasPolicy");
    assert_eq!(policy[0].value(), &FactValue::Bool(true));
    assert_eq!(aspect_text(policy[0], AspectKey::Transform), Some("fixed-true".to_string()));

    let date = facts_for(&conversion, "ReportingDate");
    assert_eq!(date[0].value().to_string(), "2025-03-31");

    let sector = facts_for(&conversion, "Sector");
    let hidden = aspect_text(sector[0], AspectKey::HiddenValue).unwrap();
    assert!(hidden.ends_with("ManufacturingMember"));
}

#[test]
fn test_ticked_boxes_become_one_set_fact() {
    let conversion = convert(&fixture_workbook());
    let facts = facts_for(&conversion, "Certifications");
    assert_eq!(facts.len(), 1);

    let hidden = aspect_text(facts[0], AspectKey::HiddenValue).unwrap();
    let members: Vec<&str> = hidden.split_whitespace().collect();
    assert_eq!(members.len(), 2);
    assert!(members.iter().any(|m| m.ends_with("Iso14001Member")));
    assert!(members.iter().any(|m| m.ends_with("Iso45001Member")));
    assert!(!hidden.contains("Iso9001Member"));
    assert_eq!(facts[0].value().to_string(), "ISO 14001\nISO 45001");
}

#[test]
fn test_table_facts_carry_dimensions() {
    let conversion = convert(&fixture_workbook());

    let segment = qname(&conversion, "demo:SegmentAxis");
    let mut revenue: Vec<(String, String)> = facts_for(&conversion, "Revenue")
        .iter()
        .map(|f| {
            (
                f.explicit_member(&segment).unwrap().local_name().to_string(),
                f.value().to_string(),
            )
        })
        .collect();
    revenue.sort();
    assert_eq!(
        revenue,
        vec![
            ("OnlineMember".to_string(), "200000".to_string()),
            ("RetailMember".to_string(), "500000".to_string()),
            ("WholesaleMember".to_string(), "300000".to_string()),
        ]
    );

    let site = qname(&conversion, "demo:SiteTypedAxis");
    let areas = facts_for(&conversion, "SiteArea");
    assert_eq!(areas.len(), 2);
    assert!(areas.iter().all(|f| f.typed_member(&site).is_some()));
    assert!(areas
        .iter()
        .all(|f| aspect_text(f, AspectKey::Unit) == Some("utr:ha".to_string())));

    let waste = facts_for(&conversion, "WasteRecycled");
    assert_eq!(waste.len(), 5);
    assert!(waste
        .iter()
        .all(|f| aspect_text(f, AspectKey::Unit) == Some("utr:t".to_string())));
}

#[test]
fn test_member_range_with_year_gets_named_period() {
    let conversion = convert(&fixture_workbook());
    let report = conversion.report.as_ref().unwrap();
    let axis = qname(&conversion, "demo:ReportingYearAxis");

    let facts = facts_for(&conversion, "GhgEmissions");
    assert_eq!(facts.len(), 2);
    let prior = facts
        .iter()
        .find(|f| f.explicit_member(&axis).is_some())
        .unwrap();
    assert_eq!(prior.explicit_member(&axis).unwrap().local_name(), "PriorYearMember");
    assert_eq!(prior.period_name(), Some("PriorYearMember"));
    assert_eq!(prior.value(), &FactValue::Integer(1400));

    let period = report.period("PriorYearMember").unwrap();
    assert_eq!(period.start().unwrap().to_string(), "2023-01-01");
    assert_eq!(period.end().to_string(), "2023-12-31");

    // the default member is never written out
    let current = facts
        .iter()
        .find(|f| f.explicit_member(&axis).is_none())
        .unwrap();
    assert_eq!(current.value(), &FactValue::Integer(1500));
    assert_eq!(current.period_name(), None);
}

#[test]
fn test_table_without_required_dimension_is_dropped() {
    let mut workbook = cover_workbook();
    let sheet = workbook.add_sheet("Revenue");
    sheet.set("B2", 500000).unwrap();
    sheet.set("B3", 300000).unwrap();
    workbook
        .define_name("RevenueBySegmentTable", "Revenue!$A$1:$B$4")
        .define_name("Revenue", "Revenue!$B$2:$B$4");

    let conversion = convert(&workbook);
    assert!(conversion.report.is_some());
    assert!(facts_for(&conversion, "Revenue").is_empty());

    let dropped = messages_containing(&conversion, "has no named range for required dimensions");
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].severity, Severity::Warning);
    assert_eq!(dropped[0].message_type, MessageType::Conversion);
    assert!(dropped[0].text.contains("demo:SegmentAxis"));
    assert!(messages_containing(&conversion, "Failed to handle").is_empty());
    assert!(!conversion.successful());
}

#[test]
fn test_multi_valued_table_row_skips_only_that_row() {
    let mut workbook = fixture_workbook();
    workbook.add_sheet("Revenue").set("C3", 1).unwrap();
    workbook
        .define_name("RevenueBySegmentTable", "Revenue!$A$1:$C$4")
        .define_name("Revenue", "Revenue!$B$2:$C$4");

    let conversion = convert(&workbook);
    let mut values: Vec<String> = facts_for(&conversion, "Revenue")
        .iter()
        .map(|f| f.value().to_string())
        .collect();
    values.sort();
    assert_eq!(values, vec!["200000".to_string(), "500000".to_string()]);

    let skipped = messages_containing(&conversion, "spans multiple columns");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].cell_reference.as_deref(), Some("Revenue!$B$3"));
}

#[test]
fn test_missing_entry_point_aborts_early() {
    let mut workbook = cover_workbook();
    let sheet = workbook.add_sheet("Cover");
    sheet.set("B1", "").unwrap();

    let conversion = convert(&workbook);
    assert!(conversion.report.is_none());
    assert!(!conversion.successful());
    assert_eq!(
        messages_containing(&conversion, "does not specify taxonomy entry point").len(),
        1
    );
    let aborted = messages_containing(&conversion, "Excel conversion aborted early.");
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].severity, Severity::Error);
}

#[test]
fn test_unsupported_taxonomy_aborts_early() {
    let mut workbook = cover_workbook();
    workbook
        .add_sheet("Cover")
        .set("B1", "https://example.com/other.xsd")
        .unwrap();

    let conversion = convert(&workbook);
    assert!(conversion.report.is_none());
    let unsupported = messages_containing(&conversion, "unsupported taxonomy");
    assert_eq!(unsupported.len(), 1);
    assert!(unsupported[0].text.contains("https://example.com/other.xsd"));
}

#[test]
fn test_missing_metadata_aborts_early() {
    let mut workbook = cover_workbook();
    workbook.add_sheet("Cover").set("B3", "-").unwrap();

    let conversion = convert(&workbook);
    assert!(conversion.report.is_none());
    assert_eq!(
        messages_containing(&conversion, "must have a valid value for named range entity_identifier").len(),
        1
    );
}

#[test]
fn test_unknown_currency_aborts_early() {
    let mut workbook = fixture_workbook();
    workbook.add_sheet("Cover").set("B5", "Euros").unwrap();

    let conversion = convert(&workbook);
    assert!(conversion.report.is_none());
    assert!(!conversion.successful());
    let invalid = messages_containing(&conversion, "currency 'Euros' in named range currency");
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].severity, Severity::Error);
    assert_eq!(invalid[0].message_type, MessageType::SpreadsheetParsing);
}

#[test]
fn test_unhandled_range_is_reported() {
    let mut workbook = cover_workbook();
    workbook.add_sheet("Data").set("A1", "Retail").unwrap();
    workbook.define_name("SegmentAxis", "Data!$A$1");

    let conversion = convert(&workbook);
    let unhandled = messages_containing(&conversion, "Failed to handle XBRL related Excel named range");
    assert_eq!(unhandled.len(), 1);
    assert!(unhandled[0].text.ends_with("SegmentAxis."));
    assert_eq!(unhandled[0].severity, Severity::Error);
    assert!(!conversion.successful());
}

#[test]
fn test_close_match_resolves_misspelt_member() {
    let mut workbook = cover_workbook();
    workbook.add_sheet("General").set("B9", "Manufactoring").unwrap();
    workbook.define_name("Sector", "General!$B$9");

    let conversion = convert(&workbook);
    let facts = facts_for(&conversion, "Sector");
    assert_eq!(facts.len(), 1);
    let hidden = aspect_text(facts[0], AspectKey::HiddenValue).unwrap();
    assert!(hidden.ends_with("ManufacturingMember"));
    // the cell text is kept as the readable value
    assert_eq!(facts[0].value().to_string(), "Manufactoring");

    let warnings = messages_containing(&conversion, "Using closest match");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);
    assert_eq!(warnings[0].cell_reference.as_deref(), Some("General!$B$9"));
}

#[test]
fn test_unmatched_member_drops_fact() {
    let mut workbook = cover_workbook();
    workbook.add_sheet("General").set("B9", "Mining").unwrap();
    workbook.define_name("Sector", "General!$B$9");

    let conversion = convert(&workbook);
    assert!(facts_for(&conversion, "Sector").is_empty());
    let errors = messages_containing(&conversion, "Unable to find EE concept");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].text.contains("demo:ManufacturingMember"));
}

#[test]
fn test_configured_alias_is_a_workaround() {
    let mut workbook = cover_workbook();
    let sheet = workbook.add_sheet("General");
    sheet.set("B10", "ISO9001").unwrap();
    sheet.set("C10", "EMAS").unwrap();
    workbook.define_name("Certifications", "General!$B$10:$C$10");

    let conversion = convert(&workbook);
    let facts = facts_for(&conversion, "Certifications");
    assert_eq!(facts.len(), 1);
    let hidden = aspect_text(facts[0], AspectKey::HiddenValue).unwrap();
    assert_eq!(hidden.split_whitespace().count(), 2);
    assert_eq!(messages_containing(&conversion, "Workaround performed for EE member").len(), 1);
}

#[test]
fn test_none_placeholder_reports_empty_set() {
    let mut workbook = cover_workbook();
    workbook.add_sheet("General").set("B10", "None").unwrap();
    workbook.define_name("Certifications", "General!$B$10:$E$10");

    let conversion = convert(&workbook);
    let facts = facts_for(&conversion, "Certifications");
    assert_eq!(facts.len(), 1);
    assert_eq!(aspect_text(facts[0], AspectKey::HiddenValue), Some(String::new()));
}

#[test]
fn test_empty_checkboxes_create_no_fact() {
    let mut workbook = cover_workbook();
    let sheet = workbook.add_sheet("General");
    for column in ["B", "C", "D", "E"] {
        sheet.set(&format!("{column}10"), false).unwrap();
    }
    workbook.define_name("Certifications", "General!$B$10:$E$10");

    let conversion = convert(&workbook);
    assert!(facts_for(&conversion, "Certifications").is_empty());
    let info = messages_containing(&conversion, "No values found");
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].severity, Severity::Info);
    assert!(conversion.successful());
}

#[test]
fn test_placeholder_cells_create_no_fact() {
    let mut workbook = cover_workbook();
    let sheet = workbook.add_sheet("General");
    sheet.set("B2", "-").unwrap();
    sheet.set("B3", "#VALUE!").unwrap();
    workbook
        .define_name("ProfitLoss", "General!$B$2")
        .define_name("Energy", "General!$B$3");

    let conversion = convert(&workbook);
    assert_eq!(conversion.report.as_ref().unwrap().fact_count(), 0);
    let invalid = messages_containing(&conversion, "invalid stored value");
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].cell_reference.as_deref(), Some("General!$B$3"));
}

#[test]
fn test_unused_names_exclude_metadata_and_templates() {
    let registry = registry();
    let config = config();
    let mut workbook = cover_workbook();
    workbook.add_sheet("General").set("A1", "note").unwrap();
    workbook
        .define_name("template_version", "General!$A$1")
        .define_name("SomethingElse", "General!$A$1");

    let mut results = xbrl_sheets::ConversionResultsBuilder::new();
    let mut context = xbrl_sheets::results::ProcessingContext::start("test", &mut results);
    let mut extractor = xbrl_sheets::Extractor::new(&registry, &workbook, &config, &mut results).unwrap();
    extractor.run(&mut context).unwrap();
    let unused: Vec<&str> = extractor.unused_names().collect();
    assert_eq!(unused, vec!["SomethingElse"]);
}

#[test]
fn test_conversion_is_repeatable() {
    let registry = registry();
    let config = config();
    let workbook = fixture_workbook();
    let first = xbrl_sheets::convert_workbook(&registry, &workbook, &config).unwrap();
    let second = xbrl_sheets::convert_workbook(&registry, &workbook, &config).unwrap();

    let facts = |conversion: &xbrl_sheets::Conversion| {
        let mut facts: Vec<String> = conversion
            .report
            .as_ref()
            .unwrap()
            .facts()
            .iter()
            .map(|f| f.to_string())
            .collect();
        facts.sort();
        facts
    };
    assert_eq!(facts(&first), facts(&second));
    assert_ne!(first.results.conversion_id, second.results.conversion_id);
}

#[test]
fn test_exact_label_wins_over_close_match() {
    let conversion = convert(&fixture_workbook());
    assert!(messages_containing(&conversion, "Using closest match").is_empty());
}

#[test]
fn test_workbook_and_config_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let workbook_path = dir.path().join("report.json");
    let config_path = dir.path().join("config.json");
    let workbook_json = std::fs::read_to_string(fixture_path("workbook.json")).unwrap();
    std::fs::write(&workbook_path, workbook_json).unwrap();
    std::fs::copy(fixture_path("config.json"), &config_path).unwrap();

    let workbook = xbrl_sheets::Workbook::from_path(&workbook_path).unwrap();
    let config = xbrl_sheets::ConversionConfig::from_path(&config_path).unwrap();
    let conversion = xbrl_sheets::convert_workbook(&registry(), &workbook, &config).unwrap();
    assert_eq!(conversion.report.as_ref().unwrap().fact_count(), 34);

    assert!(xbrl_sheets::Workbook::from_path(dir.path().join("missing.json")).is_err());
}
