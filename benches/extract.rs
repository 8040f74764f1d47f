use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::Path;
use xbrl_sheets::taxonomy::TaxonomyDescription;
use xbrl_sheets::utr::UtrDocument;
use xbrl_sheets::{
    convert_workbook, ConversionConfig, ReportLayoutOrganiser, Taxonomy, TaxonomyRegistry, Workbook,
};

fn load_registry(fixtures: &Path) -> TaxonomyRegistry {
    let description = TaxonomyDescription::from_path(fixtures.join("taxonomy.json")).unwrap();
    let utr_json = std::fs::read_to_string(fixtures.join("utr.json")).unwrap();
    let utr = UtrDocument::from_json_str(&utr_json).unwrap();
    let registry = TaxonomyRegistry::new();
    registry.register(Taxonomy::load(description, utr).unwrap()).unwrap();
    registry
}

fn convert_fixture_workbook(c: &mut Criterion) {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let registry = load_registry(&fixtures);
    let config = ConversionConfig::from_path(fixtures.join("config.json")).unwrap();
    let workbook = Workbook::from_path(fixtures.join("workbook.json")).unwrap();

    c.bench_function("convert_workbook", |b| {
        b.iter(|| convert_workbook(&registry, black_box(&workbook), &config));
    });

    let conversion = convert_workbook(&registry, &workbook, &config).unwrap();
    if let Some(report) = conversion.report.as_ref() {
        c.bench_function("organise_layout", |b| {
            b.iter(|| ReportLayoutOrganiser::new(black_box(report)).organise());
        });
    }
}

fn load_taxonomy(c: &mut Criterion) {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let taxonomy_json = std::fs::read_to_string(fixtures.join("taxonomy.json")).unwrap();
    let utr_json = std::fs::read_to_string(fixtures.join("utr.json")).unwrap();

    c.bench_function("load_taxonomy", |b| {
        b.iter(|| {
            let description = TaxonomyDescription::from_json_str(black_box(&taxonomy_json)).unwrap();
            let utr = UtrDocument::from_json_str(&utr_json).unwrap();
            Taxonomy::load(description, utr)
        });
    });
}

criterion_group!(benches, convert_fixture_workbook, load_taxonomy);
criterion_main!(benches);
