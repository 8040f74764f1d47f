//! xbrl-sheets CLI - Convert named-range workbooks to XBRL facts

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use xbrl_sheets::report::layout::{HeadingValue, ReportLayoutOrganiser};
use xbrl_sheets::taxonomy::TaxonomyDescription;
use xbrl_sheets::utr::UtrDocument;
use xbrl_sheets::{
    convert_workbook, Conversion, ConversionConfig, MessageType, Severity, Taxonomy,
    TaxonomyRegistry, Workbook,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Convert named-range workbooks to XBRL facts
#[derive(ClapParser)]
#[command(name = "xbrl-sheets")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Resources {
    /// Taxonomy description (JSON)
    #[arg(short, long)]
    taxonomy: PathBuf,

    /// Unit registry description (JSON)
    #[arg(short, long)]
    utr: PathBuf,

    /// Conversion defaults and overrides (JSON)
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one or more workbooks
    Convert {
        /// Workbook files (JSON)
        #[arg(required = true)]
        workbooks: Vec<PathBuf>,

        #[command(flatten)]
        resources: Resources,

        /// Output facts and messages as JSON
        #[arg(short, long)]
        json: bool,

        /// Show developer messages too
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show the sections and tables rebuilt from a workbook's facts
    Inspect {
        /// Workbook file (JSON)
        workbook: PathBuf,

        #[command(flatten)]
        resources: Resources,
    },

    /// Benchmark conversion performance
    Bench {
        /// Workbook file (JSON)
        workbook: PathBuf,

        #[command(flatten)]
        resources: Resources,

        /// Number of iterations
        #[arg(short, long, default_value = "100")]
        iterations: usize,
    },
}

fn load_registry(resources: &Resources) -> Result<(TaxonomyRegistry, ConversionConfig)> {
    let description = TaxonomyDescription::from_path(&resources.taxonomy)
        .with_context(|| format!("Failed to read taxonomy {}", resources.taxonomy.display()))?;
    let utr_json = std::fs::read_to_string(&resources.utr)
        .with_context(|| format!("Failed to read unit registry {}", resources.utr.display()))?;
    let utr = UtrDocument::from_json_str(&utr_json)
        .with_context(|| format!("Failed to parse unit registry {}", resources.utr.display()))?;
    let taxonomy = Taxonomy::load(description, utr).context("Failed to load taxonomy")?;

    let registry = TaxonomyRegistry::new();
    registry.register(taxonomy)?;
    let config = ConversionConfig::from_path(&resources.config)
        .with_context(|| format!("Failed to read config {}", resources.config.display()))?;
    Ok((registry, config))
}

fn convert_path(registry: &TaxonomyRegistry, config: &ConversionConfig, path: &Path) -> Result<Conversion> {
    let workbook = Workbook::from_path(path)
        .with_context(|| format!("Failed to read workbook {}", path.display()))?;
    convert_workbook(registry, &workbook, config)
        .with_context(|| format!("Failed to convert {}", path.display()))
}

fn severity_label(severity: Severity) -> ColoredString {
    match severity {
        Severity::Error => "ERROR:".red(),
        Severity::Warning => "WARNING:".yellow(),
        Severity::Info => "INFO:".normal(),
    }
}

fn print_conversion(path: &Path, conversion: &Conversion, verbose: bool) {
    let facts = conversion.report.as_ref().map_or(0, |r| r.fact_count());
    if conversion.successful() {
        println!("{} {}", "✓".green().bold(), path.display());
    } else {
        println!("{} {} - Conversion had problems", "✗".red().bold(), path.display());
    }
    println!("  Facts: {facts}");
    println!(
        "  Cells: {} populated, {} accessed",
        conversion.results.cells_populated, conversion.results.cells_queried
    );

    for message in conversion.results.user_messages() {
        if message.message_type == MessageType::Progress {
            continue;
        }
        println!("  {} {}", severity_label(message.severity), message.text);
        if let Some(cell) = &message.cell_reference {
            println!("      at {cell}");
        }
    }
    if verbose {
        for message in conversion
            .results
            .developer_messages()
            .iter()
            .filter(|m| !m.message_type.is_user_facing())
        {
            println!("  {} {} {}", "DEV".dimmed(), severity_label(message.severity), message.text);
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            workbooks,
            resources,
            json,
            verbose,
        } => {
            let (registry, config) = load_registry(&resources)?;

            #[cfg(feature = "parallel")]
            let conversions: Vec<Result<Conversion>> = workbooks
                .par_iter()
                .map(|path| convert_path(&registry, &config, path))
                .collect();
            #[cfg(not(feature = "parallel"))]
            let conversions: Vec<Result<Conversion>> = workbooks
                .iter()
                .map(|path| convert_path(&registry, &config, path))
                .collect();

            let mut failed = false;
            for (path, conversion) in workbooks.iter().zip(conversions) {
                let conversion = conversion?;
                failed |= !conversion.successful();
                if json {
                    let facts = conversion.report.as_ref().map(|r| r.facts()).unwrap_or_default();
                    let output = serde_json::json!({
                        "workbook": path.display().to_string(),
                        "facts": facts,
                        "results": conversion.results,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                } else {
                    print_conversion(path, &conversion, verbose);
                }
            }
            if failed {
                std::process::exit(1);
            }
        }

        Commands::Inspect { workbook, resources } => {
            let (registry, config) = load_registry(&resources)?;
            let conversion = convert_path(&registry, &config, &workbook)?;
            let Some(report) = conversion.report.as_ref() else {
                print_conversion(&workbook, &conversion, false);
                std::process::exit(1);
            };

            for (key, value) in report.document_information() {
                println!("{} {}", format!("{key}:").bold(), value);
            }

            let taxonomy = report.taxonomy();
            let organiser = ReportLayoutOrganiser::new(report);
            let sections = organiser.organise()?;
            for section in sections.iter().filter(|s| s.has_facts()) {
                println!();
                println!("{} ({:?})", section.title().bold(), section.style());
                match &section.table {
                    Some(table) => {
                        let headings: Vec<String> =
                            table.columns.iter().map(|h| h.render(taxonomy)).collect();
                        println!("  | {} |", headings.join(" | "));
                        if let Some(unit) = &table.unit_symbol {
                            println!("  unit: {unit}");
                        }
                        for (heading, row) in table.row_headings.iter().zip(&table.data) {
                            let cells: Vec<String> = row
                                .iter()
                                .map(|fact| fact.map(|f| f.display_value()).unwrap_or_default())
                                .collect();
                            let heading = match heading {
                                HeadingValue::Empty => String::new(),
                                other => other.render(taxonomy),
                            };
                            println!("  | {} | {} |", heading, cells.join(" | "));
                        }
                    }
                    None => {
                        for (relationship, facts) in &section.facts {
                            let concept = taxonomy.concept(relationship.concept);
                            for fact in facts {
                                println!(
                                    "  {}{}: {} {}",
                                    "  ".repeat(relationship.depth as usize),
                                    concept.display_label(),
                                    fact.display_value(),
                                    report.unit_symbol(fact)
                                );
                            }
                        }
                    }
                }
            }

            let unused = organiser.unused_facts(&sections);
            if !unused.is_empty() {
                println!();
                println!("{} {} facts not shown in any section", "!".yellow().bold(), unused.len());
            }
        }

        Commands::Bench {
            workbook,
            resources,
            iterations,
        } => {
            let (registry, config) = load_registry(&resources)?;
            let book = Workbook::from_path(&workbook)
                .with_context(|| format!("Failed to read workbook {}", workbook.display()))?;

            // Warmup
            for _ in 0..3 {
                let _ = convert_workbook(&registry, &book, &config)?;
            }

            let mut times = Vec::with_capacity(iterations.max(1));
            let mut facts = 0;
            for _ in 0..iterations.max(1) {
                let start = Instant::now();
                let conversion = convert_workbook(&registry, &book, &config)?;
                times.push(start.elapsed());
                facts = conversion.report.as_ref().map_or(0, |r| r.fact_count());
            }

            times.sort();
            let min = times[0];
            let max = times[times.len() - 1];
            let median = times[times.len() / 2];
            let mean = times.iter().sum::<std::time::Duration>() / times.len() as u32;

            println!("Benchmark Results for {}", workbook.display());
            println!("  Iterations: {}", times.len());
            println!("  Facts: {}", facts);
            println!("  Min:    {:.3}ms", min.as_secs_f64() * 1000.0);
            println!("  Median: {:.3}ms", median.as_secs_f64() * 1000.0);
            println!("  Mean:   {:.3}ms", mean.as_secs_f64() * 1000.0);
            println!("  Max:    {:.3}ms", max.as_secs_f64() * 1000.0);
            println!(
                "  Throughput: {:.0} facts/sec",
                facts as f64 / mean.as_secs_f64()
            );
        }
    }

    Ok(())
}
