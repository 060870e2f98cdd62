use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use labflag_core::{
    parse_reference_range, ClassificationResult, Classifier, LabConfig, LabSnapshot, LabStatus,
    LabValue, Measurement, ReferenceCatalog,
};
use labflag_fhir::summarize_bundle_str;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_ABNORMAL_LINES: usize = 20;

#[derive(Parser, Debug)]
#[command(
    name = "labflag",
    about = "Flag lab results against reference ranges."
)]
struct Args {
    /// Institutional reference catalog (JSON array of ranges).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Trend and severity settings (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a single value.
    Classify {
        test: String,
        value: String,
        #[arg(long)]
        previous: Option<String>,
        /// Unit the value was reported in.
        #[arg(long)]
        unit: Option<String>,
        /// Range printed on the report ("3.5 - 5.1", "< 0.5"), used for tests
        /// the catalog does not know.
        #[arg(long)]
        range: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize the lab observations in a FHIR bundle.
    Bundle {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Validate the catalog and list its tests.
    Catalog,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let classifier = load_classifier(args.catalog.as_deref(), args.config.as_deref())?;

    match args.command {
        Command::Classify {
            test,
            value,
            previous,
            unit,
            range,
            json,
        } => {
            let mut measurement = Measurement::new(test, parse_value(&value));
            measurement.previous_value = previous.as_deref().map(parse_value);
            measurement.unit = unit;
            measurement.reference_range = range.as_deref().and_then(parse_reference_range);

            let result = classifier.classify_measurement(&measurement);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result_line(&result));
            }
        }
        Command::Bundle { input, json } => {
            let data = std::fs::read_to_string(&input)
                .with_context(|| format!("Could not read bundle {}", input.display()))?;
            let snapshot = summarize_bundle_str(&data, &classifier)
                .with_context(|| format!("Could not summarize {}", input.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", format_snapshot(&snapshot));
            }
        }
        Command::Catalog => {
            let catalog = classifier.catalog();
            println!("{} tests in {} categories", catalog.len(), catalog.categories().len());
            for category in catalog.categories() {
                println!("\n{category}:");
                for range in catalog
                    .entries()
                    .iter()
                    .filter(|range| &range.category == category)
                {
                    println!(
                        "  {:<20} {:<28} {}",
                        range.test_id,
                        range.display_name,
                        range.range_text()
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "labflag=debug" } else { "labflag=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

fn load_classifier(catalog: Option<&Path>, config: Option<&Path>) -> anyhow::Result<Classifier> {
    let catalog = match catalog {
        Some(path) => ReferenceCatalog::from_json_file(path)
            .with_context(|| format!("Could not load catalog {}", path.display()))?,
        None => ReferenceCatalog::standard().context("Built-in catalog failed validation")?,
    };

    let config = match config {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Could not read config {}", path.display()))?;
            serde_json::from_str::<LabConfig>(&data)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => LabConfig::default(),
    };

    Ok(Classifier::with_config(catalog, config))
}

fn parse_value(raw: &str) -> LabValue {
    match raw.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => LabValue::Numeric(number),
        _ => LabValue::Text(raw.to_string()),
    }
}

fn result_line(result: &ClassificationResult) -> String {
    let mut line = format!(
        "{}: {} [{}]",
        result.display_name, result.formatted_value, result.status
    );
    if !result.reference_range_text.is_empty() {
        line.push_str(&format!(" (ref {})", result.reference_range_text));
    }
    if let Some(delta) = result.delta {
        let marker = if result.is_worsening {
            ", worsening"
        } else if result.is_improving {
            ", improving"
        } else {
            ""
        };
        line.push_str(&format!(" change {delta:+}{marker}"));
    }
    line
}

fn format_snapshot(snapshot: &LabSnapshot) -> String {
    let mut out = format!("Generated at: {}\n", snapshot.generated_at);

    let critical: Vec<&ClassificationResult> = snapshot.critical_results().collect();
    if !critical.is_empty() {
        out.push_str("\nCRITICAL VALUES:\n");
        for result in critical {
            out.push_str(&format!("  !! {}\n", result_line(result)));
        }
    }

    let abnormal: Vec<&ClassificationResult> = snapshot
        .results
        .iter()
        .filter(|result| matches!(result.status, LabStatus::Low | LabStatus::High))
        .collect();
    if !abnormal.is_empty() {
        out.push_str("\nABNORMAL VALUES:\n");
        for result in abnormal.iter().take(MAX_ABNORMAL_LINES) {
            out.push_str(&format!("  {}\n", result_line(result)));
        }
        if abnormal.len() > MAX_ABNORMAL_LINES {
            out.push_str(&format!(
                "  ... and {} more\n",
                abnormal.len() - MAX_ABNORMAL_LINES
            ));
        }
    }

    if !snapshot.trends.is_empty() {
        out.push_str("\nTRENDS:\n");
        for trend in &snapshot.trends {
            out.push_str(&format!(
                "  {:<24} {:?} {:+}% (severity {})\n",
                trend.display_name, trend.direction, trend.pct_change, trend.severity_score
            ));
        }
    }

    let summary = &snapshot.summary;
    out.push_str(&format!(
        "\nTotals: {} normal, {} abnormal, {} critical, {} unknown\n",
        summary.normal_count, summary.abnormal_count, summary.critical_count, summary.unknown_count
    ));
    out
}
