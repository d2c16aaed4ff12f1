use std::{fs, path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use jarshade::{
    jar::io::repackaged_path, NestedStorage, RelocationOptions, Relocator, StageProgress,
};

/// Relocates the classes of a jar under a package prefix
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input JAR
    jar_in: PathBuf,

    /// Output JAR, defaults to `<input>-repackaged.jar` next to the input
    jar_out: Option<PathBuf>,

    /// Package prefix, e.g. `com/host/shaded/` or `com.host.shaded`
    #[arg(short, long)]
    prefix: String,

    /// Write a JSON relocation report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Relocate nested jars larger than this many bytes through temp files
    #[arg(long, value_name = "BYTES")]
    spill_threshold: Option<u64>,

    /// Drop META-INF signature files
    #[arg(long)]
    strip_signatures: bool,

    /// Skip re-parsing rewritten classes
    #[arg(long)]
    no_verify: bool,

    /// Log every entry decision
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut options = RelocationOptions::new(&args.prefix);
    options.verify_classes = !args.no_verify;
    options.strip_signatures = args.strip_signatures;
    if let Some(threshold) = args.spill_threshold {
        options.nested_storage = NestedStorage::SpillToDisk { threshold };
    }
    let relocator = Relocator::new(options)?;

    let jar_out = args
        .jar_out
        .unwrap_or_else(|| repackaged_path(&args.jar_in));

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg:24} [{bar:40}] {pos:>3}%")
            .context("Invalid progress template")?
            .progress_chars("=> "),
    );

    let now = Instant::now();
    let report = relocator
        .relocate_file(&args.jar_in, &jar_out, |event| {
            // Nested archives would make the bar jump back and forth
            if event.depth > 0 {
                return;
            }
            bar.set_message(event.stage.as_str());
            match event.progress {
                StageProgress::Unknown => {}
                StageProgress::Percentage(fraction) => bar.set_position((fraction * 100.0) as u64),
                StageProgress::Done => bar.set_position(100),
            }
        })
        .with_context(|| format!("Failed to relocate {}", args.jar_in.display()))?;
    bar.finish();

    println!(
        "{} {} classes into {} in {:?}",
        "Relocated".green().bold(),
        report.total_classes_rewritten(),
        jar_out.display(),
        Instant::now().duration_since(now)
    );
    if report.already_relocated {
        let copied = format!("{} was already relocated under {}, copied as is", args.jar_in.display(), report.prefix);
        println!("{}", copied.yellow());
    }
    if !report.duplicates.is_empty() {
        let skipped = format!("Skipped {} duplicate entries", report.duplicates.len());
        println!("{}", skipped.yellow());
    }

    if let Some(report_path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&report_path, json)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
    }

    Ok(())
}
