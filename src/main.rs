use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanreply::capture::CaptureReader;
use scanreply::cli::Args;
use scanreply::config::Config;
use scanreply::export::{LineWriter, describe, generate_summary};
use scanreply::prefs::Prefs;
use scanreply::probe::Clock;
use scanreply::state::{ScanStats, SharedStats};

fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_tracing(args.verbose);

    let prefs = Prefs::load();
    let config = Config::resolve(&args, &prefs)?;
    if args.save_prefs {
        config
            .to_prefs()
            .save()
            .context("Failed to save preferences")?;
    }

    let mut stats = config.new_stats();
    if let Some(ref path) = args.prefixes {
        seed_prefixes(&mut stats, path)?;
    }
    let stats = SharedStats::new(stats);

    let input: Box<dyn BufRead> = match args.capture {
        Some(ref path) if !args.reads_stdin() => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open capture: {}", path.display()))?,
        )),
        _ => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match args.output {
        Some(ref path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output: {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    run_replay(&config, input, output, &stats)?;

    if config.summary {
        generate_summary(&stats.snapshot(), io::stderr().lock())?;
    }
    Ok(())
}

/// Logs go to stderr; stdout carries only result lines
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Load heuristic prefixes, one nibble string per line
fn seed_prefixes(stats: &mut ScanStats, path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read prefixes: {}", path.display()))?;
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.seed_prefix(line.to_lowercase());
    }
    info!(prefixes = stats.prefix_counts.len(), "seeded heuristic prefixes");
    Ok(())
}

/// Classify every packet of a capture and stream result lines
fn run_replay(
    config: &Config,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
    stats: &SharedStats,
) -> Result<()> {
    let classifier = config.classifier();
    let mut writer = LineWriter::new(output, config.output);
    // Receive times are anchored at replay start so a capture replays identically
    let started = Utc::now();

    for item in CaptureReader::new(input) {
        let packet = match item {
            Ok(packet) => packet,
            Err(e) if e.is_malformed_line() => {
                warn!(error = %e, "skipping capture line");
                stats.update(|s| s.record_malformed());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        stats.update(|s| s.record_read());

        let received_at = started + chrono::Duration::microseconds(packet.elapsed as i64);
        let clock = Clock::new(packet.elapsed, received_at);
        match classifier.classify(&packet.bytes, &clock) {
            Ok(response) => {
                let outcome = stats.absorb(&response);
                if config.describe {
                    eprint!("{}", describe(&response));
                }
                writer
                    .write(&response, &outcome)
                    .with_context(|| format!("Failed to write result for line {}", packet.line))?;
            }
            Err(e) => stats.update(|s| s.record_dropped(&e)),
        }
    }

    writer.flush()?;
    info!(written = writer.written(), "capture exhausted");
    Ok(())
}
