//! CAN Log Export CLI Application
//!
//! This is the command-line interface for the CAN log exporter.
//! It uses the can-log-export library and adds:
//! - Command-line and TOML configuration
//! - Parallel export of several log files
//! - Writing of summaries, validator reports and field catalogs
//! - Splitting of exported tables into column groups

use anyhow::{bail, Context, Result};
use can_log_export::{
    open_log, read_table, write_split_tables, AcceptanceFilter, ChannelSelection, ExportConfig,
    ExportOutput, ExportSummary, GroupingMode, LogExport, SignalDatabase,
};
use clap::Parser;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

mod config;

use config::{AppConfig, OutputConfig};

/// CAN Log Export - Turn CAN logs into signal tables
#[derive(Parser, Debug)]
#[command(name = "can-log-export-cli")]
#[command(about = "Export CAN log files (ASC) to signal tables", long_about = None)]
#[command(version)]
struct Args {
    /// Path to ASC log file(s) to export (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    log: Vec<PathBuf>,

    /// Path to DBC file(s) (can be repeated)
    #[arg(long, value_name = "FILE")]
    dbc: Vec<PathBuf>,

    /// Channel to export: a channel number, or "auto" to pick the likeliest one
    #[arg(long, value_name = "CHANNEL")]
    channel: Option<ChannelSelection>,

    /// One table per message and multiplexor value instead of a single table
    #[arg(long)]
    tree: bool,

    /// Fill missing fields with the previous row's values (single table only)
    #[arg(long)]
    sample_and_hold: bool,

    /// Timestamps relative to the first frame
    #[arg(long)]
    relative_time: bool,

    /// Decode frames shorter than their declared length as far as they go
    #[arg(long)]
    allow_truncated: bool,

    /// Output directory (default: next to each log file)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of frames to process per log (for testing)
    #[arg(long, value_name = "COUNT")]
    max_frames: Option<usize>,

    /// Split an exported table into groups of columns populated together
    #[arg(long, value_name = "TABLE")]
    split: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Log Export CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using export library v{}", can_log_export::VERSION);

    let mut app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    apply_overrides(&mut app_config, &args);

    if let Some(table) = &args.split {
        return split_mode(table, app_config.export.table_delimiter);
    }

    if app_config.input.logs.is_empty() || app_config.input.dbc_files.is_empty() {
        println!("CAN Log Export - No input specified");
        println!("\nQuick Start:");
        println!("  can-log-export-cli --log trace.asc --dbc signals.dbc");
        println!("  can-log-export-cli --log trace.asc --dbc signals.dbc --channel auto --tree");
        println!("\nWith a configuration file:");
        println!("  can-log-export-cli --config config.toml");
        println!("\nUse --help for more options");
        return Ok(());
    }

    export_mode(&app_config)
}

/// Command-line flags take precedence over the configuration file
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    config.input.logs.extend(args.log.iter().cloned());
    config.input.dbc_files.extend(args.dbc.iter().cloned());

    let export = &mut config.export;
    if let Some(channel) = args.channel {
        export.channel = channel;
    }
    if args.tree {
        export.grouping = GroupingMode::Tree;
    }
    export.sample_and_hold |= args.sample_and_hold;
    export.relative_time |= args.relative_time;
    export.allow_truncated |= args.allow_truncated;
    if args.max_frames.is_some() {
        export.max_frames = args.max_frames;
    }

    if args.output.is_some() {
        config.output.dir = args.output.clone();
    }
}

/// Export every configured log, in parallel
fn export_mode(config: &AppConfig) -> Result<()> {
    let mut catalog = SignalDatabase::new();
    for dbc_path in &config.input.dbc_files {
        catalog
            .add_dbc(dbc_path)
            .with_context(|| format!("Failed to load DBC file: {:?}", dbc_path))?;
    }

    let stats = catalog.stats();
    log::info!(
        "Signal database: {} messages, {} signals, {} multiplexed",
        stats.num_messages,
        stats.num_signals,
        stats.num_multiplexed
    );

    let filter = config.acceptance_filter();
    let logs = &config.input.logs;
    let out_dirs = output_dirs(logs, config.output.dir.as_deref())?;

    let results: Vec<(&PathBuf, Result<ExportSummary>)> = logs
        .par_iter()
        .zip(out_dirs.par_iter())
        .map(|(log_path, out_dir)| {
            let result = export_log(
                log_path,
                out_dir,
                &catalog,
                &filter,
                &config.export,
                &config.output,
            );
            (log_path, result)
        })
        .collect();

    let mut failures = 0;
    for (log_path, result) in results {
        match result {
            Ok(summary) => log::info!(
                "{:?}: {}/{} frames exported",
                log_path,
                summary.accepted_frames,
                summary.total_frames
            ),
            Err(e) => {
                log::error!("{:?}: {:#}", log_path, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} log file(s) failed", failures, logs.len());
    }
    Ok(())
}

/// Output directory of every log
///
/// With several logs each one gets its own subdirectory named after its file
/// stem. Logs sharing a stem get `_2`, `_3`, ... appended so that no two
/// exports write into the same directory.
fn output_dirs(logs: &[PathBuf], dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let separate_dirs = logs.len() > 1;
    let mut used = HashSet::new();

    logs.iter()
        .map(|log_path| {
            let stem = log_path
                .file_stem()
                .with_context(|| format!("Log path has no file name: {:?}", log_path))?
                .to_string_lossy();
            let parent = match dir {
                Some(dir) => dir.to_path_buf(),
                None => log_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            if !separate_dirs {
                return Ok(parent);
            }

            let mut out_dir = parent.join(&*stem);
            let mut index = 1;
            while !used.insert(out_dir.clone()) {
                index += 1;
                out_dir = parent.join(format!("{}_{}", stem, index));
            }
            Ok(out_dir)
        })
        .collect()
}

/// Export one log file and write all of its artifacts
fn export_log(
    log_path: &Path,
    out_dir: &Path,
    catalog: &SignalDatabase,
    filter: &AcceptanceFilter,
    export_config: &ExportConfig,
    output: &OutputConfig,
) -> Result<ExportSummary> {
    log::info!("Exporting log file: {:?}", log_path);

    let frames = open_log(log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

    let mut export = LogExport::new(catalog, filter.clone(), export_config.clone())
        .with_default_validators();
    export
        .process_frames(frames)
        .with_context(|| format!("Failed to read log file: {:?}", log_path))?;

    let stem = log_path
        .file_stem()
        .with_context(|| format!("Log path has no file name: {:?}", log_path))?;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?;

    let base = out_dir.join(stem);
    match export.write_outputs(&base).context("Failed to write tables")? {
        ExportOutput::Nothing => log::warn!("{:?}: no signal values to export", log_path),
        ExportOutput::Table(path) => log::info!("Table written to: {:?}", path),
        ExportOutput::Archive { directory, archive } => {
            log::info!("Group tables written to: {:?}", directory);
            log::info!("Archive written to: {:?}", archive);
        }
    }

    export
        .write_reports(out_dir)
        .context("Failed to write validator reports")?;

    if output.field_catalog {
        let path = out_dir.join("exported_fields.json");
        export
            .write_field_catalog(&path)
            .with_context(|| format!("Failed to write field catalog: {:?}", path))?;
    }

    let summary = export.summary();
    if output.summary {
        let path = out_dir.join("export_summary.json");
        write_summary(&summary, &path)
            .with_context(|| format!("Failed to write summary: {:?}", path))?;
    }

    Ok(summary)
}

fn write_summary(summary: &ExportSummary, path: &Path) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, summary)?;
    Ok(())
}

/// Split a table into column groups, written next to it and zipped
fn split_mode(table_path: &Path, delimiter: char) -> Result<()> {
    let table = read_table(table_path, delimiter)
        .with_context(|| format!("Failed to read table: {:?}", table_path))?;

    let stem = table_path
        .file_stem()
        .with_context(|| format!("Table path has no file name: {:?}", table_path))?
        .to_string_lossy();
    let directory = table_path.with_file_name(format!("{}_groups", stem));
    let archive = table_path.with_file_name(format!("{}.zip", stem));

    let written = write_split_tables(&table, &directory, &archive, delimiter)
        .context("Failed to split table")?;
    log::info!("Split {:?} into {} table(s)", table_path, written.len());
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
