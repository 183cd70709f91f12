//! Standalone channel inspection tool
//!
//! Reads an ASC log with DBC signal definitions and shows, per channel, how many
//! frames disagree with the declared message length, plus the validator
//! findings. Useful to pick the channel to export before running a full export.
//!
//! Usage:
//!   inspect_channels <log_file.asc> --dbc <file.dbc> [--dbc <file.dbc>...] [--limit <count>]
//!
//! Example:
//!   inspect_channels trace.asc --dbc powertrain.dbc --limit 100000

use can_log_export::{
    open_log, AcceptanceFilter, ChannelSelection, ExportConfig, LogExport, SignalDatabase,
};
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <log_file.asc> --dbc <file.dbc> [--limit <count>]", args[0]);
        eprintln!("\nExample:");
        eprintln!("  {} trace.asc --dbc powertrain.dbc --limit 100000", args[0]);
        std::process::exit(1);
    }

    let log_file = PathBuf::from(&args[1]);
    let mut dbc_files = Vec::new();
    let mut limit: Option<usize> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--dbc" => {
                i += 1;
                if i < args.len() {
                    dbc_files.push(PathBuf::from(&args[i]));
                }
            }
            "--limit" => {
                i += 1;
                if i < args.len() {
                    limit = Some(args[i].parse()?);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut catalog = SignalDatabase::new();
    for dbc in &dbc_files {
        catalog.add_dbc(dbc)?;
    }
    let stats = catalog.stats();
    println!(
        "Loaded {} messages ({} signals, {} multiplexed)",
        stats.num_messages, stats.num_signals, stats.num_multiplexed
    );

    let mut config = ExportConfig::new().with_channel(ChannelSelection::AutoDetect);
    config.max_frames = limit;

    let mut export =
        LogExport::new(&catalog, AcceptanceFilter::new(), config).with_default_validators();
    export.process_frames(open_log(&log_file)?)?;

    println!("\n=== CHANNELS ===");
    let analyzer = export.channel_analyzer();
    for stats in analyzer.channels() {
        println!(
            "  Channel {}: {} frames, {} length mismatches",
            stats.channel, stats.frames, stats.length_mismatches
        );
    }
    match analyzer.guess_channel() {
        Some(channel) => println!("Most likely channel: {}", channel),
        None => println!("No known frame found"),
    }

    let mut names: Vec<&str> = catalog
        .get_all_can_ids()
        .into_iter()
        .filter_map(|id| catalog.get_message(id))
        .map(|m| m.name.as_str())
        .collect();
    names.sort();

    let mut header_printed = false;
    for name in names {
        let Some(per_channel) = analyzer.mismatched_lengths(name) else {
            continue;
        };
        if !header_printed {
            println!("\nMessages with unexpected lengths:");
            header_printed = true;
        }
        for (channel, lengths) in per_channel {
            println!("  {} on channel {}: {:?}", name, channel, lengths);
        }
    }

    println!("\n=== VALIDATORS ===");
    for validator in export.validators() {
        println!("  {}: {} anomalous frame(s)", validator.name(), validator.anomaly_count());
    }

    Ok(())
}
