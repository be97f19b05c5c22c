use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use telearm::telemetry::ArrayStore;

/// Inspect a telearm telemetry store: array layouts, row counts, episode
/// boundaries, and recent rows.
#[derive(Parser, Debug)]
#[command(name = "storetool")]
#[command(about = "Inspect telearm telemetry stores")]
struct Args {
    /// Path to the telemetry store directory
    #[arg(short, long, default_value = "replay_buffer.store")]
    store: PathBuf,

    /// Print the last N rows of each data array
    #[arg(short, long, default_value_t = 0)]
    tail: u64,

    /// Only inspect the named array (e.g., data/action)
    #[arg(short, long)]
    array: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if !args.store.exists() {
        return Err(anyhow!("Store not found at {}", args.store.display()));
    }

    let store = ArrayStore::open(&args.store)?;

    let names: Vec<String> = match &args.array {
        Some(name) => {
            if !store.contains(name) {
                return Err(anyhow!("No array named {} in store", name));
            }
            vec![name.clone()]
        }
        None => store.array_names().map(str::to_string).collect(),
    };

    if names.is_empty() {
        println!("Store at {} holds no arrays", args.store.display());
        return Ok(());
    }

    println!("Store: {}", args.store.display());
    println!();

    for name in &names {
        let spec = store.spec(name).expect("listed array has a spec");
        let rows = store.rows(name)?;
        println!(
            "  {:<24} {:>5} x{:<2} rows={:<8} chunk_rows={}",
            name, spec.dtype, spec.row_len, rows, spec.chunk_rows
        );
    }

    // Episode boundaries are the quickest health check on a recording
    if args.array.is_none() && store.contains("meta/episode_ends") {
        let count = store.rows("meta/episode_ends")?;
        let ends = store.read_rows("meta/episode_ends", 0, count)?;
        let values: Vec<i64> = ends.iter().map(|row| row[0] as i64).collect();
        println!();
        println!("Episode ends ({}): {:?}", values.len(), values);
    }

    if args.tail > 0 {
        for name in &names {
            let rows = store.rows(name)?;
            let start = rows.saturating_sub(args.tail);
            let tail = store.read_rows(name, start, args.tail)?;

            println!();
            println!("Tail of {} (rows {}..{}):", name, start, rows);
            for (offset, row) in tail.iter().enumerate() {
                let formatted: Vec<String> =
                    row.iter().map(|v| format!("{:.5}", v)).collect();
                println!("  [{:>6}] {}", start + offset as u64, formatted.join(", "));
            }
        }
    }

    Ok(())
}
