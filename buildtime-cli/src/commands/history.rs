//! History command: list persisted runs

use super::load_config;
use convenient_buildtime::HistoryStore;
use convenient_buildtime::efficiency::coefficient_of_variation;
use std::path::{Path, PathBuf};

/// Print the persisted runs, oldest first
pub fn execute(
    config_path: Option<&Path>,
    history: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path, history)?;
    let store = HistoryStore::load(&config.history_file);

    println!("📚 Build history: {}", config.history_file.display());
    if store.is_empty() {
        println!("  (no runs recorded)");
        return Ok(());
    }

    println!(
        "\n  {:<26} {:>10} {:>10} {:>7}",
        "Finished", "Duration", "Peak MB", "CPU"
    );
    for run in store.entries() {
        let resources = run.resources();
        println!(
            "  {:<26} {:>9.2}s {:>10} {:>6.1}%",
            run.timestamp().format("%Y-%m-%d %H:%M:%S"),
            run.total_millis() as f64 / 1000.0,
            resources.peak_memory_bytes / (1024 * 1024),
            resources.avg_cpu_fraction * 100.0
        );
    }

    let totals: Vec<u64> = store.entries().iter().map(|run| run.total_millis()).collect();
    let average = totals.iter().sum::<u64>() as f64 / totals.len() as f64;
    println!("\n  Runs: {}, average: {:.2}s", totals.len(), average / 1000.0);
    if let Some(cv) = coefficient_of_variation(&totals) {
        println!("  Variation: {:.1}%", cv * 100.0);
    }
    Ok(())
}
