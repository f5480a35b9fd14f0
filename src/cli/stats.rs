use anyhow::Result;
use std::path::Path;

use crate::cli::Session;

pub fn show_stats(session: &Session, verbose: bool) -> Result<()> {
    let store = session.open_store()?;
    let stats = store.stats()?;

    println!("Project: {} ({})", session.config.project.name, session.project.display());
    println!("\n📊 Index Statistics:");
    println!("  Total files: {}", stats.total_files);
    println!("  Total symbols: {}", stats.total_symbols);
    println!("  Total relationships: {}", stats.total_relationships);
    println!("  Index size: {:.2} MB", db_size_mb(store.path())?);

    if verbose {
        println!("\n📈 Detailed Statistics:");

        let kinds = store.kind_counts()?;
        if !kinds.is_empty() {
            println!("  Symbols by kind:");
            for (kind, count) in kinds {
                println!("    {}: {}", kind, count);
            }
        }

        let languages = store.language_counts()?;
        if !languages.is_empty() {
            println!("  Languages:");
            for (language, count) in languages {
                println!("    {}: {} files", language, count);
            }
        }
    }

    store.close();
    Ok(())
}

fn db_size_mb(db_path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}
