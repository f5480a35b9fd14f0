use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::cli::Session;
use crate::indexer::mapper::Mapper;
use crate::indexer::watcher::spawn_watcher;
use crate::indexer::Indexer;

pub async fn index_project(session: &Session, watch: bool, rebuild: bool) -> Result<()> {
    info!("Indexing project: {}", session.project.display());

    let store = session.open_store()?;
    println!("Project: {}", session.project.display());
    println!("Database: {}", store.path().display());

    if rebuild {
        store.clear()?;
        println!("Cleared existing index");
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    progress.enable_steady_tick(Duration::from_millis(100));

    let indexer = Arc::new(
        Indexer::new(store.clone(), &session.project, session.config.indexing.exclude.clone())?
            .with_progress(progress.clone()),
    );

    let walker = indexer.clone();
    let root = session.project.clone();
    let report = tokio::task::spawn_blocking(move || walker.index_project(&root)).await??;
    progress.finish_and_clear();

    for failure in &report.failures {
        eprintln!("  ! {}: {}", failure.path.display(), failure.error);
    }

    let mapping = Mapper::new(store.clone()).map_relationships()?;
    let stats = store.stats()?;

    println!("\nIndexing complete!");
    println!("Files indexed: {} ({} unchanged)", report.files_indexed, report.files_unchanged);
    println!("Failures: {}", report.failures.len());
    println!("Total symbols: {}", stats.total_symbols);
    println!("Total files: {}", stats.total_files);
    println!("Total relationships: {} ({} new)", stats.total_relationships, mapping.inserted);

    if watch || session.config.indexing.watch {
        println!("\n👀 Watching for changes. Press Ctrl+C to stop.");
        spawn_watcher(indexer, session.cancel.clone()).await?;

        let mapping = Mapper::new(store).map_relationships()?;
        println!("Mapped {} new relationships from watched changes", mapping.inserted);
    } else {
        println!("\nRun with --watch to monitor for changes.");
    }

    Ok(())
}
