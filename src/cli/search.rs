use anyhow::{bail, Result};

use crate::cli::Session;
use crate::index::{Symbol, SymbolKind};

pub fn search(session: &Session, query: Option<&str>, kind: Option<&str>) -> Result<()> {
    let store = session.open_store()?;
    let symbols = match (query, kind) {
        (query, Some(kind)) => {
            let kind = SymbolKind::from_str(kind)?;
            let mut symbols = store.get_symbols_by_kind(kind)?;
            if let Some(query) = query {
                symbols.retain(|s| s.name.contains(query));
            }
            symbols
        }
        (Some(query), None) => store.search_symbols(query)?,
        (None, None) => bail!("Give a query or --kind"),
    };

    if symbols.is_empty() {
        println!("No symbols found.");
        return Ok(());
    }

    println!("Found {} symbols:", symbols.len());
    for symbol in &symbols {
        print_symbol(symbol);
    }
    Ok(())
}

pub fn related(session: &Session, id: i64) -> Result<()> {
    let store = session.open_store()?;
    let Some(symbol) = store.get_symbol(id)? else {
        bail!("No symbol with id {}", id);
    };

    let related = store.find_related(id)?;
    println!("{} ({}) in {}:{}", symbol.name, symbol.kind, symbol.file_path, symbol.line_start);
    if related.is_empty() {
        println!("No related symbols.");
        return Ok(());
    }

    println!("References:");
    for target in &related {
        print_symbol(target);
    }
    Ok(())
}

fn print_symbol(symbol: &Symbol) {
    println!(
        "  [{}] {} ({}) in {}:{}-{}",
        symbol.id, symbol.name, symbol.kind, symbol.file_path, symbol.line_start, symbol.line_end
    );
}
