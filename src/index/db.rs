use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::schema::init_schema;
use super::{NewSymbol, RelationshipType, Symbol, SymbolKind};

/// Hidden per-project directory owned by this tool
pub const STATE_DIR: &str = ".pkgraph";

/// Store file name inside [`STATE_DIR`]
pub const DB_FILE: &str = "pkg.db";

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

const SYMBOL_COLUMNS: &str = "id, name, kind, file_path, line_start, line_end, content";

/// Handle to a project's knowledge store.
///
/// Cloning shares the underlying pool; the store is released when the last
/// clone is dropped or [`Store::close`] is called.
#[derive(Clone)]
pub struct Store {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the store under `<project_root>/.pkgraph/pkg.db`
    pub fn open(project_root: impl AsRef<Path>) -> Result<Self> {
        let db_path = project_root.as_ref().join(STATE_DIR).join(DB_FILE);

        info!("Opening knowledge store at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        // Cascading deletes only fire with foreign keys enabled on every connection
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });

        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("Failed to create connection pool")?;

        {
            let conn = pool.get().context("Failed to get connection")?;
            init_schema(&conn).context("Failed to initialize schema")?;
        }

        Ok(Self { pool, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Release the store explicitly
    pub fn close(self) {
        debug!("Closing knowledge store at: {}", self.db_path.display());
        drop(self.pool);
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get connection from pool")
    }

    /// Insert a symbol and return its generated id.
    ///
    /// The indexer writes whole files through `replace_file_symbols`.
    #[cfg(test)]
    pub fn add_symbol(&self, symbol: &NewSymbol) -> Result<i64> {
        let conn = self.get_conn()?;
        insert_symbol(&conn, symbol)?;
        Ok(conn.last_insert_rowid())
    }

    /// Replace everything known about `file_path` with a fresh parse.
    ///
    /// Old symbols are deleted (cascading to their relationships) and the new
    /// ones inserted inside one transaction, so readers see either the old or
    /// the new symbol set.
    pub fn replace_file_symbols(
        &self,
        file_path: &str,
        language: &str,
        content_hash: &str,
        symbols: &[NewSymbol],
    ) -> Result<Vec<i64>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute("DELETE FROM symbols WHERE file_path = ?1", [file_path])?;
        if removed > 0 {
            debug!("Removed {} stale symbols from {}", removed, file_path);
        }

        let mut ids = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            insert_symbol(&tx, symbol)?;
            ids.push(tx.last_insert_rowid());
        }

        tx.execute(
            "INSERT OR REPLACE INTO files (path, language, content_hash, symbol_count, last_indexed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file_path,
                language,
                content_hash,
                symbols.len() as i64,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(ids)
    }

    /// Forget a file: its symbols, their edges and its bookkeeping row
    pub fn remove_file(&self, file_path: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM symbols WHERE file_path = ?1", [file_path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", [file_path])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Content hash recorded the last time `file_path` was indexed
    pub fn file_hash(&self, file_path: &str) -> Result<Option<String>> {
        let conn = self.get_conn()?;
        let hash = conn
            .query_row(
                "SELECT content_hash FROM files WHERE path = ?1",
                [file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Case-sensitive substring match on name or kind, ordered by name
    pub fn search_symbols(&self, query: &str) -> Result<Vec<Symbol>> {
        self.query_symbols(
            &format!(
                "SELECT {} FROM symbols
                 WHERE instr(name, ?1) > 0 OR instr(kind, ?1) > 0
                 ORDER BY name, id",
                SYMBOL_COLUMNS
            ),
            [query],
        )
    }

    pub fn get_symbols_by_kind(&self, kind: SymbolKind) -> Result<Vec<Symbol>> {
        self.query_symbols(
            &format!("SELECT {} FROM symbols WHERE kind = ?1 ORDER BY id", SYMBOL_COLUMNS),
            [kind.as_str()],
        )
    }

    pub fn get_symbol(&self, id: i64) -> Result<Option<Symbol>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM symbols WHERE id = ?1", SYMBOL_COLUMNS))?;
        let symbol = stmt.query_row([id], row_to_symbol).optional()?;
        Ok(symbol)
    }

    #[cfg(test)]
    pub fn symbols_in_file(&self, file_path: &str) -> Result<Vec<Symbol>> {
        self.query_symbols(
            &format!(
                "SELECT {} FROM symbols WHERE file_path = ?1 ORDER BY line_start, id",
                SYMBOL_COLUMNS
            ),
            [file_path],
        )
    }

    pub fn all_symbols(&self) -> Result<Vec<Symbol>> {
        self.query_symbols(&format!("SELECT {} FROM symbols ORDER BY id", SYMBOL_COLUMNS), [])
    }

    fn query_symbols<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Symbol>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let symbols = stmt
            .query_map(params, row_to_symbol)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    /// Insert an edge; returns false when the same edge already exists
    pub fn add_relationship(&self, source_id: i64, target_id: i64, type_: RelationshipType) -> Result<bool> {
        let conn = self.get_conn()?;

        debug!("Inserting relationship: {} -[{}]-> {}", source_id, type_.as_str(), target_id);

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO relationships (source_id, target_id, type) VALUES (?1, ?2, ?3)",
            params![source_id, target_id, type_.as_str()],
        )?;
        Ok(inserted > 0)
    }

    /// Symbols reachable through one edge sourced at `symbol_id`
    pub fn find_related(&self, symbol_id: i64) -> Result<Vec<Symbol>> {
        self.query_symbols(
            "SELECT s.id, s.name, s.kind, s.file_path, s.line_start, s.line_end, s.content
             FROM relationships r
             JOIN symbols s ON r.target_id = s.id
             WHERE r.source_id = ?1
             ORDER BY r.id",
            [symbol_id],
        )
    }

    /// Get index statistics
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.get_conn()?;

        let total_symbols: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?;
        let total_files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        let total_relationships: i64 =
            conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;

        Ok(IndexStats {
            total_symbols: total_symbols as usize,
            total_files: total_files as usize,
            total_relationships: total_relationships as usize,
        })
    }

    /// Symbol counts grouped by kind, most common first
    pub fn kind_counts(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM symbols GROUP BY kind ORDER BY COUNT(*) DESC, kind",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Indexed file counts grouped by language
    pub fn language_counts(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT language, COUNT(*) FROM files GROUP BY language ORDER BY COUNT(*) DESC, language",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Clear all data (for rebuilding)
    pub fn clear(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM relationships", [])?;
        conn.execute("DELETE FROM symbols", [])?;
        conn.execute("DELETE FROM files", [])?;
        Ok(())
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_symbols: usize,
    pub total_files: usize,
    pub total_relationships: usize,
}

fn insert_symbol(conn: &rusqlite::Connection, symbol: &NewSymbol) -> Result<()> {
    debug!("Inserting symbol: {} ({})", symbol.name, symbol.kind);

    conn.execute(
        "INSERT INTO symbols (name, kind, file_path, line_start, line_end, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            symbol.name,
            symbol.kind.as_str(),
            symbol.file_path,
            symbol.line_start as i64,
            symbol.line_end as i64,
            symbol.content,
        ],
    )?;
    Ok(())
}

/// Convert database row to Symbol
fn row_to_symbol(row: &Row) -> rusqlite::Result<Symbol> {
    let kind_str: String = row.get(2)?;
    let kind = SymbolKind::from_str(&kind_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Symbol {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        file_path: row.get(3)?,
        line_start: row.get::<_, i64>(4)? as usize,
        line_end: row.get::<_, i64>(5)? as usize,
        content: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn new_symbol(name: &str, kind: SymbolKind, file: &str, start: usize, end: usize) -> NewSymbol {
        NewSymbol {
            name: name.to_string(),
            kind,
            file_path: file.to_string(),
            line_start: start,
            line_end: end,
            content: None,
        }
    }

    #[test]
    fn test_open_creates_state_dir() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(dir.path().join(STATE_DIR).join(DB_FILE).exists());
        store.close();

        // Reopening an existing store is fine
        Store::open(dir.path()).unwrap();
    }

    #[test]
    fn test_add_symbol_ids_are_monotonic() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let a = store.add_symbol(&new_symbol("a", SymbolKind::Function, "a.go", 1, 2)).unwrap();
        let b = store.add_symbol(&new_symbol("b", SymbolKind::Function, "a.go", 3, 4)).unwrap();
        assert!(b > a);

        let fetched = store.get_symbol(a).unwrap().unwrap();
        assert_eq!(fetched.name, "a");
        assert_eq!(fetched.kind, SymbolKind::Function);
        assert_eq!((fetched.line_start, fetched.line_end), (1, 2));
    }

    #[test]
    fn test_search_matches_name_or_kind_ordered_by_name() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store.add_symbol(&new_symbol("zeta", SymbolKind::Function, "z.ts", 1, 1)).unwrap();
        store.add_symbol(&new_symbol("Product", SymbolKind::Interface, "p.ts", 1, 5)).unwrap();
        store.add_symbol(&new_symbol("alpha", SymbolKind::Function, "a.ts", 1, 1)).unwrap();

        let functions: Vec<String> = store
            .search_symbols("function")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(functions, vec!["alpha", "zeta"]);

        let by_name = store.search_symbols("Prod").unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].kind, SymbolKind::Interface);

        // Case-sensitive
        assert!(store.search_symbols("prod").unwrap().is_empty());
        assert!(store.search_symbols("nothing-here").unwrap().is_empty());
    }

    #[test]
    fn test_get_symbols_by_kind() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store.add_symbol(&new_symbol("User", SymbolKind::Class, "u.ts", 1, 9)).unwrap();
        store.add_symbol(&new_symbol("getUser", SymbolKind::Function, "u.ts", 10, 12)).unwrap();

        let classes = store.get_symbols_by_kind(SymbolKind::Class).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "User");
        assert!(store.get_symbols_by_kind(SymbolKind::Trait).unwrap().is_empty());
    }

    #[test]
    fn test_find_related_follows_outgoing_edges_only() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let handler = store.add_symbol(&new_symbol("getProduct", SymbolKind::Function, "h.go", 1, 3)).unwrap();
        let model = store.add_symbol(&new_symbol("Product", SymbolKind::Type, "m.go", 1, 4)).unwrap();
        let other = store.add_symbol(&new_symbol("Order", SymbolKind::Type, "m.go", 5, 8)).unwrap();

        assert!(store.add_relationship(handler, model, RelationshipType::References).unwrap());
        // Same edge again is ignored
        assert!(!store.add_relationship(handler, model, RelationshipType::References).unwrap());

        let related = store.find_related(handler).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, model);

        assert!(store.find_related(model).unwrap().is_empty());
        assert!(store.find_related(other).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().total_relationships, 1);
    }

    #[test]
    fn test_replace_file_symbols_cascades_edges() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let old = store
            .replace_file_symbols("h.go", "go", "h1", &[new_symbol("getProduct", SymbolKind::Function, "h.go", 1, 3)])
            .unwrap();
        let model = store
            .replace_file_symbols("m.go", "go", "m1", &[new_symbol("Product", SymbolKind::Type, "m.go", 1, 4)])
            .unwrap();
        store.add_relationship(old[0], model[0], RelationshipType::References).unwrap();

        let fresh = store
            .replace_file_symbols(
                "h.go",
                "go",
                "h2",
                &[
                    new_symbol("getProduct", SymbolKind::Function, "h.go", 2, 4),
                    new_symbol("listProducts", SymbolKind::Function, "h.go", 6, 9),
                ],
            )
            .unwrap();

        assert_eq!(fresh.len(), 2);
        assert!(fresh[0] > old[0]);
        assert!(store.get_symbol(old[0]).unwrap().is_none());
        assert_eq!(store.symbols_in_file("h.go").unwrap().len(), 2);
        assert_eq!(store.file_hash("h.go").unwrap().as_deref(), Some("h2"));

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_symbols, 3);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_relationships, 0);
        assert_eq!(store.language_counts().unwrap(), vec![("go".to_string(), 2)]);
    }

    #[test]
    fn test_remove_file() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store
            .replace_file_symbols("a.py", "python", "x", &[new_symbol("run", SymbolKind::Function, "a.py", 1, 2)])
            .unwrap();
        assert_eq!(store.remove_file("a.py").unwrap(), 1);
        assert!(store.file_hash("a.py").unwrap().is_none());
        assert_eq!(store.stats().unwrap().total_symbols, 0);
    }

    #[test]
    fn test_kind_counts_and_clear() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        store.add_symbol(&new_symbol("a", SymbolKind::Function, "a.rs", 1, 1)).unwrap();
        store.add_symbol(&new_symbol("b", SymbolKind::Function, "a.rs", 2, 2)).unwrap();
        store.add_symbol(&new_symbol("C", SymbolKind::Struct, "a.rs", 3, 3)).unwrap();

        let counts = store.kind_counts().unwrap();
        assert_eq!(counts[0], ("function".to_string(), 2));
        assert_eq!(counts[1], ("struct".to_string(), 1));

        store.clear().unwrap();
        assert_eq!(store.stats().unwrap().total_symbols, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_search_returns_every_match_sorted(
            names in proptest::collection::vec("[a-zA-Z]{1,8}", 1..12),
            query in "[a-zA-Z]{1,2}",
        ) {
            let dir = tempdir().unwrap();
            let store = Store::open(dir.path()).unwrap();
            for (i, name) in names.iter().enumerate() {
                store.add_symbol(&new_symbol(name, SymbolKind::Class, "p.ts", i + 1, i + 1)).unwrap();
            }

            let hits: Vec<String> = store.search_symbols(&query).unwrap().into_iter().map(|s| s.name).collect();

            let mut expected: Vec<String> = names
                .iter()
                .filter(|n| n.contains(query.as_str()) || "class".contains(query.as_str()))
                .cloned()
                .collect();
            expected.sort();
            prop_assert_eq!(hits, expected);
        }
    }
}
