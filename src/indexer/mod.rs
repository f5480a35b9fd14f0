// Project indexing, relationship mapping and file watching

pub mod mapper;
pub mod parser;
pub mod watcher;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::index::{NewSymbol, Store};
use parser::Language;

/// What happened to a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// No grammar for this extension
    Unsupported,
    /// Content hash matches the last indexed version
    Unchanged,
    /// Re-parsed; holds the number of symbols now stored for the file
    Indexed(usize),
}

#[derive(Debug)]
pub struct IndexFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of a project walk
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub symbols: usize,
    pub failures: Vec<IndexFailure>,
}

/// Walks a project and keeps the store in sync with its sources
pub struct Indexer {
    store: Store,
    root: PathBuf,
    exclude: Vec<String>,
    progress: Option<ProgressBar>,
}

impl Indexer {
    /// `root` anchors the relative paths under which symbols are stored
    pub fn new(store: Store, root: impl AsRef<Path>, exclude: Vec<String>) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve project root: {}", root.display()))?;

        Ok(Self {
            store,
            root,
            exclude,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn can_index_file(&self, path: &Path) -> bool {
        Language::from_path(path).is_some()
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }

    /// Index every regular file under `dir`.
    ///
    /// Per-file failures are collected in the report; a directory that
    /// cannot be read aborts the walk.
    pub fn index_project(&self, dir: impl AsRef<Path>) -> Result<IndexReport> {
        let dir = dir.as_ref();
        info!("Indexing project: {}", dir.display());

        let mut report = IndexReport::default();
        let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
            !(entry.depth() > 0
                && entry.file_type().is_dir()
                && entry.file_name().to_str().is_some_and(|name| self.is_excluded_dir(name)))
        });

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if let Some(progress) = &self.progress {
                progress.set_message(path.display().to_string());
                progress.tick();
            }

            match self.index_file(path) {
                Ok(FileOutcome::Indexed(count)) => {
                    report.files_indexed += 1;
                    report.symbols += count;
                }
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Ok(FileOutcome::Unsupported) => {}
                Err(e) => {
                    warn!("{:#}", e);
                    report.failures.push(IndexFailure {
                        path: path.to_path_buf(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        info!(
            "Indexed {} files ({} unchanged), {} symbols, {} failures",
            report.files_indexed,
            report.files_unchanged,
            report.symbols,
            report.failures.len()
        );
        Ok(report)
    }

    /// Parse one file and replace its symbols in the store
    pub fn index_file(&self, path: &Path) -> Result<FileOutcome> {
        let Some(language) = Language::from_path(path) else {
            return Ok(FileOutcome::Unsupported);
        };

        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;

        let key = self.file_key(path);
        let content_hash = blake3::hash(source.as_bytes()).to_string();
        if self.store.file_hash(&key)?.as_deref() == Some(content_hash.as_str()) {
            debug!("Unchanged: {}", key);
            return Ok(FileOutcome::Unchanged);
        }

        let declarations = parser::extract_declarations(language, &source)
            .with_context(|| format!("Failed to parse file {}", path.display()))?;

        let symbols: Vec<NewSymbol> = declarations
            .into_iter()
            .map(|d| NewSymbol {
                name: d.name,
                kind: d.kind,
                file_path: key.clone(),
                line_start: d.line_start,
                line_end: d.line_end,
                content: d.content,
            })
            .collect();

        self.store
            .replace_file_symbols(&key, language.name(), &content_hash, &symbols)
            .with_context(|| format!("Failed to store symbols for {}", key))?;

        debug!("Indexed {}: {} symbols", key, symbols.len());
        Ok(FileOutcome::Indexed(symbols.len()))
    }

    /// Drop a deleted file from the store
    pub fn remove_file(&self, path: &Path) -> Result<usize> {
        let key = self.file_key(path);
        let removed = self.store.remove_file(&key)?;
        debug!("Removed {}: {} symbols", key, removed);
        Ok(removed)
    }

    /// Store key for a file: relative to the project root, `/`-separated
    pub fn file_key(&self, path: &Path) -> String {
        let absolute = path
            .canonicalize()
            .unwrap_or_else(|_| if path.is_absolute() { path.to_path_buf() } else { self.root.join(path) });

        let relative = absolute.strip_prefix(&self.root).unwrap_or(&absolute);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SymbolKind;
    use std::fs;
    use tempfile::tempdir;

    fn default_exclude() -> Vec<String> {
        crate::config::Config::default().indexing.exclude
    }

    fn setup() -> (tempfile::TempDir, Indexer) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let indexer = Indexer::new(store, dir.path(), default_exclude()).unwrap();
        (dir, indexer)
    }

    #[test]
    fn test_single_function_end_to_end() {
        let (dir, indexer) = setup();
        fs::write(
            dir.path().join("main.go"),
            "package main\n\nfunc foo() {\n\tprintln(\"hi\")\n}\n",
        )
        .unwrap();

        let report = indexer.index_project(dir.path()).unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.symbols, 1);
        assert!(report.failures.is_empty());

        let hits = indexer.store().search_symbols("foo").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "foo");
        assert_eq!(hits[0].kind, SymbolKind::Function);
        assert_eq!((hits[0].line_start, hits[0].line_end), (3, 5));
        assert_eq!(hits[0].file_path, "main.go");
    }

    #[test]
    fn test_unsupported_extension_is_skipped() {
        let (dir, indexer) = setup();
        let path = dir.path().join("notes.md");
        fs::write(&path, "# function foo").unwrap();

        assert_eq!(indexer.index_file(&path).unwrap(), FileOutcome::Unsupported);
        assert_eq!(indexer.store().stats().unwrap().total_symbols, 0);
    }

    #[test]
    fn test_index_file_counts_declarations() {
        let (dir, indexer) = setup();
        let path = dir.path().join("api.ts");
        fs::write(
            &path,
            "export interface Product { id: string }\nexport function getProduct(): Product { return { id: '' } }\nconst x = 1;\ntype Id = string;\n",
        )
        .unwrap();

        assert_eq!(indexer.index_file(&path).unwrap(), FileOutcome::Indexed(3));
        assert_eq!(indexer.store().symbols_in_file("api.ts").unwrap().len(), 3);
    }

    #[test]
    fn test_reindex_replaces_previous_symbols() {
        let (dir, indexer) = setup();
        let path = dir.path().join("lib.py");
        fs::write(&path, "def a():\n    pass\n\ndef b():\n    pass\n").unwrap();
        assert_eq!(indexer.index_file(&path).unwrap(), FileOutcome::Indexed(2));

        // Same content short-circuits
        assert_eq!(indexer.index_file(&path).unwrap(), FileOutcome::Unchanged);

        fs::write(&path, "def c():\n    pass\n").unwrap();
        assert_eq!(indexer.index_file(&path).unwrap(), FileOutcome::Indexed(1));

        let names: Vec<String> = indexer
            .store()
            .symbols_in_file("lib.py")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn test_walk_skips_excluded_directories() {
        let (dir, indexer) = setup();
        for skipped in ["node_modules/pkg", ".git/hooks", "src"] {
            fs::create_dir_all(dir.path().join(skipped)).unwrap();
        }
        fs::write(dir.path().join("node_modules/pkg/index.ts"), "function hidden() {}\n").unwrap();
        fs::write(dir.path().join(".git/hooks/x.py"), "def hook():\n    pass\n").unwrap();
        fs::write(dir.path().join("src/app.rs"), "fn visible() {}\n").unwrap();

        let report = indexer.index_project(dir.path()).unwrap();
        assert_eq!(report.files_indexed, 1);

        let all = indexer.store().all_symbols().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "visible");
        assert_eq!(all[0].file_path, "src/app.rs");
    }

    #[test]
    fn test_unreadable_file_is_reported_not_fatal() {
        let (dir, indexer) = setup();
        fs::write(dir.path().join("bad.go"), [0xff, 0xfe, 0x00, 0x81]).unwrap();
        fs::write(dir.path().join("good.go"), "package x\n\nfunc Ok() {}\n").unwrap();

        let report = indexer.index_project(dir.path()).unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("bad.go"));
        assert!(report.failures[0].error.contains("Failed to read file"));
    }

    #[test]
    fn test_missing_root_aborts_walk() {
        let (dir, indexer) = setup();
        assert!(indexer.index_project(dir.path().join("does-not-exist")).is_err());
    }

    #[test]
    fn test_remove_file() {
        let (dir, indexer) = setup();
        let path = dir.path().join("gone.rs");
        fs::write(&path, "fn a() {}\nfn b() {}\n").unwrap();
        indexer.index_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(indexer.remove_file(&path).unwrap(), 2);
        assert_eq!(indexer.store().stats().unwrap().total_files, 0);
    }
}
