// Tools the agent can call against the project

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::agent::model::ToolSpec;
use crate::index::Store;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to parse arguments: {0}")]
    BadArguments(#[from] serde_json::Error),

    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("failed to {action}: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("search failed: {0:#}")]
    Search(anyhow::Error),
}

impl ToolError {
    fn io(action: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| ToolError::Io { action, source }
    }
}

/// A parsed tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tool {
    ReadFile { path: String },
    ListDir { path: String },
    SearchSymbols { query: String },
    WriteFile { path: String, content: String },
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct ListDirArgs {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

impl Tool {
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let tool = match name {
            "read_file" => {
                let args: PathArgs = serde_json::from_str(arguments)?;
                Tool::ReadFile { path: args.path }
            }
            "list_dir" => {
                let args: ListDirArgs = serde_json::from_str(arguments)?;
                let path = if args.path.is_empty() { ".".to_string() } else { args.path };
                Tool::ListDir { path }
            }
            "search_symbols" => {
                let args: SearchArgs = serde_json::from_str(arguments)?;
                Tool::SearchSymbols { query: args.query }
            }
            "write_file" => {
                let args: WriteArgs = serde_json::from_str(arguments)?;
                Tool::WriteFile {
                    path: args.path,
                    content: args.content,
                }
            }
            other => return Err(ToolError::Unknown(other.to_string())),
        };
        Ok(tool)
    }

    /// Everything offered to the model
    pub fn catalogue() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "read_file",
                description: "Read the content of a file",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "The relative path to the file" }
                    },
                    "required": ["path"]
                }),
            },
            ToolSpec {
                name: "list_dir",
                description: "List files and directories in a path",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "The directory path to list (default: .)" }
                    },
                    "required": ["path"]
                }),
            },
            ToolSpec {
                name: "search_symbols",
                description: "Search for symbols (functions, classes) in the project",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The name or kind of symbol to search for" }
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: "write_file",
                description: "Create or overwrite a file with new content",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "The relative path to the file" },
                        "content": { "type": "string", "description": "The content to write to the file" }
                    },
                    "required": ["path", "content"]
                }),
            },
        ]
    }
}

/// Runs tools relative to a working directory
pub struct ToolBox {
    root: PathBuf,
    store: Option<Store>,
}

impl ToolBox {
    pub fn new(root: impl Into<PathBuf>, store: Option<Store>) -> Self {
        Self {
            root: root.into(),
            store,
        }
    }

    pub fn run(&self, tool: &Tool) -> Result<String, ToolError> {
        match tool {
            Tool::ReadFile { path } => self.read_file(path),
            Tool::ListDir { path } => self.list_dir(path),
            Tool::SearchSymbols { query } => self.search_symbols(query),
            Tool::WriteFile { path, content } => self.write_file(path, content),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn read_file(&self, path: &str) -> Result<String, ToolError> {
        fs::read_to_string(self.resolve(path)).map_err(ToolError::io("read file"))
    }

    fn list_dir(&self, path: &str) -> Result<String, ToolError> {
        let mut entries = fs::read_dir(self.resolve(path))
            .map_err(ToolError::io("list directory"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(ToolError::io("list directory"))?;
        entries.sort_by_key(|e| e.file_name());

        let mut listing = String::new();
        for entry in entries {
            let metadata = entry.metadata().map_err(ToolError::io("list directory"))?;
            let marker = if metadata.is_dir() { "D" } else { "F" };
            let _ = writeln!(
                listing,
                "[{}] {} ({} bytes)",
                marker,
                entry.file_name().to_string_lossy(),
                metadata.len()
            );
        }
        Ok(listing)
    }

    fn search_symbols(&self, query: &str) -> Result<String, ToolError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ToolError::Search(anyhow::anyhow!("knowledge store is not open")))?;
        let symbols = store.search_symbols(query).map_err(ToolError::Search)?;

        if symbols.is_empty() {
            return Ok("No symbols found.".to_string());
        }

        let mut hits = String::new();
        for s in symbols {
            let _ = writeln!(hits, "{} ({}) in {}:{}", s.name, s.kind, s.file_path, s.line_start);
        }
        Ok(hits)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<String, ToolError> {
        write_with_parents(&self.resolve(path), content)?;
        Ok(write_ack(path, content))
    }
}

/// Acknowledgement returned for a write, real or captured
pub fn write_ack(path: &str, content: &str) -> String {
    format!("Successfully wrote {} bytes to {}", content.len(), path)
}

pub fn write_with_parents(path: &Path, content: &str) -> Result<(), ToolError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(ToolError::io("create directory"))?;
    }
    fs::write(path, content).map_err(ToolError::io("write file"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{NewSymbol, SymbolKind};
    use tempfile::tempdir;

    #[test]
    fn test_parse_tools() {
        assert_eq!(
            Tool::parse("read_file", r#"{"path":"a.go"}"#).unwrap(),
            Tool::ReadFile { path: "a.go".into() }
        );
        assert_eq!(
            Tool::parse("list_dir", "{}").unwrap(),
            Tool::ListDir { path: ".".into() }
        );
        assert!(matches!(
            Tool::parse("delete_everything", "{}"),
            Err(ToolError::Unknown(name)) if name == "delete_everything"
        ));

        let err = Tool::parse("write_file", "{not json").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse arguments"));
    }

    #[test]
    fn test_catalogue_names() {
        let names: Vec<&str> = Tool::catalogue().iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["read_file", "list_dir", "search_symbols", "write_file"]);
    }

    #[test]
    fn test_write_then_read_and_list() {
        let dir = tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), None);

        let ack = tools
            .run(&Tool::WriteFile {
                path: "src/new/app.ts".into(),
                content: "hello".into(),
            })
            .unwrap();
        assert_eq!(ack, "Successfully wrote 5 bytes to src/new/app.ts");

        let read = tools.run(&Tool::ReadFile { path: "src/new/app.ts".into() }).unwrap();
        assert_eq!(read, "hello");

        let listing = tools.run(&Tool::ListDir { path: "src".into() }).unwrap();
        assert!(listing.starts_with("[D] new ("));

        let listing = tools.run(&Tool::ListDir { path: "src/new".into() }).unwrap();
        assert_eq!(listing, "[F] app.ts (5 bytes)\n");
    }

    #[test]
    fn test_missing_file_is_tool_error() {
        let dir = tempdir().unwrap();
        let tools = ToolBox::new(dir.path(), None);
        let err = tools.run(&Tool::ReadFile { path: "nope.txt".into() }).unwrap_err();
        assert!(err.to_string().starts_with("failed to read file"));
    }

    #[test]
    fn test_search_symbols_format() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .add_symbol(&NewSymbol {
                name: "getProduct".into(),
                kind: SymbolKind::Function,
                file_path: "api.ts".into(),
                line_start: 12,
                line_end: 20,
                content: None,
            })
            .unwrap();

        let tools = ToolBox::new(dir.path(), Some(store));
        assert_eq!(
            tools.run(&Tool::SearchSymbols { query: "Product".into() }).unwrap(),
            "getProduct (function) in api.ts:12\n"
        );
        assert_eq!(
            tools.run(&Tool::SearchSymbols { query: "zzz".into() }).unwrap(),
            "No symbols found."
        );
    }
}
