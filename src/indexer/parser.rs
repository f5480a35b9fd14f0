// Language detection and top-level declaration extraction

use std::path::Path;

use anyhow::Context;
use tree_sitter::{Node, Parser as TreeParser, Tree};

use crate::index::SymbolKind;

/// Declarations larger than this are stored without cached content
const MAX_CACHED_CONTENT: usize = 4096;

/// Node kinds that carry an identifier for the enclosing declaration
const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
];

const NAME_FIELDS: &[&str] = &["name", "value"];

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Go,
    TypeScript,
    Tsx,
    Python,
    Rust,
    Java,
}

impl Language {
    /// Pick a grammar from the file name; `None` means "not indexed"
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        // Declaration files only describe shapes that live elsewhere
        if file_name.ends_with(".d.ts") {
            return None;
        }

        match path.extension()?.to_str()? {
            "go" => Some(Language::Go),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "py" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "java" => Some(Language::Java),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Java => "java",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }

    /// Map a syntax node kind to the declaration kind it introduces
    fn declaration_kind(&self, node_kind: &str) -> Option<SymbolKind> {
        match self {
            Language::Go => match node_kind {
                "function_declaration" => Some(SymbolKind::Function),
                "method_declaration" => Some(SymbolKind::Method),
                "type_declaration" => Some(SymbolKind::Type),
                _ => None,
            },
            Language::TypeScript | Language::Tsx => match node_kind {
                "function_declaration" | "generator_function_declaration" => Some(SymbolKind::Function),
                "class_declaration" | "abstract_class_declaration" => Some(SymbolKind::Class),
                "interface_declaration" => Some(SymbolKind::Interface),
                "type_alias_declaration" => Some(SymbolKind::TypeAlias),
                "enum_declaration" => Some(SymbolKind::Enum),
                _ => None,
            },
            Language::Python => match node_kind {
                "function_definition" => Some(SymbolKind::Function),
                "class_definition" => Some(SymbolKind::Class),
                _ => None,
            },
            Language::Rust => match node_kind {
                "function_item" => Some(SymbolKind::Function),
                "struct_item" => Some(SymbolKind::Struct),
                "enum_item" => Some(SymbolKind::Enum),
                "trait_item" => Some(SymbolKind::Trait),
                "type_item" => Some(SymbolKind::TypeAlias),
                _ => None,
            },
            Language::Java => match node_kind {
                "class_declaration" | "record_declaration" => Some(SymbolKind::Class),
                "interface_declaration" => Some(SymbolKind::Interface),
                "enum_declaration" => Some(SymbolKind::Enum),
                _ => None,
            },
        }
    }

    /// Kinds accepted directly under a wrapper; `export default` may wrap an
    /// anonymous function or class expression
    fn wrapped_kind(&self, node_kind: &str) -> Option<SymbolKind> {
        self.declaration_kind(node_kind).or_else(|| match (self, node_kind) {
            (Language::TypeScript | Language::Tsx, "function_expression" | "function") => Some(SymbolKind::Function),
            (Language::TypeScript | Language::Tsx, "class") => Some(SymbolKind::Class),
            _ => None,
        })
    }

    /// Wrapper nodes whose direct children are searched once more, with the
    /// placeholder used when the wrapped declaration has no name
    fn wrapper_placeholder(&self, node_kind: &str) -> Option<&'static str> {
        match (self, node_kind) {
            (Language::TypeScript | Language::Tsx, "export_statement" | "export_default_declaration") => {
                Some("default")
            }
            (Language::Python, "decorated_definition") => Some("anonymous"),
            _ => None,
        }
    }
}

/// A declaration found in one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive
    pub line_start: usize,
    /// 1-based, inclusive
    pub line_end: usize,
    pub content: Option<String>,
}

/// Parse `source` and return its top-level declarations in source order
pub fn extract_declarations(language: Language, source: &str) -> anyhow::Result<Vec<Declaration>> {
    let tree = parse_tree(language, source)?;
    let root = tree.root_node();

    let mut declarations = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if let Some(kind) = language.declaration_kind(child.kind()) {
            declarations.push(declaration(child, kind, source, "anonymous"));
            continue;
        }

        if let Some(placeholder) = language.wrapper_placeholder(child.kind()) {
            let mut inner = child.walk();
            for sub in child.named_children(&mut inner) {
                if let Some(kind) = language.wrapped_kind(sub.kind()) {
                    declarations.push(declaration(sub, kind, source, placeholder));
                }
            }
        }
    }

    Ok(declarations)
}

fn parse_tree(language: Language, source: &str) -> anyhow::Result<Tree> {
    let mut parser = TreeParser::new();
    parser
        .set_language(&language.grammar())
        .with_context(|| format!("Failed to load {} grammar", language.name()))?;

    parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse {} source", language.name()))
}

fn declaration(node: Node, kind: SymbolKind, source: &str, placeholder: &str) -> Declaration {
    let name = resolve_name(node, source).unwrap_or_else(|| placeholder.to_string());
    let text = &source[node.byte_range()];

    Declaration {
        name,
        kind,
        line_start: node.start_position().row + 1,
        line_end: node.end_position().row + 1,
        content: (text.len() <= MAX_CACHED_CONTENT).then(|| text.to_string()),
    }
}

/// Name fields first, then the first identifier-shaped child.
///
/// Go groups type declarations as `type_declaration > type_spec`, so the
/// same lookup is tried once on the first named child.
fn resolve_name(node: Node, source: &str) -> Option<String> {
    direct_name(node, source).or_else(|| {
        let spec = node.named_child(0)?;
        matches!(spec.kind(), "type_spec" | "type_alias")
            .then(|| direct_name(spec, source))
            .flatten()
    })
}

fn direct_name(node: Node, source: &str) -> Option<String> {
    for field in NAME_FIELDS {
        if let Some(named) = node.child_by_field_name(field) {
            if IDENTIFIER_KINDS.contains(&named.kind()) {
                return Some(source[named.byte_range()].to_string());
            }
        }
    }

    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find(|c| IDENTIFIER_KINDS.contains(&c.kind()))
        .map(|c| source[c.byte_range()].to_string());
    found
}
