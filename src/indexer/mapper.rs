// Heuristic relationship inference over indexed symbols

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::index::{RelationshipType, Store, Symbol};

/// Handler-style names: a CRUD verb followed by the name of what they act on
static HANDLER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:get|list|create|update|delete|handle|fetch|save|find|remove)_?([A-Za-z][A-Za-z0-9_]*)$")
        .expect("handler pattern is valid")
});

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MappingReport {
    pub candidates: usize,
    pub inserted: usize,
}

/// Links handlers to the models they are named after.
///
/// `getProduct`, `list_products` and `HandleProduct` all reference a
/// type-like symbol named `Product`. Edges are unique per pair, so running
/// the mapper again only adds edges for newly indexed symbols.
pub struct Mapper {
    store: Store,
}

impl Mapper {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn map_relationships(&self) -> Result<MappingReport> {
        let symbols = self.store.all_symbols()?;

        let mut models: HashMap<String, Vec<&Symbol>> = HashMap::new();
        for symbol in symbols.iter().filter(|s| s.kind.is_type_like()) {
            models.entry(normalize(&symbol.name)).or_default().push(symbol);
        }

        let mut report = MappingReport::default();
        for handler in symbols.iter().filter(|s| s.kind.is_callable()) {
            let Some(subject) = handler_subject(&handler.name) else {
                continue;
            };

            for model in model_candidates(&models, &subject) {
                report.candidates += 1;
                if self.store.add_relationship(handler.id, model.id, RelationshipType::References)? {
                    debug!("{} references {}", handler.name, model.name);
                    report.inserted += 1;
                }
            }
        }

        info!(
            "Mapped relationships: {} candidates, {} new edges",
            report.candidates, report.inserted
        );
        Ok(report)
    }
}

fn normalize(name: &str) -> String {
    name.chars().filter(|c| *c != '_').flat_map(char::to_lowercase).collect()
}

fn handler_subject(name: &str) -> Option<String> {
    HANDLER_NAME
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize(m.as_str()))
}

fn model_candidates<'a>(models: &'a HashMap<String, Vec<&'a Symbol>>, subject: &str) -> Vec<&'a Symbol> {
    // Plural forms: listProducts -> Product, fetchAddresses -> Address
    let singular = [
        Some(subject),
        subject.strip_suffix("es"),
        subject.strip_suffix('s'),
    ];

    let mut found: Vec<&Symbol> = Vec::new();
    for key in singular.into_iter().flatten() {
        for &model in models.get(key).into_iter().flatten() {
            if !found.iter().any(|f| f.id == model.id) {
                found.push(model);
            }
        }
    }
    found
}
