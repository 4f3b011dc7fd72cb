use anyhow::{anyhow, Result};
use serde::Serialize;

/// A product class the classifier can output, with its shelf price.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub price: i64,
}

/// Ordered label → price mapping.
///
/// Entry order is the classifier's output order: score index `i` belongs to
/// `entries[i]`. The catalog is built once at startup and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelCatalog {
    entries: Vec<CatalogEntry>,
}

impl LabelCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(anyhow!("label catalog must not be empty"));
        }
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(anyhow!("label catalog entry {} has a blank name", i));
            }
            if entries[..i].iter().any(|prev| prev.name == entry.name) {
                return Err(anyhow!("duplicate label '{}' in catalog", entry.name));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn label_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|entry| entry.name.as_str())
    }

    pub fn price_of(&self, label: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|entry| entry.name == label)
            .map(|entry| entry.price)
    }
}

impl Default for LabelCatalog {
    fn default() -> Self {
        let entries = [("Snickers", 50), ("Mars", 45), ("KitKat", 40)]
            .into_iter()
            .map(|(name, price)| CatalogEntry {
                name: name.to_string(),
                price,
            })
            .collect();
        Self { entries }
    }
}
