//! In-memory catalog index and the reload handle.
//!
//! `CatalogIndex` is an immutable snapshot built from one pass over the
//! price CSV. `CatalogHandle` owns the current snapshot behind a
//! `RwLock<Arc<_>>`; reload builds a complete new index off to the side and
//! swaps the Arc, so in-flight readers keep whatever snapshot they grabbed
//! and never observe a half-loaded catalog.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::catalog::entry::{normalize_sku, CatalogEntry, CatalogRow};
use crate::error::CatalogError;

/// One immutable catalog snapshot.
#[derive(Debug)]
pub struct CatalogIndex {
    version: u64,
    entries: Vec<CatalogEntry>,
    by_sku: HashMap<String, usize>,
}

impl CatalogIndex {
    /// Build an index from already-parsed entries. Used by tests and reload.
    pub fn from_entries(version: u64, entries: Vec<CatalogEntry>) -> Self {
        let mut by_sku = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(sku) = &entry.sku {
                let key = normalize_sku(sku);
                if !key.is_empty() && by_sku.insert(key, idx).is_some() {
                    warn!(sku = %sku, "Duplicate SKU in catalog, keeping last");
                }
            }
        }
        Self {
            version,
            entries,
            by_sku,
        }
    }

    /// Load a snapshot from the price CSV at `path`.
    pub fn from_csv_path(path: &Path, version: u64) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut entries = Vec::new();
        for (row_no, result) in reader.deserialize::<CatalogRow>().enumerate() {
            let row = result?;
            if !row.is_usable() {
                continue;
            }

            let price_text = row.unit_price.trim().replace(['$', ','], "");
            let unit_price: Decimal =
                price_text
                    .parse()
                    .map_err(|e| CatalogError::InvalidPrice {
                        row: row_no + 2, // header + 1-based
                        value: row.unit_price.clone(),
                        message: format!("{e}"),
                    })?;

            let display_name = row.display_name();
            let id = entries.len() as u64;
            entries.push(CatalogEntry {
                id,
                normalized_name: display_name.to_uppercase(),
                display_name,
                sku: row
                    .item_no
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
                unit_price,
                unit: if row.unit.trim().is_empty() {
                    "EA".to_string()
                } else {
                    row.unit.trim().to_string()
                },
                category: row.category.trim().to_string(),
            });
        }

        if entries.is_empty() {
            return Err(CatalogError::Empty(path.to_path_buf()));
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            version,
            "Catalog loaded"
        );
        Ok(Self::from_entries(version, entries))
    }

    pub fn version(&self) -> u64 {
        self.version
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

    /// Exact lookup by normalized SKU.
    pub fn get_by_sku(&self, sku: &str) -> Option<&CatalogEntry> {
        let key = normalize_sku(sku);
        if key.is_empty() {
            return None;
        }
        self.by_sku.get(&key).map(|&idx| &self.entries[idx])
    }
}

/// Owner of the current catalog snapshot. Cheap to clone via `Arc`.
pub struct CatalogHandle {
    current: RwLock<Arc<CatalogIndex>>,
    path: PathBuf,
    next_version: AtomicU64,
}

impl CatalogHandle {
    /// Load the catalog from `path` and wrap it in a handle.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let index = CatalogIndex::from_csv_path(&path, 1)?;
        Ok(Self {
            current: RwLock::new(Arc::new(index)),
            path,
            next_version: AtomicU64::new(2),
        })
    }

    /// Wrap a pre-built index (tests).
    pub fn from_index(index: CatalogIndex) -> Self {
        let version = index.version();
        Self {
            current: RwLock::new(Arc::new(index)),
            path: PathBuf::new(),
            next_version: AtomicU64::new(version + 1),
        }
    }

    /// Current snapshot. Callers hold the Arc for as long as they need a
    /// consistent view; reload does not disturb it.
    pub fn snapshot(&self) -> Arc<CatalogIndex> {
        Arc::clone(&self.current.read().expect("catalog lock poisoned"))
    }

    /// Rebuild the index from disk and swap it in. On failure the previous
    /// snapshot stays in place. Returns the entry count of the new index.
    pub fn reload(&self) -> Result<usize, CatalogError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let index = CatalogIndex::from_csv_path(&self.path, version)?;
        let count = index.len();
        *self.current.write().expect("catalog lock poisoned") = Arc::new(index);
        info!(version, entries = count, "Catalog reloaded");
        Ok(count)
    }
}
