//! Catalog entry model and the CSV row it is built from.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One canonical product in the price catalog. Immutable per load; the
/// whole index is rebuilt on reload, entries are never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Position in the loaded index. Stable for one catalog snapshot only.
    pub id: u64,
    /// Display name as printed on outbound documents (brand + description).
    pub display_name: String,
    /// Uppercased display name used by the matching tiers.
    pub normalized_name: String,
    /// Vendor item number. Unique within the catalog when present.
    pub sku: Option<String>,
    pub unit_price: Decimal,
    pub unit: String,
    pub category: String,
}

/// Raw CSV row shape. The price list export uses these headers.
#[derive(Debug, Deserialize)]
pub struct CatalogRow {
    #[serde(rename = "item_no", default)]
    pub item_no: Option<String>,
    #[serde(default)]
    pub brand: String,
    pub description: String,
    pub unit_price: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub category: String,
}

impl CatalogRow {
    /// Rows without a real description are filler in the source sheet.
    pub fn is_usable(&self) -> bool {
        let desc = self.description.trim();
        !desc.is_empty() && desc != "No Data"
    }

    /// Brand and description combined, the way the source sheet is searched.
    pub fn display_name(&self) -> String {
        let brand = self.brand.trim();
        let desc = self.description.trim();
        if brand.is_empty() {
            desc.to_string()
        } else {
            format!("{brand} {desc}")
        }
    }
}

/// Normalize a SKU for equality matching: strip `#` and surrounding
/// whitespace, uppercase. Vendors reliably mangle everything else.
pub fn normalize_sku(sku: &str) -> String {
    sku.trim().replace('#', "").trim().to_uppercase()
}
