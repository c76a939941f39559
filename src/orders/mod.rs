//! Domain types for orders as they move through the relay.
//!
//! Each stage gets its own type: `LineItem` (untrusted extraction output),
//! `ResolvedLineItem` (after the catalog cascade), and the store's
//! `OrderRecord` (see `store::model`). Raw fields are carried all the way
//! through so a human can review what the vendor actually wrote.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

/// Product line an order is routed to. The prefix qualifies the vendor
/// order number into a globally unique idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Tileware,
    Laticrete,
}

impl Vendor {
    /// Product-line prefix used to build order keys ("TW-1234").
    pub fn prefix(&self) -> &'static str {
        match self {
            Vendor::Tileware => "TW",
            Vendor::Laticrete => "LAT",
        }
    }

    /// Brand word that vendors sometimes prepend to product names and that
    /// the catalog omits. Stripped before name matching.
    pub fn brand_prefix(&self) -> Option<&'static str> {
        match self {
            Vendor::Tileware => None,
            Vendor::Laticrete => Some("LATICRETE"),
        }
    }

    /// Recover the vendor from a stored order key ("LAT-43210").
    pub fn from_order_key(key: &str) -> Result<Vendor, ProcessError> {
        match key.split('-').next() {
            Some("TW") => Ok(Vendor::Tileware),
            Some("LAT") => Ok(Vendor::Laticrete),
            other => Err(ProcessError::UnknownVendorPrefix(
                other.unwrap_or("").to_string(),
            )),
        }
    }

    /// Build the vendor-qualified idempotency key for an order number.
    pub fn order_key(&self, order_number: &str) -> String {
        format!("{}-{}", self.prefix(), order_number.trim())
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::Tileware => write!(f, "TileWare"),
            Vendor::Laticrete => write!(f, "Laticrete"),
        }
    }
}

/// A raw line item as extracted from a vendor email. Untrusted input:
/// names are free text, SKUs are often mangled, prices may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub raw_name: String,
    #[serde(default)]
    pub raw_sku: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub raw_price: Option<Decimal>,
}

/// Which tier of the matching cascade produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactSku,
    PartialSku,
    NameSubstring,
    KeywordOverlap,
    FuzzySimilarity,
    NoMatch,
}

impl MatchStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            MatchStrategy::ExactSku => "exact_sku",
            MatchStrategy::PartialSku => "partial_sku",
            MatchStrategy::NameSubstring => "name_substring",
            MatchStrategy::KeywordOverlap => "keyword_overlap",
            MatchStrategy::FuzzySimilarity => "fuzzy_similarity",
            MatchStrategy::NoMatch => "no_match",
        }
    }
}

/// A line item after the catalog cascade. Raw fields are preserved
/// verbatim; resolved fields are filled in from the catalog entry when a
/// match was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLineItem {
    pub raw_name: String,
    #[serde(default)]
    pub raw_sku: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub raw_price: Option<Decimal>,

    #[serde(default)]
    pub catalog_id: Option<u64>,
    #[serde(default)]
    pub resolved_sku: Option<String>,
    #[serde(default)]
    pub resolved_price: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
    pub match_strategy: MatchStrategy,
    pub match_confidence: f64,
    pub needs_verification: bool,
}

impl ResolvedLineItem {
    /// Best available unit price: catalog price first, raw price as fallback.
    pub fn effective_price(&self) -> Option<Decimal> {
        self.resolved_price.or(self.raw_price)
    }

    /// Best available SKU for display.
    pub fn effective_sku(&self) -> Option<&str> {
        self.resolved_sku.as_deref().or(self.raw_sku.as_deref())
    }
}

/// Shipping address carried through from extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
}

/// A parsed order handed to the orchestrator by the extraction collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedOrder {
    pub order_number: String,
    pub customer_name: String,
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub total: Option<Decimal>,
    /// Raw source snippet (email subject/body excerpt) kept for audit.
    #[serde(default)]
    pub raw_source: Option<String>,
}

/// A parsed order together with its destination product line, as delivered
/// by an `OrderSource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingOrder {
    pub vendor: Vendor,
    pub order: ParsedOrder,
}

/// Outcome of submitting one order to the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Order was forwarded and recorded.
    Sent { order_key: String },
    /// An order with this key was already sent; nothing was dispatched.
    Duplicate {
        order_key: String,
        sent_at: Option<DateTime<Utc>>,
    },
    /// Processing failed; a failed record was written for later retry.
    Failed { order_key: String, detail: String },
}

impl SubmitOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SubmitOutcome::Sent { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SubmitOutcome::Duplicate { .. })
    }
}
