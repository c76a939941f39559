//! Order document rendering.
//!
//! Outbound orders carry a rendered order form. Real-world forms are fussy
//! (vendor templates change field names between revisions), so rendering is
//! a chain of strategies tried in order: the first one that produces
//! non-empty output wins, and the orchestrator never learns which one did.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::RenderError;
use crate::orders::{ResolvedLineItem, ShippingAddress};

/// Everything a renderer needs to produce an order form.
#[derive(Debug, Clone)]
pub struct RenderOrder {
    pub order_key: String,
    pub customer_name: String,
    pub shipping_address: Option<ShippingAddress>,
    pub line_items: Vec<ResolvedLineItem>,
    pub total: Option<Decimal>,
}

impl RenderOrder {
    fn line_total(&self) -> Decimal {
        self.line_items
            .iter()
            .map(|item| {
                item.effective_price().unwrap_or_default() * Decimal::from(item.quantity)
            })
            .sum()
    }

    /// Order total: explicit total when the source supplied one, otherwise
    /// the sum of resolved line prices.
    pub fn effective_total(&self) -> Decimal {
        self.total.unwrap_or_else(|| self.line_total())
    }
}

/// One way to turn an order into an outbound document.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Short name used in logs and failure reports.
    fn label(&self) -> &str;

    async fn render(&self, order: &RenderOrder) -> Result<Vec<u8>, RenderError>;
}

/// Fills a vendor-supplied form template. Placeholders: `{order_key}`,
/// `{customer_name}`, `{ship_to}`, `{lines}`, `{total}`.
pub struct FormTemplateRenderer {
    template: String,
}

impl FormTemplateRenderer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The stock purchase-order form.
    pub fn standard() -> Self {
        Self::new(
            "PURCHASE ORDER {order_key}\n\
             \n\
             Customer: {customer_name}\n\
             Ship to:\n{ship_to}\n\
             \n\
             Items:\n{lines}\n\
             \n\
             Order total: ${total}\n",
        )
    }
}

#[async_trait]
impl DocumentRenderer for FormTemplateRenderer {
    fn label(&self) -> &str {
        "form_template"
    }

    async fn render(&self, order: &RenderOrder) -> Result<Vec<u8>, RenderError> {
        if !self.template.contains("{lines}") {
            return Err(RenderError::StrategyFailed {
                strategy: self.label().to_string(),
                reason: "template has no {lines} placeholder".to_string(),
            });
        }
        if order.line_items.is_empty() {
            return Err(RenderError::StrategyFailed {
                strategy: self.label().to_string(),
                reason: "order has no line items".to_string(),
            });
        }

        let lines = order
            .line_items
            .iter()
            .map(format_line)
            .collect::<Vec<_>>()
            .join("\n");

        let out = self
            .template
            .replace("{order_key}", &order.order_key)
            .replace("{customer_name}", &order.customer_name)
            .replace("{ship_to}", &format_ship_to(order.shipping_address.as_ref()))
            .replace("{lines}", &lines)
            .replace("{total}", &order.effective_total().to_string());

        Ok(out.into_bytes())
    }
}

/// Emits one `field: value` pair per line, the shape form-ingestion systems
/// on the receiving side key on. Refuses orders without a single resolved
/// SKU since the downstream form requires item numbers.
pub struct FieldMapRenderer;

#[async_trait]
impl DocumentRenderer for FieldMapRenderer {
    fn label(&self) -> &str {
        "field_map"
    }

    async fn render(&self, order: &RenderOrder) -> Result<Vec<u8>, RenderError> {
        if !order.line_items.iter().any(|i| i.effective_sku().is_some()) {
            return Err(RenderError::StrategyFailed {
                strategy: self.label().to_string(),
                reason: "no line item carries an item number".to_string(),
            });
        }

        let mut out = String::new();
        out.push_str(&format!("order_number: {}\n", order.order_key));
        out.push_str(&format!("customer: {}\n", order.customer_name));
        if let Some(addr) = &order.shipping_address {
            out.push_str(&format!("ship_to: {}\n", format_ship_to(Some(addr)).replace('\n', ", ")));
        }
        for (i, item) in order.line_items.iter().enumerate() {
            let n = i + 1;
            out.push_str(&format!(
                "item_{n}_sku: {}\n",
                item.effective_sku().unwrap_or("UNKNOWN")
            ));
            out.push_str(&format!("item_{n}_desc: {}\n", item.raw_name));
            out.push_str(&format!("item_{n}_qty: {}\n", item.quantity));
            if let Some(price) = item.effective_price() {
                out.push_str(&format!("item_{n}_price: {price}\n"));
            }
        }
        out.push_str(&format!("total: {}\n", order.effective_total()));
        Ok(out.into_bytes())
    }
}

/// Last resort: a human-readable plain-text rendering. Succeeds for any
/// order that has at least one line item.
pub struct PlainTextRenderer;

#[async_trait]
impl DocumentRenderer for PlainTextRenderer {
    fn label(&self) -> &str {
        "plain_text"
    }

    async fn render(&self, order: &RenderOrder) -> Result<Vec<u8>, RenderError> {
        if order.line_items.is_empty() {
            return Err(RenderError::StrategyFailed {
                strategy: self.label().to_string(),
                reason: "order has no line items".to_string(),
            });
        }

        let mut out = format!(
            "Order {} for {}\n\n",
            order.order_key, order.customer_name
        );
        if let Some(addr) = &order.shipping_address {
            out.push_str("Ship to:\n");
            out.push_str(&format_ship_to(Some(addr)));
            out.push('\n');
        }
        for item in &order.line_items {
            out.push_str(&format_line(item));
            out.push('\n');
        }
        out.push_str(&format!("\nTotal: ${}\n", order.effective_total()));
        Ok(out.into_bytes())
    }
}

fn format_line(item: &ResolvedLineItem) -> String {
    let sku = item.effective_sku().unwrap_or("—");
    let price = item
        .effective_price()
        .map(|p| format!("${p}"))
        .unwrap_or_else(|| "price TBD".to_string());
    let flag = if item.needs_verification {
        "  [NEEDS VERIFICATION]"
    } else {
        ""
    };
    format!("  {} x{}  [{}]  {}{}", item.raw_name, item.quantity, sku, price, flag)
}

fn format_ship_to(addr: Option<&ShippingAddress>) -> String {
    match addr {
        Some(a) => {
            let mut lines = vec![a.street.clone()];
            let city_line = format!("{}, {} {}", a.city, a.state, a.zip);
            lines.push(city_line.trim_matches([',', ' ']).to_string());
            lines.join("\n")
        }
        None => "(no shipping address on order)".to_string(),
    }
}

/// Ordered strategy chain. Tries each renderer until one yields non-empty
/// output; empty output counts as a failure for that strategy.
pub struct FallbackRenderer {
    strategies: Vec<Box<dyn DocumentRenderer>>,
}

impl FallbackRenderer {
    pub fn new(strategies: Vec<Box<dyn DocumentRenderer>>) -> Self {
        Self { strategies }
    }

    /// The production chain: template fill, field map, plain text.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(FormTemplateRenderer::standard()),
            Box::new(FieldMapRenderer),
            Box::new(PlainTextRenderer),
        ])
    }
}

#[async_trait]
impl DocumentRenderer for FallbackRenderer {
    fn label(&self) -> &str {
        "fallback_chain"
    }

    async fn render(&self, order: &RenderOrder) -> Result<Vec<u8>, RenderError> {
        for strategy in &self.strategies {
            match strategy.render(order).await {
                Ok(bytes) if !bytes.is_empty() => {
                    debug!(strategy = strategy.label(), order_key = %order.order_key, "Rendered order document");
                    return Ok(bytes);
                }
                Ok(_) => {
                    debug!(strategy = strategy.label(), order_key = %order.order_key, "Strategy produced empty output, trying next");
                }
                Err(e) => {
                    debug!(strategy = strategy.label(), order_key = %order.order_key, error = %e, "Strategy failed, trying next");
                }
            }
        }
        Err(RenderError::AllStrategiesFailed {
            attempted: self.strategies.len(),
        })
    }
}
