//! Order Relay — vendor order-confirmation forwarding core.
//!
//! Converts parsed vendor order confirmations into verified, price-enriched
//! purchase orders and forwards each one to fulfillment exactly once.

pub mod api;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orders;
pub mod poller;
pub mod processor;
pub mod render;
pub mod store;
