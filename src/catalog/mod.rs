//! Price catalog — CSV-loaded searchable index and the product-resolution
//! cascade that maps free-text line items onto it.

pub mod entry;
pub mod index;
pub mod resolver;

pub use entry::CatalogEntry;
pub use index::{CatalogHandle, CatalogIndex};
pub use resolver::{AlternativeMatch, Resolver};
