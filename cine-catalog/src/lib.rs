pub mod movie;
pub mod pricing;

pub use movie::{CatalogError, InMemoryCatalog, MovieCatalog, MovieListing};
pub use pricing::{PricingConfig, PricingKind, PricingPolicy, PricingResolver};
