pub mod models;
pub mod pii;

pub use models::ReconciliationEntry;
pub use pii::Masked;
