pub mod api;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod store;
pub mod witness;

pub use error::{AuditError, Result};
