//! `plotcheck-audit`: data-quality and geometric reconciliation engine for
//! producer, plantation and parcel datasets.
//!
//! Pure engine crate: receives pre-loaded records (or CSV / GeoJSON text),
//! returns structured results. No CLI or file IO.

pub mod config;
pub mod consistency;
pub mod crs;
pub mod engine;
pub mod error;
pub mod load;
pub mod model;
pub mod outliers;
pub mod overlap;
pub mod parcels;
pub mod rollup;
pub mod summary;
pub mod surfaces;
pub mod tolerance;

pub use config::AuditConfig;
pub use engine::run;
pub use error::AuditError;
pub use load::load_input;
pub use model::{AnomalyKind, AnomalyRecord, AuditInput, AuditResult};
