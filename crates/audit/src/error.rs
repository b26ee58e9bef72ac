use thiserror::Error;

/// Structural failures. Anything that still leaves a meaningful partial
/// result (missing range column, dropped geometry) is a [`crate::model::Warning`]
/// or an anomaly record instead.
#[derive(Debug, Error)]
pub enum AuditError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (inverted range, threshold out of bounds, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A required input dataset is absent.
    #[error("missing input: {0}")]
    MissingInput(String),
    /// Missing identifier column in an input table.
    #[error("{dataset}: missing column '{column}'")]
    MissingColumn { dataset: String, column: String },
    /// CSV reader error.
    #[error("{dataset}: CSV error: {message}")]
    Csv { dataset: String, message: String },
    /// GeoJSON document is unreadable or not a FeatureCollection.
    #[error("parcels: GeoJSON error: {0}")]
    GeoJson(String),
    /// CRS declared by the input or the config cannot be handled.
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),
}
