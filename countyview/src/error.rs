//! Error types.

/// Errors raised by the countyview core. Lower layers raise these typed
/// variants and nothing in the core catches-and-hides them; the serving
/// layer decides user-facing presentation.
#[derive(thiserror::Error, Debug)]
pub enum CountyViewError {
    /// Fatal at startup: missing or malformed variable config, or a missing
    /// geography snapshot.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// Unknown state or county name.
    #[error("Unknown geography: {0}")]
    NotFound(String),
    /// A Census API query failed. The whole fetch is abandoned; there is no
    /// partial-result degradation.
    #[error("Census API query failed: {0}")]
    UpstreamQuery(String),
    /// A variable definition referenced data that is not present in the
    /// fetched table.
    #[error("Failed to evaluate '{name}': {reason}")]
    Expression { name: String, reason: String },
    #[error("Wrapped sqlite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped reqwest error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Wrapped IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CountyViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_error_names_the_definition() {
        let err = CountyViewError::Expression {
            name: "Pct Non-White".to_string(),
            reason: "referenced variable 'B02001_001E' is missing from the fetched data".into(),
        };
        let message = err.to_string();
        assert!(message.contains("Pct Non-White"));
        assert!(message.contains("B02001_001E"));
    }
}
