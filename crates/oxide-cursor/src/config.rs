//! Connection configuration.

use serde::{Deserialize, Serialize};

/// Default number of compiled statements kept for reuse.
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 100;

/// Default size above which a statement's text is never pooled.
pub const DEFAULT_MAX_CACHED_SQL_BYTES: usize = 16 * 1024;

/// Settings applied when a connection is opened.
///
/// ```rust
/// use oxide_cursor::ConnectionConfig;
///
/// let config = ConnectionConfig::from_json(r#"{"statement_cache_size": 8}"#).unwrap();
/// assert_eq!(config.statement_cache_size, 8);
/// assert_eq!(config.max_cached_sql_bytes, 16384);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum number of idle compiled statements held across all SQL
    /// texts. Zero disables reuse: every execute compiles afresh.
    pub statement_cache_size: usize,
    /// SQL texts longer than this many bytes are compiled but never pooled.
    pub max_cached_sql_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            max_cached_sql_bytes: DEFAULT_MAX_CACHED_SQL_BYTES,
        }
    }
}

impl ConnectionConfig {
    /// Sets the statement cache capacity.
    #[must_use]
    pub const fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Sets the largest SQL text that may be pooled.
    #[must_use]
    pub const fn with_max_cached_sql_bytes(mut self, bytes: usize) -> Self {
        self.max_cached_sql_bytes = bytes;
        self
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.statement_cache_size, 100);
        assert_eq!(config.max_cached_sql_bytes, 16384);
        assert_eq!(ConnectionConfig::from_json("{}").unwrap(), config);
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::default()
            .with_statement_cache_size(0)
            .with_max_cached_sql_bytes(10);
        assert_eq!(config.statement_cache_size, 0);
        assert_eq!(config.max_cached_sql_bytes, 10);
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        assert!(ConnectionConfig::from_json(r#"{"statement_cache_size": "many"}"#).is_err());
    }
}
