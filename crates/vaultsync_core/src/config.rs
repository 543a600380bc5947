//! Record store configuration.

use std::time::Duration;

/// Default page size for searches that do not set a limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Hard cap on any search page size.
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Configuration for a record store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Page size used when a query sets no limit.
    pub default_limit: usize,

    /// Largest page a query may request; larger limits are capped.
    pub max_limit: usize,

    /// How long change entries are kept before they may be pruned.
    ///
    /// Devices whose checkpoint predates the pruned horizon must do a
    /// full resync.
    pub change_retention: Duration,

    /// Member fields copied into cleartext metadata for search.
    pub indexed_fields: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: MAX_SEARCH_LIMIT,
            change_retention: Duration::from_secs(7 * 24 * 60 * 60),
            indexed_fields: ["source", "name", "username", "title", "location", "company"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default page size.
    #[must_use]
    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Sets the page size cap.
    #[must_use]
    pub fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// Sets the change-log retention window.
    #[must_use]
    pub fn change_retention(mut self, retention: Duration) -> Self {
        self.change_retention = retention;
        self
    }

    /// Replaces the set of indexed member fields.
    #[must_use]
    pub fn indexed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexed_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.max_limit, 1000);
        assert!(config.indexed_fields.iter().any(|f| f == "source"));
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .default_limit(10)
            .max_limit(50)
            .change_retention(Duration::from_secs(60))
            .indexed_fields(["source"]);

        assert_eq!(config.default_limit, 10);
        assert_eq!(config.max_limit, 50);
        assert_eq!(config.change_retention, Duration::from_secs(60));
        assert_eq!(config.indexed_fields, vec!["source".to_string()]);
    }
}
