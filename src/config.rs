//! Runtime configuration
//!
//! Compile-time limits live here as constants. Per-context knobs are carried
//! by [`RuntimeConfig`], which can be assembled with a builder or read from
//! `ELVEA_*` environment variables.

/// Number of slots in one arena page
pub const PAGE_SIZE: usize = 1024;

/// Maximum number of base classes a class descriptor may list
pub const MAX_BASE_COUNT: usize = 8;

/// Maximum size of a formatted error message, terminator included
pub const ERROR_BUFFER_SIZE: usize = 256;

/// Default number of buffered cycle candidates that triggers a collection
pub const DEFAULT_GC_THRESHOLD: usize = 4096;

/// Default bound on alias chain length during resolution
pub const DEFAULT_MAX_ALIAS_DEPTH: usize = 64;

/// Per-context configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Slots per arena page
    pub page_size: usize,
    /// Candidate buffer length that triggers an automatic collection (0 = never)
    pub gc_threshold: usize,
    /// Longest alias chain `resolve` will follow
    pub max_alias_depth: usize,
    /// Fixed hash seed; a random one is drawn when `None`
    pub seed: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            page_size: PAGE_SIZE,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_alias_depth: DEFAULT_MAX_ALIAS_DEPTH,
            seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Read overrides from the environment
    ///
    /// Recognized variables: `ELVEA_PAGE_SIZE`, `ELVEA_GC_THRESHOLD`,
    /// `ELVEA_MAX_ALIAS_DEPTH` and `ELVEA_SEED`. Values that do not parse are
    /// ignored and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = RuntimeConfig::default();

        if let Some(size) = parse_var::<usize>(&lookup, "ELVEA_PAGE_SIZE") {
            config.page_size = size.max(1);
        }
        if let Some(threshold) = parse_var::<usize>(&lookup, "ELVEA_GC_THRESHOLD") {
            config.gc_threshold = threshold;
        }
        if let Some(depth) = parse_var::<usize>(&lookup, "ELVEA_MAX_ALIAS_DEPTH") {
            config.max_alias_depth = depth;
        }
        if let Some(seed) = parse_var::<u32>(&lookup, "ELVEA_SEED") {
            config.seed = Some(seed);
        }

        config
    }

    /// Threshold actually used by the collector
    #[inline]
    pub fn effective_gc_threshold(&self) -> usize {
        if cfg!(feature = "debug-gc") {
            1
        } else {
            self.gc_threshold
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

/// Builder for [`RuntimeConfig`]
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn page_size(mut self, slots: usize) -> Self {
        self.config.page_size = slots.max(1);
        self
    }

    pub fn gc_threshold(mut self, candidates: usize) -> Self {
        self.config.gc_threshold = candidates;
        self
    }

    pub fn max_alias_depth(mut self, depth: usize) -> Self {
        self.config.max_alias_depth = depth;
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.page_size, PAGE_SIZE);
        assert_eq!(config.gc_threshold, DEFAULT_GC_THRESHOLD);
        assert_eq!(config.max_alias_depth, DEFAULT_MAX_ALIAS_DEPTH);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::builder()
            .page_size(0)
            .gc_threshold(16)
            .seed(42)
            .build();
        assert_eq!(config.page_size, 1);
        assert_eq!(config.gc_threshold, 16);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn test_from_lookup() {
        let config = RuntimeConfig::from_lookup(|key| match key {
            "ELVEA_PAGE_SIZE" => Some("8".to_string()),
            "ELVEA_GC_THRESHOLD" => Some("not a number".to_string()),
            "ELVEA_SEED" => Some(" 7 ".to_string()),
            _ => None,
        });
        assert_eq!(config.page_size, 8);
        assert_eq!(config.gc_threshold, DEFAULT_GC_THRESHOLD);
        assert_eq!(config.seed, Some(7));
    }
}
