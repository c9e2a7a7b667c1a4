use serde::{Deserialize, Serialize};

/// Batching loader configuration
///
/// Controls how many keys go into one store lookup and how many documents go
/// into one mutation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of keys in a single store `get`
    pub max_batch_size: usize,

    /// Number of documents per concurrent mutation call
    pub write_chunk_size: usize,
}

impl LoaderConfig {
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
    pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 100;

    pub fn new() -> Self {
        Self {
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
            write_chunk_size: Self::DEFAULT_WRITE_CHUNK_SIZE,
        }
    }

    /// Set maximum keys per lookup
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set documents per mutation chunk
    pub fn write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be > 0".to_string());
        }

        if self.write_chunk_size == 0 {
            return Err("write_chunk_size must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.max_batch_size, 1000);
        assert_eq!(config.write_chunk_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = LoaderConfig::new().max_batch_size(50).write_chunk_size(10);
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.write_chunk_size, 10);
    }

    #[test]
    fn test_validate() {
        assert!(LoaderConfig::new().max_batch_size(0).validate().is_err());
        assert!(LoaderConfig::new().write_chunk_size(0).validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: LoaderConfig = serde_json::from_str(r#"{"write_chunk_size": 25}"#).unwrap();
        assert_eq!(config.write_chunk_size, 25);
        assert_eq!(config.max_batch_size, LoaderConfig::DEFAULT_MAX_BATCH_SIZE);
    }
}
