//! Configuration Module - Profiler Tuning Parameters
//!
//! Manages all configuration parameters for NumaLens.
//! Every parameter can also be supplied through a `NUMAPERF_*` environment
//! variable, which is how the preload deployment is tuned.

use crate::mem::page::PAGE_SIZE;
use crate::util::constants::{CAS_RETRY_LIMIT, GB, MB};

/// Main configuration for the NumaLens profiler
///
/// Stores all parameters affecting detection sensitivity, shadow-map
/// geometry, and report output. Most parameters have sensible defaults.
///
/// # Examples
///
/// ```rust
/// use nlens::ProfilerConfig;
///
/// // Use default configuration
/// let config = ProfilerConfig::default();
///
/// // Aggressive escalation for a short test run
/// let config = ProfilerConfig {
///     page_detail_threshold: 10,
///     cache_detail_threshold: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Foreign accesses before a page escalates to detailed tracking
    ///
    /// A page whose foreign-access counter exceeds this value gets a
    /// detailed page record splitting traffic by locality.
    /// Environment: `NUMAPERF_PAGE_DETAIL_THRESHOLD`
    ///
    /// Default: 128
    pub page_detail_threshold: u64,

    /// Writer transitions on a cache line before it escalates
    ///
    /// Counts changes of the writing thread, not raw writes, so a line
    /// hammered by a single thread never escalates.
    /// Environment: `NUMAPERF_CACHE_DETAIL_THRESHOLD`
    ///
    /// Default: 32
    pub cache_detail_threshold: u32,

    /// Number of objects kept in the final report
    ///
    /// Capacity of the global top-objects priority queue.
    /// Environment: `NUMAPERF_TOP_OBJECTS`
    ///
    /// Default: 20
    pub top_objects: usize,

    /// Number of cache lines reported per object
    ///
    /// Capacity of each object's top-cache-lines priority queue.
    /// Environment: `NUMAPERF_TOP_CACHELINES`
    ///
    /// Default: 5
    pub top_cache_lines: usize,

    /// Shadow-map fragment size in bytes
    ///
    /// Base size of one lazily mapped fragment in the tiered maps; the
    /// actual size is rounded so the per-fragment address window is a
    /// power of two. Fragments are non-reserving, so this is virtual
    /// address space, not committed memory.
    /// Environment: `NUMAPERF_FRAGMENT_BYTES`
    ///
    /// Default: 4GB
    pub fragment_bytes: usize,

    /// Address-space aperture of the flat page map in bytes
    ///
    /// The basic per-page map is one eager non-reserving fragment covering
    /// `[0, page_map_span)`. Accesses above the aperture are counted as
    /// capacity drops, not tracked.
    /// Environment: `NUMAPERF_PAGE_MAP_SPAN`
    ///
    /// Default: 1<<47 (the whole Linux user address space)
    pub page_map_span: usize,

    /// Fragment table size of the tiered shadow maps
    ///
    /// An address whose fragment slot exceeds this table is a fatal setup
    /// error (the table is sized at init and never grows).
    ///
    /// Default: 4096
    pub max_fragments: usize,

    /// Maximum live heap objects tracked at once
    ///
    /// Capacity of the object registry and arena; must be a power of two.
    /// A full registry drops further allocations (counted).
    ///
    /// Default: 1<<20
    pub object_capacity: usize,

    /// Maximum distinct allocation sites; must be a power of two.
    ///
    /// Default: 1<<16
    pub site_capacity: usize,

    /// Maximum distinct locks tracked; must be a power of two.
    ///
    /// Default: 1<<16
    pub lock_capacity: usize,

    /// Compare-and-set retry budget on the access path
    ///
    /// Exhausting the budget drops the update and counts a lost sample.
    ///
    /// Default: 5
    pub retry_limit: usize,

    /// File descriptor the shutdown report is written to
    ///
    /// Environment: `NUMAPERF_REPORT_FD`
    ///
    /// Default: 2 (stderr)
    pub report_fd: i32,

    /// Emit the report as JSON instead of text
    ///
    /// Environment: `NUMAPERF_JSON` (non-zero enables)
    ///
    /// Default: false
    pub json_report: bool,

    /// Enable info-level logging at init and shutdown
    ///
    /// The access path never logs regardless of this setting.
    /// Environment: `NUMAPERF_VERBOSE` (non-zero enables)
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for ProfilerConfig {
    /// Default configuration for NumaLens
    ///
    /// Sized for a production profiling run of a full application.
    fn default() -> Self {
        ProfilerConfig {
            // Escalation sensitivity
            page_detail_threshold: 128,
            cache_detail_threshold: 32,

            // Report capacities
            top_objects: 20,
            top_cache_lines: 5,

            // Shadow geometry
            fragment_bytes: 4 * GB,
            page_map_span: 1 << 47,
            max_fragments: 4096,

            // Registries
            object_capacity: 1 << 20,
            site_capacity: 1 << 16,
            lock_capacity: 1 << 16,

            // Concurrency
            retry_limit: CAS_RETRY_LIMIT,

            // Output
            report_fd: 2,
            json_report: false,
            verbose: false,
        }
    }
}

impl ProfilerConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    /// Returns error if configuration is invalid.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nlens::ProfilerConfig;
    ///
    /// let config = ProfilerConfig {
    ///     top_objects: 0, // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Threshold validation
        if self.page_detail_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "page_detail_threshold must be > 0".to_string(),
            ));
        }

        if self.cache_detail_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(
                "cache_detail_threshold must be > 0".to_string(),
            ));
        }

        // Report capacity validation
        if self.top_objects == 0 {
            return Err(ConfigError::InvalidCapacity(
                "top_objects must be > 0".to_string(),
            ));
        }

        if self.top_cache_lines == 0 {
            return Err(ConfigError::InvalidCapacity(
                "top_cache_lines must be > 0".to_string(),
            ));
        }

        // Shadow geometry validation
        if self.fragment_bytes < MB {
            return Err(ConfigError::InvalidFragmentSize(
                "fragment_bytes must be at least 1MB".to_string(),
            ));
        }

        if self.page_map_span < PAGE_SIZE {
            return Err(ConfigError::InvalidAperture(
                "page_map_span must cover at least one page".to_string(),
            ));
        }

        if self.max_fragments == 0 {
            return Err(ConfigError::InvalidFragmentSize(
                "max_fragments must be > 0".to_string(),
            ));
        }

        // Registry capacity validation (open addressing needs a bit mask)
        if !self.object_capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity(
                "object_capacity must be a power of two".to_string(),
            ));
        }

        if !self.site_capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity(
                "site_capacity must be a power of two".to_string(),
            ));
        }

        if !self.lock_capacity.is_power_of_two() {
            return Err(ConfigError::InvalidCapacity(
                "lock_capacity must be a power of two".to_string(),
            ));
        }

        // Retry budget validation
        if self.retry_limit == 0 {
            return Err(ConfigError::InvalidRetryLimit(
                "retry_limit must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - NUMAPERF_PAGE_DETAIL_THRESHOLD
    /// - NUMAPERF_CACHE_DETAIL_THRESHOLD
    /// - NUMAPERF_TOP_OBJECTS
    /// - NUMAPERF_TOP_CACHELINES
    /// - NUMAPERF_FRAGMENT_BYTES
    /// - NUMAPERF_PAGE_MAP_SPAN
    /// - NUMAPERF_REPORT_FD
    /// - NUMAPERF_JSON
    /// - NUMAPERF_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export NUMAPERF_PAGE_DETAIL_THRESHOLD=1000
    /// export NUMAPERF_TOP_OBJECTS=50
    /// export NUMAPERF_JSON=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("NUMAPERF_PAGE_DETAIL_THRESHOLD") {
            if let Ok(threshold) = val.parse::<u64>() {
                config.page_detail_threshold = threshold;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_CACHE_DETAIL_THRESHOLD") {
            if let Ok(threshold) = val.parse::<u32>() {
                config.cache_detail_threshold = threshold;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_TOP_OBJECTS") {
            if let Ok(count) = val.parse::<usize>() {
                config.top_objects = count;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_TOP_CACHELINES") {
            if let Ok(count) = val.parse::<usize>() {
                config.top_cache_lines = count;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_FRAGMENT_BYTES") {
            if let Ok(bytes) = val.parse::<usize>() {
                config.fragment_bytes = bytes;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_PAGE_MAP_SPAN") {
            if let Ok(span) = val.parse::<usize>() {
                config.page_map_span = span;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_REPORT_FD") {
            if let Ok(fd) = val.parse::<i32>() {
                config.report_fd = fd;
            }
        }

        if let Ok(val) = std::env::var("NUMAPERF_JSON") {
            config.json_report = val != "0" && !val.is_empty();
        }

        if let Ok(val) = std::env::var("NUMAPERF_VERBOSE") {
            config.verbose = val != "0" && !val.is_empty();
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Invalid fragment size: {0}")]
    InvalidFragmentSize(String),

    #[error("Invalid aperture: {0}")]
    InvalidAperture(String),

    #[error("Invalid retry limit: {0}")]
    InvalidRetryLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProfilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_limit, CAS_RETRY_LIMIT);
        assert_eq!(config.report_fd, 2);
    }

    #[test]
    fn test_invalid_threshold() {
        let config = ProfilerConfig {
            page_detail_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_registry_capacity() {
        let config = ProfilerConfig {
            object_capacity: 1000, // not a power of two
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_fragment_size() {
        let config = ProfilerConfig {
            fragment_bytes: 4096,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_parses_thresholds() {
        // Each env test uses distinct variables so parallel runs cannot
        // interfere with each other's assertions.
        std::env::set_var("NUMAPERF_PAGE_DETAIL_THRESHOLD", "77");
        std::env::set_var("NUMAPERF_JSON", "1");
        let config = ProfilerConfig::from_env();
        std::env::remove_var("NUMAPERF_PAGE_DETAIL_THRESHOLD");
        std::env::remove_var("NUMAPERF_JSON");

        assert_eq!(config.page_detail_threshold, 77);
        assert!(config.json_report);
    }

    #[test]
    fn test_from_env_ignores_garbage() {
        std::env::set_var("NUMAPERF_TOP_OBJECTS", "not-a-number");
        let config = ProfilerConfig::from_env();
        std::env::remove_var("NUMAPERF_TOP_OBJECTS");

        assert_eq!(config.top_objects, ProfilerConfig::default().top_objects);
    }
}
