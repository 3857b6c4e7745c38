/**
 * Configuration constants for the section cache and output framing
 */
/// Sections refreshed less often than this carry a `cached(..)` hint in their header
pub const CACHE_HINT_THRESHOLD_SECS: u64 = 60;

/// Extra validity granted to a cached section block on the consumer side
pub const CACHE_HINT_GRACE_SECS: u64 = 60;

/// Maximum number of metric queries per `get_metric_data` round trip
pub const METRIC_BATCH_LIMIT: usize = 100;

/// Maximum number of filter values per describe call
pub const FILTER_BATCH_LIMIT: usize = 200;

/// Metric periods must be a multiple of this many seconds
pub const METRIC_PERIOD_MULTIPLE: u64 = 60;

/// Default refresh interval of most sections (in seconds)
pub const DEFAULT_SECTION_INTERVAL_SECS: u64 = 300; // 5 minutes

/// Refresh interval of sections whose provider data changes once a day
pub const DAILY_SECTION_INTERVAL_SECS: u64 = 86400;

/// Cache root used when neither `--cache-dir` nor the environment override is set
pub const DEFAULT_CACHE_DIR: &str = "/tmp/aws-collector/cache";

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "AWS_COLLECTOR_CACHE_DIR";

/// Suffix of the per-host configuration fingerprint file
pub const CONFIG_HASH_SUFFIX: &str = "config_hash";

/// Validate configuration constants at compile time
const _: () = {
    assert!(CACHE_HINT_THRESHOLD_SECS > 0, "CACHE_HINT_THRESHOLD_SECS must be greater than 0");
    assert!(METRIC_BATCH_LIMIT > 0, "METRIC_BATCH_LIMIT must be greater than 0");
    assert!(METRIC_BATCH_LIMIT <= 500, "METRIC_BATCH_LIMIT exceeds the provider ceiling");
    assert!(FILTER_BATCH_LIMIT > 0, "FILTER_BATCH_LIMIT must be greater than 0");
    assert!(
        DEFAULT_SECTION_INTERVAL_SECS % METRIC_PERIOD_MULTIPLE == 0,
        "DEFAULT_SECTION_INTERVAL_SECS must be a multiple of METRIC_PERIOD_MULTIPLE"
    );
    assert!(
        DAILY_SECTION_INTERVAL_SECS % METRIC_PERIOD_MULTIPLE == 0,
        "DAILY_SECTION_INTERVAL_SECS must be a multiple of METRIC_PERIOD_MULTIPLE"
    );
};
