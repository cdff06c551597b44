//! Enumerated configuration (External Interfaces, "Configuration
//! (enumerated)"). Construction is programmatic; parsing a config file or
//! environment is out of scope (Non-goals: "configuration loading").

use std::time::Duration;

/// Which topic namespace(s) the delta builder publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicMode {
    Full,
    #[default]
    Mixed,
    Minimal,
}

impl TopicMode {
    pub fn publishes_full(self) -> bool {
        matches!(self, TopicMode::Full | TopicMode::Mixed)
    }

    pub fn publishes_minimal(self) -> bool {
        matches!(self, TopicMode::Minimal | TopicMode::Mixed)
    }
}

/// Tunables for the catalog cache, with the documented defaults.
///
/// Similar to `ConnectionConfig`'s builder pattern: a `Config::default()`
/// baseline plus chained setters.
#[derive(Debug, Clone)]
pub struct Config {
    pub topic_mode: TopicMode,
    pub max_skipped_topic_updates: u32,
    pub max_parallel_partial_fetch: usize,
    pub partial_fetch_queue_timeout: Duration,
    pub table_lock_timeout: Duration,
    pub table_lock_retry: Duration,
    pub load_in_background: bool,
    pub num_loading_threads: usize,
    pub topic_update_log_retention: u64,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic_mode(mut self, mode: TopicMode) -> Self {
        self.topic_mode = mode;
        self
    }

    pub fn max_skipped_topic_updates(mut self, s: u32) -> Self {
        self.max_skipped_topic_updates = s;
        self
    }

    pub fn max_parallel_partial_fetch(mut self, n: usize) -> Self {
        self.max_parallel_partial_fetch = n;
        self
    }

    pub fn partial_fetch_queue_timeout(mut self, timeout: Duration) -> Self {
        self.partial_fetch_queue_timeout = timeout;
        self
    }

    pub fn table_lock_timeout(mut self, timeout: Duration) -> Self {
        self.table_lock_timeout = timeout;
        self
    }

    pub fn table_lock_retry(mut self, retry: Duration) -> Self {
        self.table_lock_retry = retry;
        self
    }

    pub fn load_in_background(mut self, enabled: bool) -> Self {
        self.load_in_background = enabled;
        self
    }

    pub fn num_loading_threads(mut self, n: usize) -> Self {
        self.num_loading_threads = n;
        self
    }

    pub fn topic_update_log_retention(mut self, retention: u64) -> Self {
        self.topic_update_log_retention = retention;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallel_partial_fetch == 0 {
            return Err("max_parallel_partial_fetch must be > 0".to_string());
        }
        if self.num_loading_threads == 0 {
            return Err("num_loading_threads must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topic_mode: TopicMode::Mixed,
            max_skipped_topic_updates: 2,
            max_parallel_partial_fetch: 16,
            partial_fetch_queue_timeout: Duration::from_secs(10),
            table_lock_timeout: Duration::from_millis(7_200_000),
            table_lock_retry: Duration::from_millis(10),
            load_in_background: true,
            num_loading_threads: 4,
            topic_update_log_retention: 10_000,
        }
    }
}
