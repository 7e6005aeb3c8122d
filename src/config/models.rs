use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub failover: FailoverSettings,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: i64,
    /// Path prefixes eligible for caching.
    #[serde(default = "default_cache_include_prefixes")]
    pub include_prefixes: Vec<String>,
    /// Path prefixes never cached; takes precedence over includes.
    #[serde(default = "default_cache_exclude_prefixes")]
    pub exclude_prefixes: Vec<String>,
    /// Whether the query string participates in the cache key.
    #[serde(default = "default_true")]
    pub vary_by_query: bool,
    /// Whether the caller's API key participates in the cache key.
    #[serde(default = "default_true")]
    pub vary_by_api_key: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            default_ttl_secs: default_cache_ttl_secs(),
            include_prefixes: default_cache_include_prefixes(),
            exclude_prefixes: default_cache_exclude_prefixes(),
            vary_by_query: true,
            vary_by_api_key: true,
        }
    }
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cache_ttl_secs() -> i64 {
    300
}

fn default_cache_include_prefixes() -> Vec<String> {
    vec!["/api/health".to_string(), "/api/models".to_string()]
}

fn default_cache_exclude_prefixes() -> Vec<String> {
    vec!["/api/tasks".to_string(), "/api/admin".to_string()]
}

fn default_true() -> bool {
    true
}

/// Rate limiting configuration; one sliding window size shared by the three
/// tiers, each with its own budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
    #[serde(default = "default_global_max")]
    pub global_max: u32,
    #[serde(default = "default_ip_max")]
    pub ip_max: u32,
    #[serde(default = "default_api_key_max")]
    pub api_key_max: u32,
    #[serde(default = "default_rate_exclude_prefixes")]
    pub exclude_prefixes: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            global_max: default_global_max(),
            ip_max: default_ip_max(),
            api_key_max: default_api_key_max(),
            exclude_prefixes: default_rate_exclude_prefixes(),
        }
    }
}

fn default_window_secs() -> i64 {
    60
}

fn default_global_max() -> u32 {
    1000
}

fn default_ip_max() -> u32 {
    100
}

fn default_api_key_max() -> u32 {
    200
}

fn default_rate_exclude_prefixes() -> Vec<String> {
    vec!["/api/health".to_string()]
}

/// Failover configuration: per model class, the alternates for each primary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailoverSettings {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
    /// `models.<class>.<primary> = [alternates...]`
    #[serde(default = "default_failover_models")]
    pub models: HashMap<String, HashMap<String, Vec<String>>>,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            models: default_failover_models(),
        }
    }
}

fn default_cooldown_secs() -> i64 {
    300
}

fn alternates(
    table: &[(&str, &[&str])],
) -> HashMap<String, Vec<String>> {
    table
        .iter()
        .map(|(primary, alts)| {
            (
                primary.to_string(),
                alts.iter().map(|a| a.to_string()).collect(),
            )
        })
        .collect()
}

fn default_failover_models() -> HashMap<String, HashMap<String, Vec<String>>> {
    let mut models = HashMap::new();
    models.insert(
        "text".to_string(),
        alternates(&[
            (
                "llama-3-70b-instruct",
                &["llama-3-8b-instruct", "mistral-7b-instruct"][..],
            ),
            (
                "mistral-7b-instruct",
                &["llama-3-8b-instruct", "deepseek-coder-6.7b-instruct"][..],
            ),
            (
                "deepseek-coder-33b-instruct",
                &["deepseek-coder-6.7b-instruct", "codellama-7b-instruct"][..],
            ),
        ]),
    );
    models.insert(
        "transcription".to_string(),
        alternates(&[
            ("whisper-large-v3", &["whisper-medium", "whisper-small"][..]),
            ("whisper-medium", &["whisper-small", "whisper-base"][..]),
            ("whisper-small", &["whisper-base", "whisper-tiny"][..]),
        ]),
    );
    models.insert(
        "video".to_string(),
        alternates(&[
            ("internvideo-14b", &["internvideo-7b", "videollama-7b"][..]),
            ("videollama-7b", &["internvideo-7b", "videollama-3b"][..]),
        ]),
    );
    models
}

/// Retention of finished tasks in the in-memory registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// How long terminal tasks are kept before the sweeper drops them.
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            task_ttl_secs: default_task_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_task_ttl_secs() -> i64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.failover.cooldown_secs, 300);
        assert!(config.failover.models.contains_key("transcription"));
        assert_eq!(config.retention.task_ttl_secs, 86_400);
    }
}
