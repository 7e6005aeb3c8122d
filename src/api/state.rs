use std::sync::Arc;

use chrono::Duration;

use crate::cache::ResponseCache;
use crate::clock::Clock;
use crate::config::Config;
use crate::dispatch::ModelInvoker;
use crate::failover::FailoverManager;
use crate::observability::Metrics;
use crate::ratelimit::TieredLimiter;
use crate::registry::TaskRegistry;

/// Shared application state injected into every handler and middleware.
///
/// Everything hangs off `Arc`s so the state clones cheaply per request; the
/// clock and invoker are trait objects so tests can substitute both.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<TaskRegistry>,
    pub cache: Arc<ResponseCache>,
    pub limiter: Arc<TieredLimiter>,
    pub failover: Arc<FailoverManager>,
    pub invoker: Arc<dyn ModelInvoker>,
    pub metrics: Arc<Metrics>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build the full component graph from configuration.
    ///
    /// Failover alternates from the config are registered eagerly so the
    /// models-health endpoint reports every known model from the start.
    pub fn new(config: Config, clock: Arc<dyn Clock>, invoker: Arc<dyn ModelInvoker>) -> Self {
        let registry = Arc::new(TaskRegistry::new(clock.clone()));
        let cache = Arc::new(ResponseCache::new(
            config.cache.max_entries,
            Duration::seconds(config.cache.default_ttl_secs),
            clock.clone(),
        ));
        let limiter = Arc::new(TieredLimiter::new(
            config.rate_limit.window_secs,
            config.rate_limit.global_max,
            config.rate_limit.ip_max,
            config.rate_limit.api_key_max,
            clock.clone(),
        ));

        let failover = Arc::new(FailoverManager::new(clock.clone()));
        let cooldown = Duration::seconds(config.failover.cooldown_secs);
        for (class, alternates) in &config.failover.models {
            failover.register_config(class, alternates.clone(), cooldown);
        }

        Self {
            config: Arc::new(config),
            registry,
            cache,
            limiter,
            failover,
            invoker,
            metrics: Arc::new(Metrics::new()),
            clock,
        }
    }
}
