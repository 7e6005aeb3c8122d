//! Model health tracking and failover selection.
//!
//! Tracks per-model availability and, when a request fails against its
//! primary model, selects a healthy alternate from the configured fallback
//! list. A failed model becomes eligible for retry after a cooldown that
//! grows with repeated failures (capped at five times the base), but is only
//! marked available again by an explicit success report.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;

const HISTORY_MAX: usize = 100;
const COOLDOWN_FAILURE_CAP: i32 = 5;

/// Health record for one model identifier.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model_id: String,
    pub available: bool,
    pub failure_count: u32,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub recovery_count: u32,
    pub cumulative_errors: u64,
}

impl ModelStatus {
    fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            available: true,
            failure_count: 0,
            last_failure_at: None,
            recovery_count: 0,
            cumulative_errors: 0,
        }
    }

    fn mark_failure(&mut self, now: DateTime<Utc>) {
        self.available = false;
        self.failure_count += 1;
        self.cumulative_errors += 1;
        self.last_failure_at = Some(now);
    }

    fn mark_success(&mut self) {
        if !self.available {
            self.recovery_count += 1;
        }
        self.available = true;
        self.failure_count = 0;
    }

    /// Whether the model may be attempted, independent of `available`:
    /// an unavailable model becomes retryable once its cooldown elapses
    /// without yet being marked available.
    fn should_retry(&self, cooldown_base: Duration, now: DateTime<Utc>) -> bool {
        if self.available {
            return true;
        }
        let factor = (self.failure_count as i32).min(COOLDOWN_FAILURE_CAP).max(1);
        match self.last_failure_at {
            Some(failed_at) => now - failed_at > cooldown_base * factor,
            None => true,
        }
    }
}

/// Alternates declared for one class of models (text, video, ...).
#[derive(Debug, Clone)]
struct FailoverConfig {
    alternates: HashMap<String, Vec<String>>,
    cooldown_base: Duration,
}

/// One recorded failover attempt, kept in a bounded history for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverEvent {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub original_model: String,
    pub alternative_model: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverMetrics {
    pub total_failovers: u64,
    pub successful_failovers: u64,
    pub failed_failovers: u64,
    pub models_recovered: u64,
}

/// Diagnostics snapshot returned by the models-health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub metrics: FailoverMetrics,
    pub models: HashMap<String, ModelStatus>,
}

pub struct FailoverManager {
    configs: Mutex<HashMap<String, FailoverConfig>>,
    status: Mutex<HashMap<String, ModelStatus>>,
    history: Mutex<VecDeque<FailoverEvent>>,
    total_failovers: AtomicU64,
    successful_failovers: AtomicU64,
    failed_failovers: AtomicU64,
    models_recovered: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl FailoverManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            configs: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_MAX)),
            total_failovers: AtomicU64::new(0),
            successful_failovers: AtomicU64::new(0),
            failed_failovers: AtomicU64::new(0),
            models_recovered: AtomicU64::new(0),
            clock,
        }
    }

    /// Declare the alternates for each primary model of `model_type`.
    ///
    /// Status records are lazily created for every model mentioned.
    pub fn register_config(
        &self,
        model_type: &str,
        alternates: HashMap<String, Vec<String>>,
        cooldown_base: Duration,
    ) {
        {
            let mut status = self.status.lock().unwrap();
            for (primary, alts) in &alternates {
                status
                    .entry(primary.clone())
                    .or_insert_with(|| ModelStatus::new(primary));
                for alt in alts {
                    status
                        .entry(alt.clone())
                        .or_insert_with(|| ModelStatus::new(alt));
                }
            }
        }

        self.configs.lock().unwrap().insert(
            model_type.to_string(),
            FailoverConfig {
                alternates,
                cooldown_base,
            },
        );
        info!(model_type, "Failover configuration registered");
    }

    /// Pick an eligible alternate for `original_model`, uniformly at random.
    ///
    /// Random choice is a deliberate simplification: eligibility is binary
    /// and selection is not load-aware.
    pub fn get_alternative(&self, model_type: &str, original_model: &str) -> Option<String> {
        let configs = self.configs.lock().unwrap();
        let Some(config) = configs.get(model_type) else {
            warn!(model_type, "No failover configuration for model type");
            return None;
        };
        let Some(alternates) = config.alternates.get(original_model) else {
            warn!(original_model, "No alternates configured for model");
            return None;
        };

        let now = self.clock.now();
        let status = self.status.lock().unwrap();
        let eligible: Vec<&String> = alternates
            .iter()
            .filter(|alt| {
                status
                    .get(*alt)
                    .is_some_and(|s| s.should_retry(config.cooldown_base, now))
            })
            .collect();

        if eligible.is_empty() {
            warn!(original_model, "No eligible alternates");
            return None;
        }

        eligible
            .choose(&mut rand::thread_rng())
            .map(|alt| (*alt).to_string())
    }

    pub fn mark_failure(&self, model_id: &str) {
        let now = self.clock.now();
        let mut status = self.status.lock().unwrap();
        status
            .entry(model_id.to_string())
            .or_insert_with(|| ModelStatus::new(model_id))
            .mark_failure(now);
        warn!(model_id, "Model marked as failed");
    }

    pub fn mark_success(&self, model_id: &str) {
        let mut status = self.status.lock().unwrap();
        let entry = status
            .entry(model_id.to_string())
            .or_insert_with(|| ModelStatus::new(model_id));
        if !entry.available {
            self.models_recovered.fetch_add(1, Ordering::Relaxed);
            info!(model_id, "Model recovered");
        }
        entry.mark_success();
    }

    /// Append a failover attempt to the bounded history and bump counters.
    pub fn record_failover(
        &self,
        original: &str,
        alternate: &str,
        success: bool,
        error: Option<String>,
    ) {
        let event = FailoverEvent {
            timestamp: self.clock.now(),
            original_model: original.to_string(),
            alternative_model: alternate.to_string(),
            success,
            error,
        };

        let mut history = self.history.lock().unwrap();
        if history.len() >= HISTORY_MAX {
            history.pop_front();
        }
        history.push_back(event);

        self.total_failovers.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_failovers.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_failovers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reset a model's status to healthy; false if the model is unknown.
    pub fn reset(&self, model_id: &str) -> bool {
        let known = self.status.lock().unwrap().contains_key(model_id);
        if known {
            self.mark_success(model_id);
        }
        known
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            metrics: FailoverMetrics {
                total_failovers: self.total_failovers.load(Ordering::Relaxed),
                successful_failovers: self.successful_failovers.load(Ordering::Relaxed),
                failed_failovers: self.failed_failovers.load(Ordering::Relaxed),
                models_recovered: self.models_recovered.load(Ordering::Relaxed),
            },
            models: self.status.lock().unwrap().clone(),
        }
    }

    pub fn recent_events(&self) -> Vec<FailoverEvent> {
        self.history.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manager() -> (Arc<ManualClock>, FailoverManager) {
        let clock = Arc::new(ManualClock::at_epoch());
        let manager = FailoverManager::new(clock.clone());
        (clock, manager)
    }

    fn text_config(manager: &FailoverManager, cooldown_secs: i64) {
        let mut alternates = HashMap::new();
        alternates.insert(
            "A".to_string(),
            vec!["B".to_string(), "C".to_string()],
        );
        manager.register_config("text", alternates, Duration::seconds(cooldown_secs));
    }

    #[test]
    fn alternative_chosen_from_configured_set() {
        let (_, manager) = manager();
        text_config(&manager, 100);
        manager.mark_failure("A");

        let alt = manager.get_alternative("text", "A").unwrap();
        assert!(alt == "B" || alt == "C");
    }

    #[test]
    fn no_alternative_when_all_cooling_down() {
        let (clock, manager) = manager();
        text_config(&manager, 100);

        manager.mark_failure("A");
        manager.mark_failure("B");
        manager.mark_failure("C");
        assert!(manager.get_alternative("text", "A").is_none());

        // One failure each: cooldown is base * 1.
        clock.advance(Duration::seconds(101));
        assert!(manager.get_alternative("text", "A").is_some());
    }

    #[test]
    fn cooldown_grows_with_failures_capped_at_five() {
        let (clock, manager) = manager();
        text_config(&manager, 10);

        for _ in 0..8 {
            manager.mark_failure("B");
        }
        manager.mark_failure("C");

        // C (one failure) is eligible after 10s; B (8 failures, capped at 5x)
        // needs more than 50s.
        clock.advance(Duration::seconds(11));
        for _ in 0..20 {
            assert_eq!(manager.get_alternative("text", "A").unwrap(), "C");
        }

        clock.advance(Duration::seconds(40));
        let mut saw_b = false;
        for _ in 0..50 {
            if manager.get_alternative("text", "A").unwrap() == "B" {
                saw_b = true;
                break;
            }
        }
        assert!(saw_b);
    }

    #[test]
    fn unknown_type_or_model_yields_none() {
        let (_, manager) = manager();
        text_config(&manager, 100);

        assert!(manager.get_alternative("video", "A").is_none());
        assert!(manager.get_alternative("text", "Z").is_none());
    }

    #[test]
    fn success_after_failure_counts_recovery() {
        let (_, manager) = manager();
        text_config(&manager, 100);

        manager.mark_failure("B");
        manager.mark_success("B");
        manager.mark_success("B");

        let report = manager.health_report();
        assert_eq!(report.metrics.models_recovered, 1);
        let b = &report.models["B"];
        assert!(b.available);
        assert_eq!(b.failure_count, 0);
        assert_eq!(b.recovery_count, 1);
        assert_eq!(b.cumulative_errors, 1);
    }

    #[test]
    fn history_is_bounded() {
        let (_, manager) = manager();
        for i in 0..150 {
            manager.record_failover("A", "B", i % 2 == 0, None);
        }

        let events = manager.recent_events();
        assert_eq!(events.len(), HISTORY_MAX);

        let report = manager.health_report();
        assert_eq!(report.metrics.total_failovers, 150);
        assert_eq!(report.metrics.successful_failovers, 75);
        assert_eq!(report.metrics.failed_failovers, 75);
    }

    #[test]
    fn reset_only_known_models() {
        let (_, manager) = manager();
        text_config(&manager, 100);

        manager.mark_failure("B");
        assert!(manager.reset("B"));
        assert!(manager.health_report().models["B"].available);
        assert!(!manager.reset("unknown-model"));
    }
}
