use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cache.max_entries must be greater than zero")]
    CacheCapacityZero,

    #[error("cache.default_ttl_secs must be greater than zero")]
    CacheTtlZero,

    #[error("rate_limit.window_secs must be greater than zero")]
    RateWindowZero,

    #[error("rate_limit budget for tier '{tier}' must be greater than zero")]
    RateBudgetZero { tier: &'static str },

    #[error("failover.cooldown_secs must be greater than zero")]
    CooldownZero,

    #[error("failover model '{primary}' in class '{class}' has an empty alternates list")]
    EmptyAlternates { class: String, primary: String },
}

/// Validate cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.cache.max_entries == 0 {
        return Err(ValidationError::CacheCapacityZero);
    }
    if config.cache.default_ttl_secs <= 0 {
        return Err(ValidationError::CacheTtlZero);
    }

    if config.rate_limit.window_secs <= 0 {
        return Err(ValidationError::RateWindowZero);
    }
    for (tier, budget) in [
        ("global", config.rate_limit.global_max),
        ("ip", config.rate_limit.ip_max),
        ("api_key", config.rate_limit.api_key_max),
    ] {
        if budget == 0 {
            return Err(ValidationError::RateBudgetZero { tier });
        }
    }

    if config.failover.cooldown_secs <= 0 {
        return Err(ValidationError::CooldownZero);
    }
    for (class, table) in &config.failover.models {
        for (primary, alts) in table {
            if alts.is_empty() {
                return Err(ValidationError::EmptyAlternates {
                    class: class.clone(),
                    primary: primary.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_cache_capacity_rejected() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::CacheCapacityZero)
        ));
    }

    #[test]
    fn zero_rate_budget_rejected() {
        let mut config = Config::default();
        config.rate_limit.ip_max = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::RateBudgetZero { tier: "ip" })
        ));
    }

    #[test]
    fn empty_alternates_rejected() {
        let mut config = Config::default();
        config
            .failover
            .models
            .get_mut("text")
            .unwrap()
            .insert("lonely-model".to_string(), vec![]);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyAlternates { .. })
        ));
    }
}
