use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::classification::ClassificationPolicy;
use crate::decimal::Rate;
use crate::errors::{Result, ServicingError};
use crate::penalty::PenaltyConfig;
use crate::types::ExcessPolicy;

/// servicing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicingConfig {
    /// seconds an installment refuses a second payment attempt
    pub duplicate_cooldown_seconds: u32,
    pub excess_policy: ExcessPolicy,
    pub classification: ClassificationPolicy,
    /// late penalties, off when `None`
    pub penalty: Option<PenaltyConfig>,
    /// threads used by batch classification and the daily tick
    pub worker_threads: usize,
}

impl Default for ServicingConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl ServicingConfig {
    /// 60s cool-down, excess carried as credit, standard bands, no penalties
    pub fn standard() -> Self {
        Self {
            duplicate_cooldown_seconds: 60,
            excess_policy: ExcessPolicy::CarryAsCredit,
            classification: ClassificationPolicy::standard(),
            penalty: None,
            worker_threads: 4,
        }
    }

    /// standard configuration with late penalties after a grace period
    pub fn with_penalties(annual_rate: Rate, grace_period_days: u32) -> Self {
        Self {
            penalty: Some(PenaltyConfig::new(annual_rate, grace_period_days)),
            ..Self::standard()
        }
    }

    pub fn duplicate_cooldown(&self) -> Duration {
        Duration::seconds(i64::from(self.duplicate_cooldown_seconds))
    }

    pub fn validate(&self) -> Result<()> {
        self.classification.validate()?;

        if self.worker_threads == 0 {
            return Err(ServicingError::InvalidConfiguration {
                message: "worker_threads must be at least 1".to_string(),
            });
        }

        if let Some(penalty) = &self.penalty {
            if penalty.annual_rate < Rate::ZERO {
                return Err(ServicingError::InvalidConfiguration {
                    message: format!("penalty rate must not be negative, got {}", penalty.annual_rate),
                });
            }
            if penalty.minimum_penalty.is_negative() {
                return Err(ServicingError::InvalidConfiguration {
                    message: format!("minimum penalty must not be negative, got {}", penalty.minimum_penalty),
                });
            }
            if let Some(cap) = penalty.cap_ratio {
                if cap < Rate::ZERO {
                    return Err(ServicingError::InvalidConfiguration {
                        message: format!("penalty cap must not be negative, got {}", cap),
                    });
                }
            }
        }

        Ok(())
    }

    /// parse and validate a json configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ServicingError::InvalidConfiguration {
            message: format!("malformed configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ServicingError::InvalidConfiguration {
            message: format!("unserializable configuration: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use rust_decimal_macros::dec;

    #[test]
    fn test_standard_config() {
        let config = ServicingConfig::standard();
        assert_eq!(config.duplicate_cooldown(), Duration::seconds(60));
        assert_eq!(config.excess_policy, ExcessPolicy::CarryAsCredit);
        assert!(config.penalty.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip_keeps_penalties() {
        let mut config = ServicingConfig::with_penalties(Rate::from_decimal(dec!(0.365)), 7);
        if let Some(penalty) = config.penalty.as_mut() {
            penalty.minimum_penalty = Money::from_major(500);
        }

        let json = config.to_json().unwrap();
        assert!(json.contains("\"CARRY_AS_CREDIT\""));
        assert_eq!(ServicingConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = ServicingConfig::standard();
        config.worker_threads = 0;
        assert!(config.validate().is_err());

        let mut config = ServicingConfig::standard();
        config.classification.watch_max_days = 0;
        assert!(config.validate().is_err());

        assert!(matches!(
            ServicingConfig::from_json("{\"worker_threads\": 2}"),
            Err(ServicingError::InvalidConfiguration { .. })
        ));
    }
}
