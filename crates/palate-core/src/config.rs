use serde::{Deserialize, Serialize};

use crate::constitution::ConstitutionOptions;
use crate::environment::ClimateNorms;
use crate::fit::FitOptions;
use crate::motivation::MotivationOptions;
use crate::preference::PreferenceOptions;
use crate::rerank::RerankOptions;
use crate::scorer::ScorerOptions;
use crate::weights::ControllerOptions;
use crate::EngineError;

/// Every hand-authored tunable of the engine. Missing sections keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub constitution: ConstitutionOptions,
    pub motivation: MotivationOptions,
    pub fit: FitOptions,
    pub scorer: ScorerOptions,
    pub controller: ControllerOptions,
    pub rerank: RerankOptions,
    pub preference: PreferenceOptions,
    pub climate_norms: ClimateNorms,
}

fn unit(name: &str, value: f64) -> Result<(), EngineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::Config(format!("{name} MUST be within [0, 1] (received: {value})")))
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns [`EngineError::Config`] naming the first section that violates its invariants.
    pub fn validate(&self) -> Result<(), EngineError> {
        let constitution = &self.constitution;
        if constitution.sub_threshold_ratio <= 0.0 || constitution.sub_threshold_ratio > 1.0 {
            return Err(EngineError::Config(
                "constitution.sub_threshold_ratio MUST be within (0, 1]".to_string(),
            ));
        }

        let motivation = &self.motivation;
        if !(1..=5).contains(&motivation.attention_value) {
            return Err(EngineError::Config("motivation.attention_value MUST be within 1..=5".to_string()));
        }
        if motivation.consistency_threshold < 0.0 {
            return Err(EngineError::Config(
                "motivation.consistency_threshold MUST NOT be negative".to_string(),
            ));
        }
        unit("motivation.high_stability_gap", motivation.high_stability_gap)?;

        unit("fit.season_weight", self.fit.season_weight)?;
        unit("fit.region_weight", self.fit.region_weight)?;
        unit("fit.climate_tag_weight", self.fit.climate_tag_weight)?;
        unit("fit.balanced_floor", self.fit.balanced_floor)?;

        self.scorer
            .default_weights
            .validate()
            .map_err(|err| EngineError::Config(format!("scorer.default_weights: {err}")))?;
        if self.scorer.cold_penalty < 0.0 || self.scorer.sodium_penalty < 0.0 {
            return Err(EngineError::Config("scorer penalties MUST NOT be negative".to_string()));
        }

        self.controller.validate()?;

        if self.rerank.pool_limit == 0 || self.rerank.display_count == 0 {
            return Err(EngineError::Config(
                "rerank.pool_limit and rerank.display_count MUST be positive".to_string(),
            ));
        }

        let preference = &self.preference;
        unit("preference.dislike_cap", preference.dislike_cap)?;
        unit("preference.crave_cap", preference.crave_cap)?;
        if preference.dislike_per_hit < 0.0 || preference.crave_per_hit < 0.0 {
            return Err(EngineError::Config("preference per-hit values MUST NOT be negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: EngineConfig = match serde_json::from_str(r#"{"rerank":{"display_count":3}}"#) {
            Ok(config) => config,
            Err(err) => panic!("partial config should parse: {err}"),
        };
        assert_eq!(config.rerank.display_count, 3);
        assert_eq!(config.rerank.pool_limit, 150);
        assert!((config.scorer.cold_penalty - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_sections_are_reported() {
        let mut config = EngineConfig::default();
        config.preference.crave_cap = 1.5;
        assert!(matches!(config.validate(), Err(EngineError::Config(message)) if message.contains("crave_cap")));

        let mut config = EngineConfig::default();
        config.controller.environment_half_life_hours = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rerank.pool_limit = 0;
        assert!(config.validate().is_err());
    }
}
