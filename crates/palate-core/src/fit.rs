use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constitution::{max_attainable_scores, BodyType, ConstitutionProfile, ConstitutionQuestion};
use crate::environment::EnvironmentSignal;
use crate::motivation::{ForcedChoiceProfile, Motive, MotivationProfile};
use crate::preference::UserPreferences;
use crate::scorer::UserContext;
use crate::vector::FitVector;

/// Categorical exclusion rules applied before any soft scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HardFilters {
    pub allergens_block: Vec<String>,
    pub diet_rules_required: Vec<String>,
    pub oil_max: Option<u8>,
    pub spicy_max: Option<u8>,
    pub sodium_max: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FitOptions {
    pub season_weight: f64,
    pub region_weight: f64,
    pub climate_tag_weight: f64,
    /// Minimum weight on the balanced constitution dimension.
    pub balanced_floor: f64,
    pub baseline_filters: HardFilters,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            season_weight: 0.5,
            region_weight: 0.2,
            climate_tag_weight: 0.3,
            balanced_floor: 0.3,
            baseline_filters: HardFilters {
                oil_max: Some(2),
                spicy_max: Some(1),
                ..HardFilters::default()
            },
        }
    }
}

/// Motive ratios as handed over by a classifier or a client.
///
/// The unit is explicit so that percentages never leak past
/// [`FitVectorBuilder`]; everything downstream sees fractions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "unit", content = "values", rename_all = "snake_case")]
pub enum MotiveShares {
    Fractions(BTreeMap<Motive, f64>),
    Percentages(BTreeMap<Motive, f64>),
}

impl MotiveShares {
    #[must_use]
    pub fn from_profile(profile: &MotivationProfile) -> Self {
        Self::Fractions(profile.norm_scores.clone())
    }

    #[must_use]
    pub fn from_forced_choice(profile: &ForcedChoiceProfile) -> Self {
        Self::Fractions(profile.ratio.clone())
    }

    /// Fractions for all four motives summing to one. Missing, negative or
    /// non-finite shares count as zero; no signal at all yields a uniform split.
    #[must_use]
    pub fn fractions(&self) -> BTreeMap<Motive, f64> {
        let (values, divisor) = match self {
            Self::Fractions(values) => (values, 1.0),
            Self::Percentages(values) => (values, 100.0),
        };
        let cleaned = Motive::ALL
            .iter()
            .map(|motive| {
                let share = values.get(motive).copied().unwrap_or(0.0) / divisor;
                (*motive, if share.is_finite() && share > 0.0 { share } else { 0.0 })
            })
            .collect::<BTreeMap<_, _>>();

        let total: f64 = cleaned.values().sum();
        if total <= 0.0 {
            let uniform = 1.0 / Motive::ALL.len() as f64;
            return Motive::ALL.iter().map(|motive| (*motive, uniform)).collect();
        }
        cleaned.into_iter().map(|(motive, share)| (motive, share / total)).collect()
    }
}

fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    values.retain(|value| seen.insert(value.clone()));
}

/// Assembles the per-request [`UserContext`] from cached profiles.
#[derive(Debug, Clone)]
pub struct FitVectorBuilder {
    maxima: BTreeMap<BodyType, f64>,
    options: FitOptions,
}

impl FitVectorBuilder {
    #[must_use]
    pub fn new(bank: &[ConstitutionQuestion], options: FitOptions) -> Self {
        Self { maxima: max_attainable_scores(bank), options }
    }

    #[must_use]
    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Constitution scores scaled by the highest attainable score per type.
    #[must_use]
    pub fn constitution_vector(&self, profile: Option<&ConstitutionProfile>) -> FitVector {
        let mut vector = FitVector::new();
        if let Some(profile) = profile {
            for body_type in BodyType::ALL {
                let maximum = self.maxima.get(&body_type).copied().unwrap_or(0.0);
                if maximum > 0.0 {
                    vector.set(body_type.as_str(), (profile.score(body_type) / maximum).clamp(0.0, 1.0));
                }
            }
        }
        vector.insert_max(BodyType::Balanced.as_str(), self.options.balanced_floor);
        vector
    }

    #[must_use]
    pub fn environment_vector(&self, signal: &EnvironmentSignal) -> FitVector {
        let mut vector = FitVector::new();
        if let Some(season) = signal.season {
            vector.insert_max(season.as_str(), self.options.season_weight);
        }
        if let Some(region) = signal.region.as_deref().map(str::trim).filter(|region| !region.is_empty()) {
            vector.insert_max(region, self.options.region_weight);
        }
        for tag in &signal.climate_tags {
            vector.insert_max(tag.as_str(), self.options.climate_tag_weight);
        }
        vector
    }

    #[must_use]
    pub fn motive_vector(&self, shares: Option<&MotiveShares>) -> FitVector {
        let fractions = shares.map_or_else(
            || MotiveShares::Fractions(BTreeMap::new()).fractions(),
            MotiveShares::fractions,
        );
        Motive::ALL
            .iter()
            .map(|motive| (motive.as_str(), fractions.get(motive).copied().unwrap_or(0.0)))
            .collect()
    }

    /// Preferences override the baseline ceilings field by field.
    #[must_use]
    pub fn hard_filters(&self, preferences: Option<&UserPreferences>) -> HardFilters {
        let mut filters = self.options.baseline_filters.clone();
        if let Some(preferences) = preferences {
            filters.allergens_block.extend(preferences.allergens.iter().cloned());
            filters.diet_rules_required.extend(preferences.diet_rules.iter().cloned());
            filters.oil_max = preferences.oil_max.or(filters.oil_max);
            filters.spicy_max = preferences.spicy_max.or(filters.spicy_max);
            filters.sodium_max = preferences.sodium_max.or(filters.sodium_max);
        }
        dedup_in_order(&mut filters.allergens_block);
        dedup_in_order(&mut filters.diet_rules_required);
        filters
    }

    #[must_use]
    pub fn build(
        &self,
        constitution: Option<&ConstitutionProfile>,
        environment: &EnvironmentSignal,
        motives: Option<&MotiveShares>,
        preferences: Option<&UserPreferences>,
    ) -> UserContext {
        UserContext {
            constitution_vector: self.constitution_vector(constitution),
            environment_vector: self.environment_vector(environment),
            motive_vector: self.motive_vector(motives),
            hard_filters: self.hard_filters(preferences),
        }
    }
}
