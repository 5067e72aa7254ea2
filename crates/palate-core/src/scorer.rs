use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fit::HardFilters;
use crate::vector::{FitVector, LayerVectors};
use crate::weights::Weights;

/// Thermal nature of a dish in traditional dietetics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum Thermal {
    #[serde(rename = "寒")]
    Cold,
    #[serde(rename = "凉")]
    Cool,
    #[serde(rename = "平")]
    Neutral,
    #[serde(rename = "温")]
    Warm,
    #[serde(rename = "热")]
    Hot,
}

impl Thermal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "寒",
            Self::Cool => "凉",
            Self::Neutral => "平",
            Self::Warm => "温",
            Self::Hot => "热",
        }
    }
}

/// Read-only catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dish {
    pub id: String,
    #[serde(alias = "name_cn")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "ingredients_core")]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub fit_vector: LayerVectors,
    #[serde(default)]
    pub oil_level: u8,
    #[serde(default)]
    pub spicy_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium_level: Option<u8>,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub diet_rules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal: Option<Thermal>,
    #[serde(default)]
    pub substitutions: BTreeMap<String, Vec<String>>,
}

/// The three user vectors plus hard filters, rebuilt for every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub constitution_vector: FitVector,
    pub environment_vector: FitVector,
    pub motive_vector: FitVector,
    #[serde(default)]
    pub hard_filters: HardFilters,
}

impl UserContext {
    /// A copy with `boost` added onto each layer; `self` is left untouched.
    #[must_use]
    pub fn boosted(&self, boost: &LayerVectors) -> Self {
        Self {
            constitution_vector: self.constitution_vector.add(&boost.constitution),
            environment_vector: self.environment_vector.add(&boost.environment),
            motive_vector: self.motive_vector.add(&boost.motive),
            hard_filters: self.hard_filters.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    BlockedAllergen { allergen: String },
    MissingDietRule { rule: String },
    OilAboveMax { level: u8, max: u8 },
    SpicyAboveMax { level: u8, max: u8 },
    /// A declared allergen matched through its synonym list.
    AllergenSynonym { allergen: String, matched: String },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockedAllergen { allergen } => write!(f, "contains blocked allergen {allergen}"),
            Self::MissingDietRule { rule } => write!(f, "does not satisfy diet rule {rule}"),
            Self::OilAboveMax { level, max } => write!(f, "oil level {level} above max {max}"),
            Self::SpicyAboveMax { level, max } => write!(f, "spicy level {level} above max {max}"),
            Self::AllergenSynonym { allergen, matched } => {
                write!(f, "matches allergen {allergen} via {matched}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Scored(f64),
    Excluded(ExclusionReason),
}

impl ScoreOutcome {
    #[must_use]
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Scored(score) => Some(*score),
            Self::Excluded(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScorerOptions {
    pub default_weights: Weights,
    pub cold_penalty: f64,
    pub cold_conflict_dimension: String,
    pub cold_conflict_threshold: f64,
    pub sodium_penalty: f64,
}

impl Default for ScorerOptions {
    fn default() -> Self {
        Self {
            default_weights: Weights::default(),
            cold_penalty: 0.3,
            cold_conflict_dimension: "阳虚".to_string(),
            cold_conflict_threshold: 0.4,
            sodium_penalty: 0.2,
        }
    }
}

fn same_term(lhs: &str, rhs: &str) -> bool {
    lhs.trim().to_lowercase() == rhs.trim().to_lowercase()
}

fn hard_filter(dish: &Dish, filters: &HardFilters) -> Option<ExclusionReason> {
    if let Some(allergen) = filters
        .allergens_block
        .iter()
        .find(|blocked| dish.allergens.iter().any(|allergen| same_term(allergen, blocked)))
    {
        return Some(ExclusionReason::BlockedAllergen { allergen: allergen.clone() });
    }
    if let Some(rule) = filters
        .diet_rules_required
        .iter()
        .find(|required| !dish.diet_rules.iter().any(|rule| same_term(rule, required)))
    {
        return Some(ExclusionReason::MissingDietRule { rule: rule.clone() });
    }
    if let Some(max) = filters.oil_max.filter(|max| dish.oil_level > *max) {
        return Some(ExclusionReason::OilAboveMax { level: dish.oil_level, max });
    }
    if let Some(max) = filters.spicy_max.filter(|max| dish.spicy_level > *max) {
        return Some(ExclusionReason::SpicyAboveMax { level: dish.spicy_level, max });
    }
    None
}

/// Score one dish against a user context.
///
/// Hard filters run first and short-circuit to [`ScoreOutcome::Excluded`]. The
/// soft score is the weighted sum of the three layer dot products minus the
/// cold-thermal and sodium penalties. `weights` falls back to the configured default.
#[must_use]
pub fn score_dish(
    dish: &Dish,
    context: &UserContext,
    weights: Option<&Weights>,
    options: &ScorerOptions,
) -> ScoreOutcome {
    if let Some(reason) = hard_filter(dish, &context.hard_filters) {
        return ScoreOutcome::Excluded(reason);
    }

    let weights = weights.unwrap_or(&options.default_weights);
    let mut score = weights.constitution * dish.fit_vector.constitution.dot(&context.constitution_vector)
        + weights.environment * dish.fit_vector.environment.dot(&context.environment_vector)
        + weights.drivers * dish.fit_vector.motive.dot(&context.motive_vector);

    if dish.thermal == Some(Thermal::Cold)
        && context.constitution_vector.get(&options.cold_conflict_dimension)
            > options.cold_conflict_threshold
    {
        score -= options.cold_penalty;
    }
    if let (Some(level), Some(max)) = (dish.sodium_level, context.hard_filters.sodium_max) {
        if level > max {
            score -= options.sodium_penalty;
        }
    }

    ScoreOutcome::Scored(score)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDish<'a> {
    pub dish: &'a Dish,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExcludedDish {
    pub dish_id: String,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedPool<'a> {
    pub scored: Vec<ScoredDish<'a>>,
    pub excluded: Vec<ExcludedDish>,
}

/// Stable descending sort; equal scores keep catalog order.
pub(crate) fn sort_descending(scored: &mut [ScoredDish<'_>]) {
    scored.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));
}

/// Score the whole catalog, drop exclusions and keep the best `limit` dishes.
#[must_use]
pub fn rank_pool<'a>(
    dishes: &'a [Dish],
    context: &UserContext,
    weights: Option<&Weights>,
    options: &ScorerOptions,
    limit: usize,
) -> RankedPool<'a> {
    let mut scored = Vec::with_capacity(dishes.len());
    let mut excluded = Vec::new();

    for dish in dishes {
        match score_dish(dish, context, weights, options) {
            ScoreOutcome::Scored(score) => scored.push(ScoredDish { dish, score }),
            ScoreOutcome::Excluded(reason) => {
                tracing::debug!(dish_id = dish.id.as_str(), %reason, "dish excluded by hard filter");
                excluded.push(ExcludedDish { dish_id: dish.id.clone(), reason });
            }
        }
    }

    sort_descending(&mut scored);
    scored.truncate(limit);
    excluded.sort_by(|lhs, rhs| lhs.dish_id.cmp(&rhs.dish_id));

    RankedPool { scored, excluded }
}
