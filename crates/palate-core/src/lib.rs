//! Personalized dish ranking along three signal layers: body constitution,
//! environment and eating motivation.
//!
//! Every entry point here is a pure function of its inputs. Profiles, weights,
//! catalogs and preferences are passed in explicitly per request.

pub mod catalog;
pub mod config;
pub mod constitution;
pub mod environment;
pub mod explain;
pub mod fit;
pub mod motivation;
pub mod pipeline;
pub mod preference;
pub mod rerank;
pub mod scorer;
pub mod vector;
pub mod weights;

pub use catalog::{default_templates, Catalog};
pub use config::EngineConfig;
pub use constitution::{
    classify_constitution, default_constitution_bank, BodyType, ConstitutionAnswer,
    ConstitutionOptions, ConstitutionProfile, ConstitutionQuestion,
};
pub use environment::{
    resolve_climate, ClimateNorms, ClimateResolution, EnvironmentSignal, Season, WeatherAnomaly,
    WeatherReading,
};
pub use explain::{explain_match, Explanation};
pub use fit::{FitOptions, FitVectorBuilder, HardFilters, MotiveShares};
pub use motivation::{
    classify_forced_choice, classify_motivation, default_motivation_bank, ChoiceLetter,
    ForcedChoiceProfile, ItemKind, LikertAnswer, Motive, MotivationOptions, MotivationProfile,
    MotivationQuestion, Stability,
};
pub use pipeline::{recommend, CategoryResult, MotiveGroup, RankedItem, Recommendation};
pub use preference::{
    PreferenceAdjuster, PreferenceOptions, PreferenceOutcome, SynonymDictionary, UserPreferences,
};
pub use rerank::{group_by_motive, rerank, rerank_all, CategoryTemplate, RerankOptions, TemplateFilters};
pub use scorer::{
    rank_pool, score_dish, Dish, ExclusionReason, ExcludedDish, RankedPool, ScoreOutcome,
    ScoredDish, ScorerOptions, Thermal, UserContext,
};
pub use vector::{FitVector, LayerVectors};
pub use weights::{
    AdaptiveWeightController, ControllerOptions, Layer, LayerConfidences, LayerLocks, ManualWeights,
    WeightPreset, WeightReport, WeightSignals, Weights,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("catalog error: {0}")]
    Catalog(String),
}

/// Ruleset identifier stamped on every recommendation.
pub const RULESET_VERSION: &str = "palate-ranking.v1";
