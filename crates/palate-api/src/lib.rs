use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use palate_core::{
    classify_constitution, classify_forced_choice, classify_motivation, default_constitution_bank,
    default_motivation_bank, recommend, resolve_climate, AdaptiveWeightController, Catalog,
    ChoiceLetter, ConstitutionAnswer, ConstitutionQuestion, EngineConfig, EnvironmentSignal,
    FitVectorBuilder, Layer, LayerLocks, LikertAnswer, ManualWeights, Motive, MotivationQuestion,
    Recommendation, Season, UserPreferences, WeatherReading, WeightPreset, WeightReport,
    WeightSignals, Weights,
};
use palate_store_sqlite::SqliteStore;
pub use palate_store_sqlite::{
    DeviceSnapshot, MotivationResult, SchemaStatus, StoredConstitution, StoredEnvironment,
    StoredMotivation,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

const DEMO_CATALOG_JSON: &str = include_str!("../fixtures/demo_catalog.json");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionBanks {
    pub constitution: Vec<ConstitutionQuestion>,
    pub motivation: Vec<MotivationQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstitutionSubmission {
    pub device_id: String,
    pub answers: Vec<ConstitutionAnswer>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "form", content = "answers", rename_all = "snake_case")]
pub enum MotivationAnswers {
    Likert(Vec<LikertAnswer>),
    ForcedChoice(Vec<ChoiceLetter>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotivationSubmission {
    pub device_id: String,
    #[serde(flatten)]
    pub answers: MotivationAnswers,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

/// Situational inputs for one device. Season defaults to the calendar season
/// of `observed_at`; when a weather reading is present its resolved climate
/// directions replace an empty `climate_tags`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentSubmission {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub observed_at: Option<OffsetDateTime>,
    pub season: Option<Season>,
    pub region: Option<String>,
    pub weather: Option<WeatherReading>,
    pub climate_tags: Vec<String>,
    pub tag_strength: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WeightsUpdate {
    Preset {
        preset: WeightPreset,
    },
    Adjust {
        layer: Layer,
        value: f64,
    },
    Lock {
        layer: Layer,
        locked: bool,
    },
    Replace {
        weights: Weights,
        #[serde(default)]
        locks: LayerLocks,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WeightsMode {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightsView {
    pub device_id: String,
    pub mode: WeightsMode,
    pub weights: Weights,
    pub manual: Option<ManualWeights>,
    pub report: Option<WeightReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecommendRequest {
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
    pub motive: Option<Motive>,
    /// Overrides the stored preferences for this request only.
    pub preferences: Option<UserPreferences>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendResponse {
    pub recommendation_id: String,
    pub device_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub weights: WeightsView,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone)]
pub struct PalateApi {
    db_path: PathBuf,
    config: EngineConfig,
    catalog: Catalog,
}

impl PalateApi {
    /// Facade over `db_path` with the default engine configuration and the bundled demo catalog.
    ///
    /// # Errors
    /// Returns an error when the bundled catalog fails validation.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        Self::from_sources(db_path, None, None)
    }

    /// # Errors
    /// Returns an error when the config or catalog file cannot be read, parsed or validated.
    pub fn from_sources(
        db_path: PathBuf,
        config_path: Option<&Path>,
        catalog_path: Option<&Path>,
    ) -> Result<Self> {
        let config = load_config(config_path)?;
        let catalog = load_catalog(catalog_path)?;
        Self::from_parts(db_path, config, catalog)
    }

    /// # Errors
    /// Returns an error when `config` or `catalog` violates its invariants.
    pub fn from_parts(db_path: PathBuf, config: EngineConfig, catalog: Catalog) -> Result<Self> {
        config.validate().context("invalid engine config")?;
        catalog.validate().context("invalid catalog")?;
        Ok(Self { db_path, config, catalog })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    #[must_use]
    pub fn question_banks(&self) -> QuestionBanks {
        QuestionBanks {
            constitution: default_constitution_bank(),
            motivation: default_motivation_bank(),
        }
    }

    /// Score and persist a constitution questionnaire.
    ///
    /// # Errors
    /// Returns an error when the submission is rejected by the classifier or persistence fails.
    pub fn submit_constitution(&self, input: ConstitutionSubmission) -> Result<StoredConstitution> {
        let profile = classify_constitution(
            &default_constitution_bank(),
            &input.answers,
            &self.config.constitution,
        )
        .context("constitution submission rejected")?;

        let mut store = self.open_migrated()?;
        let recorded_at = input.recorded_at.unwrap_or_else(OffsetDateTime::now_utc);
        let stored = store.insert_constitution(&input.device_id, recorded_at, &profile, &input.answers)?;
        tracing::info!(
            device_id = %stored.device_id,
            main_type = stored.profile.main_type.as_str(),
            answers = stored.answers.len(),
            "stored constitution result"
        );
        Ok(stored)
    }

    /// Score and persist a motivation questionnaire in either form.
    ///
    /// # Errors
    /// Returns an error when a forced-choice submission has the wrong length or persistence fails.
    pub fn submit_motivation(&self, input: MotivationSubmission) -> Result<StoredMotivation> {
        let result = match input.answers {
            MotivationAnswers::Likert(answers) => {
                let profile =
                    classify_motivation(&default_motivation_bank(), &answers, &self.config.motivation);
                MotivationResult::Likert { profile, answers }
            }
            MotivationAnswers::ForcedChoice(answers) => {
                let profile =
                    classify_forced_choice(&answers).context("forced-choice submission rejected")?;
                MotivationResult::ForcedChoice { profile }
            }
        };

        let mut store = self.open_migrated()?;
        let recorded_at = input.recorded_at.unwrap_or_else(OffsetDateTime::now_utc);
        let stored = store.insert_motivation(&input.device_id, recorded_at, &result)?;
        tracing::info!(
            device_id = %stored.device_id,
            form = stored.result.form(),
            main = stored.result.main().as_str(),
            "stored motivation result"
        );
        Ok(stored)
    }

    /// Resolve and persist an environment snapshot.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn submit_environment(&self, input: EnvironmentSubmission) -> Result<StoredEnvironment> {
        let observed_at = input.observed_at.unwrap_or_else(OffsetDateTime::now_utc);
        let season = input.season.unwrap_or_else(|| Season::from_date(observed_at.date()));
        let region = input
            .region
            .map(|region| region.trim().to_string())
            .filter(|region| !region.is_empty());

        let (mut signal, avoid) = match input.weather.as_ref() {
            Some(reading) => {
                let resolution = resolve_climate(season, reading);
                let signal = EnvironmentSignal::from_resolution(
                    &resolution,
                    region,
                    reading,
                    &self.config.climate_norms,
                );
                (signal, resolution.avoid)
            }
            None => (
                EnvironmentSignal { season: Some(season), region, ..EnvironmentSignal::default() },
                Vec::new(),
            ),
        };
        if !input.climate_tags.is_empty() {
            signal.climate_tags = input.climate_tags;
        }
        signal.tag_strength = input.tag_strength;

        let mut store = self.open_migrated()?;
        let stored = store.insert_environment(
            &input.device_id,
            observed_at,
            &signal,
            input.weather.as_ref(),
            &avoid,
        )?;
        tracing::info!(
            device_id = %stored.device_id,
            season = season.as_str(),
            tags = stored.signal.climate_tags.len(),
            "stored environment snapshot"
        );
        Ok(stored)
    }

    /// # Errors
    /// Returns an error when persistence fails.
    pub fn set_preferences(&self, device_id: &str, preferences: UserPreferences) -> Result<UserPreferences> {
        let mut store = self.open_migrated()?;
        store.put_preferences(device_id, &preferences)?;
        tracing::info!(
            device_id,
            allergens = preferences.allergens.len(),
            dislikes = preferences.dislikes.len(),
            craves = preferences.craves.len(),
            "stored preferences"
        );
        Ok(preferences)
    }

    /// Effective weights for a device: manual when set, otherwise adaptive.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or the controller options are invalid.
    pub fn weights(&self, device_id: &str, as_of: Option<OffsetDateTime>) -> Result<WeightsView> {
        let store = self.open_migrated()?;
        let snapshot = store.device_snapshot(device_id)?;
        let as_of = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let preferences = snapshot.preferences.clone().unwrap_or_default();
        self.weights_view(&snapshot, &preferences, as_of)
    }

    /// Adaptive weights for a device, ignoring any manual setting.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or the controller options are invalid.
    pub fn auto_weights(&self, device_id: &str, as_of: Option<OffsetDateTime>) -> Result<WeightReport> {
        let store = self.open_migrated()?;
        let snapshot = store.device_snapshot(device_id)?;
        let as_of = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let preferences = snapshot.preferences.clone().unwrap_or_default();
        self.auto_report(&snapshot, &preferences, as_of)
    }

    /// Apply one manual weight edit. A device without manual weights starts
    /// from its current adaptive weights with no locks.
    ///
    /// # Errors
    /// Returns an error when replacement weights are invalid or persistence fails.
    pub fn update_weights(&self, device_id: &str, update: WeightsUpdate) -> Result<ManualWeights> {
        let mut store = self.open_migrated()?;
        let snapshot = store.device_snapshot(device_id)?;
        let mut manual = match snapshot.manual_weights {
            Some(manual) => manual,
            None => {
                let preferences = snapshot.preferences.clone().unwrap_or_default();
                let report = self.auto_report(&snapshot, &preferences, OffsetDateTime::now_utc())?;
                ManualWeights::new(report.weights, LayerLocks::default())
                    .context("adaptive weights are not a valid manual starting point")?
            }
        };

        match update {
            WeightsUpdate::Preset { preset } => manual.apply_preset(preset),
            WeightsUpdate::Adjust { layer, value } => {
                if !value.is_finite() {
                    return Err(anyhow!("weight value MUST be finite (received: {value})"));
                }
                manual.adjust(layer, value);
            }
            WeightsUpdate::Lock { layer, locked } => manual.set_lock(layer, locked),
            WeightsUpdate::Replace { weights, locks } => {
                manual = ManualWeights::new(weights, locks).context("invalid manual weights")?;
            }
        }

        store.put_manual_weights(device_id, &manual)?;
        tracing::info!(
            device_id,
            constitution = manual.weights.constitution,
            environment = manual.weights.environment,
            drivers = manual.weights.drivers,
            "stored manual weights"
        );
        Ok(manual)
    }

    /// Drop manual weights so the device returns to adaptive weighting.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn clear_weights(&self, device_id: &str) -> Result<bool> {
        let mut store = self.open_migrated()?;
        let removed = store.clear_manual_weights(device_id)?;
        tracing::info!(device_id, removed, "cleared manual weights");
        Ok(removed)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn profile(&self, device_id: &str) -> Result<DeviceSnapshot> {
        let store = self.open_migrated()?;
        store.device_snapshot(device_id)
    }

    /// Rank the catalog for one device from its latest stored profiles.
    ///
    /// # Errors
    /// Returns an error when the device id is blank, the store cannot be read,
    /// or the controller options are invalid.
    pub fn recommend(&self, input: RecommendRequest) -> Result<RecommendResponse> {
        if input.device_id.trim().is_empty() {
            return Err(anyhow!("device_id MUST be non-empty"));
        }
        let store = self.open_migrated()?;
        let snapshot = store.device_snapshot(&input.device_id)?;
        let as_of = input.as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let preferences = input
            .preferences
            .or_else(|| snapshot.preferences.clone())
            .unwrap_or_default();

        let environment = environment_signal(&snapshot, as_of);
        let shares = snapshot.motivation.as_ref().map(|stored| stored.result.shares());
        let builder = FitVectorBuilder::new(&default_constitution_bank(), self.config.fit.clone());
        let context = builder.build(
            snapshot.constitution.as_ref().map(|stored| &stored.profile),
            &environment,
            shares.as_ref(),
            Some(&preferences),
        );

        let weights = self.weights_view(&snapshot, &preferences, as_of)?;
        let recommendation = recommend(
            &self.catalog,
            &context,
            &weights.weights,
            &preferences,
            input.motive,
            &self.config,
        );
        let recommendation_id =
            compute_recommendation_id(&input.device_id, as_of, input.motive, &self.catalog)?;

        tracing::info!(
            device_id = %input.device_id,
            recommendation_id = %recommendation_id,
            categories = recommendation.categories().count(),
            excluded = recommendation.excluded.len(),
            "built recommendation"
        );

        Ok(RecommendResponse {
            recommendation_id,
            device_id: input.device_id,
            as_of,
            weights,
            recommendation,
        })
    }

    fn auto_report(
        &self,
        snapshot: &DeviceSnapshot,
        preferences: &UserPreferences,
        as_of: OffsetDateTime,
    ) -> Result<WeightReport> {
        let controller = AdaptiveWeightController::new(self.config.controller.clone())
            .context("invalid controller options")?;
        let environment = environment_signal(snapshot, as_of);
        let shares = snapshot.motivation.as_ref().map(|stored| stored.result.shares());
        let signals = WeightSignals::from_inputs(
            snapshot.constitution.as_ref().map(|stored| &stored.profile),
            &environment,
            shares.as_ref(),
            preferences.craves.len(),
        )
        .with_ages(
            snapshot.constitution.as_ref().map(|stored| age_days(stored.recorded_at, as_of)),
            snapshot.environment.as_ref().map(|stored| age_hours(stored.recorded_at, as_of)),
            snapshot.motivation.as_ref().map(|stored| age_days(stored.recorded_at, as_of)),
        );
        Ok(controller.compute(&signals))
    }

    fn weights_view(
        &self,
        snapshot: &DeviceSnapshot,
        preferences: &UserPreferences,
        as_of: OffsetDateTime,
    ) -> Result<WeightsView> {
        if let Some(manual) = snapshot.manual_weights {
            return Ok(WeightsView {
                device_id: snapshot.device_id.clone(),
                mode: WeightsMode::Manual,
                weights: manual.weights,
                manual: Some(manual),
                report: None,
            });
        }

        let report = self.auto_report(snapshot, preferences, as_of)?;
        Ok(WeightsView {
            device_id: snapshot.device_id.clone(),
            mode: WeightsMode::Auto,
            weights: report.weights,
            manual: None,
            report: Some(report),
        })
    }
}

/// Load engine configuration from YAML, falling back to defaults when no path is given.
///
/// # Errors
/// Returns an error when the file cannot be read, parsed or validated.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: EngineConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate().with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

/// Load a JSON catalog, falling back to the bundled demo catalog when no path is given.
///
/// # Errors
/// Returns an error when the file cannot be read, parsed or validated.
pub fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog file {}", path.display()))?;
            Catalog::from_json(&raw).with_context(|| format!("invalid catalog file {}", path.display()))
        }
        None => Catalog::from_json(DEMO_CATALOG_JSON).context("invalid bundled demo catalog"),
    }
}

/// Latest stored signal, with the season taken from `as_of` once the snapshot
/// belongs to a different calendar season.
fn environment_signal(snapshot: &DeviceSnapshot, as_of: OffsetDateTime) -> EnvironmentSignal {
    let current = Season::from_date(as_of.date());
    snapshot.environment.as_ref().map_or_else(
        || EnvironmentSignal { season: Some(current), ..EnvironmentSignal::default() },
        |stored| {
            let mut signal = stored.signal.clone();
            if Season::from_date(stored.recorded_at.date()) != current {
                tracing::debug!(
                    device_id = %stored.device_id,
                    season = current.as_str(),
                    "environment snapshot is from another season"
                );
                signal.season = Some(current);
            }
            signal
        },
    )
}

fn age_days(recorded_at: OffsetDateTime, as_of: OffsetDateTime) -> f64 {
    age_hours(recorded_at, as_of) / 24.0
}

fn age_hours(recorded_at: OffsetDateTime, as_of: OffsetDateTime) -> f64 {
    ((as_of - recorded_at).as_seconds_f64() / 3600.0).max(0.0)
}

fn compute_recommendation_id(
    device_id: &str,
    as_of: OffsetDateTime,
    motive: Option<Motive>,
    catalog: &Catalog,
) -> Result<String> {
    let as_of = as_of
        .to_offset(time::UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format as_of timestamp")?;

    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(as_of.as_bytes());
    hasher.update(b"\n");
    hasher.update(motive.map_or("*", Motive::as_str).as_bytes());
    for dish in &catalog.dishes {
        hasher.update(b"\n");
        hasher.update(dish.id.as_bytes());
    }
    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    Ok(format!("rec_{}", &digest_hex[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("palate-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn neutral_answers() -> Vec<ConstitutionAnswer> {
        (1..=12).map(|id| ConstitutionAnswer { id, score: 3 }).collect()
    }

    fn yang_deficient_answers() -> Vec<ConstitutionAnswer> {
        (1..=12)
            .map(|id| ConstitutionAnswer { id, score: if matches!(id, 1 | 3 | 11 | 12) { 5 } else { 1 } })
            .collect()
    }

    #[test]
    fn demo_catalog_loads_with_default_templates() -> Result<()> {
        let catalog = load_catalog(None)?;
        assert_eq!(catalog.dishes.len(), 12);
        assert_eq!(catalog.templates.len(), 12);
        assert!(catalog.dish("m9").is_some());
        Ok(())
    }

    #[test]
    fn recommend_without_history_uses_defaults() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;

        let response = api.recommend(RecommendRequest {
            device_id: "device-a".to_string(),
            as_of: Some(datetime!(2026-07-10 12:00 UTC)),
            ..RecommendRequest::default()
        })?;

        assert!(response.recommendation_id.starts_with("rec_"));
        assert_eq!(response.recommendation_id.len(), 20);
        assert_eq!(response.weights.mode, WeightsMode::Auto);
        assert!((response.weights.weights.sum() - 1.0).abs() < 1e-6);
        assert_eq!(response.recommendation.groups.len(), 4);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn submissions_flow_into_recommendation() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;
        let device_id = "device-b".to_string();

        let constitution = api.submit_constitution(ConstitutionSubmission {
            device_id: device_id.clone(),
            answers: yang_deficient_answers(),
            recorded_at: Some(datetime!(2026-07-01 08:00 UTC)),
        })?;
        assert_eq!(constitution.profile.main_type.as_str(), "阳虚");

        let motivation = api.submit_motivation(MotivationSubmission {
            device_id: device_id.clone(),
            answers: MotivationAnswers::ForcedChoice(vec![ChoiceLetter::D; 12]),
            recorded_at: Some(datetime!(2026-07-01 08:05 UTC)),
        })?;
        assert_eq!(motivation.result.main(), Motive::E);

        let environment = api.submit_environment(EnvironmentSubmission {
            device_id: device_id.clone(),
            observed_at: Some(datetime!(2026-07-10 09:00 UTC)),
            region: Some(" 广州 ".to_string()),
            weather: Some(WeatherReading {
                temperature_c: Some(33.0),
                humidity_pct: Some(80.0),
                wind_kmh: None,
            }),
            ..EnvironmentSubmission::default()
        })?;
        assert_eq!(environment.signal.season, Some(Season::Summer));
        assert_eq!(environment.signal.region.as_deref(), Some("广州"));
        assert_eq!(environment.avoid, vec!["温补厚腻", "重口油腻"]);

        api.set_preferences(
            &device_id,
            UserPreferences { allergens: vec!["花生".to_string()], ..UserPreferences::default() },
        )?;

        let response = api.recommend(RecommendRequest {
            device_id: device_id.clone(),
            as_of: Some(datetime!(2026-07-10 12:00 UTC)),
            motive: Some(Motive::E),
            preferences: None,
        })?;
        assert_eq!(response.recommendation.groups.len(), 1);
        assert!(response.recommendation.excluded.iter().any(|entry| entry.dish_id == "m7"));
        assert!(response
            .recommendation
            .categories()
            .flat_map(|category| category.items.iter())
            .all(|item| item.id != "m7"));

        let report = response.weights.report.as_ref().map(|report| report.confidences);
        let Some(confidences) = report else {
            panic!("auto mode should carry a weight report");
        };
        assert!(confidences.constitution > 0.0);
        assert!(confidences.environment > 0.0);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn manual_weights_override_until_cleared() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;

        let manual = api.update_weights("device-c", WeightsUpdate::Preset { preset: WeightPreset::DriversFirst })?;
        assert_eq!(manual.weights, WeightPreset::DriversFirst.weights());

        let locked = api.update_weights("device-c", WeightsUpdate::Lock { layer: Layer::Drivers, locked: true })?;
        let adjusted = api.update_weights("device-c", WeightsUpdate::Adjust { layer: Layer::Constitution, value: 0.9 })?;
        assert_eq!(adjusted.weights.drivers.to_bits(), locked.weights.drivers.to_bits());
        assert!((adjusted.weights.sum() - 1.0).abs() < 1e-12);

        let view = api.weights("device-c", None)?;
        assert_eq!(view.mode, WeightsMode::Manual);
        assert_eq!(view.weights, adjusted.weights);

        assert!(api.clear_weights("device-c")?);
        assert_eq!(api.weights("device-c", None)?.mode, WeightsMode::Auto);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn invalid_submissions_are_rejected() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;

        let empty = api.submit_constitution(ConstitutionSubmission {
            device_id: "device-d".to_string(),
            answers: Vec::new(),
            recorded_at: None,
        });
        assert!(empty.is_err());

        let short = api.submit_motivation(MotivationSubmission {
            device_id: "device-d".to_string(),
            answers: MotivationAnswers::ForcedChoice(vec![ChoiceLetter::A; 3]),
            recorded_at: None,
        });
        assert!(short.is_err());

        let replace = api.update_weights(
            "device-d",
            WeightsUpdate::Replace { weights: Weights::new(0.9, 0.9, 0.9), locks: LayerLocks::default() },
        );
        assert!(replace.is_err());
        assert!(api.profile("device-d")?.constitution.is_none());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn season_follows_as_of_once_the_snapshot_is_out_of_season() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;
        let device_id = "device-season".to_string();

        api.submit_environment(EnvironmentSubmission {
            device_id: device_id.clone(),
            observed_at: Some(datetime!(2026-01-15 09:00 UTC)),
            season: Some(Season::Spring),
            climate_tags: vec!["温补".to_string()],
            ..EnvironmentSubmission::default()
        })?;
        let snapshot = api.profile(&device_id)?;

        let same_season = environment_signal(&snapshot, datetime!(2026-02-01 12:00 UTC));
        assert_eq!(same_season.season, Some(Season::Spring));

        let summer = environment_signal(&snapshot, datetime!(2026-07-10 12:00 UTC));
        assert_eq!(summer.season, Some(Season::Summer));
        assert_eq!(summer.climate_tags, vec!["温补".to_string()]);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn stale_constitution_loses_confidence() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;
        api.submit_constitution(ConstitutionSubmission {
            device_id: "device-e".to_string(),
            answers: yang_deficient_answers(),
            recorded_at: Some(datetime!(2026-01-01 00:00 UTC)),
        })?;

        let fresh = api.auto_weights("device-e", Some(datetime!(2026-01-02 00:00 UTC)))?;
        let stale = api.auto_weights("device-e", Some(datetime!(2027-01-01 00:00 UTC)))?;
        assert!(stale.confidences.constitution < fresh.confidences.constitution);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn recommendation_id_is_deterministic() -> Result<()> {
        let catalog = load_catalog(None)?;
        let as_of = datetime!(2026-07-10 20:00 +08:00);
        let lhs = compute_recommendation_id("device-a", as_of, Some(Motive::P), &catalog)?;
        let rhs = compute_recommendation_id("device-a", datetime!(2026-07-10 12:00 UTC), Some(Motive::P), &catalog)?;
        let other = compute_recommendation_id("device-a", as_of, None, &catalog)?;
        assert_eq!(lhs, rhs);
        assert_ne!(lhs, other);
        Ok(())
    }

    #[test]
    fn yaml_config_overrides_defaults() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("palate-api-config-{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("palate.yaml");
        std::fs::write(&path, "rerank:\n  display_count: 2\n")?;

        let config = load_config(Some(&path))?;
        assert_eq!(config.rerank.display_count, 2);
        assert_eq!(config.rerank.pool_limit, 150);

        std::fs::write(&path, "preference:\n  crave_cap: 3.0\n")?;
        assert!(load_config(Some(&path)).is_err());

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn neutral_answers_classify() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = PalateApi::new(db_path.clone())?;
        let stored = api.submit_constitution(ConstitutionSubmission {
            device_id: "device-f".to_string(),
            answers: neutral_answers(),
            recorded_at: None,
        })?;
        assert_eq!(stored.answers.len(), 12);
        assert!(api.profile("device-f")?.constitution.is_some());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
