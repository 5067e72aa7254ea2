use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constitution::ConstitutionProfile;
use crate::environment::{EnvironmentSignal, WeatherAnomaly};
use crate::fit::MotiveShares;
use crate::motivation::Motive;
use crate::EngineError;

const NORMALIZED_TOLERANCE: f64 = 1e-6;
const EVEN_SPLIT_EPSILON: f64 = 1e-6;
const SETTLE_SEARCH_ULPS: u64 = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Constitution,
    Environment,
    Drivers,
}

impl Layer {
    pub const ALL: [Self; 3] = [Self::Constitution, Self::Environment, Self::Drivers];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constitution => "constitution",
            Self::Environment => "environment",
            Self::Drivers => "drivers",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "constitution" => Some(Self::Constitution),
            "environment" => Some(Self::Environment),
            "drivers" | "motive" => Some(Self::Drivers),
            _ => None,
        }
    }
}

/// Blend of the three signal layers used by the scorer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Weights {
    pub constitution: f64,
    pub environment: f64,
    pub drivers: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { constitution: 0.4, environment: 0.35, drivers: 0.25 }
    }
}

impl Weights {
    #[must_use]
    pub fn new(constitution: f64, environment: f64, drivers: f64) -> Self {
        Self { constitution, environment, drivers }
    }

    #[must_use]
    pub fn get(&self, layer: Layer) -> f64 {
        match layer {
            Layer::Constitution => self.constitution,
            Layer::Environment => self.environment,
            Layer::Drivers => self.drivers,
        }
    }

    pub fn set(&mut self, layer: Layer, value: f64) {
        match layer {
            Layer::Constitution => self.constitution = value,
            Layer::Environment => self.environment = value,
            Layer::Drivers => self.drivers = value,
        }
    }

    /// Left-to-right sum, the order every exactness check uses.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.constitution + self.environment + self.drivers
    }

    /// Check that the triple is a valid blend.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] when any weight leaves `[0, 1]` or the
    /// sum is further than `1e-6` from one.
    pub fn validate(&self) -> Result<(), EngineError> {
        for layer in Layer::ALL {
            let value = self.get(layer);
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Validation(format!(
                    "{} weight MUST be within [0, 1] (received: {value})",
                    layer.as_str()
                )));
            }
        }
        if (self.sum() - 1.0).abs() > NORMALIZED_TOLERANCE {
            return Err(EngineError::Validation(format!(
                "weights MUST sum to 1 (received: {})",
                self.sum()
            )));
        }
        Ok(())
    }
}

/// Layers in the order that gives them the finest control over [`Weights::sum`].
const SETTLE_FALLBACK: [Layer; 3] = [Layer::Drivers, Layer::Environment, Layer::Constitution];

/// Give the floating-point remainder to the first layer in `order` that can absorb it,
/// so that [`Weights::sum`] is exactly one. Returns `false` when none of them can.
fn settle_remainder(weights: &mut Weights, order: &[Layer]) -> bool {
    if weights.sum() == 1.0 {
        return true;
    }
    order.iter().any(|layer| settle_on(weights, *layer))
}

/// Search the bit neighbours of the exact complement of `target`; restores the
/// previous value on failure.
fn settle_on(weights: &mut Weights, target: Layer) -> bool {
    let previous = weights.get(target);
    let candidate = match target {
        Layer::Constitution => (1.0 - weights.drivers) - weights.environment,
        Layer::Environment => (1.0 - weights.drivers) - weights.constitution,
        Layer::Drivers => 1.0 - (weights.constitution + weights.environment),
    };
    let bits = candidate.max(0.0).to_bits();

    for step in 0..=SETTLE_SEARCH_ULPS {
        for neighbour in [bits.checked_add(step), bits.checked_sub(step)].into_iter().flatten() {
            let value = f64::from_bits(neighbour);
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                continue;
            }
            weights.set(target, value);
            if weights.sum() == 1.0 {
                return true;
            }
        }
    }
    weights.set(target, previous);
    false
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayerConfidences {
    pub constitution: f64,
    pub environment: f64,
    pub drivers: f64,
}

impl LayerConfidences {
    #[must_use]
    pub fn zero() -> Self {
        Self { constitution: 0.0, environment: 0.0, drivers: 0.0 }
    }
}

/// Evidence the controller turns into per-layer confidences.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeightSignals {
    pub constitution_margin: Option<f64>,
    pub constitution_age_days: Option<f64>,
    pub anomaly: WeatherAnomaly,
    pub climate_tag_count: usize,
    pub tag_strength: Option<f64>,
    pub weather_age_hours: Option<f64>,
    pub motive_shares: Option<BTreeMap<Motive, f64>>,
    pub motivation_age_days: Option<f64>,
    pub crave_count: usize,
}

impl WeightSignals {
    #[must_use]
    pub fn from_inputs(
        constitution: Option<&ConstitutionProfile>,
        environment: &EnvironmentSignal,
        motives: Option<&MotiveShares>,
        crave_count: usize,
    ) -> Self {
        Self {
            constitution_margin: constitution.map(ConstitutionProfile::margin),
            anomaly: environment.anomaly,
            climate_tag_count: environment.climate_tags.len(),
            tag_strength: environment.tag_strength,
            motive_shares: motives.map(MotiveShares::fractions),
            crave_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ages(
        mut self,
        constitution_days: Option<f64>,
        weather_hours: Option<f64>,
        motivation_days: Option<f64>,
    ) -> Self {
        self.constitution_age_days = constitution_days;
        self.weather_age_hours = weather_hours;
        self.motivation_age_days = motivation_days;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerOptions {
    pub constitution_floor: f64,
    pub environment_floor: f64,
    pub drivers_floor: f64,
    pub environment_cap: f64,
    pub drivers_cap: f64,
    pub constitution_half_life_days: f64,
    pub environment_half_life_hours: f64,
    pub drivers_half_life_days: f64,
    pub margin_midpoint: f64,
    pub margin_scale: f64,
    pub anomaly_saturation: f64,
    pub anomaly_share: f64,
    pub tag_share: f64,
    pub tag_saturation: usize,
    pub crave_boost_per_term: f64,
    pub crave_boost_cap: f64,
    pub constitution_trace_threshold: f64,
    pub environment_trace_threshold: f64,
    pub drivers_trace_threshold: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            constitution_floor: 0.45,
            environment_floor: 0.25,
            drivers_floor: 0.20,
            environment_cap: 0.55,
            drivers_cap: 0.45,
            constitution_half_life_days: 180.0,
            environment_half_life_hours: 24.0,
            drivers_half_life_days: 60.0,
            margin_midpoint: 10.0,
            margin_scale: 10.0,
            anomaly_saturation: 6.0,
            anomaly_share: 0.7,
            tag_share: 0.3,
            tag_saturation: 6,
            crave_boost_per_term: 0.05,
            crave_boost_cap: 0.3,
            constitution_trace_threshold: 0.6,
            environment_trace_threshold: 0.5,
            drivers_trace_threshold: 0.5,
        }
    }
}

impl ControllerOptions {
    /// # Errors
    /// Returns [`EngineError::Config`] when floors, caps, half-lives or the
    /// margin scale are inconsistent.
    pub fn validate(&self) -> Result<(), EngineError> {
        let floors = [self.constitution_floor, self.environment_floor, self.drivers_floor];
        if floors.iter().any(|floor| !(0.0..=1.0).contains(floor)) {
            return Err(EngineError::Config("layer floors MUST be within [0, 1]".to_string()));
        }
        if floors.iter().sum::<f64>() > 1.0 + NORMALIZED_TOLERANCE {
            return Err(EngineError::Config("layer floors MUST NOT sum above 1".to_string()));
        }
        if self.environment_cap < self.environment_floor || self.environment_cap > 1.0 {
            return Err(EngineError::Config(
                "environment cap MUST be within [environment floor, 1]".to_string(),
            ));
        }
        if self.drivers_cap < self.drivers_floor || self.drivers_cap > 1.0 {
            return Err(EngineError::Config(
                "drivers cap MUST be within [drivers floor, 1]".to_string(),
            ));
        }
        let half_lives = [
            self.constitution_half_life_days,
            self.environment_half_life_hours,
            self.drivers_half_life_days,
        ];
        if half_lives.iter().any(|half_life| *half_life <= 0.0 || !half_life.is_finite()) {
            return Err(EngineError::Config("half-lives MUST be positive".to_string()));
        }
        if self.margin_scale <= 0.0 || self.anomaly_saturation <= 0.0 {
            return Err(EngineError::Config(
                "margin scale and anomaly saturation MUST be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn logistic(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}

/// Exponential freshness decay; an unknown age does not decay.
fn decay(age: Option<f64>, half_life: f64) -> f64 {
    match age {
        Some(age) if age.is_finite() => 0.5_f64.powf(age.max(0.0) / half_life),
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeightReport {
    pub weights: Weights,
    pub confidences: LayerConfidences,
    pub trace: Vec<String>,
}

/// Turns per-layer evidence into a blended weight triple.
#[derive(Debug, Clone)]
pub struct AdaptiveWeightController {
    options: ControllerOptions,
}

impl AdaptiveWeightController {
    /// # Errors
    /// Returns [`EngineError::Config`] when the options fail validation.
    pub fn new(options: ControllerOptions) -> Result<Self, EngineError> {
        options.validate()?;
        Ok(Self { options })
    }

    #[must_use]
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    #[must_use]
    pub fn confidences(&self, signals: &WeightSignals) -> LayerConfidences {
        let options = &self.options;

        let constitution = signals.constitution_margin.map_or(0.0, |margin| {
            clamp01(logistic((margin - options.margin_midpoint) / options.margin_scale))
        }) * decay(signals.constitution_age_days, options.constitution_half_life_days);

        let from_anomaly = clamp01(signals.anomaly.magnitude() / options.anomaly_saturation);
        let tag_density = signals.tag_strength.map_or_else(
            || {
                let saturation = options.tag_saturation.max(1);
                clamp01(signals.climate_tag_count.min(saturation) as f64 / saturation as f64)
            },
            clamp01,
        );
        let environment = clamp01(from_anomaly * options.anomaly_share + tag_density * options.tag_share)
            * decay(signals.weather_age_hours, options.environment_half_life_hours);

        let focus = signals.motive_shares.as_ref().map_or(0.0, |shares| {
            let total: f64 = shares.values().filter(|share| share.is_finite()).map(|share| share.max(0.0)).sum();
            if total <= 0.0 {
                return 0.0;
            }
            let entropy: f64 = shares
                .values()
                .filter(|share| share.is_finite())
                .map(|share| share.max(0.0) / total)
                .filter(|probability| *probability > 0.0)
                .map(|probability| -probability * probability.ln())
                .sum();
            clamp01(1.0 - entropy / 4.0_f64.ln())
        });
        let crave_boost = (options.crave_boost_per_term * signals.crave_count as f64)
            .min(options.crave_boost_cap);
        let drivers = clamp01(focus + crave_boost)
            * decay(signals.motivation_age_days, options.drivers_half_life_days);

        LayerConfidences { constitution, environment, drivers }
    }

    /// Blend confidences into weights: floors, leftover by confidence share, caps,
    /// then renormalization. All-zero confidences yield the renormalized floors.
    #[must_use]
    pub fn blend(&self, confidences: &LayerConfidences) -> Weights {
        let options = &self.options;
        let rc = clamp01(confidences.constitution);
        let re = clamp01(confidences.environment);
        let rd = clamp01(confidences.drivers);

        let leftover =
            (1.0 - (options.constitution_floor + options.environment_floor + options.drivers_floor))
                .max(0.0);
        let total = rc + re + rd;
        let denominator = if total > 0.0 { total } else { 1.0 };

        let constitution = options.constitution_floor + leftover * (rc / denominator);
        let environment =
            (options.environment_floor + leftover * (re / denominator)).min(options.environment_cap);
        let drivers = (options.drivers_floor + leftover * (rd / denominator)).min(options.drivers_cap);

        let sum = constitution + environment + drivers;
        let mut weights = if sum > 0.0 {
            Weights::new(constitution / sum, environment / sum, drivers / sum)
        } else {
            Weights::default()
        };
        settle_remainder(&mut weights, &SETTLE_FALLBACK);
        weights
    }

    #[must_use]
    pub fn compute(&self, signals: &WeightSignals) -> WeightReport {
        let confidences = self.confidences(signals);
        let weights = self.blend(&confidences);
        let trace = self.trace(&confidences);
        tracing::debug!(
            constitution = weights.constitution,
            environment = weights.environment,
            drivers = weights.drivers,
            "blended layer weights"
        );
        WeightReport { weights, confidences, trace }
    }

    fn trace(&self, confidences: &LayerConfidences) -> Vec<String> {
        let options = &self.options;
        let mut trace = Vec::new();
        if confidences.constitution > options.constitution_trace_threshold {
            trace.push(format!("体质主副差大/测评新鲜 → 体质↑ ({:.2})", confidences.constitution));
        }
        if confidences.environment > options.environment_trace_threshold {
            trace.push(format!("天气异常或调理标签强 → 环境↑ ({:.2})", confidences.environment));
        }
        if confidences.drivers > options.drivers_trace_threshold {
            trace.push(format!("动因集中或“今天想吃” → 动因↑ ({:.2})", confidences.drivers));
        }
        if trace.is_empty() {
            trace.push("按先验下限分配（体质为根基）".to_string());
        }
        trace
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WeightPreset {
    Balanced,
    ConstitutionFirst,
    EnvironmentFirst,
    DriversFirst,
}

impl WeightPreset {
    pub const ALL: [Self; 4] =
        [Self::Balanced, Self::ConstitutionFirst, Self::EnvironmentFirst, Self::DriversFirst];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::ConstitutionFirst => "constitution_first",
            Self::EnvironmentFirst => "environment_first",
            Self::DriversFirst => "drivers_first",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|preset| preset.as_str() == normalized)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Balanced => "均衡",
            Self::ConstitutionFirst => "体质优先",
            Self::EnvironmentFirst => "环境优先",
            Self::DriversFirst => "动因优先",
        }
    }

    #[must_use]
    pub fn weights(self) -> Weights {
        match self {
            Self::Balanced => Weights::new(0.50, 0.30, 0.20),
            Self::ConstitutionFirst => Weights::new(0.60, 0.25, 0.15),
            Self::EnvironmentFirst => Weights::new(0.35, 0.50, 0.15),
            Self::DriversFirst => Weights::new(0.40, 0.20, 0.40),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LayerLocks {
    pub constitution: bool,
    pub environment: bool,
    pub drivers: bool,
}

impl LayerLocks {
    #[must_use]
    pub fn is_locked(&self, layer: Layer) -> bool {
        match layer {
            Layer::Constitution => self.constitution,
            Layer::Environment => self.environment,
            Layer::Drivers => self.drivers,
        }
    }

    fn set(&mut self, layer: Layer, locked: bool) {
        match layer {
            Layer::Constitution => self.constitution = locked,
            Layer::Environment => self.environment = locked,
            Layer::Drivers => self.drivers = locked,
        }
    }
}

/// Caller-controlled weights with optional per-layer locks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ManualWeights {
    pub weights: Weights,
    #[serde(default)]
    pub locks: LayerLocks,
}

impl Default for ManualWeights {
    fn default() -> Self {
        Self::from_preset(WeightPreset::Balanced)
    }
}

impl ManualWeights {
    /// # Errors
    /// Returns [`EngineError::Validation`] when `weights` is not a valid blend.
    pub fn new(weights: Weights, locks: LayerLocks) -> Result<Self, EngineError> {
        weights.validate()?;
        let mut manual = Self { weights, locks };
        manual.settle(manual.first_unlocked());
        Ok(manual)
    }

    #[must_use]
    pub fn from_preset(preset: WeightPreset) -> Self {
        let mut weights = preset.weights();
        settle_remainder(&mut weights, &SETTLE_FALLBACK);
        Self { weights, locks: LayerLocks::default() }
    }

    /// Replace all three values with a preset; locks stay as they are.
    pub fn apply_preset(&mut self, preset: WeightPreset) {
        self.weights = preset.weights();
        self.settle(self.first_unlocked());
    }

    fn first_unlocked(&self) -> Option<Layer> {
        Layer::ALL.into_iter().find(|layer| !self.locks.is_locked(*layer))
    }

    /// Settle the sum onto `preferred`, then onto the other unlocked layers. Locks
    /// are only overridden when every layer is locked.
    fn settle(&mut self, preferred: Option<Layer>) {
        let mut order = preferred.into_iter().collect::<Vec<_>>();
        order.extend(
            SETTLE_FALLBACK
                .into_iter()
                .filter(|layer| Some(*layer) != preferred && !self.locks.is_locked(*layer)),
        );
        if order.is_empty() {
            order.extend(SETTLE_FALLBACK);
        }
        if !settle_remainder(&mut self.weights, &order) {
            tracing::warn!(sum = self.weights.sum(), "manual weights could not be settled to exactly one");
        }
    }

    /// Set one unlocked layer and redistribute the difference across the other
    /// unlocked layers in proportion to their current values. Editing a locked
    /// layer changes nothing.
    pub fn adjust(&mut self, layer: Layer, value: f64) {
        if self.locks.is_locked(layer) {
            tracing::debug!(layer = layer.as_str(), "ignoring edit of a locked layer");
            return;
        }

        let locked_sum: f64 = Layer::ALL
            .iter()
            .filter(|candidate| self.locks.is_locked(**candidate))
            .map(|candidate| self.weights.get(*candidate))
            .sum();
        let budget = (1.0 - locked_sum).max(0.0);
        let others = Layer::ALL
            .into_iter()
            .filter(|candidate| *candidate != layer && !self.locks.is_locked(*candidate))
            .collect::<Vec<_>>();

        if others.is_empty() {
            // The locked layers already pin this one to the remaining budget.
            self.settle(Some(layer));
            return;
        }

        let target = if value.is_finite() { value.clamp(0.0, budget) } else { self.weights.get(layer) };
        let rest = budget - target;
        let current: f64 = others.iter().map(|other| self.weights.get(*other)).sum();

        self.weights.set(layer, target);
        for other in &others {
            let share = if current <= EVEN_SPLIT_EPSILON {
                rest / others.len() as f64
            } else {
                self.weights.get(*other) * rest / current
            };
            self.weights.set(*other, share);
        }
        self.settle(Some(layer));
    }

    /// Lock or unlock a layer, then renormalize onto the first unlocked layer.
    pub fn set_lock(&mut self, layer: Layer, locked: bool) {
        self.locks.set(layer, locked);
        if locked {
            self.settle(self.first_unlocked());
        } else {
            self.adjust(layer, self.weights.get(layer));
        }
    }
}
