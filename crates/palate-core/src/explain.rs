use serde::{Deserialize, Serialize};

use crate::motivation::Motive;
use crate::scorer::{Dish, UserContext};
use crate::vector::FitVector;

const CONSTITUTION_FALLBACK: &str = "平衡";
const ENVIRONMENT_FALLBACK: &str = "当季适配";
const MOTIVE_FALLBACK: &str = "综合";

/// Why a dish was ranked, one matched dimension per layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Explanation {
    pub constitution: String,
    pub environment: String,
    pub motive: String,
    pub sentence: String,
}

/// The dish dimension with the largest dish × user product. Ties keep the
/// first dish entry; a non-positive product never counts as a match.
fn best_match<'a>(dish: &'a FitVector, user: &FitVector) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for (key, weight) in dish.iter() {
        let product = weight * user.get(key);
        if product <= 0.0 {
            continue;
        }
        match best {
            Some((_, current)) if product <= current => {}
            _ => best = Some((key, product)),
        }
    }
    best.map(|(key, _)| key)
}

#[must_use]
pub fn explain_match(dish: &Dish, context: &UserContext) -> Explanation {
    let constitution = best_match(&dish.fit_vector.constitution, &context.constitution_vector)
        .unwrap_or(CONSTITUTION_FALLBACK)
        .to_string();
    let environment = best_match(&dish.fit_vector.environment, &context.environment_vector)
        .unwrap_or(ENVIRONMENT_FALLBACK)
        .to_string();
    let motive = best_match(&dish.fit_vector.motive, &context.motive_vector).map_or_else(
        || MOTIVE_FALLBACK.to_string(),
        |key| Motive::parse(key).map_or_else(|| key.to_string(), |motive| motive.label().to_string()),
    );
    let sentence = format!("体质命中：{constitution}；环境命中：{environment}；动因：{motive}");
    Explanation { constitution, environment, motive, sentence }
}
