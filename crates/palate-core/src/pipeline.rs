use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::explain::{explain_match, Explanation};
use crate::motivation::Motive;
use crate::preference::{PreferenceAdjuster, UserPreferences};
use crate::rerank::{group_by_motive, rerank_all, CategoryTemplate};
use crate::scorer::{rank_pool, sort_descending, ExcludedDish, ExclusionReason, ScoredDish, UserContext};
use crate::weights::Weights;
use crate::RULESET_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedItem {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub substitutions: BTreeMap<String, Vec<String>>,
    pub ingredients: Vec<String>,
    pub explanation: Explanation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryResult {
    pub code: String,
    pub motive: Motive,
    pub name: String,
    pub description: String,
    pub items: Vec<RankedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotiveGroup {
    pub motive: Motive,
    pub label: String,
    pub categories: Vec<CategoryResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub ruleset_version: String,
    pub weights: Weights,
    pub groups: Vec<MotiveGroup>,
    pub excluded: Vec<ExcludedDish>,
}

impl Recommendation {
    pub fn categories(&self) -> impl Iterator<Item = &CategoryResult> {
        self.groups.iter().flat_map(|group| group.categories.iter())
    }
}

fn ranked_item(entry: &ScoredDish<'_>, context: &UserContext) -> RankedItem {
    RankedItem {
        id: entry.dish.id.clone(),
        name: entry.dish.name.clone(),
        score: entry.score,
        substitutions: entry.dish.substitutions.clone(),
        ingredients: entry.dish.ingredients.clone(),
        explanation: explain_match(entry.dish, context),
    }
}

/// Per-request inputs shared by every category.
struct CategoryRanker<'r> {
    context: &'r UserContext,
    weights: &'r Weights,
    preferences: &'r UserPreferences,
    adjuster: PreferenceAdjuster,
    config: &'r EngineConfig,
}

impl CategoryRanker<'_> {
    fn rank(
        &self,
        pool: &[ScoredDish<'_>],
        template: &CategoryTemplate,
        excluded: &mut BTreeMap<String, ExclusionReason>,
    ) -> CategoryResult {
        let reranked = rerank_all(pool, template, self.context, Some(self.weights), &self.config.scorer);
        let outcome = self.adjuster.adjust(reranked, self.preferences);
        for exclusion in outcome.excluded {
            excluded.entry(exclusion.dish_id).or_insert(exclusion.reason);
        }

        let mut kept = outcome.kept;
        sort_descending(&mut kept);
        kept.truncate(self.config.rerank.display_count_for(template));

        CategoryResult {
            code: template.code.clone(),
            motive: template.motive,
            name: template.name.clone(),
            description: template.description.clone(),
            items: kept.iter().map(|entry| ranked_item(entry, self.context)).collect(),
        }
    }
}

/// Rank a catalog for one request.
///
/// Base ranking with hard filters and the pool limit, then per template:
/// rerank, preference adjustment, re-sort and display truncation. Categories
/// are grouped by motive in P, H, S, E order. `motive_filter` keeps only the
/// templates of one motive. Every excluded dish is reported once, by dish id.
#[must_use]
pub fn recommend(
    catalog: &Catalog,
    context: &UserContext,
    weights: &Weights,
    preferences: &UserPreferences,
    motive_filter: Option<Motive>,
    config: &EngineConfig,
) -> Recommendation {
    let pool = rank_pool(&catalog.dishes, context, Some(weights), &config.scorer, config.rerank.pool_limit);
    let ranker = CategoryRanker {
        context,
        weights,
        preferences,
        adjuster: PreferenceAdjuster::new(config.preference.clone()),
        config,
    };

    let mut excluded = pool
        .excluded
        .into_iter()
        .map(|exclusion| (exclusion.dish_id, exclusion.reason))
        .collect::<BTreeMap<_, _>>();

    let mut groups = Vec::new();
    for (motive, templates) in group_by_motive(&catalog.templates) {
        if motive_filter.is_some_and(|filter| filter != motive) {
            continue;
        }
        let categories = templates
            .into_iter()
            .map(|template| ranker.rank(&pool.scored, template, &mut excluded))
            .collect();
        groups.push(MotiveGroup { motive, label: motive.label().to_string(), categories });
    }

    tracing::debug!(
        pool = pool.scored.len(),
        excluded = excluded.len(),
        categories = groups.iter().map(|group| group.categories.len()).sum::<usize>(),
        "ranked catalog"
    );

    Recommendation {
        ruleset_version: RULESET_VERSION.to_string(),
        weights: *weights,
        groups,
        excluded: excluded
            .into_iter()
            .map(|(dish_id, reason)| ExcludedDish { dish_id, reason })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_templates;
    use crate::fit::HardFilters;
    use crate::scorer::Dish;
    use crate::vector::{FitVector, LayerVectors};
    use proptest::prelude::*;

    fn dish(id: &str, name: &str, motive: (&str, f64), allergens: &[&str]) -> Dish {
        Dish {
            id: id.to_string(),
            name: name.to_string(),
            name_en: None,
            cuisine: None,
            tags: Vec::new(),
            ingredients: Vec::new(),
            fit_vector: LayerVectors {
                constitution: FitVector::from_pairs([("气虚", 0.5)]),
                environment: FitVector::from_pairs([("夏", 0.4)]),
                motive: FitVector::from_pairs([motive]),
            },
            oil_level: 1,
            spicy_level: 0,
            sodium_level: Some(1),
            allergens: allergens.iter().map(|item| (*item).to_string()).collect(),
            diet_rules: Vec::new(),
            thermal: None,
            substitutions: BTreeMap::new(),
        }
    }

    fn catalog() -> Catalog {
        Catalog {
            dishes: vec![
                dish("m1", "清蒸鱼", ("P", 0.9), &[]),
                dish("m2", "花生鸡丁", ("H", 0.8), &[]),
                dish("m3", "蛋炒饭", ("H", 0.6), &["鸡蛋"]),
                dish("m4", "凉拌菜", ("S", 0.7), &[]),
                dish("m5", "番茄牛腩汤", ("E", 0.9), &[]),
            ],
            templates: default_templates(),
        }
    }

    fn context() -> UserContext {
        UserContext {
            constitution_vector: FitVector::from_pairs([("气虚", 0.6)]),
            environment_vector: FitVector::from_pairs([("夏", 0.5)]),
            motive_vector: FitVector::from_pairs([("P", 0.25), ("H", 0.25), ("S", 0.25), ("E", 0.25)]),
            hard_filters: HardFilters {
                allergens_block: vec!["鸡蛋".to_string()],
                oil_max: Some(2),
                spicy_max: Some(1),
                ..HardFilters::default()
            },
        }
    }

    #[test]
    fn groups_follow_motive_order_and_display_count() {
        let result = recommend(
            &catalog(),
            &context(),
            &Weights::default(),
            &UserPreferences::default(),
            None,
            &EngineConfig::default(),
        );
        assert_eq!(result.ruleset_version, RULESET_VERSION);
        let motives = result.groups.iter().map(|group| group.motive).collect::<Vec<_>>();
        assert_eq!(motives, Motive::ALL.to_vec());
        assert_eq!(result.categories().count(), 12);
        assert!(result.categories().all(|category| category.items.len() <= 5));

        let proactive = &result.groups[0].categories[0];
        assert_eq!(proactive.code, "P-HP-Lite");
        assert_eq!(proactive.items[0].id, "m1");
        assert!(proactive.items[0].explanation.sentence.starts_with("体质命中：气虚"));
    }

    #[test]
    fn exclusions_never_reach_ranked_output() {
        let preferences = UserPreferences { allergens: vec!["花生".to_string()], ..UserPreferences::default() };
        let result = recommend(
            &catalog(),
            &context(),
            &Weights::default(),
            &preferences,
            None,
            &EngineConfig::default(),
        );
        let excluded = result.excluded.iter().map(|entry| entry.dish_id.as_str()).collect::<Vec<_>>();
        assert_eq!(excluded, vec!["m2", "m3"]);
        assert!(result
            .categories()
            .flat_map(|category| category.items.iter())
            .all(|item| item.id != "m2" && item.id != "m3"));
    }

    #[test]
    fn motive_filter_keeps_one_group() {
        let result = recommend(
            &catalog(),
            &context(),
            &Weights::default(),
            &UserPreferences::default(),
            Some(Motive::E),
            &EngineConfig::default(),
        );
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].motive, Motive::E);
        assert_eq!(result.groups[0].label, "情绪调节型");
    }

    proptest! {
        #[test]
        fn property_recommendation_is_deterministic(constitution in 0.0_f64..=1.0, drivers in 0.0_f64..=1.0) {
            let mut ctx = context();
            ctx.constitution_vector.set("气虚", constitution);
            ctx.motive_vector.set("E", drivers);
            let config = EngineConfig::default();
            let lhs = recommend(&catalog(), &ctx, &Weights::default(), &UserPreferences::default(), None, &config);
            let rhs = recommend(&catalog(), &ctx, &Weights::default(), &UserPreferences::default(), None, &config);
            prop_assert_eq!(lhs, rhs);
        }
    }
}
