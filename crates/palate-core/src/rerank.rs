use serde::{Deserialize, Serialize};

use crate::motivation::Motive;
use crate::scorer::{score_dish, sort_descending, Dish, ScoreOutcome, ScoredDish, ScorerOptions, UserContext};
use crate::vector::LayerVectors;
use crate::weights::Weights;

/// Level ceilings a template applies on top of the user's hard filters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct TemplateFilters {
    pub oil_max: Option<u8>,
    pub spicy_max: Option<u8>,
    pub sodium_max: Option<u8>,
}

impl TemplateFilters {
    #[must_use]
    pub fn admits(&self, dish: &Dish) -> bool {
        let within = |level: Option<u8>, max: Option<u8>| match (level, max) {
            (Some(level), Some(max)) => level <= max,
            _ => true,
        };
        within(Some(dish.oil_level), self.oil_max)
            && within(Some(dish.spicy_level), self.spicy_max)
            && within(dish.sodium_level, self.sodium_max)
    }
}

/// A named display bucket that re-ranks the shared pool with its own boost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTemplate {
    pub code: String,
    #[serde(alias = "motivation")]
    pub motive: Motive,
    pub name: String,
    #[serde(default, alias = "one_line_desc")]
    pub description: String,
    #[serde(default)]
    pub boost: LayerVectors,
    #[serde(default)]
    pub filters: TemplateFilters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_count: Option<usize>,
    #[serde(default)]
    pub sort_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RerankOptions {
    pub pool_limit: usize,
    pub display_count: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self { pool_limit: 150, display_count: 5 }
    }
}

impl RerankOptions {
    #[must_use]
    pub fn display_count_for(&self, template: &CategoryTemplate) -> usize {
        template.display_count.unwrap_or(self.display_count)
    }
}

/// Re-score every pool entry admitted by the template against the boosted
/// context. The result is sorted but not truncated.
#[must_use]
pub fn rerank_all<'a>(
    pool: &[ScoredDish<'a>],
    template: &CategoryTemplate,
    base: &UserContext,
    weights: Option<&Weights>,
    options: &ScorerOptions,
) -> Vec<ScoredDish<'a>> {
    let boosted = base.boosted(&template.boost);
    let mut ranked = pool
        .iter()
        .filter(|entry| template.filters.admits(entry.dish))
        .filter_map(|entry| match score_dish(entry.dish, &boosted, weights, options) {
            ScoreOutcome::Scored(score) => Some(ScoredDish { dish: entry.dish, score }),
            ScoreOutcome::Excluded(_) => None,
        })
        .collect::<Vec<_>>();
    sort_descending(&mut ranked);
    ranked
}

/// [`rerank_all`] truncated to the template's display count.
#[must_use]
pub fn rerank<'a>(
    pool: &[ScoredDish<'a>],
    template: &CategoryTemplate,
    base: &UserContext,
    weights: Option<&Weights>,
    scorer: &ScorerOptions,
    options: &RerankOptions,
) -> Vec<ScoredDish<'a>> {
    let mut ranked = rerank_all(pool, template, base, weights, scorer);
    ranked.truncate(options.display_count_for(template));
    ranked
}

/// Partition templates by motive in P, H, S, E order; within a motive by
/// `sort_order`, then catalog order.
#[must_use]
pub fn group_by_motive(templates: &[CategoryTemplate]) -> Vec<(Motive, Vec<&CategoryTemplate>)> {
    Motive::ALL
        .iter()
        .map(|motive| {
            let mut members = templates.iter().filter(|template| template.motive == *motive).collect::<Vec<_>>();
            members.sort_by_key(|template| template.sort_order);
            (*motive, members)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::vector::FitVector;

    fn dish(id: &str, oil_level: u8, motive: &[(&str, f64)]) -> Dish {
        Dish {
            id: id.to_string(),
            name: id.to_string(),
            name_en: None,
            cuisine: None,
            tags: Vec::new(),
            ingredients: Vec::new(),
            fit_vector: LayerVectors { motive: motive.iter().copied().collect(), ..LayerVectors::default() },
            oil_level,
            spicy_level: 0,
            sodium_level: None,
            allergens: Vec::new(),
            diet_rules: Vec::new(),
            thermal: None,
            substitutions: BTreeMap::new(),
        }
    }

    fn template(code: &str, motive: Motive, boost: &[(&str, f64)], filters: TemplateFilters) -> CategoryTemplate {
        CategoryTemplate {
            code: code.to_string(),
            motive,
            name: code.to_string(),
            description: String::new(),
            boost: LayerVectors { motive: boost.iter().copied().collect(), ..LayerVectors::default() },
            filters,
            display_count: None,
            sort_order: 0,
        }
    }

    fn context() -> UserContext {
        UserContext {
            motive_vector: FitVector::from_pairs([("P", 0.25), ("H", 0.25), ("S", 0.25), ("E", 0.25)]),
            ..UserContext::default()
        }
    }

    #[test]
    fn boost_reorders_pool_without_touching_base() {
        let dishes = vec![dish("social", 1, &[("S", 1.0)]), dish("proactive", 1, &[("P", 1.0)])];
        let pool = dishes.iter().map(|dish| ScoredDish { dish, score: 0.0 }).collect::<Vec<_>>();
        let base = context();
        let proactive = template("P-HP-Lite", Motive::P, &[("P", 0.5)], TemplateFilters::default());

        let ranked = rerank_all(&pool, &proactive, &base, None, &ScorerOptions::default());
        assert_eq!(ranked[0].dish.id, "proactive");
        assert!((ranked[0].score - 0.25 * 0.75).abs() < 1e-12);
        assert!((base.motive_vector.get("P") - 0.25).abs() < 1e-12);
    }

    #[test]
    fn template_ceilings_filter_and_display_count_truncates() {
        let dishes = (0..8).map(|index| dish(&format!("d{index}"), index % 3, &[("H", 1.0)])).collect::<Vec<_>>();
        let pool = dishes.iter().map(|dish| ScoredDish { dish, score: 0.0 }).collect::<Vec<_>>();
        let lean = template(
            "P-WarmLowOil",
            Motive::P,
            &[],
            TemplateFilters { oil_max: Some(1), ..TemplateFilters::default() },
        );

        let all = rerank_all(&pool, &lean, &context(), None, &ScorerOptions::default());
        assert!(all.iter().all(|entry| entry.dish.oil_level <= 1));
        assert_eq!(all.len(), 6);

        let shown = rerank(&pool, &lean, &context(), None, &ScorerOptions::default(), &RerankOptions::default());
        assert_eq!(shown.len(), 5);
        let ids = shown.iter().map(|entry| entry.dish.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["d0", "d1", "d3", "d4", "d6"]);
    }

    #[test]
    fn missing_boost_keys_degrade_to_no_op() {
        let dishes = vec![dish("a", 0, &[("E", 1.0)])];
        let pool = dishes.iter().map(|dish| ScoredDish { dish, score: 0.0 }).collect::<Vec<_>>();
        let unrelated = template("X", Motive::E, &[("unknown", 2.0)], TemplateFilters::default());
        let ranked = rerank_all(&pool, &unrelated, &context(), None, &ScorerOptions::default());
        assert!((ranked[0].score - 0.25 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn grouping_is_a_partition_in_motive_order() {
        let mut late = template("P-2", Motive::P, &[], TemplateFilters::default());
        late.sort_order = 2;
        let templates = vec![
            template("E-1", Motive::E, &[], TemplateFilters::default()),
            late,
            template("P-1", Motive::P, &[], TemplateFilters::default()),
        ];
        let groups = group_by_motive(&templates);
        assert_eq!(groups.iter().map(|(motive, _)| *motive).collect::<Vec<_>>(), Motive::ALL.to_vec());
        let codes = groups[0].1.iter().map(|template| template.code.as_str()).collect::<Vec<_>>();
        assert_eq!(codes, vec!["P-1", "P-2"]);
        assert!(groups[1].1.is_empty());
        assert_eq!(groups.iter().map(|(_, members)| members.len()).sum::<usize>(), templates.len());
    }

    #[test]
    fn template_parses_legacy_field_names() {
        let json = r#"{"code":"E-WarmSoup","motivation":"E","name":"温热·汤炖","one_line_desc":"暖身暖胃，慢节奏"}"#;
        let parsed: CategoryTemplate = match serde_json::from_str(json) {
            Ok(parsed) => parsed,
            Err(err) => panic!("template json should parse: {err}"),
        };
        assert_eq!(parsed.motive, Motive::E);
        assert_eq!(parsed.description, "暖身暖胃，慢节奏");
        assert!(parsed.boost.is_empty());
    }
}
