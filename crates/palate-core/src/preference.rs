use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scorer::{Dish, ExcludedDish, ExclusionReason, ScoredDish};

/// Canonical term to surface forms, matched as case-insensitive substrings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SynonymDictionary {
    entries: BTreeMap<String, Vec<String>>,
}

impl SynonymDictionary {
    #[must_use]
    pub fn new(entries: BTreeMap<String, Vec<String>>) -> Self {
        Self { entries }
    }

    fn from_static(entries: &[(&str, &[&str])]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(canonical, forms)| {
                    ((*canonical).to_string(), forms.iter().map(|form| (*form).to_string()).collect())
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn canonical_terms(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Canonical term for `term`, looking through surface forms when it is not a key.
    #[must_use]
    pub fn canonical(&self, term: &str) -> Option<&str> {
        let needle = term.trim().to_lowercase();
        self.entries
            .keys()
            .find(|canonical| canonical.to_lowercase() == needle)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(_, forms)| forms.iter().any(|form| form.to_lowercase() == needle))
                    .map(|(canonical, _)| canonical)
            })
            .map(String::as_str)
    }

    /// Lowercased surface forms for `term`, the term itself first. Unknown
    /// terms expand to themselves.
    #[must_use]
    pub fn expand(&self, term: &str) -> Vec<String> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }
        let mut forms = vec![term.clone()];
        if let Some(canonical) = self.canonical(&term) {
            let canonical_forms = self.entries.get(canonical).map(Vec::as_slice).unwrap_or_default();
            for form in std::iter::once(canonical).chain(canonical_forms.iter().map(String::as_str)) {
                let form = form.trim().to_lowercase();
                if !form.is_empty() && !forms.contains(&form) {
                    forms.push(form);
                }
            }
        }
        forms
    }

    #[must_use]
    pub fn default_allergens() -> Self {
        Self::from_static(&[
            ("花生", &["花生", "花生酱", "花生油", "peanut"]),
            ("坚果", &["坚果", "核桃", "杏仁", "腰果", "榛子", "开心果", "nut"]),
            ("芝麻", &["芝麻", "芝麻酱", "麻酱", "sesame"]),
            ("牛奶", &["牛奶", "奶油", "黄油", "奶酪", "milk"]),
            ("乳制品", &["乳", "奶", "芝士", "酸奶", "dairy"]),
            ("鸡蛋", &["鸡蛋", "蛋", "egg"]),
            ("大豆", &["大豆", "黄豆", "豆腐", "豆浆", "soy"]),
            ("海鲜", &["海鲜", "鱼", "虾", "蟹", "贝", "seafood"]),
            ("甲壳类", &["虾", "蟹", "龙虾", "shrimp", "crab"]),
            ("贝类", &["贝", "蛤", "蚝", "扇贝", "青口", "蛏"]),
            ("小麦", &["小麦", "面粉", "面条", "馒头", "wheat"]),
            ("麸质", &["麸质", "面筋", "小麦", "大麦", "gluten"]),
            ("芹菜", &["芹菜", "celery"]),
        ])
    }

    #[must_use]
    pub fn default_dislikes() -> Self {
        Self::from_static(&[
            ("香菜", &["香菜", "芫荽", "cilantro"]),
            ("葱", &["葱", "葱花", "大葱"]),
            ("姜", &["姜", "生姜"]),
            ("蒜", &["蒜", "蒜蓉", "大蒜"]),
            ("辣", &["辣", "辣椒", "麻辣", "香辣"]),
            ("油腻", &["油炸", "炸", "肥", "红烧"]),
            ("内脏", &["肝", "肚", "肠", "腰花"]),
        ])
    }

    #[must_use]
    pub fn default_craves() -> Self {
        Self::from_static(&[
            ("清淡", &["清淡", "清蒸", "清炒", "蒸"]),
            ("汤", &["汤", "羹", "炖"]),
            ("辣", &["辣", "辣椒", "香辣"]),
            ("甜", &["甜", "南瓜", "红薯"]),
            ("高蛋白", &["高蛋白", "鸡胸", "牛肉", "鱼", "虾", "蛋"]),
            ("米饭", &["米饭", "盖饭", "饭"]),
            ("面食", &["面", "饺子", "包子"]),
        ])
    }
}

/// Per-device declarations supplied with each request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserPreferences {
    pub allergens: Vec<String>,
    pub dislikes: Vec<String>,
    pub craves: Vec<String>,
    pub diet_rules: Vec<String>,
    pub oil_max: Option<u8>,
    pub spicy_max: Option<u8>,
    pub sodium_max: Option<u8>,
}

impl UserPreferences {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreferenceOptions {
    pub dislike_per_hit: f64,
    pub crave_per_hit: f64,
    pub dislike_cap: f64,
    pub crave_cap: f64,
    pub allergen_synonyms: SynonymDictionary,
    pub dislike_synonyms: SynonymDictionary,
    pub crave_synonyms: SynonymDictionary,
}

impl Default for PreferenceOptions {
    fn default() -> Self {
        Self {
            dislike_per_hit: 0.10,
            crave_per_hit: 0.08,
            dislike_cap: 0.20,
            crave_cap: 0.25,
            allergen_synonyms: SynonymDictionary::default_allergens(),
            dislike_synonyms: SynonymDictionary::default_dislikes(),
            crave_synonyms: SynonymDictionary::default_craves(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceOutcome<'a> {
    pub kept: Vec<ScoredDish<'a>>,
    pub excluded: Vec<ExcludedDish>,
}

fn haystack(dish: &Dish) -> String {
    std::iter::once(dish.name.as_str())
        .chain(dish.tags.iter().map(String::as_str))
        .chain(dish.ingredients.iter().map(String::as_str))
        .chain(dish.allergens.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join("|")
        .to_lowercase()
}

/// Allergen exclusion plus dislike/crave score adjustment, applied after reranking.
#[derive(Debug, Clone, Default)]
pub struct PreferenceAdjuster {
    options: PreferenceOptions,
}

impl PreferenceAdjuster {
    #[must_use]
    pub fn new(options: PreferenceOptions) -> Self {
        Self { options }
    }

    /// The first declared allergen whose synonyms occur in the dish text.
    #[must_use]
    pub fn allergen_match(&self, dish: &Dish, preferences: &UserPreferences) -> Option<ExclusionReason> {
        let text = haystack(dish);
        preferences.allergens.iter().find_map(|allergen| {
            self.options
                .allergen_synonyms
                .expand(allergen)
                .into_iter()
                .find(|form| text.contains(form.as_str()))
                .map(|matched| ExclusionReason::AllergenSynonym { allergen: allergen.clone(), matched })
        })
    }

    /// Number of declared terms with at least one synonym in `text`.
    fn hits(dictionary: &SynonymDictionary, terms: &[String], text: &str) -> usize {
        terms
            .iter()
            .filter(|term| dictionary.expand(term).iter().any(|form| text.contains(form.as_str())))
            .count()
    }

    #[must_use]
    pub fn adjusted_score(&self, dish: &Dish, base: f64, preferences: &UserPreferences) -> f64 {
        let options = &self.options;
        let text = haystack(dish);
        let dislikes = Self::hits(&options.dislike_synonyms, &preferences.dislikes, &text);
        let craves = Self::hits(&options.crave_synonyms, &preferences.craves, &text);
        if dislikes == 0 && craves == 0 {
            return base;
        }

        let penalty = (options.dislike_per_hit * dislikes as f64).min(options.dislike_cap);
        let boost = (options.crave_per_hit * craves as f64).min(options.crave_cap);
        let factor = (1.0 - penalty) * (1.0 + boost);
        // Scale by magnitude so a penalty still lowers a negative score.
        base + base.abs() * (factor - 1.0)
    }

    /// Drop allergen matches and rescore the rest. Input order is preserved.
    #[must_use]
    pub fn adjust<'a>(
        &self,
        candidates: Vec<ScoredDish<'a>>,
        preferences: &UserPreferences,
    ) -> PreferenceOutcome<'a> {
        let mut kept = Vec::with_capacity(candidates.len());
        let mut excluded = Vec::new();
        for candidate in candidates {
            if let Some(reason) = self.allergen_match(candidate.dish, preferences) {
                tracing::debug!(dish_id = candidate.dish.id.as_str(), %reason, "dish excluded by preference");
                excluded.push(ExcludedDish { dish_id: candidate.dish.id.clone(), reason });
                continue;
            }
            let score = self.adjusted_score(candidate.dish, candidate.score, preferences);
            kept.push(ScoredDish { dish: candidate.dish, score });
        }
        PreferenceOutcome { kept, excluded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::LayerVectors;

    fn dish(id: &str, name: &str, ingredients: &[&str]) -> Dish {
        Dish {
            id: id.to_string(),
            name: name.to_string(),
            name_en: None,
            cuisine: None,
            tags: Vec::new(),
            ingredients: ingredients.iter().map(|item| (*item).to_string()).collect(),
            fit_vector: LayerVectors::default(),
            oil_level: 0,
            spicy_level: 0,
            sodium_level: None,
            allergens: Vec::new(),
            diet_rules: Vec::new(),
            thermal: None,
            substitutions: BTreeMap::new(),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[test]
    fn expand_reaches_synonyms_from_either_side() {
        let dictionary = SynonymDictionary::default_allergens();
        let forms = dictionary.expand("花生");
        assert_eq!(forms[0], "花生");
        assert!(forms.contains(&"peanut".to_string()));

        let from_surface = dictionary.expand("Peanut");
        assert!(from_surface.contains(&"花生酱".to_string()));

        assert_eq!(dictionary.expand("榴莲"), vec!["榴莲".to_string()]);
        assert!(dictionary.expand("  ").is_empty());
    }

    #[test]
    fn allergen_synonyms_exclude_by_substring() {
        let adjuster = PreferenceAdjuster::default();
        let noodles = dish("d1", "麻酱凉面", &["面条", "黄瓜"]);
        let soup = dish("d2", "南瓜小米粥", &["南瓜", "小米"]);
        let preferences = UserPreferences { allergens: strings(&["芝麻"]), ..UserPreferences::default() };

        let outcome = adjuster.adjust(
            vec![ScoredDish { dish: &noodles, score: 0.9 }, ScoredDish { dish: &soup, score: 0.5 }],
            &preferences,
        );
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].dish.id, "d2");
        assert_eq!(
            outcome.excluded[0].reason,
            ExclusionReason::AllergenSynonym { allergen: "芝麻".to_string(), matched: "麻酱".to_string() }
        );
    }

    #[test]
    fn dislikes_and_craves_are_capped() {
        let adjuster = PreferenceAdjuster::default();
        let chicken = dish("d1", "小辣口水鸡", &["鸡腿", "辣椒", "蒜", "香菜"]);

        let disliked = UserPreferences { dislikes: strings(&["辣", "蒜", "香菜"]), ..UserPreferences::default() };
        assert!((adjuster.adjusted_score(&chicken, 1.0, &disliked) - 0.8).abs() < 1e-12);

        let craved = UserPreferences { craves: strings(&["辣"]), ..UserPreferences::default() };
        assert!((adjuster.adjusted_score(&chicken, 1.0, &craved) - 1.08).abs() < 1e-12);

        let both = UserPreferences {
            dislikes: strings(&["蒜"]),
            craves: strings(&["辣"]),
            ..UserPreferences::default()
        };
        assert!((adjuster.adjusted_score(&chicken, 0.5, &both) - 0.5 * 0.9 * 1.08).abs() < 1e-12);
    }

    #[test]
    fn penalties_lower_negative_scores_too() {
        let adjuster = PreferenceAdjuster::default();
        let fish = dish("d1", "清蒸鱼", &["鲈鱼", "姜"]);
        let preferences = UserPreferences { dislikes: strings(&["姜"]), ..UserPreferences::default() };
        let adjusted = adjuster.adjusted_score(&fish, -0.2, &preferences);
        assert!(adjusted < -0.2);
    }

    #[test]
    fn no_preferences_leave_scores_untouched() {
        let adjuster = PreferenceAdjuster::default();
        let fish = dish("d1", "清蒸鱼", &["鲈鱼"]);
        assert!(UserPreferences::default().is_empty());
        assert!((adjuster.adjusted_score(&fish, 0.42, &UserPreferences::default()) - 0.42).abs() < f64::EPSILON);
    }
}
