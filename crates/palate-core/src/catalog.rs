use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::motivation::Motive;
use crate::rerank::{CategoryTemplate, TemplateFilters};
use crate::scorer::Dish;
use crate::vector::{FitVector, LayerVectors};
use crate::EngineError;

const MAX_LEVEL: u8 = 3;

/// Dishes and display templates supplied by the catalog store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub dishes: Vec<Dish>,
    #[serde(default = "default_templates")]
    pub templates: Vec<CategoryTemplate>,
}

impl Catalog {
    /// # Errors
    /// Returns [`EngineError::Catalog`] when the JSON does not parse or the
    /// parsed catalog fails [`Catalog::validate`].
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let catalog: Self = serde_json::from_str(raw)
            .map_err(|err| EngineError::Catalog(format!("failed to parse catalog json: {err}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// # Errors
    /// Returns [`EngineError::Catalog`] on empty or duplicate ids and on levels outside `0..=3`.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut dish_ids = BTreeSet::new();
        for dish in &self.dishes {
            if dish.id.trim().is_empty() {
                return Err(EngineError::Catalog("dish id MUST be non-empty".to_string()));
            }
            if !dish_ids.insert(dish.id.as_str()) {
                return Err(EngineError::Catalog(format!("duplicate dish id: {}", dish.id)));
            }
            let levels = [Some(dish.oil_level), Some(dish.spicy_level), dish.sodium_level];
            if levels.into_iter().flatten().any(|level| level > MAX_LEVEL) {
                return Err(EngineError::Catalog(format!(
                    "dish {} levels MUST be within 0..={MAX_LEVEL}",
                    dish.id
                )));
            }
        }

        let mut codes = BTreeSet::new();
        for template in &self.templates {
            if template.code.trim().is_empty() {
                return Err(EngineError::Catalog("template code MUST be non-empty".to_string()));
            }
            if !codes.insert(template.code.as_str()) {
                return Err(EngineError::Catalog(format!("duplicate template code: {}", template.code)));
            }
            if template.display_count == Some(0) {
                return Err(EngineError::Catalog(format!(
                    "template {} display_count MUST be positive",
                    template.code
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn dish(&self, id: &str) -> Option<&Dish> {
        self.dishes.iter().find(|dish| dish.id == id)
    }
}

fn boost(constitution: &[(&str, f64)], environment: &[(&str, f64)], motive: &[(&str, f64)]) -> LayerVectors {
    LayerVectors {
        constitution: constitution.iter().copied().collect::<FitVector>(),
        environment: environment.iter().copied().collect::<FitVector>(),
        motive: motive.iter().copied().collect::<FitVector>(),
    }
}

fn ceilings(oil_max: Option<u8>, spicy_max: Option<u8>, sodium_max: Option<u8>) -> TemplateFilters {
    TemplateFilters { oil_max, spicy_max, sodium_max }
}

fn template(
    code: &str,
    motive: Motive,
    name: &str,
    description: &str,
    boost: LayerVectors,
    filters: TemplateFilters,
    sort_order: u32,
) -> CategoryTemplate {
    CategoryTemplate {
        code: code.to_string(),
        motive,
        name: name.to_string(),
        description: description.to_string(),
        boost,
        filters,
        display_count: None,
        sort_order,
    }
}

/// The twelve display categories, three per motive.
#[must_use]
pub fn default_templates() -> Vec<CategoryTemplate> {
    use Motive::{E, H, P, S};
    vec![
        template(
            "P-HP-Lite",
            P,
            "高蛋白·清淡",
            "增肌恢复，轻负担",
            boost(&[("气虚", 0.1)], &[("清淡解腻", 0.1)], &[("P", 0.3)]),
            ceilings(Some(1), None, None),
            1,
        ),
        template(
            "P-LowGI",
            P,
            "稳糖·低GI",
            "血糖平稳，不犯困",
            boost(&[("痰湿", 0.2)], &[], &[("P", 0.3)]),
            ceilings(Some(2), None, Some(2)),
            2,
        ),
        template(
            "P-WarmLowOil",
            P,
            "温补·少油",
            "暖胃护阳，油盐友好",
            boost(&[("阳虚", 0.3), ("气虚", 0.1)], &[("温阳", 0.1)], &[("P", 0.2)]),
            ceilings(Some(1), None, Some(2)),
            3,
        ),
        template(
            "H-OneBowl",
            H,
            "省事·一碗餐",
            "主配齐活，减少决策",
            boost(&[], &[], &[("H", 0.3)]),
            ceilings(None, None, None),
            1,
        ),
        template(
            "H-Homey",
            H,
            "常吃·家常味",
            "熟悉稳妥，稳定坚持",
            boost(&[("平和", 0.1)], &[], &[("H", 0.3)]),
            ceilings(None, None, None),
            2,
        ),
        template(
            "H-PrepLite",
            H,
            "规律·轻备餐",
            "好备好存，方便复用",
            boost(&[], &[], &[("H", 0.25), ("P", 0.05)]),
            ceilings(Some(2), None, None),
            3,
        ),
        template(
            "S-GroupFriendly",
            S,
            "聚餐·通用口味",
            "众口难调的稳妥选",
            boost(&[], &[], &[("S", 0.3)]),
            ceilings(None, Some(1), None),
            1,
        ),
        template(
            "S-LightSpicy",
            S,
            "小辣·开胃",
            "轻度刺激，少油少盐",
            boost(&[], &[], &[("S", 0.2), ("E", 0.1)]),
            ceilings(Some(1), Some(2), Some(2)),
            2,
        ),
        template(
            "S-SharePlatter",
            S,
            "共享·拼盘",
            "可分食、搭配自由",
            boost(&[], &[], &[("S", 0.3)]),
            ceilings(None, None, None),
            3,
        ),
        template(
            "E-WarmSoup",
            E,
            "温热·汤炖",
            "暖身暖胃，慢节奏",
            boost(&[("阳虚", 0.1)], &[("温阳", 0.2), ("驱寒", 0.2)], &[("E", 0.3)]),
            ceilings(Some(2), None, None),
            1,
        ),
        template(
            "E-ComfortCarb",
            E,
            "安抚·软糯主食",
            "柔软饱腹，情绪稳定",
            boost(&[("气虚", 0.1)], &[], &[("E", 0.3)]),
            ceilings(None, None, None),
            2,
        ),
        template(
            "E-Refreshing",
            E,
            "清新·开胃",
            "解腻提神，轻负担",
            boost(&[], &[("清热", 0.2), ("清淡解腻", 0.2)], &[("E", 0.2)]),
            ceilings(Some(1), None, None),
            3,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_cover_every_motive_three_times() {
        let templates = default_templates();
        assert_eq!(templates.len(), 12);
        for motive in Motive::ALL {
            assert_eq!(templates.iter().filter(|template| template.motive == motive).count(), 3);
        }
        let catalog = Catalog { dishes: Vec::new(), templates };
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn catalog_json_without_templates_uses_defaults() {
        let raw = r#"{"dishes":[{"id":"m9","name":"南瓜小米粥","ingredients":["南瓜","小米"]}]}"#;
        let catalog = match Catalog::from_json(raw) {
            Ok(catalog) => catalog,
            Err(err) => panic!("catalog should parse: {err}"),
        };
        assert_eq!(catalog.templates.len(), 12);
        assert!(catalog.dish("m9").is_some());
        assert!(catalog.dish("missing").is_none());
    }

    #[test]
    fn duplicate_ids_and_bad_levels_are_rejected() {
        let duplicate = r#"{"dishes":[{"id":"a","name":"x"},{"id":"a","name":"y"}]}"#;
        assert!(matches!(Catalog::from_json(duplicate), Err(EngineError::Catalog(message)) if message.contains("duplicate dish id")));

        let too_oily = r#"{"dishes":[{"id":"a","name":"x","oil_level":4}]}"#;
        assert!(matches!(Catalog::from_json(too_oily), Err(EngineError::Catalog(_))));

        assert!(matches!(Catalog::from_json("not json"), Err(EngineError::Catalog(_))));
    }
}
