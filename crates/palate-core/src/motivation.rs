use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Eating drivers: proactive, habitual, social, emotional. Declaration order is
/// the tie-break order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Motive {
    P,
    H,
    S,
    E,
}

impl Motive {
    pub const ALL: [Self; 4] = [Self::P, Self::H, Self::S, Self::E];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P => "P",
            Self::H => "H",
            Self::S => "S",
            Self::E => "E",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "P" | "p" => Some(Self::P),
            "H" | "h" => Some(Self::H),
            "S" | "s" => Some(Self::S),
            "E" | "e" => Some(Self::E),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::P => "主动自我管理型",
            Self::H => "习惯驱动型",
            Self::S => "社交导向型",
            Self::E => "情绪调节型",
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::P => "你重视饮食与健康目标之间的连接，善于主动规划饮食结构，并愿意为此查阅资料、坚持执行。",
            Self::H => "你偏好稳定的饮食节奏，熟悉和安全感是你选择食物的重要因素，倾向于自动化决策。",
            Self::S => "你把饮食当作一种社交行为，和谁一起吃、是否能分享是你做出选择的重要依据。",
            Self::E => "你的饮食常与情绪状态相连，食物对你来说不只是营养，也是一种心理支持。",
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::P => "营养结构与计划匹配",
            Self::H => "熟悉与稳定性",
            Self::S => "社交适配性",
            Self::E => "舒适感与情绪调节",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Baseline,
    Context,
    Check,
    Consistency,
}

impl ItemKind {
    #[must_use]
    pub fn default_weight(self) -> f64 {
        match self {
            Self::Context => 0.5,
            Self::Baseline | Self::Check | Self::Consistency => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotivationQuestion {
    pub id: String,
    pub text: String,
    pub motive: Option<Motive>,
    pub kind: ItemKind,
    #[serde(default)]
    pub reverse: bool,
    pub weight: f64,
}

impl MotivationQuestion {
    fn new(id: &str, text: &str, motive: Option<Motive>, kind: ItemKind, reverse: bool) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            motive,
            kind,
            reverse,
            weight: kind.default_weight(),
        }
    }
}

/// The 21-item Likert motivation questionnaire.
#[must_use]
pub fn default_motivation_bank() -> Vec<MotivationQuestion> {
    use ItemKind::{Baseline, Check, Consistency, Context};
    use Motive::{E, H, P, S};

    vec![
        MotivationQuestion::new("Q1", "我会据健康目标规划饮食，比如控糖/控脂/增肌。", Some(P), Baseline, false),
        MotivationQuestion::new("Q2", "没有特殊目标时，我更愿意维持原有饮食节奏。", Some(H), Baseline, false),
        MotivationQuestion::new("Q3", "如果一顿饭能促进与朋友的互动，我更愿意选择它。", Some(S), Baseline, false),
        MotivationQuestion::new("Q4", "当状态不佳时，我更倾向选择能让我“被安慰”的食物。", Some(E), Baseline, false),
        MotivationQuestion::new("Q5", "我会查阅营养信息并据此调整饮食结构。", Some(P), Baseline, false),
        MotivationQuestion::new("Q6", "我通常不太愿意为饮食做功课，熟悉即可。", Some(H), Baseline, true),
        MotivationQuestion::new("Q7", "看到他人（KOL/朋友）推荐后，我更愿意尝试。", Some(S), Baseline, false),
        MotivationQuestion::new("Q8", "我不喜欢冷冰冰的数据，更希望系统“懂我的感觉”。", Some(E), Baseline, false),
        MotivationQuestion::new("Q9", "与人结伴（打卡、挑战）会明显提升我执行饮食计划的概率。", Some(S), Baseline, false),
        MotivationQuestion::new("Q10", "即使朋友建议不同，只要不符合我目标，我也会坚持自己的选择。", Some(P), Consistency, true),
        MotivationQuestion::new("Q11", "只要是习惯中的几家店，我基本不愿换。", Some(H), Baseline, false),
        MotivationQuestion::new("Q12", "近期情绪波动时，我更容易放弃原定饮食安排。", Some(E), Baseline, false),
        MotivationQuestion::new("Q13", "我希望系统提供每周一次有用的目标追踪与结构建议。", Some(P), Baseline, false),
        MotivationQuestion::new("Q14", "若推荐与我习惯差异大，我会直接忽略。", Some(H), Baseline, false),
        MotivationQuestion::new("Q15", "若朋友参与同一活动/榜单，我会更频繁地查看与互动。", Some(S), Baseline, false),
        MotivationQuestion::new("Q16", "如果推荐文案击中了我的情绪/当下心境，我更愿意点击。", Some(E), Baseline, false),
        MotivationQuestion::new("Q17", "换城市/季节变化时，我会主动重建饮食结构。", Some(P), Context, false),
        MotivationQuestion::new("Q18", "我会在阴天/加班后倾向于选择“安慰型”的食物。", Some(E), Context, false),
        MotivationQuestion::new("Q19", "注意力：请选择“同意”（中间档）以确认你在认真作答。", None, Check, false),
        MotivationQuestion::new("Q20", "我经常“跟随朋友吃什么就吃什么”。", Some(S), Consistency, false),
        MotivationQuestion::new("Q21", "我更倾向按自己计划吃饭而非受别人影响。", Some(P), Consistency, true),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LikertAnswer {
    pub id: String,
    pub value: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotivationOptions {
    pub attention_value: i32,
    pub consistency_threshold: f64,
    pub high_stability_gap: f64,
    pub consistency_pairs: Vec<(String, String)>,
}

impl Default for MotivationOptions {
    fn default() -> Self {
        Self {
            attention_value: 3,
            consistency_threshold: 2.0,
            high_stability_gap: 0.15,
            consistency_pairs: vec![
                ("Q10".to_string(), "Q21".to_string()),
                ("Q20".to_string(), "Q21".to_string()),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Low,
    Mid,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotivationProfile {
    pub raw_scores: BTreeMap<Motive, f64>,
    pub norm_scores: BTreeMap<Motive, f64>,
    pub main: Motive,
    pub secondary: Motive,
    pub attention_passed: bool,
    pub consistency_ok: bool,
    pub stability: Stability,
}

impl MotivationProfile {
    #[must_use]
    pub fn norm(&self, motive: Motive) -> f64 {
        self.norm_scores.get(&motive).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn has_signal(&self) -> bool {
        self.norm_scores.values().any(|value| *value > 0.0)
    }

    /// One-paragraph description of the dominant drivers.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "你在饮食决策中最显著的动因是【{}】。平台将在推荐中优先考虑你在该维度的偏好：例如你可能更重视{}。同时，我们也注意到你在{}方面也有倾向，将在推荐中适度融合。",
            self.main.label(),
            self.main.focus(),
            self.secondary.label()
        )
    }
}

fn ranked_motives(values: &BTreeMap<Motive, f64>) -> Vec<(Motive, f64)> {
    let mut ranked = Motive::ALL
        .iter()
        .map(|motive| (*motive, values.get(motive).copied().unwrap_or(0.0)))
        .collect::<Vec<_>>();
    ranked.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1));
    ranked
}

/// Score a Likert motivation submission.
///
/// Parsing is tolerant: values outside `1..=5` are clamped and answers to
/// unknown item ids are ignored. When an item is answered more than once the
/// last answer wins.
#[must_use]
pub fn classify_motivation(
    bank: &[MotivationQuestion],
    answers: &[LikertAnswer],
    options: &MotivationOptions,
) -> MotivationProfile {
    let mut values: BTreeMap<&str, i32> = BTreeMap::new();
    for answer in answers {
        if bank.iter().any(|question| question.id == answer.id) {
            values.insert(answer.id.as_str(), answer.value);
        } else {
            tracing::debug!(item = %answer.id, "ignoring answer for unknown motivation item");
        }
    }

    let normalized = |question: &MotivationQuestion| -> Option<i32> {
        values.get(question.id.as_str()).map(|raw| {
            let value = (*raw).clamp(1, 5);
            if question.reverse {
                6 - value
            } else {
                value
            }
        })
    };

    let mut raw_scores = Motive::ALL.iter().map(|motive| (*motive, 0.0)).collect::<BTreeMap<_, _>>();
    let mut attention_passed = true;

    for question in bank {
        if question.kind == ItemKind::Check {
            if let Some(raw) = values.get(question.id.as_str()) {
                if *raw != options.attention_value {
                    tracing::debug!(item = %question.id, value = raw, "attention check failed");
                    attention_passed = false;
                }
            }
            continue;
        }

        let (Some(motive), Some(value)) = (question.motive, normalized(question)) else {
            continue;
        };
        if let Some(total) = raw_scores.get_mut(&motive) {
            *total += f64::from(value) * question.weight;
        }
    }

    let mut consistency_ok = true;
    for (left, right) in &options.consistency_pairs {
        let left = bank.iter().find(|question| &question.id == left).and_then(normalized);
        let right = bank.iter().find(|question| &question.id == right).and_then(normalized);
        if let (Some(left), Some(right)) = (left, right) {
            if f64::from((left - right).abs()) > options.consistency_threshold {
                consistency_ok = false;
            }
        }
    }
    if !consistency_ok {
        tracing::debug!("motivation consistency pair disagreement");
    }

    let total: f64 = raw_scores.values().sum();
    let norm_scores = raw_scores
        .iter()
        .map(|(motive, raw)| (*motive, if total > 0.0 { raw / total } else { 0.0 }))
        .collect::<BTreeMap<_, _>>();

    let ranked = ranked_motives(&norm_scores);
    let (main, top) = ranked[0];
    let (secondary, runner_up) = ranked[1];

    let stability = if !attention_passed {
        Stability::Low
    } else if top - runner_up >= options.high_stability_gap {
        Stability::High
    } else {
        Stability::Mid
    };

    MotivationProfile {
        raw_scores,
        norm_scores,
        main,
        secondary,
        attention_passed,
        consistency_ok,
        stability,
    }
}

/// Letters of the forced-choice form; each picks one motive directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum ChoiceLetter {
    A,
    B,
    C,
    D,
}

impl ChoiceLetter {
    #[must_use]
    pub fn motive(self) -> Motive {
        match self {
            Self::A => Motive::P,
            Self::B => Motive::H,
            Self::C => Motive::S,
            Self::D => Motive::E,
        }
    }
}

pub const FORCED_CHOICE_ITEMS: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForcedChoiceProfile {
    pub counts: BTreeMap<Motive, u32>,
    pub ratio: BTreeMap<Motive, f64>,
    pub main: Motive,
    pub secondary: Vec<Motive>,
}

/// Score the forced-choice variant of the motivation questionnaire.
///
/// # Errors
/// Returns [`EngineError::Validation`] unless exactly 12 answers are provided.
pub fn classify_forced_choice(answers: &[ChoiceLetter]) -> Result<ForcedChoiceProfile, EngineError> {
    if answers.len() != FORCED_CHOICE_ITEMS {
        return Err(EngineError::Validation(format!(
            "forced-choice submission MUST contain exactly {FORCED_CHOICE_ITEMS} answers (received: {})",
            answers.len()
        )));
    }

    let mut counts = Motive::ALL.iter().map(|motive| (*motive, 0_u32)).collect::<BTreeMap<_, _>>();
    for answer in answers {
        if let Some(count) = counts.get_mut(&answer.motive()) {
            *count += 1;
        }
    }

    let ratio = counts
        .iter()
        .map(|(motive, count)| (*motive, f64::from(*count) / 12.0))
        .collect::<BTreeMap<_, _>>();

    let mut ranked = Motive::ALL
        .iter()
        .map(|motive| (*motive, counts.get(motive).copied().unwrap_or(0)))
        .collect::<Vec<_>>();
    ranked.sort_by(|lhs, rhs| rhs.1.cmp(&lhs.1));

    let main = ranked[0].0;
    let second_count = ranked[1].1;
    let secondary = ranked
        .iter()
        .skip(1)
        .filter(|(_, count)| *count == second_count)
        .map(|(motive, _)| *motive)
        .collect();

    Ok(ForcedChoiceProfile { counts, ratio, main, secondary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn answer(id: &str, value: i32) -> LikertAnswer {
        LikertAnswer { id: id.to_string(), value }
    }

    fn classify(answers: &[LikertAnswer]) -> MotivationProfile {
        classify_motivation(&default_motivation_bank(), answers, &MotivationOptions::default())
    }

    fn full_response(value: i32) -> Vec<LikertAnswer> {
        default_motivation_bank()
            .iter()
            .map(|question| {
                let value = if question.kind == ItemKind::Check { 3 } else { value };
                answer(&question.id, value)
            })
            .collect()
    }

    #[test]
    fn proactive_heavy_response_selects_p() {
        let mut answers = full_response(2);
        for id in ["Q1", "Q5", "Q13", "Q17"] {
            answers.push(answer(id, 5));
        }
        let profile = classify(&answers);
        assert_eq!(profile.main, Motive::P);
        assert!(profile.attention_passed);
        let total: f64 = profile.norm_scores.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn failed_attention_check_forces_low_stability() {
        let mut answers = full_response(3);
        answers.push(answer("Q19", 5));
        let profile = classify(&answers);
        assert!(!profile.attention_passed);
        assert_eq!(profile.stability, Stability::Low);
    }

    #[test]
    fn check_item_does_not_contribute_to_scores() {
        let with_check = classify(&[answer("Q1", 4), answer("Q19", 3)]);
        let without_check = classify(&[answer("Q1", 4)]);
        assert_eq!(with_check.raw_scores, without_check.raw_scores);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let clamped = classify(&[answer("Q1", 9), answer("Q2", -4)]);
        let explicit = classify(&[answer("Q1", 5), answer("Q2", 1)]);
        assert_eq!(clamped.raw_scores, explicit.raw_scores);
    }

    #[test]
    fn reverse_and_context_weights_apply() {
        let profile = classify(&[answer("Q6", 1), answer("Q17", 4)]);
        assert!((profile.raw_scores[&Motive::H] - 5.0).abs() < 1e-12);
        assert!((profile.raw_scores[&Motive::P] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn disagreeing_consistency_pair_is_flagged() {
        // Q10 reversed from 1 gives 5, Q21 reversed from 5 gives 1
        let profile = classify(&[answer("Q10", 1), answer("Q21", 5)]);
        assert!(!profile.consistency_ok);

        let agreeing = classify(&[answer("Q10", 2), answer("Q21", 3)]);
        assert!(agreeing.consistency_ok);
    }

    #[test]
    fn no_signal_yields_all_zero_norm_scores() {
        let profile = classify(&[answer("Q19", 3), answer("Q99", 4)]);
        assert!(!profile.has_signal());
        assert!(profile.norm_scores.values().all(|value| value.abs() < f64::EPSILON));
        assert_eq!(profile.main, Motive::P);
        assert_eq!(profile.secondary, Motive::H);
        assert_eq!(profile.stability, Stability::Mid);
    }

    #[test]
    fn clear_leader_is_high_stability() {
        let profile = classify(&[answer("Q1", 5), answer("Q5", 5), answer("Q2", 1)]);
        assert_eq!(profile.main, Motive::P);
        assert_eq!(profile.secondary, Motive::H);
        assert_eq!(profile.stability, Stability::High);
        assert!(profile.summary().contains("主动自我管理型"));
    }

    #[test]
    fn forced_choice_reports_tied_secondaries() {
        use ChoiceLetter::{A, B, C, D};
        let answers = [A, A, A, A, A, B, B, C, C, D, D, A];
        let profile = match classify_forced_choice(&answers) {
            Ok(profile) => profile,
            Err(err) => panic!("forced choice should succeed: {err}"),
        };
        assert_eq!(profile.main, Motive::P);
        assert_eq!(profile.secondary, vec![Motive::H, Motive::S, Motive::E]);
        assert!((profile.ratio[&Motive::P] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn forced_choice_requires_twelve_answers() {
        let err = classify_forced_choice(&[ChoiceLetter::A; 11]);
        assert!(matches!(err, Err(EngineError::Validation(_))));
    }

    proptest! {
        #[test]
        fn property_norm_scores_sum_to_one(values in proptest::collection::vec(-2_i32..9, 21)) {
            let bank = default_motivation_bank();
            let answers = bank
                .iter()
                .zip(values.iter())
                .map(|(question, value)| answer(&question.id, *value))
                .collect::<Vec<_>>();
            let profile = classify(&answers);
            let total: f64 = profile.norm_scores.values().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert_eq!(profile.clone(), classify(&answers));
        }
    }
}
