use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// The nine constitution types. Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BodyType {
    #[serde(rename = "平和")]
    Balanced,
    #[serde(rename = "气虚")]
    QiDeficiency,
    #[serde(rename = "阳虚")]
    YangDeficiency,
    #[serde(rename = "阴虚")]
    YinDeficiency,
    #[serde(rename = "湿热")]
    DampHeat,
    #[serde(rename = "痰湿")]
    PhlegmDamp,
    #[serde(rename = "血瘀")]
    BloodStasis,
    #[serde(rename = "气郁")]
    QiStagnation,
    #[serde(rename = "特禀")]
    Allergic,
}

impl BodyType {
    pub const ALL: [Self; 9] = [
        Self::Balanced,
        Self::QiDeficiency,
        Self::YangDeficiency,
        Self::YinDeficiency,
        Self::DampHeat,
        Self::PhlegmDamp,
        Self::BloodStasis,
        Self::QiStagnation,
        Self::Allergic,
    ];

    /// Label used as the dimension name in constitution fit vectors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "平和",
            Self::QiDeficiency => "气虚",
            Self::YangDeficiency => "阳虚",
            Self::YinDeficiency => "阴虚",
            Self::DampHeat => "湿热",
            Self::PhlegmDamp => "痰湿",
            Self::BloodStasis => "血瘀",
            Self::QiStagnation => "气郁",
            Self::Allergic => "特禀",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|body_type| body_type.as_str() == value)
    }

    /// Dietary direction tags suggested for this type.
    #[must_use]
    pub fn recommended_tags(self) -> &'static [&'static str] {
        match self {
            Self::Balanced => &["营养均衡", "调理脾胃"],
            Self::QiDeficiency => &["补气", "健脾"],
            Self::YangDeficiency => &["温补", "助阳", "补气"],
            Self::YinDeficiency => &["养阴", "润燥"],
            Self::DampHeat => &["清热", "化湿"],
            Self::PhlegmDamp => &["祛湿", "健脾"],
            Self::BloodStasis => &["活血", "行气"],
            Self::QiStagnation => &["疏肝", "解郁"],
            Self::Allergic => &["增强免疫", "健脾"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstitutionQuestion {
    pub id: u32,
    pub text: String,
    #[serde(default)]
    pub reverse: bool,
    pub weights: Vec<(BodyType, f64)>,
}

impl ConstitutionQuestion {
    fn new(id: u32, text: &str, reverse: bool, weights: &[(BodyType, f64)]) -> Self {
        Self { id, text: text.to_string(), reverse, weights: weights.to_vec() }
    }
}

/// The 12-item constitution questionnaire and its weight table.
#[must_use]
pub fn default_constitution_bank() -> Vec<ConstitutionQuestion> {
    use BodyType::{
        Allergic, Balanced, BloodStasis, DampHeat, PhlegmDamp, QiDeficiency, QiStagnation,
        YangDeficiency, YinDeficiency,
    };

    vec![
        ConstitutionQuestion::new(1, "您精力充沛吗？", true, &[(Balanced, 1.0), (QiDeficiency, 0.6)]),
        ConstitutionQuestion::new(
            2,
            "您容易疲乏吗？",
            false,
            &[(QiDeficiency, 1.0), (YangDeficiency, 0.5)],
        ),
        ConstitutionQuestion::new(
            3,
            "您手脚发凉吗？",
            false,
            &[(YangDeficiency, 1.0), (QiDeficiency, 0.3)],
        ),
        ConstitutionQuestion::new(
            4,
            "您感到手脚心发热吗？",
            false,
            &[(YinDeficiency, 1.0), (DampHeat, 0.4)],
        ),
        ConstitutionQuestion::new(
            5,
            "您容易便秘或大便干燥吗？",
            false,
            &[(YinDeficiency, 0.7), (QiDeficiency, 0.3)],
        ),
        ConstitutionQuestion::new(
            6,
            "您面部或鼻部有油腻感吗？",
            false,
            &[(DampHeat, 1.0), (PhlegmDamp, 0.6)],
        ),
        ConstitutionQuestion::new(
            7,
            "您感到身体沉重不轻松吗？",
            false,
            &[(PhlegmDamp, 1.0), (QiDeficiency, 0.4)],
        ),
        ConstitutionQuestion::new(
            8,
            "您的皮肤容易出现青紫瘀斑吗？",
            false,
            &[(BloodStasis, 1.0), (QiDeficiency, 0.3)],
        ),
        ConstitutionQuestion::new(
            9,
            "您感到闷闷不乐吗？",
            false,
            &[(QiStagnation, 1.0), (BloodStasis, 0.3)],
        ),
        ConstitutionQuestion::new(
            10,
            "您容易过敏吗？",
            false,
            &[(Allergic, 1.0), (QiDeficiency, 0.2)],
        ),
        ConstitutionQuestion::new(
            11,
            "您比一般人怕冷吗？",
            false,
            &[(YangDeficiency, 0.8), (QiDeficiency, 0.5)],
        ),
        ConstitutionQuestion::new(
            12,
            "您适应环境变化的能力如何？",
            true,
            &[(Balanced, 1.0), (QiStagnation, 0.6)],
        ),
    ]
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConstitutionAnswer {
    pub id: u32,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConstitutionOptions {
    pub sub_threshold_ratio: f64,
    pub sub_top_k: usize,
}

impl Default for ConstitutionOptions {
    fn default() -> Self {
        Self { sub_threshold_ratio: 0.55, sub_top_k: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstitutionProfile {
    pub scores: BTreeMap<BodyType, f64>,
    pub main_type: BodyType,
    pub sub_types: Vec<BodyType>,
    pub tags: Vec<String>,
}

impl ConstitutionProfile {
    #[must_use]
    pub fn score(&self, body_type: BodyType) -> f64 {
        self.scores.get(&body_type).copied().unwrap_or(0.0)
    }

    /// Types ordered by score, highest first; equal scores keep type order.
    #[must_use]
    pub fn ranked(&self) -> Vec<(BodyType, f64)> {
        let mut ranked =
            BodyType::ALL.iter().map(|body_type| (*body_type, self.score(*body_type))).collect::<Vec<_>>();
        ranked.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1));
        ranked
    }

    /// Distance between the main type and the strongest other type.
    #[must_use]
    pub fn margin(&self) -> f64 {
        let main = self.score(self.main_type);
        let runner_up = BodyType::ALL
            .iter()
            .filter(|body_type| **body_type != self.main_type)
            .map(|body_type| self.score(*body_type))
            .fold(0.0_f64, f64::max);
        (main - runner_up).max(0.0)
    }
}

/// Score a constitution questionnaire submission.
///
/// # Errors
/// Returns [`EngineError::Validation`] when the submission is empty, repeats a
/// question, references an unknown question id, or carries a score outside `1..=5`.
pub fn classify_constitution(
    bank: &[ConstitutionQuestion],
    answers: &[ConstitutionAnswer],
    options: &ConstitutionOptions,
) -> Result<ConstitutionProfile, EngineError> {
    if answers.is_empty() {
        return Err(EngineError::Validation(
            "constitution submission MUST contain at least one answer".to_string(),
        ));
    }

    let mut scores = BodyType::ALL.iter().map(|body_type| (*body_type, 0.0)).collect::<BTreeMap<_, _>>();
    let mut seen = BTreeSet::new();

    for answer in answers {
        let Some(question) = bank.iter().find(|question| question.id == answer.id) else {
            return Err(EngineError::Validation(format!(
                "unknown constitution question id: {}",
                answer.id
            )));
        };
        if !(1..=5).contains(&answer.score) {
            return Err(EngineError::Validation(format!(
                "constitution question {} score MUST be within 1..=5 (received: {})",
                answer.id, answer.score
            )));
        }
        if !seen.insert(answer.id) {
            return Err(EngineError::Validation(format!(
                "constitution question {} answered more than once",
                answer.id
            )));
        }

        let value = if question.reverse { 6 - answer.score } else { answer.score };
        for (body_type, weight) in &question.weights {
            if let Some(total) = scores.get_mut(body_type) {
                *total += f64::from(value) * weight;
            }
        }
    }

    let mut ranked = BodyType::ALL
        .iter()
        .map(|body_type| (*body_type, scores.get(body_type).copied().unwrap_or(0.0)))
        .collect::<Vec<_>>();
    ranked.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1));

    let (main_type, main_score) = ranked[0];
    let threshold = main_score * options.sub_threshold_ratio;
    let sub_types = ranked
        .iter()
        .skip(1)
        .filter(|(_, score)| *score >= threshold)
        .take(options.sub_top_k)
        .map(|(body_type, _)| *body_type)
        .collect::<Vec<_>>();

    let mut tags: Vec<String> = Vec::new();
    for body_type in std::iter::once(main_type).chain(sub_types.iter().copied()) {
        for tag in body_type.recommended_tags() {
            if !tags.iter().any(|existing| existing == tag) {
                tags.push((*tag).to_string());
            }
        }
    }

    tracing::debug!(
        main_type = main_type.as_str(),
        main_score,
        sub_types = sub_types.len(),
        "classified constitution submission"
    );

    Ok(ConstitutionProfile { scores, main_type, sub_types, tags })
}

/// Highest attainable raw score per type for a question bank, used to scale
/// scores into `[0, 1]`.
#[must_use]
pub fn max_attainable_scores(bank: &[ConstitutionQuestion]) -> BTreeMap<BodyType, f64> {
    let mut maxima = BTreeMap::new();
    for question in bank {
        for (body_type, weight) in &question.weights {
            *maxima.entry(*body_type).or_insert(0.0) += 5.0 * weight;
        }
    }
    maxima
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_answers(score: i32) -> Vec<ConstitutionAnswer> {
        (1..=12).map(|id| ConstitutionAnswer { id, score }).collect()
    }

    fn classify(answers: &[ConstitutionAnswer]) -> ConstitutionProfile {
        match classify_constitution(
            &default_constitution_bank(),
            answers,
            &ConstitutionOptions::default(),
        ) {
            Ok(profile) => profile,
            Err(err) => panic!("classification should succeed: {err}"),
        }
    }

    #[test]
    fn neutral_answers_select_qi_deficiency_with_two_subtypes() {
        let profile = classify(&all_answers(3));

        assert_eq!(profile.main_type, BodyType::QiDeficiency);
        assert!((profile.score(BodyType::QiDeficiency) - 10.8).abs() < 1e-9);
        assert!((profile.score(BodyType::YangDeficiency) - 6.9).abs() < 1e-9);
        assert!((profile.score(BodyType::Balanced) - 6.0).abs() < 1e-9);
        assert_eq!(profile.sub_types, vec![BodyType::YangDeficiency, BodyType::Balanced]);
        assert_eq!(profile.tags, vec!["补气", "健脾", "温补", "助阳", "营养均衡", "调理脾胃"]);
    }

    #[test]
    fn reverse_items_invert_the_answer() {
        let mut answers = all_answers(1);
        answers[0].score = 5;
        answers[11].score = 5;
        let profile = classify(&answers);
        // items 1 and 12 become 1 after inversion, everything else is 1 as well
        assert!((profile.score(BodyType::Balanced) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_question_id_is_rejected() {
        let err = classify_constitution(
            &default_constitution_bank(),
            &[ConstitutionAnswer { id: 13, score: 3 }],
            &ConstitutionOptions::default(),
        );
        assert!(matches!(err, Err(EngineError::Validation(message)) if message.contains("13")));
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        for score in [0, 6, -1] {
            let err = classify_constitution(
                &default_constitution_bank(),
                &[ConstitutionAnswer { id: 2, score }],
                &ConstitutionOptions::default(),
            );
            assert!(matches!(err, Err(EngineError::Validation(_))), "score {score} should fail");
        }
    }

    #[test]
    fn empty_and_duplicate_submissions_are_rejected() {
        let bank = default_constitution_bank();
        let options = ConstitutionOptions::default();
        assert!(classify_constitution(&bank, &[], &options).is_err());
        let duplicate =
            [ConstitutionAnswer { id: 4, score: 2 }, ConstitutionAnswer { id: 4, score: 5 }];
        assert!(classify_constitution(&bank, &duplicate, &options).is_err());
    }

    #[test]
    fn sub_top_k_caps_secondary_types() {
        let options = ConstitutionOptions { sub_threshold_ratio: 0.0, sub_top_k: 1 };
        let profile =
            match classify_constitution(&default_constitution_bank(), &all_answers(4), &options) {
                Ok(profile) => profile,
                Err(err) => panic!("classification should succeed: {err}"),
            };
        assert_eq!(profile.sub_types.len(), 1);
    }

    #[test]
    fn margin_measures_gap_to_runner_up() {
        let profile = classify(&all_answers(3));
        assert!((profile.margin() - 3.9).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn property_main_type_has_maximum_score(scores in proptest::collection::vec(1_i32..=5, 12)) {
            let answers = scores
                .iter()
                .enumerate()
                .map(|(index, score)| ConstitutionAnswer { id: u32::try_from(index + 1).unwrap_or(1), score: *score })
                .collect::<Vec<_>>();
            let first = classify(&answers);
            let max = BodyType::ALL.iter().map(|body_type| first.score(*body_type)).fold(f64::MIN, f64::max);
            prop_assert!((first.score(first.main_type) - max).abs() < 1e-12);
            prop_assert!(first.sub_types.len() <= 2);
            prop_assert!(!first.sub_types.contains(&first.main_type));

            let second = classify(&answers);
            prop_assert_eq!(first, second);
        }
    }
}
