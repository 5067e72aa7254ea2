use serde::{Deserialize, Serialize};
use time::{Date, Month};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Season {
    #[serde(rename = "春")]
    Spring,
    #[serde(rename = "夏")]
    Summer,
    #[serde(rename = "秋")]
    Autumn,
    #[serde(rename = "冬")]
    Winter,
}

impl Season {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spring => "春",
            Self::Summer => "夏",
            Self::Autumn => "秋",
            Self::Winter => "冬",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "春" | "spring" => Some(Self::Spring),
            "夏" | "summer" => Some(Self::Summer),
            "秋" | "autumn" => Some(Self::Autumn),
            "冬" | "winter" => Some(Self::Winter),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_month(month: Month) -> Self {
        match month {
            Month::March | Month::April | Month::May => Self::Spring,
            Month::June | Month::July | Month::August => Self::Summer,
            Month::September | Month::October | Month::November => Self::Autumn,
            Month::December | Month::January | Month::February => Self::Winter,
        }
    }

    #[must_use]
    pub fn from_date(date: Date) -> Self {
        Self::from_month(date.month())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WeatherReading {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_kmh: Option<f64>,
}

/// Climate directions in ranking tie-break order.
pub const CLIMATE_DIRECTIONS: [&str; 9] =
    ["清热", "生津", "祛湿", "润燥", "温阳", "驱寒", "健脾", "清淡解腻", "营养均衡"];

const FALLBACK_DIRECTION: &str = "营养均衡";
const MAX_CLIMATE_TAGS: usize = 3;

fn bump(scores: &mut [f64; CLIMATE_DIRECTIONS.len()], direction: &str, amount: f64) {
    if let Some(index) = CLIMATE_DIRECTIONS.iter().position(|known| *known == direction) {
        scores[index] += amount;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClimateResolution {
    pub season: Season,
    pub ranking: Vec<(String, f64)>,
    pub tags: Vec<String>,
    pub avoid: Vec<String>,
}

/// Derive climate directions, the top tags and avoid tags from season and weather.
///
/// Missing weather fields trigger no weather rule.
#[must_use]
pub fn resolve_climate(season: Season, weather: &WeatherReading) -> ClimateResolution {
    let mut scores = [0.0_f64; CLIMATE_DIRECTIONS.len()];

    match season {
        Season::Summer => {
            bump(&mut scores, "清热", 2.0);
            bump(&mut scores, "生津", 1.5);
            bump(&mut scores, "清淡解腻", 1.0);
        }
        Season::Winter => {
            bump(&mut scores, "温阳", 2.0);
            bump(&mut scores, "驱寒", 1.5);
        }
        Season::Autumn => bump(&mut scores, "润燥", 2.0),
        Season::Spring => {
            bump(&mut scores, "健脾", 1.0);
            bump(&mut scores, "清淡解腻", 0.5);
        }
    }

    if let Some(temperature) = weather.temperature_c {
        if temperature >= 30.0 {
            bump(&mut scores, "清热", 2.0);
            bump(&mut scores, "生津", 1.0);
        } else if temperature <= 10.0 {
            bump(&mut scores, "温阳", 1.5);
            bump(&mut scores, "驱寒", 1.0);
        }
    }

    if let Some(humidity) = weather.humidity_pct {
        if humidity >= 70.0 {
            bump(&mut scores, "祛湿", 2.0);
            bump(&mut scores, "健脾", 1.0);
        } else if humidity <= 35.0 {
            bump(&mut scores, "润燥", 1.5);
        }
    }

    if weather.wind_kmh.is_some_and(|wind| wind >= 30.0) {
        bump(&mut scores, "健脾", 0.8);
        bump(&mut scores, "温阳", 0.5);
    }

    if scores.iter().all(|score| *score <= 0.0) {
        bump(&mut scores, FALLBACK_DIRECTION, 1.0);
    }

    let mut ranking = CLIMATE_DIRECTIONS
        .iter()
        .zip(scores.iter())
        .map(|(direction, score)| ((*direction).to_string(), *score))
        .collect::<Vec<_>>();
    ranking.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1));

    let tags = ranking
        .iter()
        .filter(|(_, score)| *score > 0.0)
        .take(MAX_CLIMATE_TAGS)
        .map(|(direction, _)| direction.clone())
        .collect();

    let mut avoid = Vec::new();
    if weather.temperature_c.is_some_and(|temperature| temperature >= 32.0) {
        avoid.push("温补厚腻".to_string());
    }
    if weather.temperature_c.is_some_and(|temperature| temperature <= 8.0) {
        avoid.push("寒凉生冷".to_string());
    }
    if weather.humidity_pct.is_some_and(|humidity| humidity >= 75.0) {
        avoid.push("重口油腻".to_string());
    }
    if season == Season::Autumn {
        avoid.push("辛辣燥热".to_string());
    }

    ClimateResolution { season, ranking, tags, avoid }
}

/// Standardized weather deviation from the seasonal norm.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeatherAnomaly {
    pub temperature_z: f64,
    pub humidity_z: f64,
    pub wind_z: f64,
}

impl WeatherAnomaly {
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        [self.temperature_z, self.humidity_z, self.wind_z]
            .iter()
            .filter(|value| value.is_finite())
            .map(|value| value.abs())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeasonNorm {
    pub temperature_mean: f64,
    pub temperature_std: f64,
    pub humidity_mean: f64,
    pub humidity_std: f64,
    pub wind_mean: f64,
    pub wind_std: f64,
}

impl SeasonNorm {
    fn z(value: Option<f64>, mean: f64, std: f64) -> f64 {
        match value {
            Some(value) if std > 0.0 => (value - mean) / std,
            _ => 0.0,
        }
    }
}

/// Seasonal baselines used to turn a weather reading into z-scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClimateNorms {
    pub spring: SeasonNorm,
    pub summer: SeasonNorm,
    pub autumn: SeasonNorm,
    pub winter: SeasonNorm,
}

impl Default for ClimateNorms {
    fn default() -> Self {
        Self {
            spring: SeasonNorm {
                temperature_mean: 16.0,
                temperature_std: 6.0,
                humidity_mean: 60.0,
                humidity_std: 15.0,
                wind_mean: 12.0,
                wind_std: 6.0,
            },
            summer: SeasonNorm {
                temperature_mean: 28.0,
                temperature_std: 4.0,
                humidity_mean: 72.0,
                humidity_std: 12.0,
                wind_mean: 10.0,
                wind_std: 5.0,
            },
            autumn: SeasonNorm {
                temperature_mean: 17.0,
                temperature_std: 6.0,
                humidity_mean: 58.0,
                humidity_std: 15.0,
                wind_mean: 12.0,
                wind_std: 6.0,
            },
            winter: SeasonNorm {
                temperature_mean: 3.0,
                temperature_std: 6.0,
                humidity_mean: 55.0,
                humidity_std: 15.0,
                wind_mean: 15.0,
                wind_std: 7.0,
            },
        }
    }
}

impl ClimateNorms {
    #[must_use]
    pub fn for_season(&self, season: Season) -> &SeasonNorm {
        match season {
            Season::Spring => &self.spring,
            Season::Summer => &self.summer,
            Season::Autumn => &self.autumn,
            Season::Winter => &self.winter,
        }
    }

    #[must_use]
    pub fn anomaly(&self, season: Season, reading: &WeatherReading) -> WeatherAnomaly {
        let norm = self.for_season(season);
        WeatherAnomaly {
            temperature_z: SeasonNorm::z(
                reading.temperature_c,
                norm.temperature_mean,
                norm.temperature_std,
            ),
            humidity_z: SeasonNorm::z(reading.humidity_pct, norm.humidity_mean, norm.humidity_std),
            wind_z: SeasonNorm::z(reading.wind_kmh, norm.wind_mean, norm.wind_std),
        }
    }
}

/// Situational inputs for one request: where and when the user is eating.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentSignal {
    pub season: Option<Season>,
    pub region: Option<String>,
    pub climate_tags: Vec<String>,
    pub anomaly: WeatherAnomaly,
    /// Overrides the tag-density estimate when set.
    pub tag_strength: Option<f64>,
}

impl EnvironmentSignal {
    /// Build a signal from a resolved climate and the raw reading it came from.
    #[must_use]
    pub fn from_resolution(
        resolution: &ClimateResolution,
        region: Option<String>,
        reading: &WeatherReading,
        norms: &ClimateNorms,
    ) -> Self {
        Self {
            season: Some(resolution.season),
            region,
            climate_tags: resolution.tags.clone(),
            anomaly: norms.anomaly(resolution.season, reading),
            tag_strength: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn season_follows_calendar_month() {
        assert_eq!(Season::from_date(date!(2026 - 03 - 01)), Season::Spring);
        assert_eq!(Season::from_date(date!(2026 - 08 - 31)), Season::Summer);
        assert_eq!(Season::from_date(date!(2026 - 11 - 15)), Season::Autumn);
        assert_eq!(Season::from_date(date!(2026 - 02 - 28)), Season::Winter);
    }

    #[test]
    fn hot_humid_summer_prioritizes_cooling_and_dampness() {
        let resolution = resolve_climate(
            Season::Summer,
            &WeatherReading { temperature_c: Some(33.0), humidity_pct: Some(80.0), wind_kmh: None },
        );
        assert_eq!(resolution.tags, vec!["清热", "生津", "祛湿"]);
        assert_eq!(resolution.avoid, vec!["温补厚腻", "重口油腻"]);
    }

    #[test]
    fn autumn_without_weather_keeps_only_positive_directions() {
        let resolution = resolve_climate(Season::Autumn, &WeatherReading::default());
        assert_eq!(resolution.tags, vec!["润燥"]);
        assert_eq!(resolution.avoid, vec!["辛辣燥热"]);
        assert_eq!(resolution.ranking.len(), CLIMATE_DIRECTIONS.len());
    }

    #[test]
    fn cold_windy_winter_warms() {
        let resolution = resolve_climate(
            Season::Winter,
            &WeatherReading { temperature_c: Some(2.0), humidity_pct: Some(50.0), wind_kmh: Some(40.0) },
        );
        assert_eq!(resolution.tags, vec!["温阳", "驱寒", "健脾"]);
        assert_eq!(resolution.avoid, vec!["寒凉生冷"]);
    }

    #[test]
    fn anomaly_is_zero_for_missing_fields() {
        let norms = ClimateNorms::default();
        let anomaly = norms.anomaly(Season::Summer, &WeatherReading::default());
        assert!(anomaly.magnitude().abs() < f64::EPSILON);

        let hot = norms.anomaly(
            Season::Summer,
            &WeatherReading { temperature_c: Some(36.0), humidity_pct: None, wind_kmh: None },
        );
        assert!((hot.temperature_z - 2.0).abs() < 1e-12);
    }
}
