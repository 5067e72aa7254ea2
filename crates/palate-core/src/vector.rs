use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sparse mapping from a named dimension to a non-negative weight.
///
/// Entries keep insertion order so that explanation tie-breaks and serialized
/// output are reproducible. A key absent from the vector weighs `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitVector {
    entries: Vec<(String, f64)>,
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

impl FitVector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vector from pairs; repeated keys merge by max.
    #[must_use]
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut vector = Self::new();
        for (key, weight) in pairs {
            vector.insert_max(key, weight);
        }
        vector
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> f64 {
        self.position(key).map_or(0.0, |index| self.entries[index].1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(key, weight)| (key.as_str(), *weight))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Overwrite the weight for `key`, appending it when new.
    pub fn set(&mut self, key: impl Into<String>, weight: f64) {
        let key = key.into();
        let weight = sanitize(weight);
        match self.position(&key) {
            Some(index) => self.entries[index].1 = weight,
            None => self.entries.push((key, weight)),
        }
    }

    /// Keep the larger of the existing and incoming weight for `key`.
    pub fn insert_max(&mut self, key: impl Into<String>, weight: f64) {
        let key = key.into();
        let weight = sanitize(weight);
        match self.position(&key) {
            Some(index) => {
                if weight > self.entries[index].1 {
                    self.entries[index].1 = weight;
                }
            }
            None => self.entries.push((key, weight)),
        }
    }

    /// Sum of elementwise products; keys present on one side only contribute nothing.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.entries.iter().map(|(key, weight)| weight * other.get(key)).sum()
    }

    /// Elementwise sum over the union of keys. `self` order first, then new keys of `other`.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (key, weight) in &other.entries {
            match out.position(key) {
                Some(index) => out.entries[index].1 += weight,
                None => out.entries.push((key.clone(), *weight)),
            }
        }
        out
    }

    /// Elementwise max over the union of keys.
    #[must_use]
    pub fn merge_max(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (key, weight) in &other.entries {
            out.insert_max(key.clone(), *weight);
        }
        out
    }

    /// The highest weighted entry, first in insertion order on ties.
    #[must_use]
    pub fn top(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (key, weight) in &self.entries {
            match best {
                Some((_, current)) if *weight <= current => {}
                _ => best = Some((key.as_str(), *weight)),
            }
        }
        best
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(existing, _)| existing == key)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FitVector {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

impl Serialize for FitVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, weight) in &self.entries {
            map.serialize_entry(key, weight)?;
        }
        map.end()
    }
}

struct FitVectorVisitor;

impl<'de> Visitor<'de> for FitVectorVisitor {
    type Value = FitVector;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map of dimension names to non-negative weights")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut vector = FitVector::new();
        while let Some((key, weight)) = access.next_entry::<String, f64>()? {
            vector.insert_max(key, weight);
        }
        Ok(vector)
    }
}

impl<'de> Deserialize<'de> for FitVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(FitVectorVisitor)
    }
}

/// The three per-layer vectors carried by dishes, users and template boosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerVectors {
    #[serde(default)]
    pub constitution: FitVector,
    #[serde(default)]
    pub environment: FitVector,
    #[serde(default)]
    pub motive: FitVector,
}

impl LayerVectors {
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            constitution: self.constitution.add(&other.constitution),
            environment: self.environment.add(&other.environment),
            motive: self.motive.add(&other.motive),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constitution.is_empty() && self.environment.is_empty() && self.motive.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_and_nan_weights_clamp_to_zero() {
        let vector = FitVector::from_pairs([("a", -1.0), ("b", f64::NAN), ("c", 0.4)]);
        assert!(vector.get("a").abs() < f64::EPSILON);
        assert!(vector.get("b").abs() < f64::EPSILON);
        assert!((vector.get("c") - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn dot_ignores_keys_missing_on_either_side() {
        let left = FitVector::from_pairs([("清热", 0.5), ("祛湿", 1.0)]);
        let right = FitVector::from_pairs([("祛湿", 0.3), ("夏", 0.5)]);
        assert!((left.dot(&right) - 0.3).abs() < 1e-12);
        assert!((right.dot(&left) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn add_unions_keys_and_keeps_insertion_order() {
        let base = FitVector::from_pairs([("a", 0.2), ("b", 0.3)]);
        let boost = FitVector::from_pairs([("c", 0.1), ("a", 0.1)]);
        let sum = base.add(&boost);
        assert_eq!(sum.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!((sum.get("a") - 0.3).abs() < 1e-12);
        assert!((base.get("a") - 0.2).abs() < 1e-12);
    }

    #[test]
    fn duplicate_keys_merge_by_max() {
        let mut vector = FitVector::new();
        vector.insert_max("夏", 0.5);
        vector.insert_max("夏", 0.3);
        assert!((vector.get("夏") - 0.5).abs() < f64::EPSILON);
        assert_eq!(vector.len(), 1);

        let merged = vector.merge_max(&FitVector::from_pairs([("夏", 0.7)]));
        assert!((merged.get("夏") - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn top_prefers_first_inserted_on_ties() {
        let vector = FitVector::from_pairs([("b", 0.4), ("a", 0.4), ("c", 0.1)]);
        assert_eq!(vector.top().map(|(key, _)| key), Some("b"));
    }

    #[test]
    fn json_round_trip_preserves_order() {
        let vector = FitVector::from_pairs([("z", 0.1), ("a", 0.2)]);
        let json = match serde_json::to_string(&vector) {
            Ok(json) => json,
            Err(err) => panic!("vector should serialize: {err}"),
        };
        assert_eq!(json, r#"{"z":0.1,"a":0.2}"#);
        let parsed: FitVector = match serde_json::from_str(&json) {
            Ok(parsed) => parsed,
            Err(err) => panic!("vector should deserialize: {err}"),
        };
        assert_eq!(parsed, vector);
    }
}
