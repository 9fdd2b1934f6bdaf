//! Feature gates
//!
//! Parsed once at startup from a `Name=true,Other=false` list and shared
//! read-only afterwards.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    /// Allows the in-place update mode and resize-surface routing
    InPlaceOrRecreate,
    /// Boosts CPU requests of freshly admitted units
    CpuStartupBoost,
    /// Falls back to a container's existing values when its resolved map ends up empty
    BackfillEmptyResources,
}

impl Feature {
    pub const ALL: [Feature; 3] = [
        Feature::InPlaceOrRecreate,
        Feature::CpuStartupBoost,
        Feature::BackfillEmptyResources,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::InPlaceOrRecreate => "InPlaceOrRecreate",
            Feature::CpuStartupBoost => "CPUStartupBoost",
            Feature::BackfillEmptyResources => "BackfillEmptyResources",
        }
    }

    fn enabled_by_default(&self) -> bool {
        matches!(self, Feature::BackfillEmptyResources)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| FeatureError::Unknown(s.to_string()))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("unknown feature gate {0:?}")]
    Unknown(String),

    #[error("invalid feature gate entry {0:?}, expected Name=true|false")]
    Malformed(String),
}

/// The set of enabled feature gates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGates {
    enabled: BTreeSet<Feature>,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            enabled: Feature::ALL
                .into_iter()
                .filter(Feature::enabled_by_default)
                .collect(),
        }
    }
}

impl FeatureGates {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    /// Builder-style toggle
    pub fn with(mut self, feature: Feature, enabled: bool) -> Self {
        self.set(feature, enabled);
        self
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        if enabled {
            self.enabled.insert(feature);
        } else {
            self.enabled.remove(&feature);
        }
    }
}

impl FromStr for FeatureGates {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut gates = FeatureGates::default();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| FeatureError::Malformed(entry.to_string()))?;
            let enabled: bool = value
                .trim()
                .parse()
                .map_err(|_| FeatureError::Malformed(entry.to_string()))?;
            gates.set(name.trim().parse()?, enabled);
        }
        Ok(gates)
    }
}

impl fmt::Display for FeatureGates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = Feature::ALL
            .iter()
            .map(|feature| format!("{}={}", feature, self.is_enabled(*feature)))
            .collect();
        f.write_str(&entries.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let gates = FeatureGates::default();
        assert!(!gates.is_enabled(Feature::InPlaceOrRecreate));
        assert!(!gates.is_enabled(Feature::CpuStartupBoost));
        assert!(gates.is_enabled(Feature::BackfillEmptyResources));
    }

    #[test]
    fn test_parse_list() {
        let gates: FeatureGates = "InPlaceOrRecreate=true, BackfillEmptyResources=false"
            .parse()
            .unwrap();
        assert!(gates.is_enabled(Feature::InPlaceOrRecreate));
        assert!(!gates.is_enabled(Feature::BackfillEmptyResources));
        assert_eq!(
            gates.to_string(),
            "InPlaceOrRecreate=true,CPUStartupBoost=false,BackfillEmptyResources=false"
        );
    }

    #[test]
    fn test_empty_list_keeps_defaults() {
        let gates: FeatureGates = "".parse().unwrap();
        assert_eq!(gates, FeatureGates::default());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "Teleport=true".parse::<FeatureGates>(),
            Err(FeatureError::Unknown("Teleport".to_string()))
        );
        assert!(matches!(
            "InPlaceOrRecreate".parse::<FeatureGates>(),
            Err(FeatureError::Malformed(_))
        ));
        assert!(matches!(
            "InPlaceOrRecreate=maybe".parse::<FeatureGates>(),
            Err(FeatureError::Malformed(_))
        ));
    }
}
