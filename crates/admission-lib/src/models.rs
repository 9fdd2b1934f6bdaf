//! Data models for vertical recommendations
//!
//! Mirrors the `autoscaling.k8s.io/v1` `VerticalPodAutoscaler` wire shape. The
//! closed enums keep unrecognized strings around so that the validator can
//! report them instead of the decoder.

use crate::quantity::Quantity;
use crate::resources::{default_controlled_resources, ResourceList};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container name of the policy entry that applies to unlisted containers
pub const WILDCARD_CONTAINER: &str = "*";

/// API group of recommendation objects
pub const RECOMMENDATION_GROUP: &str = "autoscaling.k8s.io";

/// Plural resource name of recommendation objects
pub const RECOMMENDATION_RESOURCE: &str = "verticalpodautoscalers";

/// A declarative per-container resource recommendation for matching units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerticalRecommendation {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RecommendationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecommendationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<ResourcePolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommenders: Vec<RecommenderSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_boost: Option<StartupBoost>,
}

/// Reference to the controller whose units a recommendation governs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<UpdateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicy {
    #[serde(default)]
    pub container_policies: Vec<ContainerPolicy>,
}

impl ResourcePolicy {
    /// Policy for a container: the entry naming it, else the wildcard entry
    pub fn for_container(&self, name: &str) -> Option<&ContainerPolicy> {
        self.container_policies
            .iter()
            .find(|p| p.container_name == name)
            .or_else(|| {
                self.container_policies
                    .iter()
                    .find(|p| p.container_name == WILDCARD_CONTAINER)
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPolicy {
    #[serde(default)]
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ScalingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allowed: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_resources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_values: Option<ControlledValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_boost: Option<StartupBoost>,
}

impl ContainerPolicy {
    pub fn scaling_mode(&self) -> ScalingMode {
        self.mode.clone().unwrap_or(ScalingMode::Auto)
    }

    pub fn controlled_values(&self) -> ControlledValues {
        self.controlled_values
            .clone()
            .unwrap_or(ControlledValues::RequestsAndLimits)
    }

    pub fn controls(&self, resource: &str) -> bool {
        match &self.controlled_resources {
            Some(kinds) => kinds.iter().any(|k| k == resource),
            None => default_controlled_resources().iter().any(|k| k == resource),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommenderSelector {
    pub name: String,
}

/// Startup boost settings, per recommendation or per container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupBoost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuBoost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuBoost {
    #[serde(rename = "type")]
    pub boost_type: StartupBoostType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<PodRecommendation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecommendation {
    #[serde(default)]
    pub container_recommendations: Vec<ContainerRecommendation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecommendation {
    pub container_name: String,
    #[serde(default)]
    pub target: ResourceList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncapped_target: Option<ResourceList>,
}

impl VerticalRecommendation {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Update mode with the orchestrator default applied
    pub fn update_mode(&self) -> UpdateMode {
        self.spec
            .update_policy
            .as_ref()
            .and_then(|p| p.update_mode.clone())
            .unwrap_or(UpdateMode::Auto)
    }

    pub fn container_policy(&self, container: &str) -> Option<&ContainerPolicy> {
        self.spec
            .resource_policy
            .as_ref()
            .and_then(|p| p.for_container(container))
    }

    pub fn container_recommendation(&self, container: &str) -> Option<&ContainerRecommendation> {
        self.status
            .as_ref()
            .and_then(|s| s.recommendation.as_ref())
            .and_then(|r| {
                r.container_recommendations
                    .iter()
                    .find(|c| c.container_name == container)
            })
    }

    /// CPU boost for a container; the container policy overrides the object-wide one
    pub fn cpu_boost(&self, container: &str) -> Option<&CpuBoost> {
        self.container_policy(container)
            .and_then(|p| p.startup_boost.as_ref())
            .and_then(|b| b.cpu.as_ref())
            .or_else(|| self.spec.startup_boost.as_ref().and_then(|b| b.cpu.as_ref()))
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            /// A value outside the known set, kept verbatim
            Unknown(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                    Self::Unknown(other) => other,
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Unknown(_))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $(stringify!($variant) => Self::$variant,)+
                    _ => Self::Unknown(value),
                }
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Whether and how the engine applies recommendations to units
    UpdateMode {
        Off,
        Initial,
        Recreate,
        Auto,
        InPlaceOrRecreate,
    }
);

string_enum!(
    /// Per-container scaling switch
    ScalingMode { Auto, Off }
);

string_enum!(
    /// Which resource values a container policy lets the engine change
    ControlledValues {
        RequestsAndLimits,
        RequestsOnly,
    }
);

string_enum!(
    StartupBoostType { Factor, Quantity }
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> VerticalRecommendation {
        serde_json::from_value(json!({
            "apiVersion": "autoscaling.k8s.io/v1",
            "kind": "VerticalPodAutoscaler",
            "metadata": {"name": "rec1", "namespace": "default"},
            "spec": {
                "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
                "updatePolicy": {"updateMode": "Recreate"},
                "resourcePolicy": {
                    "containerPolicies": [
                        {"containerName": "*", "controlledValues": "RequestsOnly"},
                        {"containerName": "web", "maxAllowed": {"cpu": "5"}}
                    ]
                }
            },
            "status": {
                "recommendation": {
                    "containerRecommendations": [
                        {"containerName": "web", "target": {"cpu": "500m", "memory": "256Mi"}}
                    ]
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_wire_shape() {
        let rec = sample();
        assert_eq!(rec.name(), "rec1");
        assert_eq!(rec.update_mode(), UpdateMode::Recreate);
        let target = &rec.container_recommendation("web").unwrap().target;
        assert_eq!(target["cpu"].milli_value(), 500);
        assert!(rec.container_recommendation("sidecar").is_none());
    }

    #[test]
    fn test_update_mode_defaults_to_auto() {
        let rec = VerticalRecommendation::default();
        assert_eq!(rec.update_mode(), UpdateMode::Auto);
    }

    #[test]
    fn test_specific_policy_beats_wildcard() {
        let rec = sample();
        let web = rec.container_policy("web").unwrap();
        assert_eq!(web.container_name, "web");
        assert_eq!(web.controlled_values(), ControlledValues::RequestsAndLimits);

        let other = rec.container_policy("sidecar").unwrap();
        assert_eq!(other.container_name, WILDCARD_CONTAINER);
        assert_eq!(other.controlled_values(), ControlledValues::RequestsOnly);
    }

    #[test]
    fn test_unknown_enum_values_survive_decoding() {
        let policy: UpdatePolicy = serde_json::from_value(json!({"updateMode": "bad"})).unwrap();
        assert_eq!(
            policy.update_mode,
            Some(UpdateMode::Unknown("bad".to_string()))
        );
        assert_eq!(
            serde_json::to_value(&policy).unwrap(),
            json!({"updateMode": "bad"})
        );
    }

    #[test]
    fn test_controls_defaults_to_cpu_and_memory() {
        let policy = ContainerPolicy::default();
        assert!(policy.controls("cpu"));
        assert!(policy.controls("memory"));
        assert!(!policy.controls("ephemeral-storage"));

        let cpu_only = ContainerPolicy {
            controlled_resources: Some(vec!["cpu".to_string()]),
            ..Default::default()
        };
        assert!(!cpu_only.controls("memory"));
    }
}
