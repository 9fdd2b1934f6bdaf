//! Recommendation processor
//!
//! Narrows a raw recommendation down to what the resource policy lets the
//! engine apply. Uncontrolled resource kinds are dropped, as are negative
//! values and values that cannot be represented exactly. The remaining
//! targets are capped into the `[minAllowed, maxAllowed]` box of the
//! container's policy entry.

use crate::annotations::AnnotationLog;
use crate::models::{ContainerPolicy, ContainerRecommendation, ScalingMode, VerticalRecommendation};
use crate::quantity::Quantity;
use crate::resources::{ResourceList, CPU};
use crate::unit::WorkloadUnit;
use tracing::debug;

/// Target of one container after policy has been applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedContainer {
    pub container_name: String,
    pub target: ResourceList,
}

/// Per-container targets after policy has been applied, in unit container order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedRecommendation {
    pub containers: Vec<ProcessedContainer>,
}

impl ProcessedRecommendation {
    pub fn for_container(&self, name: &str) -> Option<&ProcessedContainer> {
        self.containers.iter().find(|c| c.container_name == name)
    }
}

/// Whether a quantity can be written at the granularity its resource allows
pub fn has_valid_granularity(resource: &str, value: &Quantity) -> bool {
    if resource == CPU {
        value.is_whole_milli()
    } else {
        value.is_whole_unit()
    }
}

/// Apply a recommendation's resource policy to the containers of a unit
pub fn apply(
    recommendation: &VerticalRecommendation,
    unit: &WorkloadUnit,
) -> (ProcessedRecommendation, AnnotationLog) {
    let mut processed = ProcessedRecommendation::default();
    let mut log = AnnotationLog::new();

    for container in unit.containers() {
        let Some(raw) = recommendation.container_recommendation(&container.name) else {
            log.push(&container.name, "no recommendation");
            continue;
        };

        let policy = recommendation.container_policy(&container.name);
        if policy.map(ContainerPolicy::scaling_mode) == Some(ScalingMode::Off) {
            debug!(container = %container.name, "Scaling disabled by policy");
            continue;
        }

        processed
            .containers
            .push(process_container(raw, policy, &mut log));
    }

    (processed, log)
}

fn process_container(
    raw: &ContainerRecommendation,
    policy: Option<&ContainerPolicy>,
    log: &mut AnnotationLog,
) -> ProcessedContainer {
    let name = raw.container_name.as_str();
    let default_policy = ContainerPolicy::default();
    let policy = policy.unwrap_or(&default_policy);

    let mut target = ResourceList::new();
    for (kind, value) in controlled(&raw.target, policy) {
        if value.is_negative() {
            log.push(name, format!("{} recommendation {} is negative; dropped", kind, value));
            continue;
        }
        if !has_valid_granularity(&kind, &value) {
            log.push(name, format!("{} recommendation {} has invalid granularity; dropped", kind, value));
            continue;
        }
        let (capped, note) = cap_to_policy(&kind, value, policy);
        if let Some(note) = note {
            log.push(name, note);
        }
        target.insert(kind, capped);
    }

    ProcessedContainer {
        container_name: raw.container_name.clone(),
        target,
    }
}

fn controlled<'a>(
    list: &'a ResourceList,
    policy: &'a ContainerPolicy,
) -> impl Iterator<Item = (String, Quantity)> + 'a {
    list.iter()
        .filter(|(kind, _)| policy.controls(kind))
        .map(|(kind, value)| (kind.clone(), *value))
}

/// Clamp a value into the policy box, returning the note to record if it moved
fn cap_to_policy(kind: &str, value: Quantity, policy: &ContainerPolicy) -> (Quantity, Option<String>) {
    if let Some(min) = policy.min_allowed.as_ref().and_then(|m| m.get(kind)) {
        if value < *min {
            return (*min, Some(format!("{} capped to minAllowed", kind)));
        }
    }
    if let Some(max) = policy.max_allowed.as_ref().and_then(|m| m.get(kind)) {
        if value > *max {
            return (*max, Some(format!("{} capped to maxAllowed", kind)));
        }
    }
    (value, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(names: &[&str]) -> WorkloadUnit {
        let containers: Vec<_> = names.iter().map(|n| json!({"name": n})).collect();
        WorkloadUnit::from_pod(
            serde_json::from_value(json!({
                "metadata": {"name": "p", "namespace": "default"},
                "spec": {"containers": containers}
            }))
            .unwrap(),
        )
        .unwrap()
    }

    fn recommendation(policies: serde_json::Value, recs: serde_json::Value) -> VerticalRecommendation {
        serde_json::from_value(json!({
            "metadata": {"name": "rec1", "namespace": "default"},
            "spec": {"resourcePolicy": {"containerPolicies": policies}},
            "status": {"recommendation": {"containerRecommendations": recs}}
        }))
        .unwrap()
    }

    #[test]
    fn test_target_above_max_is_capped() {
        let rec = recommendation(
            json!([{"containerName": "web", "maxAllowed": {"cpu": "5"}}]),
            json!([{"containerName": "web", "target": {"cpu": "7", "memory": "1Gi"}}]),
        );
        let (processed, log) = apply(&rec, &unit(&["web"]));

        let web = processed.for_container("web").unwrap();
        assert_eq!(web.target["cpu"].milli_value(), 5000);
        assert_eq!(web.target["memory"].value(), 1 << 30);
        assert_eq!(log.for_container("web"), ["cpu capped to maxAllowed"]);
    }

    #[test]
    fn test_target_below_min_is_raised() {
        let rec = recommendation(
            json!([{"containerName": "*", "minAllowed": {"memory": "128Mi"}}]),
            json!([{"containerName": "web", "target": {"memory": "64Mi"}}]),
        );
        let (processed, log) = apply(&rec, &unit(&["web"]));
        assert_eq!(
            processed.for_container("web").unwrap().target["memory"].to_string(),
            "128Mi"
        );
        assert_eq!(log.for_container("web"), ["memory capped to minAllowed"]);
    }

    #[test]
    fn test_uncontrolled_resources_are_dropped() {
        let rec = recommendation(
            json!([{"containerName": "web", "controlledResources": ["cpu"]}]),
            json!([{"containerName": "web", "target": {"cpu": "1", "memory": "1Gi"}}]),
        );
        let (processed, _) = apply(&rec, &unit(&["web"]));
        let web = processed.for_container("web").unwrap();
        assert!(web.target.contains_key("cpu"));
        assert!(!web.target.contains_key("memory"));
    }

    #[test]
    fn test_off_containers_and_missing_recommendations() {
        let rec = recommendation(
            json!([{"containerName": "sidecar", "mode": "Off"}]),
            json!([
                {"containerName": "web", "target": {"cpu": "1"}},
                {"containerName": "sidecar", "target": {"cpu": "1"}}
            ]),
        );
        let (processed, log) = apply(&rec, &unit(&["web", "sidecar", "init"]));
        assert!(processed.for_container("web").is_some());
        assert!(processed.for_container("sidecar").is_none());
        assert!(processed.for_container("init").is_none());
        assert_eq!(log.for_container("init"), ["no recommendation"]);
        assert!(log.for_container("sidecar").is_empty());
    }

    #[test]
    fn test_sub_milli_cpu_is_dropped() {
        let rec = recommendation(
            json!([]),
            json!([{"containerName": "web", "target": {"cpu": "187500u", "memory": "100Mi"}}]),
        );
        let (processed, log) = apply(&rec, &unit(&["web"]));
        let web = processed.for_container("web").unwrap();
        assert!(!web.target.contains_key("cpu"));
        assert!(web.target.contains_key("memory"));
        assert_eq!(log.for_container("web").len(), 1);
    }

    #[test]
    fn test_negative_target_is_dropped() {
        let rec = recommendation(
            json!([{"containerName": "web", "minAllowed": {"cpu": "100m"}}]),
            json!([{"containerName": "web", "target": {"cpu": "-500m", "memory": "100Mi"}}]),
        );
        let (processed, log) = apply(&rec, &unit(&["web"]));
        let web = processed.for_container("web").unwrap();
        assert!(!web.target.contains_key("cpu"));
        assert!(web.target.contains_key("memory"));
        assert_eq!(
            log.for_container("web"),
            ["cpu recommendation -500m is negative; dropped"]
        );
    }
}
