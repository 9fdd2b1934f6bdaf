//! Limit-range calculator
//!
//! Folds every container-typed limit-range item of a namespace into one
//! effective item: the highest `min`, the lowest `max`, and the first
//! `default` / `defaultRequest` encountered.

use crate::quantity::{Quantity, QuantityError};
use crate::resources::{from_wire, ResourceList};
use k8s_openapi::api::core::v1::LimitRangeItem as WireLimitRangeItem;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Item type that applies to individual containers
pub const CONTAINER_LIMIT_TYPE: &str = "Container";

/// Namespace-level defaults and bounds on resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitRangeItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_request: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<ResourceList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<ResourceList>,
}

impl LimitRangeItem {
    pub fn default_limit(&self, resource: &str) -> Option<&Quantity> {
        self.default.as_ref().and_then(|d| d.get(resource))
    }

    pub fn default_request(&self, resource: &str) -> Option<&Quantity> {
        self.default_request.as_ref().and_then(|d| d.get(resource))
    }

    pub fn min(&self, resource: &str) -> Option<&Quantity> {
        self.min.as_ref().and_then(|m| m.get(resource))
    }

    pub fn max(&self, resource: &str) -> Option<&Quantity> {
        self.max.as_ref().and_then(|m| m.get(resource))
    }

    fn is_unconstrained(&self) -> bool {
        self.default.is_none()
            && self.default_request.is_none()
            && self.min.is_none()
            && self.max.is_none()
    }
}

impl TryFrom<&WireLimitRangeItem> for LimitRangeItem {
    type Error = QuantityError;

    fn try_from(item: &WireLimitRangeItem) -> Result<Self, Self::Error> {
        Ok(Self {
            item_type: item.type_.clone(),
            default: item.default.as_ref().map(from_wire).transpose()?,
            default_request: item.default_request.as_ref().map(from_wire).transpose()?,
            min: item.min.as_ref().map(from_wire).transpose()?,
            max: item.max.as_ref().map(from_wire).transpose()?,
        })
    }
}

/// Merge per-resource bounds, keeping the winner chosen by `keep`
fn merge_bounds(acc: &mut Option<ResourceList>, next: Option<&ResourceList>, keep: Ordering) {
    let Some(next) = next else {
        return;
    };
    let merged = acc.get_or_insert_with(ResourceList::new);
    for (kind, value) in next {
        match merged.get(kind) {
            Some(current) if value.cmp(current) != keep => {}
            _ => {
                merged.insert(kind.clone(), *value);
            }
        }
    }
}

/// Effective container limits for a set of limit-range items
///
/// Returns `None` when no container item constrains anything.
pub fn effective_container_limits(items: &[LimitRangeItem]) -> Option<LimitRangeItem> {
    let mut result = LimitRangeItem {
        item_type: CONTAINER_LIMIT_TYPE.to_string(),
        ..Default::default()
    };

    for item in items.iter().filter(|i| i.item_type == CONTAINER_LIMIT_TYPE) {
        if result.default.is_none() {
            result.default = item.default.clone();
        }
        if result.default_request.is_none() {
            result.default_request = item.default_request.clone();
        }
        merge_bounds(&mut result.min, item.min.as_ref(), Ordering::Greater);
        merge_bounds(&mut result.max, item.max.as_ref(), Ordering::Less);
    }

    if result.is_unconstrained() {
        None
    } else {
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(pairs: &[(&str, &str)]) -> Option<ResourceList> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.parse().unwrap()))
                .collect(),
        )
    }

    fn container_item() -> LimitRangeItem {
        LimitRangeItem {
            item_type: CONTAINER_LIMIT_TYPE.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_items_means_no_constraint() {
        assert!(effective_container_limits(&[]).is_none());
        assert!(effective_container_limits(&[container_item()]).is_none());
    }

    #[test]
    fn test_ignores_non_container_items() {
        let pod_item = LimitRangeItem {
            item_type: "Pod".to_string(),
            max: list(&[("cpu", "4")]),
            ..Default::default()
        };
        assert!(effective_container_limits(&[pod_item]).is_none());
    }

    #[test]
    fn test_tightest_bounds_win() {
        let a = LimitRangeItem {
            min: list(&[("cpu", "100m"), ("memory", "64Mi")]),
            max: list(&[("cpu", "4")]),
            ..container_item()
        };
        let b = LimitRangeItem {
            min: list(&[("cpu", "200m")]),
            max: list(&[("cpu", "2"), ("memory", "1Gi")]),
            ..container_item()
        };

        let effective = effective_container_limits(&[a, b]).unwrap();
        assert_eq!(effective.min("cpu").unwrap().milli_value(), 200);
        assert_eq!(effective.min("memory").unwrap().to_string(), "64Mi");
        assert_eq!(effective.max("cpu").unwrap().milli_value(), 2000);
        assert_eq!(effective.max("memory").unwrap().to_string(), "1Gi");
    }

    #[test]
    fn test_first_default_wins() {
        let a = LimitRangeItem {
            default: list(&[("cpu", "1")]),
            ..container_item()
        };
        let b = LimitRangeItem {
            default: list(&[("cpu", "2")]),
            default_request: list(&[("cpu", "500m")]),
            ..container_item()
        };

        let effective = effective_container_limits(&[a, b]).unwrap();
        assert_eq!(effective.default_limit("cpu").unwrap().milli_value(), 1000);
        assert_eq!(effective.default_request("cpu").unwrap().milli_value(), 500);
    }

    #[test]
    fn test_wire_conversion() {
        let wire: WireLimitRangeItem = serde_json::from_value(serde_json::json!({
            "type": "Container",
            "max": {"cpu": "2"},
            "defaultRequest": {"memory": "128Mi"}
        }))
        .unwrap();
        let item = LimitRangeItem::try_from(&wire).unwrap();
        assert_eq!(item.max("cpu").unwrap().milli_value(), 2000);
        assert_eq!(item.default_request("memory").unwrap().to_string(), "128Mi");
    }
}
