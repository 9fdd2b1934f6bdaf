//! Per-container resource maps

use crate::quantity::{Quantity, QuantityError};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as WireQuantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

/// Resource kind to amount, iterated in lexicographic order of kind names
pub type ResourceList = BTreeMap<String, Quantity>;

/// Resource kinds a policy controls when it names none
pub fn default_controlled_resources() -> Vec<String> {
    vec![CPU.to_string(), MEMORY.to_string()]
}

/// Final requests and limits for one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResources {
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

/// Parse an orchestrator resource map into typed quantities
pub fn from_wire(map: &BTreeMap<String, WireQuantity>) -> Result<ResourceList, QuantityError> {
    map.iter()
        .map(|(kind, value)| Ok((kind.clone(), value.0.parse()?)))
        .collect()
}

/// Render a typed resource map back into orchestrator quantities
pub fn to_wire(list: &ResourceList) -> BTreeMap<String, WireQuantity> {
    list.iter()
        .map(|(kind, value)| (kind.clone(), WireQuantity(value.to_string())))
        .collect()
}

/// Drop entries whose amount is zero
pub fn without_zeros(list: ResourceList) -> ResourceList {
    list.into_iter().filter(|(_, v)| !v.is_zero()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_conversion() {
        let mut wire = BTreeMap::new();
        wire.insert(CPU.to_string(), WireQuantity("1000m".to_string()));
        wire.insert(MEMORY.to_string(), WireQuantity("256Mi".to_string()));

        let typed = from_wire(&wire).unwrap();
        assert_eq!(typed[CPU].milli_value(), 1000);

        let back = to_wire(&typed);
        assert_eq!(back[CPU].0, "1");
        assert_eq!(back[MEMORY].0, "256Mi");
    }

    #[test]
    fn test_wire_conversion_rejects_bad_quantity() {
        let mut wire = BTreeMap::new();
        wire.insert(CPU.to_string(), WireQuantity("lots".to_string()));
        assert!(from_wire(&wire).is_err());
    }

    #[test]
    fn test_without_zeros() {
        let mut list = ResourceList::new();
        list.insert(CPU.to_string(), Quantity::ZERO);
        list.insert(MEMORY.to_string(), "1Gi".parse().unwrap());
        let filtered = without_zeros(list);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key(MEMORY));
    }
}
