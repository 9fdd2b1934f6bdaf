//! The workload unit under admission
//!
//! Wraps the decoded `Pod` together with a typed view of its containers so
//! that the engine never deals with quantity strings past this boundary.

use crate::quantity::{Quantity, QuantityError};
use crate::resources::{from_wire, ResourceList};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;

/// Suffix appended to `generateName` when a unit has no name yet
const GENERATED_NAME_PLACEHOLDER: &str = "%";

/// A container as the engine sees it
///
/// `None` maps mean the field is absent from the object, which matters for
/// deciding which initializers an edit list needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerView {
    pub name: String,
    /// The container carries a `resources` block, even an empty one
    pub declares_resources: bool,
    pub requests: Option<ResourceList>,
    pub limits: Option<ResourceList>,
}

impl ContainerView {
    pub fn request(&self, resource: &str) -> Option<&Quantity> {
        self.requests.as_ref().and_then(|r| r.get(resource))
    }

    pub fn limit(&self, resource: &str) -> Option<&Quantity> {
        self.limits.as_ref().and_then(|l| l.get(resource))
    }

    pub fn has_resources(&self) -> bool {
        self.declares_resources || self.requests.is_some() || self.limits.is_some()
    }
}

/// A decoded workload unit
#[derive(Debug, Clone)]
pub struct WorkloadUnit {
    pod: Pod,
    containers: Vec<ContainerView>,
}

impl WorkloadUnit {
    pub fn from_pod(pod: Pod) -> Result<Self, QuantityError> {
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|c| -> Result<ContainerView, QuantityError> {
                let resources = c.resources.as_ref();
                Ok(ContainerView {
                    name: c.name.clone(),
                    declares_resources: resources.is_some(),
                    requests: resources
                        .and_then(|r| r.requests.as_ref())
                        .map(from_wire)
                        .transpose()?,
                    limits: resources
                        .and_then(|r| r.limits.as_ref())
                        .map(from_wire)
                        .transpose()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { pod, containers })
    }

    pub fn containers(&self) -> &[ContainerView] {
        &self.containers
    }

    pub fn namespace(&self) -> &str {
        self.pod.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Name for logging; units named server-side get a placeholder
    pub fn display_name(&self) -> String {
        match (&self.pod.metadata.name, &self.pod.metadata.generate_name) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(prefix)) => format!("{}{}", prefix, GENERATED_NAME_PLACEHOLDER),
            _ => GENERATED_NAME_PLACEHOLDER.to_string(),
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.pod.metadata.labels.clone().unwrap_or_default()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.pod.metadata.annotations.as_ref()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// The owner reference marked as controller, if any
    pub fn controlling_owner(&self) -> Option<&OwnerReference> {
        self.pod
            .metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|o| o.controller == Some(true))
    }

    /// When the unit last became ready, if it is ready now
    pub fn ready_since(&self) -> Option<DateTime<Utc>> {
        self.pod
            .status
            .as_ref()?
            .conditions
            .as_ref()?
            .iter()
            .find(|c| c.type_ == "Ready" && c.status == "True")
            .and_then(|c| c.last_transition_time.as_ref())
            .map(|t| t.0)
    }
}
