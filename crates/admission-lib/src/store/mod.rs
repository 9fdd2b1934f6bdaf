//! Policy store
//!
//! This module provides:
//! - The `PolicyStore` trait the admission path reads recommendations and
//!   limit ranges through
//! - An in-memory snapshot store for tests and offline tools
//! - A Kubernetes-backed store reading from reflector caches

mod cluster;
mod snapshot;

pub use cluster::KubeStore;
pub use snapshot::{SnapshotStore, TargetKey};

use crate::limitrange::{effective_container_limits, LimitRangeItem};
use crate::models::{TargetRef, VerticalRecommendation};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use thiserror::Error;

pub use async_trait::async_trait;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("policy store has not been started")]
    NotStarted,

    #[error("failed to read {what}: {message}")]
    Read { what: String, message: String },

    #[error("target unresolved: {kind}/{name}: {reason}")]
    TargetUnresolved {
        kind: String,
        name: String,
        reason: String,
    },
}

impl StoreError {
    pub fn read(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Read {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn unresolved(target: &TargetRef, reason: impl Into<String>) -> Self {
        Self::TargetUnresolved {
            kind: target.kind.clone(),
            name: target.name.clone(),
            reason: reason.into(),
        }
    }
}

/// Reference to a controller that owns workload units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl From<&OwnerReference> for ControllerRef {
    fn from(owner: &OwnerReference) -> Self {
        Self {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
        }
    }
}

impl ControllerRef {
    /// Whether a recommendation's target names this controller
    pub fn is_targeted_by(&self, target: &TargetRef) -> bool {
        self.kind == target.kind && self.name == target.name
    }
}

/// Read-only access to recommendations and cluster policy
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Wait until the store can serve consistent reads; safe to call repeatedly
    async fn start(&self) -> Result<(), StoreError>;

    async fn list_recommendations(
        &self,
        namespace: &str,
    ) -> Result<Vec<VerticalRecommendation>, StoreError>;

    async fn limit_range_items(&self, namespace: &str) -> Result<Vec<LimitRangeItem>, StoreError>;

    /// Label selector of the controller a recommendation targets
    async fn resolve_target_selector(
        &self,
        recommendation: &VerticalRecommendation,
    ) -> Result<LabelSelector, StoreError>;

    /// Walk an owner reference up to its top-level controller
    async fn resolve_controller(
        &self,
        _namespace: &str,
        owner: &OwnerReference,
    ) -> Result<ControllerRef, StoreError> {
        Ok(ControllerRef::from(owner))
    }

    /// Effective container limit range for a namespace
    async fn effective_limit_range(
        &self,
        namespace: &str,
    ) -> Result<Option<LimitRangeItem>, StoreError> {
        let items = self.limit_range_items(namespace).await?;
        Ok(effective_container_limits(&items))
    }
}
