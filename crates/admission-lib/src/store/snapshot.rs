//! In-memory policy snapshots
//!
//! Each namespace's lists are swapped as a whole, so one read never observes
//! half of an update.

use super::{async_trait, ControllerRef, PolicyStore, StoreError};
use crate::limitrange::LimitRangeItem;
use crate::models::VerticalRecommendation;
use dashmap::DashMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on owner-chain hops when resolving a top-level controller
const MAX_OWNER_DEPTH: usize = 8;

/// Identifies a controller object within a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Policy store backed by in-memory snapshots
#[derive(Default)]
pub struct SnapshotStore {
    recommendations: DashMap<String, Arc<Vec<VerticalRecommendation>>>,
    limit_ranges: DashMap<String, Arc<Vec<LimitRangeItem>>>,
    selectors: DashMap<TargetKey, LabelSelector>,
    parents: DashMap<TargetKey, ControllerRef>,
    started: AtomicBool,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every recommendation of a namespace
    pub fn set_recommendations(&self, namespace: &str, recommendations: Vec<VerticalRecommendation>) {
        debug!(namespace = %namespace, count = recommendations.len(), "Replacing recommendation snapshot");
        self.recommendations
            .insert(namespace.to_string(), Arc::new(recommendations));
    }

    /// Add one recommendation to the namespace it names
    #[cfg(test)]
    pub fn add_recommendation(&self, recommendation: VerticalRecommendation) {
        let namespace = recommendation.namespace().to_string();
        let mut entry = self.recommendations.entry(namespace).or_default();
        let mut next = entry.value().as_ref().clone();
        next.push(recommendation);
        *entry = Arc::new(next);
    }

    pub fn set_limit_ranges(&self, namespace: &str, items: Vec<LimitRangeItem>) {
        self.limit_ranges
            .insert(namespace.to_string(), Arc::new(items));
    }

    pub fn set_target_selector(&self, target: TargetKey, selector: LabelSelector) {
        self.selectors.insert(target, selector);
    }

    /// Record that `child` is controlled by `parent`
    #[cfg(test)]
    pub fn set_parent(&self, child: TargetKey, parent: ControllerRef) {
        self.parents.insert(child, parent);
    }

    fn ensure_started(&self) -> Result<(), StoreError> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotStarted)
        }
    }
}

#[async_trait]
impl PolicyStore for SnapshotStore {
    async fn start(&self) -> Result<(), StoreError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn list_recommendations(
        &self,
        namespace: &str,
    ) -> Result<Vec<VerticalRecommendation>, StoreError> {
        self.ensure_started()?;
        Ok(self
            .recommendations
            .get(namespace)
            .map(|list| list.value().as_ref().clone())
            .unwrap_or_default())
    }

    async fn limit_range_items(&self, namespace: &str) -> Result<Vec<LimitRangeItem>, StoreError> {
        self.ensure_started()?;
        Ok(self
            .limit_ranges
            .get(namespace)
            .map(|list| list.value().as_ref().clone())
            .unwrap_or_default())
    }

    async fn resolve_target_selector(
        &self,
        recommendation: &VerticalRecommendation,
    ) -> Result<LabelSelector, StoreError> {
        self.ensure_started()?;
        let target = recommendation.spec.target_ref.as_ref().ok_or_else(|| {
            StoreError::TargetUnresolved {
                kind: String::new(),
                name: String::new(),
                reason: format!("{} has no targetRef", recommendation.name()),
            }
        })?;
        let key = TargetKey::new(recommendation.namespace(), &target.kind, &target.name);
        self.selectors
            .get(&key)
            .map(|s| s.value().clone())
            .ok_or_else(|| StoreError::unresolved(target, "no such controller"))
    }

    async fn resolve_controller(
        &self,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<ControllerRef, StoreError> {
        self.ensure_started()?;
        let mut current = ControllerRef::from(owner);
        for _ in 0..MAX_OWNER_DEPTH {
            let key = TargetKey::new(namespace, &current.kind, &current.name);
            match self.parents.get(&key) {
                Some(parent) => current = parent.value().clone(),
                None => break,
            }
        }
        Ok(current)
    }
}
