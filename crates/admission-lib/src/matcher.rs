//! Recommendation matcher
//!
//! Picks the single recommendation that controls a unit. Recommendations in
//! `Off` mode are ignored. When several match, the ones whose target names
//! the unit's top-level controller win, and the lexicographically smallest
//! name breaks any remaining tie.

use crate::models::{UpdateMode, VerticalRecommendation};
use crate::selector::Selector;
use crate::store::{ControllerRef, PolicyStore, StoreError};
use crate::unit::WorkloadUnit;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Matcher {
    store: Arc<dyn PolicyStore>,
}

impl Matcher {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Find the controlling recommendation for a unit
    ///
    /// Failing to list recommendations is an error; failing to resolve one
    /// candidate's selector only skips that candidate.
    pub async fn find(
        &self,
        unit: &WorkloadUnit,
    ) -> Result<Option<VerticalRecommendation>, StoreError> {
        let namespace = unit.namespace();
        let candidates = self.store.list_recommendations(namespace).await?;
        let labels = unit.labels();
        let controller = self.controller_of(unit).await;

        let mut matching: Vec<(bool, VerticalRecommendation)> = Vec::new();
        for rec in candidates {
            if rec.update_mode() == UpdateMode::Off {
                debug!(recommendation = %rec.name(), "Skipping recommendation in Off mode");
                continue;
            }

            let selector = match self.store.resolve_target_selector(&rec).await {
                Ok(raw) => match Selector::compile(&raw) {
                    Ok(selector) => selector,
                    Err(e) => {
                        warn!(
                            event = "candidate_skipped",
                            recommendation = %rec.name(),
                            namespace = %namespace,
                            error = %e,
                            "Target selector is invalid"
                        );
                        continue;
                    }
                },
                Err(e) => {
                    warn!(
                        event = "candidate_skipped",
                        recommendation = %rec.name(),
                        namespace = %namespace,
                        error = %e,
                        "Failed to resolve target selector"
                    );
                    continue;
                }
            };

            if !selector.matches(&labels) {
                continue;
            }

            let names_owner = match (&controller, &rec.spec.target_ref) {
                (Some(owner), Some(target)) => owner.is_targeted_by(target),
                _ => false,
            };
            matching.push((names_owner, rec));
        }

        // Owner-referencing candidates first, then by name.
        matching.sort_by(|(a_owner, a), (b_owner, b)| {
            b_owner.cmp(a_owner).then_with(|| a.name().cmp(b.name()))
        });

        Ok(matching.into_iter().next().map(|(_, rec)| rec))
    }

    async fn controller_of(&self, unit: &WorkloadUnit) -> Option<ControllerRef> {
        let owner = unit.controlling_owner()?;
        match self.store.resolve_controller(unit.namespace(), owner).await {
            Ok(controller) => Some(controller),
            Err(e) => {
                debug!(owner = %owner.name, error = %e, "Falling back to direct owner");
                Some(ControllerRef::from(owner))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limitrange::LimitRangeItem;
    use crate::store::{async_trait, SnapshotStore, TargetKey};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use serde_json::json;

    fn rec(name: &str, target: &str, mode: &str) -> VerticalRecommendation {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "default"},
            "spec": {
                "targetRef": {"apiVersion": "apps/v1", "kind": "Deployment", "name": target},
                "updatePolicy": {"updateMode": mode}
            }
        }))
        .unwrap()
    }

    fn app_selector(app: &str) -> LabelSelector {
        LabelSelector {
            match_labels: Some([("app".to_string(), app.to_string())].into()),
            match_expressions: None,
        }
    }

    fn unit(owner: Option<&str>) -> WorkloadUnit {
        let mut metadata = json!({
            "name": "web-0",
            "namespace": "default",
            "labels": {"app": "web"}
        });
        if let Some(owner) = owner {
            metadata["ownerReferences"] = json!([{
                "apiVersion": "apps/v1", "kind": "Deployment", "name": owner,
                "uid": "1", "controller": true
            }]);
        }
        WorkloadUnit::from_pod(
            serde_json::from_value(json!({"metadata": metadata, "spec": {"containers": []}}))
                .unwrap(),
        )
        .unwrap()
    }

    async fn store_with(recs: Vec<VerticalRecommendation>) -> Arc<SnapshotStore> {
        let store = Arc::new(SnapshotStore::new());
        store.start().await.unwrap();
        for target in ["web", "web-canary", "api"] {
            let app = if target == "api" { "api" } else { "web" };
            store.set_target_selector(
                TargetKey::new("default", "Deployment", target),
                app_selector(app),
            );
        }
        store.set_recommendations("default", recs);
        store
    }

    #[tokio::test]
    async fn test_no_recommendations_means_no_match() {
        let store = store_with(vec![]).await;
        let matcher = Matcher::new(store);
        assert!(matcher.find(&unit(None)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_off_mode_is_ignored() {
        let store = store_with(vec![rec("rec1", "web", "Off")]).await;
        let matcher = Matcher::new(store);
        assert!(matcher.find(&unit(None)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_selector_must_match_labels() {
        let store = store_with(vec![rec("rec1", "api", "Auto")]).await;
        let matcher = Matcher::new(store);
        assert!(matcher.find(&unit(None)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tie_break_by_name() {
        let store = store_with(vec![
            rec("zeta", "web", "Auto"),
            rec("alpha", "web-canary", "Auto"),
        ])
        .await;
        let matcher = Matcher::new(store);
        let found = matcher.find(&unit(None)).await.unwrap().unwrap();
        assert_eq!(found.name(), "alpha");
    }

    #[tokio::test]
    async fn test_owner_reference_beats_name() {
        let store = store_with(vec![
            rec("alpha", "web-canary", "Auto"),
            rec("zeta", "web", "Recreate"),
        ])
        .await;
        let matcher = Matcher::new(store);
        let found = matcher.find(&unit(Some("web"))).await.unwrap().unwrap();
        assert_eq!(found.name(), "zeta");
    }

    #[tokio::test]
    async fn test_unresolvable_candidate_is_skipped() {
        let store = store_with(vec![
            rec("alpha", "missing", "Auto"),
            rec("beta", "web", "Auto"),
        ])
        .await;
        let matcher = Matcher::new(store);
        let found = matcher.find(&unit(None)).await.unwrap().unwrap();
        assert_eq!(found.name(), "beta");
    }

    struct BrokenStore;

    #[async_trait]
    impl PolicyStore for BrokenStore {
        async fn start(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list_recommendations(
            &self,
            _namespace: &str,
        ) -> Result<Vec<VerticalRecommendation>, StoreError> {
            Err(StoreError::read("recommendations", "connection refused"))
        }

        async fn limit_range_items(
            &self,
            _namespace: &str,
        ) -> Result<Vec<LimitRangeItem>, StoreError> {
            Ok(vec![])
        }

        async fn resolve_target_selector(
            &self,
            _recommendation: &VerticalRecommendation,
        ) -> Result<LabelSelector, StoreError> {
            Ok(LabelSelector::default())
        }
    }

    #[tokio::test]
    async fn test_list_failure_bubbles_up() {
        let matcher = Matcher::new(Arc::new(BrokenStore));
        assert!(matches!(
            matcher.find(&unit(None)).await,
            Err(StoreError::Read { .. })
        ));
    }
}
