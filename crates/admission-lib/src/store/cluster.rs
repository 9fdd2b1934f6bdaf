//! Kubernetes-backed policy store
//!
//! Recommendations, limit ranges and the controller kinds a recommendation
//! may target are mirrored into reflector caches. `start()` returns once
//! every cache has completed its initial list; reads never touch the API
//! server.

use super::{async_trait, ControllerRef, PolicyStore, StoreError};
use crate::limitrange::LimitRangeItem;
use crate::models::{VerticalRecommendation, RECOMMENDATION_GROUP, RECOMMENDATION_RESOURCE};
use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{LimitRange, ReplicationController};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const MAX_OWNER_DEPTH: usize = 8;
const WATCH_RETRY: Duration = Duration::from_secs(5);

/// Policy store reading from reflector caches
pub struct KubeStore {
    client: Client,
    recommendations: ApiResource,
    caches: OnceCell<Caches>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(RECOMMENDATION_GROUP, "v1", "VerticalPodAutoscaler");
        Self {
            client,
            recommendations: ApiResource::from_gvk_with_plural(&gvk, RECOMMENDATION_RESOURCE),
            caches: OnceCell::new(),
        }
    }

    /// Build a store from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = Client::try_default()
            .await
            .map_err(|e| StoreError::read("kubernetes client configuration", e))?;
        Ok(Self::new(client))
    }

    async fn sync(&self) -> Result<Caches, StoreError> {
        // Fail fast while the API server or the recommendation CRD is unreachable.
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.recommendations);
        api.list(&ListParams::default().limit(1))
            .await
            .map_err(|e| StoreError::read("recommendation objects", e))?;

        let caches = Caches::watch(&self.client, &self.recommendations);
        caches.wait_until_synced().await?;
        info!(event = "policy_caches_synced", "Policy store caches synced");
        Ok(caches)
    }

    fn caches(&self) -> Result<&Caches, StoreError> {
        self.caches.get().ok_or(StoreError::NotStarted)
    }
}

/// Reflector caches the admission path reads from
struct Caches {
    recommendations: Store<DynamicObject>,
    limit_ranges: Store<LimitRange>,
    deployments: Store<Deployment>,
    replica_sets: Store<ReplicaSet>,
    stateful_sets: Store<StatefulSet>,
    daemon_sets: Store<DaemonSet>,
    jobs: Store<Job>,
    cron_jobs: Store<CronJob>,
    replication_controllers: Store<ReplicationController>,
}

impl Caches {
    /// Start one watch per cached kind
    fn watch(client: &Client, recommendations: &ApiResource) -> Self {
        let writer = Writer::new(recommendations.clone());
        let reader = writer.as_reader();
        spawn_reflector(
            Api::all_with(client.clone(), recommendations),
            writer,
            "VerticalPodAutoscaler",
        );

        Self {
            recommendations: reader,
            limit_ranges: watch_all(client),
            deployments: watch_all(client),
            replica_sets: watch_all(client),
            stateful_sets: watch_all(client),
            daemon_sets: watch_all(client),
            jobs: watch_all(client),
            cron_jobs: watch_all(client),
            replication_controllers: watch_all(client),
        }
    }

    async fn wait_until_synced(&self) -> Result<(), StoreError> {
        tokio::try_join!(
            synced(&self.recommendations, "recommendations"),
            synced(&self.limit_ranges, "limit ranges"),
            synced(&self.deployments, "deployments"),
            synced(&self.replica_sets, "replica sets"),
            synced(&self.stateful_sets, "stateful sets"),
            synced(&self.daemon_sets, "daemon sets"),
            synced(&self.jobs, "jobs"),
            synced(&self.cron_jobs, "cron jobs"),
            synced(&self.replication_controllers, "replication controllers"),
        )?;
        Ok(())
    }

    fn recommendations_in(&self, namespace: &str) -> Result<Vec<VerticalRecommendation>, StoreError> {
        self.recommendations
            .state()
            .iter()
            .filter(|obj| obj.metadata.namespace.as_deref() == Some(namespace))
            .map(|obj| {
                serde_json::to_value(&**obj)
                    .and_then(serde_json::from_value)
                    .map_err(|e| StoreError::read(format!("recommendations in {}", namespace), e))
            })
            .collect()
    }

    fn limit_range_items_in(&self, namespace: &str) -> Result<Vec<LimitRangeItem>, StoreError> {
        let mut items = Vec::new();
        for range in self
            .limit_ranges
            .state()
            .iter()
            .filter(|r| r.metadata.namespace.as_deref() == Some(namespace))
        {
            for item in range.spec.iter().flat_map(|s| s.limits.iter()) {
                let parsed = LimitRangeItem::try_from(item)
                    .map_err(|e| StoreError::read(format!("limit ranges in {}", namespace), e))?;
                items.push(parsed);
            }
        }
        Ok(items)
    }

    fn target_selector(
        &self,
        recommendation: &VerticalRecommendation,
    ) -> Result<LabelSelector, StoreError> {
        let namespace = recommendation.namespace();
        let target = recommendation.spec.target_ref.as_ref().ok_or_else(|| {
            StoreError::TargetUnresolved {
                kind: String::new(),
                name: String::new(),
                reason: format!("{} has no targetRef", recommendation.name()),
            }
        })?;
        let name = target.name.as_str();
        let missing = || StoreError::unresolved(target, "not found");

        let selector = match target.kind.as_str() {
            "Deployment" => cached(&self.deployments, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .map(|s| s.selector.clone()),
            "ReplicaSet" => cached(&self.replica_sets, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .map(|s| s.selector.clone()),
            "StatefulSet" => cached(&self.stateful_sets, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .map(|s| s.selector.clone()),
            "DaemonSet" => cached(&self.daemon_sets, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .map(|s| s.selector.clone()),
            "Job" => cached(&self.jobs, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .and_then(|s| s.selector.clone()),
            "CronJob" => cached(&self.cron_jobs, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|s| s.template.metadata.as_ref())
                .map(|m| selector_from_labels(m.labels.clone())),
            "ReplicationController" => cached(&self.replication_controllers, namespace, name)
                .ok_or_else(missing)?
                .spec
                .as_ref()
                .map(|s| selector_from_labels(s.selector.clone())),
            other => {
                return Err(StoreError::unresolved(
                    target,
                    format!("unsupported target kind {}", other),
                ))
            }
        };

        selector.ok_or_else(|| StoreError::unresolved(target, "target has no selector"))
    }

    /// Controlling owner of a controller object, for the kinds that have one
    fn parent_of(&self, namespace: &str, current: &ControllerRef) -> Option<ControllerRef> {
        let owners = match current.kind.as_str() {
            "ReplicaSet" => cached(&self.replica_sets, namespace, &current.name)?
                .metadata
                .owner_references
                .clone(),
            "Job" => cached(&self.jobs, namespace, &current.name)?
                .metadata
                .owner_references
                .clone(),
            _ => None,
        };
        owners
            .unwrap_or_default()
            .iter()
            .find(|o| o.controller == Some(true))
            .map(ControllerRef::from)
    }

    fn controller_of(&self, namespace: &str, owner: &OwnerReference) -> ControllerRef {
        let mut current = ControllerRef::from(owner);
        for _ in 0..MAX_OWNER_DEPTH {
            match self.parent_of(namespace, &current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }
}

fn cached<K>(store: &Store<K>, namespace: &str, name: &str) -> Option<Arc<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    store.get(&ObjectRef::new(name).within(namespace))
}

async fn synced<K>(store: &Store<K>, what: &str) -> Result<(), StoreError>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store
        .wait_until_ready()
        .await
        .map_err(|e| StoreError::read(format!("{} cache", what), e))
}

fn watch_all<K>(client: &Client) -> Store<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&K::DynamicType::default()).to_string();
    spawn_reflector(Api::all(client.clone()), writer, kind);
    reader
}

/// Drive a reflector for the life of the process
fn spawn_reflector<K>(api: Api<K>, writer: Writer<K>, kind: impl Into<String>)
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    let kind = kind.into();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()));
    tokio::spawn(async move {
        let mut stream = Box::pin(stream);
        loop {
            match stream.try_next().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(event = "reflector_terminated", kind = %kind, "Watch stream ended");
                    break;
                }
                Err(e) => {
                    warn!(event = "reflector_error", kind = %kind, error = %e, "Watch failed; retrying");
                    tokio::time::sleep(WATCH_RETRY).await;
                }
            }
        }
    });
}

fn selector_from_labels(labels: Option<BTreeMap<String, String>>) -> LabelSelector {
    LabelSelector {
        match_labels: labels,
        match_expressions: None,
    }
}

#[async_trait]
impl PolicyStore for KubeStore {
    async fn start(&self) -> Result<(), StoreError> {
        self.caches.get_or_try_init(|| self.sync()).await?;
        Ok(())
    }

    async fn list_recommendations(
        &self,
        namespace: &str,
    ) -> Result<Vec<VerticalRecommendation>, StoreError> {
        self.caches()?.recommendations_in(namespace)
    }

    async fn limit_range_items(&self, namespace: &str) -> Result<Vec<LimitRangeItem>, StoreError> {
        self.caches()?.limit_range_items_in(namespace)
    }

    async fn resolve_target_selector(
        &self,
        recommendation: &VerticalRecommendation,
    ) -> Result<LabelSelector, StoreError> {
        self.caches()?.target_selector(recommendation)
    }

    async fn resolve_controller(
        &self,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<ControllerRef, StoreError> {
        let controller = self.caches()?.controller_of(namespace, owner);
        debug!(kind = %controller.kind, name = %controller.name, "Resolved top-level controller");
        Ok(controller)
    }
}
