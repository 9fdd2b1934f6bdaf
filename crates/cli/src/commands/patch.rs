//! Compute the admission edit list for a pod offline

use admission_lib::{
    limitrange::LimitRangeItem,
    patch::{to_json_patch, Edit},
    store::TargetKey,
    AdmissionServer, FeatureGates, PolicyStore, Quantity, SnapshotStore, VerticalRecommendation,
};
use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::{LimitRange, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tabled::Tabled;
use tracing::debug;

use crate::inputs::{load_json, load_list};
use crate::output::{color_op, format_value, print_info, print_json, print_table, OutputFormat};

const DEFAULT_NAMESPACE: &str = "default";
const OFFLINE_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs of the `patch` command
#[derive(Debug, Clone, Default)]
pub struct PatchInput {
    pub pod: PathBuf,
    pub recommendations: PathBuf,
    pub limit_ranges: Option<PathBuf>,
    /// JSON object mapping `Kind/name` to a label selector
    pub selectors: Option<PathBuf>,
    pub subresource: Option<String>,
    pub features: FeatureGates,
    pub boost_max_cpu: Option<Quantity>,
}

#[derive(Tabled, Serialize)]
struct EditRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Compute the edits the admission server would return for a pod
pub async fn compute(input: &PatchInput) -> Result<(Value, Vec<Edit>)> {
    let pod_value: Value = load_json(&input.pod)?;
    let pod: Pod = serde_json::from_value(pod_value.clone())
        .with_context(|| format!("{} is not a pod", input.pod.display()))?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let store = Arc::new(SnapshotStore::new());
    store.start().await?;

    let mut by_namespace: BTreeMap<String, Vec<VerticalRecommendation>> = BTreeMap::new();
    for mut recommendation in load_list::<VerticalRecommendation>(&input.recommendations)? {
        if recommendation.metadata.namespace.is_none() {
            recommendation.metadata.namespace = Some(namespace.clone());
        }
        by_namespace
            .entry(recommendation.namespace().to_string())
            .or_default()
            .push(recommendation);
    }

    match &input.selectors {
        Some(path) => load_selectors(&store, path, &namespace)?,
        None => select_by_owner(&store, &pod, by_namespace.get(&namespace), &namespace),
    }
    for (ns, recommendations) in by_namespace {
        store.set_recommendations(&ns, recommendations);
    }

    if let Some(path) = &input.limit_ranges {
        let items = load_list::<LimitRange>(path)?
            .iter()
            .filter_map(|range| range.spec.as_ref())
            .flat_map(|spec| spec.limits.iter())
            .map(LimitRangeItem::try_from)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid quantity in {}", path.display()))?;
        store.set_limit_ranges(&namespace, items);
    }

    let server = AdmissionServer::new(store, input.features.clone())
        .with_boost_max_cpu(input.boost_max_cpu);
    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "vpactl",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "subResource": input.subresource,
            "namespace": namespace,
            "operation": "CREATE",
            "userInfo": {},
            "object": pod_value
        }
    });
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_value(review).context("Failed to build admission review")?;
    let request: AdmissionRequest<DynamicObject> = review
        .try_into()
        .map_err(|e| anyhow!("Failed to build admission request: {}", e))?;

    let edits = server
        .admit(&request, tokio::time::Instant::now() + OFFLINE_TIMEOUT)
        .await?;
    Ok((pod_value, edits))
}

/// Read `Kind/name` selectors from a file
fn load_selectors(store: &SnapshotStore, path: &Path, namespace: &str) -> Result<()> {
    let selectors: BTreeMap<String, LabelSelector> = load_json(path)?;
    for (target, selector) in selectors {
        let (kind, name) = target
            .split_once('/')
            .ok_or_else(|| anyhow!("Selector key {:?} is not Kind/name", target))?;
        store.set_target_selector(TargetKey::new(namespace, kind, name), selector);
    }
    Ok(())
}

/// Without selectors, a recommendation targeting the pod's owner selects the pod by its labels
fn select_by_owner(
    store: &SnapshotStore,
    pod: &Pod,
    recommendations: Option<&Vec<VerticalRecommendation>>,
    namespace: &str,
) {
    let owner = pod
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.controller == Some(true));
    let Some(owner) = owner else {
        debug!("Pod has no controller; no recommendation can target it");
        return;
    };

    let selector = LabelSelector {
        match_labels: pod.metadata.labels.clone(),
        match_expressions: None,
    };
    for target in recommendations
        .into_iter()
        .flatten()
        .filter_map(|rec| rec.spec.target_ref.as_ref())
        .filter(|target| target.kind == owner.kind && target.name == owner.name)
    {
        debug!(kind = %target.kind, name = %target.name, "Selecting pod through its owner");
        store.set_target_selector(
            TargetKey::new(namespace, &target.kind, &target.name),
            selector.clone(),
        );
    }
}

/// Run the `patch` command
pub async fn run(input: &PatchInput, apply: bool, format: OutputFormat) -> Result<()> {
    let (pod, edits) = compute(input).await?;

    if apply {
        let mut patched = pod;
        json_patch::patch(&mut patched, &to_json_patch(&edits)?.0)
            .context("Edit list does not apply to the pod")?;
        print_json(&patched);
        return Ok(());
    }

    match format {
        OutputFormat::Json => print_json(&to_json_patch(&edits)?),
        OutputFormat::Table => {
            let rows: Vec<EditRow> = edits
                .iter()
                .enumerate()
                .map(|(index, edit)| EditRow {
                    index,
                    op: color_op(edit.op),
                    path: edit.path.clone(),
                    value: format_value(edit.value.as_ref()),
                })
                .collect();
            print_table(&rows, format, "No edits: the pod is left unchanged");
            if !rows.is_empty() {
                print_info(&format!("{} edits", rows.len()));
            }
        }
    }
    Ok(())
}
