use super::{decode_object, AdmissionServer};
use crate::error::{AdmissionError, Result};
use crate::patch::{self, AdmissionKind, Edit, PatchContext};
use crate::unit::WorkloadUnit;
use crate::{processor, resolver};
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use tracing::warn;

const RESIZE_SUBRESOURCE: &str = "resize";

/// Edits that bring a unit's resources in line with its recommendation
pub(super) async fn get_edits(
    server: &AdmissionServer,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Vec<Edit>> {
    let kind = match (&request.operation, request.sub_resource.as_deref()) {
        (Operation::Delete | Operation::Connect, _) => return Ok(Vec::new()),
        (_, Some(RESIZE_SUBRESOURCE)) => AdmissionKind::Resize,
        (Operation::Create, _) => AdmissionKind::Create,
        _ => AdmissionKind::Update,
    };

    let mut pod: Pod = decode_object(request)?;
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = request.namespace.clone();
    }
    let unit = WorkloadUnit::from_pod(pod).map_err(AdmissionError::decode)?;
    let name = unit.display_name();

    let Some(recommendation) = server.matcher.find(&unit).await? else {
        server.logger.log_no_match(&name, unit.namespace());
        return Ok(Vec::new());
    };
    server.metrics.inc_matched();

    let limit_range = server
        .store
        .effective_limit_range(unit.namespace())
        .await
        .unwrap_or_else(|e| {
            warn!(
                event = "limit_range_unavailable",
                namespace = %unit.namespace(),
                error = %e,
                "Treating limit range as unconstrained"
            );
            None
        });

    let (processed, mut log) = processor::apply(&recommendation, &unit);
    let resources = resolver::resolve(
        &unit,
        &recommendation,
        &processed,
        limit_range.as_ref(),
        &mut log,
        &server.features,
    );

    let ctx = PatchContext {
        unit: &unit,
        recommendation: &recommendation,
        resources: &resources,
        annotations: &log,
        features: &server.features,
        boost_max_cpu: server.boost_max_cpu,
        now: Utc::now(),
    };
    let edits = patch::route(patch::run(&ctx)?, kind);

    server
        .logger
        .log_admitted(&name, unit.namespace(), recommendation.name(), edits.len());
    Ok(edits)
}
