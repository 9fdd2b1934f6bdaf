use super::{decode_object, AdmissionServer};
use crate::error::Result;
use crate::models::VerticalRecommendation;
use crate::patch::Edit;
use crate::validator::validate;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use serde_json::json;

const UPDATE_POLICY_PATH: &str = "/spec/updatePolicy";

/// Validate a recommendation being written and default what it leaves out
pub(super) fn get_edits(
    server: &AdmissionServer,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Vec<Edit>> {
    if matches!(request.operation, Operation::Delete) {
        return Ok(Vec::new());
    }

    let recommendation: VerticalRecommendation = decode_object(request)?;
    let is_create = matches!(request.operation, Operation::Create);
    validate(&recommendation, is_create, &server.features)?;

    server.logger.log_recommendation_admitted(
        recommendation.name(),
        request.namespace.as_deref().unwrap_or_default(),
        if is_create { "create" } else { "update" },
    );
    Ok(defaulting_edits(&recommendation))
}

/// Edits filling in defaults for a recommendation that passed validation
pub fn defaulting_edits(recommendation: &VerticalRecommendation) -> Vec<Edit> {
    if recommendation.spec.update_policy.is_some() {
        return Vec::new();
    }
    vec![Edit::add(UPDATE_POLICY_PATH, json!({"updateMode": "Auto"}))]
}
