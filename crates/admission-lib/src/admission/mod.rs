//! Admission review handling
//!
//! `AdmissionServer` answers admission reviews for two resources:
//! - `pods` (core group), which get resource edits from the matching
//!   recommendation
//! - `verticalpodautoscalers`, which are validated and defaulted
//!
//! Every request runs under a deadline. A request that misses it fails as a
//! whole and returns no edits.

mod pod;
mod vpa;


pub use vpa::defaulting_edits;

use crate::error::{AdmissionError, Result};
use crate::features::FeatureGates;
use crate::matcher::Matcher;
use crate::models::{RECOMMENDATION_GROUP, RECOMMENDATION_RESOURCE};
use crate::observability::{AdmissionMetrics, StructuredLogger};
use crate::patch::{to_json_patch, Edit, PatchError};
use crate::quantity::Quantity;
use crate::store::PolicyStore;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

/// Only `v1` objects are admitted
pub const SUPPORTED_VERSION: &str = "v1";

const POD_RESOURCE: &str = "pods";
const CORE_GROUP: &str = "";

pub struct AdmissionServer {
    store: Arc<dyn PolicyStore>,
    matcher: Matcher,
    features: FeatureGates,
    boost_max_cpu: Option<Quantity>,
    metrics: AdmissionMetrics,
    logger: StructuredLogger,
}

impl AdmissionServer {
    pub fn new(store: Arc<dyn PolicyStore>, features: FeatureGates) -> Self {
        Self {
            matcher: Matcher::new(store.clone()),
            store,
            features,
            boost_max_cpu: None,
            metrics: AdmissionMetrics::new(),
            logger: StructuredLogger::new("admission"),
        }
    }

    /// Upper bound for boosted CPU requests and limits
    pub fn with_boost_max_cpu(mut self, max: Option<Quantity>) -> Self {
        self.boost_max_cpu = max;
        self
    }

    pub fn features(&self) -> &FeatureGates {
        &self.features
    }

    /// Answer one admission review
    ///
    /// Never fails: errors turn into a denied response carrying the message.
    pub async fn review(
        &self,
        review: AdmissionReview<DynamicObject>,
        deadline: Instant,
    ) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                let err = AdmissionError::decode(e);
                self.record_failure("unknown", &err);
                return AdmissionResponse::invalid(err.to_string()).into_review();
            }
        };

        let resource = request.resource.resource.clone();
        let started = std::time::Instant::now();
        self.metrics.inc_requests(&resource);

        let response = match self.admit(&request, deadline).await.and_then(|edits| {
            self.metrics.add_edits(edits.len());
            respond(&request, &edits)
        }) {
            Ok(response) => response,
            Err(err) => {
                self.record_failure(&resource, &err);
                AdmissionResponse::from(&request).deny(err.to_string())
            }
        };

        self.metrics
            .observe_latency(&resource, started.elapsed().as_secs_f64());
        response.into_review()
    }

    /// Compute the edit list for a decoded request
    pub async fn admit(
        &self,
        request: &AdmissionRequest<DynamicObject>,
        deadline: Instant,
    ) -> Result<Vec<Edit>> {
        timeout_at(deadline, self.dispatch(request))
            .await
            .map_err(|_| AdmissionError::Deadline)?
    }

    async fn dispatch(&self, request: &AdmissionRequest<DynamicObject>) -> Result<Vec<Edit>> {
        let gvr = &request.resource;
        let handled = matches!(
            (gvr.group.as_str(), gvr.resource.as_str()),
            (CORE_GROUP, POD_RESOURCE) | (RECOMMENDATION_GROUP, RECOMMENDATION_RESOURCE)
        );
        if !handled {
            return Err(AdmissionError::UnsupportedResource(format!(
                "{}/{}",
                gvr.group, gvr.resource
            )));
        }
        if gvr.version != SUPPORTED_VERSION {
            return Err(AdmissionError::UnsupportedVersion(format!(
                "only {} {} are supported, got {}",
                SUPPORTED_VERSION, gvr.resource, gvr.version
            )));
        }

        if gvr.resource == POD_RESOURCE {
            pod::get_edits(self, request).await
        } else {
            vpa::get_edits(self, request)
        }
    }

    fn record_failure(&self, resource: &str, err: &AdmissionError) {
        self.metrics.inc_failures(err.kind());
        self.logger
            .log_failure(err.kind(), resource, &err.to_string());
    }
}

/// Allowed response, carrying the edits as a JSON patch when there are any
fn respond(request: &AdmissionRequest<DynamicObject>, edits: &[Edit]) -> Result<AdmissionResponse> {
    let response = AdmissionResponse::from(request);
    if edits.is_empty() {
        return Ok(response);
    }
    let patch = to_json_patch(edits)?;
    response.with_patch(patch).map_err(|e| {
        AdmissionError::Patch(PatchError::Encode(<serde_json::Error as serde::ser::Error>::custom(e)))
    })
}

/// Decode the request object into a typed value
fn decode_object<T: DeserializeOwned>(request: &AdmissionRequest<DynamicObject>) -> Result<T> {
    let object = request
        .object
        .as_ref()
        .ok_or_else(|| AdmissionError::decode("request carries no object"))?;
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(AdmissionError::decode)
}
