//! Patch calculators
//!
//! This module provides:
//! - The structured `Edit` value and its conversion into a JSON patch
//! - The closed set of calculators and the fixed order they run in
//! - Target-surface routing for units updated through the resize subresource
//!
//! Every calculator is a pure function of the `PatchContext`. The pipeline
//! keeps each calculator's output as a separate stage so the admission
//! handler can route edits by surface.

mod boost;
mod markers;
mod resource_updates;
mod unboost;


pub use boost::BoostedContainer;

use crate::annotations::AnnotationLog;
use crate::features::{Feature, FeatureGates};
use crate::models::{UpdateMode, VerticalRecommendation};
use crate::quantity::Quantity;
use crate::resources::ContainerResources;
use crate::unit::WorkloadUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Prefix of every path that the resize subresource accepts
const CONTAINERS_PATH: &str = "/spec/containers/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOp {
    Add,
    Remove,
    Replace,
}

/// One structural operation against the unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub op: EditOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Edit {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: EditOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: EditOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    pub fn add_annotation(key: &str, value: impl Into<String>) -> Self {
        Self::add(annotation_path(key), Value::String(value.into()))
    }
}

/// Escape one reference token of a JSON pointer
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

pub fn annotation_path(key: &str) -> String {
    format!("/metadata/annotations/{}", escape_pointer_token(key))
}

/// Serialize edits once, at the handler boundary
pub fn to_json_patch(edits: &[Edit]) -> Result<json_patch::Patch, PatchError> {
    let value = serde_json::to_value(edits).map_err(PatchError::Encode)?;
    serde_json::from_value(value).map_err(PatchError::Encode)
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("boost factor must be >= 1, got {factor} for container {container}")]
    InvalidBoostFactor { container: String, factor: f64 },

    #[error("unsupported startup boost type: {0}")]
    UnsupportedBoostType(String),

    #[error("failed to encode startup boost annotation: {0}")]
    BoostAnnotation(serde_json::Error),

    #[error("failed to encode edit list: {0}")]
    Encode(serde_json::Error),
}

/// Where the orchestrator applies a calculator's edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSurface {
    /// The whole object
    Object,
    /// The resize subresource, which only takes container resources
    Resize,
}

impl TargetSurface {
    pub fn accepts(&self, edit: &Edit) -> bool {
        match self {
            TargetSurface::Object => true,
            TargetSurface::Resize => edit.path.starts_with(CONTAINERS_PATH),
        }
    }
}

/// Everything a calculator may look at
pub struct PatchContext<'a> {
    pub unit: &'a WorkloadUnit,
    pub recommendation: &'a VerticalRecommendation,
    /// Resolved resources, one entry per container in index order
    pub resources: &'a [ContainerResources],
    pub annotations: &'a AnnotationLog,
    pub features: &'a FeatureGates,
    pub boost_max_cpu: Option<Quantity>,
    pub now: DateTime<Utc>,
}

impl PatchContext<'_> {
    /// In-place updates are in effect for this unit
    pub fn in_place(&self) -> bool {
        self.recommendation.update_mode() == UpdateMode::InPlaceOrRecreate
            && self.features.is_enabled(Feature::InPlaceOrRecreate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calculator {
    EmptyAnnotations,
    ResourceUpdates,
    ObservedContainers,
    InPlaceMarker,
    Unboost,
}

/// Calculators in the order their edits are applied
pub const PIPELINE: [Calculator; 5] = [
    Calculator::EmptyAnnotations,
    Calculator::ResourceUpdates,
    Calculator::ObservedContainers,
    Calculator::InPlaceMarker,
    Calculator::Unboost,
];

impl Calculator {
    pub fn name(&self) -> &'static str {
        match self {
            Calculator::EmptyAnnotations => "empty_annotations",
            Calculator::ResourceUpdates => "resource_updates",
            Calculator::ObservedContainers => "observed_containers",
            Calculator::InPlaceMarker => "in_place_marker",
            Calculator::Unboost => "unboost",
        }
    }

    pub fn surface(&self, ctx: &PatchContext<'_>) -> TargetSurface {
        match self {
            Calculator::ResourceUpdates if ctx.in_place() => TargetSurface::Resize,
            _ => TargetSurface::Object,
        }
    }

    pub fn calculate(&self, ctx: &PatchContext<'_>) -> Result<Vec<Edit>, PatchError> {
        match self {
            Calculator::EmptyAnnotations => Ok(markers::empty_annotations(ctx)),
            Calculator::ResourceUpdates => resource_updates::calculate(ctx),
            Calculator::ObservedContainers => Ok(markers::observed_containers(ctx)),
            Calculator::InPlaceMarker => Ok(markers::in_place(ctx)),
            Calculator::Unboost => Ok(unboost::calculate(ctx)),
        }
    }
}

/// Output of one calculator
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub calculator: Calculator,
    pub surface: TargetSurface,
    pub edits: Vec<Edit>,
}

/// Run every calculator in pipeline order
pub fn run(ctx: &PatchContext<'_>) -> Result<Vec<Stage>, PatchError> {
    PIPELINE
        .iter()
        .map(|calculator| {
            Ok(Stage {
                calculator: *calculator,
                surface: calculator.surface(ctx),
                edits: calculator.calculate(ctx)?,
            })
        })
        .collect()
}

/// What the orchestrator is admitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionKind {
    /// A unit being created
    Create,
    /// A change submitted through the resize subresource
    Resize,
    /// Any other change to an existing unit
    Update,
}

/// Flatten stages into one edit list
///
/// Creation takes every edit. The resize subresource only takes the
/// resize-surface edits it accepts. Other updates leave the unit's
/// resources alone and only drop an expired boost marker.
pub fn route(stages: Vec<Stage>, kind: AdmissionKind) -> Vec<Edit> {
    stages
        .into_iter()
        .filter(|stage| match kind {
            AdmissionKind::Create => true,
            AdmissionKind::Resize => stage.surface == TargetSurface::Resize,
            AdmissionKind::Update => stage.calculator == Calculator::Unboost,
        })
        .flat_map(|stage| {
            let surface = stage.surface;
            stage
                .edits
                .into_iter()
                .filter(move |edit| kind != AdmissionKind::Resize || surface.accepts(edit))
        })
        .collect()
}
