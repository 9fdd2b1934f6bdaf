//! Annotation-only calculators

use super::{Edit, PatchContext};
use crate::annotations::{IN_PLACE_UPDATED, OBSERVED_CONTAINERS};
use serde_json::json;

/// Later annotation edits need the map to exist
pub(super) fn empty_annotations(ctx: &PatchContext<'_>) -> Vec<Edit> {
    match ctx.unit.annotations() {
        Some(_) => Vec::new(),
        None => vec![Edit::add("/metadata/annotations", json!({}))],
    }
}

pub(super) fn observed_containers(ctx: &PatchContext<'_>) -> Vec<Edit> {
    let names: Vec<&str> = ctx
        .unit
        .containers()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    vec![Edit::add_annotation(OBSERVED_CONTAINERS, names.join(", "))]
}

pub(super) fn in_place(ctx: &PatchContext<'_>) -> Vec<Edit> {
    if ctx.in_place() {
        vec![Edit::add_annotation(IN_PLACE_UPDATED, "true")]
    } else {
        Vec::new()
    }
}
