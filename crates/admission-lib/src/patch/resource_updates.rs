//! Resource update calculator
//!
//! Emits edits for every request and limit whose resolved value differs from
//! what the container already has, initializing the `resources` block and
//! its `requests` / `limits` maps only when they are missing. A unit that
//! already carries the resolved values gets no resource edits at all.

use super::{boost, escape_pointer_token, Edit, PatchContext, PatchError};
use crate::annotations::RESOURCE_UPDATES;
use crate::quantity::Quantity;
use crate::resources::{ContainerResources, ResourceList};
use crate::unit::ContainerView;
use serde_json::{json, Value};

pub(super) fn calculate(ctx: &PatchContext<'_>) -> Result<Vec<Edit>, PatchError> {
    let boosted = boost::apply(ctx)?;

    let mut edits: Vec<Edit> = boosted.annotation.into_iter().collect();
    let mut summaries = Vec::new();

    for (index, (container, resolved)) in ctx
        .unit
        .containers()
        .iter()
        .zip(boosted.resources.iter())
        .enumerate()
    {
        let (container_edits, changed) = container_edits(index, container, resolved);
        if changed.is_empty() {
            continue;
        }
        edits.extend(container_edits);

        let mut notes = ctx.annotations.for_container(&container.name).to_vec();
        notes.extend(changed);
        summaries.push(format!("container {}: {}", index, notes.join(", ")));
    }

    if !summaries.is_empty() {
        edits.push(Edit::add_annotation(
            RESOURCE_UPDATES,
            format!(
                "Pod resources updated by {}: {}",
                ctx.recommendation.name(),
                summaries.join("; ")
            ),
        ));
    }
    Ok(edits)
}

/// Edits for one container and the `"{kind} request"` style labels of what changed
fn container_edits(
    index: usize,
    container: &ContainerView,
    resolved: &ContainerResources,
) -> (Vec<Edit>, Vec<String>) {
    let base = format!("/spec/containers/{}/resources", index);
    let mut edits = Vec::new();
    let mut changed = Vec::new();
    let mut has_block = container.has_resources();

    let fields = [
        ("requests", "request", container.requests.as_ref(), &resolved.requests),
        ("limits", "limit", container.limits.as_ref(), &resolved.limits),
    ];
    for (field, label, current, desired) in fields {
        let diffs = differing(current, desired);
        if diffs.is_empty() {
            continue;
        }
        if !has_block {
            edits.push(Edit::add(base.clone(), json!({})));
            has_block = true;
        }
        if current.is_none() {
            edits.push(Edit::add(format!("{}/{}", base, field), json!({})));
        }
        for (kind, value) in diffs {
            edits.push(Edit::add(
                format!("{}/{}/{}", base, field, escape_pointer_token(kind)),
                Value::String(value.to_string()),
            ));
            changed.push(format!("{} {}", kind, label));
        }
    }

    (edits, changed)
}

fn differing<'a>(
    current: Option<&ResourceList>,
    desired: &'a ResourceList,
) -> Vec<(&'a String, &'a Quantity)> {
    desired
        .iter()
        .filter(|(kind, value)| current.and_then(|c| c.get(*kind)) != Some(*value))
        .collect()
}
