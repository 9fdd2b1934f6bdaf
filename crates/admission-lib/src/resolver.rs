//! Resource resolver
//!
//! Turns processed targets into the final requests and limits of every
//! container. Limits either follow the new request proportionally or stay
//! untouched, depending on the container's `controlledValues`, and the
//! namespace limit range has the last word on both.

use crate::annotations::AnnotationLog;
use crate::features::{Feature, FeatureGates};
use crate::limitrange::LimitRangeItem;
use crate::models::{ControlledValues, VerticalRecommendation};
use crate::processor::ProcessedRecommendation;
use crate::quantity::Quantity;
use crate::resources::{without_zeros, ContainerResources, ResourceList, CPU};
use crate::unit::{ContainerView, WorkloadUnit};

/// Resolve final resources for every container of the unit, in index order
///
/// Containers without a processed recommendation resolve to their existing
/// values. The result is a pure function of the inputs.
pub fn resolve(
    unit: &WorkloadUnit,
    recommendation: &VerticalRecommendation,
    processed: &ProcessedRecommendation,
    limit_range: Option<&LimitRangeItem>,
    log: &mut AnnotationLog,
    features: &FeatureGates,
) -> Vec<ContainerResources> {
    unit.containers()
        .iter()
        .map(|container| {
            let Some(target) = processed.for_container(&container.name).map(|p| &p.target) else {
                return existing(container);
            };
            let controlled_values = recommendation
                .container_policy(&container.name)
                .map(|p| p.controlled_values())
                .unwrap_or(ControlledValues::RequestsAndLimits);

            let mut resources = match controlled_values {
                ControlledValues::RequestsOnly => requests_only(container, target, log),
                _ => requests_and_limits(container, target, limit_range, log),
            };
            if let Some(range) = limit_range {
                clamp_to_limit_range(&container.name, &mut resources, target, range, controlled_values, log);
            }
            finalize(container, resources, features)
        })
        .collect()
}

fn existing(container: &ContainerView) -> ContainerResources {
    ContainerResources {
        requests: container.requests.clone().unwrap_or_default(),
        limits: container.limits.clone().unwrap_or_default(),
    }
}

/// New requests: targets, plus existing requests the recommendation does not cover
fn merged_requests(container: &ContainerView, target: &ResourceList) -> ResourceList {
    let mut requests = container.requests.clone().unwrap_or_default();
    requests.extend(target.iter().map(|(k, v)| (k.clone(), *v)));
    requests
}

fn requests_only(
    container: &ContainerView,
    target: &ResourceList,
    log: &mut AnnotationLog,
) -> ContainerResources {
    let mut requests = merged_requests(container, target);
    for kind in target.keys() {
        let (Some(request), Some(limit)) = (requests.get_mut(kind), container.limit(kind)) else {
            continue;
        };
        if !limit.is_zero() && *request > *limit {
            *request = *limit;
            log.push(&container.name, format!("{} capped to container limit", kind));
        }
    }
    ContainerResources {
        requests,
        limits: container.limits.clone().unwrap_or_default(),
    }
}

fn requests_and_limits(
    container: &ContainerView,
    target: &ResourceList,
    limit_range: Option<&LimitRangeItem>,
    log: &mut AnnotationLog,
) -> ContainerResources {
    let requests = merged_requests(container, target);
    let mut limits = container.limits.clone().unwrap_or_default();

    for (kind, new_request) in target {
        let Some(original_limit) = container
            .limit(kind)
            .filter(|l| !l.is_zero())
            .or_else(|| limit_range.and_then(|r| r.default_limit(kind)))
            .filter(|l| !l.is_zero())
        else {
            continue;
        };
        let original_request = container
            .request(kind)
            .filter(|r| !r.is_zero())
            .or_else(|| limit_range.and_then(|r| r.default_request(kind)))
            .filter(|r| !r.is_zero())
            .unwrap_or(original_limit);

        let (limit, overflowed) =
            proportional_limit(kind, *original_limit, *original_request, *new_request);
        if overflowed {
            log.push(
                &container.name,
                format!("{}: failed to keep limit to request ratio; capping limit to int64", kind),
            );
        }
        limits.insert(kind.clone(), limit);
    }

    ContainerResources { requests, limits }
}

/// Scale a limit so that it keeps its ratio to the request
///
/// CPU is scaled in milli-units and everything else in whole units. Returns
/// the limit and whether it had to be capped at `i64::MAX` of those units.
pub fn proportional_limit(
    resource: &str,
    original_limit: Quantity,
    original_request: Quantity,
    new_request: Quantity,
) -> (Quantity, bool) {
    if original_limit == original_request {
        return (new_request.with_format(original_limit.format()), false);
    }

    let in_milli = resource == CPU;
    let scalar = |q: Quantity| if in_milli { q.milli_value() } else { q.value() };
    let build = |v: i128| {
        if in_milli {
            Quantity::from_milli(v, original_limit.format())
        } else {
            Quantity::from_units(v, original_limit.format())
        }
    };

    let (limit, request, new) = (scalar(original_limit), scalar(original_request), scalar(new_request));
    if request == 0 {
        return (build(limit), false);
    }

    let max = i128::from(i64::MAX);
    let scaled = limit
        .checked_mul(new)
        .and_then(|product| product.checked_add(request / 2))
        .map(|product| product / request);
    match scaled {
        Some(v) if v <= max => (build(v), false),
        _ => (build(max), true),
    }
}

fn clamp_to_limit_range(
    container: &str,
    resources: &mut ContainerResources,
    target: &ResourceList,
    range: &LimitRangeItem,
    controlled_values: ControlledValues,
    log: &mut AnnotationLog,
) {
    for kind in target.keys() {
        if let Some(request) = resources.requests.get_mut(kind) {
            if let Some(note) = clamp(request, range.min(kind), range.max(kind)) {
                log.push(container, format!("{} capped to fit {} in container LimitRange", kind, note));
            }
        }
        if controlled_values == ControlledValues::RequestsOnly {
            continue;
        }
        if let Some(limit) = resources.limits.get_mut(kind) {
            if let Some(note) = clamp(limit, range.min(kind), range.max(kind)) {
                log.push(
                    container,
                    format!("{} limit capped to fit {} in container LimitRange", kind, note),
                );
            }
        }
    }
}

fn clamp(value: &mut Quantity, min: Option<&Quantity>, max: Option<&Quantity>) -> Option<&'static str> {
    if let Some(max) = max {
        if *value > *max {
            *value = *max;
            return Some("Max");
        }
    }
    if let Some(min) = min {
        if *value < *min {
            *value = *min;
            return Some("Min");
        }
    }
    None
}

/// Drop zero entries; optionally fall back to existing values for empty maps
fn finalize(
    container: &ContainerView,
    resources: ContainerResources,
    features: &FeatureGates,
) -> ContainerResources {
    let mut requests = without_zeros(resources.requests);
    let mut limits = without_zeros(resources.limits);

    if features.is_enabled(Feature::BackfillEmptyResources) {
        if requests.is_empty() {
            requests = container.requests.clone().unwrap_or_default();
        }
        if limits.is_empty() {
            limits = container.limits.clone().unwrap_or_default();
        }
    }

    ContainerResources { requests, limits }
}
