//! Startup CPU boost
//!
//! Raises the CPU request (and, where it is controlled, the limit) of freshly
//! admitted containers. The original resources are kept in an annotation so
//! that the boost can be rolled back once the unit has settled.

use super::{Edit, PatchContext, PatchError};
use crate::annotations::STARTUP_CPU_BOOST;
use crate::features::Feature;
use crate::models::{ControlledValues, CpuBoost, ScalingMode, StartupBoostType};
use crate::quantity::{Quantity, QuantityFormat};
use crate::resolver::proportional_limit;
use crate::resources::{ContainerResources, CPU};
use crate::unit::ContainerView;
use std::collections::BTreeMap;
use tracing::debug;

/// Resolved resources with any startup boost folded in
pub(super) struct Boosted {
    pub resources: Vec<ContainerResources>,
    pub annotation: Option<Edit>,
}

/// A container whose CPU was boosted, with its resources before the boost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoostedContainer {
    pub name: String,
    pub original: ContainerResources,
}

pub(super) fn apply(ctx: &PatchContext<'_>) -> Result<Boosted, PatchError> {
    let mut resources = ctx.resources.to_vec();
    if !ctx.features.is_enabled(Feature::CpuStartupBoost) {
        return Ok(Boosted {
            resources,
            annotation: None,
        });
    }

    if let Some(recorded) = ctx.unit.annotation(STARTUP_CPU_BOOST) {
        keep_current_boost(ctx, recorded, &mut resources);
        return Ok(Boosted {
            resources,
            annotation: None,
        });
    }

    let mut originals: BTreeMap<String, ContainerResources> = BTreeMap::new();
    for (container, resolved) in ctx.unit.containers().iter().zip(resources.iter_mut()) {
        if let Some(boosted) = boost_container(ctx, container, resolved)? {
            originals.insert(boosted.name, boosted.original);
        }
    }

    let annotation = if originals.is_empty() {
        None
    } else {
        let value = serde_json::to_string(&originals).map_err(PatchError::BoostAnnotation)?;
        Some(Edit::add_annotation(STARTUP_CPU_BOOST, value))
    };
    Ok(Boosted {
        resources,
        annotation,
    })
}

fn boost_container(
    ctx: &PatchContext<'_>,
    container: &ContainerView,
    resolved: &mut ContainerResources,
) -> Result<Option<BoostedContainer>, PatchError> {
    let policy = ctx.recommendation.container_policy(&container.name);
    if policy.map(|p| p.scaling_mode()) == Some(ScalingMode::Off) {
        return Ok(None);
    }
    let Some(config) = ctx.recommendation.cpu_boost(&container.name) else {
        return Ok(None);
    };
    let Some(base) = resolved
        .requests
        .get(CPU)
        .or_else(|| container.request(CPU))
        .copied()
        .filter(|b| !b.is_zero())
    else {
        return Ok(None);
    };
    let Some(mut request) = boosted_value(&container.name, config, base)? else {
        return Ok(None);
    };

    let controlled_values = policy
        .map(|p| p.controlled_values())
        .unwrap_or(ControlledValues::RequestsAndLimits);
    let mut limit = None;
    match controlled_values {
        ControlledValues::RequestsOnly => {
            if let Some(existing) = container.limit(CPU).filter(|l| !l.is_zero()) {
                if request >= *existing {
                    request = *existing - Quantity::from_milli(1, QuantityFormat::DecimalSI);
                }
            }
        }
        _ => {
            if let Some(current) = resolved.limits.get(CPU).filter(|l| !l.is_zero()) {
                limit = Some(proportional_limit(CPU, *current, base, request).0);
            }
        }
    }

    if let Some(max) = ctx.boost_max_cpu {
        request = request.min(max);
        limit = limit.map(|l| l.min(max));
    }
    if request <= base {
        return Ok(None);
    }

    debug!(container = %container.name, from = %base, to = %request, "Boosting CPU request");
    resolved.requests.insert(CPU.to_string(), request);
    if let Some(limit) = limit {
        resolved.limits.insert(CPU.to_string(), limit);
    }

    Ok(Some(BoostedContainer {
        name: container.name.clone(),
        original: ContainerResources {
            requests: container.requests.clone().unwrap_or_default(),
            limits: container.limits.clone().unwrap_or_default(),
        },
    }))
}

fn boosted_value(
    container: &str,
    config: &CpuBoost,
    base: Quantity,
) -> Result<Option<Quantity>, PatchError> {
    match &config.boost_type {
        StartupBoostType::Factor => {
            let factor = config.factor.unwrap_or(1.0);
            if factor < 1.0 || !factor.is_finite() {
                return Err(PatchError::InvalidBoostFactor {
                    container: container.to_string(),
                    factor,
                });
            }
            Ok(Some(base.scale_by(factor)))
        }
        StartupBoostType::Quantity => Ok(config.quantity.map(|q| base + q)),
        StartupBoostType::Unknown(other) => Err(PatchError::UnsupportedBoostType(other.clone())),
    }
}

/// Keep boosted CPU values of a unit that is still boosted
fn keep_current_boost(ctx: &PatchContext<'_>, recorded: &str, resources: &mut [ContainerResources]) {
    let recorded: BTreeMap<String, serde_json::Value> = match serde_json::from_str(recorded) {
        Ok(recorded) => recorded,
        Err(e) => {
            debug!(error = %e, "Unreadable startup boost annotation");
            return;
        }
    };
    for (container, resolved) in ctx.unit.containers().iter().zip(resources.iter_mut()) {
        if !recorded.contains_key(&container.name) {
            continue;
        }
        if let Some(current) = container.request(CPU) {
            resolved.requests.insert(CPU.to_string(), *current);
        }
        if let Some(current) = container.limit(CPU) {
            resolved.limits.insert(CPU.to_string(), *current);
        }
    }
}
