//! Startup boost removal
//!
//! Once a boosted unit has been ready for the longest configured boost
//! duration, the marker annotation is dropped. A zero duration drops it
//! as soon as it is seen.

use super::{annotation_path, Edit, PatchContext};
use crate::annotations::STARTUP_CPU_BOOST;
use crate::features::Feature;
use crate::models::VerticalRecommendation;
use chrono::Duration;

/// Longest boost duration in seconds across the recommendation and its container policies
pub fn max_boost_duration(recommendation: &VerticalRecommendation) -> i64 {
    let object_wide = recommendation
        .spec
        .startup_boost
        .as_ref()
        .and_then(|b| b.cpu.as_ref())
        .and_then(|c| c.duration_seconds);
    let per_container = recommendation
        .spec
        .resource_policy
        .iter()
        .flat_map(|p| p.container_policies.iter())
        .filter_map(|p| p.startup_boost.as_ref())
        .filter_map(|b| b.cpu.as_ref())
        .filter_map(|c| c.duration_seconds);

    object_wide
        .into_iter()
        .chain(per_container)
        .max()
        .unwrap_or(0)
        .max(0)
}

pub(super) fn calculate(ctx: &PatchContext<'_>) -> Vec<Edit> {
    if !ctx.features.is_enabled(Feature::CpuStartupBoost)
        || ctx.unit.annotation(STARTUP_CPU_BOOST).is_none()
    {
        return Vec::new();
    }

    let duration = max_boost_duration(ctx.recommendation);
    let expired = duration == 0
        || ctx
            .unit
            .ready_since()
            .and_then(|since| since.checked_add_signed(Duration::seconds(duration.min(i64::MAX / 1000))))
            .is_some_and(|deadline| deadline <= ctx.now);

    if expired {
        vec![Edit::remove(annotation_path(STARTUP_CPU_BOOST))]
    } else {
        Vec::new()
    }
}
