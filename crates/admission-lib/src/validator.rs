//! Recommendation object validation
//!
//! Runs on the write path, before any defaulting edit is produced. The first
//! violated rule is reported.

use crate::features::{Feature, FeatureGates};
use crate::models::{
    ContainerPolicy, CpuBoost, ScalingMode, StartupBoost, StartupBoostType, UpdateMode,
    VerticalRecommendation,
};
use crate::quantity::Quantity;
use crate::resources::{ResourceList, CPU, MEMORY};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("target required: targetRef is required")]
    TargetRequired,

    #[error("missing update mode: updateMode is required if updatePolicy is used")]
    MissingUpdateMode,

    #[error("unknown update mode: unexpected updateMode value {0}")]
    UnknownUpdateMode(String),

    #[error("feature disabled: {what} requires the {gate} feature gate")]
    FeatureDisabled { what: String, gate: Feature },

    #[error("minReplicas must be positive: got {0}")]
    NonPositiveMinReplicas(i32),

    #[error("missing container name: containerPolicies.containerName is required")]
    MissingContainerName,

    #[error("unknown scaling mode: unexpected mode value {0}")]
    UnknownScalingMode(String),

    #[error("max below min: max resource for {0} is lower than min")]
    MaxBelowMin(String),

    #[error("quantity granularity: {field}: {resource} [{value}] must be a whole number of {unit}")]
    Granularity {
        field: &'static str,
        resource: &'static str,
        value: Quantity,
        unit: &'static str,
    },

    #[error("contradictory policy: controlledValues shouldn't be specified if container scaling mode is off")]
    ContradictoryPolicy,

    #[error("multiple recommenders: at most one recommender is supported, got {0}")]
    MultipleRecommenders(usize),

    #[error("invalid startup boost: {0}")]
    InvalidStartupBoost(String),
}

impl ValidationError {
    /// Short tag identifying the violated rule
    pub fn tag(&self) -> &'static str {
        match self {
            ValidationError::TargetRequired => "target required",
            ValidationError::MissingUpdateMode => "missing update mode",
            ValidationError::UnknownUpdateMode(_) => "unknown update mode",
            ValidationError::FeatureDisabled { .. } => "feature disabled",
            ValidationError::NonPositiveMinReplicas(_) => "minReplicas must be positive",
            ValidationError::MissingContainerName => "missing container name",
            ValidationError::UnknownScalingMode(_) => "unknown scaling mode",
            ValidationError::MaxBelowMin(_) => "max below min",
            ValidationError::Granularity { .. } => "quantity granularity",
            ValidationError::ContradictoryPolicy => "contradictory policy",
            ValidationError::MultipleRecommenders(_) => "multiple recommenders",
            ValidationError::InvalidStartupBoost(_) => "invalid startup boost",
        }
    }
}

/// Validate a recommendation object being created or updated
pub fn validate(
    recommendation: &VerticalRecommendation,
    is_create: bool,
    features: &FeatureGates,
) -> Result<(), ValidationError> {
    let spec = &recommendation.spec;

    if is_create && spec.target_ref.is_none() {
        return Err(ValidationError::TargetRequired);
    }

    if let Some(policy) = &spec.update_policy {
        let mode = policy
            .update_mode
            .as_ref()
            .ok_or(ValidationError::MissingUpdateMode)?;
        if !mode.is_known() {
            return Err(ValidationError::UnknownUpdateMode(mode.to_string()));
        }
        if *mode == UpdateMode::InPlaceOrRecreate
            && is_create
            && !features.is_enabled(Feature::InPlaceOrRecreate)
        {
            return Err(ValidationError::FeatureDisabled {
                what: format!("updateMode {}", mode),
                gate: Feature::InPlaceOrRecreate,
            });
        }
        if let Some(min_replicas) = policy.min_replicas {
            if min_replicas <= 0 {
                return Err(ValidationError::NonPositiveMinReplicas(min_replicas));
            }
        }
    }

    if let Some(resource_policy) = &spec.resource_policy {
        for policy in &resource_policy.container_policies {
            validate_container_policy(policy, features)?;
        }
    }

    if spec.recommenders.len() > 1 {
        return Err(ValidationError::MultipleRecommenders(spec.recommenders.len()));
    }

    if let Some(boost) = &spec.startup_boost {
        validate_startup_boost(boost, features)?;
    }

    Ok(())
}

fn validate_container_policy(
    policy: &ContainerPolicy,
    features: &FeatureGates,
) -> Result<(), ValidationError> {
    if policy.container_name.is_empty() {
        return Err(ValidationError::MissingContainerName);
    }
    if let Some(mode) = &policy.mode {
        if !mode.is_known() {
            return Err(ValidationError::UnknownScalingMode(mode.to_string()));
        }
    }

    if let (Some(min), Some(max)) = (&policy.min_allowed, &policy.max_allowed) {
        for (resource, max_value) in max {
            if matches!(min.get(resource), Some(min_value) if max_value < min_value) {
                return Err(ValidationError::MaxBelowMin(resource.clone()));
            }
        }
    }
    if let Some(min) = &policy.min_allowed {
        check_granularity("minAllowed", min)?;
    }
    if let Some(max) = &policy.max_allowed {
        check_granularity("maxAllowed", max)?;
    }

    if policy.mode == Some(ScalingMode::Off) && policy.controlled_values.is_some() {
        return Err(ValidationError::ContradictoryPolicy);
    }

    if let Some(boost) = &policy.startup_boost {
        validate_startup_boost(boost, features)?;
    }
    Ok(())
}

fn check_granularity(field: &'static str, list: &ResourceList) -> Result<(), ValidationError> {
    if let Some(cpu) = list.get(CPU) {
        if !cpu.is_whole_milli() {
            return Err(ValidationError::Granularity {
                field,
                resource: "CPU",
                value: *cpu,
                unit: "milli CPUs",
            });
        }
    }
    if let Some(memory) = list.get(MEMORY) {
        if !memory.is_whole_unit() {
            return Err(ValidationError::Granularity {
                field,
                resource: MEMORY,
                value: *memory,
                unit: "bytes",
            });
        }
    }
    Ok(())
}

fn validate_startup_boost(boost: &StartupBoost, features: &FeatureGates) -> Result<(), ValidationError> {
    if !features.is_enabled(Feature::CpuStartupBoost) {
        return Err(ValidationError::FeatureDisabled {
            what: "startupBoost".to_string(),
            gate: Feature::CpuStartupBoost,
        });
    }
    let Some(cpu) = &boost.cpu else {
        return Ok(());
    };
    validate_cpu_boost(cpu)
}

fn validate_cpu_boost(cpu: &CpuBoost) -> Result<(), ValidationError> {
    match &cpu.boost_type {
        StartupBoostType::Factor => {
            if let Some(factor) = cpu.factor {
                if factor < 1.0 || factor.is_nan() {
                    return Err(ValidationError::InvalidStartupBoost(format!(
                        "factor must be >= 1, got {}",
                        factor
                    )));
                }
            }
        }
        StartupBoostType::Quantity => {
            if cpu.quantity.is_none() {
                return Err(ValidationError::InvalidStartupBoost(
                    "quantity is required when type is Quantity".to_string(),
                ));
            }
        }
        StartupBoostType::Unknown(other) => {
            return Err(ValidationError::InvalidStartupBoost(format!(
                "unexpected type {}",
                other
            )));
        }
    }
    if let Some(duration) = cpu.duration_seconds {
        if duration < 0 {
            return Err(ValidationError::InvalidStartupBoost(format!(
                "durationSeconds must not be negative, got {}",
                duration
            )));
        }
    }
    Ok(())
}
