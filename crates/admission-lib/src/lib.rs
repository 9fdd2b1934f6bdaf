//! Vertical resource admission library
//!
//! This crate provides the core functionality for:
//! - Matching workload units to the recommendation that controls them
//! - Turning recommendations into per-container requests and limits
//! - Computing ordered JSON patch edits for admitted units
//! - Validating and defaulting recommendation objects
//! - Health checks and observability

pub mod admission;
pub mod annotations;
pub mod error;
pub mod features;
pub mod health;
pub mod limitrange;
pub mod matcher;
pub mod models;
pub mod observability;
pub mod patch;
pub mod processor;
pub mod quantity;
pub mod resolver;
pub mod resources;
pub mod selector;
pub mod store;
pub mod unit;
pub mod validator;

pub use admission::AdmissionServer;
pub use error::AdmissionError;
pub use features::{Feature, FeatureGates};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AdmissionMetrics, StructuredLogger};
pub use quantity::{Quantity, QuantityError};
pub use store::{KubeStore, PolicyStore, SnapshotStore, StoreError};
