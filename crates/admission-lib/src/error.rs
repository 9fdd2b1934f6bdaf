use crate::patch::PatchError;
use crate::store::StoreError;
use crate::validator::ValidationError;
use thiserror::Error;

/// Failure of one admission request
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("unsupported resource: {0}")]
    UnsupportedResource(String),

    #[error("policy read: {0}")]
    PolicyRead(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("deadline exceeded")]
    Deadline,

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl AdmissionError {
    pub fn decode(err: impl ToString) -> Self {
        Self::Decode(err.to_string())
    }

    /// Tag used as the `kind` label of the failure counter
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::Decode(_) => "decode",
            AdmissionError::UnsupportedVersion(_) => "unsupported-version",
            AdmissionError::UnsupportedResource(_) => "unsupported-resource",
            AdmissionError::PolicyRead(_) => "policy-read",
            AdmissionError::Validation(_) => "validation",
            AdmissionError::Deadline => "deadline",
            AdmissionError::Patch(_) => "patch",
        }
    }
}

pub type Result<T> = std::result::Result<T, AdmissionError>;
