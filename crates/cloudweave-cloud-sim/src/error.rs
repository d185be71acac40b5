//! Simulator error types

use cloudweave_cloud::{CloudError, ResourceStatus};
use thiserror::Error;

/// Errors raised by the simulated cloud API
#[derive(Error, Debug)]
pub enum SimError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("{0} is throttled, try again later")]
    Throttled(String),

    #[error("{resource} is {status}, cannot {operation}")]
    Conflict {
        resource: String,
        status: ResourceStatus,
        operation: &'static str,
    },

    #[error("{resource} is already {status}")]
    AlreadyInState {
        resource: String,
        status: ResourceStatus,
    },

    #[error("Name {name} is already used in {scope}")]
    NameTaken { name: String, scope: String },

    #[error("Instance type {0} is sold out")]
    SoldOut(String),

    #[error("Unsupported by the simulator: {0}")]
    Unsupported(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Seed parse error: {0}")]
    Seed(#[from] serde_yaml::Error),
}

impl SimError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SimError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SimError::NotFound { .. })
    }
}

impl From<SimError> for CloudError {
    fn from(err: SimError) -> Self {
        match err {
            SimError::NotFound { kind, id } => CloudError::NotFound(format!("{} {}", kind, id)),
            SimError::Throttled(op) => CloudError::Transient(format!("{} throttled", op)),
            SimError::Conflict {
                resource,
                status,
                operation,
            } => CloudError::invalid_status(resource, status, operation),
            SimError::AlreadyInState { resource, status } => {
                CloudError::AlreadyInState(format!("{} is {}", resource, status))
            }
            SimError::NameTaken { name, scope } => {
                CloudError::DuplicateId(format!("{} in {}", name, scope))
            }
            SimError::SoldOut(instance_type) => {
                CloudError::ApiError(format!("instance type {} is sold out", instance_type))
            }
            SimError::Unsupported(what) => CloudError::NotSupported(what),
            SimError::InvalidRequest(msg) => CloudError::InvalidConfig(msg),
            SimError::Seed(e) => CloudError::InvalidConfig(format!("simulator seed: {}", e)),
        }
    }
}

/// Result type alias for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;
    use cloudweave_cloud::ErrorKind;

    #[test]
    fn test_sim_errors_map_to_engine_kinds() {
        let cases = [
            (SimError::not_found("instance", "i-1"), ErrorKind::NotFound),
            (SimError::Throttled("start".into()), ErrorKind::Transient),
            (
                SimError::Conflict {
                    resource: "i-1".into(),
                    status: ResourceStatus::Starting,
                    operation: "stop",
                },
                ErrorKind::InvalidStatus,
            ),
            (
                SimError::AlreadyInState {
                    resource: "i-1".into(),
                    status: ResourceStatus::Running,
                },
                ErrorKind::AlreadyInState,
            ),
            (
                SimError::NameTaken {
                    name: "web".into(),
                    scope: "vpc-1".into(),
                },
                ErrorKind::DuplicateId,
            ),
            (SimError::Unsupported("deny rules".into()), ErrorKind::NotSupported),
        ];
        for (sim, kind) in cases {
            assert_eq!(CloudError::from(sim).kind(), kind);
        }
    }
}
