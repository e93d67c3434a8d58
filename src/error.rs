use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// A reconcile or wait ran past its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// An apiVersion/kind reference could not be resolved
    #[error("invalid resource reference: {0}")]
    InvalidReference(String),

    /// Pod execution run-state is missing or malformed
    #[error("tracking state error: {0}")]
    TrackingState(String),

    /// The object has not been assigned a uid by the API server yet
    #[error("{0} has no uid")]
    MissingUid(String),

    #[error("failure while waiting for packages to be installed: {0}")]
    PackageInstall(Box<Error>),

    #[error("package {name} failed to reconcile: {message}")]
    PackageReconcile { name: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

impl Error {
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    pub fn tracking_state(msg: impl Into<String>) -> Self {
        Self::TrackingState(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
