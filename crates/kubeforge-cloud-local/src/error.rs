//! Local backend error types

use kubeforge_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("kind not found. Please install: https://kind.sigs.k8s.io/docs/user/quick-start/#installation")]
    KindNotFound,

    #[error("kind command failed: {0}")]
    CommandFailed(String),

    #[error("kind cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<LocalError> for kubeforge_core::Error {
    fn from(err: LocalError) -> Self {
        let kind = match &err {
            LocalError::KindNotFound => ErrorKind::MissingConfiguration,
            LocalError::CommandFailed(_) => ErrorKind::FailedClusterOperation,
            LocalError::ClusterNotFound(_) => ErrorKind::NoMatchingRecordsFound,
            LocalError::IoError(_) => ErrorKind::Internal,
        };
        kubeforge_core::Error::new(kind, format!("local: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;
