//! Civo backend error types

use kubeforge_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CivoError {
    #[error("no Civo API token: set CIVO_TOKEN or run `kubeforge credentials civo`")]
    MissingToken,

    #[error("Civo client is not connected")]
    NotConnected,

    #[error("Civo rejected the API token: {0}")]
    AuthenticationFailed(String),

    #[error("Civo resource not found: {0}")]
    NotFound(String),

    #[error("Civo API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("disk image not found: {0}")]
    DiskImageNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CivoError {
    /// Builds the error for a non-success HTTP status
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => CivoError::AuthenticationFailed(message),
            404 => CivoError::NotFound(message),
            _ => CivoError::Api { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CivoError::NotFound(_))
    }

    fn kind(&self) -> ErrorKind {
        match self {
            CivoError::MissingToken | CivoError::NotConnected => ErrorKind::MissingConfiguration,
            CivoError::AuthenticationFailed(_) => ErrorKind::FailedCloudAccountAuth,
            CivoError::NotFound(_) => ErrorKind::NoMatchingRecordsFound,
            CivoError::Api { status: 409, .. } => ErrorKind::DuplicateRecords,
            CivoError::DiskImageNotFound(_) => ErrorKind::MissingConfiguration,
            CivoError::Api { .. } | CivoError::Http(_) => ErrorKind::FailedClusterOperation,
            CivoError::Json(_) => ErrorKind::Internal,
        }
    }
}

impl From<CivoError> for kubeforge_core::Error {
    fn from(err: CivoError) -> Self {
        let kind = err.kind();
        kubeforge_core::Error::new(kind, format!("civo: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, CivoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            CivoError::from_status(401, "bad token".into()),
            CivoError::AuthenticationFailed(_)
        ));
        assert!(CivoError::from_status(404, "gone".into()).is_not_found());

        let err: kubeforge_core::Error = CivoError::from_status(403, "nope".into()).into();
        assert!(err.is(ErrorKind::FailedCloudAccountAuth));

        let err: kubeforge_core::Error = CivoError::from_status(500, "boom".into()).into();
        assert!(err.is(ErrorKind::FailedClusterOperation));
        assert!(err.kind().is_retryable());

        let err: kubeforge_core::Error = CivoError::from_status(409, "taken".into()).into();
        assert!(err.is(ErrorKind::DuplicateRecords));
    }
}
