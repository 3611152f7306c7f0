//! Azure backend error types

use kubeforge_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error(
        "no Azure service principal: set AZURE_SUBSCRIPTION_ID, AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET or run `kubeforge credentials azure`"
    )]
    MissingCredentials,

    #[error("Azure client is not connected")]
    NotConnected,

    #[error("Azure rejected the service principal: {0}")]
    AuthenticationFailed(String),

    #[error("Azure resource not found: {0}")]
    NotFound(String),

    #[error("Azure API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("{resource} ended in provisioning state {state}")]
    ProvisioningFailed { resource: String, state: String },

    #[error("malformed resource id: {0}")]
    InvalidResourceId(String),

    #[error("missing field in Azure response: {0}")]
    MissingField(&'static str),

    #[error("kubeconfig is not valid base64: {0}")]
    Kubeconfig(#[from] base64::DecodeError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AzureError {
    /// Builds the error for a non-success HTTP status
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => AzureError::AuthenticationFailed(message),
            404 => AzureError::NotFound(message),
            _ => AzureError::Api { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AzureError::NotFound(_))
    }

    fn kind(&self) -> ErrorKind {
        match self {
            AzureError::MissingCredentials | AzureError::NotConnected => {
                ErrorKind::MissingConfiguration
            }
            AzureError::AuthenticationFailed(_) => ErrorKind::FailedCloudAccountAuth,
            AzureError::NotFound(_) => ErrorKind::NoMatchingRecordsFound,
            AzureError::Api { status: 409, .. } => ErrorKind::DuplicateRecords,
            AzureError::Api { status: 400, .. } | AzureError::ProvisioningFailed { .. } => {
                ErrorKind::InvalidOperation
            }
            AzureError::Api { .. } | AzureError::Http(_) => ErrorKind::FailedClusterOperation,
            AzureError::InvalidResourceId(_) | AzureError::MissingField(_) => ErrorKind::Internal,
            AzureError::Kubeconfig(_) | AzureError::Json(_) => ErrorKind::Internal,
        }
    }
}

impl From<AzureError> for kubeforge_core::Error {
    fn from(err: AzureError) -> Self {
        let kind = err.kind();
        kubeforge_core::Error::new(kind, format!("azure: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;
