//! AWS backend error types

use aws_sdk_ec2::config::http::HttpResponse;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use kubeforge_core::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error(
        "no AWS credentials: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY or run `kubeforge credentials aws`"
    )]
    MissingCredentials,

    #[error("EC2 client is not connected")]
    NotConnected,

    #[error("EC2 {code}: {message}")]
    Api { code: String, message: String },

    #[error("EC2 response is missing {0}")]
    MissingField(&'static str),

    #[error("no Ubuntu image found in the region")]
    ImageNotFound,
}

const AUTH_CODES: [&str; 5] = [
    "AuthFailure",
    "UnauthorizedOperation",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "OptInRequired",
];

impl AwsError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        AwsError::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// `InvalidVpcID.NotFound`, `InvalidGroup.NotFound` and friends
    pub fn is_not_found(&self) -> bool {
        self.code()
            .is_some_and(|code| code.ends_with(".NotFound") || code == "Gateway.NotAttached")
    }

    fn kind(&self) -> ErrorKind {
        match self {
            AwsError::MissingCredentials | AwsError::NotConnected => {
                ErrorKind::MissingConfiguration
            }
            AwsError::Api { code, .. } if AUTH_CODES.contains(&code.as_str()) => {
                ErrorKind::FailedCloudAccountAuth
            }
            AwsError::Api { code, .. } if code == "InvalidKeyPair.Duplicate" => {
                ErrorKind::DuplicateRecords
            }
            _ if self.is_not_found() => ErrorKind::NoMatchingRecordsFound,
            AwsError::Api { .. } | AwsError::ImageNotFound => ErrorKind::FailedClusterOperation,
            AwsError::MissingField(_) => ErrorKind::Internal,
        }
    }
}

impl<E> From<SdkError<E, HttpResponse>> for AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    fn from(err: SdkError<E, HttpResponse>) -> Self {
        let code = err.code().unwrap_or_default().to_string();
        let message = match err.message() {
            Some(message) => message.to_string(),
            None => DisplayErrorContext(&err).to_string(),
        };
        AwsError::Api { code, message }
    }
}

impl From<AwsError> for kubeforge_core::Error {
    fn from(err: AwsError) -> Self {
        let kind = err.kind();
        kubeforge_core::Error::new(kind, format!("aws: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
