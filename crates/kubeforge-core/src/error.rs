//! Error model shared by every kubeforge crate

use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of a failure
///
/// Callers branch on the kind; the human readable reason travels alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidCloudProvider,
    InvalidClusterType,
    InvalidOperation,
    InvalidRole,
    InvalidResourceName,
    InvalidNoOfControlplane,
    InvalidNoOfDatastore,
    InvalidNoOfWorkerplane,
    InvalidCloudRegion,
    InvalidCloudVmSize,
    InvalidVersion,
    FailedCloudAccountAuth,
    FailedClusterOperation,
    FailedKubernetesClient,
    ContextCancelled,
    TimeOut,
    NoMatchingRecordsFound,
    DuplicateRecords,
    NilCredentials,
    MissingConfiguration,
    Internal,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCloudProvider => "InvalidCloudProvider",
            ErrorKind::InvalidClusterType => "InvalidClusterType",
            ErrorKind::InvalidOperation => "InvalidOperation",
            ErrorKind::InvalidRole => "InvalidRole",
            ErrorKind::InvalidResourceName => "InvalidResourceName",
            ErrorKind::InvalidNoOfControlplane => "InvalidNoOfControlplane",
            ErrorKind::InvalidNoOfDatastore => "InvalidNoOfDatastore",
            ErrorKind::InvalidNoOfWorkerplane => "InvalidNoOfWorkerplane",
            ErrorKind::InvalidCloudRegion => "InvalidCloudRegion",
            ErrorKind::InvalidCloudVmSize => "InvalidCloudVmSize",
            ErrorKind::InvalidVersion => "InvalidVersion",
            ErrorKind::FailedCloudAccountAuth => "FailedCloudAccountAuth",
            ErrorKind::FailedClusterOperation => "FailedClusterOperation",
            ErrorKind::FailedKubernetesClient => "FailedKubernetesClient",
            ErrorKind::ContextCancelled => "ContextCancelled",
            ErrorKind::TimeOut => "TimeOut",
            ErrorKind::NoMatchingRecordsFound => "NoMatchingRecordsFound",
            ErrorKind::DuplicateRecords => "DuplicateRecords",
            ErrorKind::NilCredentials => "NilCredentials",
            ErrorKind::MissingConfiguration => "MissingConfiguration",
            ErrorKind::Internal => "Internal",
            ErrorKind::Unknown => "Unknown",
        }
    }

    /// Whether a wait loop may try the same call again after this failure
    ///
    /// Validation and authentication failures never heal on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::FailedClusterOperation
                | ErrorKind::TimeOut
                | ErrorKind::Internal
                | ErrorKind::Unknown
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// kubeforge error: a kind, a reason and an optional underlying cause
#[derive(Error, Debug)]
#[error("{kind}: {reason}")]
pub struct Error {
    kind: ErrorKind,
    reason: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            source: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoMatchingRecordsFound, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, reason)
    }

    pub fn operation_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedClusterOperation, reason)
    }

    pub fn missing_config(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingConfiguration, reason)
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedCloudAccountAuth, reason)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::internal(format!("io: {err}")).with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal(format!("json: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
