//! Local Kubernetes clusters for kubeforge, backed by kind

pub mod backend;
pub mod error;
pub mod kind;

pub use backend::LocalBackend;
pub use error::{LocalError, Result};
pub use kind::Kind;
