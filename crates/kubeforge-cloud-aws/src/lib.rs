//! AWS backend for kubeforge
//!
//! HA clusters on EC2. Credentials come from `AWS_ACCESS_KEY_ID` /
//! `AWS_SECRET_ACCESS_KEY` or from `kubeforge credentials aws`.

pub mod backend;
pub mod ec2;
pub mod error;

pub use backend::AwsBackend;
pub use error::{AwsError, Result};
