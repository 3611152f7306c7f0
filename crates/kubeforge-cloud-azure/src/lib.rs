//! Azure backend for kubeforge
//!
//! Provides HA clusters built from Azure virtual machines and AKS managed
//! clusters, talking to Azure Resource Manager over REST. Every resource of a
//! cluster lives in one resource group. Authenticates as a service principal
//! from `AZURE_SUBSCRIPTION_ID`, `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
//! `AZURE_CLIENT_SECRET`, falling back to the principal saved with
//! `kubeforge credentials azure`.

pub mod arm;
pub mod backend;
pub mod error;

pub use arm::ArmApi;
pub use backend::AzureBackend;
pub use error::{AzureError, Result};
