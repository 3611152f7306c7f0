//! kubeforge core
//!
//! Types shared by the storage driver, the provider engine and the CLI:
//!
//! - [`state`]: the persisted cluster document and its per-provider sub-documents
//! - [`error`]: the kind/reason error model every crate converts into
//! - [`retry`]: bounded exponential backoff with cancellation
//! - [`types`]: cloud, cluster type, role and operation tags

pub mod error;
pub mod retry;
pub mod state;
pub mod types;
pub mod validate;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use retry::{RetryConfig, Waiter};
pub use state::{
    AwsCredentials, AwsNetwork, AzureCredentials, AzureNetwork, BaseInfra, CivoCredentials,
    CivoNetwork, CloudInfra, CredentialsDocument, InfrastructureState, KubernetesAddons,
    LoadBalancer, LocalNetwork, ManagedState, NetworkState, NodeCounts, SshKeyPairState,
    StorageDocument, StorageStateExportImport, VmSet, VmSlot,
};
pub use types::{Cloud, ClusterType, KubernetesDistro, Operation, Role};
pub use validate::{validate_name, validate_quorum, validate_region};
