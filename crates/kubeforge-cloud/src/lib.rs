//! kubeforge cloud provisioning
//!
//! Creates, resumes, scales and tears down Kubernetes cluster infrastructure
//! on any cloud that implements [`CloudBackend`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 kubeforge CLI                   │
//! │        (create / delete / scale / list)         │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                kubeforge-cloud                  │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  orchestrator: ordered, resumable steps  │   │
//! │  └──────────────────┬───────────────────────┘   │
//! │  ┌──────────────────▼───────────────────────┐   │
//! │  │  trait CloudProvider                     │   │
//! │  │  ProviderClient<B: CloudBackend>         │──────► kubeforge-storage
//! │  └──────────────────┬───────────────────────┘   │
//! └─────────────────────┼───────────────────────────┘
//!         ┌─────────────┼──────────────┬───────────────┐
//! ┌───────▼──────┐ ┌────▼─────┐ ┌──────▼──────┐ ┌──────▼──────┐
//! │  civo (REST) │ │ aws (SDK)│ │ azure (ARM) │ │ local (kind)│
//! └──────────────┘ └──────────┘ └─────────────┘ └─────────────┘
//! ```

pub mod backend;
pub mod client;
pub mod firewall;
pub mod orchestrator;
pub mod provider;
pub mod ssh;
pub mod summary;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-exports
pub use backend::{
    CloudBackend, FirewallRequest, ManagedClusterRequest, ManagedClusterStatus, VmInstance,
    VmRequest,
};
pub use client::ProviderClient;
pub use firewall::{Direction, FirewallRule, Protocol};
pub use orchestrator::{ClusterPlan, HaPlan, ManagedPlan, NodePlan, ScaleResult};
pub use provider::{
    CloudProvider, CloudResourceState, ClusterMeta, InitOutcome, NodeAddresses, ResourceRequest,
};
pub use summary::{ClusterSummary, list_clusters};
