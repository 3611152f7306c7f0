//! kubeforge storage
//!
//! Persists one state document per cluster plus one credentials document per
//! cloud. Records are keyed by (cloud, cluster type, cluster name, region).
//!
//! ```text
//! <root>/
//! ├── state/<cloud>/<clusterType>/<clusterName> <region>/state.json
//! └── credentials/<cloud>.json
//! ```

pub mod local;

pub use local::LocalStore;

use async_trait::async_trait;
use kubeforge_core::{
    Cloud, ClusterType, CredentialsDocument, Result, StorageDocument, StorageStateExportImport,
};
use std::collections::HashMap;
use std::fmt;

/// Identity of one cluster record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub cloud: Cloud,
    pub cluster_type: ClusterType,
    pub cluster_name: String,
    pub region: String,
}

impl ClusterKey {
    pub fn new(
        cloud: Cloud,
        cluster_type: ClusterType,
        cluster_name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            cloud,
            cluster_type,
            cluster_name: cluster_name.into(),
            region: region.into(),
        }
    }

    /// Key under which a document is stored
    pub fn of(doc: &StorageDocument) -> Self {
        Self::new(
            doc.infra_provider,
            doc.cluster_type,
            doc.cluster_name.clone(),
            doc.region.clone(),
        )
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {}",
            self.cloud, self.cluster_type, self.cluster_name, self.region
        )
    }
}

/// Selects clusters when listing; `None` matches everything
#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    pub cloud: Option<Cloud>,
    pub cluster_type: Option<ClusterType>,
}

impl ClusterFilter {
    pub fn clouds(&self) -> Vec<Cloud> {
        match self.cloud {
            Some(cloud) => vec![cloud],
            None => Cloud::ALL.to_vec(),
        }
    }

    pub fn cluster_types(&self) -> Vec<ClusterType> {
        match self.cluster_type {
            Some(t) => vec![t],
            None => ClusterType::ALL.to_vec(),
        }
    }
}

/// Selects what [`StorageDriver::export`] bundles
///
/// The name/region narrowing applies only when both are given.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub cloud: Option<Cloud>,
    pub cluster_type: Option<ClusterType>,
    pub cluster_name: Option<String>,
    pub region: Option<String>,
}

impl ExportFilter {
    pub fn clusters(&self) -> ClusterFilter {
        ClusterFilter {
            cloud: self.cloud,
            cluster_type: self.cluster_type,
        }
    }
}

/// Durable document store for cluster state and cloud credentials
///
/// `read`, `write` and `delete_cluster` act on the cluster bound by the
/// last `setup`. Listing, credentials and export/import take explicit keys and
/// never change the binding.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Binds the driver to one cluster
    fn setup(
        &mut self,
        cloud: Cloud,
        region: &str,
        cluster_name: &str,
        cluster_type: ClusterType,
    ) -> Result<()>;

    /// Cluster currently bound, if any
    fn binding(&self) -> Option<&ClusterKey>;

    /// Prepares the backing store for the calling user
    async fn connect(&mut self) -> Result<()>;

    /// Reads the bound cluster's document
    ///
    /// Fails with `NoMatchingRecordsFound` when no record exists.
    async fn read(&self) -> Result<StorageDocument>;

    /// Persists the bound cluster's document atomically
    async fn write(&self, doc: &StorageDocument) -> Result<()>;

    /// Removes the bound cluster's record
    async fn delete_cluster(&self) -> Result<()>;

    /// Binds to the given cluster and reports whether its record exists
    ///
    /// `Ok(())` when present, `NoMatchingRecordsFound` otherwise.
    async fn already_created(
        &mut self,
        cloud: Cloud,
        region: &str,
        cluster_name: &str,
        cluster_type: ClusterType,
    ) -> Result<()>;

    /// Lists documents grouped by cluster type
    async fn get_one_or_more_clusters(
        &self,
        filter: &ClusterFilter,
    ) -> Result<HashMap<ClusterType, Vec<StorageDocument>>>;

    async fn read_credentials(&self, cloud: Cloud) -> Result<CredentialsDocument>;

    async fn write_credentials(&self, cloud: Cloud, doc: &CredentialsDocument) -> Result<()>;

    /// Bundles matching clusters and stored credentials
    async fn export(&self, filter: &ExportFilter) -> Result<StorageStateExportImport>;

    /// Replays a bundle into this store
    async fn import(&self, bundle: &StorageStateExportImport) -> Result<()>;

    /// Waits for in-flight operations, then refuses new ones
    async fn kill(&self) -> Result<()>;
}
