//! File-system backed store under the kubeforge home directory

use crate::{ClusterFilter, ClusterKey, ExportFilter, StorageDriver};
use async_trait::async_trait;
use kubeforge_core::{
    Cloud, ClusterType, CredentialsDocument, Error, ErrorKind, Result, StorageDocument,
    StorageStateExportImport, validate_name, validate_region,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{Span, debug, info, warn};

const STATE_DIR: &str = "state";
const CREDENTIALS_DIR: &str = "credentials";
const STATE_FILE: &str = "state.json";
const USER_ENV: &str = "KUBEFORGE_USER";
const DEFAULT_USER: &str = "default";

const DIR_MODE: u32 = 0o750;
const STATE_MODE: u32 = 0o640;
const CREDENTIALS_MODE: u32 = 0o600;

/// Store rooted at a directory on the local disk
///
/// Reads share a lock and mutations take it exclusively, so a concurrent
/// reader never observes a half written document. [`StorageDriver::kill`]
/// takes the exclusive lock once more and then closes the store.
pub struct LocalStore {
    root: PathBuf,
    binding: Option<ClusterKey>,
    user: String,
    lock: RwLock<()>,
    closed: AtomicBool,
    span: Span,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>, span: Span) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            binding: None,
            user: DEFAULT_USER.to_string(),
            lock: RwLock::new(()),
            closed: AtomicBool::new(false),
            span,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Directory holding one cluster's `state.json`
    pub fn cluster_dir(&self, key: &ClusterKey) -> PathBuf {
        self.type_dir(key.cloud, key.cluster_type)
            .join(format!("{} {}", key.cluster_name, key.region))
    }

    fn type_dir(&self, cloud: Cloud, cluster_type: ClusterType) -> PathBuf {
        self.root
            .join(STATE_DIR)
            .join(cloud.as_str())
            .join(cluster_type.as_str())
    }

    fn credentials_path(&self, cloud: Cloud) -> PathBuf {
        self.root
            .join(CREDENTIALS_DIR)
            .join(format!("{}.json", cloud.as_str()))
    }

    fn bound(&self) -> Result<&ClusterKey> {
        self.binding
            .as_ref()
            .ok_or_else(|| Error::missing_config("storage is not set up for a cluster"))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::internal("storage has been shut down"));
        }
        Ok(())
    }

    async fn read_doc(&self, key: &ClusterKey) -> Result<StorageDocument> {
        let path = self.cluster_dir(key).join(STATE_FILE);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("no cluster record for {key}")));
            }
            Err(e) => return Err(e.into()),
        };
        let doc: StorageDocument = serde_json::from_slice(&content)?;
        doc.check_consistent()?;
        debug!(parent: &self.span, %key, "read cluster state");
        Ok(doc)
    }

    async fn write_doc(&self, key: &ClusterKey, doc: &StorageDocument) -> Result<()> {
        let dir = self.cluster_dir(key);
        let path = dir.join(STATE_FILE);
        let content = serde_json::to_vec(doc)?;
        self.in_cluster_dir(&dir, || write_atomic(&path, &content, STATE_MODE))
            .await?;

        debug!(parent: &self.span, %key, "wrote cluster state");
        Ok(())
    }

    /// Runs `write` with `dir` in place
    ///
    /// A directory created here is removed again when `write` fails, so a
    /// failed first write leaves the cluster absent.
    async fn in_cluster_dir<F, Fut>(&self, dir: &Path, write: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let created = !fs::try_exists(dir).await?;
        if created {
            create_dir(dir).await?;
            debug!(parent: &self.span, dir = %dir.display(), "created cluster directory");
        }

        let result = write().await;
        if result.is_err()
            && created
            && let Err(e) = fs::remove_dir_all(dir).await
        {
            warn!(
                parent: &self.span,
                dir = %dir.display(),
                error = %e,
                "failed to remove cluster directory after a failed first write"
            );
        }
        result
    }

    async fn list(
        &self,
        filter: &ClusterFilter,
    ) -> Result<HashMap<ClusterType, Vec<StorageDocument>>> {
        let mut clusters: HashMap<ClusterType, Vec<StorageDocument>> = HashMap::new();

        for cluster_type in filter.cluster_types() {
            let docs = clusters.entry(cluster_type).or_default();

            for cloud in filter.clouds() {
                let dir = self.type_dir(cloud, cluster_type);
                if !fs::try_exists(&dir).await? {
                    continue;
                }

                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if !entry.file_type().await?.is_dir() {
                        continue;
                    }
                    match fs::read(entry.path().join(STATE_FILE)).await {
                        Ok(content) => docs.push(serde_json::from_slice(&content)?),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            docs.sort_by(|a, b| {
                (a.infra_provider, &a.cluster_name, &a.region).cmp(&(
                    b.infra_provider,
                    &b.cluster_name,
                    &b.region,
                ))
            });
        }

        Ok(clusters)
    }

    async fn read_creds(&self, cloud: Cloud) -> Result<CredentialsDocument> {
        let path = self.credentials_path(cloud);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("no credentials stored for {cloud}")));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content).map_err(|e| {
            Error::new(
                ErrorKind::NilCredentials,
                format!("credentials for {cloud} are unreadable"),
            )
            .with_source(e)
        })
    }

    async fn write_creds(&self, cloud: Cloud, doc: &CredentialsDocument) -> Result<()> {
        if doc.infra_provider != cloud {
            return Err(Error::new(
                ErrorKind::InvalidCloudProvider,
                format!(
                    "credentials for {} cannot be stored as {cloud}",
                    doc.infra_provider
                ),
            ));
        }

        let dir = self.root.join(CREDENTIALS_DIR);
        if !fs::try_exists(&dir).await? {
            create_dir(&dir).await?;
        }

        let content = serde_json::to_vec(doc)?;
        write_atomic(&self.credentials_path(cloud), &content, CREDENTIALS_MODE).await?;
        debug!(parent: &self.span, %cloud, "wrote credentials");
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for LocalStore {
    fn setup(
        &mut self,
        cloud: Cloud,
        region: &str,
        cluster_name: &str,
        cluster_type: ClusterType,
    ) -> Result<()> {
        validate_name(cluster_name)?;
        validate_region(region)?;

        self.binding = Some(ClusterKey::new(cloud, cluster_type, cluster_name, region));
        Ok(())
    }

    fn binding(&self) -> Option<&ClusterKey> {
        self.binding.as_ref()
    }

    async fn connect(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.user = std::env::var(USER_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        info!(
            parent: &self.span,
            user = %self.user,
            root = %self.root.display(),
            "connected to local storage"
        );
        Ok(())
    }

    async fn read(&self) -> Result<StorageDocument> {
        let _guard = self.lock.read().await;
        self.ensure_open()?;
        let key = self.bound()?;
        self.read_doc(key).await
    }

    async fn write(&self, doc: &StorageDocument) -> Result<()> {
        let _guard = self.lock.write().await;
        self.ensure_open()?;
        let key = self.bound()?;
        self.write_doc(key, doc).await
    }

    async fn delete_cluster(&self) -> Result<()> {
        let _guard = self.lock.write().await;
        self.ensure_open()?;
        let key = self.bound()?;

        let dir = self.cluster_dir(key);
        if !fs::try_exists(&dir).await? {
            return Err(Error::not_found(format!("no cluster record for {key}")));
        }
        fs::remove_dir_all(&dir).await?;
        info!(parent: &self.span, %key, "deleted cluster record");
        Ok(())
    }

    async fn already_created(
        &mut self,
        cloud: Cloud,
        region: &str,
        cluster_name: &str,
        cluster_type: ClusterType,
    ) -> Result<()> {
        self.setup(cloud, region, cluster_name, cluster_type)?;

        let _guard = self.lock.read().await;
        self.ensure_open()?;
        let key = self.bound()?;
        if fs::try_exists(self.cluster_dir(key).join(STATE_FILE)).await? {
            Ok(())
        } else {
            Err(Error::not_found(format!("cluster {key} does not exist")))
        }
    }

    async fn get_one_or_more_clusters(
        &self,
        filter: &ClusterFilter,
    ) -> Result<HashMap<ClusterType, Vec<StorageDocument>>> {
        let _guard = self.lock.read().await;
        self.ensure_open()?;
        self.list(filter).await
    }

    async fn read_credentials(&self, cloud: Cloud) -> Result<CredentialsDocument> {
        let _guard = self.lock.read().await;
        self.ensure_open()?;
        self.read_creds(cloud).await
    }

    async fn write_credentials(&self, cloud: Cloud, doc: &CredentialsDocument) -> Result<()> {
        let _guard = self.lock.write().await;
        self.ensure_open()?;
        self.write_creds(cloud, doc).await
    }

    async fn export(&self, filter: &ExportFilter) -> Result<StorageStateExportImport> {
        let _guard = self.lock.read().await;
        self.ensure_open()?;

        let mut bundle = StorageStateExportImport::default();

        let clusters = self.list(&filter.clusters()).await?;
        for cluster_type in ClusterType::ALL {
            let Some(docs) = clusters.get(&cluster_type) else {
                continue;
            };
            let selected = docs.iter().filter(|doc| match (&filter.cluster_name, &filter.region) {
                (Some(name), Some(region)) => &doc.cluster_name == name && &doc.region == region,
                _ => true,
            });
            bundle.clusters.extend(selected.cloned());
        }

        for cloud in filter.clusters().clouds() {
            match self.read_creds(cloud).await {
                Ok(doc) => bundle.credentials.push(doc),
                Err(e) if e.is(ErrorKind::NoMatchingRecordsFound) => continue,
                Err(e) => return Err(e),
            }
        }

        info!(
            parent: &self.span,
            clusters = bundle.clusters.len(),
            credentials = bundle.credentials.len(),
            "exported storage"
        );
        Ok(bundle)
    }

    async fn import(&self, bundle: &StorageStateExportImport) -> Result<()> {
        let _guard = self.lock.write().await;
        self.ensure_open()?;

        // Nothing is written unless every record is acceptable
        for doc in &bundle.clusters {
            validate_name(&doc.cluster_name)?;
            validate_region(&doc.region)?;
            doc.check_consistent()?;
        }
        for doc in &bundle.clusters {
            self.write_doc(&ClusterKey::of(doc), doc).await?;
        }
        for creds in &bundle.credentials {
            self.write_creds(creds.infra_provider, creds).await?;
        }

        info!(
            parent: &self.span,
            clusters = bundle.clusters.len(),
            credentials = bundle.credentials.len(),
            "imported storage"
        );
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let _guard = self.lock.write().await;
        self.closed.store(true, Ordering::SeqCst);
        info!(parent: &self.span, "storage shut down");
        Ok(())
    }
}

async fn create_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(path).await?;
    Ok(())
}

/// Writes through a sibling temp file and renames it into place
async fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let tmp = path.with_extension("json.tmp");

    let result: std::io::Result<()> = async {
        fs::write(&tmp, content).await?;
        set_mode(&tmp, mode).await?;
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeforge_core::{CivoNetwork, CloudInfra, InfrastructureState};
    use tempfile::tempdir;

    fn store(root: &Path) -> LocalStore {
        LocalStore::new(root, Span::none())
    }

    fn civo_doc(name: &str, region: &str) -> StorageDocument {
        let mut doc = StorageDocument::new(Cloud::Civo, ClusterType::Ha, name, region);
        let mut infra = CloudInfra::<CivoNetwork>::default();
        infra.network.network_id = "net-1".into();
        infra.worker_planes.resize(2);
        doc.cloud_infra = Some(InfrastructureState {
            civo: Some(infra),
            ..Default::default()
        });
        doc
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();

        let doc = civo_doc("demo", "LON1");
        store.write(&doc).await.unwrap();

        assert_eq!(store.read().await.unwrap(), doc);
        assert!(
            temp_dir
                .path()
                .join("state/civo/ha/demo LON1/state.json")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Aws, "us-east-1", "ghost", ClusterType::Ha).unwrap();

        let err = store.read().await.unwrap_err();
        assert!(err.is(ErrorKind::NoMatchingRecordsFound));
    }

    #[tokio::test]
    async fn test_read_without_setup_fails() {
        let temp_dir = tempdir().unwrap();
        let store = store(temp_dir.path());

        let err = store.read().await.unwrap_err();
        assert!(err.is(ErrorKind::MissingConfiguration));
    }

    #[tokio::test]
    async fn test_setup_rejects_bad_name() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());

        let err = store
            .setup(Cloud::Civo, "LON1", "Bad Name", ClusterType::Ha)
            .unwrap_err();
        assert!(err.is(ErrorKind::InvalidResourceName));
    }

    #[tokio::test]
    async fn test_delete_cluster() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();
        store.write(&civo_doc("demo", "LON1")).await.unwrap();

        store.delete_cluster().await.unwrap();
        assert!(store.read().await.unwrap_err().is(ErrorKind::NoMatchingRecordsFound));

        let err = store.delete_cluster().await.unwrap_err();
        assert!(err.is(ErrorKind::NoMatchingRecordsFound));
    }

    #[tokio::test]
    async fn test_already_created() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());

        let err = store
            .already_created(Cloud::Civo, "LON1", "demo", ClusterType::Ha)
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::NoMatchingRecordsFound));

        store.write(&civo_doc("demo", "LON1")).await.unwrap();
        store
            .already_created(Cloud::Civo, "LON1", "demo", ClusterType::Ha)
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();
        store.write(&civo_doc("demo", "LON1")).await.unwrap();
        store
            .write_credentials(Cloud::Civo, &CredentialsDocument::civo("token"))
            .await
            .unwrap();

        let state = std::fs::metadata(temp_dir.path().join("state/civo/ha/demo LON1/state.json"))
            .unwrap();
        assert_eq!(state.permissions().mode() & 0o777, STATE_MODE);

        let creds = std::fs::metadata(temp_dir.path().join("credentials/civo.json")).unwrap();
        assert_eq!(creds.permissions().mode() & 0o777, CREDENTIALS_MODE);
    }

    #[tokio::test]
    async fn test_credentials_round_trip() {
        let temp_dir = tempdir().unwrap();
        let store = store(temp_dir.path());

        let err = store.read_credentials(Cloud::Aws).await.unwrap_err();
        assert!(err.is(ErrorKind::NoMatchingRecordsFound));

        let creds = CredentialsDocument::aws("AKIA", "secret");
        store.write_credentials(Cloud::Aws, &creds).await.unwrap();
        assert_eq!(store.read_credentials(Cloud::Aws).await.unwrap(), creds);
    }

    #[tokio::test]
    async fn test_credentials_cloud_mismatch_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = store(temp_dir.path());

        let err = store
            .write_credentials(Cloud::Aws, &CredentialsDocument::civo("token"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::InvalidCloudProvider));
    }

    #[tokio::test]
    async fn test_corrupt_credentials_are_nil() {
        let temp_dir = tempdir().unwrap();
        let store = store(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join("credentials")).unwrap();
        std::fs::write(temp_dir.path().join("credentials/civo.json"), "not json").unwrap();

        let err = store.read_credentials(Cloud::Civo).await.unwrap_err();
        assert!(err.is(ErrorKind::NilCredentials));
    }

    #[tokio::test]
    async fn test_kill_refuses_new_operations() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();

        store.kill().await.unwrap();

        let err = store.write(&civo_doc("demo", "LON1")).await.unwrap_err();
        assert!(err.is(ErrorKind::Internal));
        assert!(store.read_credentials(Cloud::Civo).await.is_err());
    }

    #[tokio::test]
    async fn test_setup_rejects_bad_region() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());

        for region in ["", "../LON1", "LON1/x"] {
            let err = store
                .setup(Cloud::Civo, region, "demo", ClusterType::Ha)
                .unwrap_err();
            assert!(err.is(ErrorKind::InvalidCloudRegion), "{region}");
        }
        assert!(store.binding().is_none());
    }

    #[tokio::test]
    async fn test_failed_first_write_removes_directory() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();
        let dir = store.cluster_dir(store.bound().unwrap());

        let err = store
            .in_cluster_dir(&dir, || async { Err(Error::internal("disk full")) })
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::Internal));
        assert!(!dir.exists());
        assert!(store.read().await.unwrap_err().is(ErrorKind::NoMatchingRecordsFound));

        // a directory that was already there is left alone
        store.write(&civo_doc("demo", "LON1")).await.unwrap();
        store
            .in_cluster_dir(&dir, || async { Err(Error::internal("disk full")) })
            .await
            .unwrap_err();
        assert!(dir.exists());
        assert_eq!(store.read().await.unwrap(), civo_doc("demo", "LON1"));
    }

    #[tokio::test]
    async fn test_kill_waits_for_in_flight_operations() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();
        let store = std::sync::Arc::new(store);

        // stands in for a read that is still running
        let in_flight = store.lock.read().await;

        let killer = tokio::spawn({
            let store = store.clone();
            async move { store.kill().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!killer.is_finished());
        assert!(!store.closed.load(Ordering::SeqCst));

        drop(in_flight);
        killer.await.unwrap().unwrap();
        assert!(store.closed.load(Ordering::SeqCst));
        assert!(store.read().await.unwrap_err().is(ErrorKind::Internal));
    }

    #[tokio::test]
    async fn test_misaligned_record_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let mut store = store(temp_dir.path());
        store.setup(Cloud::Civo, "LON1", "demo", ClusterType::Ha).unwrap();

        let mut doc = civo_doc("demo", "LON1");
        let mut value = serde_json::to_value(&doc).unwrap();
        value["cloud_infrastructure_state"]["civo"]["info_worker_planes"]["private_ips"] =
            serde_json::json!(["10.0.0.1"]);
        let dir = store.cluster_dir(store.bound().unwrap());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(STATE_FILE), value.to_string()).unwrap();

        let err = store.read().await.unwrap_err();
        assert!(err.is(ErrorKind::Internal));

        doc.cluster_name = "other".into();
        let infra = doc.cloud_infra.as_mut().unwrap().civo.as_mut().unwrap();
        infra.worker_planes.vm_sizes.push("g3.large".into());
        let bundle = StorageStateExportImport {
            clusters: vec![doc],
            credentials: vec![],
        };
        let err = store.import(&bundle).await.unwrap_err();
        assert!(err.is(ErrorKind::Internal));
        assert!(!temp_dir.path().join("state/civo/ha/other LON1").exists());
    }
}
