use kubeforge_core::{
    AwsNetwork, CivoNetwork, Cloud, CloudInfra, ClusterType, CredentialsDocument, ErrorKind,
    InfrastructureState, StorageDocument, StorageStateExportImport,
};
use kubeforge_storage::{ClusterFilter, ClusterKey, ExportFilter, LocalStore, StorageDriver};
use tempfile::tempdir;
use tracing::Span;

fn doc(cloud: Cloud, cluster_type: ClusterType, name: &str, region: &str) -> StorageDocument {
    let mut doc = StorageDocument::new(cloud, cluster_type, name, region);
    let mut infra = InfrastructureState::default();
    match cloud {
        Cloud::Aws => {
            let mut aws = CloudInfra::<AwsNetwork>::default();
            aws.network.vpc_id = format!("vpc-{name}");
            infra.aws = Some(aws);
        }
        _ => {
            let mut civo = CloudInfra::<CivoNetwork>::default();
            civo.network.network_id = format!("net-{name}");
            civo.control_planes.resize(3);
            infra.civo = Some(civo);
        }
    }
    doc.cloud_infra = Some(infra);
    doc
}

async fn seed(store: &mut LocalStore, docs: &[StorageDocument]) {
    for d in docs {
        store
            .setup(d.infra_provider, &d.region, &d.cluster_name, d.cluster_type)
            .unwrap();
        store.write(d).await.unwrap();
    }
}

#[tokio::test]
async fn test_list_clusters_with_wildcards_and_filters() {
    let temp_dir = tempdir().unwrap();
    let mut store = LocalStore::new(temp_dir.path(), Span::none());
    seed(
        &mut store,
        &[
            doc(Cloud::Civo, ClusterType::Ha, "alpha", "LON1"),
            doc(Cloud::Civo, ClusterType::Managed, "beta", "FRA1"),
            doc(Cloud::Aws, ClusterType::Ha, "gamma", "us-east-1"),
        ],
    )
    .await;

    let all = store
        .get_one_or_more_clusters(&ClusterFilter::default())
        .await
        .unwrap();
    assert_eq!(all[&ClusterType::Ha].len(), 2);
    assert_eq!(all[&ClusterType::Managed].len(), 1);

    let civo_ha = store
        .get_one_or_more_clusters(&ClusterFilter {
            cloud: Some(Cloud::Civo),
            cluster_type: Some(ClusterType::Ha),
        })
        .await
        .unwrap();
    assert_eq!(civo_ha.len(), 1);
    assert_eq!(civo_ha[&ClusterType::Ha][0].cluster_name, "alpha");

    let local = store
        .get_one_or_more_clusters(&ClusterFilter {
            cloud: Some(Cloud::Local),
            cluster_type: None,
        })
        .await
        .unwrap();
    assert!(local.values().all(Vec::is_empty));
}

#[tokio::test]
async fn test_export_then_import_reproduces_store() {
    let source_dir = tempdir().unwrap();
    let mut source = LocalStore::new(source_dir.path(), Span::none());
    let docs = [
        doc(Cloud::Civo, ClusterType::Ha, "alpha", "LON1"),
        doc(Cloud::Aws, ClusterType::Ha, "gamma", "us-east-1"),
    ];
    seed(&mut source, &docs).await;
    source
        .write_credentials(Cloud::Civo, &CredentialsDocument::civo("civo-token"))
        .await
        .unwrap();

    let bound_before = source.binding().cloned();
    let bundle = source.export(&ExportFilter::default()).await.unwrap();
    assert_eq!(source.binding().cloned(), bound_before);
    assert_eq!(bundle.clusters.len(), 2);
    assert_eq!(bundle.credentials.len(), 1);

    let target_dir = tempdir().unwrap();
    let mut target = LocalStore::new(target_dir.path(), Span::none());
    target.import(&bundle).await.unwrap();

    for d in &docs {
        let key = ClusterKey::of(d);
        target
            .setup(key.cloud, &key.region, &key.cluster_name, key.cluster_type)
            .unwrap();
        assert_eq!(&target.read().await.unwrap(), d);
    }
    assert_eq!(
        target.read_credentials(Cloud::Civo).await.unwrap(),
        CredentialsDocument::civo("civo-token")
    );
}

#[tokio::test]
async fn test_export_narrows_by_name_only_with_region() {
    let temp_dir = tempdir().unwrap();
    let mut store = LocalStore::new(temp_dir.path(), Span::none());
    seed(
        &mut store,
        &[
            doc(Cloud::Civo, ClusterType::Ha, "alpha", "LON1"),
            doc(Cloud::Civo, ClusterType::Ha, "beta", "LON1"),
        ],
    )
    .await;

    let name_only = store
        .export(&ExportFilter {
            cloud: Some(Cloud::Civo),
            cluster_name: Some("alpha".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(name_only.clusters.len(), 2);

    let exact = store
        .export(&ExportFilter {
            cloud: Some(Cloud::Civo),
            cluster_name: Some("alpha".into()),
            region: Some("LON1".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(exact.clusters.len(), 1);
    assert_eq!(exact.clusters[0].cluster_name, "alpha");
    assert!(exact.credentials.is_empty());
}

#[tokio::test]
async fn test_concurrent_readers_see_whole_documents() {
    let temp_dir = tempdir().unwrap();
    let mut store = LocalStore::new(temp_dir.path(), Span::none());
    let original = doc(Cloud::Civo, ClusterType::Ha, "alpha", "LON1");
    seed(&mut store, std::slice::from_ref(&original)).await;

    let store = std::sync::Arc::new(store);
    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let mut next = original.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                next.cluster_kubeconfig = format!("config-{i}");
                store.write(&next).await.unwrap();
            }
            let read = store.read().await.unwrap();
            assert_eq!(read.cluster_name, "alpha");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_import_rejects_region_outside_store() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path().join("root");
    let store = LocalStore::new(&root, Span::none());

    let good = doc(Cloud::Civo, ClusterType::Ha, "alpha", "LON1");
    let escaping = doc(Cloud::Civo, ClusterType::Ha, "beta", "x/../../../../../escaped");
    let bundle = StorageStateExportImport {
        clusters: vec![good, escaping],
        credentials: vec![CredentialsDocument::civo("token")],
    };

    let err = store.import(&bundle).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidCloudRegion));
    assert!(!temp_dir.path().join("escaped").exists());
    assert!(!root.join("state").exists());
    assert!(!root.join("credentials").exists());
}
