use kubeforge_cloud::{CloudProvider, ClusterMeta, ProviderClient};
use kubeforge_cloud_aws::AwsBackend;
use kubeforge_cloud_azure::AzureBackend;
use kubeforge_cloud_civo::CivoBackend;
use kubeforge_cloud_local::LocalBackend;
use kubeforge_core::Cloud;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Provider for `cloud`, bound to the cluster described by `meta`
pub fn build(
    cloud: Cloud,
    meta: ClusterMeta,
    cancel: CancellationToken,
    span: Span,
) -> Box<dyn CloudProvider> {
    match cloud {
        Cloud::Civo => Box::new(ProviderClient::new(
            CivoBackend::new(span.clone()),
            meta,
            cancel,
            span,
        )),
        Cloud::Aws => Box::new(ProviderClient::new(
            AwsBackend::new(cancel.clone(), span.clone()),
            meta,
            cancel,
            span,
        )),
        Cloud::Azure => Box::new(ProviderClient::new(
            AzureBackend::new(cancel.clone(), span.clone()),
            meta,
            cancel,
            span,
        )),
        Cloud::Local => Box::new(ProviderClient::new(
            LocalBackend::new(span.clone()),
            meta,
            cancel,
            span,
        )),
    }
}
