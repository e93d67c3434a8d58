use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::{
    api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersion,
    discovery::{self, Scope},
    Api, Client, ResourceExt as _,
};
use readiness_crds::{
    Capability, CapabilityStatus, ReadinessProvider, ReadinessProviderStatus,
    ResourceExistenceCondition, CONTROLLER_NAME,
};
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a Capability, `None` if it does not exist.
    async fn get_capability(&self, name: &str) -> Result<Option<Capability>>;

    async fn patch_capability_status(&self, name: &str, status: &CapabilityStatus) -> Result<()>;

    async fn list_readiness_providers(&self) -> Result<Vec<ReadinessProvider>>;

    async fn create_readiness_provider(
        &self,
        provider: &ReadinessProvider,
    ) -> Result<ReadinessProvider>;

    /// Replace a ReadinessProvider's metadata and spec. Status is untouched.
    async fn replace_readiness_provider(
        &self,
        provider: &ReadinessProvider,
    ) -> Result<ReadinessProvider>;

    async fn patch_readiness_provider_status(
        &self,
        name: &str,
        status: &ReadinessProviderStatus,
    ) -> Result<()>;

    /// Whether the object referenced by `reference` exists.
    async fn resource_exists(&self, reference: &ResourceExistenceCondition) -> Result<bool>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> Result<ConfigMap>;

    /// Replace a ConfigMap. The write is rejected with a conflict if the
    /// resourceVersion it carries is no longer current.
    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// Delete a Pod. Deleting a Pod that is already gone succeeds.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_capability(&self, name: &str) -> Result<Option<Capability>> {
        Ok(Api::<Capability>::all(self.client.clone())
            .get_opt(name)
            .await?)
    }

    async fn patch_capability_status(&self, name: &str, status: &CapabilityStatus) -> Result<()> {
        Api::<Capability>::all(self.client.clone())
            .patch_status(
                name,
                &PatchParams::apply(CONTROLLER_NAME),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;

        Ok(())
    }

    async fn list_readiness_providers(&self) -> Result<Vec<ReadinessProvider>> {
        Ok(Api::<ReadinessProvider>::all(self.client.clone())
            .list(&ListParams::default())
            .await?
            .items)
    }

    async fn create_readiness_provider(
        &self,
        provider: &ReadinessProvider,
    ) -> Result<ReadinessProvider> {
        Ok(Api::<ReadinessProvider>::all(self.client.clone())
            .create(&PostParams::default(), provider)
            .await?)
    }

    async fn replace_readiness_provider(
        &self,
        provider: &ReadinessProvider,
    ) -> Result<ReadinessProvider> {
        Ok(Api::<ReadinessProvider>::all(self.client.clone())
            .replace(&provider.name_any(), &PostParams::default(), provider)
            .await?)
    }

    async fn patch_readiness_provider_status(
        &self,
        name: &str,
        status: &ReadinessProviderStatus,
    ) -> Result<()> {
        Api::<ReadinessProvider>::all(self.client.clone())
            .patch_status(
                name,
                &PatchParams::apply(CONTROLLER_NAME),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;

        Ok(())
    }

    async fn resource_exists(&self, reference: &ResourceExistenceCondition) -> Result<bool> {
        let group_version: GroupVersion = reference.api_version.parse().map_err(|err| {
            Error::invalid_reference(format!("apiVersion {}: {err}", reference.api_version))
        })?;
        let gvk = group_version.with_kind(&reference.kind);

        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk).await?;

        let api = match (capabilities.scope, reference.namespace.as_deref()) {
            (Scope::Cluster, _) => Api::<DynamicObject>::all_with(self.client.clone(), &resource),
            (Scope::Namespaced, Some(namespace)) => {
                Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, &resource)
            }
            (Scope::Namespaced, None) => {
                return Err(Error::invalid_reference(format!(
                    "namespace required for namespaced kind {}",
                    reference.kind
                )))
            }
        };

        Ok(api.get_opt(&reference.name).await?.is_some())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?)
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap> {
        Ok(Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), config_map)
            .await?)
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap> {
        Ok(Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .replace(&config_map.name_any(), &PostParams::default(), config_map)
            .await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(Api::<Pod>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        Ok(Api::<Pod>::namespaced(self.client.clone(), namespace)
            .create(&PostParams::default(), pod)
            .await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match Api::<Pod>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
