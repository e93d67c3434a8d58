use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus};
use kube::{core::ErrorResponse, ResourceExt as _};
use readiness_crds::{
    Capability, CapabilityStatus, ReadinessProvider, ReadinessProviderStatus,
    ResourceExistenceCondition,
};

use crate::{
    client::KubeClient,
    error::{Error, Result},
};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
struct State {
    capabilities: BTreeMap<String, Capability>,
    providers: BTreeMap<String, ReadinessProvider>,
    config_maps: BTreeMap<Key, ConfigMap>,
    pods: BTreeMap<Key, Pod>,
    existing: Vec<ResourceExistenceCondition>,
    resource_version: u64,
    concurrent_writes: BTreeMap<Key, BTreeMap<String, String>>,
    provider_creates: usize,
    provider_replaces: usize,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_capability(&self, mut capability: Capability) {
        let mut state = self.state.lock().unwrap();
        capability.metadata.uid = Some(format!("{}-uid", capability.name_any()));
        capability.metadata.resource_version = Some(state.next_resource_version());
        state
            .capabilities
            .insert(capability.name_any(), capability);
    }

    pub fn capability(&self, name: &str) -> Option<Capability> {
        self.state.lock().unwrap().capabilities.get(name).cloned()
    }

    pub fn providers(&self) -> Vec<ReadinessProvider> {
        self.state.lock().unwrap().providers.values().cloned().collect()
    }

    pub fn set_provider_status(&self, name: &str, status: ReadinessProviderStatus) {
        let mut state = self.state.lock().unwrap();
        let provider = state.providers.get_mut(name).unwrap();
        provider.status = Some(status);
    }

    pub fn provider_creates(&self) -> usize {
        self.state.lock().unwrap().provider_creates
    }

    pub fn provider_replaces(&self) -> usize {
        self.state.lock().unwrap().provider_replaces
    }

    pub fn add_existing(&self, reference: ResourceExistenceCondition) {
        self.state.lock().unwrap().existing.push(reference);
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        let state = self.state.lock().unwrap();
        state.config_maps.get(&key(namespace, name)).cloned()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(&key(namespace, name)).cloned()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Makes another writer replace the ConfigMap's data right before the
    /// next replace of it arrives.
    pub fn write_config_map_concurrently(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.concurrent_writes.insert(key(namespace, name), data);
    }

    /// Moves a pod to the given phase, as the kubelet would.
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) {
        let mut state = self.state.lock().unwrap();
        let pod = state.pods.get_mut(&key(namespace, name)).unwrap();
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..PodStatus::default()
        });
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_capability(&self, name: &str) -> Result<Option<Capability>> {
        Ok(self.capability(name))
    }

    async fn patch_capability_status(&self, name: &str, status: &CapabilityStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let capability = state
            .capabilities
            .get_mut(name)
            .ok_or_else(|| api_error(404, "NotFound", format!("capability {name} not found")))?;
        capability.status = Some(status.clone());
        Ok(())
    }

    async fn list_readiness_providers(&self) -> Result<Vec<ReadinessProvider>> {
        Ok(self.providers())
    }

    async fn create_readiness_provider(
        &self,
        provider: &ReadinessProvider,
    ) -> Result<ReadinessProvider> {
        let mut state = self.state.lock().unwrap();
        state.provider_creates += 1;

        let mut created = provider.clone();
        if created.metadata.name.is_none() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{prefix}{:05}", state.provider_creates));
        }
        created.metadata.uid = Some(format!("{}-uid", created.name_any()));
        created.metadata.resource_version = Some(state.next_resource_version());

        state
            .providers
            .insert(created.name_any(), created.clone());
        Ok(created)
    }

    async fn replace_readiness_provider(
        &self,
        provider: &ReadinessProvider,
    ) -> Result<ReadinessProvider> {
        let mut state = self.state.lock().unwrap();
        state.provider_replaces += 1;

        let name = provider.name_any();
        let status = state
            .providers
            .get(&name)
            .ok_or_else(|| api_error(404, "NotFound", format!("provider {name} not found")))?
            .status
            .clone();

        let mut replaced = provider.clone();
        replaced.status = status;
        replaced.metadata.resource_version = Some(state.next_resource_version());
        state.providers.insert(name, replaced.clone());
        Ok(replaced)
    }

    async fn patch_readiness_provider_status(
        &self,
        name: &str,
        status: &ReadinessProviderStatus,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let provider = state
            .providers
            .get_mut(name)
            .ok_or_else(|| api_error(404, "NotFound", format!("provider {name} not found")))?;
        provider.status = Some(status.clone());
        Ok(())
    }

    async fn resource_exists(&self, reference: &ResourceExistenceCondition) -> Result<bool> {
        Ok(self.state.lock().unwrap().existing.contains(reference))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap> {
        let mut state = self.state.lock().unwrap();
        let key = key(namespace, &config_map.name_any());
        if state.config_maps.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("configmap {} already exists", key.1),
            ));
        }

        let mut created = config_map.clone();
        created.metadata.resource_version = Some(state.next_resource_version());
        state.config_maps.insert(key, created.clone());
        Ok(created)
    }

    async fn replace_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap> {
        let mut state = self.state.lock().unwrap();
        let key = key(namespace, &config_map.name_any());

        if let Some(data) = state.concurrent_writes.remove(&key) {
            let resource_version = state.next_resource_version();
            if let Some(current) = state.config_maps.get_mut(&key) {
                current.data = Some(data);
                current.metadata.resource_version = Some(resource_version);
            }
        }

        let current = state
            .config_maps
            .get(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("configmap {} not found", key.1)))?;

        if config_map.metadata.resource_version.is_some()
            && config_map.metadata.resource_version != current.metadata.resource_version
        {
            return Err(api_error(
                409,
                "Conflict",
                format!("configmap {} has been modified", key.1),
            ));
        }

        let mut replaced = config_map.clone();
        replaced.metadata.resource_version = Some(state.next_resource_version());
        state.config_maps.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pod(namespace, name))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.lock().unwrap();
        let key = key(namespace, &pod.name_any());
        if state.pods.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("pod {} already exists", key.1),
            ));
        }

        let mut created = pod.clone();
        created.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..PodStatus::default()
        });
        state.pods.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.state.lock().unwrap().pods.remove(&key(namespace, name));
        Ok(())
    }
}
