use std::{future::Future, str::FromStr, time::Duration};

use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use kube::{
    api::DynamicObject,
    core::{ApiResource, GroupVersionKind},
    Api, Client, ResourceExt as _,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Namespace core packages are installed into on workload clusters.
pub const CORE_PACKAGES_NAMESPACE: &str = "tkg-system";

const KAPP_CONTROLLER_PACKAGE: &str = "kapp-controller";

/// Suffix of the provider objects a ClusterBootstrap takes package values from.
const PROVIDER_REF_SUFFIX: &str = "-package";

/// A package to wait on, as named in the cluster's bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub name: String,
    pub namespace: String,
}

impl FromStr for PackageRef {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (namespace, name) = value
            .split_once('/')
            .unwrap_or((CORE_PACKAGES_NAMESPACE, value));

        if name.is_empty() || namespace.is_empty() {
            return Err(Error::invalid_reference(format!(
                "package {value:?} is not of the form namespace/name"
            )));
        }

        Ok(PackageRef {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

/// A `namespace/name` reference to the ClusterBootstrap of a workload cluster
/// on the management cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterBootstrapRef {
    pub name: String,
    pub namespace: String,
}

impl FromStr for ClusterBootstrapRef {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(ClusterBootstrapRef {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            }
            _ => Err(Error::invalid_reference(format!(
                "cluster bootstrap {value:?} is not of the form namespace/name"
            ))),
        }
    }
}

/// Calls `fetch` every `interval` until it finds something, fails, or
/// `timeout` elapses.
async fn poll_until_found<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut fetch: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    Error: From<E>,
{
    let poll = async move {
        loop {
            match fetch().await {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => tokio::time::sleep(interval).await,
                Err(err) => return Err(Error::from(err)),
            }
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}

/// Fetches the ClusterBootstrap of a workload cluster from the management
/// cluster, waiting for it to be created.
pub async fn get_cluster_bootstrap(
    management: Client,
    reference: &ClusterBootstrapRef,
    interval: Duration,
    timeout: Duration,
) -> Result<DynamicObject> {
    let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
        "run.tanzu.vmware.com",
        "v1alpha3",
        "ClusterBootstrap",
    ));
    let bootstraps =
        Api::<DynamicObject>::namespaced_with(management, &reference.namespace, &resource);

    debug!(
        cluster = reference.name,
        namespace = reference.namespace,
        "getting ClusterBootstrap"
    );
    poll_until_found(interval, timeout, || bootstraps.get_opt(&reference.name)).await
}

/// Core packages (kapp-controller, CNI, CSI, CPI) a ClusterBootstrap installs.
/// kapp-controller lives next to the ClusterBootstrap on the management
/// cluster, everything else in [`CORE_PACKAGES_NAMESPACE`].
pub fn core_packages_from_cluster_bootstrap(bootstrap: &DynamicObject) -> Vec<PackageRef> {
    let spec = bootstrap.data.get("spec");
    let bootstrap_namespace = bootstrap.namespace().unwrap_or_default();

    [
        ("kapp", bootstrap_namespace.as_str()),
        ("cni", CORE_PACKAGES_NAMESPACE),
        ("csi", CORE_PACKAGES_NAMESPACE),
        ("cpi", CORE_PACKAGES_NAMESPACE),
    ]
    .into_iter()
    .filter_map(|(field, namespace)| {
        let provider = spec?
            .get(field)?
            .get("valuesFrom")?
            .get("providerRef")?
            .get("name")?
            .as_str()?;

        Some(PackageRef {
            name: provider
                .strip_suffix(PROVIDER_REF_SUFFIX)
                .unwrap_or(provider)
                .to_string(),
            namespace: namespace.to_string(),
        })
    })
    .collect()
}

#[async_trait]
pub trait PackageWaiter: Send + Sync {
    /// Blocks until the named package is installed, fails to install, or
    /// `timeout` elapses.
    async fn wait_for_package_install(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()>;
}

/// Waits on all `names` concurrently. Every wait runs to completion; the
/// first failure observed is returned.
pub async fn wait_for_packages_installation(
    waiter: &dyn PackageWaiter,
    names: &[String],
    namespace: &str,
    timeout: Duration,
) -> Result<()> {
    let mut waits: FuturesUnordered<_> = names
        .iter()
        .map(|name| async move {
            info!(package = name, "waiting for package");
            let result = waiter.wait_for_package_install(name, namespace, timeout).await;
            match &result {
                Ok(()) => info!(package = name, "successfully reconciled package"),
                Err(err) => warn!(package = name, "failure while waiting for package: {err}"),
            }
            result
        })
        .collect();

    let mut first_failure = None;
    while let Some(result) = waits.next().await {
        if let Err(err) = result {
            first_failure.get_or_insert(err);
        }
    }

    match first_failure {
        Some(err) => Err(Error::PackageInstall(Box::new(err))),
        None => Ok(()),
    }
}

/// Waits for kapp-controller on the management cluster, then for the
/// remaining core packages on the workload cluster.
pub async fn monitor_addons_core_package_installation(
    management: &dyn PackageWaiter,
    workload: &dyn PackageWaiter,
    packages: &[PackageRef],
    timeout: Duration,
) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }

    let mut kapp_packages = Vec::new();
    let mut kapp_namespace = String::new();
    let mut core_packages = Vec::new();

    for package in packages {
        if package.name.contains(KAPP_CONTROLLER_PACKAGE) {
            kapp_packages.push(package.name.clone());
            kapp_namespace = package.namespace.clone();
        } else {
            core_packages.push(package.name.clone());
        }
    }

    debug!(
        kapp = ?kapp_packages,
        core = ?core_packages,
        "core add-on packages"
    );

    wait_for_packages_installation(management, &kapp_packages, &kapp_namespace, timeout).await?;
    wait_for_packages_installation(workload, &core_packages, CORE_PACKAGES_NAMESPACE, timeout)
        .await
}

/// Polls kapp-controller `PackageInstall` resources.
pub struct KubePackageWaiter {
    client: Client,
    interval: Duration,
}

impl KubePackageWaiter {
    pub fn new(client: Client, interval: Duration) -> Self {
        Self { client, interval }
    }

    fn package_installs(&self, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "packaging.carvel.dev",
            "v1alpha1",
            "PackageInstall",
        ));
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    async fn poll_until_installed(
        &self,
        installs: &Api<DynamicObject>,
        name: &str,
    ) -> Result<()> {
        loop {
            if let Some(install) = installs.get_opt(name).await? {
                match install_progress(&install) {
                    InstallProgress::Succeeded => return Ok(()),
                    InstallProgress::Failed(message) => {
                        return Err(Error::PackageReconcile {
                            name: name.to_string(),
                            message,
                        })
                    }
                    InstallProgress::Pending => {
                        debug!(package = name, "package install still reconciling")
                    }
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum InstallProgress {
    Pending,
    Succeeded,
    Failed(String),
}

fn install_progress(install: &DynamicObject) -> InstallProgress {
    let status = install.data.get("status");
    let conditions = status
        .and_then(|status| status.get("conditions"))
        .and_then(Value::as_array);

    let is_true = |type_: &str| {
        conditions.is_some_and(|conditions| {
            conditions.iter().any(|condition| {
                condition.get("type").and_then(Value::as_str) == Some(type_)
                    && condition.get("status").and_then(Value::as_str) == Some("True")
            })
        })
    };

    if is_true("ReconcileSucceeded") {
        InstallProgress::Succeeded
    } else if is_true("ReconcileFailed") {
        let message = status
            .and_then(|status| status.get("usefulErrorMessage"))
            .and_then(Value::as_str)
            .unwrap_or("reconcile failed");
        InstallProgress::Failed(message.to_string())
    } else {
        InstallProgress::Pending
    }
}

#[async_trait]
impl PackageWaiter for KubePackageWaiter {
    async fn wait_for_package_install(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        let installs = self.package_installs(namespace);

        tokio::time::timeout(timeout, self.poll_until_installed(&installs, name))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }
}
