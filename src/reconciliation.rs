use futures::StreamExt;
use kube::{
    runtime::{watcher, Controller},
    Api, Client,
};
use readiness_crds::{owning_capabilities, Capability, ReadinessProvider};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    capability,
    client::{KubeClient, KubeClientImpl},
    config::ControllerConfig,
    readiness,
};

/// State shared by every reconcile invocation.
pub struct Context {
    pub client: Arc<dyn KubeClient>,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(client: Arc<dyn KubeClient>, config: ControllerConfig) -> Self {
        Context { client, config }
    }
}

/// Runs the Capability and ReadinessProvider controllers until a shutdown
/// signal is received.
pub async fn reconcile(client: Client, config: ControllerConfig) {
    let ctx = Arc::new(Context::new(
        Arc::new(KubeClientImpl::new(client.clone())),
        config,
    ));

    let capability_controller = Controller::new(
        Api::<Capability>::all(client.clone()),
        watcher::Config::default(),
    )
    .watches(
        Api::<ReadinessProvider>::all(client.clone()),
        watcher::Config::default(),
        |provider| owning_capabilities(&provider),
    )
    .shutdown_on_signal()
    .run(capability::reconcile, capability::error_policy, ctx.clone())
    .for_each(|res| async move {
        match res {
            Ok(o) => info!("reconciled capability {:?}", o),
            Err(e) => warn!("capability reconcile failed: {}", e),
        }
    });

    let readiness_controller = Controller::new(
        Api::<ReadinessProvider>::all(client.clone()),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(readiness::reconcile, readiness::error_policy, ctx)
    .for_each(|res| async move {
        match res {
            Ok(o) => info!("reconciled readiness provider {:?}", o),
            Err(e) => warn!("readiness provider reconcile failed: {}", e),
        }
    });

    futures::join!(capability_controller, readiness_controller);
}
