use std::{future::Future, sync::Arc, time::Duration};

use kube::{core::ObjectMeta, runtime::controller::Action, Resource as _, ResourceExt as _};
use readiness_crds::{
    Capability, CapabilityStatus, ReadinessProvider, ReadinessProviderSpec, ReadinessState,
};
use tracing::{debug, error, info};

use crate::{
    error::{Error, Result},
    reconciliation::Context,
};

pub const GENERATE_NAME_PREFIX: &str = "capability-";

fn desired_provider(capability: &Capability) -> Result<ReadinessProvider> {
    let owner_reference = capability
        .controller_owner_ref(&())
        .ok_or_else(|| Error::MissingUid(format!("capability {}", capability.name_any())))?;

    Ok(ReadinessProvider {
        metadata: ObjectMeta {
            generate_name: Some(GENERATE_NAME_PREFIX.to_string()),
            owner_references: Some(vec![owner_reference]),
            ..ObjectMeta::default()
        },
        spec: ReadinessProviderSpec {
            check_refs: Vec::new(),
            conditions: capability.conditions(),
        },
        status: None,
    })
}

async fn reconcile_capability(name: &str, ctx: &Context) -> Result<()> {
    let Some(capability) = ctx.client.get_capability(name).await? else {
        debug!(capability = name, "capability no longer exists");
        return Ok(());
    };

    let owned = ctx
        .client
        .list_readiness_providers()
        .await?
        .into_iter()
        .find(|provider| provider.is_owned_by(&capability));

    let present = match owned {
        None => {
            let created = ctx
                .client
                .create_readiness_provider(&desired_provider(&capability)?)
                .await?;
            info!(
                capability = name,
                provider = %created.name_any(),
                conditions = created.spec.conditions.len(),
                "created readiness provider"
            );

            // Nothing has evaluated the new provider yet.
            false
        }
        Some(mut provider) => {
            provider.spec.conditions = capability.conditions();
            let state = provider.state();

            ctx.client.replace_readiness_provider(&provider).await?;
            debug!(
                capability = name,
                provider = %provider.name_any(),
                state = ?state,
                "updated readiness provider"
            );

            state == Some(ReadinessState::Success)
        }
    };

    if capability.present() != Some(present) {
        info!(capability = name, present, "capability presence changed");
    }

    ctx.client
        .patch_capability_status(name, &CapabilityStatus { present })
        .await
}

/// Runs `reconcile` to completion or fails with [`Error::Timeout`].
async fn with_deadline<T>(
    timeout: Duration,
    reconcile: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, reconcile)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}

pub async fn reconcile(capability: Arc<Capability>, ctx: Arc<Context>) -> Result<Action> {
    with_deadline(
        ctx.config.reconcile_timeout(),
        reconcile_capability(&capability.name_any(), &ctx),
    )
    .await?;

    Ok(Action::requeue(ctx.config.requeue_interval()))
}

pub fn error_policy(capability: Arc<Capability>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        capability = %capability.name_any(),
        "capability reconciliation encountered error: {error}"
    );
    Action::requeue(ctx.config.requeue_interval())
}
