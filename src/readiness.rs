use std::sync::Arc;

use kube::{runtime::controller::Action, ResourceExt as _};
use readiness_crds::{ReadinessProvider, ReadinessProviderStatus};
use tracing::{debug, error, info};

use crate::{
    client::KubeClient,
    conditions::{self, aggregate},
    error::{Error, Result},
    reconciliation::Context,
};

/// Evaluates all conditions of `provider` in order. A failing condition
/// never stops the evaluation of the conditions after it.
pub async fn evaluate_provider(
    client: &dyn KubeClient,
    tracking_namespace: &str,
    provider: &ReadinessProvider,
) -> ReadinessProviderStatus {
    let provider_name = provider.name_any();

    let mut statuses = Vec::with_capacity(provider.spec.conditions.len());
    for condition in &provider.spec.conditions {
        let result = conditions::evaluate(client, tracking_namespace, provider, condition).await;
        debug!(
            provider = provider_name,
            condition = condition.name,
            state = %result.state,
            "evaluated condition"
        );
        statuses.push(result.into_status(&condition.name));
    }

    ReadinessProviderStatus {
        state: Some(aggregate(statuses.iter().map(|status| status.state))),
        conditions: statuses,
        targets: provider
            .status
            .as_ref()
            .map(|status| status.targets.clone())
            .unwrap_or_default(),
    }
}

pub async fn reconcile(provider: Arc<ReadinessProvider>, ctx: Arc<Context>) -> Result<Action> {
    let status = evaluate_provider(
        ctx.client.as_ref(),
        &ctx.config.tracking_namespace,
        &provider,
    )
    .await;

    if provider.state() != status.state {
        info!(
            provider = %provider.name_any(),
            state = ?status.state,
            "readiness provider state changed"
        );
    }

    if provider.status.as_ref() != Some(&status) {
        ctx.client
            .patch_readiness_provider_status(&provider.name_any(), &status)
            .await?;
    }

    Ok(Action::requeue(ctx.config.readiness_poll_interval()))
}

pub fn error_policy(provider: Arc<ReadinessProvider>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        provider = %provider.name_any(),
        "readiness provider reconciliation encountered error: {error}"
    );
    Action::requeue(ctx.config.readiness_poll_interval())
}
