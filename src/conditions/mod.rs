use readiness_crds::{
    ConditionCheck, ReadinessConditionStatus, ReadinessProvider, ReadinessProviderCondition,
    ReadinessState,
};

use crate::client::KubeClient;

pub mod pod_execution;
pub mod resource_existence;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionResult {
    pub state: ReadinessState,
    pub message: Option<String>,
}

impl ConditionResult {
    pub fn success() -> Self {
        ConditionResult {
            state: ReadinessState::Success,
            message: None,
        }
    }

    pub fn in_progress(message: impl Into<String>) -> Self {
        ConditionResult {
            state: ReadinessState::InProgress,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ConditionResult {
            state: ReadinessState::Failure,
            message: Some(message.into()),
        }
    }

    pub fn into_status(self, name: &str) -> ReadinessConditionStatus {
        ReadinessConditionStatus {
            name: name.to_string(),
            state: self.state,
            message: self.message,
        }
    }
}

/// Evaluates a single condition of `provider`. Evaluators never fail
/// outright: an error talking to the cluster becomes a failure of that one
/// condition.
pub async fn evaluate(
    client: &dyn KubeClient,
    tracking_namespace: &str,
    provider: &ReadinessProvider,
    condition: &ReadinessProviderCondition,
) -> ConditionResult {
    match &condition.check {
        ConditionCheck::ResourceExistenceCondition(check) => {
            resource_existence::evaluate(client, check).await
        }
        ConditionCheck::PodExecutionCondition(check) => {
            pod_execution::evaluate(
                client,
                tracking_namespace,
                provider,
                &condition.name,
                check,
            )
            .await
        }
    }
}

/// Folds per-condition states into a provider state: any failure fails the
/// provider, otherwise it succeeds only once every condition has succeeded.
pub fn aggregate(states: impl IntoIterator<Item = ReadinessState>) -> ReadinessState {
    let mut aggregate = ReadinessState::Success;

    for state in states {
        match state {
            ReadinessState::Failure => return ReadinessState::Failure,
            ReadinessState::InProgress => aggregate = ReadinessState::InProgress,
            ReadinessState::Success => {}
        }
    }

    aggregate
}
