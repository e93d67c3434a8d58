use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{ConfigMap, Pod, PodSpec},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{core::ObjectMeta, Resource as _, ResourceExt as _};
use readiness_crds::{PodExecutionCondition, ReadinessProvider, ReadinessState};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::ConditionResult;
use crate::{
    client::KubeClient,
    error::{Error, Result},
};

const LAST_STATE_KEY: &str = "lastState";
const GENERATION_KEY: &str = "generation";

/// Length of the tracking key, including its `pod-` prefix.
const TRACKING_KEY_LEN: usize = 20;

/// Label carrying the tracking key on both the ConfigMap and its Pods.
pub const TRACKING_KEY_LABEL: &str = "readiness.core.tanzu.vmware.com/tracking-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    InProgress,
    Success,
    Failure,
}

impl RunState {
    fn as_str(&self) -> &'static str {
        match self {
            RunState::InProgress => "inprogress",
            RunState::Success => "success",
            RunState::Failure => "failure",
        }
    }

    /// Anything unrecognised counts as a failure.
    fn parse(value: &str) -> Self {
        match value {
            "inprogress" => RunState::InProgress,
            "success" => RunState::Success,
            _ => RunState::Failure,
        }
    }
}

impl From<RunState> for ReadinessState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::InProgress => ReadinessState::InProgress,
            RunState::Success => ReadinessState::Success,
            RunState::Failure => ReadinessState::Failure,
        }
    }
}

/// Run-state persisted in the tracking ConfigMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRun {
    pub last_state: RunState,
    pub generation: u64,
}

impl TrackedRun {
    pub fn initial() -> Self {
        TrackedRun {
            last_state: RunState::InProgress,
            generation: 1,
        }
    }

    pub fn from_config_map(config_map: &ConfigMap) -> Result<Self> {
        let data = config_map.data.as_ref();
        let field = |key: &str| data.and_then(|data| data.get(key)).map(String::as_str);

        let generation = field(GENERATION_KEY).ok_or_else(|| {
            Error::tracking_state(format!(
                "configmap {} has no {GENERATION_KEY}",
                config_map.metadata.name.as_deref().unwrap_or_default()
            ))
        })?;
        let generation = generation.parse().map_err(|err| {
            Error::tracking_state(format!("invalid {GENERATION_KEY} {generation:?}: {err}"))
        })?;

        Ok(TrackedRun {
            last_state: RunState::parse(field(LAST_STATE_KEY).unwrap_or_default()),
            generation,
        })
    }

    fn write_to(&self, config_map: &mut ConfigMap) {
        let data = config_map.data.get_or_insert_with(BTreeMap::new);
        data.insert(LAST_STATE_KEY.to_string(), self.last_state.as_str().to_string());
        data.insert(GENERATION_KEY.to_string(), self.generation.to_string());
    }

    fn result(&self, key: &str) -> ConditionResult {
        match self.last_state {
            RunState::InProgress => ConditionResult::in_progress(format!(
                "probe pod {} has not completed",
                probe_pod_name(key, self.generation)
            )),
            RunState::Success => ConditionResult::success(),
            RunState::Failure => ConditionResult::failure(format!(
                "probe pod {} failed",
                probe_pod_name(key, self.generation.saturating_sub(1))
            )),
        }
    }
}

/// Stable identity of a (provider, condition) pair.
pub fn tracking_key(provider_name: &str, condition_name: &str) -> String {
    let digest = Sha256::digest(format!("{provider_name}{condition_name}").as_bytes());

    let mut key = format!("pod-{}", hex::encode(digest));
    key.truncate(TRACKING_KEY_LEN);
    key
}

pub fn probe_pod_name(key: &str, generation: u64) -> String {
    format!("{key}-{generation}")
}

/// Where the tracking objects of one (provider, condition) pair live. The
/// provider owns them, so they are garbage collected along with it.
struct Tracking<'a> {
    namespace: &'a str,
    key: String,
    owner: Option<OwnerReference>,
}

impl Tracking<'_> {
    fn metadata(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            labels: Some(BTreeMap::from([(
                TRACKING_KEY_LABEL.to_string(),
                self.key.clone(),
            )])),
            owner_references: self.owner.clone().map(|owner| vec![owner]),
            ..ObjectMeta::default()
        }
    }

    fn config_map(&self, run: &TrackedRun) -> ConfigMap {
        let mut config_map = ConfigMap {
            metadata: self.metadata(&self.key),
            ..ConfigMap::default()
        };
        run.write_to(&mut config_map);
        config_map
    }

    fn probe_pod(&self, name: &str, spec: &PodSpec) -> Pod {
        Pod {
            metadata: self.metadata(name),
            spec: Some(spec.clone()),
            ..Pod::default()
        }
    }
}

fn terminal_outcome(pod: &Pod) -> Option<RunState> {
    match pod.status.as_ref()?.phase.as_deref()? {
        "Succeeded" => Some(RunState::Success),
        "Failed" => Some(RunState::Failure),
        _ => None,
    }
}

/// Moves the tracking ConfigMap to `next`, provided it is still at
/// `observed_generation`. The replace carries the resourceVersion that was
/// read, so a concurrent writer makes it fail instead of being overwritten.
async fn record(
    client: &dyn KubeClient,
    namespace: &str,
    key: &str,
    observed_generation: u64,
    next: TrackedRun,
) -> Result<()> {
    let mut config_map = client
        .get_config_map(namespace, key)
        .await?
        .ok_or_else(|| Error::tracking_state(format!("configmap {key} disappeared")))?;

    let current = TrackedRun::from_config_map(&config_map)?;
    if current.generation != observed_generation {
        debug!(
            key,
            observed_generation,
            current_generation = current.generation,
            "tracking state already moved on"
        );
        return Ok(());
    }

    if current == next {
        return Ok(());
    }

    next.write_to(&mut config_map);
    client.replace_config_map(namespace, &config_map).await?;

    Ok(())
}

/// Advances the run-state of one condition by at most one step:
///
/// ```text
///   (no configmap) --create--> inprogress/1 --pod Succeeded--> success/2
///                                           \--pod Failed----> failure/2
///   success|failure/N --launch pod N--> inprogress/N
/// ```
///
/// A generation only advances once its pod reaches a terminal phase, so a
/// pod that never finishes keeps the condition in progress indefinitely.
/// The pod of a finished generation is deleted once its outcome is recorded.
async fn run(
    client: &dyn KubeClient,
    tracking: &Tracking<'_>,
    provider_name: &str,
    condition_name: &str,
    check: &PodExecutionCondition,
) -> Result<ConditionResult> {
    let Tracking { namespace, key, .. } = tracking;

    let generation = match client.get_config_map(namespace, key).await? {
        Some(config_map) => TrackedRun::from_config_map(&config_map)?.generation,
        None => {
            info!(
                provider = provider_name,
                condition = condition_name,
                key,
                "creating pod execution tracking configmap"
            );
            let run = TrackedRun::initial();
            client
                .create_config_map(namespace, &tracking.config_map(&run))
                .await?;
            run.generation
        }
    };

    let pod_name = probe_pod_name(key, generation);
    match client.get_pod(namespace, &pod_name).await? {
        None => {
            info!(pod = pod_name, generation, "launching probe pod");
            client
                .create_pod(namespace, &tracking.probe_pod(&pod_name, &check.pod_spec))
                .await?;

            let launched = TrackedRun {
                last_state: RunState::InProgress,
                generation,
            };
            record(client, namespace, key, generation, launched).await?;
        }
        Some(pod) => {
            if let Some(outcome) = terminal_outcome(&pod) {
                info!(
                    pod = pod_name,
                    generation,
                    outcome = outcome.as_str(),
                    "probe pod finished"
                );
                let next_generation = generation.checked_add(1).ok_or_else(|| {
                    Error::tracking_state(format!("generation {generation} of {key} overflows"))
                })?;
                let finished = TrackedRun {
                    last_state: outcome,
                    generation: next_generation,
                };
                record(client, namespace, key, generation, finished).await?;

                if let Err(err) = client.delete_pod(namespace, &pod_name).await {
                    warn!(pod = pod_name, "failed to delete finished probe pod: {err}");
                }
            }
        }
    }

    let config_map = client
        .get_config_map(namespace, key)
        .await?
        .ok_or_else(|| Error::tracking_state(format!("configmap {key} disappeared")))?;

    Ok(TrackedRun::from_config_map(&config_map)?.result(key))
}

/// Evaluates a pod execution condition. Errors are reported as a failed
/// condition carrying the error text; the next evaluation is the retry.
pub async fn evaluate(
    client: &dyn KubeClient,
    namespace: &str,
    provider: &ReadinessProvider,
    condition_name: &str,
    check: &PodExecutionCondition,
) -> ConditionResult {
    let provider_name = provider.name_any();
    let tracking = Tracking {
        namespace,
        key: tracking_key(&provider_name, condition_name),
        owner: provider.controller_owner_ref(&()),
    };

    match run(client, &tracking, &provider_name, condition_name, check).await {
        Ok(result) => result,
        Err(err) => {
            warn!(
                provider = provider_name,
                condition = condition_name,
                "pod execution condition failed: {err}"
            );
            ConditionResult::failure(err.to_string())
        }
    }
}
