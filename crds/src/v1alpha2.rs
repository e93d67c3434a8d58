use k8s_openapi::api::core::v1::PodSpec;
use kube::{runtime::reflector::ObjectRef, CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a single cluster object whose existence is required
/// for a [`Capability`] to be considered present.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Gvr {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// A Capability declares a set of objects which must exist for the
/// capability to be present in the cluster.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "core.tanzu.vmware.com",
    version = "v1alpha2",
    kind = "Capability",
    status = "CapabilityStatus",
    printcolumn = r#"{"name":"Present","type":"boolean","jsonPath":".status.present"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySpec {
    #[serde(default, rename = "gvks")]
    pub gvrs: Vec<Gvr>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatus {
    #[serde(default)]
    pub present: bool,
}

impl Capability {
    /// Derives the ordered readiness conditions for this capability, one
    /// [`ResourceExistenceCondition`] per declared [`Gvr`], named
    /// `condition-1` through `condition-N` in declaration order.
    pub fn conditions(&self) -> Vec<ReadinessProviderCondition> {
        self.spec
            .gvrs
            .iter()
            .enumerate()
            .map(|(index, gvr)| ReadinessProviderCondition {
                name: format!("condition-{}", index + 1),
                check: ConditionCheck::ResourceExistenceCondition(gvr.into()),
            })
            .collect()
    }

    pub fn present(&self) -> Option<bool> {
        self.status.as_ref().map(|status| status.present)
    }
}

/// Checks that the referenced object exists.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceExistenceCondition {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl From<&Gvr> for ResourceExistenceCondition {
    fn from(gvr: &Gvr) -> Self {
        ResourceExistenceCondition {
            api_version: gvr.api_version.clone(),
            kind: gvr.kind.clone(),
            namespace: gvr.namespace.clone(),
            name: gvr.name.clone(),
        }
    }
}

/// Runs a probe pod built from `podSpec`; its terminal phase decides the outcome.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodExecutionCondition {
    pub pod_spec: PodSpec,
}

/// The check carried by a condition. Exactly one variant is set, and it is
/// serialized under its own key next to the condition's `name`.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionCheck {
    ResourceExistenceCondition(ResourceExistenceCondition),
    PodExecutionCondition(PodExecutionCondition),
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessProviderCondition {
    pub name: String,
    #[serde(flatten)]
    pub check: ConditionCheck,
}

/// A ReadinessProvider turns a set of conditions into an aggregate
/// readiness state. Providers created for a [`Capability`] are owned by it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "core.tanzu.vmware.com",
    version = "v1alpha2",
    kind = "ReadinessProvider",
    status = "ReadinessProviderStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessProviderSpec {
    #[serde(default)]
    pub check_refs: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<ReadinessProviderCondition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessState {
    Success,
    #[default]
    InProgress,
    Failure,
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessState::Success => f.write_str("success"),
            ReadinessState::InProgress => f.write_str("in-progress"),
            ReadinessState::Failure => f.write_str("failure"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessConditionStatus {
    pub name: String,
    pub state: ReadinessState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessProviderStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReadinessState>,
    #[serde(default)]
    pub conditions: Vec<ReadinessConditionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl ReadinessProvider {
    pub fn state(&self) -> Option<ReadinessState> {
        self.status.as_ref().and_then(|status| status.state)
    }

    /// True if any owner reference names `capability` by apiVersion, kind and name.
    pub fn is_owned_by(&self, capability: &Capability) -> bool {
        let api_version = Capability::api_version(&());
        let kind = Capability::kind(&());
        let name = capability.name_any();

        self.owner_references().iter().any(|owner| {
            owner.api_version == api_version && owner.kind == kind && owner.name == name
        })
    }
}

/// Maps a [`ReadinessProvider`] back to the [`Capability`] objects listed
/// among its owner references, for use as a secondary watch mapper.
pub fn owning_capabilities(provider: &ReadinessProvider) -> Vec<ObjectRef<Capability>> {
    let api_version = Capability::api_version(&());
    let kind = Capability::kind(&());

    provider
        .owner_references()
        .iter()
        .filter(|owner| owner.api_version == api_version && owner.kind == kind)
        .map(|owner| ObjectRef::new(&owner.name))
        .collect()
}
