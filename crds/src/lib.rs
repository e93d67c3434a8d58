pub mod v1alpha2;

pub use v1alpha2::{
    owning_capabilities, Capability, CapabilitySpec, CapabilityStatus, ConditionCheck, Gvr,
    PodExecutionCondition, ReadinessConditionStatus, ReadinessProvider,
    ReadinessProviderCondition, ReadinessProviderSpec, ReadinessProviderStatus, ReadinessState,
    ResourceExistenceCondition,
};

/// Field manager used for all server-side writes.
pub const CONTROLLER_NAME: &str = "core.tanzu.vmware.com/readiness";
