use readiness_crds::ResourceExistenceCondition;
use tracing::debug;

use super::ConditionResult;
use crate::client::KubeClient;

fn describe(check: &ResourceExistenceCondition) -> String {
    match &check.namespace {
        Some(namespace) => format!("{} {namespace}/{}", check.kind, check.name),
        None => format!("{} {}", check.kind, check.name),
    }
}

/// Succeeds when the referenced object exists. Stateless, so it is safe
/// to run on every reconcile.
pub async fn evaluate(
    client: &dyn KubeClient,
    check: &ResourceExistenceCondition,
) -> ConditionResult {
    match client.resource_exists(check).await {
        Ok(true) => ConditionResult::success(),
        Ok(false) => {
            debug!(resource = %describe(check), "resource does not exist");
            ConditionResult::failure(format!("{} not found", describe(check)))
        }
        Err(err) => ConditionResult::failure(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use readiness_crds::{ReadinessState, ResourceExistenceCondition};

    use super::evaluate;
    use crate::{client::MockKubeClient, error::Error, testing::FakeCluster};

    fn secret(namespace: Option<&str>) -> ResourceExistenceCondition {
        ResourceExistenceCondition {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            namespace: namespace.map(str::to_string),
            name: "db-cred".to_string(),
        }
    }

    #[tokio::test]
    async fn existing_resource_succeeds() {
        let cluster = FakeCluster::new();
        cluster.add_existing(secret(Some("db")));

        let result = evaluate(&cluster, &secret(Some("db"))).await;

        assert_eq!(result.state, ReadinessState::Success);
        assert_eq!(result.message, None);
    }

    #[tokio::test]
    async fn missing_resource_fails_with_reference() {
        let cluster = FakeCluster::new();

        let result = evaluate(&cluster, &secret(Some("db"))).await;

        assert_eq!(result.state, ReadinessState::Failure);
        assert_eq!(result.message.as_deref(), Some("Secret db/db-cred not found"));
    }

    #[tokio::test]
    async fn lookup_error_becomes_failure() {
        let mut client = MockKubeClient::new();
        client.expect_resource_exists().returning(|_| {
            Err(Error::invalid_reference(
                "namespace required for namespaced kind Secret",
            ))
        });

        let result = evaluate(&client, &secret(None)).await;

        assert_eq!(result.state, ReadinessState::Failure);
        assert!(result
            .message
            .unwrap()
            .contains("namespace required for namespaced kind Secret"));
    }
}
