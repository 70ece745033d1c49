//! Unit tests for full reconciliation passes

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::status_identity;
    use crate::test_utils::{StaticProbe, create_test_distribution, owned_by, test_instance, test_reconciler};
    use cluster_client::{MockClusterClient, Operation};
    use crds::{ConditionStatus, ConditionType, Distribution, DistributionPhase, get_condition};
    use manifest_engine::{GroupVersionKind, ObjectIdentity};
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn seed_distribution(mock: &MockClusterClient, spec: Value) -> Distribution {
        let distribution = create_test_distribution("llm", "serving", spec);
        mock.insert(serde_json::to_value(&distribution).unwrap());
        distribution
    }

    fn starter() -> Value {
        json!({ "server": { "distribution": { "name": "starter" } } })
    }

    /// The Distribution as currently stored, status included
    fn reload(mock: &MockClusterClient, distribution: &Distribution) -> Distribution {
        serde_json::from_value(mock.object(&status_identity(distribution)).unwrap()).unwrap()
    }

    fn deployment_id() -> ObjectIdentity {
        ObjectIdentity {
            gvk: GroupVersionKind::new("apps", "v1", "Deployment"),
            namespace: Some("serving".into()),
            name: "llm-server".into(),
        }
    }

    fn mark_ready(mock: &MockClusterClient, replicas: i32) {
        let mut live = mock.object(&deployment_id()).unwrap();
        live["status"] = json!({ "readyReplicas": replicas, "availableReplicas": replicas });
        mock.insert(live);
    }

    #[tokio::test]
    async fn test_first_pass_creates_owned_resources() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        reconciler.reconcile_distribution(&distribution).await.unwrap();

        let created: BTreeSet<String> = mock
            .calls_for(Operation::Create)
            .into_iter()
            .map(|c| c.kind)
            .collect();
        let expected: BTreeSet<String> = ["Deployment", "Service", "ServiceAccount"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(created, expected);

        let live = mock.object(&deployment_id()).unwrap();
        assert_eq!(live["metadata"]["ownerReferences"][0]["uid"], "uid-llm");

        let status = reload(&mock, &distribution).status.unwrap();
        assert_eq!(status.phase, DistributionPhase::Pending);
        assert_eq!(status.message.as_deref(), Some("0/1 replicas ready"));
        assert!(!status.ready);
    }

    #[tokio::test]
    async fn test_second_pass_issues_no_mutations() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        reconciler.reconcile_distribution(&distribution).await.unwrap();
        let distribution = reload(&mock, &distribution);
        mock.clear_calls();
        reconciler.reconcile_distribution(&distribution).await.unwrap();

        assert!(mock.mutation_calls().is_empty(), "{:?}", mock.mutation_calls());
    }

    #[tokio::test]
    async fn test_ready_workload_reports_ready_with_version() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        let probe = Arc::new(StaticProbe::healthy("0.2.1"));
        let reconciler = test_reconciler(&mock, probe.clone());

        reconciler.reconcile_distribution(&distribution).await.unwrap();
        mark_ready(&mock, 1);
        let distribution = reload(&mock, &distribution);
        reconciler.reconcile_distribution(&distribution).await.unwrap();

        let status = reload(&mock, &distribution).status.unwrap();
        assert_eq!(status.phase, DistributionPhase::Ready);
        assert!(status.ready);
        assert_eq!(status.version.as_deref(), Some("0.2.1"));
        assert_eq!(status.available_replicas, 1);
        assert!(get_condition(&status.conditions, ConditionType::DeploymentReady)
            .is_some_and(|c| c.status == ConditionStatus::True));
        assert_eq!(
            probe.last_url().as_deref(),
            Some("http://llm-service.serving.svc.cluster.local:8321")
        );
    }

    #[tokio::test]
    async fn test_failing_health_check_is_progressing() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::unhealthy()));

        reconciler.reconcile_distribution(&distribution).await.unwrap();
        mark_ready(&mock, 1);
        let distribution = reload(&mock, &distribution);
        reconciler.reconcile_distribution(&distribution).await.unwrap();

        let status = reload(&mock, &distribution).status.unwrap();
        assert_eq!(status.phase, DistributionPhase::Progressing);
        assert!(get_condition(&status.conditions, ConditionType::HealthCheck)
            .is_some_and(|c| c.status == ConditionStatus::False));
    }

    #[tokio::test]
    async fn test_unknown_distribution_name_fails_without_applying() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(
            &mock,
            json!({ "server": { "distribution": { "name": "nope" } } }),
        );
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        let err = reconciler.reconcile_distribution(&distribution).await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidSpec(_)));
        assert!(mock.calls_for(Operation::Create).is_empty());
        let status = reload(&mock, &distribution).status.unwrap();
        assert_eq!(status.phase, DistributionPhase::Failed);
        assert_eq!(status.message.as_deref(), Some("unknown distribution name: nope"));
        assert_eq!(reconciler.metrics.error_count("invalid_spec"), 1);
    }

    #[tokio::test]
    async fn test_api_failure_status_is_classified() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        mock.fail(Operation::Get, "Deployment", 503, "etcdserver: request timed out");
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        let err = reconciler.reconcile_distribution(&distribution).await.unwrap_err();

        assert!(matches!(err, ControllerError::Apply(_)));
        let status = reload(&mock, &distribution).status.unwrap();
        assert_eq!(status.phase, DistributionPhase::Failed);
        assert_eq!(status.message.as_deref(), Some("Cluster API request failed, retrying"));
    }

    #[tokio::test]
    async fn test_conflict_leaves_status_alone() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        mock.fail(Operation::Create, "Deployment", 409, "object has been modified");
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        let err = reconciler.reconcile_distribution(&distribution).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(mock.calls_for(Operation::PatchStatus).is_empty());
    }

    #[tokio::test]
    async fn test_foreign_owned_workload_is_untouched() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        let mut other = test_instance();
        other.name = "other".into();
        other.uid = "uid-other".into();
        mock.insert(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "llm-server",
                "namespace": "serving",
                "ownerReferences": [owned_by(&other)]
            },
            "spec": { "replicas": 3 }
        }));
        let before = mock.object(&deployment_id()).unwrap();
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        reconciler.reconcile_distribution(&distribution).await.unwrap();

        assert_eq!(mock.object(&deployment_id()).unwrap(), before);
        assert!(mock.calls().iter().all(|c| {
            c.kind != "Deployment" || !matches!(c.operation, Operation::Create | Operation::Apply)
        }));
    }

    #[tokio::test]
    async fn test_storage_spec_creates_claim() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(
            &mock,
            json!({ "server": { "distribution": { "name": "starter" }, "storage": {} } }),
        );
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        reconciler.reconcile_distribution(&distribution).await.unwrap();

        let claim = mock
            .object(&ObjectIdentity {
                gvk: GroupVersionKind::new("", "v1", "PersistentVolumeClaim"),
                namespace: Some("serving".into()),
                name: "llm-pvc".into(),
            })
            .unwrap();
        assert_eq!(claim["spec"]["resources"]["requests"]["storage"], "10Gi");

        let status = reload(&mock, &distribution).status.unwrap();
        let storage = get_condition(&status.conditions, ConditionType::StorageReady).unwrap();
        assert_eq!(storage.status, ConditionStatus::False);
        assert_eq!(storage.message, "Claim is Pending");
    }

    #[tokio::test]
    async fn test_disabling_network_policy_removes_it() {
        let mock = MockClusterClient::new();
        let network = |enabled: bool| {
            json!({
                "server": { "distribution": { "name": "starter" } },
                "network": { "enabled": enabled }
            })
        };
        let policies = |mock: &MockClusterClient| {
            mock.objects()
                .into_iter()
                .filter(|o| o["kind"] == "NetworkPolicy")
                .count()
        };
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        let distribution = seed_distribution(&mock, network(true));
        reconciler.reconcile_distribution(&distribution).await.unwrap();
        assert_eq!(policies(&mock), 1);

        let distribution = seed_distribution(&mock, network(false));
        reconciler.reconcile_distribution(&distribution).await.unwrap();

        assert_eq!(policies(&mock), 0);
        let deletes = mock.calls_for(Operation::Delete);
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].kind, "NetworkPolicy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_is_bound_by_deadline() {
        let mock = MockClusterClient::new();
        let distribution = seed_distribution(&mock, starter());
        let probe = Arc::new(StaticProbe::healthy("0.2.1").with_delay(Duration::from_secs(600)));
        let mut reconciler = test_reconciler(&mock, probe);
        reconciler.config.reconcile_timeout = Duration::from_secs(10);
        reconciler.config.probe_timeout = Duration::from_secs(300);

        reconciler.reconcile_distribution(&distribution).await.unwrap();
        mark_ready(&mock, 1);
        let distribution = reload(&mock, &distribution);
        let err = reconciler.reconcile_distribution(&distribution).await.unwrap_err();

        assert!(matches!(err, ControllerError::Timeout(_)));
        let status = reload(&mock, &distribution).status.unwrap();
        assert_eq!(status.phase, DistributionPhase::Failed);
        assert_eq!(status.message.as_deref(), Some("Reconciliation timed out"));
    }

    #[tokio::test]
    async fn test_missing_uid_is_invalid() {
        let mock = MockClusterClient::new();
        let mut distribution = create_test_distribution("llm", "serving", starter());
        distribution.metadata.uid = None;
        let reconciler = test_reconciler(&mock, Arc::new(StaticProbe::healthy("0.2.1")));

        let err = reconciler.reconcile_distribution(&distribution).await.unwrap_err();

        assert!(matches!(err, ControllerError::InvalidSpec(_)));
        assert!(mock.calls_for(Operation::Create).is_empty());
    }
}
