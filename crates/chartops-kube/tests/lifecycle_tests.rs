//! Session-level lifecycle tests against the in-memory cluster

use chartops_kube::{
    ChartDriver, ChartError, ChartFamilySpec, Coordinator, EventKind, MockCall, MockCluster,
    ResourceKind, Scripted, Session, SuiteConfig, SummaryState, WaitConfig,
};

const SUITE: &str = r#"
catalog:
  url: https://rancher.example.com
waits:
  installTimeout: 90s
  upgradeTimeout: 90s
  uninstallTimeout: 60s
  pollInterval: 1s
charts:
  - name: monitoring
    namespace: cattle-monitoring
    version: 1.0.0
    upgradeVersion: 1.1.0
    crd: true
    createNamespace: true
    values:
      prometheus:
        retention: 2d
    secret:
      name: grafana-admin
      keys: [user, password]
  - name: logging
    namespace: cattle-logging
    version: 2.0.0
    crd: true
"#;

fn coordinator(cluster: &MockCluster, waits: WaitConfig) -> Coordinator<MockCluster> {
    Coordinator::new(ChartDriver::new(cluster.clone(), waits))
}

fn family(name: &str, namespace: &str, version: &str) -> ChartFamilySpec {
    let mut spec = ChartFamilySpec::new(name, namespace);
    spec.version = Some(version.to_string());
    spec
}

#[tokio::test(start_paused = true)]
async fn test_suite_lifecycle() {
    let suite = SuiteConfig::from_yaml(SUITE).unwrap();
    let cluster = MockCluster::new();
    let coordinator = coordinator(&cluster, suite.waits);
    let mut session = Session::new("suite");

    for spec in &suite.charts {
        let family = coordinator.resolve(spec).await.unwrap();
        let status = coordinator
            .install_family(&family, &mut session)
            .await
            .unwrap();
        assert_eq!(status.summary_state, SummaryState::Deployed);

        if let Some(version) = &spec.upgrade_version {
            coordinator.upgrade_family(&family, version).await.unwrap();
        }
    }

    assert_eq!(
        cluster.chart_version("monitoring", "cattle-monitoring").as_deref(),
        Some("1.1.0")
    );
    assert_eq!(cluster.installed_charts().len(), 4);
    assert_eq!(session.pending(), 2);

    // logging was registered last, so it goes first
    let plan = session.plan();
    assert_eq!(plan[0].bundle, "logging");
    assert_eq!(plan[1].bundle, "monitoring");

    session.teardown(&coordinator).await.unwrap();
    assert!(cluster.installed_charts().is_empty());
    assert!(cluster.namespaces().is_empty());
    assert!(
        cluster
            .secret_data("grafana-admin", "cattle-monitoring")
            .is_none()
    );

    let logging_crd = cluster
        .position(&MockCall::Uninstall {
            name: "logging-crd".to_string(),
            namespace: "cattle-logging".to_string(),
        })
        .unwrap();
    let monitoring = cluster
        .position(&MockCall::Uninstall {
            name: "monitoring".to_string(),
            namespace: "cattle-monitoring".to_string(),
        })
        .unwrap();
    assert!(logging_crd < monitoring);
}

#[tokio::test(start_paused = true)]
async fn test_crd_never_removed_before_primary_is_gone() {
    let cluster = MockCluster::new();
    let coordinator = coordinator(&cluster, WaitConfig::default());
    let mut session = Session::new("ordering");

    let mut spec = family("backup", "cattle-backup", "3.0.0");
    spec.crd = chartops_kube::CrdCompanion::Named("backup-crds".to_string());
    let family = coordinator.resolve(&spec).await.unwrap();
    coordinator
        .install_family(&family, &mut session)
        .await
        .unwrap();

    session.teardown(&coordinator).await.unwrap();

    let journal = cluster.journal();
    let primary_gone = journal
        .iter()
        .position(|c| {
            *c == MockCall::Observed {
                kind: ResourceKind::Chart,
                name: "backup".to_string(),
                event: EventKind::Deleted,
            }
        })
        .unwrap();
    let crd_uninstall = journal
        .iter()
        .position(|c| matches!(c, MockCall::Uninstall { name, .. } if name == "backup-crds"))
        .unwrap();
    assert!(primary_gone < crd_uninstall);
}

#[tokio::test(start_paused = true)]
async fn test_failed_bundle_does_not_block_siblings() {
    let cluster = MockCluster::new();
    let coordinator = coordinator(&cluster, WaitConfig::default());
    let mut session = Session::new("partial-failure");

    for name in ["alpha", "beta", "gamma"] {
        let family = coordinator
            .resolve(&family(name, "ns-a", "1.0.0"))
            .await
            .unwrap();
        coordinator
            .install_family(&family, &mut session)
            .await
            .unwrap();
    }
    cluster.script_chart("beta", "ns-a", Scripted::Fail(500));

    let err = session.teardown(&coordinator).await.unwrap_err();
    assert!(matches!(
        err,
        ChartError::Cleanup {
            failed: 1,
            total: 3,
            ..
        }
    ));
    assert_eq!(
        cluster.installed_charts(),
        vec![("ns-a".to_string(), "beta".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_install_timeout_still_registers_cleanup() {
    let cluster = MockCluster::new();
    cluster.script_chart("slow", "ns-a", Scripted::Silence);
    let coordinator = coordinator(&cluster, WaitConfig::default());
    let mut session = Session::new("timeout");

    let family = coordinator
        .resolve(&family("slow", "ns-a", "1.0.0"))
        .await
        .unwrap();
    let err = coordinator
        .install_family(&family, &mut session)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(session.pending(), 1);

    // the chart was created even though its deployment was never observed
    session.teardown(&coordinator).await.unwrap();
    assert!(cluster.installed_charts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_session_teardown() {
    let cluster = MockCluster::new();
    let coordinator = coordinator(&cluster, WaitConfig::default());
    let mut session = Session::new("empty");

    session.teardown(&coordinator).await.unwrap();
    assert!(cluster.journal().is_empty());
}
