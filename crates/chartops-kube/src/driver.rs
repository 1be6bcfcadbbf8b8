//! Chart transition driver
//!
//! Submits install, upgrade and uninstall actions and confirms each one on a
//! watch that was opened before the action went out. Nothing here retries:
//! the first API failure, rejected event or elapsed deadline is returned to
//! the caller as is.

use std::slice;
use std::time::Duration;

use tracing::{debug, info};

use crate::actions::{ChartRequest, TransitionRequest, UninstallRequest};
use crate::cluster::ClusterApi;
use crate::config::WaitConfig;
use crate::error::Result;
use crate::events::WatchTarget;
use crate::status::ChartStatus;
use crate::watcher::{ChartStatusPredicate, EventWatcher, Subscription};

/// Drives single-chart transitions against a cluster
pub struct ChartDriver<C> {
    cluster: C,
    waits: WaitConfig,
}

impl<C: ClusterApi> ChartDriver<C> {
    pub fn new(cluster: C, waits: WaitConfig) -> Self {
        Self { cluster, waits }
    }

    /// Get the cluster
    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Get the wait budgets
    pub fn waits(&self) -> &WaitConfig {
        &self.waits
    }

    /// Watcher over this driver's cluster
    pub fn watcher(&self) -> EventWatcher<'_, C> {
        EventWatcher::new(&self.cluster, self.waits.poll_interval)
    }

    /// Current status of a chart
    pub async fn status(&self, name: &str, namespace: &str) -> Result<ChartStatus> {
        self.cluster.chart_status(name, namespace).await
    }

    /// Run any transition
    pub async fn apply(&self, request: &TransitionRequest) -> Result<()> {
        debug!(
            verb = request.verb(),
            chart = %request.chart_name(),
            namespace = %request.namespace(),
            "applying transition"
        );
        match request {
            TransitionRequest::Install(chart) => self.install_chart(chart).await,
            TransitionRequest::Upgrade(chart) => self.upgrade_chart(chart).await,
            TransitionRequest::Uninstall(uninstall) => self.uninstall_chart(uninstall).await,
        }
    }

    // ========== Install ==========

    /// Install one chart and wait for it to be deployed
    pub async fn install_chart(&self, chart: &ChartRequest) -> Result<()> {
        self.install_charts(slice::from_ref(chart)).await
    }

    /// Install charts in one action, then wait for each to be deployed
    pub async fn install_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        self.begin_install(charts).await?.confirm().await
    }

    /// Submit an install without waiting
    ///
    /// A watch is opened on every chart before the action is submitted. The
    /// returned [`PendingInstall`] confirms the charts in submission order.
    pub async fn begin_install(&self, charts: &[ChartRequest]) -> Result<PendingInstall<'_, C>> {
        let watcher = self.watcher();
        let mut subscriptions = Vec::with_capacity(charts.len());
        for chart in charts {
            let target = WatchTarget::chart(&chart.name, &chart.namespace, self.waits.install_timeout);
            subscriptions.push(watcher.subscribe(target).await?);
        }

        for chart in charts {
            info!(chart = %chart.name, namespace = %chart.namespace, version = %chart.version, "installing chart");
        }
        self.cluster.install_charts(charts).await?;

        Ok(PendingInstall {
            subscriptions,
            budget: self.waits.install_timeout,
        })
    }

    // ========== Upgrade ==========

    /// Upgrade one chart
    pub async fn upgrade_chart(&self, chart: &ChartRequest) -> Result<()> {
        self.upgrade_charts(slice::from_ref(chart)).await
    }

    /// Upgrade charts in one action
    ///
    /// Each chart is confirmed in two steps on the same watch: first
    /// `pending-upgrade`, then `deployed`. A `deployed` reading from the
    /// previous revision therefore never counts as success. Each step of
    /// each chart gets the full upgrade budget, starting when that step's
    /// wait begins.
    pub async fn upgrade_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        let watcher = self.watcher();
        let mut subscriptions = Vec::with_capacity(charts.len());
        for chart in charts {
            let target = WatchTarget::chart(&chart.name, &chart.namespace, self.waits.upgrade_timeout);
            subscriptions.push(watcher.subscribe(target).await?);
        }

        for chart in charts {
            info!(chart = %chart.name, namespace = %chart.namespace, version = %chart.version, "upgrading chart");
        }
        self.cluster.upgrade_charts(charts).await?;

        for (chart, mut subscription) in charts.iter().zip(subscriptions) {
            subscription.renew(self.waits.upgrade_timeout);
            subscription.wait_for(&ChartStatusPredicate::upgrading()).await?;
            info!(chart = %chart.name, "upgrade started");

            subscription.renew(self.waits.upgrade_timeout);
            subscription.wait_for(&ChartStatusPredicate::upgraded()).await?;
            info!(chart = %chart.name, version = %chart.version, "chart upgraded");
        }
        Ok(())
    }

    // ========== Uninstall ==========

    /// Uninstall a chart and wait until it is gone
    ///
    /// A chart that no longer exists counts as uninstalled.
    pub async fn uninstall_chart(&self, request: &UninstallRequest) -> Result<()> {
        let target = WatchTarget::chart(&request.name, &request.namespace, self.waits.uninstall_timeout);
        let mut subscription = self.watcher().subscribe(target).await?;

        info!(chart = %request.name, namespace = %request.namespace, "uninstalling chart");
        match self
            .cluster
            .uninstall_chart(&request.name, &request.namespace, &request.options)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(chart = %request.name, "chart already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        subscription.wait_for(&ChartStatusPredicate::uninstalled()).await?;
        info!(chart = %request.name, "chart uninstalled");
        Ok(())
    }
}

/// An install that was submitted but not yet confirmed
pub struct PendingInstall<'a, C: ?Sized> {
    subscriptions: Vec<Subscription<'a, C>>,
    budget: Duration,
}

impl<C: ClusterApi + ?Sized> PendingInstall<'_, C> {
    /// Wait for every chart to be deployed
    ///
    /// Each chart's budget starts when its own wait begins, not when the
    /// batch was submitted.
    pub async fn confirm(self) -> Result<()> {
        for mut subscription in self.subscriptions {
            subscription.renew(self.budget);
            subscription.wait_for(&ChartStatusPredicate::installed()).await?;
            info!(resource = %subscription.target(), "chart deployed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::UninstallOptions;
    use crate::cluster::{MockCall, MockCluster, Scripted};
    use crate::error::ChartError;
    use crate::events::{EventKind, ResourceKind, WatchEvent};
    use crate::status::{AppSnapshot, SummaryState};
    use std::time::Duration;

    fn driver(cluster: &MockCluster) -> ChartDriver<MockCluster> {
        ChartDriver::new(cluster.clone(), WaitConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_waits_for_deployed() {
        let cluster = MockCluster::new();
        let driver = driver(&cluster);

        driver
            .install_chart(&ChartRequest::new("sample", "ns-a", "1.0.0"))
            .await
            .unwrap();

        let status = driver.status("sample", "ns-a").await.unwrap();
        assert!(status.is_already_installed);
        assert_eq!(status.summary_state, SummaryState::Deployed);

        // watch opened before the install was submitted
        let watch = cluster
            .position(&MockCall::Watch {
                kind: ResourceKind::Chart,
                name: "sample".to_string(),
            })
            .unwrap();
        let install = cluster
            .position(&MockCall::Install {
                charts: vec!["sample".to_string()],
            })
            .unwrap();
        assert!(watch < install);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_times_out_without_deployed() {
        let cluster = MockCluster::new();
        cluster.script_chart(
            "sample",
            "ns-a",
            Scripted::states("sample", "ns-a", &[SummaryState::PendingInstall]),
        );
        let driver = driver(&cluster);

        let err = driver
            .install_chart(&ChartRequest::new("sample", "ns-a", "1.0.0"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_rejection_is_not_retried() {
        let cluster = MockCluster::new();
        cluster.script_chart("sample", "ns-a", Scripted::Fail(403));
        let driver = driver(&cluster);

        let err = driver
            .install_chart(&ChartRequest::new("sample", "ns-a", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChartError::Catalog { status: 403, .. }));

        let installs = cluster
            .journal()
            .iter()
            .filter(|c| matches!(c, MockCall::Install { .. }))
            .count();
        assert_eq!(installs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_observes_pending_then_deployed() {
        let cluster = MockCluster::new().with_chart("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        let driver = driver(&cluster);

        driver
            .upgrade_chart(&ChartRequest::new("sample", "ns-a", "1.1.0"))
            .await
            .unwrap();
        assert_eq!(cluster.chart_version("sample", "ns-a").as_deref(), Some("1.1.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_budget_starts_per_chart() {
        let cluster = MockCluster::new();
        cluster.script_chart("sample-crd", "ns-a", Scripted::Silence);
        cluster.script_chart("sample", "ns-a", Scripted::Silence);

        // crd deploys at 100s and the primary at 130s, past a shared 120s budget
        let controller = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(100)).await;
            controller.push_chart_states("sample-crd", "ns-a", "1.0.0", &[SummaryState::Deployed]);
            tokio::time::sleep(Duration::from_secs(30)).await;
            controller.push_chart_states("sample", "ns-a", "1.0.0", &[SummaryState::Deployed]);
        });

        driver(&cluster)
            .install_charts(&[
                ChartRequest::new("sample-crd", "ns-a", "1.0.0"),
                ChartRequest::new("sample", "ns-a", "1.0.0"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_budget_starts_per_chart() {
        let cluster = MockCluster::new()
            .with_chart("sample-crd", "ns-a", "1.0.0", SummaryState::Deployed)
            .with_chart("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        cluster.script_chart("sample-crd", "ns-a", Scripted::Silence);
        cluster.script_chart("sample", "ns-a", Scripted::Silence);

        let controller = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            controller.push_chart_states("sample-crd", "ns-a", "1.1.0", &[SummaryState::PendingUpgrade]);
            tokio::time::sleep(Duration::from_secs(100)).await;
            controller.push_chart_states("sample-crd", "ns-a", "1.1.0", &[SummaryState::Deployed]);
            tokio::time::sleep(Duration::from_secs(30)).await;
            controller.push_chart_states(
                "sample",
                "ns-a",
                "1.1.0",
                &[SummaryState::PendingUpgrade, SummaryState::Deployed],
            );
        });

        driver(&cluster)
            .upgrade_charts(&[
                ChartRequest::new("sample-crd", "ns-a", "1.1.0"),
                ChartRequest::new("sample", "ns-a", "1.1.0"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_step_still_times_out() {
        let cluster = MockCluster::new().with_chart("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        cluster.script_chart("sample", "ns-a", Scripted::Silence);

        let controller = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(121)).await;
            controller.push_chart_states("sample", "ns-a", "1.1.0", &[SummaryState::PendingUpgrade]);
        });

        let err = driver(&cluster)
            .upgrade_chart(&ChartRequest::new("sample", "ns-a", "1.1.0"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_never_succeeds_on_stale_deployed() {
        let cluster = MockCluster::new().with_chart("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        let stale = AppSnapshot::new("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        cluster.script_chart(
            "sample",
            "ns-a",
            Scripted::Events(vec![WatchEvent::modified(serde_json::to_value(&stale).unwrap())]),
        );
        let driver = driver(&cluster);

        let err = driver
            .upgrade_chart(&ChartRequest::new("sample", "ns-a", "1.1.0"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_error_event() {
        let cluster = MockCluster::new().with_chart("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        cluster.script_chart(
            "sample",
            "ns-a",
            Scripted::Events(vec![WatchEvent::error("helm operation failed")]),
        );
        let driver = driver(&cluster);

        let err = driver
            .uninstall_chart(&UninstallRequest::new("sample", "ns-a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("there was an error uninstalling"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_waits_for_deleted() {
        let cluster = MockCluster::new().with_chart("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        let driver = driver(&cluster);

        driver
            .apply(&TransitionRequest::Uninstall(UninstallRequest::new("sample", "ns-a")))
            .await
            .unwrap();

        assert!(cluster.installed_charts().is_empty());
        assert!(cluster.journal().contains(&MockCall::Observed {
            kind: ResourceKind::Chart,
            name: "sample".to_string(),
            event: EventKind::Deleted,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_missing_chart_is_confirmed() {
        let cluster = MockCluster::new();
        let driver = driver(&cluster);

        let request = UninstallRequest {
            name: "sample".to_string(),
            namespace: "ns-a".to_string(),
            options: UninstallOptions {
                timeout: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        };
        driver.uninstall_chart(&request).await.unwrap();
    }
}
