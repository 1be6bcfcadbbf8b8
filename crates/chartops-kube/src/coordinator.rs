//! Multi-resource ordering
//!
//! A chart family is a primary chart, an optional CRD companion chart, and
//! the ancillary resources provisioned for them (namespace, secret). The
//! coordinator owns the ordering between those pieces:
//!
//! - **Install**: namespace, then secret, then both charts in one action
//!   with the CRD chart first
//! - **Upgrade**: one action, CRD chart first, each confirmed in two steps
//! - **Uninstall**: primary chart, CRD chart, secret, namespace; each removal
//!   is confirmed before the next one starts
//!
//! Every provisioning step that succeeds adds its compensation to the
//! family's cleanup bundle, which is registered on the session even when a
//! later step fails. Chart uninstalls are added before the install action
//! is submitted, so a rejected or unconfirmed install is still torn down.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::info;

use crate::actions::{ChartRequest, UninstallRequest};
use crate::cleanup::{CleanupAction, CleanupBundle, CleanupExecutor, CleanupStack};
use crate::cluster::ClusterApi;
use crate::config::{ChartFamilySpec, SecretSpec};
use crate::driver::ChartDriver;
use crate::error::Result;
use crate::events::{ResourceKind, WatchTarget};
use crate::session::Session;
use crate::status::ChartStatus;
use crate::watcher::{NamespacePredicate, SecretPredicate};

/// A chart family pinned to a version
#[derive(Debug, Clone)]
pub struct ChartFamily {
    pub spec: ChartFamilySpec,
    pub version: String,
}

impl ChartFamily {
    pub fn new(spec: ChartFamilySpec, version: impl Into<String>) -> Self {
        Self {
            spec,
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn namespace(&self) -> &str {
        &self.spec.namespace
    }

    /// Primary chart at `version`
    pub fn primary(&self, version: &str) -> ChartRequest {
        let mut request = ChartRequest::new(&self.spec.name, &self.spec.namespace, version)
            .with_repo(&self.spec.repo)
            .with_values(self.spec.values.clone());
        if let Some(project) = &self.spec.project_id {
            request = request.with_project(project);
        }
        request
    }

    /// CRD companion at `version`, if the family has one
    pub fn crd(&self, version: &str) -> Option<ChartRequest> {
        self.spec.crd_chart_name().map(|name| {
            let mut request =
                ChartRequest::new(name, &self.spec.namespace, version).with_repo(&self.spec.repo);
            request.project_id = self.spec.project_id.clone();
            request
        })
    }

    /// Charts in submission order: CRD companion first
    pub fn charts(&self, version: &str) -> Vec<ChartRequest> {
        self.crd(version)
            .into_iter()
            .chain(std::iter::once(self.primary(version)))
            .collect()
    }

    /// Full teardown of the family, whatever was provisioned
    pub fn teardown_bundle(&self) -> CleanupBundle {
        let mut bundle = CleanupBundle::new(self.name());
        bundle.push(CleanupAction::uninstall_chart(self.name(), self.namespace()));
        if let Some(crd) = self.spec.crd_chart_name() {
            bundle.push(CleanupAction::uninstall_chart(crd, self.namespace()));
        }
        if let Some(secret) = &self.spec.secret {
            bundle.push(CleanupAction::delete_secret(&secret.name, self.namespace()));
        }
        if self.spec.create_namespace {
            bundle.push(CleanupAction::delete_namespace(self.namespace()));
        }
        bundle
    }
}

/// Random alphanumeric values for every key of a secret
fn generate_secret_data(spec: &SecretSpec) -> BTreeMap<String, String> {
    let mut rng = rand::rng();
    spec.keys
        .iter()
        .map(|key| {
            let value: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(spec.length)
                .map(char::from)
                .collect();
            (key.clone(), value)
        })
        .collect()
}

/// Sequences composite operations over chart families
pub struct Coordinator<C> {
    driver: ChartDriver<C>,
}

impl<C: ClusterApi> Coordinator<C> {
    pub fn new(driver: ChartDriver<C>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &ChartDriver<C> {
        &self.driver
    }

    /// Pin a family to its configured version, or the latest one in the repository
    pub async fn resolve(&self, spec: &ChartFamilySpec) -> Result<ChartFamily> {
        let version = match &spec.version {
            Some(version) => version.clone(),
            None => {
                let latest = self
                    .driver
                    .cluster()
                    .latest_chart_version(&spec.repo, &spec.name)
                    .await?;
                info!(chart = %spec.name, version = %latest, "resolved latest chart version");
                latest
            }
        };
        Ok(ChartFamily::new(spec.clone(), version))
    }

    /// Install a family and register its teardown on the session
    ///
    /// An already installed primary chart is left alone: its status is
    /// returned and nothing is registered.
    pub async fn install_family(&self, family: &ChartFamily, session: &mut Session) -> Result<ChartStatus> {
        let status = self.driver.status(family.name(), family.namespace()).await?;
        if status.is_already_installed {
            info!(chart = %family.name(), state = %status.summary_state, "chart already installed");
            return Ok(status);
        }

        let mut bundle = CleanupBundle::new(family.name());
        let result = self.provision(family, &mut bundle).await;
        if !bundle.is_empty() {
            session.register_cleanup(bundle);
        }
        result?;

        self.driver.status(family.name(), family.namespace()).await
    }

    async fn provision(&self, family: &ChartFamily, bundle: &mut CleanupBundle) -> Result<()> {
        let cluster = self.driver.cluster();
        let waits = self.driver.waits();
        let watcher = self.driver.watcher();
        let namespace = family.namespace();

        if family.spec.create_namespace
            && !cluster
                .resource_exists(ResourceKind::Namespace, namespace, None)
                .await?
        {
            let mut subscription = watcher
                .subscribe(WatchTarget::namespace(namespace, waits.install_timeout))
                .await?;
            info!(%namespace, "creating namespace");
            cluster
                .create_namespace(namespace, family.spec.project_id.as_deref())
                .await?;
            bundle.prepend(CleanupAction::delete_namespace(namespace));
            subscription.wait_for(&NamespacePredicate::active()).await?;
        }

        if let Some(secret) = &family.spec.secret {
            let mut subscription = watcher
                .subscribe(WatchTarget::secret(&secret.name, namespace, waits.install_timeout))
                .await?;
            info!(secret = %secret.name, %namespace, "creating secret");
            cluster
                .create_secret(&secret.name, namespace, generate_secret_data(secret))
                .await?;
            bundle.prepend(CleanupAction::delete_secret(&secret.name, namespace));
            subscription.wait_for(&SecretPredicate::present()).await?;
        }

        let charts = family.charts(&family.version);
        // registered before submission: a rejected batch may still have
        // created some apps, and a missing one uninstalls as a no-op.
        // primary first at teardown
        for chart in &charts {
            bundle.prepend(CleanupAction::uninstall_chart(&chart.name, &chart.namespace));
        }
        self.driver.begin_install(&charts).await?.confirm().await
    }

    /// Upgrade a family to `version`, CRD companion first
    pub async fn upgrade_family(&self, family: &ChartFamily, version: &str) -> Result<ChartStatus> {
        self.driver.upgrade_charts(&family.charts(version)).await?;
        self.driver.status(family.name(), family.namespace()).await
    }

    /// Remove a family now, outside of any session
    pub async fn uninstall_family(&self, family: &ChartFamily) -> Result<()> {
        self.teardown(family.teardown_bundle()).await
    }

    /// Run one bundle, halting on its first failure
    pub async fn teardown(&self, bundle: CleanupBundle) -> Result<()> {
        let mut stack = CleanupStack::new();
        stack.register(bundle);
        stack.run_all(self).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let cluster = self.driver.cluster();
        if !cluster
            .resource_exists(ResourceKind::Namespace, name, None)
            .await?
        {
            return Ok(());
        }

        let target = WatchTarget::namespace(name, self.driver.waits().uninstall_timeout);
        let mut subscription = self.driver.watcher().subscribe(target).await?;
        info!(namespace = %name, "deleting namespace");
        cluster.delete_namespace(name).await?;
        subscription.wait_for(&NamespacePredicate::gone()).await
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<()> {
        let cluster = self.driver.cluster();
        if !cluster
            .resource_exists(ResourceKind::Secret, name, Some(namespace))
            .await?
        {
            return Ok(());
        }

        let target = WatchTarget::secret(name, namespace, self.driver.waits().uninstall_timeout);
        let mut subscription = self.driver.watcher().subscribe(target).await?;
        info!(secret = %name, %namespace, "deleting secret");
        cluster.delete_secret(name, namespace).await?;
        subscription.wait_for(&SecretPredicate::gone()).await
    }
}

#[async_trait]
impl<C: ClusterApi> CleanupExecutor for Coordinator<C> {
    async fn execute(&self, action: CleanupAction) -> Result<()> {
        match action {
            CleanupAction::UninstallChart { name, namespace } => {
                self.driver
                    .uninstall_chart(&UninstallRequest::new(name, namespace))
                    .await
            }
            CleanupAction::DeleteSecret { name, namespace } => {
                self.delete_secret(&name, &namespace).await
            }
            CleanupAction::DeleteNamespace { name } => self.delete_namespace(&name).await,
            CleanupAction::Custom { func, .. } => func().await,
        }
    }
}
