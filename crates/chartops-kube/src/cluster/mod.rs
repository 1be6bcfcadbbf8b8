//! Cluster-facing boundary
//!
//! Everything the orchestrator does to a cluster goes through [`ClusterApi`]:
//! - **Catalog actions**: install, upgrade and uninstall charts
//! - **Watches**: field-selector scoped, timeout-bounded event streams for
//!   charts, namespaces and secrets
//! - **Ancillary resources**: namespaces and secrets created around a chart
//!
//! [`RancherCluster`] talks to a real Rancher server; [`MockCluster`] keeps
//! everything in memory for tests.

mod mock;
mod rancher;

pub use mock::{MockCall, MockCluster, Scripted};
pub use rancher::RancherCluster;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::actions::{ChartRequest, UninstallOptions};
use crate::error::Result;
use crate::events::{ResourceKind, WatchEvent, WatchTarget};
use crate::status::ChartStatus;

/// Annotation binding a namespace to a Rancher project
pub const PROJECT_ID_ANNOTATION: &str = "field.cattle.io/projectId";

/// Push-driven stream of watch events; ends when the server closes the watch
pub type EventStream = BoxStream<'static, Result<WatchEvent>>;

/// Operations the orchestrator needs from a cluster
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit one install action for all charts, in slice order
    async fn install_charts(&self, charts: &[ChartRequest]) -> Result<()>;

    /// Submit one upgrade action for all charts, in slice order
    async fn upgrade_charts(&self, charts: &[ChartRequest]) -> Result<()>;

    /// Submit an uninstall action
    async fn uninstall_chart(
        &self,
        name: &str,
        namespace: &str,
        options: &UninstallOptions,
    ) -> Result<()>;

    /// Current status of a chart (not installed when no App exists)
    async fn chart_status(&self, name: &str, namespace: &str) -> Result<ChartStatus>;

    /// Highest version of a chart published in a catalog repository
    async fn latest_chart_version(&self, repo: &str, chart: &str) -> Result<String>;

    /// Open a watch on a single object
    async fn watch(&self, target: &WatchTarget) -> Result<EventStream>;

    /// Check whether an object exists
    async fn resource_exists(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<bool>;

    /// Create a namespace, optionally inside a Rancher project
    async fn create_namespace(&self, name: &str, project_id: Option<&str>) -> Result<()>;

    /// Delete a namespace (already-gone is not an error)
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Create an opaque secret
    async fn create_secret(
        &self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Delete a secret (already-gone is not an error)
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<()>;
}

#[async_trait]
impl<T: ClusterApi + ?Sized> ClusterApi for std::sync::Arc<T> {
    async fn install_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        (**self).install_charts(charts).await
    }

    async fn upgrade_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        (**self).upgrade_charts(charts).await
    }

    async fn uninstall_chart(
        &self,
        name: &str,
        namespace: &str,
        options: &UninstallOptions,
    ) -> Result<()> {
        (**self).uninstall_chart(name, namespace, options).await
    }

    async fn chart_status(&self, name: &str, namespace: &str) -> Result<ChartStatus> {
        (**self).chart_status(name, namespace).await
    }

    async fn latest_chart_version(&self, repo: &str, chart: &str) -> Result<String> {
        (**self).latest_chart_version(repo, chart).await
    }

    async fn watch(&self, target: &WatchTarget) -> Result<EventStream> {
        (**self).watch(target).await
    }

    async fn resource_exists(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<bool> {
        (**self).resource_exists(kind, name, namespace).await
    }

    async fn create_namespace(&self, name: &str, project_id: Option<&str>) -> Result<()> {
        (**self).create_namespace(name, project_id).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        (**self).delete_namespace(name).await
    }

    async fn create_secret(
        &self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        (**self).create_secret(name, namespace, data).await
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<()> {
        (**self).delete_secret(name, namespace).await
    }
}

/// Highest semver among `versions`; unparsable entries are ignored
pub(crate) fn highest_version<'a>(versions: impl Iterator<Item = &'a str>) -> Option<String> {
    versions
        .filter_map(|v| semver::Version::parse(v.trim_start_matches('v')).ok().map(|p| (p, v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_version_uses_semver_order() {
        let versions = ["1.2.0", "1.10.0", "v1.9.9", "garbage"];
        assert_eq!(highest_version(versions.into_iter()).as_deref(), Some("1.10.0"));
        assert_eq!(highest_version(std::iter::empty()), None);
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        let versions = ["2.0.0-rc1", "1.9.0", "2.0.0"];
        assert_eq!(highest_version(versions.into_iter()).as_deref(), Some("2.0.0"));
    }
}
