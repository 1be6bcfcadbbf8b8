//! Configuration for chart lifecycle runs
//!
//! Wait budgets are explicit values handed to the driver instead of
//! process-wide defaults. A [`SuiteConfig`] file ties together the catalog
//! endpoint, the wait budgets and the chart families a run operates on:
//!
//! ```yaml
//! catalog:
//!   url: https://rancher.example.com
//!   clusterId: c-m-abc123
//! waits:
//!   installTimeout: 3m
//!   pollInterval: 2s
//! charts:
//!   - name: rancher-monitoring
//!     namespace: cattle-monitoring-system
//!     crd: true
//!     createNamespace: true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{ChartError, Result};

/// Default catalog repository charts are pulled from
pub const DEFAULT_REPO: &str = "rancher-charts";

/// Default budget for every transition wait (2 minutes)
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait budgets for chart transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    /// Budget for an install to reach `deployed`
    #[serde(default = "default_transition_timeout", with = "humantime_serde")]
    pub install_timeout: Duration,

    /// Budget for each of the two upgrade waits
    #[serde(default = "default_transition_timeout", with = "humantime_serde")]
    pub upgrade_timeout: Duration,

    /// Budget for an uninstall (or ancillary delete) to be confirmed
    #[serde(default = "default_transition_timeout", with = "humantime_serde")]
    pub uninstall_timeout: Duration,

    /// Delay before re-opening a watch the API server closed early
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            install_timeout: default_transition_timeout(),
            upgrade_timeout: default_transition_timeout(),
            uninstall_timeout: default_transition_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl WaitConfig {
    /// Use the same budget for every transition
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            install_timeout: timeout,
            upgrade_timeout: timeout,
            uninstall_timeout: timeout,
            ..Default::default()
        }
    }

    /// Reject budgets that would make waits meaningless
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("installTimeout", self.install_timeout),
            ("upgradeTimeout", self.upgrade_timeout),
            ("uninstallTimeout", self.uninstall_timeout),
        ] {
            if value.is_zero() {
                return Err(ChartError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

fn default_transition_timeout() -> Duration {
    DEFAULT_TRANSITION_TIMEOUT
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_cluster_id() -> String {
    "local".to_string()
}

fn default_repo() -> String {
    DEFAULT_REPO.to_string()
}

fn default_secret_length() -> usize {
    32
}

/// Rancher catalog endpoint and the cluster it manages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogConfig {
    /// Rancher server URL (e.g. `https://rancher.example.com`)
    #[serde(default)]
    pub url: String,

    /// Bearer token for the Rancher API
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Downstream cluster ID (`local` for the Rancher management cluster)
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Skip TLS verification of the Rancher endpoint
    #[serde(default)]
    pub insecure: bool,

    /// Kubeconfig context used for watches (current context when unset)
    #[serde(default)]
    pub kube_context: Option<String>,
}

/// CRD companion declaration: `true` for `<name>-crd`, or an explicit chart name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrdCompanion {
    Enabled(bool),
    Named(String),
}

impl Default for CrdCompanion {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

/// A secret generated alongside a chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSpec {
    /// Secret name
    pub name: String,

    /// Keys to populate with generated values
    pub keys: Vec<String>,

    /// Length of each generated value
    #[serde(default = "default_secret_length")]
    pub length: usize,
}

/// A primary chart plus its optional CRD companion and ancillary resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartFamilySpec {
    /// Primary chart name (also used as release name)
    pub name: String,

    /// Namespace the chart is installed into
    pub namespace: String,

    /// Catalog repository
    #[serde(default = "default_repo")]
    pub repo: String,

    /// Version to install (latest from the repository index when unset)
    #[serde(default)]
    pub version: Option<String>,

    /// Version to upgrade to during a lifecycle run
    #[serde(default)]
    pub upgrade_version: Option<String>,

    /// CRD companion chart
    #[serde(default)]
    pub crd: CrdCompanion,

    /// Chart values
    #[serde(default)]
    pub values: serde_json::Value,

    /// Rancher project the namespace belongs to
    #[serde(default)]
    pub project_id: Option<String>,

    /// Create (and later delete) the namespace
    #[serde(default)]
    pub create_namespace: bool,

    /// Secret generated before the chart is installed
    #[serde(default)]
    pub secret: Option<SecretSpec>,
}

impl ChartFamilySpec {
    /// Create a family for a single chart with defaults
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            repo: default_repo(),
            version: None,
            upgrade_version: None,
            crd: CrdCompanion::default(),
            values: serde_json::Value::Null,
            project_id: None,
            create_namespace: false,
            secret: None,
        }
    }

    /// Name of the CRD companion chart, if any
    pub fn crd_chart_name(&self) -> Option<String> {
        match &self.crd {
            CrdCompanion::Enabled(true) => Some(format!("{}-crd", self.name)),
            CrdCompanion::Enabled(false) => None,
            CrdCompanion::Named(name) => Some(name.clone()),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
    /// Catalog endpoint
    pub catalog: CatalogConfig,

    /// Wait budgets
    #[serde(default)]
    pub waits: WaitConfig,

    /// Chart families
    #[serde(default)]
    pub charts: Vec<ChartFamilySpec>,
}

impl SuiteConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file without validating it
    ///
    /// Callers that merge overrides into the file call [`validate`](Self::validate)
    /// once the merge is done.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Parse and validate configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: SuiteConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistencies
    pub fn validate(&self) -> Result<()> {
        if self.catalog.url.trim().is_empty() {
            return Err(ChartError::InvalidConfig("catalog.url is required".to_string()));
        }
        url::Url::parse(&self.catalog.url).map_err(|e| {
            ChartError::InvalidConfig(format!("catalog.url '{}': {}", self.catalog.url, e))
        })?;
        self.waits.validate()?;

        let mut seen = HashSet::new();
        for chart in &self.charts {
            if chart.name.is_empty() || chart.namespace.is_empty() {
                return Err(ChartError::InvalidConfig(
                    "every chart needs a name and a namespace".to_string(),
                ));
            }
            if !seen.insert(chart.name.as_str()) {
                return Err(ChartError::InvalidConfig(format!(
                    "chart '{}' is declared twice",
                    chart.name
                )));
            }
            if chart.crd_chart_name().as_deref() == Some(chart.name.as_str()) {
                return Err(ChartError::InvalidConfig(format!(
                    "chart '{}' cannot be its own CRD companion",
                    chart.name
                )));
            }
            if let Some(secret) = &chart.secret
                && (secret.keys.is_empty() || secret.length == 0)
            {
                return Err(ChartError::InvalidConfig(format!(
                    "secret '{}' needs at least one key and a non-zero length",
                    secret.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a chart family by primary chart name
    pub fn chart(&self, name: &str) -> Option<&ChartFamilySpec> {
        self.charts.iter().find(|c| c.name == name)
    }
}
