//! Shared command context: configuration loading, flag overrides and connection

use std::path::{Path, PathBuf};
use std::time::Duration;

use chartops_kube::{
    CatalogConfig, ChartDriver, ChartError, ChartFamilySpec, Coordinator, CrdCompanion,
    RancherCluster, SuiteConfig, WaitConfig,
};
use clap::Args;
use tracing::debug;

use crate::error::{CliError, Result};

/// Where the Rancher server is and how to reach it
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Suite configuration file
    #[arg(short = 'c', long, global = true, env = "CHARTOPS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rancher server URL (overrides catalog.url)
    #[arg(long, global = true, env = "CHARTOPS_URL")]
    pub url: Option<String>,

    /// Rancher API token
    #[arg(long, global = true, env = "CHARTOPS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Downstream cluster ID (overrides catalog.clusterId)
    #[arg(long, global = true)]
    pub cluster_id: Option<String>,

    /// Skip TLS verification of the Rancher server
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Kubeconfig context used for watches
    #[arg(long, global = true)]
    pub context: Option<String>,
}

/// Chart selection shared by the chart commands
#[derive(Args, Debug, Clone)]
pub struct ChartArgs {
    /// Chart name; configured families are looked up by this name first
    pub chart: String,

    /// Target namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Catalog repository
    #[arg(long)]
    pub repo: Option<String>,

    /// Also handle the `<chart>-crd` companion chart
    #[arg(long)]
    pub crd: bool,

    /// Explicit CRD companion chart name
    #[arg(long, conflicts_with = "crd")]
    pub crd_name: Option<String>,

    /// Rancher project for the namespace
    #[arg(long)]
    pub project: Option<String>,

    /// Wait budget in seconds for every transition
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Loaded configuration with command-line overrides applied
#[derive(Debug)]
pub struct Context {
    pub suite: SuiteConfig,
}

impl Context {
    /// Load the configuration file (if any) and apply flag overrides
    pub fn load(args: &ConnectionArgs) -> Result<Self> {
        let mut suite = match &args.config {
            Some(path) => read_suite(path)?,
            None => SuiteConfig {
                catalog: CatalogConfig {
                    cluster_id: "local".to_string(),
                    ..Default::default()
                },
                waits: WaitConfig::default(),
                charts: Vec::new(),
            },
        };

        if let Some(url) = &args.url {
            suite.catalog.url = url.clone();
        }
        if let Some(token) = &args.token {
            suite.catalog.token = Some(token.clone());
        }
        if let Some(cluster_id) = &args.cluster_id {
            suite.catalog.cluster_id = cluster_id.clone();
        }
        if args.insecure {
            suite.catalog.insecure = true;
        }
        if let Some(context) = &args.context {
            suite.catalog.kube_context = Some(context.clone());
        }

        if suite.catalog.url.trim().is_empty() {
            return Err(CliError::config_with_help(
                "catalog url is not set",
                "pass --url, set CHARTOPS_URL, or add catalog.url to the config file",
            ));
        }
        suite.validate()?;

        Ok(Self { suite })
    }

    /// Family for a chart: the configured one if present, with flags applied
    pub fn family_spec(&self, args: &ChartArgs) -> Result<ChartFamilySpec> {
        let mut spec = match self.suite.chart(&args.chart) {
            Some(spec) => spec.clone(),
            None => {
                let namespace = args.namespace.clone().ok_or_else(|| {
                    CliError::usage_with_help(
                        format!(
                            "chart '{}' is not in the configuration and no namespace was given",
                            args.chart
                        ),
                        "pass --namespace",
                    )
                })?;
                ChartFamilySpec::new(&args.chart, namespace)
            }
        };

        if let Some(namespace) = &args.namespace {
            spec.namespace = namespace.clone();
        }
        if let Some(repo) = &args.repo {
            spec.repo = repo.clone();
        }
        if args.crd {
            spec.crd = CrdCompanion::Enabled(true);
        }
        if let Some(name) = &args.crd_name {
            spec.crd = CrdCompanion::Named(name.clone());
        }
        if let Some(project) = &args.project {
            spec.project_id = Some(project.clone());
        }
        Ok(spec)
    }

    /// Wait budgets, with `--timeout` replacing every transition budget
    pub fn waits(&self, timeout: Option<u64>) -> Result<WaitConfig> {
        match timeout {
            Some(0) => Err(CliError::usage("--timeout must be at least one second")),
            Some(secs) => Ok(WaitConfig {
                poll_interval: self.suite.waits.poll_interval,
                ..WaitConfig::uniform(Duration::from_secs(secs))
            }),
            None => Ok(self.suite.waits),
        }
    }

    /// Connect to the cluster
    ///
    /// The catalog's own action timeout follows the longest wait budget, so
    /// Rancher never gives up on an operation the watch is still waiting for.
    pub async fn coordinator(&self, waits: WaitConfig) -> Result<Coordinator<RancherCluster>> {
        debug!(
            url = %self.suite.catalog.url,
            cluster_id = %self.suite.catalog.cluster_id,
            "connecting to rancher"
        );
        let cluster = RancherCluster::connect(&self.suite.catalog)
            .await?
            .with_action_timeout(action_timeout(&waits));
        Ok(Coordinator::new(ChartDriver::new(cluster, waits)))
    }
}

fn action_timeout(waits: &WaitConfig) -> Duration {
    waits
        .install_timeout
        .max(waits.upgrade_timeout)
        .max(waits.uninstall_timeout)
}

fn read_suite(path: &Path) -> Result<SuiteConfig> {
    SuiteConfig::read(path).map_err(|e| match e {
        ChartError::Io(e) => CliError::Io {
            message: format!("{}: {}", path.display(), e),
        },
        other => CliError::config_with_help(
            format!("{}: {}", path.display(), other),
            "see the configuration reference in the README",
        ),
    })
}

/// Read chart values from a YAML file
pub fn load_values(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::Io {
        message: format!("{}: {}", path.display(), e),
    })?;
    serde_yaml::from_str(&content).map_err(|e| CliError::Config {
        message: format!("values file {}: {}", path.display(), e),
        help: None,
    })
}
