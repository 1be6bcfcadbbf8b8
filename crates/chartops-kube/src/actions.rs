//! Transition requests for install, upgrade, and uninstall operations

use std::time::Duration;

use crate::config::DEFAULT_REPO;

/// A chart to install or upgrade
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    /// Chart name (also used as release name)
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Catalog repository the chart comes from
    pub repo: String,

    /// Chart version
    pub version: String,

    /// Chart values
    pub values: serde_json::Value,

    /// Rancher project for the release namespace
    pub project_id: Option<String>,
}

impl ChartRequest {
    /// Create a request with empty values from the default repository
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            repo: DEFAULT_REPO.to_string(),
            version: version.into(),
            values: serde_json::Value::Object(Default::default()),
            project_id: None,
        }
    }

    /// Set chart values
    pub fn with_values(mut self, values: serde_json::Value) -> Self {
        self.values = values;
        self
    }

    /// Pull the chart from another repository
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    /// Attach the release to a Rancher project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Values as a JSON object (`null` becomes `{}`)
    pub fn values_object(&self) -> serde_json::Value {
        match &self.values {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other.clone(),
        }
    }
}

/// Options for uninstall
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    /// Server-side timeout forwarded to the catalog action
    pub timeout: Option<Duration>,

    /// Skip pre/post-delete hooks
    pub disable_hooks: bool,

    /// Keep Helm release history
    pub keep_history: bool,
}

/// A chart to uninstall
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallRequest {
    pub name: String,
    pub namespace: String,
    pub options: UninstallOptions,
}

impl UninstallRequest {
    /// Create an uninstall request with default options
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            options: UninstallOptions::default(),
        }
    }

    /// Forward a server-side timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

/// A single chart transition
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionRequest {
    Install(ChartRequest),
    Upgrade(ChartRequest),
    Uninstall(UninstallRequest),
}

impl TransitionRequest {
    /// Chart the transition targets
    pub fn chart_name(&self) -> &str {
        match self {
            Self::Install(r) | Self::Upgrade(r) => &r.name,
            Self::Uninstall(r) => &r.name,
        }
    }

    /// Namespace the transition targets
    pub fn namespace(&self) -> &str {
        match self {
            Self::Install(r) | Self::Upgrade(r) => &r.namespace,
            Self::Uninstall(r) => &r.namespace,
        }
    }

    /// Verb used in log lines and error messages
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Install(_) => "install",
            Self::Upgrade(_) => "upgrade",
            Self::Uninstall(_) => "uninstall",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chart_request_builder() {
        let request = ChartRequest::new("sample", "ns-a", "1.0.0")
            .with_repo("partner-charts")
            .with_project("c-abc:p-xyz")
            .with_values(json!({"replicas": 2}));

        assert_eq!(request.repo, "partner-charts");
        assert_eq!(request.project_id.as_deref(), Some("c-abc:p-xyz"));
        assert_eq!(request.values["replicas"], 2);
    }

    #[test]
    fn test_null_values_become_object() {
        let request = ChartRequest::new("sample", "ns-a", "1.0.0").with_values(json!(null));
        assert_eq!(request.values_object(), json!({}));
    }

    #[test]
    fn test_transition_accessors() {
        let install = TransitionRequest::Install(ChartRequest::new("sample", "ns-a", "1.0.0"));
        assert_eq!(install.chart_name(), "sample");
        assert_eq!(install.verb(), "install");

        let uninstall = TransitionRequest::Uninstall(
            UninstallRequest::new("sample", "ns-a").with_timeout(Duration::from_secs(60)),
        );
        assert_eq!(uninstall.namespace(), "ns-a");
        assert_eq!(uninstall.verb(), "uninstall");
    }
}
