//! Chart status as reported by the `catalog.cattle.io/v1` App resource

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Coarse deployment status of a chart release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryState {
    /// Missing or unrecognised state
    #[default]
    Unknown,
    PendingInstall,
    PendingUpgrade,
    Deployed,
    Failed,
}

impl SummaryState {
    /// Parse the textual state used on the wire; unrecognised values map to `Unknown`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending-install" => Self::PendingInstall,
            "pending-upgrade" => Self::PendingUpgrade,
            "deployed" => Self::Deployed,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
        }
    }

    /// Check if a transition is still running
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingInstall | Self::PendingUpgrade)
    }
}

impl std::fmt::Display for SummaryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a chart's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartStatus {
    pub name: String,
    pub namespace: String,
    pub summary_state: SummaryState,
    pub is_already_installed: bool,
}

impl ChartStatus {
    /// Status of a chart that has no App resource
    pub fn not_installed(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            summary_state: SummaryState::Unknown,
            is_already_installed: false,
        }
    }

    /// Status derived from a decoded App
    pub fn from_app(app: &AppSnapshot) -> Self {
        Self {
            name: app.name().to_string(),
            namespace: app.namespace().to_string(),
            summary_state: app.summary_state(),
            is_already_installed: true,
        }
    }
}

/// The parts of a `catalog.cattle.io/v1` App this crate reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSnapshot {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: AppSpec,

    #[serde(default)]
    pub status: AppStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    #[serde(default)]
    pub chart: Option<AppChart>,

    #[serde(default)]
    pub info: Option<AppInfo>,

    /// Helm release revision
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppChart {
    #[serde(default)]
    pub metadata: Option<AppChartMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppChartMetadata {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    #[serde(default)]
    pub summary: Option<AppSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSummary {
    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub error: bool,

    #[serde(default)]
    pub transitioning: bool,
}

impl AppSnapshot {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// Installed chart version, if reported
    pub fn chart_version(&self) -> Option<&str> {
        self.spec
            .chart
            .as_ref()
            .and_then(|c| c.metadata.as_ref())
            .map(|m| m.version.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Summary state, falling back to the Helm release status
    pub fn summary_state(&self) -> SummaryState {
        let summary = self
            .status
            .summary
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .filter(|s| !s.is_empty());
        let info = self.spec.info.as_ref().and_then(|i| i.status.as_deref());

        summary
            .or(info)
            .map(SummaryState::parse)
            .unwrap_or_default()
    }

    /// Build a minimal App object (used by the mock cluster)
    pub fn new(name: &str, namespace: &str, version: &str, state: SummaryState) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: AppSpec {
                chart: Some(AppChart {
                    metadata: Some(AppChartMetadata {
                        name: name.to_string(),
                        version: version.to_string(),
                    }),
                }),
                info: Some(AppInfo {
                    status: Some(state.as_str().to_string()),
                }),
                version: None,
            },
            status: AppStatus {
                summary: Some(AppSummary {
                    state: Some(state.as_str().to_string()),
                    error: state == SummaryState::Failed,
                    transitioning: state.is_pending(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wire_states() {
        assert_eq!(SummaryState::parse("deployed"), SummaryState::Deployed);
        assert_eq!(SummaryState::parse("pending-upgrade"), SummaryState::PendingUpgrade);
        assert_eq!(SummaryState::parse("Pending-Install"), SummaryState::PendingInstall);
        assert_eq!(SummaryState::parse("failed"), SummaryState::Failed);
        assert_eq!(SummaryState::parse("uninstalling"), SummaryState::Unknown);
        assert_eq!(SummaryState::parse(""), SummaryState::Unknown);
    }

    #[test]
    fn test_decode_app() {
        let app: AppSnapshot = serde_json::from_value(json!({
            "apiVersion": "catalog.cattle.io/v1",
            "kind": "App",
            "metadata": {"name": "sample", "namespace": "ns-a", "generation": 3},
            "spec": {
                "chart": {"metadata": {"name": "sample", "version": "1.0.0"}},
                "info": {"status": "deployed"},
                "version": 2,
                "namespace": "ns-a"
            },
            "status": {
                "summary": {"state": "pending-upgrade", "transitioning": true},
                "observedGeneration": 3
            }
        }))
        .unwrap();

        assert_eq!(app.name(), "sample");
        assert_eq!(app.namespace(), "ns-a");
        assert_eq!(app.chart_version(), Some("1.0.0"));
        assert_eq!(app.spec.version, Some(2));
        // the summary wins over the Helm release status
        assert_eq!(app.summary_state(), SummaryState::PendingUpgrade);
    }

    #[test]
    fn test_summary_falls_back_to_release_status() {
        let app: AppSnapshot = serde_json::from_value(json!({
            "metadata": {"name": "sample", "namespace": "ns-a"},
            "spec": {"info": {"status": "deployed"}},
            "status": {"summary": {"state": ""}}
        }))
        .unwrap();
        assert_eq!(app.summary_state(), SummaryState::Deployed);

        let bare: AppSnapshot = serde_json::from_value(json!({})).unwrap();
        assert_eq!(bare.summary_state(), SummaryState::Unknown);
    }

    #[test]
    fn test_chart_status_from_app() {
        let app = AppSnapshot::new("sample", "ns-a", "1.0.0", SummaryState::Deployed);
        let status = ChartStatus::from_app(&app);
        assert!(status.is_already_installed);
        assert_eq!(status.summary_state, SummaryState::Deployed);

        let missing = ChartStatus::not_installed("sample", "ns-a");
        assert!(!missing.is_already_installed);
        assert_eq!(missing.summary_state, SummaryState::Unknown);
    }
}
