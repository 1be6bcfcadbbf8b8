//! Rancher-backed cluster
//!
//! Chart transitions go through the Rancher catalog action API
//! (`catalog.cattle.io.clusterrepos` / `catalog.cattle.io.apps`), while
//! watches, namespaces and secrets use the Kubernetes API directly.

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams, WatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use super::{ClusterApi, EventStream, PROJECT_ID_ANNOTATION, highest_version};
use crate::actions::{ChartRequest, UninstallOptions};
use crate::config::CatalogConfig;
use crate::error::{ChartError, Result};
use crate::events::{ResourceKind, WatchEvent, WatchTarget};
use crate::status::{AppSnapshot, ChartStatus};

/// API servers reject watch timeouts at or above 295 seconds
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

/// Default server-side timeout for catalog actions
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Cluster reached through a Rancher server
#[derive(Clone)]
pub struct RancherCluster {
    http: reqwest::Client,
    kube: kube::Client,
    base_url: String,
    token: Option<String>,
    cluster_id: String,
    action_timeout: Duration,
}

impl RancherCluster {
    /// Connect using the catalog configuration and the local kubeconfig
    pub async fn connect(config: &CatalogConfig) -> Result<Self> {
        let kube_config = match &config.kube_context {
            Some(context) => {
                let options = kube::config::KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                kube::Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| ChartError::InvalidConfig(format!("kubeconfig: {}", e)))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| ChartError::InvalidConfig(format!("kubeconfig: {}", e)))?,
        };
        let kube = kube::Client::try_from(kube_config)?;
        Self::new(config, kube)
    }

    /// Create with an existing Kubernetes client
    pub fn new(config: &CatalogConfig, kube: kube::Client) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(ChartError::InvalidConfig("catalog url is required".to_string()));
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            kube,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            cluster_id: config.cluster_id.clone(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        })
    }

    /// Override the server-side timeout sent with catalog actions
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Steve API root for the managed cluster
    fn api_base(&self) -> String {
        if self.cluster_id == "local" {
            self.base_url.clone()
        } else {
            format!("{}/k8s/clusters/{}", self.base_url, self.cluster_id)
        }
    }

    fn catalog_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base(), path)
    }

    async fn post_action(&self, path: &str, action: &str, body: &serde_json::Value) -> Result<()> {
        let url = self.catalog_url(path);
        debug!(%url, action, "posting catalog action");

        let mut request = self.http.post(&url).query(&[("action", action)]).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        check_status(response).await.map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut request = self.http.get(self.catalog_url(path)).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = check_status(request.send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    fn apps(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.kube.clone(), namespace, &app_resource())
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.kube.clone())
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.kube.clone(), namespace)
    }

    fn action_timeout(&self) -> String {
        format!("{}s", self.action_timeout.as_secs())
    }
}

/// `catalog.cattle.io/v1` App
fn app_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("catalog.cattle.io", "v1", "App"))
}

/// Project annotation value (`<cluster>:<project>`)
fn project_annotation(cluster_id: &str, project_id: &str) -> String {
    if project_id.contains(':') {
        project_id.to_string()
    } else {
        format!("{}:{}", cluster_id, project_id)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ChartError::Catalog {
        status: status.as_u16(),
        message,
    })
}

/// Namespace and repository shared by every chart of one catalog action
fn batch_scope(charts: &[ChartRequest]) -> Result<(&str, &str)> {
    let first = charts
        .first()
        .ok_or_else(|| ChartError::InvalidConfig("catalog action without charts".to_string()))?;
    for chart in &charts[1..] {
        if chart.namespace != first.namespace || chart.repo != first.repo {
            return Err(ChartError::InvalidConfig(format!(
                "charts '{}' and '{}' must share namespace and repository",
                first.name, chart.name
            )));
        }
    }
    Ok((&first.namespace, &first.repo))
}

fn chart_entry(chart: &ChartRequest) -> serde_json::Value {
    json!({
        "chartName": chart.name,
        "version": chart.version,
        "releaseName": chart.name,
        "annotations": {
            "catalog.cattle.io/ui-source-repo-type": "cluster",
            "catalog.cattle.io/ui-source-repo": chart.repo,
        },
        "values": chart.values_object(),
    })
}

fn install_payload(charts: &[ChartRequest], timeout: &str) -> Result<serde_json::Value> {
    let (namespace, _) = batch_scope(charts)?;
    let project_id = charts.iter().find_map(|c| c.project_id.as_deref());
    Ok(json!({
        "charts": charts.iter().map(chart_entry).collect::<Vec<_>>(),
        "namespace": namespace,
        "projectId": project_id,
        "timeout": timeout,
        "wait": true,
        "disableHooks": false,
        "disableOpenAPIValidation": false,
        "skipCRDs": false,
    }))
}

fn upgrade_payload(charts: &[ChartRequest], timeout: &str) -> Result<serde_json::Value> {
    let (namespace, _) = batch_scope(charts)?;
    let entries: Vec<_> = charts
        .iter()
        .map(|c| {
            let mut entry = chart_entry(c);
            entry["resetValues"] = json!(false);
            entry
        })
        .collect();
    Ok(json!({
        "charts": entries,
        "namespace": namespace,
        "timeout": timeout,
        "wait": true,
        "force": false,
        "cleanupOnFail": false,
        "disableHooks": false,
    }))
}

fn uninstall_payload(options: &UninstallOptions, default_timeout: &str) -> serde_json::Value {
    let timeout = options
        .timeout
        .map(|t| format!("{}s", t.as_secs()))
        .unwrap_or_else(|| default_timeout.to_string());
    json!({
        "timeout": timeout,
        "disableHooks": options.disable_hooks,
        "keepHistory": options.keep_history,
        "dryRun": false,
    })
}

fn watch_params(target: &WatchTarget) -> WatchParams {
    WatchParams::default()
        .fields(&target.field_selector())
        .timeout(target.timeout_seconds().min(MAX_WATCH_TIMEOUT_SECS))
}

/// Translate a kube watch stream into raw events, dropping bookmarks
fn into_event_stream<K, S>(stream: S) -> EventStream
where
    K: serde::Serialize + Send + 'static,
    S: futures::Stream<Item = kube::Result<kube::api::WatchEvent<K>>> + Send + 'static,
{
    stream
        .filter_map(|item| {
            let converted = match item {
                Ok(kube::api::WatchEvent::Added(obj)) => {
                    Some(serde_json::to_value(obj).map(WatchEvent::added).map_err(Into::into))
                }
                Ok(kube::api::WatchEvent::Modified(obj)) => {
                    Some(serde_json::to_value(obj).map(WatchEvent::modified).map_err(Into::into))
                }
                Ok(kube::api::WatchEvent::Deleted(obj)) => Some(
                    serde_json::to_value(obj)
                        .map(|v| WatchEvent::deleted(Some(v)))
                        .map_err(Into::into),
                ),
                Ok(kube::api::WatchEvent::Bookmark(_)) => None,
                Ok(kube::api::WatchEvent::Error(status)) => Some(Ok(WatchEvent::error(status.message))),
                Err(e) => Some(Err(ChartError::from(e))),
            };
            futures::future::ready(converted)
        })
        .boxed()
}

fn ignore_not_found(result: kube::Result<()>) -> Result<()> {
    match result {
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        other => other.map_err(Into::into),
    }
}

#[derive(Debug, Deserialize)]
struct RepoIndex {
    #[serde(default)]
    entries: HashMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
}

#[async_trait]
impl ClusterApi for RancherCluster {
    async fn install_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        let (_, repo) = batch_scope(charts)?;
        let body = install_payload(charts, &self.action_timeout())?;
        self.post_action(&format!("catalog.cattle.io.clusterrepos/{}", repo), "install", &body)
            .await
    }

    async fn upgrade_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        let (_, repo) = batch_scope(charts)?;
        let body = upgrade_payload(charts, &self.action_timeout())?;
        self.post_action(&format!("catalog.cattle.io.clusterrepos/{}", repo), "upgrade", &body)
            .await
    }

    async fn uninstall_chart(
        &self,
        name: &str,
        namespace: &str,
        options: &UninstallOptions,
    ) -> Result<()> {
        let body = uninstall_payload(options, &self.action_timeout());
        let result = self
            .post_action(
                &format!("catalog.cattle.io.apps/{}/{}", namespace, name),
                "uninstall",
                &body,
            )
            .await;

        match result {
            // an unknown cluster id answers 404 too; only a missing App means gone
            Err(ChartError::Catalog { status: 404, message }) => {
                if self
                    .resource_exists(ResourceKind::Chart, name, Some(namespace))
                    .await?
                {
                    Err(ChartError::Catalog { status: 404, message })
                } else {
                    Err(ChartError::NotFound {
                        kind: "chart".to_string(),
                        name: format!("{}/{}", namespace, name),
                    })
                }
            }
            other => other,
        }
    }

    async fn chart_status(&self, name: &str, namespace: &str) -> Result<ChartStatus> {
        match self.apps(namespace).get_opt(name).await? {
            Some(object) => {
                let app: AppSnapshot = serde_json::from_value(serde_json::to_value(object)?)
                    .map_err(|e| ChartError::Decode {
                        resource: format!("chart {}/{}", namespace, name),
                        message: e.to_string(),
                    })?;
                Ok(ChartStatus::from_app(&app))
            }
            None => Ok(ChartStatus::not_installed(name, namespace)),
        }
    }

    async fn latest_chart_version(&self, repo: &str, chart: &str) -> Result<String> {
        let index: RepoIndex = self
            .get_json(
                &format!("catalog.cattle.io.clusterrepos/{}", repo),
                &[("link", "index")],
            )
            .await?;
        index
            .entries
            .get(chart)
            .and_then(|entries| highest_version(entries.iter().map(|e| e.version.as_str())))
            .ok_or_else(|| ChartError::NotFound {
                kind: "chart version".to_string(),
                name: format!("{}/{}", repo, chart),
            })
    }

    async fn watch(&self, target: &WatchTarget) -> Result<EventStream> {
        let params = watch_params(target);
        let namespace = target.namespace.as_deref().unwrap_or("default");
        debug!(resource = %target, "opening watch");

        let stream = match target.kind {
            ResourceKind::Chart => into_event_stream(self.apps(namespace).watch(&params, "0").await?),
            ResourceKind::Namespace => {
                into_event_stream(self.namespaces().watch(&params, "0").await?)
            }
            ResourceKind::Secret => {
                into_event_stream(self.secrets(namespace).watch(&params, "0").await?)
            }
        };
        Ok(stream)
    }

    async fn resource_exists(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<bool> {
        let namespace = namespace.unwrap_or("default");
        let exists = match kind {
            ResourceKind::Chart => self.apps(namespace).get_opt(name).await?.is_some(),
            ResourceKind::Namespace => self.namespaces().get_opt(name).await?.is_some(),
            ResourceKind::Secret => self.secrets(namespace).get_opt(name).await?.is_some(),
        };
        Ok(exists)
    }

    async fn create_namespace(&self, name: &str, project_id: Option<&str>) -> Result<()> {
        let annotations = project_id.map(|p| {
            BTreeMap::from([(
                PROJECT_ID_ANNOTATION.to_string(),
                project_annotation(&self.cluster_id, p),
            )])
        });
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        };
        self.namespaces()
            .create(&PostParams::default(), &namespace)
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let result = self
            .namespaces()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(result)
    }

    async fn create_secret(
        &self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            string_data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        self.secrets(namespace)
            .create(&PostParams::default(), &secret)
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<()> {
        let result = self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kube_client() -> kube::Client {
        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        kube::Client::try_from(config).unwrap()
    }

    fn cluster_for(server: &MockServer, cluster_id: &str) -> RancherCluster {
        let config = CatalogConfig {
            url: server.uri(),
            token: Some("token-abc".to_string()),
            cluster_id: cluster_id.to_string(),
            insecure: false,
            kube_context: None,
        };
        RancherCluster::new(&config, kube_client()).unwrap()
    }

    #[tokio::test]
    async fn test_install_posts_one_action_crd_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/k8s/clusters/c-m-abc/v1/catalog.cattle.io.clusterrepos/rancher-charts"))
            .and(query_param("action", "install"))
            .and(header("authorization", "Bearer token-abc"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"operationName": "helm-op-1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster_for(&server, "c-m-abc");
        let charts = vec![
            ChartRequest::new("sample-crd", "ns-a", "1.0.0"),
            ChartRequest::new("sample", "ns-a", "1.0.0").with_values(json!({"replicas": 2})),
        ];
        cluster.install_charts(&charts).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["namespace"], "ns-a");
        assert_eq!(body["charts"][0]["chartName"], "sample-crd");
        assert_eq!(body["charts"][1]["chartName"], "sample");
        assert_eq!(body["charts"][1]["values"]["replicas"], 2);
        assert_eq!(body["charts"][0]["values"], json!({}));
        assert_eq!(body["timeout"], "600s");
    }

    #[tokio::test]
    async fn test_local_cluster_uses_server_root() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/catalog.cattle.io.clusterrepos/rancher-charts"))
            .and(query_param("action", "upgrade"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster_for(&server, "local");
        cluster
            .upgrade_charts(&[ChartRequest::new("sample", "ns-a", "1.1.0")])
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["charts"][0]["version"], "1.1.0");
        assert_eq!(body["charts"][0]["resetValues"], false);
    }

    /// Rancher and the Kubernetes API both served by `server`
    fn cluster_with_kube(server: &MockServer, cluster_id: &str) -> RancherCluster {
        let config = kube::Config::new(server.uri().parse().unwrap());
        let kube = kube::Client::try_from(config).unwrap();
        let catalog = CatalogConfig {
            url: server.uri(),
            token: None,
            cluster_id: cluster_id.to_string(),
            insecure: false,
            kube_context: None,
        };
        RancherCluster::new(&catalog, kube).unwrap()
    }

    async fn mount_uninstall_404(server: &MockServer, action_path: &str) {
        Mock::given(method("POST"))
            .and(path(action_path))
            .and(query_param("action", "uninstall"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_uninstall_of_missing_app_is_not_found() {
        let server = MockServer::start().await;
        mount_uninstall_404(&server, "/v1/catalog.cattle.io.apps/ns-a/sample").await;
        Mock::given(method("GET"))
            .and(path("/apis/catalog.cattle.io/v1/namespaces/ns-a/apps/sample"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": "apps.catalog.cattle.io \"sample\" not found",
                "reason": "NotFound",
                "code": 404
            })))
            .mount(&server)
            .await;

        let cluster = cluster_with_kube(&server, "local");
        let err = cluster
            .uninstall_chart("sample", "ns-a", &UninstallOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(matches!(err, ChartError::NotFound { ref name, .. } if name == "ns-a/sample"));
    }

    #[tokio::test]
    async fn test_uninstall_404_on_unknown_cluster_is_an_error() {
        let server = MockServer::start().await;
        mount_uninstall_404(
            &server,
            "/k8s/clusters/c-m-typo/v1/catalog.cattle.io.apps/ns-a/sample",
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/apis/catalog.cattle.io/v1/namespaces/ns-a/apps/sample"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "catalog.cattle.io/v1",
                "kind": "App",
                "metadata": {"name": "sample", "namespace": "ns-a"}
            })))
            .mount(&server)
            .await;

        let cluster = cluster_with_kube(&server, "c-m-typo");
        let err = cluster
            .uninstall_chart("sample", "ns-a", &UninstallOptions::default())
            .await
            .unwrap_err();

        assert!(!err.is_not_found());
        assert!(matches!(err, ChartError::Catalog { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_action_timeout_is_sent_with_actions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cluster = cluster_for(&server, "local").with_action_timeout(Duration::from_secs(900));
        cluster
            .install_charts(&[ChartRequest::new("sample", "ns-a", "1.0.0")])
            .await
            .unwrap();
        cluster
            .uninstall_chart("sample", "ns-a", &UninstallOptions::default())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        for request in &requests {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            assert_eq!(body["timeout"], "900s");
        }
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let cluster = cluster_for(&server, "local");
        let err = cluster
            .install_charts(&[ChartRequest::new("sample", "ns-a", "1.0.0")])
            .await
            .unwrap_err();
        assert!(matches!(err, ChartError::Catalog { status: 500, ref message } if message == "internal error"));
    }

    #[tokio::test]
    async fn test_latest_chart_version_from_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog.cattle.io.clusterrepos/rancher-charts"))
            .and(query_param("link", "index"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "entries": {
                    "sample": [{"version": "1.2.0"}, {"version": "1.10.1"}, {"version": "1.9.0"}]
                }
            })))
            .mount(&server)
            .await;

        let cluster = cluster_for(&server, "local");
        assert_eq!(
            cluster
                .latest_chart_version("rancher-charts", "sample")
                .await
                .unwrap(),
            "1.10.1"
        );
        assert!(
            cluster
                .latest_chart_version("rancher-charts", "missing")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_batch_must_share_namespace() {
        let charts = vec![
            ChartRequest::new("sample-crd", "ns-a", "1.0.0"),
            ChartRequest::new("sample", "ns-b", "1.0.0"),
        ];
        assert!(matches!(
            batch_scope(&charts),
            Err(ChartError::InvalidConfig(_))
        ));
        assert!(batch_scope(&[]).is_err());
    }

    #[test]
    fn test_uninstall_payload_timeout() {
        let options = UninstallOptions {
            timeout: Some(Duration::from_secs(90)),
            ..Default::default()
        };
        assert_eq!(uninstall_payload(&options, "600s")["timeout"], "90s");
        assert_eq!(
            uninstall_payload(&UninstallOptions::default(), "600s")["timeout"],
            "600s"
        );
    }

    #[test]
    fn test_project_annotation() {
        assert_eq!(project_annotation("c-abc", "p-xyz"), "c-abc:p-xyz");
        assert_eq!(project_annotation("c-abc", "c-other:p-xyz"), "c-other:p-xyz");
    }
}
