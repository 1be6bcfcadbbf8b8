//! Mock cluster for testing
//!
//! Keeps charts, namespaces and secrets in memory and pushes watch events to
//! open subscriptions the way the API server does, so waits can be tested
//! without a Kubernetes cluster. Every call is journaled for ordering
//! assertions, including the moment a consumer pulls an event off a watch.

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ClusterApi, EventStream, PROJECT_ID_ANNOTATION, highest_version};
use crate::actions::{ChartRequest, UninstallOptions};
use crate::error::{ChartError, Result};
use crate::events::{EventKind, ResourceKind, WatchEvent, WatchTarget};
use crate::status::{AppSnapshot, ChartStatus, SummaryState};

/// A journaled interaction with the mock cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Watch { kind: ResourceKind, name: String },
    Observed { kind: ResourceKind, name: String, event: EventKind },
    Install { charts: Vec<String> },
    Upgrade { charts: Vec<String> },
    Uninstall { name: String, namespace: String },
    CreateNamespace { name: String },
    DeleteNamespace { name: String },
    CreateSecret { name: String, namespace: String },
    DeleteSecret { name: String, namespace: String },
}

/// Override for what the next operation on an object does
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Apply the operation but push these events instead of the usual ones
    Events(Vec<WatchEvent>),
    /// Apply the operation without pushing any event
    Silence,
    /// Apply the operation and close open watches on the object
    Close,
    /// Reject the operation with this HTTP status
    Fail(u16),
}

impl Scripted {
    /// `Modified` chart events walking through the given states
    pub fn states(name: &str, namespace: &str, states: &[SummaryState]) -> Self {
        Self::Events(
            states
                .iter()
                .map(|s| WatchEvent::modified(app_object(name, namespace, "0.0.0", *s)))
                .collect(),
        )
    }
}

type ObjectKey = (ResourceKind, Option<String>, String);

#[derive(Default)]
struct MockState {
    apps: HashMap<(String, String), AppSnapshot>,
    namespaces: HashMap<String, Option<String>>,
    secrets: HashMap<(String, String), BTreeMap<String, String>>,
    repo_index: HashMap<(String, String), Vec<String>>,
    scripts: HashMap<ObjectKey, VecDeque<Scripted>>,
    subscribers: Vec<(ObjectKey, UnboundedSender<Result<WatchEvent>>)>,
}

impl MockState {
    fn next_script(&mut self, key: &ObjectKey) -> Option<Scripted> {
        self.scripts.get_mut(key).and_then(|q| q.pop_front())
    }

    fn snapshot(&self, key: &ObjectKey) -> Option<serde_json::Value> {
        let (kind, namespace, name) = key;
        let ns = namespace.clone().unwrap_or_default();
        match kind {
            ResourceKind::Chart => self
                .apps
                .get(&(ns, name.clone()))
                .and_then(|app| serde_json::to_value(app).ok()),
            ResourceKind::Namespace => self
                .namespaces
                .get(name)
                .map(|project| namespace_object(name, project.as_deref(), "Active")),
            ResourceKind::Secret => self
                .secrets
                .get(&(ns.clone(), name.clone()))
                .map(|data| secret_object(name, &ns, data)),
        }
    }

    fn push(&mut self, key: &ObjectKey, events: Vec<WatchEvent>) {
        self.subscribers.retain(|(k, tx)| {
            if k != key {
                return !tx.is_closed();
            }
            events
                .iter()
                .all(|event| tx.unbounded_send(Ok(event.clone())).is_ok())
        });
    }

    fn close(&mut self, key: &ObjectKey) {
        self.subscribers.retain(|(k, _)| k != key);
    }

    /// Emit either the scripted events or the defaults
    fn emit(&mut self, key: &ObjectKey, script: Option<Scripted>, defaults: Vec<WatchEvent>) {
        match script {
            Some(Scripted::Events(events)) => self.push(key, events),
            Some(Scripted::Silence) => {}
            Some(Scripted::Close) => self.close(key),
            Some(Scripted::Fail(_)) | None => self.push(key, defaults),
        }
    }
}

/// In-memory cluster for testing
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
    journal: Arc<Mutex<Vec<MockCall>>>,
}

impl MockCluster {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an installed chart
    pub fn with_chart(self, name: &str, namespace: &str, version: &str, state: SummaryState) -> Self {
        self.state().apps.insert(
            (namespace.to_string(), name.to_string()),
            AppSnapshot::new(name, namespace, version, state),
        );
        self
    }

    /// Pre-populate a namespace
    pub fn with_namespace(self, name: &str) -> Self {
        self.state().namespaces.insert(name.to_string(), None);
        self
    }

    /// Publish chart versions in a catalog repository
    pub fn with_chart_versions(self, repo: &str, chart: &str, versions: &[&str]) -> Self {
        self.state().repo_index.insert(
            (repo.to_string(), chart.to_string()),
            versions.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Queue a script for the next operation on an object
    pub fn script(&self, kind: ResourceKind, name: &str, namespace: Option<&str>, script: Scripted) {
        let key = (kind, namespace.map(str::to_string), name.to_string());
        self.state().scripts.entry(key).or_default().push_back(script);
    }

    /// Queue a script for the next operation on a chart
    pub fn script_chart(&self, name: &str, namespace: &str, script: Scripted) {
        self.script(ResourceKind::Chart, name, Some(namespace), script);
    }

    /// Push `Modified` events walking a chart through `states` to open watches
    ///
    /// Stands in for a controller that reports progress some time after the
    /// action was accepted.
    pub fn push_chart_states(&self, name: &str, namespace: &str, version: &str, states: &[SummaryState]) {
        let events = states
            .iter()
            .map(|s| WatchEvent::modified(app_object(name, namespace, version, *s)))
            .collect();
        self.state().push(&chart_key(name, namespace), events);
    }

    /// Every call made so far, in order
    pub fn journal(&self) -> Vec<MockCall> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Index of the first journaled call equal to `call`
    pub fn position(&self, call: &MockCall) -> Option<usize> {
        self.journal().iter().position(|c| c == call)
    }

    /// Number of events a consumer pulled off watches on an object
    pub fn observed_count(&self, kind: ResourceKind, name: &str) -> usize {
        self.journal()
            .iter()
            .filter(|c| matches!(c, MockCall::Observed { kind: k, name: n, .. } if *k == kind && n == name))
            .count()
    }

    /// Installed charts as `(namespace, name)` pairs
    pub fn installed_charts(&self) -> Vec<(String, String)> {
        let mut charts: Vec<_> = self.state().apps.keys().cloned().collect();
        charts.sort();
        charts
    }

    /// Installed version of a chart
    pub fn chart_version(&self, name: &str, namespace: &str) -> Option<String> {
        self.state()
            .apps
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|app| app.chart_version().map(str::to_string))
    }

    /// Existing namespaces
    pub fn namespaces(&self) -> HashSet<String> {
        self.state().namespaces.keys().cloned().collect()
    }

    /// Data of a secret, if it exists
    pub fn secret_data(&self, name: &str, namespace: &str) -> Option<BTreeMap<String, String>> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: MockCall) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

fn chart_key(name: &str, namespace: &str) -> ObjectKey {
    (ResourceKind::Chart, Some(namespace.to_string()), name.to_string())
}

fn namespace_key(name: &str) -> ObjectKey {
    (ResourceKind::Namespace, None, name.to_string())
}

fn secret_key(name: &str, namespace: &str) -> ObjectKey {
    (ResourceKind::Secret, Some(namespace.to_string()), name.to_string())
}

fn app_object(name: &str, namespace: &str, version: &str, state: SummaryState) -> serde_json::Value {
    serde_json::to_value(AppSnapshot::new(name, namespace, version, state)).unwrap_or_default()
}

fn namespace_object(name: &str, project: Option<&str>, phase: &str) -> serde_json::Value {
    let annotations = project.map(|p| {
        BTreeMap::from([(PROJECT_ID_ANNOTATION.to_string(), p.to_string())])
    });
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations,
            ..Default::default()
        },
        status: Some(NamespaceStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    serde_json::to_value(ns).unwrap_or_default()
}

fn secret_object(name: &str, namespace: &str, data: &BTreeMap<String, String>) -> serde_json::Value {
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };
    serde_json::to_value(secret).unwrap_or_default()
}

fn catalog_error(status: u16, message: impl Into<String>) -> ChartError {
    ChartError::Catalog {
        status,
        message: message.into(),
    }
}

fn api_error(code: u16, reason: &str, message: impl Into<String>) -> ChartError {
    ChartError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn install_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        self.record(MockCall::Install {
            charts: charts.iter().map(|c| c.name.clone()).collect(),
        });

        let mut state = self.state();
        let mut scripts = Vec::with_capacity(charts.len());
        for chart in charts {
            let key = chart_key(&chart.name, &chart.namespace);
            let script = state.next_script(&key);
            if let Some(Scripted::Fail(status)) = script {
                return Err(catalog_error(status, format!("install of {} rejected", chart.name)));
            }
            if state
                .apps
                .contains_key(&(chart.namespace.clone(), chart.name.clone()))
            {
                return Err(catalog_error(
                    409,
                    format!("release {} already exists", chart.name),
                ));
            }
            scripts.push((key, script));
        }

        for (chart, (key, script)) in charts.iter().zip(scripts) {
            let app = AppSnapshot::new(
                &chart.name,
                &chart.namespace,
                &chart.version,
                SummaryState::Deployed,
            );
            state
                .apps
                .insert((chart.namespace.clone(), chart.name.clone()), app);
            let defaults = vec![
                WatchEvent::added(app_object(
                    &chart.name,
                    &chart.namespace,
                    &chart.version,
                    SummaryState::PendingInstall,
                )),
                WatchEvent::modified(app_object(
                    &chart.name,
                    &chart.namespace,
                    &chart.version,
                    SummaryState::Deployed,
                )),
            ];
            state.emit(&key, script, defaults);
        }
        Ok(())
    }

    async fn upgrade_charts(&self, charts: &[ChartRequest]) -> Result<()> {
        self.record(MockCall::Upgrade {
            charts: charts.iter().map(|c| c.name.clone()).collect(),
        });

        let mut state = self.state();
        let mut scripts = Vec::with_capacity(charts.len());
        for chart in charts {
            let key = chart_key(&chart.name, &chart.namespace);
            let script = state.next_script(&key);
            if let Some(Scripted::Fail(status)) = script {
                return Err(catalog_error(status, format!("upgrade of {} rejected", chart.name)));
            }
            if !state
                .apps
                .contains_key(&(chart.namespace.clone(), chart.name.clone()))
            {
                return Err(ChartError::NotFound {
                    kind: "chart".to_string(),
                    name: chart.name.clone(),
                });
            }
            scripts.push((key, script));
        }

        for (chart, (key, script)) in charts.iter().zip(scripts) {
            state.apps.insert(
                (chart.namespace.clone(), chart.name.clone()),
                AppSnapshot::new(
                    &chart.name,
                    &chart.namespace,
                    &chart.version,
                    SummaryState::Deployed,
                ),
            );
            let defaults = vec![
                WatchEvent::modified(app_object(
                    &chart.name,
                    &chart.namespace,
                    &chart.version,
                    SummaryState::PendingUpgrade,
                )),
                WatchEvent::modified(app_object(
                    &chart.name,
                    &chart.namespace,
                    &chart.version,
                    SummaryState::Deployed,
                )),
            ];
            state.emit(&key, script, defaults);
        }
        Ok(())
    }

    async fn uninstall_chart(
        &self,
        name: &str,
        namespace: &str,
        _options: &UninstallOptions,
    ) -> Result<()> {
        self.record(MockCall::Uninstall {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });

        let mut state = self.state();
        let key = chart_key(name, namespace);
        let script = state.next_script(&key);
        if let Some(Scripted::Fail(status)) = script {
            return Err(catalog_error(status, format!("uninstall of {} rejected", name)));
        }

        let last = state.snapshot(&key);
        if state
            .apps
            .remove(&(namespace.to_string(), name.to_string()))
            .is_none()
        {
            return Err(ChartError::NotFound {
                kind: "chart".to_string(),
                name: name.to_string(),
            });
        }
        state.emit(&key, script, vec![WatchEvent::deleted(last)]);
        Ok(())
    }

    async fn chart_status(&self, name: &str, namespace: &str) -> Result<ChartStatus> {
        Ok(self
            .state()
            .apps
            .get(&(namespace.to_string(), name.to_string()))
            .map(ChartStatus::from_app)
            .unwrap_or_else(|| ChartStatus::not_installed(name, namespace)))
    }

    async fn latest_chart_version(&self, repo: &str, chart: &str) -> Result<String> {
        let state = self.state();
        state
            .repo_index
            .get(&(repo.to_string(), chart.to_string()))
            .and_then(|versions| highest_version(versions.iter().map(String::as_str)))
            .ok_or_else(|| ChartError::NotFound {
                kind: "chart version".to_string(),
                name: format!("{}/{}", repo, chart),
            })
    }

    async fn watch(&self, target: &WatchTarget) -> Result<EventStream> {
        self.record(MockCall::Watch {
            kind: target.kind,
            name: target.name.clone(),
        });

        let key = (target.kind, target.namespace.clone(), target.name.clone());
        let (tx, rx) = unbounded();
        {
            let mut state = self.state();
            // a fresh watch lists the current object first
            if let Some(object) = state.snapshot(&key) {
                let _ = tx.unbounded_send(Ok(WatchEvent::added(object)));
            }
            state.subscribers.push((key, tx));
        }

        let journal = Arc::clone(&self.journal);
        let kind = target.kind;
        let name = target.name.clone();
        Ok(rx
            .inspect(move |item| {
                if let Ok(event) = item {
                    journal
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(MockCall::Observed {
                            kind,
                            name: name.clone(),
                            event: event.kind,
                        });
                }
            })
            .boxed())
    }

    async fn resource_exists(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<bool> {
        let key = (kind, namespace.map(str::to_string), name.to_string());
        Ok(self.state().snapshot(&key).is_some())
    }

    async fn create_namespace(&self, name: &str, project_id: Option<&str>) -> Result<()> {
        self.record(MockCall::CreateNamespace {
            name: name.to_string(),
        });

        let mut state = self.state();
        let key = namespace_key(name);
        let script = state.next_script(&key);
        if let Some(Scripted::Fail(status)) = script {
            return Err(api_error(status, "Forbidden", format!("cannot create namespace {}", name)));
        }
        if state.namespaces.contains_key(name) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("namespaces \"{}\" already exists", name),
            ));
        }

        state
            .namespaces
            .insert(name.to_string(), project_id.map(str::to_string));
        let object = namespace_object(name, project_id, "Active");
        state.emit(&key, script, vec![WatchEvent::added(object)]);
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.record(MockCall::DeleteNamespace {
            name: name.to_string(),
        });

        let mut state = self.state();
        let key = namespace_key(name);
        let script = state.next_script(&key);
        if let Some(Scripted::Fail(status)) = script {
            return Err(api_error(status, "Forbidden", format!("cannot delete namespace {}", name)));
        }

        let Some(project) = state.namespaces.remove(name) else {
            return Ok(());
        };
        state.secrets.retain(|(ns, _), _| ns != name);
        let terminating = namespace_object(name, project.as_deref(), "Terminating");
        state.emit(
            &key,
            script,
            vec![
                WatchEvent::modified(terminating.clone()),
                WatchEvent::deleted(Some(terminating)),
            ],
        );
        Ok(())
    }

    async fn create_secret(
        &self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        self.record(MockCall::CreateSecret {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });

        let mut state = self.state();
        let key = secret_key(name, namespace);
        let script = state.next_script(&key);
        if let Some(Scripted::Fail(status)) = script {
            return Err(api_error(status, "Forbidden", format!("cannot create secret {}", name)));
        }
        if !state.namespaces.contains_key(namespace) {
            return Err(api_error(
                404,
                "NotFound",
                format!("namespaces \"{}\" not found", namespace),
            ));
        }

        let object = secret_object(name, namespace, &data);
        state
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        state.emit(&key, script, vec![WatchEvent::added(object)]);
        Ok(())
    }

    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<()> {
        self.record(MockCall::DeleteSecret {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });

        let mut state = self.state();
        let key = secret_key(name, namespace);
        let script = state.next_script(&key);
        if let Some(Scripted::Fail(status)) = script {
            return Err(api_error(status, "Forbidden", format!("cannot delete secret {}", name)));
        }

        let Some(data) = state
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
        else {
            return Ok(());
        };
        let object = secret_object(name, namespace, &data);
        state.emit(&key, script, vec![WatchEvent::deleted(Some(object))]);
        Ok(())
    }
}
