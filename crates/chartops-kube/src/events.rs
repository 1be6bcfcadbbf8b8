//! Watch events and their typed decoding
//!
//! The cluster boundary hands out raw JSON snapshots; [`DecodedEvent::decode`]
//! turns them into a [`WatchedResource`] once, so predicates never cast
//! objects themselves.

use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use serde::{Deserialize, Serialize};

use crate::error::{ChartError, Result};
use crate::status::{AppSnapshot, ChartStatus};

/// Kinds of resources the orchestrator watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// `catalog.cattle.io/v1` App
    Chart,
    Namespace,
    Secret,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chart => write!(f, "chart"),
            Self::Namespace => write!(f, "namespace"),
            Self::Secret => write!(f, "secret"),
        }
    }
}

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    Error,
}

/// A raw event as pushed by the API server
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub kind: EventKind,

    /// Object snapshot (the status body for `Error` events)
    pub object: Option<serde_json::Value>,
}

impl WatchEvent {
    pub fn added(object: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Added,
            object: Some(object),
        }
    }

    pub fn modified(object: serde_json::Value) -> Self {
        Self {
            kind: EventKind::Modified,
            object: Some(object),
        }
    }

    pub fn deleted(object: Option<serde_json::Value>) -> Self {
        Self {
            kind: EventKind::Deleted,
            object,
        }
    }

    /// Error event carrying an API status message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            object: Some(serde_json::json!({ "message": message.into() })),
        }
    }
}

/// What a watch subscribes to: one named object of one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub kind: ResourceKind,

    /// Object name, turned into a `metadata.name` field selector
    pub name: String,

    /// Namespace (`None` for cluster-scoped kinds)
    pub namespace: Option<String>,

    /// Wait budget for this subscription
    pub timeout: Duration,
}

impl WatchTarget {
    pub fn chart(name: impl Into<String>, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: ResourceKind::Chart,
            name: name.into(),
            namespace: Some(namespace.into()),
            timeout,
        }
    }

    pub fn namespace(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: ResourceKind::Namespace,
            name: name.into(),
            namespace: None,
            timeout,
        }
    }

    pub fn secret(name: impl Into<String>, namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: ResourceKind::Secret,
            name: name.into(),
            namespace: Some(namespace.into()),
            timeout,
        }
    }

    /// Field selector scoping the watch to this object
    pub fn field_selector(&self) -> String {
        format!("metadata.name={}", self.name)
    }

    /// Server-side watch timeout in whole seconds (at least one)
    pub fn timeout_seconds(&self) -> u32 {
        self.timeout.as_secs().clamp(1, u32::MAX as u64) as u32
    }

    /// Same target with a different budget
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Namespace fields the predicates look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub phase: Option<String>,
}

impl NamespaceSnapshot {
    /// A namespace is usable unless it is being torn down
    pub fn is_active(&self) -> bool {
        self.phase.as_deref() != Some("Terminating")
    }
}

/// Secret fields the predicates look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSnapshot {
    pub name: String,
    pub namespace: String,
    pub keys: Vec<String>,
}

/// A decoded object
#[derive(Debug, Clone, PartialEq)]
pub enum WatchedResource {
    Chart(ChartStatus),
    Namespace(NamespaceSnapshot),
    Secret(SecretSnapshot),
}

/// An event after the typed decode step
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub kind: EventKind,

    /// `None` when the event carried no object (or was an `Error`)
    pub resource: Option<WatchedResource>,

    /// Status message of an `Error` event
    pub message: Option<String>,
}

impl DecodedEvent {
    /// Decode a raw event for the given resource kind
    pub fn decode(resource_kind: ResourceKind, event: WatchEvent) -> Result<Self> {
        if event.kind == EventKind::Error {
            let message = event
                .object
                .as_ref()
                .and_then(|o| o.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string);
            return Ok(Self {
                kind: event.kind,
                resource: None,
                message,
            });
        }

        let resource = match event.object {
            None | Some(serde_json::Value::Null) => None,
            Some(object) => Some(decode_object(resource_kind, object)?),
        };

        Ok(Self {
            kind: event.kind,
            resource,
            message: None,
        })
    }

    /// Chart status carried by the event, if any
    pub fn chart(&self) -> Option<&ChartStatus> {
        match &self.resource {
            Some(WatchedResource::Chart(status)) => Some(status),
            _ => None,
        }
    }
}

fn decode_object(kind: ResourceKind, object: serde_json::Value) -> Result<WatchedResource> {
    let decode_err = |e: serde_json::Error| ChartError::Decode {
        resource: kind.to_string(),
        message: e.to_string(),
    };

    match kind {
        ResourceKind::Chart => {
            let app: AppSnapshot = serde_json::from_value(object).map_err(decode_err)?;
            Ok(WatchedResource::Chart(ChartStatus::from_app(&app)))
        }
        ResourceKind::Namespace => {
            let ns: Namespace = serde_json::from_value(object).map_err(decode_err)?;
            Ok(WatchedResource::Namespace(NamespaceSnapshot {
                name: ns.metadata.name.unwrap_or_default(),
                phase: ns.status.and_then(|s| s.phase),
            }))
        }
        ResourceKind::Secret => {
            let secret: Secret = serde_json::from_value(object).map_err(decode_err)?;
            let mut keys: Vec<String> = secret
                .data
                .map(|d| d.into_keys().collect())
                .unwrap_or_default();
            keys.extend(secret.string_data.into_iter().flat_map(|d| d.into_keys()));
            keys.sort();
            keys.dedup();
            Ok(WatchedResource::Secret(SecretSnapshot {
                name: secret.metadata.name.unwrap_or_default(),
                namespace: secret.metadata.namespace.unwrap_or_default(),
                keys,
            }))
        }
    }
}
