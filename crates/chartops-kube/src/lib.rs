//! Chartops Kube - chart lifecycle orchestration for Rancher-managed clusters
//!
//! This crate provides:
//! - **Transition Driver**: install, upgrade and uninstall charts, each confirmed on a live watch
//! - **Event Watcher**: deadline-bound waits driven by per-kind predicates
//! - **Ordering Coordinator**: CRD companion charts, namespaces and secrets sequenced around a primary chart
//! - **Cleanup Stack**: inspectable LIFO compensations run at session teardown
//! - **Cluster Boundary**: a Rancher catalog/Kubernetes implementation and an in-memory mock

pub mod actions;
pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod events;
pub mod session;
pub mod status;
pub mod watcher;

pub use actions::{ChartRequest, TransitionRequest, UninstallOptions, UninstallRequest};
pub use cleanup::{
    BundlePlan, BundleReport, CleanupAction, CleanupBundle, CleanupExecutor, CleanupReport,
    CleanupStack, StepFailure,
};
pub use cluster::{ClusterApi, MockCall, MockCluster, RancherCluster, Scripted};
pub use config::{
    CatalogConfig, ChartFamilySpec, CrdCompanion, SecretSpec, SuiteConfig, WaitConfig,
};
pub use coordinator::{ChartFamily, Coordinator};
pub use driver::{ChartDriver, PendingInstall};
pub use error::{ChartError, Result};
pub use events::{DecodedEvent, EventKind, ResourceKind, WatchEvent, WatchTarget};
pub use session::Session;
pub use status::{ChartStatus, SummaryState};
pub use watcher::{
    ChartStatusPredicate, EventWatcher, NamespacePredicate, SecretPredicate, Subscription,
    WaitOutcome, WaitPredicate,
};
