//! Cleanup stack
//!
//! Compensating actions are explicit values rather than captured closures, so
//! a stack can be listed with [`CleanupStack::plan`] before anything runs.
//! Actions are grouped into bundles; bundles run last-registered-first, and
//! within a bundle actions run in order until one fails.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{ChartError, Result};

/// Boxed compensation registered by callers
pub type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A single compensating step
pub enum CleanupAction {
    /// Uninstall a chart and wait until it is gone
    UninstallChart { name: String, namespace: String },

    /// Delete a secret and wait until it is gone
    DeleteSecret { name: String, namespace: String },

    /// Delete a namespace and wait until it is gone
    DeleteNamespace { name: String },

    /// Caller-supplied step
    Custom { label: String, func: CleanupFn },
}

impl CleanupAction {
    pub fn uninstall_chart(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::UninstallChart {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn delete_secret(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::DeleteSecret {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn delete_namespace(name: impl Into<String>) -> Self {
        Self::DeleteNamespace { name: name.into() }
    }

    /// Wrap an async closure
    pub fn custom<F, Fut>(label: impl Into<String>, func: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::Custom {
            label: label.into(),
            func: Box::new(move || func().boxed()),
        }
    }
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UninstallChart { name, namespace } => {
                write!(f, "uninstall chart {}/{}", namespace, name)
            }
            Self::DeleteSecret { name, namespace } => {
                write!(f, "delete secret {}/{}", namespace, name)
            }
            Self::DeleteNamespace { name } => write!(f, "delete namespace {}", name),
            Self::Custom { label, .. } => write!(f, "{}", label),
        }
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UninstallChart { name, namespace } => f
                .debug_struct("UninstallChart")
                .field("name", name)
                .field("namespace", namespace)
                .finish(),
            Self::DeleteSecret { name, namespace } => f
                .debug_struct("DeleteSecret")
                .field("name", name)
                .field("namespace", namespace)
                .finish(),
            Self::DeleteNamespace { name } => {
                f.debug_struct("DeleteNamespace").field("name", name).finish()
            }
            Self::Custom { label, .. } => f
                .debug_struct("Custom")
                .field("label", label)
                .finish_non_exhaustive(),
        }
    }
}

/// An ordered group of actions that halts on its first failure
#[derive(Debug)]
pub struct CleanupBundle {
    name: String,
    actions: VecDeque<CleanupAction>,
}

impl CleanupBundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: VecDeque::new(),
        }
    }

    /// Bundle name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a step to run last
    pub fn push(&mut self, action: CleanupAction) {
        self.actions.push_back(action);
    }

    /// Insert a step to run first
    pub fn prepend(&mut self, action: CleanupAction) {
        self.actions.push_front(action);
    }

    /// Builder form of [`push`](Self::push)
    pub fn then(mut self, action: CleanupAction) -> Self {
        self.push(action);
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Steps in execution order
    pub fn actions(&self) -> impl Iterator<Item = &CleanupAction> {
        self.actions.iter()
    }
}

impl From<CleanupAction> for CleanupBundle {
    fn from(action: CleanupAction) -> Self {
        let mut bundle = CleanupBundle::new(action.to_string());
        bundle.push(action);
        bundle
    }
}

/// Runs the cluster-facing cleanup actions
///
/// [`CleanupAction::Custom`] steps never reach the executor; the stack
/// calls them directly.
#[async_trait]
pub trait CleanupExecutor: Send + Sync {
    async fn execute(&self, action: CleanupAction) -> Result<()>;
}

/// The step a bundle stopped at
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub error: ChartError,
}

/// Outcome of one bundle
#[derive(Debug)]
pub struct BundleReport {
    pub bundle: String,
    pub completed: Vec<String>,
    pub failure: Option<StepFailure>,

    /// Steps not attempted because an earlier one failed
    pub skipped: Vec<String>,
}

impl BundleReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Outcome of a whole teardown, bundles in execution order
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub bundles: Vec<BundleReport>,
}

impl CleanupReport {
    /// Number of bundles that hit a failure
    pub fn failed(&self) -> usize {
        self.bundles.iter().filter(|b| !b.succeeded()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Collapse into an aggregate error when any bundle failed
    pub fn into_result(self) -> Result<()> {
        let total = self.bundles.len();
        let failures: Vec<String> = self
            .bundles
            .into_iter()
            .filter_map(|b| {
                b.failure
                    .map(|f| format!("{}: {} failed: {}", b.bundle, f.step, f.error))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ChartError::Cleanup {
                failed: failures.len(),
                total,
                failures,
            })
        }
    }
}

/// A bundle as it would run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePlan {
    pub bundle: String,
    pub steps: Vec<String>,
}

/// LIFO registry of cleanup bundles
///
/// Single-writer: owned by one session.
#[derive(Debug, Default)]
pub struct CleanupStack {
    bundles: Vec<CleanupBundle>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a bundle; it will run before everything registered earlier
    pub fn register(&mut self, bundle: impl Into<CleanupBundle>) {
        self.bundles.push(bundle.into());
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Bundles and steps in the order [`run_all`](Self::run_all) would execute them
    pub fn plan(&self) -> Vec<BundlePlan> {
        self.bundles
            .iter()
            .rev()
            .map(|b| BundlePlan {
                bundle: b.name.clone(),
                steps: b.actions().map(ToString::to_string).collect(),
            })
            .collect()
    }

    /// Pop and run every bundle, collecting an aggregate error
    pub async fn run_all<E: CleanupExecutor + ?Sized>(&mut self, executor: &E) -> Result<()> {
        self.run_all_with_report(executor).await.into_result()
    }

    /// Pop and run every bundle
    ///
    /// A failing step halts its own bundle only; the remaining bundles still run.
    pub async fn run_all_with_report<E: CleanupExecutor + ?Sized>(
        &mut self,
        executor: &E,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();
        while let Some(bundle) = self.bundles.pop() {
            report.bundles.push(run_bundle(bundle, executor).await);
        }
        report
    }
}

async fn run_bundle<E: CleanupExecutor + ?Sized>(bundle: CleanupBundle, executor: &E) -> BundleReport {
    let mut report = BundleReport {
        bundle: bundle.name,
        completed: Vec::new(),
        failure: None,
        skipped: Vec::new(),
    };

    let mut actions = bundle.actions.into_iter();
    while let Some(action) = actions.next() {
        let step = action.to_string();
        let result = match action {
            CleanupAction::Custom { func, .. } => func().await,
            other => executor.execute(other).await,
        };

        match result {
            Ok(()) => report.completed.push(step),
            Err(error) => {
                tracing::warn!(bundle = %report.bundle, %step, %error, "cleanup step failed");
                report.skipped = actions.by_ref().map(|a| a.to_string()).collect();
                report.failure = Some(StepFailure { step, error });
                break;
            }
        }
    }
    report
}
