//! Session owning one cleanup stack

use std::future::Future;

use tracing::info;

use crate::cleanup::{
    BundlePlan, CleanupAction, CleanupBundle, CleanupExecutor, CleanupReport, CleanupStack,
};
use crate::error::Result;

/// A unit of work whose provisioning is undone at teardown
#[derive(Debug, Default)]
pub struct Session {
    name: String,
    stack: CleanupStack,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack: CleanupStack::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a compensating bundle
    pub fn register_cleanup(&mut self, bundle: impl Into<CleanupBundle>) {
        self.stack.register(bundle);
    }

    /// Register a caller-supplied compensation
    pub fn register_cleanup_fn<F, Fut>(&mut self, label: impl Into<String>, func: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stack.register(CleanupAction::custom(label, func));
    }

    /// Bundles waiting for teardown
    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    /// What teardown would run, in order
    pub fn plan(&self) -> Vec<BundlePlan> {
        self.stack.plan()
    }

    /// Run every registered bundle; an empty session tears down cleanly
    pub async fn teardown<E: CleanupExecutor + ?Sized>(&mut self, executor: &E) -> Result<()> {
        self.teardown_with_report(executor).await.into_result()
    }

    /// Run every registered bundle and report per bundle
    pub async fn teardown_with_report<E: CleanupExecutor + ?Sized>(
        &mut self,
        executor: &E,
    ) -> CleanupReport {
        info!(session = %self.name, bundles = self.stack.len(), "tearing down session");
        let report = self.stack.run_all_with_report(executor).await;
        info!(
            session = %self.name,
            failed = report.failed(),
            "session torn down"
        );
        report
    }
}
