//! Event watcher
//!
//! Waits are push-driven: a [`Subscription`] holds an open watch and feeds
//! every event through a [`WaitPredicate`] until the predicate reports ready,
//! reports a terminal failure, or the subscription's deadline passes.
//!
//! Subscriptions are opened *before* the operation they confirm is submitted,
//! so no event between submission and the start of the wait is lost. When the
//! API server closes a watch early the subscription reopens it with whatever
//! budget remains.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::debug;

use crate::cluster::{ClusterApi, EventStream};
use crate::error::{ChartError, Result};
use crate::events::{DecodedEvent, EventKind, WatchTarget, WatchedResource};
use crate::status::SummaryState;

/// Verdict of a predicate on a single event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Target state observed
    Ready,
    /// Keep consuming events
    Pending,
    /// Terminal failure with a message
    Failed(String),
}

/// Per-kind readiness strategy
pub trait WaitPredicate: Send + Sync {
    /// Judge one decoded event
    fn evaluate(&self, event: &DecodedEvent) -> WaitOutcome;

    /// Whether a missing object satisfies the wait
    fn satisfied_by_absence(&self) -> bool {
        false
    }
}

/// `Deleted` is the canonical signal; an event without an object is accepted too
fn confirms_gone(event: &DecodedEvent) -> bool {
    event.kind == EventKind::Deleted || event.resource.is_none()
}

fn error_message(action: &str, subject: &str, event: &DecodedEvent) -> String {
    match &event.message {
        Some(message) => format!("there was an error {} the {}: {}", action, subject, message),
        None => format!("there was an error {} the {}", action, subject),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChartGoal {
    State(SummaryState),
    Gone,
}

/// Waits for a chart to reach a summary state, or to disappear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartStatusPredicate {
    goal: ChartGoal,
    action: &'static str,
}

impl ChartStatusPredicate {
    /// Ready on `deployed`
    pub fn installed() -> Self {
        Self {
            goal: ChartGoal::State(SummaryState::Deployed),
            action: "installing",
        }
    }

    /// Ready on `pending-upgrade`
    pub fn upgrading() -> Self {
        Self {
            goal: ChartGoal::State(SummaryState::PendingUpgrade),
            action: "upgrading",
        }
    }

    /// Ready on `deployed`, after an upgrade started
    pub fn upgraded() -> Self {
        Self {
            goal: ChartGoal::State(SummaryState::Deployed),
            action: "upgrading",
        }
    }

    /// Ready once the chart is deleted
    pub fn uninstalled() -> Self {
        Self {
            goal: ChartGoal::Gone,
            action: "uninstalling",
        }
    }
}

impl WaitPredicate for ChartStatusPredicate {
    fn evaluate(&self, event: &DecodedEvent) -> WaitOutcome {
        if event.kind == EventKind::Error {
            return WaitOutcome::Failed(error_message(self.action, "chart", event));
        }

        match self.goal {
            ChartGoal::Gone if confirms_gone(event) => WaitOutcome::Ready,
            ChartGoal::Gone => WaitOutcome::Pending,
            ChartGoal::State(_) if event.kind == EventKind::Deleted => {
                WaitOutcome::Failed(format!("chart was deleted while {}", self.action))
            }
            ChartGoal::State(state) => match event.chart() {
                Some(status) if status.summary_state == state => WaitOutcome::Ready,
                _ => WaitOutcome::Pending,
            },
        }
    }

    fn satisfied_by_absence(&self) -> bool {
        self.goal == ChartGoal::Gone
    }
}

/// Waits for a namespace to become active, or to disappear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacePredicate {
    gone: bool,
}

impl NamespacePredicate {
    pub fn active() -> Self {
        Self { gone: false }
    }

    pub fn gone() -> Self {
        Self { gone: true }
    }
}

impl WaitPredicate for NamespacePredicate {
    fn evaluate(&self, event: &DecodedEvent) -> WaitOutcome {
        if event.kind == EventKind::Error {
            let action = if self.gone { "deleting" } else { "creating" };
            return WaitOutcome::Failed(error_message(action, "namespace", event));
        }

        if self.gone {
            return if confirms_gone(event) {
                WaitOutcome::Ready
            } else {
                WaitOutcome::Pending
            };
        }

        match &event.resource {
            _ if event.kind == EventKind::Deleted => {
                WaitOutcome::Failed("namespace was deleted while creating it".to_string())
            }
            Some(WatchedResource::Namespace(ns)) if ns.is_active() => WaitOutcome::Ready,
            _ => WaitOutcome::Pending,
        }
    }

    fn satisfied_by_absence(&self) -> bool {
        self.gone
    }
}

/// Waits for a secret to exist, or to disappear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPredicate {
    gone: bool,
}

impl SecretPredicate {
    pub fn present() -> Self {
        Self { gone: false }
    }

    pub fn gone() -> Self {
        Self { gone: true }
    }
}

impl WaitPredicate for SecretPredicate {
    fn evaluate(&self, event: &DecodedEvent) -> WaitOutcome {
        if event.kind == EventKind::Error {
            let action = if self.gone { "deleting" } else { "creating" };
            return WaitOutcome::Failed(error_message(action, "secret", event));
        }

        match (self.gone, event.kind, &event.resource) {
            (true, _, _) if confirms_gone(event) => WaitOutcome::Ready,
            (true, _, _) => WaitOutcome::Pending,
            (false, EventKind::Deleted, _) => {
                WaitOutcome::Failed("secret was deleted while creating it".to_string())
            }
            (false, _, Some(WatchedResource::Secret(_))) => WaitOutcome::Ready,
            _ => WaitOutcome::Pending,
        }
    }

    fn satisfied_by_absence(&self) -> bool {
        self.gone
    }
}

/// Opens subscriptions against a cluster
pub struct EventWatcher<'a, C: ?Sized> {
    cluster: &'a C,
    poll_interval: Duration,
}

impl<'a, C: ClusterApi + ?Sized> EventWatcher<'a, C> {
    /// `poll_interval` is the pause before reopening a watch the server closed
    pub fn new(cluster: &'a C, poll_interval: Duration) -> Self {
        Self {
            cluster,
            poll_interval,
        }
    }

    /// Open a watch; the wait budget starts now
    pub async fn subscribe(&self, target: WatchTarget) -> Result<Subscription<'a, C>> {
        let deadline = Instant::now() + target.timeout;
        let stream = self.cluster.watch(&target).await?;
        Ok(Subscription {
            cluster: self.cluster,
            target,
            stream,
            deadline,
            poll_interval: self.poll_interval,
        })
    }

    /// Subscribe and wait in one step
    pub async fn wait(&self, target: WatchTarget, predicate: &dyn WaitPredicate) -> Result<()> {
        self.subscribe(target).await?.wait_for(predicate).await
    }
}

/// An open, deadline-bound watch on one object
pub struct Subscription<'a, C: ?Sized> {
    cluster: &'a C,
    target: WatchTarget,
    stream: EventStream,
    deadline: Instant,
    poll_interval: Duration,
}

impl<C: ClusterApi + ?Sized> Subscription<'_, C> {
    /// What this subscription watches
    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Restart the wait budget, keeping the stream position
    pub fn renew(&mut self, budget: Duration) {
        self.target.timeout = budget;
        self.deadline = Instant::now() + budget;
    }

    /// Consume events until `predicate` is satisfied
    ///
    /// Returns [`ChartError::Timeout`] when the deadline passes first, and
    /// [`ChartError::Rejected`] when the predicate reports a failure.
    /// Transport and decode errors are returned as they occur. Events after
    /// the one that satisfied the predicate stay in the stream.
    pub async fn wait_for(&mut self, predicate: &dyn WaitPredicate) -> Result<()> {
        let deadline = self.deadline;
        let result = tokio::time::timeout_at(deadline, self.consume(predicate)).await;
        match result {
            Ok(result) => result,
            Err(_) => {
                debug!(resource = %self.target, "wait deadline passed");
                Err(ChartError::Timeout {
                    resource: self.target.to_string(),
                    waited: format!("{:?}", self.target.timeout),
                })
            }
        }
    }

    async fn consume(&mut self, predicate: &dyn WaitPredicate) -> Result<()> {
        loop {
            while let Some(item) = self.stream.next().await {
                let event = DecodedEvent::decode(self.target.kind, item?)?;
                debug!(
                    resource = %self.target,
                    kind = ?event.kind,
                    state = ?event.chart().map(|c| c.summary_state),
                    "watch event"
                );
                match predicate.evaluate(&event) {
                    WaitOutcome::Ready => return Ok(()),
                    WaitOutcome::Pending => {}
                    WaitOutcome::Failed(message) => {
                        return Err(ChartError::Rejected {
                            resource: self.target.to_string(),
                            message,
                        });
                    }
                }
            }

            debug!(resource = %self.target, "watch closed by server, reopening");
            tokio::time::sleep(self.poll_interval).await;

            // a reopened watch cannot report a deletion that already happened
            if predicate.satisfied_by_absence()
                && !self
                    .cluster
                    .resource_exists(
                        self.target.kind,
                        &self.target.name,
                        self.target.namespace.as_deref(),
                    )
                    .await?
            {
                return Ok(());
            }

            let remaining = self.deadline.saturating_duration_since(Instant::now());
            self.stream = self.cluster.watch(&self.target.with_timeout(remaining)).await?;
        }
    }
}
