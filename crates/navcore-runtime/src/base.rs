//! Executor framework shared by every algorithm and behavior executor.
//!
//! An executor is a cheap handle around an [`ExecutorCore`].  A `start`
//! claims the core through [`ExecutorCore::begin_run`], which hands back the
//! [`RunContext`] for that run, and spawns the run on a Tokio task.  The
//! context is the only way to finish a run, and it finishes at most once:
//! the terminal feedback code, the `Finished` event and the success/abort
//! callback all happen inside that single latched report.
//!
//! ```text
//! start ──► begin_run ──► RunContext ──► feedback* ──► succeed | finish
//!              │                                          │
//!              └── Busy if a run is in flight             └── callback, once
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use navcore_lifecycle::LifecycleNodeManager;
use navcore_middleware::{ActionBackend, ServiceBackend, ServiceClient, SimBackend};
use navcore_types::{
    ExecutorEvent, ExecutorEventKind, ExecutorStatus, FeedbackCode, NavError, SetBoolRequest,
    SetBoolResponse, StopResult, TaskOutcome, TaskResult,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::deps;
use crate::timer::Timer;

pub type SetBoolClient = ServiceClient<SetBoolRequest, SetBoolResponse>;

// ────────────────────────────────────────────────────────────────────────────
// Callbacks and events
// ────────────────────────────────────────────────────────────────────────────

pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Completion hooks supplied by the owner of an executor.
#[derive(Clone, Default)]
pub struct TaskCallbacks {
    on_success: Option<Callback>,
    on_abort: Option<Callback>,
}

impl TaskCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Fires for every run that ends without success, including canceled
    /// runs.
    pub fn on_abort(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_abort = Some(Arc::new(f));
        self
    }

    fn fire(&self, result: TaskResult) {
        let hook = match result {
            TaskResult::Success => &self.on_success,
            TaskResult::Aborted | TaskResult::Canceled | TaskResult::Failed => &self.on_abort,
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Upward channel for feedback codes and terminal outcomes.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ExecutorEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, executor: &str, run_id: Option<Uuid>, kind: ExecutorEventKind) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = ExecutorEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            executor: executor.to_string(),
            run_id,
            kind,
        };
        if tx.send(event).is_err() {
            debug!(executor, "event receiver dropped");
        }
    }
}

pub fn aborted(feedback: FeedbackCode) -> TaskOutcome {
    TaskOutcome {
        result: TaskResult::Aborted,
        feedback,
    }
}

pub fn canceled() -> TaskOutcome {
    TaskOutcome {
        result: TaskResult::Canceled,
        feedback: FeedbackCode::TaskCanceled,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared wiring
// ────────────────────────────────────────────────────────────────────────────

/// Everything an executor needs from its surroundings.
#[derive(Clone)]
pub struct ExecutorContext {
    pub lifecycle: Arc<LifecycleNodeManager>,
    pub services: Arc<dyn ServiceBackend>,
    pub actions: Arc<dyn ActionBackend>,
    pub config: Arc<RuntimeConfig>,
    pub events: EventSink,
}

impl ExecutorContext {
    /// Wire executors to the given transports.  The lifecycle manager is
    /// built here, once, for every node the configuration names.
    pub fn new(
        config: RuntimeConfig,
        services: Arc<dyn ServiceBackend>,
        actions: Arc<dyn ActionBackend>,
        events: EventSink,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleNodeManager::new(
            Arc::clone(&services),
            config.lifecycle_nodes(),
            config.timeouts.connect(),
            config.timeouts.lifecycle_transition(),
        ));
        Self {
            lifecycle,
            services,
            actions,
            config: Arc::new(config),
            events,
        }
    }

    pub fn simulated(sim: Arc<SimBackend>, config: RuntimeConfig, events: EventSink) -> Self {
        Self::new(config, sim.clone(), sim, events)
    }

    pub fn set_bool_client(&self, endpoint: &str) -> SetBoolClient {
        ServiceClient::new(
            Arc::clone(&self.services),
            endpoint,
            self.config.timeouts.connect(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ExecutorCore
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CoreState {
    status: ExecutorStatus,
    activated: bool,
    /// Lifecycle nodes this executor brought up and has not paused yet, in
    /// activation order.
    held: Vec<String>,
    last_feedback: Option<FeedbackCode>,
    cancel: Option<watch::Sender<bool>>,
}

/// Run bookkeeping shared between an executor handle and its run task.
pub struct ExecutorCore {
    name: String,
    events: EventSink,
    callbacks: TaskCallbacks,
    state: Mutex<CoreState>,
    running: watch::Sender<Option<Uuid>>,
    stop_gate: tokio::sync::Mutex<()>,
}

impl ExecutorCore {
    pub fn new(name: impl Into<String>, events: EventSink, callbacks: TaskCallbacks) -> Arc<Self> {
        let (running, _) = watch::channel(None);
        Arc::new(Self {
            name: name.into(),
            events,
            callbacks,
            state: Mutex::new(CoreState::default()),
            running,
            stop_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ExecutorStatus {
        self.lock().status
    }

    pub fn is_activated(&self) -> bool {
        self.lock().activated
    }

    pub fn current_run(&self) -> Option<Uuid> {
        *self.running.borrow()
    }

    pub fn last_feedback(&self) -> Option<FeedbackCode> {
        self.lock().last_feedback
    }

    /// Claim the executor for a new run.
    ///
    /// # Errors
    ///
    /// [`NavError::Busy`] while another run or a stop is in flight.  No
    /// callback fires for a rejected start.
    pub fn begin_run(core: &Arc<Self>) -> Result<RunContext, NavError> {
        if core.stop_gate.try_lock().is_err() {
            warn!(executor = %core.name, "start rejected while stopping");
            return Err(NavError::Busy(core.name.clone()));
        }
        let mut state = core.lock();
        if core.running.borrow().is_some() {
            warn!(executor = %core.name, "start rejected, a run is in flight");
            return Err(NavError::Busy(core.name.clone()));
        }

        let run_id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        state.status = ExecutorStatus::Preparing;
        state.last_feedback = None;
        state.cancel = Some(cancel_tx);
        core.running.send_replace(Some(run_id));
        drop(state);

        info!(executor = %core.name, %run_id, "run started");
        Ok(RunContext {
            core: Arc::clone(core),
            run_id,
            cancel: cancel_rx,
            timer: Timer::start(),
            finished: false,
        })
    }

    /// Signal the in-flight run, if any, to stop.  Never blocks.
    pub fn cancel(&self) -> bool {
        let state = self.lock();
        match &state.cancel {
            Some(tx) => {
                tx.send_replace(true);
                info!(executor = %self.name, "cancel requested");
                true
            }
            None => {
                debug!(executor = %self.name, "cancel ignored, no run in flight");
                false
            }
        }
    }

    /// Report a feedback code.  `run_id == None` marks codes emitted outside
    /// a run (stop requests).
    pub fn feedback(&self, run_id: Option<Uuid>, code: FeedbackCode) {
        if run_id.is_some() {
            let mut state = self.lock();
            state.last_feedback = Some(code);
            if state.status == ExecutorStatus::Preparing
                && code == FeedbackCode::PreparationSuccess
            {
                state.status = ExecutorStatus::Running;
            }
        }
        info!(executor = %self.name, run_id = ?run_id, feedback = %code, "feedback");
        self.events
            .emit(&self.name, run_id, ExecutorEventKind::Feedback(code));
    }

    /// Record nodes brought up by a run.
    pub fn hold(&self, nodes: Vec<String>) {
        let mut state = self.lock();
        for node in nodes {
            if !state.held.contains(&node) {
                state.held.push(node);
            }
        }
    }

    /// Hand over every held node for pausing.
    pub fn release(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().held)
    }

    /// Cancel the in-flight run and wait up to `wait` for it to settle.
    pub async fn interrupt(&self, wait: Duration) -> bool {
        let mut rx = self.running.subscribe();
        if rx.borrow().is_none() {
            return true;
        }
        self.cancel();
        matches!(
            tokio::time::timeout(wait, rx.wait_for(Option::is_none)).await,
            Ok(Ok(_))
        )
    }

    /// Shared `Stop` sequence: interrupt a running start, short-circuit when
    /// not activated, otherwise run `teardown` and report the result.
    pub async fn stop_with<F, Fut>(&self, stop_wait: Duration, teardown: F) -> StopResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), NavError>>,
    {
        let _gate = self.stop_gate.lock().await;

        if !self.interrupt(stop_wait).await {
            error!(executor = %self.name, "in-flight run did not settle, stop failed");
            self.feedback(None, FeedbackCode::StopFailed);
            return StopResult::Failed;
        }
        if !self.is_activated() {
            debug!(executor = %self.name, "not activated, nothing to stop");
            return StopResult::Success;
        }

        self.feedback(None, FeedbackCode::StopExecuting);
        let timer = Timer::start();
        match teardown().await {
            Ok(()) => {
                self.lock().activated = false;
                self.feedback(None, FeedbackCode::StopSuccess);
                info!(executor = %self.name, elapsed_secs = timer.elapsed_secs(), "stopped");
                StopResult::Success
            }
            Err(e) => {
                error!(executor = %self.name, error = %e, "stop failed");
                self.feedback(None, FeedbackCode::StopFailed);
                StopResult::Failed
            }
        }
    }

    fn settle(&self, run_id: Uuid, outcome: TaskOutcome, elapsed_secs: f64) {
        {
            let mut state = self.lock();
            state.status = outcome.result.status();
            state.activated = outcome.result == TaskResult::Success;
            state.last_feedback = Some(outcome.feedback);
            state.cancel = None;
        }
        self.events.emit(
            &self.name,
            Some(run_id),
            ExecutorEventKind::Feedback(outcome.feedback),
        );
        self.events
            .emit(&self.name, Some(run_id), ExecutorEventKind::Finished(outcome));
        self.running.send_replace(None);

        match outcome.result {
            TaskResult::Success => {
                info!(executor = %self.name, %run_id, feedback = %outcome.feedback, elapsed_secs, "run succeeded")
            }
            TaskResult::Canceled => {
                info!(executor = %self.name, %run_id, elapsed_secs, "run canceled")
            }
            TaskResult::Aborted | TaskResult::Failed => {
                error!(executor = %self.name, %run_id, result = ?outcome.result, feedback = %outcome.feedback, elapsed_secs, "run failed")
            }
        }
        self.callbacks.fire(outcome.result);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RunContext
// ────────────────────────────────────────────────────────────────────────────

/// Handle for one accepted run.
///
/// Dropping an unfinished context reports the run `Aborted`.
pub struct RunContext {
    core: Arc<ExecutorCore>,
    run_id: Uuid,
    cancel: watch::Receiver<bool>,
    timer: Timer,
    finished: bool,
}

impl RunContext {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn core(&self) -> &Arc<ExecutorCore> {
        &self.core
    }

    pub fn feedback(&self, code: FeedbackCode) {
        self.core.feedback(Some(self.run_id), code);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the run has been asked to cancel.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Race `fut` against cancellation.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, NavError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(NavError::Canceled),
            out = fut => Ok(out),
        }
    }

    /// Guarded remote step; a failure aborts the run with `on_error`.
    pub async fn step<T, F>(&self, fut: F, on_error: FeedbackCode) -> Result<T, TaskOutcome>
    where
        F: Future<Output = Result<T, NavError>>,
    {
        match self.guard(fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(executor = %self.core.name, run_id = %self.run_id, error = %e, feedback = %on_error, "run step failed");
                Err(aborted(on_error))
            }
            Err(_) => Err(canceled()),
        }
    }

    /// Configure and start up `nodes` in order, recording what came up.
    ///
    /// Cancellation is observed between transitions, never during one, so
    /// the manager's view of every node matches the node itself.
    pub async fn bring_up(
        &self,
        lifecycle: &LifecycleNodeManager,
        nodes: &[String],
    ) -> Result<(), TaskOutcome> {
        let mut brought_up = Vec::new();
        let result =
            deps::bring_up(lifecycle, nodes, &mut brought_up, || self.is_cancelled()).await;
        self.core.hold(brought_up);
        match result {
            Ok(()) if self.is_cancelled() => Err(canceled()),
            Ok(()) => Ok(()),
            Err(NavError::Canceled) => Err(canceled()),
            Err(e) => {
                error!(executor = %self.core.name, run_id = %self.run_id, error = %e, "dependency activation failed");
                Err(aborted(FeedbackCode::PreparationFailed))
            }
        }
    }

    /// Pause every node this executor holds, newest first.  Best effort.
    pub async fn roll_back(&self, lifecycle: &LifecycleNodeManager) {
        deps::roll_back(lifecycle, &self.core.release()).await;
    }

    pub fn succeed(self, feedback: FeedbackCode) {
        self.finish(TaskOutcome {
            result: TaskResult::Success,
            feedback,
        });
    }

    pub fn finish(mut self, outcome: TaskOutcome) {
        self.finished = true;
        self.core
            .settle(self.run_id, outcome, self.timer.elapsed_secs());
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            warn!(executor = %self.core.name, run_id = %self.run_id, "run dropped without a result");
            self.core.settle(
                self.run_id,
                aborted(FeedbackCode::TaskAborted),
                self.timer.elapsed_secs(),
            );
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TaskExecutor
// ────────────────────────────────────────────────────────────────────────────

/// Inbound interface of every executor.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    type Goal: Send + 'static;

    fn core(&self) -> &ExecutorCore;

    /// Accept `goal` and run it in the background.  Completion is reported
    /// through the callbacks and the event sink, not the return value.
    ///
    /// # Errors
    ///
    /// [`NavError::Busy`] while a run is in flight; [`NavError::InvalidGoal`]
    /// for a malformed goal, which also reports the run `Aborted`.
    fn start(&self, goal: Self::Goal) -> Result<Uuid, NavError>;

    async fn stop(&self) -> StopResult;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn cancel(&self) {
        self.core().cancel();
    }

    fn status(&self) -> ExecutorStatus {
        self.core().status()
    }

    fn is_activated(&self) -> bool {
        self.core().is_activated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callbacks() -> (TaskCallbacks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let successes = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        let (s, a) = (successes.clone(), aborts.clone());
        let callbacks = TaskCallbacks::new()
            .on_success(move || {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_abort(move || {
                a.fetch_add(1, Ordering::SeqCst);
            });
        (callbacks, successes, aborts)
    }

    #[tokio::test]
    async fn second_start_is_busy_until_run_finishes() {
        let core = ExecutorCore::new("sample", EventSink::discard(), TaskCallbacks::new());
        let ctx = ExecutorCore::begin_run(&core).unwrap();
        assert!(matches!(
            ExecutorCore::begin_run(&core),
            Err(NavError::Busy(ref name)) if name == "sample"
        ));
        ctx.succeed(FeedbackCode::TaskSuccess);
        assert!(ExecutorCore::begin_run(&core).is_ok());
    }

    #[tokio::test]
    async fn dropped_context_reports_aborted_exactly_once() {
        let (sink, mut rx) = EventSink::channel();
        let (callbacks, successes, aborts) = counting_callbacks();
        let core = ExecutorCore::new("sample", sink, callbacks);

        let ctx = ExecutorCore::begin_run(&core).unwrap();
        ctx.feedback(FeedbackCode::PreparationExecuting);
        drop(ctx);

        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(core.status(), ExecutorStatus::Failure);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ExecutorEventKind::Feedback(FeedbackCode::PreparationExecuting),
                ExecutorEventKind::Feedback(FeedbackCode::TaskAborted),
                ExecutorEventKind::Finished(aborted(FeedbackCode::TaskAborted)),
            ]
        );
    }

    #[tokio::test]
    async fn guard_observes_cancel() {
        let core = ExecutorCore::new("sample", EventSink::discard(), TaskCallbacks::new());
        let ctx = ExecutorCore::begin_run(&core).unwrap();
        assert!(core.cancel());
        assert!(ctx.is_cancelled());
        let out = ctx.guard(std::future::pending::<()>()).await;
        assert_eq!(out, Err(NavError::Canceled));
        ctx.finish(canceled());
        assert_eq!(core.status(), ExecutorStatus::Canceled);
        assert!(!core.cancel());
    }

    #[tokio::test]
    async fn success_activates_and_stop_with_tears_down_once() {
        let (callbacks, successes, _) = counting_callbacks();
        let core = ExecutorCore::new("sample", EventSink::discard(), callbacks);
        ExecutorCore::begin_run(&core)
            .unwrap()
            .succeed(FeedbackCode::TaskSuccess);
        assert!(core.is_activated());
        assert_eq!(successes.load(Ordering::SeqCst), 1);

        let teardowns = AtomicUsize::new(0);
        let counter = &teardowns;
        let stop = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        assert_eq!(core.stop_with(Duration::from_secs(1), stop).await, StopResult::Success);
        assert!(!core.is_activated());
        assert_eq!(core.stop_with(Duration::from_secs(1), stop).await, StopResult::Success);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn held_nodes_are_unique_and_released_once() {
        let core = ExecutorCore::new("sample", EventSink::discard(), TaskCallbacks::new());
        core.hold(vec!["cam".into(), "slam".into()]);
        core.hold(vec!["cam".into()]);
        assert_eq!(core.release(), vec!["cam", "slam"]);
        assert!(core.release().is_empty());
    }
}
