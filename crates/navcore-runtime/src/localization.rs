//! Laser localization executor.
//!
//! # Start sequence
//!
//! 1. Bring up the depth camera and the localization node.
//! 2. `start_location(true)`.
//! 3. Wait for the relocalization result notification: `0` succeeds, `100`
//!    means the backend is still trying, `200` fails.  The wait is bounded by
//!    `relocalization_wait_secs`.
//! 4. `PoseEnable(true)` so the robot pose is reported in realtime.
//!
//! Any failure switches localization back off (if it was switched on) and
//! pauses the nodes this executor brought up.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use navcore_types::{FeedbackCode, LocalizationGoal, NavError, StopResult, TaskOutcome, TaskResult};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::base::{
    ExecutorContext, ExecutorCore, RunContext, SetBoolClient, TaskCallbacks, TaskExecutor,
    aborted, canceled,
};
use crate::deps;
use crate::timer::Timer;

const RELOC_SUCCESS: i32 = 0;
const RELOC_RETRYING: i32 = 100;
const RELOC_FAILED: i32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relocalization {
    Idle,
    Waiting(Uuid),
    Succeeded(Uuid),
    Failed(Uuid),
}

impl Relocalization {
    fn settles(self, run_id: Uuid) -> bool {
        matches!(self, Relocalization::Succeeded(id) | Relocalization::Failed(id) if id == run_id)
    }
}

/// Handle to the laser localization executor.  Clones share one executor.
#[derive(Clone)]
pub struct LaserLocalization {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<ExecutorCore>,
    ctx: ExecutorContext,
    reloc: watch::Sender<Relocalization>,
    start_client: OnceLock<SetBoolClient>,
    stop_client: OnceLock<SetBoolClient>,
    pose_client: OnceLock<SetBoolClient>,
}

impl LaserLocalization {
    pub const NAME: &'static str = "laser_localization";

    pub fn new(ctx: &ExecutorContext, callbacks: TaskCallbacks) -> Self {
        let (reloc, _) = watch::channel(Relocalization::Idle);
        Self {
            inner: Arc::new(Inner {
                core: ExecutorCore::new(Self::NAME, ctx.events.clone(), callbacks),
                ctx: ctx.clone(),
                reloc,
                start_client: OnceLock::new(),
                stop_client: OnceLock::new(),
                pose_client: OnceLock::new(),
            }),
        }
    }

    /// Feed one relocalization result notification.
    ///
    /// Only a run currently waiting for its result listens; anything else
    /// (a late result after a timeout, a result with no run) is dropped.
    pub fn handle_relocalization_result(&self, code: i32) {
        if code == RELOC_RETRYING {
            self.report_retry();
            return;
        }
        let current = *self.inner.reloc.borrow();
        let Relocalization::Waiting(run_id) = current else {
            debug!(code, "relocalization result outside a wait, ignored");
            return;
        };

        let settled = match code {
            RELOC_SUCCESS => Relocalization::Succeeded(run_id),
            RELOC_FAILED => Relocalization::Failed(run_id),
            other => {
                warn!(code = other, "unrecognised relocalization result ignored");
                return;
            }
        };
        info!(%run_id, code, "relocalization result");
        self.inner.reloc.send_if_modified(|state| {
            if *state == Relocalization::Waiting(run_id) {
                *state = settled;
                true
            } else {
                false
            }
        });
    }

    /// Emitted while holding the wait state, so it can never trail the run's
    /// final event.
    fn report_retry(&self) {
        let core = &self.inner.core;
        self.inner.reloc.send_if_modified(|state| {
            match *state {
                Relocalization::Waiting(run_id) => {
                    warn!(%run_id, "relocalization retrying");
                    core.feedback(Some(run_id), FeedbackCode::SlamFailedContinueTrying);
                }
                _ => debug!("relocalization retry outside a wait, ignored"),
            }
            false
        });
    }

    /// Whether the latest run localized the robot and has not been stopped.
    pub fn is_localized(&self) -> bool {
        self.status() == navcore_types::ExecutorStatus::Success && self.is_activated()
    }

    /// External stop trigger: `true` stops an activated executor.
    pub async fn handle_stop_trigger(&self, stop: bool) -> Option<StopResult> {
        if !stop {
            return None;
        }
        if !self.is_activated() {
            info!("laser localization not activated, stop trigger ignored");
            return None;
        }
        Some(self.stop().await)
    }
}

#[async_trait]
impl TaskExecutor for LaserLocalization {
    type Goal = LocalizationGoal;

    fn core(&self) -> &ExecutorCore {
        &self.inner.core
    }

    fn start(&self, _goal: LocalizationGoal) -> Result<Uuid, NavError> {
        let ctx = ExecutorCore::begin_run(&self.inner.core)?;
        let run_id = ctx.run_id();
        tokio::spawn(Arc::clone(&self.inner).run(ctx));
        Ok(run_id)
    }

    async fn stop(&self) -> StopResult {
        let inner = &self.inner;
        let t = &inner.ctx.config.timeouts;
        info!("laser localization will stop");
        inner
            .core
            .stop_with(t.stop_wait(), move || async move {
                inner.stop_client().set(true, t.disable_call()).await?;
                inner.pose_client().set(false, t.pose_call()).await?;
                deps::pause_all(&inner.ctx.lifecycle, &inner.core.release()).await
            })
            .await
    }
}

impl Inner {
    fn start_client(&self) -> &SetBoolClient {
        self.start_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.start_location))
    }

    fn stop_client(&self) -> &SetBoolClient {
        self.stop_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.stop_location))
    }

    fn pose_client(&self) -> &SetBoolClient {
        self.pose_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.pose_enable))
    }

    #[instrument(skip_all, fields(executor = LaserLocalization::NAME, run_id = %ctx.run_id()))]
    async fn run(self: Arc<Self>, ctx: RunContext) {
        let mut switched_on = false;
        match self.execute(&ctx, &mut switched_on).await {
            Ok(()) => ctx.succeed(FeedbackCode::SlamSuccess),
            Err(outcome) => {
                self.reloc.send_replace(Relocalization::Idle);
                self.clean_up(&ctx, switched_on).await;
                ctx.finish(outcome);
            }
        }
    }

    async fn execute(&self, ctx: &RunContext, switched_on: &mut bool) -> Result<(), TaskOutcome> {
        let t = &self.ctx.config.timeouts;

        ctx.feedback(FeedbackCode::PreparationExecuting);
        ctx.bring_up(&self.ctx.lifecycle, &self.ctx.config.dependencies.localization)
            .await?;
        ctx.feedback(FeedbackCode::PreparationSuccess);

        // Armed before the enable call so an early result is not lost.
        self.reloc
            .send_replace(Relocalization::Waiting(ctx.run_id()));
        ctx.feedback(FeedbackCode::ServiceStarting);
        ctx.step(
            self.start_client().set(true, t.enable_call()),
            FeedbackCode::ServiceStartingError,
        )
        .await?;
        *switched_on = true;
        ctx.feedback(FeedbackCode::ServiceStartingSuccess);

        self.wait_relocalization(ctx).await?;

        ctx.step(
            self.pose_client().set(true, t.pose_call()),
            FeedbackCode::SlamError,
        )
        .await
    }

    async fn wait_relocalization(&self, ctx: &RunContext) -> Result<(), TaskOutcome> {
        let run_id = ctx.run_id();
        let wait = self.ctx.config.timeouts.relocalization_wait();
        let deadline = Instant::now() + wait;
        let timer = Timer::start();
        let mut rx = self.reloc.subscribe();

        let settled = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(canceled()),
            state = async { rx.wait_for(|s| s.settles(run_id)).await.map(|s| *s) } => state.ok(),
            _ = tokio::time::sleep_until(deadline) => None,
        };
        self.reloc.send_replace(Relocalization::Idle);

        match settled {
            Some(Relocalization::Succeeded(_)) => {
                info!(elapsed_secs = timer.elapsed_secs(), "relocalization succeeded");
                Ok(())
            }
            Some(_) => {
                error!(elapsed_secs = timer.elapsed_secs(), "relocalization failed");
                Err(aborted(FeedbackCode::SlamError))
            }
            None => {
                error!(timeout_secs = wait.as_secs(), "relocalization wait timed out");
                Err(TaskOutcome {
                    result: TaskResult::Failed,
                    feedback: FeedbackCode::SlamTimeout,
                })
            }
        }
    }

    async fn clean_up(&self, ctx: &RunContext, switched_on: bool) {
        if switched_on {
            let t = &self.ctx.config.timeouts;
            if let Err(e) = self.stop_client().set(true, t.disable_call()).await {
                warn!(error = %e, "failed to switch localization off during rollback");
            }
        }
        ctx.roll_back(&self.ctx.lifecycle).await;
    }
}
