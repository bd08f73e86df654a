//! Stair-jumping behavior executor.
//!
//! ```text
//! Idle ──stair_align──► Aligning ──align finished──► Jumping ──stair_jump──► Jumped
//!   └────────────── any failure or timeout ──────────────────────────────► Abnorm
//! ```
//!
//! The align-finished notification arrives on its own channel through
//! [`StairJumping::handle_align_finished`].

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use navcore_middleware::ServiceClient;
use navcore_runtime::base::SetBoolClient;
use navcore_runtime::{
    ExecutorContext, ExecutorCore, RunContext, TaskCallbacks, TaskExecutor, aborted, canceled,
    deps,
};
use navcore_types::{
    FeedbackCode, NavError, StairJumpGoal, StopResult, TaskOutcome, TaskResult, TriggerRequest,
    TriggerResponse,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

type TriggerClient = ServiceClient<TriggerRequest, TriggerResponse>;

/// Progress of the current (or latest) jump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpingStatus {
    #[default]
    Idle,
    Aligning,
    Jumping,
    Jumped,
    Abnorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alignment {
    Idle,
    Waiting(Uuid),
    Aligned(Uuid),
}

#[derive(Clone)]
pub struct StairJumping {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<ExecutorCore>,
    ctx: ExecutorContext,
    status: watch::Sender<JumpingStatus>,
    alignment: watch::Sender<Alignment>,
    align_client: OnceLock<TriggerClient>,
    jump_client: OnceLock<SetBoolClient>,
}

impl StairJumping {
    pub const NAME: &'static str = "stair_jumping";

    pub fn new(ctx: &ExecutorContext, callbacks: TaskCallbacks) -> Self {
        let (status, _) = watch::channel(JumpingStatus::Idle);
        let (alignment, _) = watch::channel(Alignment::Idle);
        Self {
            inner: Arc::new(Inner {
                core: ExecutorCore::new(Self::NAME, ctx.events.clone(), callbacks),
                ctx: ctx.clone(),
                status,
                alignment,
                align_client: OnceLock::new(),
                jump_client: OnceLock::new(),
            }),
        }
    }

    pub fn jumping_status(&self) -> JumpingStatus {
        *self.inner.status.borrow()
    }

    /// Feed one align-finished notification.  `false` and notifications
    /// arriving outside an alignment wait are ignored.
    pub fn handle_align_finished(&self, aligned: bool) {
        if !aligned {
            debug!("align not finished yet");
            return;
        }
        let updated = self.inner.alignment.send_if_modified(|state| match *state {
            Alignment::Waiting(run_id) => {
                *state = Alignment::Aligned(run_id);
                true
            }
            _ => false,
        });
        if !updated {
            debug!("align finished outside an alignment wait, ignored");
        }
    }
}

#[async_trait]
impl TaskExecutor for StairJumping {
    type Goal = StairJumpGoal;

    fn core(&self) -> &ExecutorCore {
        &self.inner.core
    }

    fn start(&self, _goal: StairJumpGoal) -> Result<Uuid, NavError> {
        let ctx = ExecutorCore::begin_run(&self.inner.core)?;
        let run_id = ctx.run_id();
        tokio::spawn(Arc::clone(&self.inner).run(ctx));
        Ok(run_id)
    }

    async fn stop(&self) -> StopResult {
        let inner = &self.inner;
        let result = inner
            .core
            .stop_with(inner.ctx.config.timeouts.stop_wait(), move || async move {
                deps::pause_all(&inner.ctx.lifecycle, &inner.core.release()).await
            })
            .await;
        if result == StopResult::Success {
            inner.status.send_replace(JumpingStatus::Idle);
        }
        result
    }
}

impl Inner {
    fn align_client(&self) -> &TriggerClient {
        self.align_client.get_or_init(|| {
            ServiceClient::new(
                Arc::clone(&self.ctx.services),
                &self.ctx.config.endpoints.stair_align,
                self.ctx.config.timeouts.connect(),
            )
        })
    }

    fn jump_client(&self) -> &SetBoolClient {
        self.jump_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.stair_jump))
    }

    fn set_status(&self, status: JumpingStatus) {
        debug!(?status, "jumping status");
        self.status.send_replace(status);
    }

    #[instrument(skip_all, fields(executor = StairJumping::NAME, run_id = %ctx.run_id()))]
    async fn run(self: Arc<Self>, ctx: RunContext) {
        let outcome = self.execute(&ctx).await;
        self.alignment.send_replace(Alignment::Idle);
        match outcome {
            Ok(()) => {
                self.set_status(JumpingStatus::Jumped);
                ctx.succeed(FeedbackCode::JumpSuccess);
            }
            Err(outcome) => {
                self.set_status(if outcome.result == TaskResult::Canceled {
                    JumpingStatus::Idle
                } else {
                    JumpingStatus::Abnorm
                });
                ctx.roll_back(&self.ctx.lifecycle).await;
                ctx.finish(outcome);
            }
        }
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), TaskOutcome> {
        let t = &self.ctx.config.timeouts;

        ctx.feedback(FeedbackCode::PreparationExecuting);
        ctx.bring_up(&self.ctx.lifecycle, &self.ctx.config.dependencies.stair_jumping)
            .await?;
        ctx.feedback(FeedbackCode::PreparationSuccess);

        self.alignment
            .send_replace(Alignment::Waiting(ctx.run_id()));
        ctx.feedback(FeedbackCode::AlignStarting);
        ctx.step(self.align_client().trigger(t.enable_call()), FeedbackCode::AlignFailed)
            .await?;
        self.set_status(JumpingStatus::Aligning);
        self.wait_aligned(ctx).await?;
        ctx.feedback(FeedbackCode::AlignSuccess);

        self.set_status(JumpingStatus::Jumping);
        ctx.feedback(FeedbackCode::JumpStarting);
        ctx.step(self.jump_client().set(true, t.enable_call()), FeedbackCode::JumpFailed)
            .await
    }

    async fn wait_aligned(&self, ctx: &RunContext) -> Result<(), TaskOutcome> {
        let run_id = ctx.run_id();
        let wait = self.ctx.config.timeouts.stair_align();
        let mut rx = self.alignment.subscribe();

        let aligned = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(canceled()),
            res = rx.wait_for(|a| *a == Alignment::Aligned(run_id)) => res.is_ok(),
            _ = tokio::time::sleep(wait) => false,
        };
        if aligned {
            info!("aligned with the stair");
            Ok(())
        } else {
            error!(timeout_secs = wait.as_secs(), "stair alignment timed out");
            Err(aborted(FeedbackCode::AlignTimeout))
        }
    }
}
