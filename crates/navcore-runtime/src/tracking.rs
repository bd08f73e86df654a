//! UWB target tracking executor (action-style).
//!
//! Brings up the navigation stack and the UWB tracker, then drives one goal
//! on the `tracking_target` action.  Exception codes streamed by the action
//! become `TRACKING_EXCEPTION(code)` feedback; the terminal result maps 1:1
//! onto the run's result.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use navcore_middleware::{ActionClient, GoalEvent, GoalHandle};
use navcore_types::{
    ActionResultCode, FeedbackCode, NavError, RelativePosition, StopResult, TargetTrackingFeedback,
    TargetTrackingGoal, TaskOutcome, TrackingGoal,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::base::{
    ExecutorContext, ExecutorCore, RunContext, TaskCallbacks, TaskExecutor, aborted, canceled,
};
use crate::deps;

type TrackingClient = ActionClient<TargetTrackingGoal, TargetTrackingFeedback>;

#[derive(Clone)]
pub struct UwbTracking {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<ExecutorCore>,
    ctx: ExecutorContext,
    client: OnceLock<TrackingClient>,
}

impl UwbTracking {
    pub const NAME: &'static str = "uwb_tracking";

    pub fn new(ctx: &ExecutorContext, callbacks: TaskCallbacks) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: ExecutorCore::new(Self::NAME, ctx.events.clone(), callbacks),
                ctx: ctx.clone(),
                client: OnceLock::new(),
            }),
        }
    }
}

#[async_trait]
impl TaskExecutor for UwbTracking {
    type Goal = TrackingGoal;

    fn core(&self) -> &ExecutorCore {
        &self.inner.core
    }

    fn start(&self, goal: TrackingGoal) -> Result<Uuid, NavError> {
        let ctx = ExecutorCore::begin_run(&self.inner.core)?;
        let relative_pos = match RelativePosition::try_from(goal.relative_pos) {
            Ok(pos) => pos,
            Err(e) => {
                error!(relative_pos = goal.relative_pos, "invalid tracking goal");
                ctx.finish(aborted(FeedbackCode::InvalidGoal));
                return Err(e);
            }
        };
        let run_id = ctx.run_id();
        let goal = TargetTrackingGoal {
            relative_pos,
            keep_distance: goal.keep_distance,
        };
        tokio::spawn(Arc::clone(&self.inner).run(ctx, goal));
        Ok(run_id)
    }

    async fn stop(&self) -> StopResult {
        let inner = &self.inner;
        let t = &inner.ctx.config.timeouts;
        inner
            .core
            .stop_with(t.stop_wait(), move || async move {
                inner.client().cancel().await?;
                deps::pause_all(&inner.ctx.lifecycle, &inner.core.release()).await
            })
            .await
    }
}

impl Inner {
    fn client(&self) -> &TrackingClient {
        self.client.get_or_init(|| {
            ActionClient::new(
                Arc::clone(&self.ctx.actions),
                &self.ctx.config.endpoints.tracking_target,
                self.ctx.config.timeouts.action_server(),
            )
        })
    }

    #[instrument(skip_all, fields(executor = UwbTracking::NAME, run_id = %ctx.run_id()))]
    async fn run(self: Arc<Self>, ctx: RunContext, goal: TargetTrackingGoal) {
        match self.execute(&ctx, goal).await {
            Ok(()) => ctx.succeed(FeedbackCode::TaskSuccess),
            Err(outcome) => {
                ctx.roll_back(&self.ctx.lifecycle).await;
                ctx.finish(outcome);
            }
        }
    }

    async fn execute(&self, ctx: &RunContext, goal: TargetTrackingGoal) -> Result<(), TaskOutcome> {
        let t = &self.ctx.config.timeouts;

        ctx.feedback(FeedbackCode::PreparationExecuting);
        ctx.bring_up(&self.ctx.lifecycle, &self.ctx.config.dependencies.tracking)
            .await?;
        ctx.feedback(FeedbackCode::PreparationSuccess);

        let client = self.client();
        let ready = ctx
            .guard(client.wait_for_server(t.action_server()))
            .await
            .map_err(|_| canceled())?;
        if !ready {
            error!(action = client.name(), "tracking action server unavailable");
            return Err(aborted(FeedbackCode::ActionServerUnavailable));
        }

        ctx.feedback(FeedbackCode::ServiceStarting);
        info!(relative_pos = ?goal.relative_pos, keep_distance = goal.keep_distance, "sending tracking goal");
        let send = client.send_goal(&goal);
        tokio::pin!(send);
        let sent = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                // Deferred until the server decides; forwarded on acceptance.
                if let Err(e) = client.cancel().await {
                    warn!(error = %e, "tracking goal cancel request failed");
                }
                if let Ok(mut handle) = send.await {
                    Self::await_settled(&mut handle, t.stop_wait()).await;
                }
                return Err(canceled());
            }
            sent = &mut send => sent,
        };
        let mut handle = match sent {
            Ok(handle) => handle,
            Err(NavError::GoalRejected(_)) => return Err(aborted(FeedbackCode::GoalRejected)),
            Err(e) => {
                error!(error = %e, "tracking goal could not be sent");
                return Err(aborted(FeedbackCode::ActionServerUnavailable));
            }
        };
        ctx.feedback(FeedbackCode::ServiceStartingSuccess);

        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    self.cancel_goal(&mut handle, t.stop_wait()).await;
                    return Err(canceled());
                }
                event = handle.next_event() => event,
            };
            match event {
                Some(GoalEvent::Feedback(feedback)) => {
                    ctx.feedback(FeedbackCode::TrackingException(feedback.exception_code));
                }
                Some(GoalEvent::Finished(ActionResultCode::Succeeded)) => return Ok(()),
                Some(GoalEvent::Finished(ActionResultCode::Canceled)) => return Err(canceled()),
                Some(GoalEvent::Finished(ActionResultCode::Aborted)) | None => {
                    return Err(aborted(FeedbackCode::TaskAborted));
                }
            }
        }
    }

    /// Ask the server to cancel and wait, bounded, for it to confirm.
    async fn cancel_goal(
        &self,
        handle: &mut GoalHandle<TargetTrackingFeedback>,
        wait: Duration,
    ) {
        if let Err(e) = self.client().cancel().await {
            warn!(error = %e, "tracking goal cancel request failed");
            return;
        }
        Self::await_settled(handle, wait).await;
    }

    async fn await_settled(handle: &mut GoalHandle<TargetTrackingFeedback>, wait: Duration) {
        let confirmed = tokio::time::timeout(wait, async {
            while let Some(event) = handle.next_event().await {
                if let GoalEvent::Finished(code) = event {
                    return Some(code);
                }
            }
            None
        })
        .await;
        match confirmed {
            Ok(Some(code)) => info!(result = ?code, "tracking goal settled after cancel"),
            _ => warn!("tracking goal did not confirm cancel"),
        }
    }
}
