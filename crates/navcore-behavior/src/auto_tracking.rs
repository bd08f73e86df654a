//! Auto-tracking behavior executor: a single `autonomously_tracking` switch.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use navcore_runtime::base::SetBoolClient;
use navcore_runtime::{
    ExecutorContext, ExecutorCore, RunContext, TaskCallbacks, TaskExecutor, deps,
};
use navcore_types::{AutoTrackingGoal, FeedbackCode, NavError, StopResult, TaskOutcome};
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct AutoTracking {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<ExecutorCore>,
    ctx: ExecutorContext,
    client: OnceLock<SetBoolClient>,
}

impl AutoTracking {
    pub const NAME: &'static str = "auto_tracking";

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
impl TaskExecutor for AutoTracking {
    type Goal = AutoTrackingGoal;

    fn core(&self) -> &ExecutorCore {
        &self.inner.core
    }

    fn start(&self, goal: AutoTrackingGoal) -> Result<Uuid, NavError> {
        let ctx = ExecutorCore::begin_run(&self.inner.core)?;
        let run_id = ctx.run_id();
        tokio::spawn(Arc::clone(&self.inner).run(ctx, goal));
        Ok(run_id)
    }

    async fn stop(&self) -> StopResult {
        let inner = &self.inner;
        let t = &inner.ctx.config.timeouts;
        inner
            .core
            .stop_with(t.stop_wait(), move || async move {
                inner.client().set(false, t.disable_call()).await?;
                deps::pause_all(&inner.ctx.lifecycle, &inner.core.release()).await
            })
            .await
    }
}

impl Inner {
    fn client(&self) -> &SetBoolClient {
        self.client.get_or_init(|| {
            self.ctx
                .set_bool_client(&self.ctx.config.endpoints.autonomously_tracking)
        })
    }

    #[instrument(skip_all, fields(executor = AutoTracking::NAME, run_id = %ctx.run_id()))]
    async fn run(self: Arc<Self>, ctx: RunContext, goal: AutoTrackingGoal) {
        match self.execute(&ctx, goal).await {
            Ok(()) => ctx.succeed(FeedbackCode::TaskSuccess),
            Err(outcome) => {
                ctx.roll_back(&self.ctx.lifecycle).await;
                ctx.finish(outcome);
            }
        }
    }

    async fn execute(&self, ctx: &RunContext, goal: AutoTrackingGoal) -> Result<(), TaskOutcome> {
        ctx.feedback(FeedbackCode::PreparationExecuting);
        ctx.bring_up(&self.ctx.lifecycle, &self.ctx.config.dependencies.auto_tracking)
            .await?;
        ctx.feedback(FeedbackCode::PreparationSuccess);

        ctx.feedback(FeedbackCode::ServiceStarting);
        info!(enable = goal.enable, "switching autonomous tracking");
        ctx.step(
            self.client()
                .set(goal.enable, self.ctx.config.timeouts.enable_call()),
            FeedbackCode::ServiceStartingError,
        )
        .await?;
        ctx.feedback(FeedbackCode::ServiceStartingSuccess);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcore_middleware::{ServiceScript, SimBackend};
    use navcore_runtime::{EventSink, RuntimeConfig, aborted};
    use navcore_types::{ExecutorEvent, ExecutorEventKind, TaskResult};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Arc<SimBackend>, AutoTracking, UnboundedReceiver<ExecutorEvent>) {
        let sim = Arc::new(SimBackend::new());
        let (sink, events) = EventSink::channel();
        let ctx = ExecutorContext::simulated(sim.clone(), RuntimeConfig::default(), sink);
        (sim, AutoTracking::new(&ctx, TaskCallbacks::new()), events)
    }

    async fn finished(events: &mut UnboundedReceiver<ExecutorEvent>) -> TaskOutcome {
        while let Some(event) = events.recv().await {
            if let ExecutorEventKind::Finished(outcome) = event.kind {
                return outcome;
            }
        }
        panic!("event stream closed before the run finished");
    }

    #[tokio::test]
    async fn switches_autonomous_tracking_on_and_off() {
        let (sim, exec, mut events) = setup();
        sim.script_service("autonomously_tracking", ServiceScript::success());

        exec.start(AutoTrackingGoal { enable: true }).unwrap();
        assert_eq!(finished(&mut events).await.result, TaskResult::Success);
        assert_eq!(exec.stop().await, StopResult::Success);

        assert_eq!(
            sim.calls_to("autonomously_tracking"),
            vec![json!({"data": true}), json!({"data": false})]
        );
    }

    #[tokio::test]
    async fn declined_switch_aborts() {
        let (sim, exec, mut events) = setup();
        sim.script_service("autonomously_tracking", ServiceScript::declined("no target"));

        exec.start(AutoTrackingGoal { enable: true }).unwrap();
        assert_eq!(
            finished(&mut events).await,
            aborted(FeedbackCode::ServiceStartingError)
        );
        assert!(!exec.is_activated());
    }
}
