//! Laser mapping executor.
//!
//! Brings up the depth camera and the map builder, switches mapping on and,
//! when the goal asks for it, enables realtime pose reporting.  Mapping has
//! no completion notification: the run succeeds once every call succeeded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use navcore_types::{FeedbackCode, MappingGoal, NavError, StopResult, TaskOutcome};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::base::{
    ExecutorContext, ExecutorCore, RunContext, SetBoolClient, TaskCallbacks, TaskExecutor,
};
use crate::deps;

#[derive(Clone)]
pub struct LaserMapping {
    inner: Arc<Inner>,
}

struct Inner {
    core: Arc<ExecutorCore>,
    ctx: ExecutorContext,
    /// Pose reporting was switched on and must be switched off on stop.
    reporting_pose: AtomicBool,
    start_client: OnceLock<SetBoolClient>,
    stop_client: OnceLock<SetBoolClient>,
    pose_client: OnceLock<SetBoolClient>,
}

impl LaserMapping {
    pub const NAME: &'static str = "laser_mapping";

    pub fn new(ctx: &ExecutorContext, callbacks: TaskCallbacks) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: ExecutorCore::new(Self::NAME, ctx.events.clone(), callbacks),
                ctx: ctx.clone(),
                reporting_pose: AtomicBool::new(false),
                start_client: OnceLock::new(),
                stop_client: OnceLock::new(),
                pose_client: OnceLock::new(),
            }),
        }
    }
}

#[async_trait]
impl TaskExecutor for LaserMapping {
    type Goal = MappingGoal;

    fn core(&self) -> &ExecutorCore {
        &self.inner.core
    }

    fn start(&self, goal: MappingGoal) -> Result<Uuid, NavError> {
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
                inner.stop_client().set(true, t.disable_call()).await?;
                if inner.reporting_pose.load(Ordering::Acquire) {
                    inner.pose_client().set(false, t.pose_call()).await?;
                    inner.reporting_pose.store(false, Ordering::Release);
                }
                deps::pause_all(&inner.ctx.lifecycle, &inner.core.release()).await
            })
            .await
    }
}

impl Inner {
    fn start_client(&self) -> &SetBoolClient {
        self.start_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.start_mapping))
    }

    fn stop_client(&self) -> &SetBoolClient {
        self.stop_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.stop_mapping))
    }

    fn pose_client(&self) -> &SetBoolClient {
        self.pose_client
            .get_or_init(|| self.ctx.set_bool_client(&self.ctx.config.endpoints.pose_enable))
    }

    #[instrument(skip_all, fields(executor = LaserMapping::NAME, run_id = %ctx.run_id()))]
    async fn run(self: Arc<Self>, ctx: RunContext, goal: MappingGoal) {
        let mut switched_on = false;
        match self.execute(&ctx, goal, &mut switched_on).await {
            Ok(()) => ctx.succeed(FeedbackCode::TaskSuccess),
            Err(outcome) => {
                if switched_on {
                    let t = &self.ctx.config.timeouts;
                    if let Err(e) = self.stop_client().set(true, t.disable_call()).await {
                        warn!(error = %e, "failed to switch mapping off during rollback");
                    }
                }
                ctx.roll_back(&self.ctx.lifecycle).await;
                ctx.finish(outcome);
            }
        }
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        goal: MappingGoal,
        switched_on: &mut bool,
    ) -> Result<(), TaskOutcome> {
        let t = &self.ctx.config.timeouts;

        ctx.feedback(FeedbackCode::PreparationExecuting);
        ctx.bring_up(&self.ctx.lifecycle, &self.ctx.config.dependencies.mapping)
            .await?;
        ctx.feedback(FeedbackCode::PreparationSuccess);

        ctx.feedback(FeedbackCode::ServiceStarting);
        ctx.step(
            self.start_client().set(true, t.enable_call()),
            FeedbackCode::ServiceStartingError,
        )
        .await?;
        *switched_on = true;

        if goal.report_pose {
            ctx.step(
                self.pose_client().set(true, t.pose_call()),
                FeedbackCode::ServiceStartingError,
            )
            .await?;
            self.reporting_pose.store(true, Ordering::Release);
            info!("realtime pose reporting enabled");
        }
        ctx.feedback(FeedbackCode::ServiceStartingSuccess);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{EventSink, aborted};
    use crate::config::RuntimeConfig;
    use navcore_middleware::{ServiceScript, SimBackend};
    use navcore_types::{ExecutorEvent, ExecutorEventKind, LifecycleState, TaskResult};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (
        Arc<SimBackend>,
        ExecutorContext,
        LaserMapping,
        UnboundedReceiver<ExecutorEvent>,
    ) {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node("camera/camera");
        sim.serve_lifecycle_node("map_builder");
        for service in ["start_mapping", "stop_mapping", "PoseEnable"] {
            sim.script_service(service, ServiceScript::success());
        }
        let (sink, events) = EventSink::channel();
        let ctx = ExecutorContext::simulated(sim.clone(), RuntimeConfig::default(), sink);
        let exec = LaserMapping::new(&ctx, TaskCallbacks::new());
        (sim, ctx, exec, events)
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
    async fn mapping_with_pose_reporting_and_stop() {
        let (sim, ctx, exec, mut events) = setup();
        exec.start(MappingGoal { report_pose: true }).unwrap();

        assert_eq!(finished(&mut events).await.result, TaskResult::Success);
        assert!(exec.is_activated());
        assert_eq!(sim.calls_to("PoseEnable"), vec![json!({"data": true})]);

        assert_eq!(exec.stop().await, StopResult::Success);
        assert_eq!(
            sim.calls_to("PoseEnable"),
            vec![json!({"data": true}), json!({"data": false})]
        );
        assert_eq!(sim.calls_to("stop_mapping").len(), 1);
        assert_eq!(
            ctx.lifecycle.state("map_builder").await.unwrap(),
            LifecycleState::Inactive
        );
    }

    #[tokio::test]
    async fn mapping_without_pose_never_touches_pose_service() {
        let (sim, _ctx, exec, mut events) = setup();
        exec.start(MappingGoal { report_pose: false }).unwrap();
        finished(&mut events).await;
        exec.stop().await;
        assert!(sim.calls_to("PoseEnable").is_empty());
    }

    #[tokio::test]
    async fn declined_start_rolls_back() {
        let (sim, ctx, exec, mut events) = setup();
        sim.script_service("start_mapping", ServiceScript::declined("no lidar"));
        exec.start(MappingGoal { report_pose: true }).unwrap();

        assert_eq!(
            finished(&mut events).await,
            aborted(FeedbackCode::ServiceStartingError)
        );
        assert!(sim.calls_to("stop_mapping").is_empty());
        assert_eq!(
            ctx.lifecycle.state("camera/camera").await.unwrap(),
            LifecycleState::Inactive
        );
        assert!(!exec.is_activated());
    }
}
