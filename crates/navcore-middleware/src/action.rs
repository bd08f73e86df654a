//! [`ActionClient`] – long-running goal proxy.
//!
//! # Goal state machine
//!
//! ```text
//! Idle ──send──► GoalSent ──► Rejected
//!                   │
//!                   ▼
//!               Accepted ──feedback──► Executing
//!                   │                     │
//!                   └───────result────────┴──► Succeeded | Aborted | Canceled
//! ```
//!
//! Only one goal is active per client.  Cancel is honoured only while the
//! goal is `GoalSent`, `Accepted` or `Executing`; a cancel requested during
//! `GoalSent` is forwarded as soon as the server accepts the goal.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use navcore_types::{ActionResultCode, NavError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ActionBackend, ActionUpdate, GoalAcceptance};
use crate::service::AVAILABILITY_POLL;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActionState {
    #[default]
    Idle,
    GoalSent,
    Accepted,
    Rejected,
    Executing,
    Succeeded,
    Aborted,
    Canceled,
}

impl ActionState {
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            ActionState::GoalSent | ActionState::Accepted | ActionState::Executing
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionState::Rejected
                | ActionState::Succeeded
                | ActionState::Aborted
                | ActionState::Canceled
        )
    }
}

impl From<ActionResultCode> for ActionState {
    fn from(code: ActionResultCode) -> Self {
        match code {
            ActionResultCode::Succeeded => ActionState::Succeeded,
            ActionResultCode::Aborted => ActionState::Aborted,
            ActionResultCode::Canceled => ActionState::Canceled,
        }
    }
}

#[derive(Default)]
struct GoalSlot {
    state: ActionState,
    goal_id: Option<Uuid>,
    cancel_requested: bool,
}

fn lock(slot: &Mutex<GoalSlot>) -> MutexGuard<'_, GoalSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resets the slot to `Idle` unless disarmed once the server has decided.
struct PendingSubmission<'a> {
    action: &'a str,
    slot: &'a Mutex<GoalSlot>,
    armed: bool,
}

impl PendingSubmission<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSubmission<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = lock(self.slot);
        if slot.state == ActionState::GoalSent {
            *slot = GoalSlot::default();
            debug!(action = %self.action, "goal submission ended without a decision");
        }
    }
}

/// Typed proxy for one action server.
///
/// `G` is the goal payload, `F` the feedback payload.
pub struct ActionClient<G, F> {
    name: String,
    backend: Arc<dyn ActionBackend>,
    call_timeout: Duration,
    slot: Arc<Mutex<GoalSlot>>,
    _marker: PhantomData<fn(G) -> F>,
}

impl<G, F> ActionClient<G, F>
where
    G: Serialize,
    F: DeserializeOwned,
{
    /// `call_timeout` bounds goal submission and cancel requests.
    pub fn new(
        backend: Arc<dyn ActionBackend>,
        name: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            call_timeout,
            slot: Arc::new(Mutex::new(GoalSlot::default())),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActionState {
        lock(&self.slot).state
    }

    /// Wait up to `timeout` for the action server to become reachable.
    pub async fn wait_for_server(&self, timeout: Duration) -> bool {
        let ready = async {
            while !self.backend.is_server_ready(&self.name).await {
                tokio::time::sleep(AVAILABILITY_POLL).await;
            }
        };
        tokio::time::timeout(timeout, ready).await.is_ok()
    }

    /// Submit `goal` and wait for the server's accept/reject decision.
    ///
    /// # Errors
    ///
    /// * [`NavError::Busy`] – a goal is already active on this client.
    /// * [`NavError::GoalRejected`] – the server refused the goal.
    /// * [`NavError::Timeout`] / transport errors – the goal never reached
    ///   the server; the client returns to `Idle`.
    ///
    /// Dropping the future before the decision arrives also returns the
    /// client to `Idle`.
    pub async fn send_goal(&self, goal: &G) -> Result<GoalHandle<F>, NavError> {
        {
            let mut slot = lock(&self.slot);
            if slot.state.is_cancellable() {
                return Err(NavError::Busy(self.name.clone()));
            }
            *slot = GoalSlot {
                state: ActionState::GoalSent,
                ..GoalSlot::default()
            };
        }
        let pending = PendingSubmission {
            action: &self.name,
            slot: &self.slot,
            armed: true,
        };

        let acceptance = self.submit(goal).await?;
        pending.disarm();

        match acceptance {
            GoalAcceptance::Rejected => {
                lock(&self.slot).state = ActionState::Rejected;
                warn!(action = %self.name, "goal rejected");
                Err(NavError::GoalRejected(self.name.clone()))
            }
            GoalAcceptance::Accepted { goal_id, updates } => {
                let cancel_now = {
                    let mut slot = lock(&self.slot);
                    slot.state = ActionState::Accepted;
                    slot.goal_id = Some(goal_id);
                    slot.cancel_requested
                };
                info!(action = %self.name, %goal_id, "goal accepted");
                if cancel_now {
                    if let Err(e) = self.request_cancel(goal_id).await {
                        warn!(action = %self.name, %goal_id, error = %e, "deferred cancel failed");
                    }
                }
                Ok(GoalHandle {
                    action: self.name.clone(),
                    goal_id,
                    updates,
                    slot: Arc::clone(&self.slot),
                    finished: false,
                    _marker: PhantomData,
                })
            }
        }
    }

    async fn submit(&self, goal: &G) -> Result<GoalAcceptance, NavError> {
        let payload = serde_json::to_value(goal)
            .map_err(|e| NavError::Serialization(format!("{} goal: {e}", self.name)))?;
        debug!(action = %self.name, goal = %payload, "sending goal");
        tokio::time::timeout(self.call_timeout, self.backend.send_goal(&self.name, payload))
            .await
            .map_err(|_| NavError::Timeout {
                endpoint: self.name.clone(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })?
    }

    /// Request cancellation of the active goal.
    ///
    /// Returns `Ok(false)` when no cancellable goal exists.  The terminal
    /// result still arrives on the goal's [`GoalHandle`].
    pub async fn cancel(&self) -> Result<bool, NavError> {
        let goal_id = {
            let mut slot = lock(&self.slot);
            match slot.state {
                ActionState::GoalSent => {
                    slot.cancel_requested = true;
                    None
                }
                ActionState::Accepted | ActionState::Executing => slot.goal_id,
                _ => return Ok(false),
            }
        };
        if let Some(goal_id) = goal_id {
            self.request_cancel(goal_id).await?;
        }
        Ok(true)
    }

    async fn request_cancel(&self, goal_id: Uuid) -> Result<(), NavError> {
        info!(action = %self.name, %goal_id, "requesting goal cancel");
        tokio::time::timeout(
            self.call_timeout,
            self.backend.cancel_goal(&self.name, goal_id),
        )
        .await
        .map_err(|_| NavError::Timeout {
            endpoint: self.name.clone(),
            timeout_ms: self.call_timeout.as_millis() as u64,
        })?
    }
}

/// Event observed on an accepted goal.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalEvent<F> {
    Feedback(F),
    Finished(ActionResultCode),
}

/// Receiving end of an accepted goal.
pub struct GoalHandle<F> {
    action: String,
    goal_id: Uuid,
    updates: BoxStream<'static, ActionUpdate>,
    slot: Arc<Mutex<GoalSlot>>,
    finished: bool,
    _marker: PhantomData<fn() -> F>,
}

impl<F> std::fmt::Debug for GoalHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalHandle")
            .field("action", &self.action)
            .field("goal_id", &self.goal_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<F: DeserializeOwned> GoalHandle<F> {
    pub fn goal_id(&self) -> Uuid {
        self.goal_id
    }

    /// Next feedback or the terminal result.  Yields `None` after the
    /// terminal result has been returned.
    ///
    /// A stream that closes without a result counts as `Aborted`.
    pub async fn next_event(&mut self) -> Option<GoalEvent<F>> {
        if self.finished {
            return None;
        }
        loop {
            match self.updates.next().await {
                Some(ActionUpdate::Feedback(raw)) => {
                    {
                        let mut slot = lock(&self.slot);
                        if slot.state == ActionState::Accepted {
                            slot.state = ActionState::Executing;
                        }
                    }
                    match serde_json::from_value(raw) {
                        Ok(feedback) => return Some(GoalEvent::Feedback(feedback)),
                        Err(e) => {
                            warn!(action = %self.action, error = %e, "dropping malformed feedback");
                        }
                    }
                }
                Some(ActionUpdate::Result(code)) => return Some(self.settle(code)),
                None => {
                    warn!(action = %self.action, goal_id = %self.goal_id, "goal stream closed without a result");
                    return Some(self.settle(ActionResultCode::Aborted));
                }
            }
        }
    }

    fn settle(&mut self, code: ActionResultCode) -> GoalEvent<F> {
        self.finished = true;
        {
            let mut slot = lock(&self.slot);
            if slot.goal_id == Some(self.goal_id) {
                slot.state = code.into();
            }
        }
        info!(action = %self.action, goal_id = %self.goal_id, result = ?code, "goal finished");
        GoalEvent::Finished(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ActionScript, SimBackend};
    use navcore_types::{RelativePosition, TargetTrackingFeedback, TargetTrackingGoal};
    use serde_json::json;

    type TrackingClient = ActionClient<TargetTrackingGoal, TargetTrackingFeedback>;

    fn goal() -> TargetTrackingGoal {
        TargetTrackingGoal {
            relative_pos: RelativePosition::Behind,
            keep_distance: 1.2,
        }
    }

    fn client(sim: &Arc<SimBackend>) -> TrackingClient {
        ActionClient::new(sim.clone(), "tracking_target", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn accepted_goal_streams_feedback_then_result() {
        let sim = Arc::new(SimBackend::new());
        sim.script_action(
            "tracking_target",
            ActionScript::Accept {
                feedback: vec![json!({"exception_code": 7})],
                result: Some(ActionResultCode::Succeeded),
            },
        );
        let client = client(&sim);

        let mut handle = client.send_goal(&goal()).await.unwrap();
        assert_eq!(client.state(), ActionState::Accepted);

        assert_eq!(
            handle.next_event().await,
            Some(GoalEvent::Feedback(TargetTrackingFeedback { exception_code: 7 }))
        );
        assert_eq!(client.state(), ActionState::Executing);
        assert_eq!(
            handle.next_event().await,
            Some(GoalEvent::Finished(ActionResultCode::Succeeded))
        );
        assert_eq!(handle.next_event().await, None);
        assert_eq!(client.state(), ActionState::Succeeded);
    }

    #[tokio::test]
    async fn rejected_goal_is_an_error() {
        let sim = Arc::new(SimBackend::new());
        sim.script_action("tracking_target", ActionScript::Reject);
        let client = client(&sim);

        let err = client.send_goal(&goal()).await.unwrap_err();
        assert_eq!(err, NavError::GoalRejected("tracking_target".into()));
        assert_eq!(client.state(), ActionState::Rejected);
        assert!(!client.cancel().await.unwrap());
    }

    #[tokio::test]
    async fn second_goal_while_active_is_busy() {
        let sim = Arc::new(SimBackend::new());
        sim.script_action(
            "tracking_target",
            ActionScript::Accept {
                feedback: vec![],
                result: None,
            },
        );
        let client = client(&sim);

        let _handle = client.send_goal(&goal()).await.unwrap();
        let err = client.send_goal(&goal()).await.unwrap_err();
        assert_eq!(err, NavError::Busy("tracking_target".into()));
    }

    #[tokio::test]
    async fn cancel_forwards_to_server_and_settles_canceled() {
        let sim = Arc::new(SimBackend::new());
        sim.script_action(
            "tracking_target",
            ActionScript::Accept {
                feedback: vec![],
                result: None,
            },
        );
        let client = client(&sim);

        let mut handle = client.send_goal(&goal()).await.unwrap();
        assert!(client.cancel().await.unwrap());
        assert_eq!(sim.cancel_requests(), vec![handle.goal_id()]);
        assert_eq!(
            handle.next_event().await,
            Some(GoalEvent::Finished(ActionResultCode::Canceled))
        );
        assert_eq!(client.state(), ActionState::Canceled);
        assert!(!client.cancel().await.unwrap());
    }

    struct SilentServer;

    #[async_trait::async_trait]
    impl ActionBackend for SilentServer {
        async fn is_server_ready(&self, _action: &str) -> bool {
            true
        }

        async fn send_goal(
            &self,
            _action: &str,
            _goal: serde_json::Value,
        ) -> Result<GoalAcceptance, NavError> {
            Ok(GoalAcceptance::Accepted {
                goal_id: Uuid::new_v4(),
                updates: futures_util::stream::empty().boxed(),
            })
        }

        async fn cancel_goal(&self, _action: &str, _goal_id: Uuid) -> Result<(), NavError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn closed_stream_counts_as_aborted() {
        let client: TrackingClient =
            ActionClient::new(Arc::new(SilentServer), "tracking_target", Duration::from_secs(5));

        let mut handle = client.send_goal(&goal()).await.unwrap();
        assert_eq!(
            handle.next_event().await,
            Some(GoalEvent::Finished(ActionResultCode::Aborted))
        );
        assert_eq!(client.state(), ActionState::Aborted);
    }

    fn open_goals(sim: &SimBackend) {
        sim.script_action(
            "tracking_target",
            ActionScript::Accept {
                feedback: vec![],
                result: None,
            },
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_submission_returns_client_to_idle() {
        let sim = Arc::new(SimBackend::new());
        open_goals(&sim);
        sim.delay_next_goal("tracking_target", Duration::from_secs(2));
        let client = client(&sim);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(500), client.send_goal(&goal())).await;
        assert!(abandoned.is_err());
        assert_eq!(client.state(), ActionState::Idle);
        assert!(!client.cancel().await.unwrap());

        let handle = client.send_goal(&goal()).await.unwrap();
        assert_eq!(client.state(), ActionState::Accepted);
        assert_eq!(sim.last_goal("tracking_target"), Some(handle.goal_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_submission_is_forwarded_on_acceptance() {
        let sim = Arc::new(SimBackend::new());
        open_goals(&sim);
        sim.delay_next_goal("tracking_target", Duration::from_secs(1));
        let client = client(&sim);

        let cancel_later = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let requested = client.cancel().await;
            assert!(sim.cancel_requests().is_empty());
            requested
        };
        let g = goal();
        let (sent, requested) = tokio::join!(client.send_goal(&g), cancel_later);
        assert!(requested.unwrap());

        let mut handle = sent.unwrap();
        assert_eq!(sim.cancel_requests(), vec![handle.goal_id()]);
        assert_eq!(
            handle.next_event().await,
            Some(GoalEvent::Finished(ActionResultCode::Canceled))
        );
        assert_eq!(client.state(), ActionState::Canceled);
    }

    #[tokio::test]
    async fn offline_server_is_unavailable_and_client_returns_idle() {
        let sim = Arc::new(SimBackend::new());
        let client = client(&sim);

        assert!(!client.wait_for_server(Duration::from_millis(10)).await);
        let err = client.send_goal(&goal()).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(client.state(), ActionState::Idle);
    }
}
