//! [`SimBackend`] – scriptable in-process transport.
//!
//! Every endpoint answers according to a [`ServiceScript`] or
//! [`ActionScript`].  Endpoints without a script are offline.  All delivered
//! calls and goals are recorded so tests can assert on ordering and on calls
//! that must never happen.
//!
//! ```rust,ignore
//! let sim = Arc::new(SimBackend::new());
//! sim.serve_lifecycle_node("localization_node");
//! sim.script_service("start_location", ServiceScript::success());
//! sim.script_once("PoseEnable", ServiceScript::declined("busy"));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use navcore_types::{ActionResultCode, NavError};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{ActionBackend, ActionUpdate, GoalAcceptance, ServiceBackend};

/// How a simulated service answers one call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceScript {
    /// Answer immediately with the payload.
    Respond(Value),
    /// Answer with the payload after the delay.
    Delayed(Duration, Value),
    /// Fail delivery with a transport error.
    Fail(String),
    /// Accept the call and never answer.
    Hang,
    /// Not reachable.
    Offline,
}

impl ServiceScript {
    /// `SetBool`/`Trigger`/`ChangeState` success.
    pub fn success() -> Self {
        Self::Respond(json!({ "success": true, "message": "" }))
    }

    /// `SetBool`/`Trigger` negative answer carrying `message`.
    pub fn declined(message: &str) -> Self {
        Self::Respond(json!({ "success": false, "message": message }))
    }
}

/// How a simulated action server treats a new goal.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionScript {
    Offline,
    Reject,
    /// Accept, emit `feedback`, then finish with `result`.  With `result ==
    /// None` the goal stays open until [`SimBackend::finish_goal`] or a
    /// cancel request.
    Accept {
        feedback: Vec<Value>,
        result: Option<ActionResultCode>,
    },
}

/// One request delivered to a simulated endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub endpoint: String,
    pub request: Value,
}

struct OpenGoal {
    action: String,
    updates: mpsc::UnboundedSender<ActionUpdate>,
}

#[derive(Default)]
struct SimState {
    services: HashMap<String, ServiceScript>,
    one_shots: HashMap<String, VecDeque<ServiceScript>>,
    actions: HashMap<String, ActionScript>,
    goal_delays: HashMap<String, VecDeque<Duration>>,
    calls: Vec<RecordedCall>,
    goals: HashMap<Uuid, OpenGoal>,
    goal_order: Vec<(String, Uuid)>,
    cancels: Vec<Uuid>,
}

impl SimState {
    fn peek(&self, service: &str) -> Option<&ServiceScript> {
        self.one_shots
            .get(service)
            .and_then(VecDeque::front)
            .or_else(|| self.services.get(service))
    }

    fn next(&mut self, service: &str) -> Option<ServiceScript> {
        if let Some(script) = self.one_shots.get_mut(service).and_then(VecDeque::pop_front) {
            return Some(script);
        }
        self.services.get(service).cloned()
    }
}

/// Scriptable transport implementing both backend seams.
#[derive(Default)]
pub struct SimBackend {
    state: Mutex<SimState>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the steady-state answer of `service`.
    pub fn script_service(&self, service: &str, script: ServiceScript) {
        self.lock().services.insert(service.to_string(), script);
    }

    /// Queue an answer used for exactly one call before the steady script.
    pub fn script_once(&self, service: &str, script: ServiceScript) {
        self.lock()
            .one_shots
            .entry(service.to_string())
            .or_default()
            .push_back(script);
    }

    /// Make `<node>/change_state` accept every transition.
    pub fn serve_lifecycle_node(&self, node: &str) {
        self.script_service(&format!("{node}/change_state"), ServiceScript::success());
    }

    pub fn script_action(&self, action: &str, script: ActionScript) {
        self.lock().actions.insert(action.to_string(), script);
    }

    /// Hold the server's decision on the next goal sent to `action` for
    /// `delay`.
    pub fn delay_next_goal(&self, action: &str, delay: Duration) {
        self.lock()
            .goal_delays
            .entry(action.to_string())
            .or_default()
            .push_back(delay);
    }

    /// Every delivered call and goal, in delivery order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Request payloads delivered to `endpoint`, in order.
    pub fn calls_to(&self, endpoint: &str) -> Vec<Value> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .map(|c| c.request.clone())
            .collect()
    }

    /// Goal ids for which a cancel was requested.
    pub fn cancel_requests(&self) -> Vec<Uuid> {
        self.lock().cancels.clone()
    }

    /// Id of the most recently accepted goal on `action`.
    pub fn last_goal(&self, action: &str) -> Option<Uuid> {
        self.lock()
            .goal_order
            .iter()
            .rev()
            .find(|(name, _)| name == action)
            .map(|(_, id)| *id)
    }

    /// Push feedback onto an open goal.  Returns `false` if it is not open.
    pub fn push_feedback(&self, goal_id: Uuid, feedback: Value) -> bool {
        self.lock()
            .goals
            .get(&goal_id)
            .is_some_and(|g| g.updates.send(ActionUpdate::Feedback(feedback)).is_ok())
    }

    /// Finish an open goal.  Returns `false` if it is not open.
    pub fn finish_goal(&self, goal_id: Uuid, code: ActionResultCode) -> bool {
        match self.lock().goals.remove(&goal_id) {
            Some(goal) => goal.updates.send(ActionUpdate::Result(code)).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ServiceBackend for SimBackend {
    async fn is_available(&self, service: &str) -> bool {
        self.lock()
            .peek(service)
            .is_some_and(|s| *s != ServiceScript::Offline)
    }

    async fn call(&self, service: &str, request: Value) -> Result<Value, NavError> {
        let script = {
            let mut state = self.lock();
            match state.next(service) {
                None | Some(ServiceScript::Offline) => {
                    return Err(NavError::Unavailable(service.to_string()));
                }
                Some(script) => {
                    state.calls.push(RecordedCall {
                        endpoint: service.to_string(),
                        request,
                    });
                    script
                }
            }
        };
        debug!(service, ?script, "simulated call");

        match script {
            ServiceScript::Respond(value) => Ok(value),
            ServiceScript::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            ServiceScript::Fail(details) => Err(NavError::Transport {
                endpoint: service.to_string(),
                details,
            }),
            ServiceScript::Hang => std::future::pending().await,
            ServiceScript::Offline => Err(NavError::Unavailable(service.to_string())),
        }
    }
}

#[async_trait]
impl ActionBackend for SimBackend {
    async fn is_server_ready(&self, action: &str) -> bool {
        self.lock()
            .actions
            .get(action)
            .is_some_and(|s| *s != ActionScript::Offline)
    }

    async fn send_goal(&self, action: &str, goal: Value) -> Result<GoalAcceptance, NavError> {
        let delay = self
            .lock()
            .goal_delays
            .get_mut(action)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let (feedback, result) = match state.actions.get(action).cloned() {
            None | Some(ActionScript::Offline) => {
                return Err(NavError::Unavailable(action.to_string()));
            }
            Some(ActionScript::Reject) => {
                state.calls.push(RecordedCall {
                    endpoint: action.to_string(),
                    request: goal,
                });
                return Ok(GoalAcceptance::Rejected);
            }
            Some(ActionScript::Accept { feedback, result }) => (feedback, result),
        };
        state.calls.push(RecordedCall {
            endpoint: action.to_string(),
            request: goal,
        });

        let goal_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        for item in feedback {
            let _ = tx.send(ActionUpdate::Feedback(item));
        }
        match result {
            Some(code) => {
                let _ = tx.send(ActionUpdate::Result(code));
            }
            None => {
                state.goals.insert(
                    goal_id,
                    OpenGoal {
                        action: action.to_string(),
                        updates: tx,
                    },
                );
            }
        }
        state.goal_order.push((action.to_string(), goal_id));

        let updates = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        })
        .boxed();
        Ok(GoalAcceptance::Accepted { goal_id, updates })
    }

    async fn cancel_goal(&self, action: &str, goal_id: Uuid) -> Result<(), NavError> {
        let mut state = self.lock();
        state.cancels.push(goal_id);
        let open = state
            .goals
            .get(&goal_id)
            .is_some_and(|g| g.action == action);
        if open {
            if let Some(goal) = state.goals.remove(&goal_id) {
                let _ = goal.updates.send(ActionUpdate::Result(ActionResultCode::Canceled));
            }
        }
        Ok(())
    }
}
