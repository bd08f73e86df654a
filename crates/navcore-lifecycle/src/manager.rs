//! [`LifecycleNodeManager`] – the one shared owner of lifecycle node state.
//!
//! Each node sits behind its own async mutex.  Tokio's mutex is fair, so
//! concurrent requests for the same node queue in arrival order and each
//! observes the state left by the previous one; requests for different nodes
//! never contend.  The node table is fixed at construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use navcore_middleware::{ServiceBackend, ServiceClient};
use navcore_types::{
    ChangeStateRequest, ChangeStateResponse, LifecycleRequest, LifecycleState,
    LifecycleTransition, NavError,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::node::{Step, plan};

/// Result of a successful lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// A transition was issued and accepted by the node.
    Transitioned,
    /// The node already satisfied the request; nothing was sent.
    AlreadyInState,
}

struct NodeEntry {
    state: LifecycleState,
    client: ServiceClient<ChangeStateRequest, ChangeStateResponse>,
}

pub struct LifecycleNodeManager {
    nodes: HashMap<String, Arc<Mutex<NodeEntry>>>,
    order: Vec<String>,
    transition_timeout: Duration,
}

impl LifecycleNodeManager {
    /// Build the manager for `nodes`, all starting `Unconfigured`.
    ///
    /// `connect_timeout` bounds the wait for a node's `change_state` endpoint,
    /// `transition_timeout` bounds each transition call.
    pub fn new<I, S>(
        backend: Arc<dyn ServiceBackend>,
        nodes: I,
        connect_timeout: Duration,
        transition_timeout: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = HashMap::new();
        let mut order = Vec::new();
        for name in nodes {
            let name = name.into();
            if table.contains_key(&name) {
                continue;
            }
            let client =
                ServiceClient::new(backend.clone(), format!("{name}/change_state"), connect_timeout);
            table.insert(
                name.clone(),
                Arc::new(Mutex::new(NodeEntry {
                    state: LifecycleState::Unconfigured,
                    client,
                })),
            );
            order.push(name);
        }
        Self {
            nodes: table,
            order,
            transition_timeout,
        }
    }

    /// Managed node names in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Last known state of `name`.  Waits for any in-flight transition on
    /// that node to settle.
    pub async fn state(&self, name: &str) -> Result<LifecycleState, NavError> {
        Ok(self.entry(name)?.lock().await.state)
    }

    /// `Unconfigured -> Inactive`.
    pub async fn configure(&self, name: &str) -> Result<TransitionOutcome, NavError> {
        self.apply(name, LifecycleRequest::Configure).await
    }

    /// `Inactive -> Active`.
    pub async fn startup(&self, name: &str) -> Result<TransitionOutcome, NavError> {
        self.apply(name, LifecycleRequest::Startup).await
    }

    /// `Active -> Inactive`.
    pub async fn pause(&self, name: &str) -> Result<TransitionOutcome, NavError> {
        self.apply(name, LifecycleRequest::Pause).await
    }

    fn entry(&self, name: &str) -> Result<&Arc<Mutex<NodeEntry>>, NavError> {
        self.nodes
            .get(name)
            .ok_or_else(|| NavError::UnknownNode(name.to_string()))
    }

    #[instrument(skip(self), fields(node = %name))]
    async fn apply(
        &self,
        name: &str,
        request: LifecycleRequest,
    ) -> Result<TransitionOutcome, NavError> {
        let mut entry = self.entry(name)?.lock().await;

        let transition = match plan(name, entry.state, request)? {
            Step::AlreadyThere => {
                debug!(state = entry.state.label(), "node already satisfies request");
                return Ok(TransitionOutcome::AlreadyInState);
            }
            Step::Issue(transition) => transition,
        };

        let response = entry
            .client
            .invoke(&ChangeStateRequest::from(transition), self.transition_timeout)
            .await
            .inspect_err(|e| {
                warn!(transition = transition.label(), error = %e, "lifecycle transition failed");
            })?;

        if !response.success {
            warn!(transition = transition.label(), "lifecycle transition declined");
            return Err(declined(name, transition));
        }

        entry.state = transition.goal_state();
        info!(
            transition = transition.label(),
            state = entry.state.label(),
            "lifecycle transition complete"
        );
        Ok(TransitionOutcome::Transitioned)
    }
}

fn declined(node: &str, transition: LifecycleTransition) -> NavError {
    NavError::TransitionDeclined {
        node: node.to_string(),
        transition: transition.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcore_middleware::{ServiceScript, SimBackend};
    use serde_json::json;

    const CAMERA: &str = "camera/camera";
    const LOCALIZATION: &str = "localization_node";

    fn manager(sim: &Arc<SimBackend>) -> LifecycleNodeManager {
        LifecycleNodeManager::new(
            sim.clone(),
            [CAMERA, LOCALIZATION],
            Duration::from_secs(5),
            Duration::from_secs(10),
        )
    }

    fn transition_ids(sim: &SimBackend, node: &str) -> Vec<u64> {
        sim.calls_to(&format!("{node}/change_state"))
            .iter()
            .filter_map(|req| req["transition"]["id"].as_u64())
            .collect()
    }

    #[tokio::test]
    async fn configure_then_startup_then_pause() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node(CAMERA);
        let mgr = manager(&sim);

        assert_eq!(mgr.configure(CAMERA).await.unwrap(), TransitionOutcome::Transitioned);
        assert_eq!(mgr.startup(CAMERA).await.unwrap(), TransitionOutcome::Transitioned);
        assert_eq!(mgr.state(CAMERA).await.unwrap(), LifecycleState::Active);
        assert_eq!(mgr.pause(CAMERA).await.unwrap(), TransitionOutcome::Transitioned);
        assert_eq!(mgr.state(CAMERA).await.unwrap(), LifecycleState::Inactive);

        assert_eq!(transition_ids(&sim, CAMERA), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn repeated_requests_do_not_reissue_transitions() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node(CAMERA);
        let mgr = manager(&sim);

        mgr.configure(CAMERA).await.unwrap();
        assert_eq!(mgr.configure(CAMERA).await.unwrap(), TransitionOutcome::AlreadyInState);
        mgr.startup(CAMERA).await.unwrap();
        assert_eq!(mgr.startup(CAMERA).await.unwrap(), TransitionOutcome::AlreadyInState);

        assert_eq!(transition_ids(&sim, CAMERA), vec![1, 3]);
    }

    #[tokio::test]
    async fn startup_from_unconfigured_is_refused_without_a_call() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node(CAMERA);
        let mgr = manager(&sim);

        let err = mgr.startup(CAMERA).await.unwrap_err();
        assert!(matches!(err, NavError::InvalidTransition { .. }));
        assert!(sim.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_node_is_an_error() {
        let sim = Arc::new(SimBackend::new());
        let mgr = manager(&sim);
        assert_eq!(
            mgr.configure("lidar").await.unwrap_err(),
            NavError::UnknownNode("lidar".into())
        );
    }

    #[tokio::test]
    async fn declined_transition_leaves_state_unchanged() {
        let sim = Arc::new(SimBackend::new());
        sim.script_service(
            &format!("{CAMERA}/change_state"),
            ServiceScript::Respond(json!({"success": false})),
        );
        let mgr = manager(&sim);

        let err = mgr.configure(CAMERA).await.unwrap_err();
        assert_eq!(
            err,
            NavError::TransitionDeclined {
                node: CAMERA.into(),
                transition: "configure".into()
            }
        );
        assert_eq!(mgr.state(CAMERA).await.unwrap(), LifecycleState::Unconfigured);
        // No internal retry.
        assert_eq!(transition_ids(&sim, CAMERA), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_node_requests_queue() {
        let sim = Arc::new(SimBackend::new());
        sim.script_service(
            &format!("{CAMERA}/change_state"),
            ServiceScript::Delayed(Duration::from_secs(1), json!({"success": true})),
        );
        let mgr = manager(&sim);

        let (first, second) = tokio::join!(mgr.configure(CAMERA), mgr.configure(CAMERA));
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| *o == TransitionOutcome::AlreadyInState);
        assert_eq!(
            outcomes,
            vec![TransitionOutcome::Transitioned, TransitionOutcome::AlreadyInState]
        );
        assert_eq!(transition_ids(&sim, CAMERA), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn different_nodes_do_not_block_each_other() {
        let sim = Arc::new(SimBackend::new());
        sim.script_service(&format!("{CAMERA}/change_state"), ServiceScript::Hang);
        sim.serve_lifecycle_node(LOCALIZATION);
        let mgr = manager(&sim);

        let started = tokio::time::Instant::now();
        let (slow, fast) = tokio::join!(mgr.configure(CAMERA), async {
            let outcome = mgr.configure(LOCALIZATION).await;
            (outcome, started.elapsed())
        });

        assert!(matches!(slow.unwrap_err(), NavError::Timeout { .. }));
        assert_eq!(fast.0.unwrap(), TransitionOutcome::Transitioned);
        assert!(fast.1 < Duration::from_secs(1));
    }
}
