//! Dependency bring-up and roll-back through the lifecycle node manager.

use navcore_lifecycle::{LifecycleNodeManager, TransitionOutcome};
use navcore_types::NavError;
use tracing::{info, warn};

/// Configure then start up each node in order, stopping at the first
/// failure.
///
/// Only nodes whose startup this call actually issued are pushed onto
/// `brought_up`; a node some other executor already activated is not ours to
/// pause later.
///
/// A transition in flight always runs to completion.  `stop_requested` is
/// checked before each one and ends the bring-up with [`NavError::Canceled`].
pub async fn bring_up(
    lifecycle: &LifecycleNodeManager,
    nodes: &[String],
    brought_up: &mut Vec<String>,
    stop_requested: impl Fn() -> bool,
) -> Result<(), NavError> {
    for node in nodes {
        if stop_requested() {
            return Err(NavError::Canceled);
        }
        lifecycle.configure(node).await?;
        if stop_requested() {
            return Err(NavError::Canceled);
        }
        if lifecycle.startup(node).await? == TransitionOutcome::Transitioned {
            brought_up.push(node.clone());
        }
    }
    Ok(())
}

/// Pause `nodes` newest first.  Every node is attempted; the first failure
/// is returned.
pub async fn pause_all(lifecycle: &LifecycleNodeManager, nodes: &[String]) -> Result<(), NavError> {
    let mut first_error = None;
    for node in nodes.iter().rev() {
        if let Err(e) = lifecycle.pause(node).await {
            warn!(node = %node, error = %e, "pause failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Best-effort [`pause_all`] for failure paths; errors are logged only.
pub async fn roll_back(lifecycle: &LifecycleNodeManager, nodes: &[String]) {
    if nodes.is_empty() {
        return;
    }
    info!(nodes = ?nodes, "rolling back dependencies");
    if let Err(e) = pause_all(lifecycle, nodes).await {
        warn!(error = %e, "rollback incomplete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcore_middleware::{ServiceScript, SimBackend};
    use navcore_types::LifecycleState;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn nodes() -> Vec<String> {
        vec!["camera/camera".into(), "localization_node".into()]
    }

    fn manager(sim: &Arc<SimBackend>) -> LifecycleNodeManager {
        LifecycleNodeManager::new(
            sim.clone(),
            nodes(),
            Duration::from_secs(5),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn stops_at_first_failure_and_reports_partial_progress() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node("camera/camera");
        sim.script_service(
            "localization_node/change_state",
            ServiceScript::Respond(json!({"success": false})),
        );
        let lifecycle = manager(&sim);

        let mut brought_up = Vec::new();
        let err = bring_up(&lifecycle, &nodes(), &mut brought_up, || false).await.unwrap_err();
        assert!(matches!(err, NavError::TransitionDeclined { .. }));
        assert_eq!(brought_up, vec!["camera/camera"]);

        roll_back(&lifecycle, &brought_up).await;
        assert_eq!(
            lifecycle.state("camera/camera").await.unwrap(),
            LifecycleState::Inactive
        );
        assert!(sim.calls_to("localization_node/change_state").len() == 1);
    }

    #[tokio::test]
    async fn already_active_nodes_are_not_claimed() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node("camera/camera");
        sim.serve_lifecycle_node("localization_node");
        let lifecycle = manager(&sim);
        lifecycle.configure("camera/camera").await.unwrap();
        lifecycle.startup("camera/camera").await.unwrap();

        let mut brought_up = Vec::new();
        bring_up(&lifecycle, &nodes(), &mut brought_up, || false).await.unwrap();
        assert_eq!(brought_up, vec!["localization_node"]);
    }

    #[tokio::test]
    async fn pause_all_attempts_every_node() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node("camera/camera");
        sim.serve_lifecycle_node("localization_node");
        let lifecycle = manager(&sim);
        let mut brought_up = Vec::new();
        bring_up(&lifecycle, &nodes(), &mut brought_up, || false).await.unwrap();

        sim.script_service("localization_node/change_state", ServiceScript::Fail("down".into()));
        assert!(pause_all(&lifecycle, &brought_up).await.is_err());
        assert_eq!(
            lifecycle.state("camera/camera").await.unwrap(),
            LifecycleState::Inactive
        );
    }

    #[tokio::test]
    async fn stop_request_ends_bring_up_between_transitions() {
        let sim = Arc::new(SimBackend::new());
        sim.serve_lifecycle_node("camera/camera");
        sim.serve_lifecycle_node("localization_node");
        let lifecycle = manager(&sim);

        let mut brought_up = Vec::new();
        let err = bring_up(&lifecycle, &nodes(), &mut brought_up, || {
            sim.calls_to("camera/camera/change_state").len() == 2
        })
        .await
        .unwrap_err();
        assert_eq!(err, NavError::Canceled);
        assert_eq!(brought_up, vec!["camera/camera"]);
        assert!(sim.calls_to("localization_node/change_state").is_empty());
    }
}
