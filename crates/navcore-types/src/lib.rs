//! `navcore-types` – shared vocabulary of the navigation task core.
//!
//! Every other crate in the workspace speaks in these types: the goals an
//! executor accepts, the feedback codes it streams upward, the terminal
//! [`TaskOutcome`] it reports, the lifecycle states of dependent subsystems
//! and the wire payloads exchanged with remote services and actions.
//!
//! # Modules
//!
//! - [`goal`] – typed goals per algorithm family plus the validated
//!   [`RelativePosition`][goal::RelativePosition] enumeration.
//! - [`task`] – feedback codes, executor status, task results and the
//!   [`ExecutorEvent`][task::ExecutorEvent] envelope.
//! - [`lifecycle`] – lifecycle node states and the transitions requested on
//!   the remote node.
//! - [`wire`] – request/response payloads for service and action calls.

pub mod goal;
pub mod lifecycle;
pub mod task;
pub mod wire;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use goal::{
    AutoTrackingGoal, LocalizationGoal, MappingGoal, RelativePosition, StairJumpGoal,
    TrackingGoal,
};
pub use lifecycle::{LifecycleRequest, LifecycleState, LifecycleTransition};
pub use task::{
    BehaviorMode, ExecutorEvent, ExecutorEventKind, ExecutorStatus, FeedbackCode, StopResult,
    TaskOutcome, TaskResult,
};
pub use wire::{
    ActionResultCode, ChangeStateRequest, ChangeStateResponse, SetBoolRequest, SetBoolResponse,
    TargetTrackingFeedback, TargetTrackingGoal, TransitionDescriptor, TriggerRequest,
    TriggerResponse,
};

/// Error type shared by every layer of the navigation core.
///
/// Remote-call failures are split so callers can tell "could not reach the
/// endpoint" ([`NavError::Unavailable`], [`NavError::Timeout`],
/// [`NavError::Transport`]) apart from "the endpoint answered no"
/// ([`NavError::Declined`], [`NavError::GoalRejected`]).
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    #[error("Unknown lifecycle node: {0}")]
    UnknownNode(String),

    #[error("Invalid lifecycle request {request:?} on node {node} in state {state:?}")]
    InvalidTransition {
        node: String,
        state: LifecycleState,
        request: LifecycleRequest,
    },

    #[error("Lifecycle transition {transition} declined by node {node}")]
    TransitionDeclined { node: String, transition: String },

    #[error("Endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("Call to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Transport failure on {endpoint}: {details}")]
    Transport { endpoint: String, details: String },

    #[error("Request declined by {endpoint}: {message}")]
    Declined { endpoint: String, message: String },

    #[error("Goal rejected by action server {0}")]
    GoalRejected(String),

    #[error("Invalid goal: {0}")]
    InvalidGoal(String),

    #[error("Executor {0} is already running a goal")]
    Busy(String),

    #[error("Interrupted by cancellation")]
    Canceled,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NavError {
    /// `true` when the endpoint could not be reached at all, as opposed to
    /// having answered negatively.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            NavError::Unavailable(_) | NavError::Timeout { .. } | NavError::Transport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_vs_declined() {
        assert!(NavError::Unavailable("start_location".into()).is_unreachable());
        assert!(
            NavError::Timeout {
                endpoint: "start_location".into(),
                timeout_ms: 50_000
            }
            .is_unreachable()
        );
        assert!(
            !NavError::Declined {
                endpoint: "start_location".into(),
                message: "busy".into()
            }
            .is_unreachable()
        );
        assert!(!NavError::GoalRejected("tracking_target".into()).is_unreachable());
    }

    #[test]
    fn nav_error_display() {
        let err = NavError::Timeout {
            endpoint: "tracking_command".into(),
            timeout_ms: 2000,
        };
        assert!(err.to_string().contains("tracking_command"));
        assert!(err.to_string().contains("2000"));

        let err = NavError::InvalidTransition {
            node: "camera/camera".into(),
            state: LifecycleState::Unconfigured,
            request: LifecycleRequest::Startup,
        };
        assert!(err.to_string().contains("camera/camera"));
    }
}
