//! Transport seams.
//!
//! The navigation core never speaks a wire protocol itself.  A backend
//! receives already-encoded JSON payloads addressed by endpoint name and is
//! responsible for delivering them to the remote subsystem.
//!
//! # Contract
//!
//! * `call` – one request, one response.  Returning `Err` means the request
//!   could not be delivered; an endpoint that answered negatively returns
//!   `Ok` with its negative payload.
//! * `send_goal` – resolves once the action server has accepted or rejected
//!   the goal.  An accepted goal carries a stream of [`ActionUpdate`]s that
//!   ends with exactly one [`ActionUpdate::Result`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use navcore_types::{ActionResultCode, NavError};
use serde_json::Value;
use uuid::Uuid;

/// Request/response transport.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Whether a server for `service` is currently reachable.
    async fn is_available(&self, service: &str) -> bool;

    /// Deliver `request` to `service` and wait for its response.
    async fn call(&self, service: &str, request: Value) -> Result<Value, NavError>;
}

/// One message on an accepted goal's update stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionUpdate {
    Feedback(Value),
    Result(ActionResultCode),
}

/// Answer of an action server to a new goal.
pub enum GoalAcceptance {
    Rejected,
    Accepted {
        goal_id: Uuid,
        updates: BoxStream<'static, ActionUpdate>,
    },
}

/// Long-running goal transport.
#[async_trait]
pub trait ActionBackend: Send + Sync {
    /// Whether the server for `action` is currently reachable.
    async fn is_server_ready(&self, action: &str) -> bool;

    /// Submit `goal` to `action`.
    async fn send_goal(&self, action: &str, goal: Value) -> Result<GoalAcceptance, NavError>;

    /// Ask the server to cancel an accepted goal.  The terminal
    /// [`ActionUpdate::Result`] still arrives on the goal's stream.
    async fn cancel_goal(&self, action: &str, goal_id: Uuid) -> Result<(), NavError>;
}
