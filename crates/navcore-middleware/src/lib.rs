//! `navcore-middleware` – remote-call plumbing.
//!
//! Executors never talk to a transport directly.  They hold typed,
//! timeout-bound proxies that delegate to a backend implementing one of the
//! transport seams below.
//!
//! # Modules
//!
//! - [`backend`] – the [`ServiceBackend`] and [`ActionBackend`] traits every
//!   transport (ROS bridge, simulator, test double) implements.
//! - [`service`] – [`ServiceClient`]: request/response calls with a connect
//!   timeout and a per-call timeout.
//! - [`action`] – [`ActionClient`]: long-running goals with accept/reject,
//!   streamed feedback and exactly one terminal result.
//! - [`sim`] – [`SimBackend`]: a scriptable in-process backend for tests and
//!   dry runs.

pub mod action;
pub mod backend;
pub mod service;
pub mod sim;

pub use action::{ActionClient, ActionState, GoalEvent, GoalHandle};
pub use backend::{ActionBackend, ActionUpdate, GoalAcceptance, ServiceBackend};
pub use service::ServiceClient;
pub use sim::{ActionScript, RecordedCall, ServiceScript, SimBackend};
