//! `navcore-lifecycle` – activation state of dependent subsystems.
//!
//! Every executor brings its dependencies (depth camera, localization node,
//! navigation stack, ...) up through one shared [`LifecycleNodeManager`].
//! The manager is constructed once with the full set of node names and is
//! handed to executors as an `Arc`; it is never cloned.
//!
//! # Modules
//!
//! - [`node`] – pure planner deciding which remote transition, if any, a
//!   request needs from a given state.
//! - [`manager`] – [`LifecycleNodeManager`]: idempotent `configure`,
//!   `startup` and `pause`, serialised per node name.

pub mod manager;
pub mod node;

pub use manager::{LifecycleNodeManager, TransitionOutcome};
pub use node::{Step, plan};
