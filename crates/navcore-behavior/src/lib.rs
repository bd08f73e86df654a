//! `navcore-behavior` – autonomous behaviors and their arbitration.
//!
//! # Modules
//!
//! - [`auto_tracking`] – [`AutoTracking`]: switches autonomous target
//!   tracking on or off.
//! - [`stair_jumping`] – [`StairJumping`]: align with a stair, then jump it.
//! - [`mode_detector`] – [`ModeDetector`]: edge-triggered
//!   [`StageChange`]s from raw perception samples.
//! - [`manager`] – [`BehaviorManager`]: keeps exactly one behavior mode
//!   active and switches base tracking around transitions.

pub mod auto_tracking;
pub mod manager;
pub mod mode_detector;
pub mod stair_jumping;

pub use auto_tracking::AutoTracking;
pub use manager::{BehaviorManager, BehaviorSignal, ModeSwitch};
pub use mode_detector::{ModeDetector, Sample, StageChange};
pub use stair_jumping::{JumpingStatus, StairJumping};
