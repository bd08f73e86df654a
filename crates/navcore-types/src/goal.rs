//! Typed goals, one per algorithm family.
//!
//! Goals are immutable once handed to an executor.  Enumerated fields that
//! arrive from the wire as raw integers (tracking `relative_pos`) stay raw in
//! the goal and are converted with [`TryFrom`] when the executor validates
//! it, so an unknown value is rejected before any side effect.

use serde::{Deserialize, Serialize};

use crate::NavError;

/// Relocalization goal.  The run always ends by enabling realtime pose
/// reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizationGoal;

/// Laser mapping goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingGoal {
    /// Enable realtime pose reporting once mapping has started.
    pub report_pose: bool,
}

/// UWB target tracking goal, as received from the command interface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingGoal {
    /// Raw relative position; see [`RelativePosition`] for valid values.
    pub relative_pos: u8,
    /// Distance in metres to keep from the tracked target.
    pub keep_distance: f32,
}

/// Auto-tracking behavior goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTrackingGoal {
    pub enable: bool,
}

/// Stair-jump behavior goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StairJumpGoal;

/// Where the robot positions itself relative to the tracked target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelativePosition {
    Auto,
    Left,
    Right,
    Behind,
}

impl RelativePosition {
    /// Wire value of this position.
    pub const fn code(self) -> u8 {
        match self {
            RelativePosition::Auto => 0,
            RelativePosition::Left => 1,
            RelativePosition::Right => 2,
            RelativePosition::Behind => 3,
        }
    }
}

impl TryFrom<u8> for RelativePosition {
    type Error = NavError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(RelativePosition::Auto),
            1 => Ok(RelativePosition::Left),
            2 => Ok(RelativePosition::Right),
            3 => Ok(RelativePosition::Behind),
            other => Err(NavError::InvalidGoal(format!(
                "relative_pos {other} is not one of AUTO(0), LEFT(1), RIGHT(2), BEHIND(3)"
            ))),
        }
    }
}
