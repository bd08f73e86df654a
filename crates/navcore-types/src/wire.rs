//! Payloads exchanged with remote services and actions.
//!
//! Shapes mirror the ROS messages the robot's subsystems speak
//! (`std_srvs/SetBool`, `std_srvs/Trigger`, `lifecycle_msgs/ChangeState`,
//! the target-tracking action), encoded as JSON at the transport seam.

use serde::{Deserialize, Serialize};

use crate::goal::RelativePosition;
use crate::lifecycle::LifecycleTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBoolRequest {
    pub data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBoolResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {}

/// `std_srvs/Trigger` answers with the same fields as `SetBool`.
pub type TriggerResponse = SetBoolResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDescriptor {
    pub id: u8,
    pub label: String,
}

/// Request sent to `<node>/change_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStateRequest {
    pub transition: TransitionDescriptor,
}

impl From<LifecycleTransition> for ChangeStateRequest {
    fn from(transition: LifecycleTransition) -> Self {
        Self {
            transition: TransitionDescriptor {
                id: transition.id(),
                label: transition.label().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStateResponse {
    pub success: bool,
}

/// Goal sent to the `tracking_target` action server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetTrackingGoal {
    pub relative_pos: RelativePosition,
    pub keep_distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTrackingFeedback {
    pub exception_code: i32,
}

/// Terminal result code of an action goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionResultCode {
    Succeeded,
    Aborted,
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_state_request_carries_ros_transition_id() {
        let req = ChangeStateRequest::from(LifecycleTransition::Activate);
        assert_eq!(req.transition.id, 3);
        assert_eq!(req.transition.label, "activate");
    }

    #[test]
    fn set_bool_response_message_is_optional() {
        let resp: SetBoolResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(resp.success);
        assert!(resp.message.is_empty());
    }
}
