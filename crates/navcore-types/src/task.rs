//! Progress, status and outcome types shared by executors and their owners.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Feedback
// ────────────────────────────────────────────────────────────────────────────

/// A progress code emitted by an executor during one run.
///
/// Codes come in causal pairs: a `*Starting`/`*Executing` code always
/// precedes the matching success or failure code of the same sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackCode {
    PreparationExecuting,
    PreparationSuccess,
    PreparationFailed,
    ServiceStarting,
    ServiceStartingSuccess,
    ServiceStartingError,
    /// The relocalization backend reported "retrying"; the run continues.
    SlamFailedContinueTrying,
    SlamTimeout,
    SlamError,
    SlamSuccess,
    ActionServerUnavailable,
    GoalRejected,
    /// Exception code streamed by the tracking action.
    TrackingException(i32),
    AlignStarting,
    AlignSuccess,
    AlignFailed,
    AlignTimeout,
    JumpStarting,
    JumpSuccess,
    JumpFailed,
    InvalidGoal,
    TaskSuccess,
    TaskAborted,
    TaskCanceled,
    StopExecuting,
    StopSuccess,
    StopFailed,
}

impl FeedbackCode {
    /// Stable upper-case label used in logs and telemetry.
    pub const fn label(self) -> &'static str {
        match self {
            FeedbackCode::PreparationExecuting => "PREPARATION_EXECUTING",
            FeedbackCode::PreparationSuccess => "PREPARATION_SUCCESS",
            FeedbackCode::PreparationFailed => "PREPARATION_FAILED",
            FeedbackCode::ServiceStarting => "SERVICE_STARTING",
            FeedbackCode::ServiceStartingSuccess => "SERVICE_STARTING_SUCCESS",
            FeedbackCode::ServiceStartingError => "SERVICE_STARTING_ERROR",
            FeedbackCode::SlamFailedContinueTrying => "SLAM_FAILED_CONTINUE_TRYING",
            FeedbackCode::SlamTimeout => "SLAM_TIMEOUT",
            FeedbackCode::SlamError => "SLAM_ERROR",
            FeedbackCode::SlamSuccess => "SLAM_SUCCESS",
            FeedbackCode::ActionServerUnavailable => "ACTION_SERVER_UNAVAILABLE",
            FeedbackCode::GoalRejected => "GOAL_REJECTED",
            FeedbackCode::TrackingException(_) => "TRACKING_EXCEPTION",
            FeedbackCode::AlignStarting => "ALIGN_STARTING",
            FeedbackCode::AlignSuccess => "ALIGN_SUCCESS",
            FeedbackCode::AlignFailed => "ALIGN_FAILED",
            FeedbackCode::AlignTimeout => "ALIGN_TIMEOUT",
            FeedbackCode::JumpStarting => "JUMP_STARTING",
            FeedbackCode::JumpSuccess => "JUMP_SUCCESS",
            FeedbackCode::JumpFailed => "JUMP_FAILED",
            FeedbackCode::InvalidGoal => "INVALID_GOAL",
            FeedbackCode::TaskSuccess => "TASK_SUCCESS",
            FeedbackCode::TaskAborted => "TASK_ABORTED",
            FeedbackCode::TaskCanceled => "TASK_CANCELED",
            FeedbackCode::StopExecuting => "STOP_EXECUTING",
            FeedbackCode::StopSuccess => "STOP_SUCCESS",
            FeedbackCode::StopFailed => "STOP_FAILED",
        }
    }
}

impl fmt::Display for FeedbackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackCode::TrackingException(code) => write!(f, "{}({code})", self.label()),
            other => f.write_str(other.label()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status and outcome
// ────────────────────────────────────────────────────────────────────────────

/// Coarse run state of one executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorStatus {
    #[default]
    Unknown,
    Preparing,
    Running,
    Success,
    Failure,
    Canceled,
}

/// Terminal result of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskResult {
    Success,
    Aborted,
    Canceled,
    /// Deadline exceeded while waiting for completion.
    Failed,
}

impl TaskResult {
    /// Executor status that a run ending with this result leaves behind.
    pub const fn status(self) -> ExecutorStatus {
        match self {
            TaskResult::Success => ExecutorStatus::Success,
            TaskResult::Canceled => ExecutorStatus::Canceled,
            TaskResult::Aborted | TaskResult::Failed => ExecutorStatus::Failure,
        }
    }
}

/// A terminal result paired with the final feedback code of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub result: TaskResult,
    pub feedback: FeedbackCode,
}

/// Response of a synchronous stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopResult {
    Success,
    Failed,
}

/// Envelope for everything an executor reports upward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Executor name, e.g. `"laser_localization"`.
    pub executor: String,
    /// Run that produced the event; `None` for stop requests outside a run.
    pub run_id: Option<Uuid>,
    pub kind: ExecutorEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorEventKind {
    Feedback(FeedbackCode),
    Finished(TaskOutcome),
}

// ────────────────────────────────────────────────────────────────────────────
// Behavior modes
// ────────────────────────────────────────────────────────────────────────────

/// The single high-level behavior the robot is currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviorMode {
    #[default]
    NormTracking,
    AutoTracking,
    StairJumping,
    /// Sticky error state; left only through external recovery.
    Abnorm,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_maps_to_status() {
        assert_eq!(TaskResult::Success.status(), ExecutorStatus::Success);
        assert_eq!(TaskResult::Aborted.status(), ExecutorStatus::Failure);
        assert_eq!(TaskResult::Failed.status(), ExecutorStatus::Failure);
        assert_eq!(TaskResult::Canceled.status(), ExecutorStatus::Canceled);
    }

    #[test]
    fn feedback_display_includes_exception_code() {
        assert_eq!(FeedbackCode::SlamTimeout.to_string(), "SLAM_TIMEOUT");
        assert_eq!(
            FeedbackCode::TrackingException(3012).to_string(),
            "TRACKING_EXCEPTION(3012)"
        );
    }

    #[test]
    fn executor_event_serializes() {
        let event = ExecutorEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            executor: "laser_localization".into(),
            run_id: Some(Uuid::new_v4()),
            kind: ExecutorEventKind::Finished(TaskOutcome {
                result: TaskResult::Failed,
                feedback: FeedbackCode::SlamTimeout,
            }),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ExecutorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, event.kind);
        assert_eq!(back.run_id, event.run_id);
    }

    #[test]
    fn default_behavior_mode_is_norm_tracking() {
        assert_eq!(BehaviorMode::default(), BehaviorMode::NormTracking);
    }
}
