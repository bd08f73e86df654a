/// Stable lifecycle states of a dependent subsystem.
///
/// A node only ever moves one step at a time:
/// `Unconfigured -> Inactive -> Active` and back `Active -> Inactive`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LifecycleState {
    #[default]
    Unconfigured,
    Inactive,
    Active,
}

impl LifecycleState {
    pub const fn label(self) -> &'static str {
        match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Inactive => "inactive",
            LifecycleState::Active => "active",
        }
    }
}

/// Idempotent operations the lifecycle node manager exposes to executors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LifecycleRequest {
    /// Unconfigured -> Inactive.
    Configure,
    /// Inactive -> Active.
    Startup,
    /// Active -> Inactive.
    Pause,
}

/// Transition actually issued to the remote node.
///
/// `id()` returns the `lifecycle_msgs/msg/Transition` id the remote side
/// expects.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LifecycleTransition {
    Configure,
    Activate,
    Deactivate,
}

impl LifecycleTransition {
    pub const fn id(self) -> u8 {
        match self {
            LifecycleTransition::Configure => 1,
            LifecycleTransition::Activate => 3,
            LifecycleTransition::Deactivate => 4,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            LifecycleTransition::Configure => "configure",
            LifecycleTransition::Activate => "activate",
            LifecycleTransition::Deactivate => "deactivate",
        }
    }

    /// State reached when the remote node accepts the transition.
    pub const fn goal_state(self) -> LifecycleState {
        match self {
            LifecycleTransition::Configure => LifecycleState::Inactive,
            LifecycleTransition::Activate => LifecycleState::Active,
            LifecycleTransition::Deactivate => LifecycleState::Inactive,
        }
    }
}
