use navcore_types::{LifecycleRequest, LifecycleState, LifecycleTransition, NavError};

/// What a request needs from the remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Issue this transition on `<node>/change_state`.
    Issue(LifecycleTransition),
    /// The node is already where the request would put it.
    AlreadyThere,
}

/// Decide how `request` is satisfied from `state`.
///
/// Requests are idempotent: asking for the state a node already holds (or
/// has already passed, for `Configure`) needs no transition.  A node is never
/// moved from `Unconfigured` straight to `Active`.
pub fn plan(
    node: &str,
    state: LifecycleState,
    request: LifecycleRequest,
) -> Result<Step, NavError> {
    use LifecycleRequest as R;
    use LifecycleState as S;

    match (state, request) {
        (S::Unconfigured, R::Configure) => Ok(Step::Issue(LifecycleTransition::Configure)),
        (S::Inactive | S::Active, R::Configure) => Ok(Step::AlreadyThere),

        (S::Inactive, R::Startup) => Ok(Step::Issue(LifecycleTransition::Activate)),
        (S::Active, R::Startup) => Ok(Step::AlreadyThere),
        (S::Unconfigured, R::Startup) => Err(NavError::InvalidTransition {
            node: node.to_string(),
            state,
            request,
        }),

        (S::Active, R::Pause) => Ok(Step::Issue(LifecycleTransition::Deactivate)),
        (S::Inactive | S::Unconfigured, R::Pause) => Ok(Step::AlreadyThere),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_is_idempotent() {
        assert_eq!(
            plan("cam", LifecycleState::Unconfigured, LifecycleRequest::Configure).unwrap(),
            Step::Issue(LifecycleTransition::Configure)
        );
        assert_eq!(
            plan("cam", LifecycleState::Inactive, LifecycleRequest::Configure).unwrap(),
            Step::AlreadyThere
        );
        assert_eq!(
            plan("cam", LifecycleState::Active, LifecycleRequest::Configure).unwrap(),
            Step::AlreadyThere
        );
    }

    #[test]
    fn startup_never_skips_configure() {
        let err = plan("cam", LifecycleState::Unconfigured, LifecycleRequest::Startup).unwrap_err();
        assert!(matches!(err, NavError::InvalidTransition { .. }));
    }

    #[test]
    fn pause_only_deactivates_active_nodes() {
        assert_eq!(
            plan("cam", LifecycleState::Active, LifecycleRequest::Pause).unwrap(),
            Step::Issue(LifecycleTransition::Deactivate)
        );
        assert_eq!(
            plan("cam", LifecycleState::Unconfigured, LifecycleRequest::Pause).unwrap(),
            Step::AlreadyThere
        );
    }
}
