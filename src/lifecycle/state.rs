use std::fmt;

use serde::Serialize;

/// Lifecycle of the interception engine's execution context.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`, with `Retrying`
/// entered from `Starting` when an attempt exits too quickly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Retrying,
    Running,
    Stopping,
}

impl LifecycleState {
    /// An execution context exists and has not begun unwinding.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Retrying | LifecycleState::Running
        )
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Stopped
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Retrying => "retrying",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(!LifecycleState::Stopped.is_active());
        assert!(LifecycleState::Starting.is_active());
        assert!(LifecycleState::Retrying.is_active());
        assert!(LifecycleState::Running.is_active());
        assert!(!LifecycleState::Stopping.is_active());
        assert_eq!(LifecycleState::default(), LifecycleState::Stopped);
    }
}
