//! Pod lifecycle states.
//!
//! ```text
//! Unloaded -> Loaded -> Initialized -> Created -> Running <-> Paused
//!                                         \          |          /
//!                                          `----> Stopped <----'
//! ```
//!
//! The plugin adapter forwards calls without consulting this machine; it is
//! here for backends that want to reject out-of-order calls.

use serde::{Deserialize, Serialize};

use super::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodState {
    Unloaded,
    Loaded,
    Initialized,
    Created,
    Running,
    Paused,
    Stopped,
}

impl PodState {
    /// State reached by applying `op`, or `None` if `op` is not legal here.
    ///
    /// Operations that are not transitions (`WaitPod`, device calls and the
    /// queries) return the current state when they are legal.
    pub fn next(self, op: Operation) -> Option<PodState> {
        use Operation::*;
        use PodState::*;

        match (self, op) {
            (Unloaded | Loaded, Init) => Some(Initialized),
            (Initialized, CreatePod) => Some(Created),
            (Created, StartPod) => Some(Running),
            (Running, PausePod) => Some(Paused),
            (Paused, ResumePod) => Some(Running),
            (Created | Running | Paused, StopPod) => Some(Stopped),

            (Initialized | Created, AddDevice) => Some(self),
            (Running | Paused, HotplugAddDevice | HotplugRemoveDevice) => Some(self),
            (Created | Running | Paused | Stopped, WaitPod) => Some(self),
            (_, GetPodConsole | Capabilities) => Some(self),

            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == PodState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            Operation::Init,
            Operation::CreatePod,
            Operation::StartPod,
            Operation::PausePod,
            Operation::ResumePod,
            Operation::StopPod,
        ];
        let end = path
            .iter()
            .try_fold(PodState::Unloaded, |state, op| state.next(*op));
        assert_eq!(end, Some(PodState::Stopped));
    }

    #[test]
    fn test_double_pause_rejected() {
        assert_eq!(PodState::Paused.next(Operation::PausePod), None);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let stopped = PodState::Stopped;
        assert!(stopped.is_terminal());
        assert_eq!(stopped.next(Operation::StartPod), None);
        assert_eq!(stopped.next(Operation::StopPod), None);
        assert_eq!(stopped.next(Operation::WaitPod), Some(stopped));
        assert_eq!(stopped.next(Operation::Capabilities), Some(stopped));
    }

    #[test]
    fn test_hotplug_requires_running_or_paused() {
        assert_eq!(PodState::Created.next(Operation::HotplugAddDevice), None);
        assert_eq!(
            PodState::Running.next(Operation::HotplugRemoveDevice),
            Some(PodState::Running)
        );
    }
}
