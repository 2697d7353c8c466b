/// Engine run-state machine.
///
/// `idle → starting → running → (restarting → running)* → stopping → idle`
///
/// Transitions are compare-and-set on one atomic so concurrent
/// `start`/`stop`/`restart` calls race safely: a second `start()` while
/// running is a no-op, as is `stop()` while idle.
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Restarting = 3,
    Stopping = 4,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Restarting,
            4 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
pub struct EngineState(AtomicU8);

impl EngineState {
    pub fn new() -> Self {
        Self(AtomicU8::new(RunState::Idle as u8))
    }

    pub fn current(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `idle → starting`. False when already started or starting.
    pub fn begin_start(&self) -> bool {
        self.transition(RunState::Idle, RunState::Starting)
    }

    /// `starting → running` and `restarting → running`.
    pub fn mark_running(&self) -> bool {
        self.transition(RunState::Starting, RunState::Running)
            || self.transition(RunState::Restarting, RunState::Running)
    }

    /// `running → restarting`.
    pub fn begin_restart(&self) -> bool {
        self.transition(RunState::Running, RunState::Restarting)
    }

    /// Any live state → `stopping`. False when already idle or stopping.
    pub fn begin_stop(&self) -> bool {
        self.transition(RunState::Running, RunState::Stopping)
            || self.transition(RunState::Starting, RunState::Stopping)
            || self.transition(RunState::Restarting, RunState::Stopping)
    }

    /// `stopping → idle`.
    pub fn finish_stop(&self) -> bool {
        self.transition(RunState::Stopping, RunState::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.current() == RunState::Running
    }

    /// True while the engine should keep its loops alive.
    pub fn should_run(&self) -> bool {
        matches!(
            self.current(),
            RunState::Starting | RunState::Running | RunState::Restarting
        )
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}
