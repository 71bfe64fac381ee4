use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// New work is refused; in-flight operations finish.
    Draining,
    /// The transport was torn down.
    Stopped,
}

#[derive(Debug)]
struct OpsState {
    phase: ShutdownPhase,
    current_ops: usize,
}

/// Counts in-flight operations and lets shutdown wait for them.
///
/// The phase only moves forward. Once draining, [`ShutdownCoordinator::begin_op`]
/// refuses new operations and the last finishing operation fires the readiness
/// signal.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    state: Mutex<OpsState>,
    ready: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OpsState {
                phase: ShutdownPhase::Running,
                current_ops: 0,
            }),
            ready: watch::Sender::new(false),
        }
    }

    /// Start an operation. Returns `None` once shutdown has begun.
    pub fn begin_op(self: &Arc<Self>) -> Option<OpGuard> {
        let mut state = self.state.lock();
        if state.phase != ShutdownPhase::Running {
            return None;
        }
        state.current_ops += 1;
        Some(OpGuard {
            coordinator: Arc::clone(self),
        })
    }

    fn end_op(&self) {
        let mut state = self.state.lock();
        state.current_ops = state.current_ops.saturating_sub(1);
        if state.phase != ShutdownPhase::Running && state.current_ops == 0 {
            self.ready.send_replace(true);
        }
    }

    /// Refuse new operations and wait for in-flight ones to finish.
    ///
    /// Returns immediately when nothing is in flight. Safe to call repeatedly.
    pub async fn drain(&self) {
        let mut ready = {
            let mut state = self.state.lock();
            if state.phase == ShutdownPhase::Running {
                state.phase = ShutdownPhase::Draining;
            }
            if state.current_ops == 0 {
                self.ready.send_replace(true);
                return;
            }
            debug!(current_ops = state.current_ops, "Waiting for operations to finish");
            self.ready.subscribe()
        };

        // The sender lives in `self`, so the channel cannot close while waiting
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn mark_stopped(&self) {
        self.state.lock().phase = ShutdownPhase::Stopped;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().phase != ShutdownPhase::Running
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.state.lock().phase
    }

    pub fn current_ops(&self) -> usize {
        self.state.lock().current_ops
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-flight operation. Dropping it ends the operation, also when the
/// operation fails or unwinds.
#[derive(Debug)]
pub struct OpGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.coordinator.end_op();
    }
}
