use std::fmt;

/// Lifecycle state of an [`SqsPoller`](super::SqsPoller).
///
/// `Stopped → Starting → Polling → Draining → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Stopped,
    /// Configuration is being validated and the poll loop spawned.
    Starting,
    /// The poll loop is receiving and dispatching messages.
    Polling,
    /// A stop was requested; no new receives are issued while in-flight
    /// messages finish or the drain timeout expires.
    Draining,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Stopped => "stopped",
            RunState::Starting => "starting",
            RunState::Polling => "polling",
            RunState::Draining => "draining",
        };
        f.write_str(name)
    }
}
