/// One forked child within a job: its pid, the command that launched it, and
/// the run state last reported by the reaping handler.
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;

/// How a terminated process went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Exited normally with the given status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Exited(0) => write!(f, "Done"),
            Disposition::Exited(code) => write!(f, "Exit {code}"),
            Disposition::Signaled(sig) => write!(f, "Killed ({})", sig.as_str()),
        }
    }
}

/// Run state of a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
    Terminated(Disposition),
}

impl ProcessState {
    pub fn is_terminated(self) -> bool {
        matches!(self, ProcessState::Terminated(_))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Running => write!(f, "Running"),
            ProcessState::Stopped => write!(f, "Stopped"),
            ProcessState::Terminated(_) => write!(f, "Terminated"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pid: Pid,
    argv: Vec<String>,
    state: ProcessState,
}

impl Process {
    /// A freshly forked child. Every process starts out `Running`.
    pub fn new(pid: Pid, argv: Vec<String>) -> Self {
        Self {
            pid,
            argv,
            state: ProcessState::Running,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The argument vector joined back into a single display string.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }
}
