/// A job is one pipeline invocation: a numbered process group whose members
/// are the pipeline's stages in order.
use crate::process::{Disposition, Process, ProcessState};
use nix::unistd::Pid;
use std::fmt;

/// Aggregate state of a job as seen by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Foreground,
    Background,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Foreground => write!(f, "Foreground"),
            JobState::Background => write!(f, "Background"),
            JobState::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug)]
pub struct Job {
    num: usize,
    state: JobState,
    text: String,
    processes: Vec<Process>,
}

impl Job {
    pub(crate) fn new(num: usize, state: JobState, text: impl Into<String>) -> Self {
        Self {
            num,
            state,
            text: text.into(),
            processes: Vec::new(),
        }
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: JobState) {
        self.state = state;
    }

    /// The command line this job was created from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The process group shared by every stage. The first forked stage is
    /// the group leader, so this is `None` until that stage is recorded.
    pub fn pgid(&self) -> Option<Pid> {
        self.processes.first().map(Process::pid)
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(Process::pid).collect()
    }

    pub fn contains_process(&self, pid: Pid) -> bool {
        self.processes.iter().any(|p| p.pid() == pid)
    }

    pub(crate) fn push_process(&mut self, process: Process) {
        self.processes.push(process);
    }

    pub(crate) fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid() == pid)
    }

    pub(crate) fn processes_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.iter_mut()
    }

    /// True once the job has members and all of them have terminated.
    pub fn is_complete(&self) -> bool {
        !self.processes.is_empty() && self.processes.iter().all(|p| p.state().is_terminated())
    }

    /// Disposition of the last pipeline stage, if it has terminated.
    pub fn disposition(&self) -> Option<Disposition> {
        match self.processes.last().map(Process::state) {
            Some(ProcessState::Terminated(d)) => Some(d),
            _ => None,
        }
    }

    /// The aggregate state implied by the members' states.
    ///
    /// Stopped when at least one member is stopped and none are running. A
    /// stopped job with a running member has been continued and is running
    /// in the background. Otherwise the current state stands.
    pub fn derived_state(&self) -> JobState {
        let running = self
            .processes
            .iter()
            .any(|p| p.state() == ProcessState::Running);
        let stopped = self
            .processes
            .iter()
            .any(|p| p.state() == ProcessState::Stopped);

        match (running, stopped, self.state) {
            (false, true, _) => JobState::Stopped,
            (true, _, JobState::Stopped) => JobState::Background,
            (_, _, current) => current,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.num, self.state)?;
        for (i, p) in self.processes.iter().enumerate() {
            if i > 0 {
                write!(f, " |")?;
            }
            write!(f, " {} {} {}", p.pid(), p.state(), p.command_line())?;
        }
        Ok(())
    }
}
