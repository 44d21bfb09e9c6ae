/// The registry of live jobs.
///
/// Allocates job numbers (lowest unused first), indexes jobs by number and
/// by member pid, tracks the single foreground job, and reconciles a job's
/// aggregate state after its processes change state.
use crate::job::{Job, JobState};
use crate::process::{Disposition, Process, ProcessState};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt;

/// What a visible job transition looked like, for printing at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Completed(Disposition),
    Stopped,
}

/// A one-line notice about a job that changed state outside the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub num: usize,
    pub kind: NoticeKind,
    pub text: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.kind {
            NoticeKind::Completed(d) => d.to_string(),
            NoticeKind::Stopped => "Stopped".to_string(),
        };
        write!(f, "[{}] {:<10} {}", self.num, status, self.text)
    }
}

#[derive(Debug, Default)]
pub struct JobList {
    jobs: BTreeMap<usize, Job>,
    owners: BTreeMap<i32, usize>,
    foreground: Option<usize>,
}

impl JobList {
    pub const fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            owners: BTreeMap::new(),
            foreground: None,
        }
    }

    /// Create an empty job under the lowest job number not currently in use.
    pub fn add_job(&mut self, state: JobState, text: impl Into<String>) -> &mut Job {
        let num = (1..)
            .find(|n| !self.jobs.contains_key(n))
            .unwrap_or(usize::MAX);
        debug_assert!(
            state != JobState::Foreground || self.foreground.is_none(),
            "a second foreground job was requested"
        );
        if state == JobState::Foreground {
            self.foreground = Some(num);
        }
        self.jobs
            .entry(num)
            .or_insert_with(|| Job::new(num, state, text))
    }

    pub fn contains_job(&self, num: usize) -> bool {
        self.jobs.contains_key(&num)
    }

    pub fn get_job(&self, num: usize) -> Option<&Job> {
        self.jobs.get(&num)
    }

    pub fn contains_process(&self, pid: Pid) -> bool {
        self.owners.contains_key(&pid.as_raw())
    }

    pub fn get_job_with_process(&self, pid: Pid) -> Option<&Job> {
        self.owners
            .get(&pid.as_raw())
            .and_then(|num| self.jobs.get(num))
    }

    pub fn has_foreground_job(&self) -> bool {
        self.foreground.is_some()
    }

    pub fn get_foreground_job(&self) -> Option<&Job> {
        self.foreground.and_then(|num| self.jobs.get(&num))
    }

    /// Jobs in ascending job-number order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Record a newly forked process as the next stage of job `num`.
    ///
    /// Returns false if the job does not exist.
    pub fn add_process(&mut self, num: usize, process: Process) -> bool {
        let Some(job) = self.jobs.get_mut(&num) else {
            return false;
        };
        self.owners.insert(process.pid().as_raw(), num);
        job.push_process(process);
        true
    }

    /// Update the state of the process `pid`, returning its job number.
    pub fn set_process_state(&mut self, pid: Pid, state: ProcessState) -> Option<usize> {
        let num = *self.owners.get(&pid.as_raw())?;
        self.jobs.get_mut(&num)?.process_mut(pid)?.set_state(state);
        Some(num)
    }

    /// Set a job's aggregate state, keeping the foreground index current.
    pub fn set_job_state(&mut self, num: usize, state: JobState) {
        let Some(job) = self.jobs.get_mut(&num) else {
            return;
        };
        job.set_state(state);
        match state {
            JobState::Foreground => {
                debug_assert!(
                    self.foreground.is_none() || self.foreground == Some(num),
                    "a second foreground job was requested"
                );
                self.foreground = Some(num);
            }
            _ if self.foreground == Some(num) => self.foreground = None,
            _ => {}
        }
    }

    /// Move a job that is about to receive SIGCONT into `state`.
    ///
    /// Members that have not terminated are marked running up front; the
    /// continue notifications that follow leave them unchanged.
    pub fn resume(&mut self, num: usize, state: JobState) {
        if let Some(job) = self.jobs.get_mut(&num) {
            for p in job.processes_mut() {
                if !p.state().is_terminated() {
                    p.set_state(ProcessState::Running);
                }
            }
        }
        self.set_job_state(num, state);
    }

    /// Reconcile job `num` with its members' states.
    ///
    /// A job whose members have all terminated is removed, freeing its
    /// number; a notice is returned if it was not in the foreground. A
    /// background job that has just become stopped also yields a notice.
    pub fn synchronize(&mut self, num: usize) -> Option<Notice> {
        let job = self.jobs.get(&num)?;

        if job.is_complete() {
            let notice = match (job.state(), job.disposition()) {
                (JobState::Foreground, _) | (_, None) => None,
                (_, Some(d)) => Some(Notice {
                    num,
                    kind: NoticeKind::Completed(d),
                    text: job.text().to_string(),
                }),
            };
            self.remove_job(num);
            return notice;
        }

        let previous = job.state();
        let next = job.derived_state();
        let text = job.text().to_string();
        self.set_job_state(num, next);

        if previous == JobState::Background && next == JobState::Stopped {
            return Some(Notice {
                num,
                kind: NoticeKind::Stopped,
                text,
            });
        }
        None
    }

    /// Drop job `num` if no process was ever recorded for it.
    pub fn discard_empty(&mut self, num: usize) {
        if self.jobs.get(&num).is_some_and(|j| j.processes().is_empty()) {
            self.remove_job(num);
        }
    }

    fn remove_job(&mut self, num: usize) {
        if let Some(job) = self.jobs.remove(&num) {
            for pid in job.pids() {
                self.owners.remove(&pid.as_raw());
            }
        }
        if self.foreground == Some(num) {
            self.foreground = None;
        }
    }
}

impl fmt::Display for JobList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for job in self.iter() {
            writeln!(f, "{job}")?;
        }
        Ok(())
    }
}
