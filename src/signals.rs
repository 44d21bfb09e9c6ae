/// Signal handling for job control.
///
/// The job registry is shared between the control loop and the handlers
/// installed here. The control loop only touches it through a
/// [`SignalBlock`], which keeps SIGCHLD, SIGINT, SIGTSTP and SIGCONT
/// blocked for as long as it lives. Handlers are installed with that same set
/// as their mask, so at any moment exactly one side owns the registry.
///
/// Handlers:
/// - SIGCHLD: reap every pending child state change and reconcile its job.
/// - SIGINT / SIGTSTP: forward to the foreground job's process group.
/// - SIGQUIT: exit the shell immediately.
/// - SIGTTIN / SIGTTOU: ignored, so the shell is never stopped for terminal I/O.
use crate::job::Job;
use crate::job_list::{JobList, Notice};
use crate::process::{Disposition, ProcessState};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::cell::UnsafeCell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Signals blocked while the control loop reads or writes job state.
pub const JOB_CONTROL_SIGNALS: [Signal; 4] = [
    Signal::SIGCHLD,
    Signal::SIGINT,
    Signal::SIGTSTP,
    Signal::SIGCONT,
];

/// Signals whose disposition the shell changes; children get the defaults back.
const HANDLED_SIGNALS: [Signal; 6] = [
    Signal::SIGCHLD,
    Signal::SIGINT,
    Signal::SIGTSTP,
    Signal::SIGQUIT,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

pub fn job_control_set() -> SigSet {
    let mut set = SigSet::empty();
    for sig in JOB_CONTROL_SIGNALS {
        set.add(sig);
    }
    set
}

/// The job registry, reachable from both the control loop and the handlers.
pub struct SharedJobs {
    jobs: UnsafeCell<JobList>,
    held: AtomicBool,
}

// SAFETY: the shell has a single control thread. Its access goes through a
// `SignalBlock`, during which no handler touching the registry can run, and
// handlers mask each other via `sa_mask`.
unsafe impl Sync for SharedJobs {}

impl Default for SharedJobs {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedJobs {
    pub const fn new() -> Self {
        Self {
            jobs: UnsafeCell::new(JobList::new()),
            held: AtomicBool::new(false),
        }
    }

    /// Enter the critical section: block the job-control signals and hand out
    /// access to the registry until the returned guard is dropped.
    ///
    /// Fails with `EDEADLK` if a guard is already alive.
    pub fn block(&self) -> nix::Result<SignalBlock<'_>> {
        if self.held.swap(true, Ordering::AcqRel) {
            return Err(Errno::EDEADLK);
        }
        let mut previous = SigSet::empty();
        if let Err(e) = signal::sigprocmask(
            SigmaskHow::SIG_BLOCK,
            Some(&job_control_set()),
            Some(&mut previous),
        ) {
            self.held.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(SignalBlock {
            shared: self,
            previous,
        })
    }

    /// Registry access from inside a signal handler.
    ///
    /// # Safety
    /// Only sound from a handler installed by [`install`], whose mask keeps
    /// the other handlers out, while the control loop is not inside a
    /// `SignalBlock` (it cannot be, or this handler would not be running).
    #[allow(clippy::mut_from_ref)]
    unsafe fn handler_jobs(&self) -> &mut JobList {
        &mut *self.jobs.get()
    }
}

/// Scoped critical section over the job registry.
///
/// The job-control signals stay blocked until the guard drops, which
/// restores the mask that was in effect before. `suspend` and `unblocked`
/// open the only windows in which handlers may run; both take `&mut self`
/// so no borrow of the registry can be held across them.
pub struct SignalBlock<'a> {
    shared: &'a SharedJobs,
    previous: SigSet,
}

impl SignalBlock<'_> {
    pub fn jobs(&mut self) -> &mut JobList {
        // SAFETY: handlers cannot run while the signals are blocked, and
        // `held` guarantees this is the only guard.
        unsafe { &mut *self.shared.jobs.get() }
    }

    /// The previous mask with the job-control signals removed.
    fn open_mask(&self) -> SigSet {
        let mut mask = self.previous;
        for sig in JOB_CONTROL_SIGNALS {
            mask.remove(sig);
        }
        mask
    }

    /// Atomically unblock the job-control signals and sleep until one of them
    /// has been handled, then block them again.
    pub fn suspend(&mut self) -> nix::Result<()> {
        self.open_mask().suspend()
    }

    /// Run `f` with the job-control signals unblocked. Meant for a single
    /// blocking system call such as `read(2)`.
    pub fn unblocked<T>(&mut self, f: impl FnOnce() -> T) -> nix::Result<T> {
        let mut blocked = SigSet::empty();
        signal::sigprocmask(
            SigmaskHow::SIG_SETMASK,
            Some(&self.open_mask()),
            Some(&mut blocked),
        )?;
        let out = f();
        signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&blocked), None)?;
        Ok(out)
    }
}

impl Drop for SignalBlock<'_> {
    fn drop(&mut self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
        self.shared.held.store(false, Ordering::Release);
    }
}

static REGISTRY: OnceLock<&'static SharedJobs> = OnceLock::new();

/// Install the shell's handlers, all of which operate on `jobs`.
pub fn install(jobs: &'static SharedJobs) -> nix::Result<()> {
    if REGISTRY.set(jobs).is_err() {
        return Err(Errno::EBUSY);
    }

    let handlers: [(Signal, extern "C" fn(libc::c_int)); 4] = [
        (Signal::SIGCHLD, reap_children),
        (Signal::SIGINT, forward_to_foreground),
        (Signal::SIGTSTP, forward_to_foreground),
        (Signal::SIGQUIT, quit),
    ];
    for (sig, handler) in handlers {
        let action = SigAction::new(
            SigHandler::Handler(handler),
            SaFlags::SA_RESTART,
            job_control_set(),
        );
        // SAFETY: the handlers only touch the registry under the discipline
        // described on `SharedJobs`.
        unsafe { signal::sigaction(sig, &action)? };
    }

    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGTTIN, Signal::SIGTTOU] {
        // SAFETY: ignoring a signal installs no code.
        unsafe { signal::sigaction(sig, &ignore)? };
    }
    Ok(())
}

/// Undo the shell's signal setup in a freshly forked child: default
/// dispositions and an empty mask. Only async-signal-safe calls are made.
pub fn restore_defaults() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in HANDLED_SIGNALS {
        // SAFETY: restoring the default disposition installs no code.
        unsafe { signal::sigaction(sig, &default)? };
    }
    signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
}

/// Classify one `waitpid` report.
fn child_transition(status: WaitStatus) -> Option<(Pid, ProcessState)> {
    match status {
        WaitStatus::Exited(pid, code) => Some((
            pid,
            ProcessState::Terminated(Disposition::Exited(code)),
        )),
        WaitStatus::Signaled(pid, sig, _) => Some((
            pid,
            ProcessState::Terminated(Disposition::Signaled(sig)),
        )),
        WaitStatus::Stopped(pid, _) => Some((pid, ProcessState::Stopped)),
        WaitStatus::Continued(pid) => Some((pid, ProcessState::Running)),
        _ => None,
    }
}

/// Apply a child state change to the registry, returning any notice to print.
pub fn apply_transition(jobs: &mut JobList, pid: Pid, state: ProcessState) -> Option<Notice> {
    // A pid we never recorded has nothing to reconcile.
    if !jobs.contains_process(pid) {
        return None;
    }
    let num = jobs.set_process_state(pid, state)?;
    jobs.synchronize(num)
}

fn announce(notice: &Notice) {
    // The control loop never holds stdout while the handlers can run.
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{notice}");
    let _ = out.flush();
}

extern "C" fn reap_children(_: libc::c_int) {
    let Some(shared) = REGISTRY.get() else {
        return;
    };
    // SAFETY: running as an installed handler.
    let jobs = unsafe { shared.handler_jobs() };
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;

    loop {
        let status = match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => status,
        };
        let Some((pid, state)) = child_transition(status) else {
            continue;
        };
        if let Some(notice) = apply_transition(jobs, pid, state) {
            announce(&notice);
        }
    }
}

extern "C" fn forward_to_foreground(sig: libc::c_int) {
    let Some(shared) = REGISTRY.get() else {
        return;
    };
    let Ok(signal) = Signal::try_from(sig) else {
        return;
    };
    // SAFETY: running as an installed handler.
    let jobs = unsafe { shared.handler_jobs() };
    if let Some(pgid) = jobs.get_foreground_job().and_then(Job::pgid) {
        let _ = signal::killpg(pgid, signal);
    }
}

extern "C" fn quit(_: libc::c_int) {
    // SAFETY: _exit is async-signal-safe and skips all user-space cleanup.
    unsafe { libc::_exit(0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobState;
    use crate::process::Process;

    fn thread_mask() -> SigSet {
        SigSet::thread_get_mask().unwrap()
    }

    #[test]
    fn test_block_masks_and_drop_restores() {
        let shared = SharedJobs::new();
        assert!(!thread_mask().contains(Signal::SIGCHLD));
        {
            let mut block = shared.block().unwrap();
            let mask = thread_mask();
            for sig in JOB_CONTROL_SIGNALS {
                assert!(mask.contains(sig), "{sig:?} should be blocked");
            }
            block.jobs().add_job(JobState::Background, "sleep 1");
        }
        assert!(!thread_mask().contains(Signal::SIGCHLD));
        assert!(!thread_mask().contains(Signal::SIGINT));
    }

    #[test]
    fn test_only_one_block_at_a_time() {
        let shared = SharedJobs::new();
        let block = shared.block().unwrap();
        assert_eq!(shared.block().err(), Some(Errno::EDEADLK));
        drop(block);
        assert!(shared.block().is_ok());
    }

    #[test]
    fn test_unblocked_window_reblocks() {
        let shared = SharedJobs::new();
        let mut block = shared.block().unwrap();
        let inside = block.unblocked(thread_mask).unwrap();
        assert!(!inside.contains(Signal::SIGCHLD));
        assert!(thread_mask().contains(Signal::SIGCHLD));
    }

    #[test]
    fn test_registry_persists_across_blocks() {
        let shared = SharedJobs::new();
        shared
            .block()
            .unwrap()
            .jobs()
            .add_job(JobState::Background, "a");
        let mut block = shared.block().unwrap();
        assert!(block.jobs().contains_job(1));
    }

    #[test]
    fn test_child_transition_classification() {
        let pid = Pid::from_raw(7);
        assert_eq!(
            child_transition(WaitStatus::Exited(pid, 1)),
            Some((pid, ProcessState::Terminated(Disposition::Exited(1))))
        );
        assert_eq!(
            child_transition(WaitStatus::Signaled(pid, Signal::SIGINT, false)),
            Some((pid, ProcessState::Terminated(Disposition::Signaled(Signal::SIGINT))))
        );
        assert_eq!(
            child_transition(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some((pid, ProcessState::Stopped))
        );
        assert_eq!(
            child_transition(WaitStatus::Continued(pid)),
            Some((pid, ProcessState::Running))
        );
        assert_eq!(child_transition(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_apply_transition_reconciles_job() {
        let mut jobs = JobList::new();
        let num = jobs.add_job(JobState::Background, "sleep 5").num();
        jobs.add_process(num, Process::new(Pid::from_raw(300), vec!["sleep".into()]));

        assert_eq!(apply_transition(&mut jobs, Pid::from_raw(999), ProcessState::Stopped), None);

        let notice = apply_transition(
            &mut jobs,
            Pid::from_raw(300),
            ProcessState::Terminated(Disposition::Exited(0)),
        )
        .unwrap();
        assert_eq!(notice.num, num);
        assert!(jobs.is_empty());
    }
}
