/// Builtin commands, run by the shell itself against the job list.
///
/// `quit`/`exit`, `jobs`, `fg <jobid>`, `bg <jobid>`, and the signal
/// builtins `slay`, `halt`, `cont`, each taking `<pid>` or `<jobid> <pid>`.
use crate::error::ShellError;
use crate::executor;
use crate::job::JobState;
use crate::job_list::JobList;
use crate::signals::SignalBlock;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// The signal builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Slay,
    Halt,
    Cont,
}

impl Delivery {
    fn name(self) -> &'static str {
        match self {
            Delivery::Slay => "slay",
            Delivery::Halt => "halt",
            Delivery::Cont => "cont",
        }
    }

    fn signal(self) -> Signal {
        match self {
            Delivery::Slay => Signal::SIGKILL,
            Delivery::Halt => Signal::SIGSTOP,
            Delivery::Cont => Signal::SIGCONT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Quit,
    Jobs,
    Fg,
    Bg,
    Deliver(Delivery),
}

/// What the control loop should do after a builtin ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Builtin {
    /// Recognize a builtin by its exact command name.
    pub fn lookup(name: &str) -> Option<Builtin> {
        match name {
            "quit" | "exit" => Some(Builtin::Quit),
            "jobs" => Some(Builtin::Jobs),
            "fg" => Some(Builtin::Fg),
            "bg" => Some(Builtin::Bg),
            "slay" => Some(Builtin::Deliver(Delivery::Slay)),
            "halt" => Some(Builtin::Deliver(Delivery::Halt)),
            "cont" => Some(Builtin::Deliver(Delivery::Cont)),
            _ => None,
        }
    }
}

/// Who a signal builtin is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Process(Pid),
    JobProcess(usize, Pid),
}

fn parse_number(arg: &str) -> Option<usize> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    arg.parse().ok()
}

fn parse_pid(arg: &str) -> Option<Pid> {
    parse_number(arg)
        .and_then(|n| i32::try_from(n).ok())
        .map(Pid::from_raw)
}

/// The single job number argument of `fg` / `bg`.
pub fn parse_job_arg(name: &str, args: &[String]) -> Result<usize, ShellError> {
    let num = match args {
        [arg] => parse_number(arg),
        _ => None,
    };
    num.ok_or_else(|| ShellError::Usage(format!("Usage: {name} <jobid>.")))
}

/// `<pid>` or `<jobid> <pid>`.
pub fn parse_target(name: &str, args: &[String]) -> Result<Target, ShellError> {
    let target = match args {
        [pid] => parse_pid(pid).map(Target::Process),
        [job, pid] => parse_number(job)
            .zip(parse_pid(pid))
            .map(|(job, pid)| Target::JobProcess(job, pid)),
        _ => None,
    };
    target.ok_or_else(|| ShellError::Usage(format!("Usage: {name} <jobid> <pid> | <pid>.")))
}

fn no_such_job(name: &str, num: usize) -> ShellError {
    ShellError::NoSuchJob(format!("{name} {num}:  No such job."))
}

/// Check that `target` names a tracked process and return its pid.
pub fn resolve_target(jobs: &JobList, name: &str, target: Target) -> Result<Pid, ShellError> {
    match target {
        Target::Process(pid) => jobs
            .get_job_with_process(pid)
            .map(|_| pid)
            .ok_or_else(|| ShellError::NoSuchProcess(format!("No process with pid {pid}."))),
        Target::JobProcess(num, pid) => {
            if !jobs.contains_job(num) {
                return Err(no_such_job(name, num));
            }
            if !jobs.get_job(num).is_some_and(|job| job.contains_process(pid)) {
                return Err(ShellError::NoSuchProcess(format!(
                    "Job {num} has no process with pid {pid}."
                )));
            }
            Ok(pid)
        }
    }
}

/// Run a builtin. `args` excludes the command name itself.
pub fn run(
    builtin: Builtin,
    args: &[String],
    block: &mut SignalBlock<'_>,
    shell_pgid: Pid,
) -> Result<Flow, ShellError> {
    match builtin {
        Builtin::Quit => return Ok(Flow::Quit),
        Builtin::Jobs => print!("{}", block.jobs()),
        Builtin::Fg => foreground(args, block, shell_pgid)?,
        Builtin::Bg => background(args, block)?,
        Builtin::Deliver(delivery) => deliver(delivery, args, block)?,
    }
    Ok(Flow::Continue)
}

/// Look up job `num` and return its process group.
fn job_group(jobs: &JobList, name: &str, num: usize) -> Result<Pid, ShellError> {
    if !jobs.contains_job(num) {
        return Err(no_such_job(name, num));
    }
    jobs.get_job(num)
        .and_then(|job| job.pgid())
        .ok_or_else(|| no_such_job(name, num))
}

fn continue_group(pgid: Pid) -> Result<(), ShellError> {
    signal::killpg(pgid, Signal::SIGCONT).map_err(ShellError::sys("killpg"))
}

fn foreground(
    args: &[String],
    block: &mut SignalBlock<'_>,
    shell_pgid: Pid,
) -> Result<(), ShellError> {
    let num = parse_job_arg("fg", args)?;
    let pgid = job_group(block.jobs(), "fg", num)?;

    executor::give_terminal(pgid)?;
    block.jobs().resume(num, JobState::Foreground);
    if let Some(notice) = block.jobs().synchronize(num) {
        println!("{notice}");
    }
    tracing::debug!(job = num, pgid = %pgid, "resuming job in the foreground");
    continue_group(pgid)?;

    executor::wait_while_foreground(block, shell_pgid)
}

fn background(args: &[String], block: &mut SignalBlock<'_>) -> Result<(), ShellError> {
    let num = parse_job_arg("bg", args)?;
    let pgid = job_group(block.jobs(), "bg", num)?;

    block.jobs().resume(num, JobState::Background);
    if let Some(notice) = block.jobs().synchronize(num) {
        println!("{notice}");
    }
    tracing::debug!(job = num, pgid = %pgid, "resuming job in the background");
    continue_group(pgid)
}

fn deliver(
    delivery: Delivery,
    args: &[String],
    block: &mut SignalBlock<'_>,
) -> Result<(), ShellError> {
    let name = delivery.name();
    let target = parse_target(name, args)?;
    let pid = resolve_target(block.jobs(), name, target)?;
    tracing::debug!(pid = %pid, signal = delivery.signal().as_str(), "delivering signal");
    signal::kill(pid, delivery.signal()).map_err(ShellError::sys("kill"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Process;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn jobs_with_two() -> JobList {
        let mut jobs = JobList::new();
        let a = jobs.add_job(JobState::Background, "sleep 10").num();
        jobs.add_process(a, Process::new(Pid::from_raw(100), args(&["sleep", "10"])));
        let b = jobs.add_job(JobState::Background, "cat | wc").num();
        jobs.add_process(b, Process::new(Pid::from_raw(200), args(&["cat"])));
        jobs.add_process(b, Process::new(Pid::from_raw(201), args(&["wc"])));
        jobs
    }

    #[test]
    fn test_lookup_exact_names() {
        assert_eq!(Builtin::lookup("quit"), Some(Builtin::Quit));
        assert_eq!(Builtin::lookup("exit"), Some(Builtin::Quit));
        assert_eq!(Builtin::lookup("jobs"), Some(Builtin::Jobs));
        assert_eq!(Builtin::lookup("fg"), Some(Builtin::Fg));
        assert_eq!(Builtin::lookup("bg"), Some(Builtin::Bg));
        assert_eq!(
            Builtin::lookup("slay"),
            Some(Builtin::Deliver(Delivery::Slay))
        );
        assert_eq!(
            Builtin::lookup("halt"),
            Some(Builtin::Deliver(Delivery::Halt))
        );
        assert_eq!(
            Builtin::lookup("cont"),
            Some(Builtin::Deliver(Delivery::Cont))
        );
        assert_eq!(Builtin::lookup("Jobs"), None);
        assert_eq!(Builtin::lookup("ls"), None);
    }

    #[test]
    fn test_delivery_signals() {
        assert_eq!(Delivery::Slay.signal(), Signal::SIGKILL);
        assert_eq!(Delivery::Halt.signal(), Signal::SIGSTOP);
        assert_eq!(Delivery::Cont.signal(), Signal::SIGCONT);
    }

    #[test]
    fn test_job_arg_validation() {
        assert_eq!(parse_job_arg("fg", &args(&["3"])).unwrap(), 3);
        for bad in [vec![], args(&["x"]), args(&["-1"]), args(&["1", "2"]), args(&["+2"])] {
            let err = parse_job_arg("fg", &bad).unwrap_err();
            assert_eq!(err.to_string(), "Usage: fg <jobid>.");
        }
    }

    #[test]
    fn test_target_forms() {
        assert_eq!(
            parse_target("slay", &args(&["42"])).unwrap(),
            Target::Process(Pid::from_raw(42))
        );
        assert_eq!(
            parse_target("halt", &args(&["2", "42"])).unwrap(),
            Target::JobProcess(2, Pid::from_raw(42))
        );
        let err = parse_target("cont", &args(&["a", "b"])).unwrap_err();
        assert_eq!(err.to_string(), "Usage: cont <jobid> <pid> | <pid>.");
        assert!(parse_target("cont", &[]).is_err());
        assert!(parse_target("cont", &args(&["1", "2", "3"])).is_err());
        assert!(parse_target("cont", &args(&["99999999999"])).is_err());
    }

    #[test]
    fn test_resolve_bare_pid() {
        let jobs = jobs_with_two();
        assert_eq!(
            resolve_target(&jobs, "slay", Target::Process(Pid::from_raw(201))).unwrap(),
            Pid::from_raw(201)
        );
        let err = resolve_target(&jobs, "slay", Target::Process(Pid::from_raw(5))).unwrap_err();
        assert!(matches!(err, ShellError::NoSuchProcess(_)));
        assert_eq!(err.to_string(), "No process with pid 5.");
    }

    #[test]
    fn test_resolve_job_and_pid() {
        let jobs = jobs_with_two();
        assert_eq!(
            resolve_target(&jobs, "halt", Target::JobProcess(2, Pid::from_raw(200))).unwrap(),
            Pid::from_raw(200)
        );

        let err = resolve_target(&jobs, "halt", Target::JobProcess(7, Pid::from_raw(200)))
            .unwrap_err();
        assert_eq!(err.to_string(), "halt 7:  No such job.");

        let err = resolve_target(&jobs, "halt", Target::JobProcess(1, Pid::from_raw(200)))
            .unwrap_err();
        assert_eq!(err.to_string(), "Job 1 has no process with pid 200.");
    }

    #[test]
    fn test_missing_job_group() {
        let jobs = jobs_with_two();
        assert_eq!(job_group(&jobs, "fg", 2).unwrap(), Pid::from_raw(200));
        let err = job_group(&jobs, "fg", 9).unwrap_err();
        assert_eq!(err.to_string(), "fg 9:  No such job.");
    }
}
