/// Pipeline execution: turn a parsed pipeline into a job of forked children
/// joined by pipes, then either return (background) or wait for the job to
/// leave the foreground.
///
/// Descriptor ownership follows one rule: pipe `k` connects stage `k`
/// (its only writer) to stage `k + 1` (its only reader). Every stage
/// duplicates the ends it uses onto stdin/stdout and closes all originals;
/// the shell closes its copies once every stage has been forked.
use crate::error::ShellError;
use crate::job::JobState;
use crate::pipeline::{Command, Pipeline};
use crate::process::Process;
use crate::signals::{self, SignalBlock};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Exit status of a child whose program could not be started.
const EXEC_FAILURE: i32 = 127;

/// Where one side of a stage's standard I/O comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Keep the descriptor inherited from the shell.
    Inherit,
    /// The pipeline's redirection file.
    File,
    /// Pipe `k`, the one between stage `k` and stage `k + 1`.
    Pipe(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub stdin: Endpoint,
    pub stdout: Endpoint,
}

/// Work out stage `index` of `count`'s standard input and output.
///
/// Only the first stage sees the input file and only the last sees the
/// output file; everything in between is pipes.
pub fn plan_stage(index: usize, count: usize, has_input: bool, has_output: bool) -> StagePlan {
    let stdin = match index {
        0 if has_input => Endpoint::File,
        0 => Endpoint::Inherit,
        _ => Endpoint::Pipe(index - 1),
    };
    let stdout = if index + 1 < count {
        Endpoint::Pipe(index)
    } else if has_output {
        Endpoint::File
    } else {
        Endpoint::Inherit
    };
    StagePlan { stdin, stdout }
}

struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

/// One pipe per adjacent pair of stages.
fn open_pipes(stages: usize) -> Result<Vec<Pipe>, ShellError> {
    (1..stages)
        .map(|_| {
            let (read, write) = unistd::pipe().map_err(ShellError::sys("pipe"))?;
            Ok(Pipe { read, write })
        })
        .collect()
}

/// The opened redirection targets of a pipeline.
#[derive(Debug, Default)]
pub struct Redirects {
    pub input: Option<File>,
    pub output: Option<File>,
}

/// Open the input file read-only, and the output file write-truncate,
/// falling back to creating it with mode 0644 if it does not exist.
pub fn open_redirects(
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<Redirects, ShellError> {
    let redirect_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ShellError::Redirect { path, source }
    };

    let input = input
        .map(|path| File::open(path).map_err(redirect_err(path)))
        .transpose()?;

    let output = output
        .map(|path| {
            let opened = match OpenOptions::new().write(true).truncate(true).open(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => OpenOptions::new()
                    .write(true)
                    .create(true)
                    .mode(0o644)
                    .open(path),
                other => other,
            };
            opened.map_err(redirect_err(path))
        })
        .transpose()?;

    Ok(Redirects { input, output })
}

/// Everything a child needs after `fork`, built beforehand so the child
/// does no allocation of its own before `exec`.
struct PreparedStage {
    argv: Vec<CString>,
    not_found: Vec<u8>,
}

impl PreparedStage {
    fn new(command: &Command) -> Result<Self, ShellError> {
        let argv = command
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ShellError::Sys {
                context: "argument contains a NUL byte",
                source: Errno::EINVAL,
            })?;
        let not_found = format!("{}: Command not found.\n", command.program()).into_bytes();
        Ok(Self { argv, not_found })
    }
}

fn endpoint_fd(
    endpoint: Endpoint,
    pipes: &[Pipe],
    file: Option<&File>,
    reading: bool,
) -> nix::Result<Option<RawFd>> {
    match endpoint {
        Endpoint::Inherit => Ok(None),
        Endpoint::File => file.map(|f| Some(f.as_raw_fd())).ok_or(Errno::EBADF),
        Endpoint::Pipe(k) => {
            let pipe = pipes.get(k).ok_or(Errno::EBADF)?;
            let fd = if reading { &pipe.read } else { &pipe.write };
            Ok(Some(fd.as_raw_fd()))
        }
    }
}

fn wire_stage(plan: StagePlan, pipes: &[Pipe], redirects: &Redirects) -> nix::Result<()> {
    if let Some(fd) = endpoint_fd(plan.stdin, pipes, redirects.input.as_ref(), true)? {
        unistd::dup2(fd, libc::STDIN_FILENO)?;
    }
    if let Some(fd) = endpoint_fd(plan.stdout, pipes, redirects.output.as_ref(), false)? {
        unistd::dup2(fd, libc::STDOUT_FILENO)?;
    }
    Ok(())
}

fn exit_child(code: i32) -> ! {
    // SAFETY: leaves without running the parent's atexit handlers or
    // flushing buffers it inherited.
    unsafe { libc::_exit(code) }
}

/// The forked side of a stage. Never returns.
///
/// A foreground stage takes the terminal for its group itself, before it can
/// exec and read from it; the shell's own `tcsetpgrp` may not have run yet.
/// SIGTTOU is still ignored at that point, so the call cannot stop the child.
fn run_child(
    stage: &PreparedStage,
    plan: StagePlan,
    pgid: Option<Pid>,
    foreground: bool,
    pipes: Vec<Pipe>,
    redirects: Redirects,
) -> ! {
    let _ = unistd::setpgid(Pid::from_raw(0), pgid.unwrap_or(Pid::from_raw(0)));
    if foreground {
        // The shell repeats this after forking and reports any failure.
        let _ = give_terminal(unistd::getpgrp());
    }
    if signals::restore_defaults().is_err() || wire_stage(plan, &pipes, &redirects).is_err() {
        exit_child(EXEC_FAILURE);
    }
    drop(pipes);
    drop(redirects);

    if let Some(program) = stage.argv.first() {
        let _ = unistd::execvp(program, &stage.argv);
    }
    let _ = std::io::stderr().write_all(&stage.not_found);
    exit_child(EXEC_FAILURE)
}

/// Give the terminal to `pgid`. Standard input not being a terminal is fine.
///
/// Safe to call in a forked child: it neither allocates nor touches the
/// `std::io::stdin` handle.
pub fn give_terminal(pgid: Pid) -> Result<(), ShellError> {
    // SAFETY: descriptor 0 is only borrowed for the duration of the call; a
    // closed stdin makes `tcsetpgrp` fail with EBADF, nothing worse.
    let terminal = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
    match unistd::tcsetpgrp(terminal, pgid) {
        Ok(()) | Err(Errno::ENOTTY) => Ok(()),
        Err(e) => Err(ShellError::Terminal(e)),
    }
}

/// Hand the terminal to the foreground job `pgid` and sleep until no job is
/// in the foreground any more, then take the terminal back.
///
/// The check and the sleep cannot race a child's exit: the job-control
/// signals stay blocked except inside `sigsuspend`.
pub fn wait_for_foreground(
    block: &mut SignalBlock<'_>,
    pgid: Pid,
    shell_pgid: Pid,
) -> Result<(), ShellError> {
    if let Err(e) = give_terminal(pgid) {
        if let Some(num) = block.jobs().get_foreground_job().map(|j| j.num()) {
            block.jobs().set_job_state(num, JobState::Background);
        }
        return Err(e);
    }

    wait_while_foreground(block, shell_pgid)
}

/// Sleep until no job is in the foreground, then reclaim the terminal for
/// the shell's own process group.
pub fn wait_while_foreground(
    block: &mut SignalBlock<'_>,
    shell_pgid: Pid,
) -> Result<(), ShellError> {
    while block.jobs().has_foreground_job() {
        block.suspend().map_err(ShellError::sys("sigsuspend"))?;
    }
    give_terminal(shell_pgid)
}

/// Launch `pipeline` as a new job.
pub fn create_job(
    block: &mut SignalBlock<'_>,
    pipeline: &Pipeline,
    shell_pgid: Pid,
) -> Result<(), ShellError> {
    let redirects = open_redirects(pipeline.input.as_deref(), pipeline.output.as_deref())?;
    let stages = pipeline
        .commands
        .iter()
        .map(PreparedStage::new)
        .collect::<Result<Vec<_>, _>>()?;
    let pipes = open_pipes(stages.len())?;

    let state = if pipeline.background {
        JobState::Background
    } else {
        JobState::Foreground
    };
    let num = block.jobs().add_job(state, pipeline.text.as_str()).num();

    // Anything still buffered would otherwise be written again by each child.
    let _ = std::io::stdout().flush();

    let count = stages.len();
    let mut pgid: Option<Pid> = None;
    let mut fork_error = None;

    for (index, (stage, command)) in stages.iter().zip(&pipeline.commands).enumerate() {
        let plan = plan_stage(
            index,
            count,
            redirects.input.is_some(),
            redirects.output.is_some(),
        );

        // SAFETY: the shell is single-threaded, and the child only makes
        // async-signal-safe calls before exec or _exit.
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => {
                run_child(stage, plan, pgid, !pipeline.background, pipes, redirects)
            }
            Ok(ForkResult::Parent { child }) => {
                let group = *pgid.get_or_insert(child);
                block
                    .jobs()
                    .add_process(num, Process::new(child, command.argv.clone()));
                // The child may not have reached its own setpgid yet.
                let _ = unistd::setpgid(child, group);
                tracing::debug!(job = num, pid = %child, stage = index, "forked pipeline stage");
            }
            Err(e) => {
                tracing::warn!(job = num, stage = index, error = %e, "fork failed");
                fork_error = Some(ShellError::sys("fork")(e));
                break;
            }
        }
    }

    drop(pipes);
    drop(redirects);

    let Some(group) = pgid else {
        block.jobs().discard_empty(num);
        return Err(fork_error.unwrap_or(ShellError::sys("fork")(Errno::EAGAIN)));
    };

    if fork_error.is_some() {
        // A partial pipeline is useless; take it down and reap it below.
        let _ = killpg(group, Signal::SIGKILL);
    }

    if pipeline.background && fork_error.is_none() {
        if let Some(job) = block.jobs().get_job(num) {
            let pids: Vec<String> = job.pids().iter().map(|p| p.to_string()).collect();
            println!("[{}] {}", num, pids.join(" "));
        }
        return Ok(());
    }

    if block.jobs().get_job(num).map(|j| j.state()) == Some(JobState::Foreground) {
        wait_for_foreground(block, group, shell_pgid)?;
    }

    match fork_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn plans(count: usize, has_input: bool, has_output: bool) -> Vec<StagePlan> {
        (0..count)
            .map(|i| plan_stage(i, count, has_input, has_output))
            .collect()
    }

    #[test]
    fn test_single_stage_inherits_without_redirects() {
        assert_eq!(
            plans(1, false, false),
            vec![StagePlan {
                stdin: Endpoint::Inherit,
                stdout: Endpoint::Inherit
            }]
        );
    }

    #[test]
    fn test_single_stage_uses_both_files() {
        assert_eq!(
            plans(1, true, true),
            vec![StagePlan {
                stdin: Endpoint::File,
                stdout: Endpoint::File
            }]
        );
    }

    #[test]
    fn test_three_stage_chain() {
        assert_eq!(
            plans(3, true, true),
            vec![
                StagePlan {
                    stdin: Endpoint::File,
                    stdout: Endpoint::Pipe(0)
                },
                StagePlan {
                    stdin: Endpoint::Pipe(0),
                    stdout: Endpoint::Pipe(1)
                },
                StagePlan {
                    stdin: Endpoint::Pipe(1),
                    stdout: Endpoint::File
                },
            ]
        );
    }

    #[test]
    fn test_every_pipe_has_one_writer_and_one_reader() {
        for count in 2..8 {
            let plans = plans(count, false, false);
            for k in 0..count - 1 {
                let writers = plans.iter().filter(|p| p.stdout == Endpoint::Pipe(k)).count();
                let readers = plans.iter().filter(|p| p.stdin == Endpoint::Pipe(k)).count();
                assert_eq!((writers, readers), (1, 1), "pipe {k} of {count} stages");
            }
            assert!(plans
                .iter()
                .all(|p| !matches!(p.stdout, Endpoint::Pipe(k) if k >= count - 1)));
        }
    }

    #[test]
    fn test_open_pipes_count() {
        assert_eq!(open_pipes(1).unwrap().len(), 0);
        assert_eq!(open_pipes(4).unwrap().len(), 3);
    }

    #[test]
    fn test_output_redirect_creates_with_0644() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let redirects = open_redirects(None, Some(&path)).unwrap();
        assert!(redirects.input.is_none());
        assert!(redirects.output.is_some());

        // umask may clear bits, but never adds any beyond 0644.
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777 & !0o644, 0);
        assert_ne!(mode & 0o600, 0);
    }

    #[test]
    fn test_output_redirect_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old contents").unwrap();

        let mut redirects = open_redirects(None, Some(&path)).unwrap();
        redirects.output.as_mut().unwrap().write_all(b"new").unwrap();
        drop(redirects);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_missing_input_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");

        let err = open_redirects(Some(&path), None).unwrap_err();
        assert!(matches!(err, ShellError::Redirect { .. }));
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_prepared_stage_message() {
        let command = Command {
            argv: vec!["nosuchcmd".into(), "-x".into()],
        };
        let stage = PreparedStage::new(&command).unwrap();
        assert_eq!(stage.argv.len(), 2);
        assert_eq!(stage.not_found, b"nosuchcmd: Command not found.\n");
    }

    #[test]
    fn test_nul_byte_argument_is_rejected() {
        let command = Command {
            argv: vec!["echo".into(), "a\0b".into()],
        };
        assert!(PreparedStage::new(&command).is_err());
    }
}
