/// The control loop: read a line, parse it, run it as a builtin or a job.
///
/// The loop holds one `SignalBlock` for its whole life. Handlers only get to
/// run while it waits for input or for a foreground job.
use crate::builtins::{self, Builtin, Flow};
use crate::error::ShellError;
use crate::executor;
use crate::input::LineReader;
use crate::pipeline::Pipeline;
use crate::signals::{SharedJobs, SignalBlock};
use nix::libc;
use nix::unistd::{self, Pid};
use std::io::Write;

const PROMPT: &str = "jobsh> ";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub prompt: bool,
}

/// Run until `quit`/`exit` or end of input.
pub fn run(jobs: &SharedJobs, options: Options) -> Result<(), ShellError> {
    let shell_pgid = unistd::getpgrp();
    let mut block = jobs.block().map_err(ShellError::sys("sigprocmask"))?;
    let mut reader = LineReader::new();

    tracing::info!(pgid = %shell_pgid, "shell ready");

    loop {
        if options.prompt {
            print!("{PROMPT}");
        }
        let _ = std::io::stdout().flush();

        let line = reader
            .next_line(|buf| {
                block
                    .unblocked(|| unistd::read(libc::STDIN_FILENO, buf))
                    .and_then(|read| read)
            })
            .map_err(ShellError::sys("read"))?;

        let Some(line) = line else {
            tracing::debug!("end of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match execute(&mut block, &line, shell_pgid) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => {
                tracing::debug!(error = ?e, line = %line, "command failed");
                eprintln!("{e}");
            }
        }
    }

    if !block.jobs().is_empty() {
        tracing::info!(jobs = block.jobs().len(), "leaving unfinished jobs behind");
    }
    Ok(())
}

/// Parse one line and route it to the builtin dispatcher or the executor.
fn execute(block: &mut SignalBlock<'_>, line: &str, shell_pgid: Pid) -> Result<Flow, ShellError> {
    let pipeline = Pipeline::parse(line)?;

    if let Some(first) = pipeline.commands.first() {
        if let Some(builtin) = Builtin::lookup(first.program()) {
            return builtins::run(builtin, first.args(), block, shell_pgid);
        }
    }

    executor::create_job(block, &pipeline, shell_pgid)?;
    Ok(Flow::Continue)
}
