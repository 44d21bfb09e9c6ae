/// Errors surfaced to the user by the control loop.
use crate::pipeline::ParseError;
use nix::errno::Errno;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ShellError {
    /// Malformed or missing builtin arguments; carries the full usage line.
    Usage(String),
    /// A job number that does not name a live job.
    NoSuchJob(String),
    /// A pid that does not belong to any (or the named) job.
    NoSuchProcess(String),
    /// The parsing collaborator rejected the line.
    Parse(ParseError),
    /// A redirection target could not be opened.
    Redirect {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Handing the terminal to a job (or back to the shell) failed.
    Terminal(Errno),
    /// Any other failing system call.
    Sys { context: &'static str, source: Errno },
}

impl ShellError {
    pub fn sys(context: &'static str) -> impl FnOnce(Errno) -> ShellError {
        move |source| ShellError::Sys { context, source }
    }
}

impl std::fmt::Display for ShellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellError::Usage(msg)
            | ShellError::NoSuchJob(msg)
            | ShellError::NoSuchProcess(msg) => write!(f, "{msg}"),
            ShellError::Parse(e) => write!(f, "{e}"),
            ShellError::Redirect { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            ShellError::Terminal(errno) => {
                write!(f, "unable to transfer terminal control: {}", errno.desc())
            }
            ShellError::Sys { context, source } => {
                write!(f, "{context}: {}", source.desc())
            }
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::Parse(e) => Some(e),
            ShellError::Redirect { source, .. } => Some(source),
            ShellError::Terminal(errno) => Some(errno),
            ShellError::Sys { source, .. } => Some(source),
            ShellError::Usage(_) | ShellError::NoSuchJob(_) | ShellError::NoSuchProcess(_) => None,
        }
    }
}

impl From<ParseError> for ShellError {
    fn from(e: ParseError) -> Self {
        ShellError::Parse(e)
    }
}
