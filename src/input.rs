/// Line input for the control loop.
///
/// Bytes are pulled with raw `read(2)` calls supplied by the caller, so the
/// shell can open its signal window around exactly that system call.
use nix::errno::Errno;

const CHUNK: usize = 4096;

#[derive(Debug, Default)]
pub struct LineReader {
    pending: Vec<u8>,
    eof: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next line without its terminator, or `None` at end of input.
    ///
    /// `read` fills the buffer it is given and returns the byte count, with 0
    /// meaning end of input. Interrupted reads are retried.
    pub fn next_line<F>(&mut self, mut read: F) -> nix::Result<Option<String>>
    where
        F: FnMut(&mut [u8]) -> nix::Result<usize>,
    {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.pending);
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            let mut chunk = [0u8; CHUNK];
            match read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self
                    .pending
                    .extend_from_slice(chunk.get(..n).unwrap_or_default()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
