//! git::process
//!
//! Supervised engine subprocesses.
//!
//! Every child is waited for with a deadline. A child that overstays it is
//! asked to stop (SIGTERM), given a grace period, then killed (SIGKILL) and
//! given one more. Only a child that survives all of that is reported as
//! [`EngineError::Timeout`]; everything else ends in an exit status.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::EngineError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Deadlines for waiting on a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long the child may take to exit on its own.
    pub exit: Duration,
    /// How long to wait after each termination signal.
    pub term: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            exit: Duration::from_secs(15),
            term: Duration::from_secs(5),
        }
    }
}

/// A program plus arguments, ready to run under supervision.
#[derive(Debug, Clone)]
pub struct Invocation {
    argv: Vec<String>,
    timeouts: Timeouts,
}

impl Invocation {
    /// Prepare `program args...`.
    pub fn new<I, A>(program: &str, args: I, timeouts: Timeouts) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let mut argv = vec![program.to_string()];
        argv.extend(args.into_iter().map(Into::into));
        Self { argv, timeouts }
    }

    /// Full argv, for error reports.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).stderr(Stdio::inherit());
        cmd
    }

    fn spawn(&self, cmd: &mut Command) -> Result<Child, EngineError> {
        debug!(argv = ?self.argv, "spawning engine process");
        cmd.spawn().map_err(|source| EngineError::Spawn {
            args: self.argv.clone(),
            source,
        })
    }

    fn check(&self, status: ExitStatus) -> Result<(), EngineError> {
        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Failure {
                args: self.argv.clone(),
                code: exit_code(status),
            })
        }
    }

    /// Run to completion with no input, discarding stdout.
    pub fn run(&self) -> Result<(), EngineError> {
        let mut child = self.spawn(self.command().stdin(Stdio::null()).stdout(Stdio::null()))?;
        let status = wait_or_kill(&mut child, &self.argv, self.timeouts)?;
        self.check(status)
    }

    /// Run with `input` as stdin, discarding stdout.
    ///
    /// The child reads from the file's current position.
    pub fn run_with_input(&self, input: &File) -> Result<(), EngineError> {
        let stdin = input.try_clone()?;
        let mut child = self.spawn(self.command().stdin(stdin).stdout(Stdio::null()))?;
        let status = wait_or_kill(&mut child, &self.argv, self.timeouts)?;
        self.check(status)
    }

    /// Run with optional stdin and collect stdout.
    pub fn output_with_input(&self, input: Option<&File>) -> Result<String, EngineError> {
        let stdin = match input {
            Some(file) => Stdio::from(file.try_clone()?),
            None => Stdio::null(),
        };
        let mut child = self.spawn(self.command().stdin(stdin).stdout(Stdio::piped()))?;

        let mut out = Vec::new();
        let read = match child.stdout.take() {
            Some(mut stdout) => stdout.read_to_end(&mut out).map(|_| ()),
            None => Ok(()),
        };
        let status = wait_or_kill(&mut child, &self.argv, self.timeouts)?;
        read?;
        self.check(status)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Start the child and stream its stdout line by line.
    pub fn stream(self) -> Result<LineStream, EngineError> {
        let mut child = self.spawn(self.command().stdin(Stdio::null()).stdout(Stdio::piped()))?;
        let reader = child.stdout.take().map(BufReader::new);
        Ok(LineStream {
            invocation: self,
            child,
            reader,
            done: false,
        })
    }
}

/// Lines of a running child's stdout.
///
/// After the last line the child is reaped; a non-zero exit becomes one
/// final `Err` item. Dropping the stream early closes the pipe and reaps the
/// child with the usual escalation.
#[derive(Debug)]
pub struct LineStream {
    invocation: Invocation,
    child: Child,
    reader: Option<BufReader<ChildStdout>>,
    done: bool,
}

impl LineStream {
    fn finish(&mut self) -> Option<Result<String, EngineError>> {
        self.done = true;
        self.reader = None;
        let result = wait_or_kill(&mut self.child, &self.invocation.argv, self.invocation.timeouts)
            .and_then(|status| self.invocation.check(status));
        result.err().map(Err)
    }
}

impl Iterator for LineStream {
    type Item = Result<String, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(reader) = self.reader.as_mut() else {
            return self.finish();
        };

        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => self.finish(),
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
            Err(e) => {
                let _ = self.finish();
                Some(Err(e.into()))
            }
        }
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.reader = None;
        if let Err(e) = wait_or_kill(&mut self.child, &self.invocation.argv, self.invocation.timeouts)
        {
            warn!(error = %e, "abandoned engine process did not exit");
        }
    }
}

/// Exit code, or the negated signal number for a killed child.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

/// Wait for `child`, escalating SIGTERM then SIGKILL past each deadline.
///
/// # Errors
///
/// [`EngineError::Timeout`] if the child still has not exited after SIGKILL
/// and the final grace period.
pub fn wait_or_kill(
    child: &mut Child,
    argv: &[String],
    timeouts: Timeouts,
) -> Result<ExitStatus, EngineError> {
    if let Some(status) = wait_until(child, timeouts.exit)? {
        return Ok(status);
    }

    let pid = child.id();
    warn!(pid, argv = ?argv, "engine process overran its deadline; sending SIGTERM");
    signal(pid, Signal::SIGTERM);
    if let Some(status) = wait_until(child, timeouts.term)? {
        return Ok(status);
    }

    warn!(pid, "engine process ignored SIGTERM; sending SIGKILL");
    signal(pid, Signal::SIGKILL);
    if let Some(status) = wait_until(child, timeouts.term)? {
        return Ok(status);
    }

    Err(EngineError::Timeout {
        args: argv.to_vec(),
        pid,
    })
}

fn signal(pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // ESRCH just means it exited between polls.
    if let Err(e) = kill(Pid::from_raw(raw), sig) {
        debug!(pid, signal = ?sig, error = %e, "signal not delivered");
    }
}

fn wait_until(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>, EngineError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
