use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use crate::error::{HarnessError, Result};
use crate::termination::Signal;

/// One external program launch: argv-style, never a shell string.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// When set, the child sees exactly this environment.
    pub env: Option<BTreeMap<OsString, OsString>>,
    pub capture: OutputCapture,
}

/// How a synchronous run collects the child's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputCapture {
    /// stdout and stderr share one pipe, so `output` keeps their interleaving.
    #[default]
    Combined,
    /// `output` holds stdout only; stderr is kept apart.
    Separate,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
            capture: OutputCapture::Combined,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: BTreeMap<OsString, OsString>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn separate_stderr(mut self) -> Self {
        self.capture = OutputCapture::Separate;
        self
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &self.env {
            cmd.env_clear();
            cmd.envs(env);
        }
        cmd
    }
}

/// Raw wait status of a finished child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(i32),
    Signaled(Signal),
    /// Neither an exit code nor a terminating signal (e.g. stopped, or a platform
    /// without signal semantics).
    Unrecognized(String),
}

impl WaitStatus {
    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return WaitStatus::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt as _;
            if let Some(sig) = status.signal() {
                return WaitStatus::Signaled(Signal::from_raw(sig));
            }
        }
        WaitStatus::Unrecognized(status.to_string())
    }
}

impl std::fmt::Display for WaitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitStatus::Exited(code) => write!(f, "exit status {code}"),
            WaitStatus::Signaled(sig) => write!(f, "signal: {sig}"),
            WaitStatus::Unrecognized(desc) => f.write_str(desc),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub argv: Vec<String>,
    /// stdout, or stdout and stderr interleaved as written when they shared a pipe.
    pub output: Vec<u8>,
    /// Empty when stderr went into `output`.
    pub stderr: Vec<u8>,
    pub status: WaitStatus,
}

impl ProcessResult {
    pub fn exited_normally(&self) -> bool {
        matches!(self.status, WaitStatus::Exited(_))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            WaitStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn terminating_signal(&self) -> Option<Signal> {
        match self.status {
            WaitStatus::Signaled(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == WaitStatus::Exited(0)
    }

    /// The wait "error": `None` for a zero exit, the raw status otherwise.
    pub fn wait_error(&self) -> Option<&WaitStatus> {
        (!self.success()).then_some(&self.status)
    }

    /// Everything the child wrote. For a combined capture this is the single
    /// stream in write order; otherwise stdout followed by stderr.
    pub fn combined_output(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.output.len() + self.stderr.len());
        out.extend_from_slice(&self.output);
        out.extend_from_slice(&self.stderr);
        out
    }
}

/// A child started in supervised mode that has already sent its readiness token.
pub trait SupervisedChild: Send {
    fn pid(&self) -> u32;

    /// Fire-and-forget delivery; whether the child noticed only shows in its exit.
    fn signal(&mut self, signal: Signal) -> Result<()>;

    fn wait(self: Box<Self>) -> Result<ProcessResult>;
}

/// Everything the harness needs from the operating system's process layer.
pub trait CommandRunner: Sync {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessResult>;

    /// Starts `spec`, then blocks until the child writes `token` as its first
    /// stderr line.
    fn spawn_supervised(&self, spec: &CommandSpec, token: &str)
        -> Result<Box<dyn SupervisedChild>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessResult> {
        let argv = spec.argv();
        log::debug!("exec: {}", argv.join(" "));

        let (mut child, output, stderr) = match spec.capture {
            OutputCapture::Combined => {
                let (reader, writer) = std::io::pipe()
                    .map_err(|err| HarnessError::io("create output pipe", err))?;
                let writer_err = writer
                    .try_clone()
                    .map_err(|err| HarnessError::io("clone output pipe", err))?;
                // Both write ends live in the Command inside `spawn`, so they are
                // closed here by the time the reader runs.
                let child = spawn(spec, &argv, writer.into(), writer_err.into())?;
                (child, Some(drain(reader)), None)
            }
            OutputCapture::Separate => {
                let mut child = spawn(spec, &argv, Stdio::piped(), Stdio::piped())?;
                let stdout = child.stdout.take().map(drain);
                let stderr = child.stderr.take().map(drain);
                (child, stdout, stderr)
            }
        };

        let status = child
            .wait()
            .map_err(|err| HarnessError::io(format!("wait {}", argv[0]), err))?;
        Ok(ProcessResult {
            argv,
            output: join_drain(output)?,
            stderr: join_drain(stderr)?,
            status: WaitStatus::from_exit_status(status),
        })
    }

    fn spawn_supervised(
        &self,
        spec: &CommandSpec,
        token: &str,
    ) -> Result<Box<dyn SupervisedChild>> {
        let argv = spec.argv();
        log::debug!("exec (supervised): {}", argv.join(" "));

        let mut child = spawn(spec, &argv, Stdio::piped(), Stdio::piped())?;
        let stdout = child.stdout.take().map(drain);
        let Some(stderr) = child.stderr.take() else {
            reap(&mut child);
            return Err(HarnessError::Synchronization {
                detail: "stderr was not captured".to_string(),
            });
        };

        let mut reader = BufReader::new(stderr);
        let mut first_line = Vec::new();
        let sync_failure = match reader.read_until(b'\n', &mut first_line) {
            Ok(0) => Some("stderr closed before the token".to_string()),
            Ok(_) if first_line == token.as_bytes() => None,
            Ok(_) => Some(format!(
                "expected {:?}, got {:?}",
                token,
                String::from_utf8_lossy(&first_line)
            )),
            Err(err) => Some(format!("read stderr: {err}")),
        };
        if let Some(detail) = sync_failure {
            reap(&mut child);
            let _ = join_drain(stdout);
            return Err(HarnessError::Synchronization { detail });
        }

        let rest = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(buf)
        });

        Ok(Box::new(SystemChild {
            child,
            argv,
            stdout,
            stderr_head: first_line,
            stderr_rest: Some(rest),
        }))
    }
}

struct SystemChild {
    child: Child,
    argv: Vec<String>,
    stdout: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    stderr_head: Vec<u8>,
    stderr_rest: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

impl SupervisedChild for SystemChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: Signal) -> Result<()> {
        let pid = self.child.id() as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to a
        // child we have not reaped yet, so it cannot have been recycled.
        let rc = unsafe { libc::kill(pid, signal.as_raw()) };
        if rc != 0 {
            return Err(HarnessError::io(
                format!("send {signal} to pid {pid}"),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn signal(&mut self, signal: Signal) -> Result<()> {
        Err(HarnessError::io(
            format!("send {signal}"),
            std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "signal delivery requires a unix host",
            ),
        ))
    }

    fn wait(mut self: Box<Self>) -> Result<ProcessResult> {
        let status = self
            .child
            .wait()
            .map_err(|err| HarnessError::io(format!("wait {}", self.argv[0]), err))?;
        let mut stderr = std::mem::take(&mut self.stderr_head);
        stderr.extend(join_drain(self.stderr_rest.take())?);
        Ok(ProcessResult {
            argv: std::mem::take(&mut self.argv),
            output: join_drain(self.stdout.take())?,
            stderr,
            status: WaitStatus::from_exit_status(status),
        })
    }
}

fn spawn(spec: &CommandSpec, argv: &[String], stdout: Stdio, stderr: Stdio) -> Result<Child> {
    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null());
    cmd.stdout(stdout);
    cmd.stderr(stderr);
    cmd.spawn().map_err(|source| HarnessError::Start {
        program: argv[0].clone(),
        source,
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    let Some(handle) = handle else {
        return Ok(Vec::new());
    };
    handle
        .join()
        .unwrap_or_else(|_| Ok(Vec::new()))
        .map_err(|err| HarnessError::io("read child output", err))
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
