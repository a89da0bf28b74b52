//! Process-boundary helpers: start a worker around a foreign artifact and make
//! sure a foreign package is installed.
//!
//! Neither touches the bridge itself. A worker receives its whole input as one
//! JSON document on stdin and answers with a single numeric status line on
//! stdout before doing anything else.

use std::{
    fmt,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, ExitStatus, Stdio},
};

use tracing::{debug, info, warn};

/// Launcher settings. Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    /// Program the artifact is passed to; `None` executes the artifact itself.
    pub program: Option<PathBuf>,
    /// Status line a worker prints when it started successfully.
    pub success_signal: i64,
    /// Command plus leading arguments used to install a package; the package
    /// name is appended.
    pub package_manager: Vec<String>,
    /// Directory installed packages live in. Without it every
    /// [`ensure_package`] call runs the package manager.
    pub site_dir: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            program: None,
            success_signal: 0,
            package_manager: vec!["pip".to_owned(), "install".to_owned()],
            site_dir: None,
        }
    }
}

/// Errors raised by the launcher.
#[derive(Debug)]
pub enum LaunchError {
    Io(io::Error),
    /// The payload could not be serialized.
    Payload(serde_json::Error),
    /// The worker closed stdout or printed something other than a number.
    Protocol(String),
    /// The worker reported a status other than the success signal.
    Signal { expected: i64, actual: i64 },
    /// The package manager exited unsuccessfully.
    Install { package: String, code: Option<i32> },
    /// The options cannot be used, e.g. an empty package manager command.
    Config(String),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "worker I/O failed: {err}"),
            Self::Payload(err) => write!(f, "cannot serialize worker payload: {err}"),
            Self::Protocol(msg) => write!(f, "worker protocol error: {msg}"),
            Self::Signal { expected, actual } => {
                write!(f, "worker signalled {actual}, expected {expected}")
            }
            Self::Install { package, code: Some(code) } => {
                write!(f, "installing {package} failed with exit code {code}")
            }
            Self::Install { package, code: None } => {
                write!(f, "installing {package} was terminated by a signal")
            }
            Self::Config(msg) => write!(f, "invalid launch options: {msg}"),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Payload(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LaunchError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for LaunchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err)
    }
}

/// A started worker whose status line has been read.
///
/// The rest of its stdout stays available through [`Worker::stdout`].
#[derive(Debug)]
pub struct Worker {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Remaining output after the status line.
    pub fn stdout(&mut self) -> &mut BufReader<ChildStdout> {
        &mut self.stdout
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    /// Kills the worker and collects its exit status.
    fn reap(&mut self) {
        reap(&mut self.child);
    }
}

fn reap(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(pid = child.id(), %error, "worker already exited");
    }
    if let Err(error) = child.wait() {
        warn!(pid = child.id(), %error, "could not collect worker exit status");
    }
}

/// Starts `artifact`, sends `payload` on its stdin and waits for its status line.
///
/// Stdin is closed after the payload; a worker that closes its stdin early
/// is still judged by its status line. A status other than
/// [`LaunchOptions::success_signal`] kills the worker and returns
/// [`LaunchError::Signal`]. The child is reaped on every failure.
pub fn spawn_worker(artifact: &Path, payload: &serde_json::Value, options: &LaunchOptions) -> Result<Worker, LaunchError> {
    let body = serde_json::to_vec(payload)?;
    let mut command = match &options.program {
        Some(program) => {
            let mut command = Command::new(program);
            command.arg(artifact);
            command
        }
        None => Command::new(artifact),
    };
    let mut child = command.stdin(Stdio::piped()).stdout(Stdio::piped()).spawn()?;
    debug!(pid = child.id(), artifact = %artifact.display(), bytes = body.len(), "spawned worker");

    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(&body) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                debug!(pid = child.id(), "worker closed stdin before reading the payload");
            }
            Err(error) => {
                reap(&mut child);
                return Err(error.into());
            }
        }
    }
    let Some(stdout) = child.stdout.take() else {
        reap(&mut child);
        return Err(LaunchError::Protocol("worker stdout is not captured".to_owned()));
    };
    let mut worker = Worker {
        child,
        stdout: BufReader::new(stdout),
    };

    let mut line = String::new();
    match worker.stdout.read_line(&mut line) {
        Ok(0) => {
            worker.reap();
            return Err(LaunchError::Protocol("worker exited before signalling".to_owned()));
        }
        Ok(_) => {}
        Err(error) => {
            worker.reap();
            return Err(error.into());
        }
    }
    let actual: i64 = match line.trim().parse() {
        Ok(actual) => actual,
        Err(_) => {
            worker.reap();
            return Err(LaunchError::Protocol(format!("expected a numeric status, got {:?}", line.trim())));
        }
    };
    if actual != options.success_signal {
        warn!(pid = worker.id(), actual, expected = options.success_signal, "worker failed to start");
        worker.reap();
        return Err(LaunchError::Signal {
            expected: options.success_signal,
            actual,
        });
    }
    info!(pid = worker.id(), "worker ready");
    Ok(worker)
}

/// Installs `name` unless it is already present under [`LaunchOptions::site_dir`].
///
/// Returns `true` when the package manager ran and succeeded, `false` when the
/// package was already there.
pub fn ensure_package(name: &str, options: &LaunchOptions) -> Result<bool, LaunchError> {
    if let Some(site_dir) = &options.site_dir
        && site_dir.join(name).exists()
    {
        debug!(package = name, "package already installed");
        return Ok(false);
    }
    let Some((program, args)) = options.package_manager.split_first() else {
        return Err(LaunchError::Config("package_manager is empty".to_owned()));
    };
    info!(package = name, program, "installing package");
    let status = Command::new(program).args(args).arg(name).status()?;
    if status.success() {
        Ok(true)
    } else {
        Err(LaunchError::Install {
            package: name.to_owned(),
            code: status.code(),
        })
    }
}
