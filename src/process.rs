//! External process runner
//!
//! Every external tool (the RAW converter and exiftool) is launched through
//! a [`ProcessRunner`]. The call blocks the calling thread until the child
//! exits, so batches run on a background thread; [`ProcessRunner::terminate`]
//! may be called from any other thread to kill the current child.

use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConversionError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with a status code (0 = success)
    Exited(i32),
    /// Killed by a termination signal
    Terminated,
}

/// Captured result of one invocation
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Exited(0)
    }

    pub fn was_terminated(&self) -> bool {
        self.exit == ExitKind::Terminated
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            ExitKind::Exited(code) => Some(code),
            ExitKind::Terminated => None,
        }
    }
}

/// Launches external executables one at a time
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` in `working_dir` and wait for it to exit.
    ///
    /// Fails with `MissingBinary` if the executable cannot be found. A
    /// non-zero exit is not an error at this level.
    fn run(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<ProcessOutput>;

    /// Kill the invocation currently in flight. A request that arrives
    /// while nothing runs stays pending and stops the next invocation.
    fn terminate(&self);

    /// Drop any pending terminate request. Called when a batch starts.
    fn clear_terminate(&self) {}
}

/// [`ProcessRunner`] backed by `std::process`
#[derive(Default)]
pub struct SystemRunner {
    current: Mutex<Option<Child>>,
    terminate_requested: AtomicBool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `program` can be spawned at all
    pub fn is_available(program: &Path, check_arg: &str) -> bool {
        Command::new(program)
            .arg(check_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn wait_current(&self) -> std::io::Result<ExitStatus> {
        loop {
            {
                let mut guard = self.current.lock();
                let status = match guard.as_mut() {
                    Some(child) => child.try_wait()?,
                    None => return Err(std::io::Error::new(ErrorKind::Other, "child vanished")),
                };
                if let Some(status) = status {
                    *guard = None;
                    return Ok(status);
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

#[cfg(unix)]
fn classify(status: ExitStatus, terminate_requested: bool) -> ExitKind {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (_, Some(_)) => ExitKind::Terminated,
        (Some(code), None) if terminate_requested && code != 0 => ExitKind::Terminated,
        (Some(code), None) => ExitKind::Exited(code),
        (None, None) => ExitKind::Terminated,
    }
}

#[cfg(not(unix))]
fn classify(status: ExitStatus, terminate_requested: bool) -> ExitKind {
    match status.code() {
        Some(code) if terminate_requested && code != 0 => ExitKind::Terminated,
        Some(code) => ExitKind::Exited(code),
        None => ExitKind::Terminated,
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String], working_dir: &Path) -> Result<ProcessOutput> {
        debug!("Running {} {}", program.display(), args.join(" "));

        if self.terminate_requested.load(Ordering::SeqCst) {
            debug!("Terminate pending, not starting {}", program.display());
            return Ok(ProcessOutput {
                exit: ExitKind::Terminated,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => ConversionError::MissingBinary {
                    path: PathBuf::from(program),
                },
                _ => ConversionError::Io(e),
            })?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        {
            let mut current = self.current.lock();
            *current = Some(child);
            // terminate() may have run between spawn and store
            if self.terminate_requested.load(Ordering::SeqCst) {
                if let Some(child) = current.as_mut() {
                    if let Err(e) = child.kill() {
                        warn!("Failed to terminate process {}: {}", child.id(), e);
                    }
                }
            }
        }
        let status = self.wait_current()?;

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        let exit = classify(status, self.terminate_requested.load(Ordering::SeqCst));

        debug!("{} exited: {:?}", program.display(), exit);

        Ok(ProcessOutput { exit, stdout, stderr })
    }

    fn terminate(&self) {
        let mut guard = self.current.lock();
        self.terminate_requested.store(true, Ordering::SeqCst);
        if let Some(child) = guard.as_mut() {
            if let Err(e) = child.kill() {
                warn!("Failed to terminate process {}: {}", child.id(), e);
            }
        }
    }

    fn clear_terminate(&self) {
        self.terminate_requested.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pending_terminate_stops_next_run() {
        let runner = SystemRunner::new();
        runner.terminate();
        runner.terminate();

        // Nothing is spawned, so even a missing binary reports termination
        let output = runner
            .run(Path::new("/nonexistent/x3f_extract"), &[], Path::new("."))
            .unwrap();
        assert!(output.was_terminated());

        runner.clear_terminate();
        let err = runner
            .run(Path::new("/nonexistent/x3f_extract"), &[], Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingBinary { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_available_does_not_wait_on_stdin() {
        // `cat -` would block forever on an inherited terminal
        assert!(SystemRunner::is_available(Path::new("cat"), "-"));
        assert!(!SystemRunner::is_available(Path::new("/nonexistent/exiftool"), "-ver"));
    }

    #[test]
    fn test_missing_binary() {
        let runner = SystemRunner::new();
        let err = runner
            .run(Path::new("/nonexistent/x3f_extract"), &[], Path::new("."))
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingBinary { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_exit_code() {
        let runner = SystemRunner::new();
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let output = runner.run(Path::new("sh"), &args, Path::new(".")).unwrap();

        assert_eq!(output.exit, ExitKind::Exited(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_running_process() {
        let runner = Arc::new(SystemRunner::new());
        let killer = Arc::clone(&runner);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            killer.terminate();
        });

        let args = vec!["-c".to_string(), "exec sleep 10".to_string()];
        let output = runner.run(Path::new("sh"), &args, Path::new(".")).unwrap();
        handle.join().unwrap();

        assert!(output.was_terminated());
        assert_eq!(output.exit_code(), None);
    }
}
