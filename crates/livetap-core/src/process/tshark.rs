use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};
use log::{debug, info};

use super::{CaptureLauncher, CaptureProcess, ProcessControl, ProcessExit, parse_interface_list};
use crate::error::CaptureError;

/// How long a process whose output ended may take to exit before its status
/// is treated as unknown.
const EXIT_GRACE: Duration = Duration::from_secs(2);
const EXIT_POLL: Duration = Duration::from_millis(20);
/// How long to wait for the stderr drain after the process exited.
const STDERR_SETTLE: Duration = Duration::from_millis(500);
const STDERR_TAIL_BYTES: usize = 4096;

/// Launches `tshark` (or a compatible program) as the capture process.
///
/// On unix the process is started in its own process group, so terminating
/// it also stops the `dumpcap` helper it spawns. The flip side is that a
/// Ctrl-C on the terminal no longer reaches it: the embedding program must
/// either stop captures itself or rely on `Interrupt::ctrl_c`, whose handler
/// kills every detached capture group before exiting.
#[derive(Debug, Clone)]
pub struct TsharkLauncher {
    program: PathBuf,
}

impl TsharkLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl CaptureLauncher for TsharkLauncher {
    fn list_interfaces(&self) -> Result<Vec<String>, CaptureError> {
        let output = Command::new(&self.program)
            .arg("-D")
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CaptureError::SubprocessStart {
                program: self.program_name(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::InterfaceQuery(format!(
                "`{} -D` exited with {}: {}",
                self.program_name(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(parse_interface_list(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    fn launch(&self, params: &[String]) -> Result<CaptureProcess, CaptureError> {
        let mut command = Command::new(&self.program);
        command
            .args(params)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|source| CaptureError::SubprocessStart {
                program: self.program_name(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            let mut control = ChildControl::new(child);
            let _ = control.terminate();
            return Err(CaptureError::SubprocessStart {
                program: self.program_name(),
                source: io::Error::other("capture output was not piped"),
            });
        };

        info!(
            "started {} (pid {}) with {:?}",
            self.program_name(),
            child.id(),
            params
        );
        Ok(CaptureProcess::new(stdout, ChildControl::new(child)))
    }
}

/// `ProcessControl` over a spawned child process.
///
/// Terminating kills the child (and on unix its whole process group), then
/// reaps it. Dropping an unreaped control terminates it too. When the child
/// has piped stderr, its tail is kept for `wait_exit`.
pub struct ChildControl {
    child: Child,
    stderr: Option<StderrTail>,
    reaped: bool,
}

impl ChildControl {
    pub fn new(mut child: Child) -> Self {
        let stderr = child.stderr.take().map(StderrTail::spawn);
        register_detached_group(child.id());
        Self {
            child,
            stderr,
            reaped: false,
        }
    }

    fn stderr_text(&self) -> String {
        self.stderr
            .as_ref()
            .map(StderrTail::text)
            .unwrap_or_default()
    }
}

impl ProcessControl for ChildControl {
    fn terminate(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        #[cfg(unix)]
        kill_process_group(self.child.id());
        match self.child.kill() {
            Ok(()) => {}
            // Older toolchains report an already exited child this way.
            Err(err) if err.kind() == ErrorKind::InvalidInput => {}
            Err(err) => return Err(err),
        }
        let status = self.child.wait()?;
        self.reaped = true;
        forget_detached_group(self.child.id());
        debug!("capture process {} exited: {}", self.child.id(), status);
        Ok(())
    }

    fn wait_exit(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.reaped {
            return Ok(None);
        }
        let deadline = Instant::now() + EXIT_GRACE;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                debug!(
                    "capture process {} closed its output but is still running",
                    self.child.id()
                );
                return Ok(None);
            }
            thread::sleep(EXIT_POLL);
        };
        self.reaped = true;
        forget_detached_group(self.child.id());
        debug!("capture process {} exited: {}", self.child.id(), status);
        Ok(Some(ProcessExit {
            success: status.success(),
            status: status.to_string(),
            stderr: self.stderr_text(),
        }))
    }

    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }
}

impl Drop for ChildControl {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            debug!("capture process {} cleanup failed: {}", self.child.id(), err);
        }
    }
}

/// Last `STDERR_TAIL_BYTES` a child wrote to stderr, drained on a thread so
/// the child never blocks on a full pipe.
struct StderrTail {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl StderrTail {
    fn spawn(mut stderr: ChildStderr) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = bounded(1);
        let sink = Arc::clone(&buffer);
        let spawned = thread::Builder::new()
            .name("capture-stderr".to_string())
            .spawn(move || {
                let mut chunk = [0u8; 1024];
                loop {
                    match stderr.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            let mut tail = sink.lock().unwrap_or_else(PoisonError::into_inner);
                            tail.extend_from_slice(&chunk[..n]);
                            let excess = tail.len().saturating_sub(STDERR_TAIL_BYTES);
                            tail.drain(..excess);
                        }
                        Err(err) if err.kind() == ErrorKind::Interrupted => {}
                        Err(_) => break,
                    }
                }
                let _ = done_tx.send(());
            });
        if let Err(err) = spawned {
            debug!("capture stderr is not collected: {err}");
        }
        Self { buffer, done }
    }

    fn text(&self) -> String {
        // A disconnected channel means the drain already finished.
        let _ = self.done.recv_timeout(STDERR_SETTLE);
        let tail = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&tail).trim().to_string()
    }
}

/// Process groups of capture processes that are still alive.
#[cfg(unix)]
static DETACHED_GROUPS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

#[cfg(unix)]
fn register_detached_group(pid: u32) {
    DETACHED_GROUPS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(pid);
}

#[cfg(unix)]
fn forget_detached_group(pid: u32) {
    DETACHED_GROUPS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|&group| group != pid);
}

#[cfg(not(unix))]
fn register_detached_group(_pid: u32) {}

#[cfg(not(unix))]
fn forget_detached_group(_pid: u32) {}

/// Kill every capture process group still alive.
///
/// Used when the program exits without unwinding, which skips every
/// `Drop` that would otherwise stop them. Returns how many were signalled.
#[cfg(unix)]
pub(crate) fn kill_detached_groups() -> usize {
    let groups = std::mem::take(
        &mut *DETACHED_GROUPS
            .lock()
            .unwrap_or_else(PoisonError::into_inner),
    );
    for &group in &groups {
        kill_process_group(group);
    }
    groups.len()
}

#[cfg(not(unix))]
pub(crate) fn kill_detached_groups() -> usize {
    0
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // The child leads its own group; ESRCH just means it is gone already.
    if let Err(err) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!("killpg({raw}) failed: {err}");
    }
}
