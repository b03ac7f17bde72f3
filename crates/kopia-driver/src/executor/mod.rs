use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Container the engine runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

#[derive(Debug)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub result: Result<()>,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            result: Ok(()),
        }
    }

    pub fn failed(stdout: impl Into<String>, stderr: impl Into<String>, err: Error) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            result: Err(err),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.result.as_ref().err().map(ToString::to_string)
    }
}

/// Runs one command inside a container and returns everything it printed.
pub trait PodExec: Send + Sync {
    fn exec(&self, target: &ExecTarget, argv: &[String]) -> ExecOutput;

    /// UID of a namespace, used to build the maintenance owner.
    fn namespace_uid(&self, namespace: &str) -> Result<String> {
        Err(Error::msg(format!(
            "namespace uid lookup is not supported (namespace '{namespace}')"
        )))
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
    deadline: Option<Instant>,
}

/// Cancellation shared between a caller and long-running work. A token may
/// also carry a deadline, after which it reads as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            state: Arc::new(CancelState {
                deadline: Some(deadline),
                ..Default::default()
            }),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        if let Ok(mut g) = self.state.cancelled.lock() {
            *g = true;
        }
        self.state.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let flagged = self.state.cancelled.lock().map(|g| *g).unwrap_or(true);
        flagged || self.deadline_passed()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.state
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn deadline_passed(&self) -> bool {
        self.state.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleeps for up to `dur`. Returns true if the token was cancelled
    /// before or during the sleep.
    pub fn sleep(&self, dur: Duration) -> bool {
        let until = Instant::now() + dur;
        let Ok(mut flagged) = self.state.cancelled.lock() else {
            return true;
        };
        loop {
            if *flagged || self.deadline_passed() {
                return true;
            }
            let now = Instant::now();
            if now >= until {
                return false;
            }
            let mut wait = until - now;
            if let Some(left) = self.remaining() {
                wait = wait.min(left.max(Duration::from_millis(1)));
            }
            match self.state.wake.wait_timeout(flagged, wait) {
                Ok((g, _)) => flagged = g,
                Err(_) => return true,
            }
        }
    }
}

/// Runs `argv` on a worker thread so the caller can stop waiting as soon as
/// `cancel` fires. An abandoned exec keeps running until the collaborator
/// returns; its output is dropped.
pub fn exec_cancellable(
    exec: Arc<dyn PodExec>,
    target: &ExecTarget,
    argv: Vec<String>,
    cancel: &CancelToken,
) -> Result<ExecOutput> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled("cancelled before exec started"));
    }
    let (tx, rx) = mpsc::channel::<ExecOutput>();
    let target_owned = target.clone();
    std::thread::spawn(move || {
        let out = exec.exec(&target_owned, &argv);
        let _ = tx.send(out);
    });

    loop {
        match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(out) => return Ok(out),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    debug!(pod = %target.pod, "abandoning in-flight exec after cancellation");
                    return Err(Error::cancelled("cancelled while waiting for exec"));
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(Error::msg("exec worker exited without a result"));
            }
        }
    }
}

/// `kubectl exec` based implementation.
#[derive(Debug, Clone)]
pub struct KubectlExec {
    kubectl: String,
    cancel: Option<CancelToken>,
}

impl Default for KubectlExec {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".into(),
            cancel: None,
        }
    }
}

impl KubectlExec {
    pub fn new(kubectl: impl Into<String>) -> Self {
        Self {
            kubectl: kubectl.into(),
            cancel: None,
        }
    }

    /// Kill the local kubectl process group when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn run(&self, mut cmd: Command) -> ExecOutput {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so cancellation reaches every child.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = match cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                let err = Error::msg(format!("spawn {} failed: {e}", self.kubectl));
                return ExecOutput::failed("", "", err);
            }
        };

        let stdout = child.stdout.take().map(|s| std::thread::spawn(move || read_all(s)));
        let stderr = child.stderr.take().map(|s| std::thread::spawn(move || read_all(s)));

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => {}
                Err(e) => break Err(Error::msg(format!("wait failed: {e}"))),
            }
            let cancelled = match &self.cancel {
                Some(c) => c.sleep(CANCEL_POLL_INTERVAL),
                None => {
                    std::thread::sleep(CANCEL_POLL_INTERVAL);
                    false
                }
            };
            if cancelled {
                kill_group(child.id());
                let _ = child.wait();
                break Err(Error::cancelled("exec cancelled"));
            }
        };

        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        match status {
            Ok(s) if s.success() => ExecOutput::ok(stdout, stderr),
            Ok(s) => {
                let err = match s.code() {
                    Some(code) => Error::msg(format!("command terminated with exit code {code}")),
                    None => Error::msg(format!("command terminated: {s}")),
                };
                ExecOutput::failed(stdout, stderr, err)
            }
            Err(e) => ExecOutput::failed(stdout, stderr, e),
        }
    }
}

impl PodExec for KubectlExec {
    fn exec(&self, target: &ExecTarget, argv: &[String]) -> ExecOutput {
        let mut cmd = Command::new(&self.kubectl);
        cmd.arg("exec")
            .arg("-n")
            .arg(&target.namespace)
            .arg(&target.pod)
            .arg("-c")
            .arg(&target.container)
            .arg("--")
            .args(argv);
        self.run(cmd)
    }

    fn namespace_uid(&self, namespace: &str) -> Result<String> {
        let out = Command::new(&self.kubectl)
            .args(["get", "namespace", namespace, "-o", "jsonpath={.metadata.uid}"])
            .output()
            .map_err(|e| Error::msg(format!("spawn {} failed: {e}", self.kubectl)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::msg(format!(
                "failed to look up namespace '{namespace}': {}",
                stderr.trim()
            )));
        }
        let uid = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if uid.is_empty() {
            return Err(Error::msg(format!("namespace '{namespace}' has no uid")));
        }
        Ok(uid)
    }
}

fn read_all<R: Read>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf) {
        warn!("failed reading exec output: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn kill_group(pgid: u32) {
    #[cfg(unix)]
    {
        let Ok(pgid) = i32::try_from(pgid) else {
            return;
        };
        unsafe {
            libc::kill(-pgid, libc::SIGTERM);
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowExec(Duration);

    impl PodExec for SlowExec {
        fn exec(&self, _target: &ExecTarget, _argv: &[String]) -> ExecOutput {
            std::thread::sleep(self.0);
            ExecOutput::ok("done", "")
        }
    }

    fn target() -> ExecTarget {
        ExecTarget {
            namespace: "ns".into(),
            pod: "pod".into(),
            container: "c".into(),
        }
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let token = CancelToken::new();
        let t2 = token.clone();
        let h = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            t2.cancel();
        });
        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        h.join().unwrap();
    }

    #[test]
    fn deadline_marks_token_cancelled() {
        let token = CancelToken::with_timeout(Duration::from_millis(10));
        assert!(token.sleep(Duration::from_secs(10)));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancellable_exec_stops_waiting() {
        let token = CancelToken::with_timeout(Duration::from_millis(30));
        let start = Instant::now();
        let slow = Arc::new(SlowExec(Duration::from_secs(5)));
        let err = exec_cancellable(slow, &target(), vec![], &token).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancellable_exec_returns_output() {
        let out = exec_cancellable(
            Arc::new(SlowExec(Duration::from_millis(1))),
            &target(),
            vec!["x".into()],
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.stdout, "done");
        assert!(out.result.is_ok());
    }
}
