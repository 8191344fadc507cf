//! Agent command runner: feeds the prompt on stdin, captures bounded output,
//! and kills the child's process group once the step timeout expires.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long to keep reading output after a timed-out command was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// One output stream, cut off after a byte limit.
#[derive(Debug, Default)]
pub struct Capture {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and thrown away.
    pub dropped: usize,
}

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// What an agent command left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Capture,
    pub stderr: Capture,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Both streams as one log, with notes for dropped bytes and timeouts.
    pub fn render_log(&self) -> String {
        let mut log = String::new();
        for (name, capture) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            log.push_str(&format!("=== {name} ===\n{}\n", capture.text()));
            if capture.dropped > 0 {
                log.push_str(&format!("[{name} truncated {} bytes]\n", capture.dropped));
            }
        }
        if self.timed_out {
            log.push_str("[command timed out]\n");
        }
        log
    }
}

/// Run `cmd`, writing `stdin` to it, for at most `timeout`.
///
/// Each output pipe is drained on its own thread and keeps at most
/// `output_limit_bytes`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(stdin.map_or_else(Stdio::null, |_| Stdio::piped()))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    debug!(program = ?cmd.get_program(), "spawning agent command");
    let mut child = cmd.spawn().context("spawn agent command")?;

    let stdout = drain(child.stdout.take(), "stdout", output_limit_bytes)?;
    let stderr = drain(child.stderr.take(), "stderr", output_limit_bytes)?;
    if let Some(input) = stdin {
        feed_stdin(&mut child, input)?;
    }

    let waited = child
        .wait_timeout(timeout)
        .context("wait for agent command")?;
    let (status, timed_out) = match waited {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "agent command timed out, killing");
            kill_tree(&mut child)?;
            (child.wait().context("reap agent command")?, true)
        }
    };

    let grace = timed_out.then_some(DRAIN_GRACE);
    let output = CommandOutput {
        status,
        stdout: collect(stdout, "stdout", grace)?,
        stderr: collect(stderr, "stderr", grace)?,
        timed_out,
    };
    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        warn!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "agent output truncated"
        );
    }
    debug!(exit_code = ?output.status.code(), timed_out, "agent command finished");
    Ok(output)
}

/// Write the prompt and close stdin. A child that exits without reading is fine.
fn feed_stdin(child: &mut Child, input: &[u8]) -> Result<()> {
    let mut pipe = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("agent stdin was not piped"))?;
    match pipe.write_all(input) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            debug!("agent closed stdin before reading it");
            Ok(())
        }
        Err(err) => Err(err).context("write agent stdin"),
    }
}

/// Kill the command and everything it spawned into its process group.
fn kill_tree(child: &mut Child) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pgid) = i32::try_from(child.id())
            && let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL)
        {
            debug!(%err, "killpg failed, killing the direct child only");
        }
    }
    match child.kill() {
        Err(err) if err.kind() != ErrorKind::InvalidInput => {
            Err(err).context("kill agent command")
        }
        _ => Ok(()),
    }
}

fn drain<R>(pipe: Option<R>, name: &str, limit: usize) -> Result<Receiver<Result<Capture>>>
where
    R: Read + Send + 'static,
{
    let pipe = pipe.ok_or_else(|| anyhow!("agent {name} was not piped"))?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller stopped waiting.
        tx.send(capture_limited(pipe, limit)).ok();
    });
    Ok(rx)
}

/// Wait for a reader thread, at most `grace` when given.
///
/// A reader still blocked after the grace period means some process outside
/// the killed group holds the pipe; its output is abandoned.
fn collect(
    rx: Receiver<Result<Capture>>,
    name: &str,
    grace: Option<Duration>,
) -> Result<Capture> {
    let received = match grace {
        Some(grace) => rx.recv_timeout(grace),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(capture) => capture.with_context(|| format!("read agent {name}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = name, "agent output still open after kill, abandoning it");
            Ok(Capture::default())
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{name} reader thread panicked")),
    }
}

fn capture_limited<R: Read>(mut pipe: R, limit: usize) -> Result<Capture> {
    let mut capture = Capture::default();
    let mut chunk = [0u8; 8192];
    loop {
        let read = pipe.read(&mut chunk)?;
        if read == 0 {
            return Ok(capture);
        }
        let room = limit.saturating_sub(capture.bytes.len()).min(read);
        capture.bytes.extend_from_slice(&chunk[..room]);
        capture.dropped += read - room;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn feeds_stdin_and_captures_both_streams() {
        let output = run_command_with_timeout(
            sh("cat; echo done >&2"),
            Some(b"hello"),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout.text(), "hello");
        assert_eq!(output.stderr.text().trim(), "done");
        assert!(!output.timed_out);
    }

    #[test]
    fn drops_bytes_past_the_limit() {
        let output = run_command_with_timeout(
            sh("printf '0123456789'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout.bytes, b"0123");
        assert_eq!(output.stdout.dropped, 6);
        assert!(output.render_log().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn child_ignoring_stdin_is_not_an_error() {
        let input = vec![b'x'; 1 << 20];
        let output = run_command_with_timeout(
            sh("exit 0"),
            Some(input.as_slice()),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert!(output.status.success());
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_command_with_timeout(
            sh("exec sleep 5"),
            None,
            Duration::from_millis(100),
            1_000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(output.render_log().contains("[command timed out]"));
    }

    #[test]
    fn timeout_also_kills_spawned_children() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("echo begin; sleep 5; true"),
            None,
            Duration::from_millis(200),
            1_000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
