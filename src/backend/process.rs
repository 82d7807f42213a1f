//! Supervised sclang/SuperDirt process
//!
//! Boots sclang as a child process, feeds it the startup file and any
//! user synth definitions over stdin, and watches its output for the
//! handful of lines worth reacting to. All other output is noise unless
//! verbose mode forwards it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::BackendConfig;
use super::error::BackendError;

/// A line of backend output the supervisor recognized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendNotice {
    /// SuperDirt is listening; the audio server is usable
    Ready,

    /// A pattern referenced a sample the backend does not have
    UnknownSample(String),

    /// Messages arrive late; the server latency is too low
    Late,

    /// Another SuperCollider instance already owns the UDP port
    UdpPortInUse,

    /// Input and output devices run at different sample rates
    SampleRateMismatch,

    /// Unclassified output line, forwarded only in verbose mode
    Output(String),
}

/// Classify one line of sclang output
pub fn classify_line(line: &str) -> Option<BackendNotice> {
    if line.contains("listening to Tidal on port 57120") {
        return Some(BackendNotice::Ready);
    }
    if line.contains("no synth or sample") {
        let sample = line.split('\'').nth(1).unwrap_or("").to_string();
        return Some(BackendNotice::UnknownSample(sample));
    }
    if line.contains("late 0.") {
        return Some(BackendNotice::Late);
    }
    if line.contains("ERROR: failed to open UDP socket: address in use") {
        return Some(BackendNotice::UdpPortInUse);
    }
    if line.contains("Mismatched sample rates are not supported") {
        return Some(BackendNotice::SampleRateMismatch);
    }
    None
}

/// Handle to a booted backend process
pub struct BackendProcess {
    child: Child,
    stdin: ChildStdin,
    notice_rx: mpsc::UnboundedReceiver<BackendNotice>,
}

impl BackendProcess {
    /// Boot sclang and load the startup file and synth definitions
    pub async fn boot(config: &BackendConfig) -> Result<Self, BackendError> {
        debug!("BackendProcess::boot: called");

        if config.preemptive_kill {
            kill_stale_processes().await;
        }

        let sclang = config.resolve_sclang()?;
        let startup_file = config.resolve_startup_file()?;

        info!(sclang = %sclang.display(), "BackendProcess::boot: starting sclang");
        let mut command = Command::new(&sclang);
        let mut process = Self::spawn_with(&mut command, config.verbose).await?;

        process
            .send(&format!(r#"load("{}")"#, escape_sc_path(&startup_file)))
            .await?;

        let synthdef_dir = config.resolve_synthdef_dir()?;
        process.load_synthdefs(&synthdef_dir).await?;

        Ok(process)
    }

    /// Spawn the command with piped stdio and start the output monitors
    async fn spawn_with(command: &mut Command, verbose: bool) -> Result<Self, BackendError> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => BackendError::SclangNotFound,
                _ => BackendError::Io(e),
            })?;

        let stdin = child.stdin.take().ok_or(BackendError::StdinClosed)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Io(std::io::Error::other("stderr not captured")))?;

        let (tx, notice_rx) = mpsc::unbounded_channel();
        monitor_output(stdout, tx.clone(), verbose);
        monitor_output(stderr, tx, verbose);

        Ok(Self {
            child,
            stdin,
            notice_rx,
        })
    }

    /// Send code to the sclang interpreter
    ///
    /// sclang evaluates its stdin line by line, so multi-line input is
    /// collapsed into a single terminated line.
    pub async fn send(&mut self, message: &str) -> Result<(), BackendError> {
        debug!(%message, "BackendProcess::send: called");
        let mut line: String = message.lines().collect();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await.map_err(map_stdin_err)?;
        self.stdin.flush().await.map_err(map_stdin_err)?;
        Ok(())
    }

    /// Concatenate every .scd/.sc file in the directory and send it
    ///
    /// Returns how many files were loaded.
    pub async fn load_synthdefs(&mut self, dir: &Path) -> Result<usize, BackendError> {
        debug!(dir = %dir.display(), "BackendProcess::load_synthdefs: called");
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "scd" || ext == "sc")
            })
            .collect();
        files.sort();

        if files.is_empty() {
            debug!("BackendProcess::load_synthdefs: no synth definitions found");
            return Ok(0);
        }

        let mut buffer = String::new();
        for path in &files {
            buffer.push_str(&std::fs::read_to_string(path)?);
        }
        self.send(&buffer).await?;

        info!(count = files.len(), "BackendProcess::load_synthdefs: sent synth definitions");
        Ok(files.len())
    }

    /// Open the server level meter window
    pub async fn meter(&mut self) -> Result<(), BackendError> {
        self.send("s.meter()").await
    }

    /// Open the stethoscope window
    pub async fn scope(&mut self) -> Result<(), BackendError> {
        self.send("s.scope()").await
    }

    /// Open the frequency analyzer window
    pub async fn freqscope(&mut self) -> Result<(), BackendError> {
        self.send("s.freqscope()").await
    }

    /// Open the stethoscope and level meter together
    pub async fn meterscope(&mut self) -> Result<(), BackendError> {
        self.send("s.scope(); s.meter()").await
    }

    /// Next notice from the backend output, None once it terminated
    pub async fn notice(&mut self) -> Option<BackendNotice> {
        self.notice_rx.recv().await
    }

    /// Drain one notice without waiting
    pub fn try_notice(&mut self) -> Option<BackendNotice> {
        self.notice_rx.try_recv().ok()
    }

    /// Block until the backend reports ready or the timeout elapses
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<(), BackendError> {
        debug!(?timeout, "BackendProcess::wait_ready: called");
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.notice_rx.recv()).await {
                Ok(Some(BackendNotice::Ready)) => {
                    debug!("BackendProcess::wait_ready: backend ready");
                    return Ok(());
                }
                Ok(Some(notice)) => {
                    debug!(?notice, "BackendProcess::wait_ready: notice before ready");
                }
                Ok(None) => {
                    debug!("BackendProcess::wait_ready: output closed before ready");
                    return Err(BackendError::Terminated);
                }
                Err(_) => {
                    debug!("BackendProcess::wait_ready: timed out");
                    return Err(BackendError::BootTimeout(timeout));
                }
            }
        }
    }

    /// Whether the child process is still alive
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().map(|status| status.is_none()).unwrap_or(false)
    }

    /// Ask the server to shut down, then make sure the process exits
    pub async fn terminate(&mut self) -> Result<(), BackendError> {
        debug!("BackendProcess::terminate: called");
        if let Err(e) = self.send("Server.killAll; 0.exit;").await {
            warn!(error = %e, "BackendProcess::terminate: graceful shutdown command failed");
        }
        match tokio::time::timeout(Duration::from_secs(3), self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "BackendProcess::terminate: exited");
                Ok(())
            }
            Ok(Err(e)) => Err(BackendError::Io(e)),
            Err(_) => {
                warn!("BackendProcess::terminate: did not exit in time, killing");
                self.kill().await
            }
        }
    }

    /// Force the child process to exit immediately
    pub async fn kill(&mut self) -> Result<(), BackendError> {
        debug!("BackendProcess::kill: called");
        self.child.kill().await?;
        Ok(())
    }
}

/// Kill leftover SuperCollider processes from previous sessions
///
/// A stale scsynth keeps the UDP port and blocks the new boot. Failures
/// are ignored; pkill exits nonzero when nothing matched.
async fn kill_stale_processes() {
    for name in ["sclang", "scsynth", "scide"] {
        debug!(%name, "BackendProcess::boot: killing stale processes");
        if let Err(e) = Command::new("pkill").arg(name).output().await {
            debug!(%name, error = %e, "BackendProcess::boot: pkill unavailable");
        }
    }
}

/// Forward classified output lines from one stream into the channel
fn monitor_output<R>(reader: R, tx: mpsc::UnboundedSender<BackendNotice>, verbose: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(notice) = classify_line(&line) {
                        match &notice {
                            BackendNotice::Ready => info!("Audio server ready"),
                            BackendNotice::UnknownSample(name) => {
                                warn!(sample = %name, "Sample not found")
                            }
                            BackendNotice::Late => warn!("Late messages, increase server latency"),
                            BackendNotice::UdpPortInUse => {
                                warn!("UDP port in use, another SuperCollider instance is running")
                            }
                            BackendNotice::SampleRateMismatch => {
                                warn!("Mismatched sample rates between input and output devices")
                            }
                            BackendNotice::Output(_) => {}
                        }
                        if tx.send(notice).is_err() {
                            break;
                        }
                    } else {
                        debug!(%line, "backend output");
                        if verbose && tx.send(BackendNotice::Output(line)).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "backend output stream closed");
                    break;
                }
            }
        }
    });
}

fn map_stdin_err(e: std::io::Error) -> BackendError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe => BackendError::StdinClosed,
        _ => BackendError::Io(e),
    }
}

/// Escape a path for embedding in a double-quoted sclang string
fn escape_sc_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "\\\\").replace('"', "\\\"")
}
