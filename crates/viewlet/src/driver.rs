//! Driver end of the control channel.
//!
//! Owns the listening endpoint, spawns the remote process, and serializes
//! concurrent [`Driver::execute`] calls into a single lockstep exchange:
//! a connection-server task drains a submission channel, sends each
//! command framed, waits for exactly one result, and delivers it to the
//! caller through the per-request channel keyed by the request id. A
//! liveness watcher closes the session when the remote process dies, so
//! blocked callers fail within bounded time instead of waiting forever.

use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::bridge::channel::FramedChannel;
use crate::bridge::protocol::{OpCode, Outcome, RequestId, SelectorKind, WireCommand, WireResult};
use crate::config::{RemoteConfig, WindowMode};
use crate::spawn::{ProcessSpawner, RemoteLaunch, RemoteProc, RemoteSpawner, SpawnError};
use crate::url::is_valid_url;

/// How often the liveness watcher checks the remote process.
const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Script returning the page's outer HTML.
const GET_HTML_SCRIPT: &str = r#"return document.querySelector("html").outerHTML;"#;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The remote process died or the connection to it was lost.
    #[error("remote exited")]
    RemoteExited,

    #[error("invalid url: {0:?}")]
    InvalidUrl(String),

    /// The widget reported a fault while executing a script.
    #[error("script execution fault: {output}")]
    ScriptExecutionFault { script: String, output: String },

    /// The widget reported a fault on a non-script operation.
    #[error("remote fault: {0}")]
    RemoteFault(String),

    /// The configured execute timeout elapsed before a result arrived.
    #[error("no result within {0:?}")]
    Timeout(Duration),

    #[error("script file not found: {0}")]
    ScriptFileMissing(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Driver construction parameters.
pub struct DriverConfig {
    starting_url: String,
    window_mode: Option<WindowMode>,
    flags: Vec<String>,
    execute_timeout: Option<Duration>,
    spawner: Arc<dyn RemoteSpawner>,
}

impl DriverConfig {
    pub fn new(starting_url: impl Into<String>) -> Self {
        Self {
            starting_url: starting_url.into(),
            window_mode: None,
            flags: Vec::new(),
            execute_timeout: None,
            spawner: Arc::new(ProcessSpawner::new("viewlet-headless")),
        }
    }

    pub fn with_window_mode(mut self, mode: WindowMode) -> Self {
        self.window_mode = Some(mode);
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    /// Bound each `execute` wait. Off by default: callers block until the
    /// remote answers or dies.
    pub fn with_execute_timeout(mut self, timeout: Duration) -> Self {
        self.execute_timeout = Some(timeout);
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn RemoteSpawner>) -> Self {
        self.spawner = spawner;
        self
    }
}

struct Submission {
    cmd: WireCommand,
    reply: oneshot::Sender<WireResult>,
}

/// Controller for one remote session.
///
/// Safe to share across tasks: `execute` takes `&self` and concurrent
/// calls are serialized through the submission channel in append order.
pub struct Driver {
    cmd_tx: mpsc::UnboundedSender<Submission>,
    proc: Arc<StdMutex<Box<dyn RemoteProc>>>,
    session: CancellationToken,
    next_id: AtomicU64,
    hidden: AtomicBool,
    execute_timeout: Option<Duration>,
    port: u16,
}

fn lock_proc(proc: &StdMutex<Box<dyn RemoteProc>>) -> std::sync::MutexGuard<'_, Box<dyn RemoteProc>> {
    match proc.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Driver {
    /// Bind the listening endpoint, spawn the remote process, and start
    /// the connection-server and liveness-watcher tasks.
    pub async fn launch(config: DriverConfig) -> Result<Self, DriverError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        tracing::debug!(port, "listening for remote");

        let remote_config = RemoteConfig {
            starting_url: config.starting_url.clone(),
            connection_port: port,
            window_mode: config.window_mode,
            flags: config.flags.clone(),
        };

        let proc = config.spawner.spawn(&RemoteLaunch {
            config: remote_config,
        })?;
        let proc = Arc::new(StdMutex::new(proc));

        let session = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(connection_server(listener, cmd_rx, session.clone()));
        tokio::spawn(watch_liveness(Arc::clone(&proc), session.clone()));

        Ok(Self {
            cmd_tx,
            proc,
            session,
            next_id: AtomicU64::new(1),
            hidden: AtomicBool::new(false),
            execute_timeout: config.execute_timeout,
            port,
        })
    }

    /// Port the driver is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the remote process is still running.
    pub fn remote_alive(&self) -> bool {
        lock_proc(&self.proc).is_alive()
    }

    /// Forcibly kill the remote process.
    pub fn terminate_remote(&self) {
        lock_proc(&self.proc).kill();
    }

    /// Send one command and wait for its result.
    ///
    /// Blocks until the remote answers, the session closes, the remote
    /// process dies, or the configured timeout elapses.
    pub async fn execute(&self, op: OpCode, arg: impl Into<String>) -> Result<String, DriverError> {
        if !self.remote_alive() {
            return Err(DriverError::RemoteExited);
        }

        let cmd = WireCommand {
            id: RequestId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            op,
            arg: arg.into(),
        };
        tracing::debug!(request = cmd.id.0, op = op.name(), "submitting command");

        let (reply_tx, reply_rx) = oneshot::channel();
        let script = cmd.arg.clone();
        self.cmd_tx
            .send(Submission {
                cmd,
                reply: reply_tx,
            })
            .map_err(|_| DriverError::RemoteExited)?;

        let result = self.wait_for_result(reply_rx).await?;
        match result.outcome {
            Outcome::Success(text) => Ok(text),
            Outcome::Fault(output) if op == OpCode::RunScript => {
                Err(DriverError::ScriptExecutionFault { script, output })
            }
            Outcome::Fault(output) => Err(DriverError::RemoteFault(output)),
        }
    }

    async fn wait_for_result(
        &self,
        reply_rx: oneshot::Receiver<WireResult>,
    ) -> Result<WireResult, DriverError> {
        let wait = async {
            tokio::select! {
                biased;
                result = reply_rx => result.map_err(|_| DriverError::RemoteExited),
                _ = self.session.cancelled() => Err(DriverError::RemoteExited),
            }
        };
        match self.execute_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| DriverError::Timeout(timeout))?,
            None => wait.await,
        }
    }

    /// Write `script` to a transient file and execute it. The file is
    /// removed on every exit path.
    pub async fn execute_script(&self, script: &str) -> Result<String, DriverError> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;
        let path = file.path().display().to_string();
        self.execute(OpCode::RunScript, path).await
    }

    /// Execute the script stored at `path`.
    pub async fn execute_script_file(&self, path: impl AsRef<Path>) -> Result<String, DriverError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DriverError::ScriptFileMissing(path.display().to_string()));
        }
        self.execute(OpCode::RunScript, path.display().to_string())
            .await
    }

    /// Navigate the remote to `url` after validating its syntax. Rejected
    /// URLs never reach the transport.
    pub async fn open(&self, url: &str) -> Result<(), DriverError> {
        if !is_valid_url(url) {
            return Err(DriverError::InvalidUrl(url.to_string()));
        }
        tracing::info!(url, "navigating");
        self.execute(OpCode::Navigate, url).await.map(drop)
    }

    /// Click the element matched by `selector`.
    pub async fn click(&self, selector: &str, kind: SelectorKind) -> Result<(), DriverError> {
        self.execute(OpCode::Click, format!("{}{}", kind.wire_prefix(), selector))
            .await
            .map(drop)
    }

    pub async fn hide_window(&self) -> Result<(), DriverError> {
        self.execute(OpCode::Hide, "").await?;
        self.hidden.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Show the window again; a no-op with a warning when it is not
    /// currently recorded as hidden.
    pub async fn show_window(&self) -> Result<(), DriverError> {
        if !self.hidden.load(Ordering::SeqCst) {
            tracing::warn!("ignoring show_window, window is not hidden");
            return Ok(());
        }
        self.execute(OpCode::Show, "").await?;
        self.hidden.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Swap the hosted page for the named one.
    pub async fn set_page(&self, name: &str) -> Result<(), DriverError> {
        self.execute(OpCode::SetPage, name).await.map(drop)
    }

    pub async fn current_url(&self) -> Result<String, DriverError> {
        self.execute(OpCode::CurrentUrl, "").await
    }

    /// Outer HTML of the current page.
    pub async fn page_html(&self) -> Result<String, DriverError> {
        self.execute_script(GET_HTML_SCRIPT).await
    }

    /// Ask the remote to close its window and exit.
    pub async fn close(&self) -> Result<(), DriverError> {
        self.execute(OpCode::Close, "").await.map(drop)
    }

    /// Alias for [`Driver::close`].
    pub async fn quit(&self) -> Result<(), DriverError> {
        self.close().await
    }
}

impl Drop for Driver {
    /// Don't leave an orphaned GUI process behind.
    fn drop(&mut self) {
        self.session.cancel();
        lock_proc(&self.proc).kill();
    }
}

/// Accept the single remote connection, then drain submissions in order:
/// one command out, one result in, delivered to the waiting caller.
async fn connection_server(
    listener: TcpListener,
    mut cmd_rx: mpsc::UnboundedReceiver<Submission>,
    session: CancellationToken,
) {
    let stream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, addr)) => {
                tracing::debug!(%addr, "remote connected");
                stream
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                session.cancel();
                return;
            }
        },
        _ = session.cancelled() => return,
    };

    let mut channel = FramedChannel::new(stream);

    loop {
        let Submission { cmd, reply } = tokio::select! {
            submission = cmd_rx.recv() => match submission {
                Some(submission) => submission,
                None => break,
            },
            _ = session.cancelled() => break,
        };

        if let Err(e) = channel.send(cmd.encode().as_bytes()).await {
            tracing::error!(error = %e, "send failed, closing session");
            break;
        }

        let raw = match channel.recv().await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "receive failed, closing session");
                break;
            }
        };

        let result = match std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| WireResult::decode(text).ok())
        {
            Some(result) => result,
            None => {
                tracing::error!("malformed result payload, closing session");
                break;
            }
        };

        if result.id != cmd.id {
            tracing::error!(
                sent = cmd.id.0,
                got = result.id.0,
                "result correlation mismatch, closing session"
            );
            break;
        }

        if reply.send(result).is_err() {
            // Caller stopped waiting (timeout); the exchange itself still
            // completed, so the session stays healthy.
            tracing::debug!(request = cmd.id.0, "result dropped, caller gone");
        }
    }

    session.cancel();
}

/// Cancel the session as soon as the remote process is observed dead.
async fn watch_liveness(proc: Arc<StdMutex<Box<dyn RemoteProc>>>, session: CancellationToken) {
    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = tokio::time::sleep(LIVENESS_POLL_INTERVAL) => {}
        }
        if !lock_proc(&proc).is_alive() {
            tracing::warn!("remote process exited, closing session");
            session.cancel();
            return;
        }
    }
}
