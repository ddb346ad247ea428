//! Remote end of the control channel.
//!
//! [`run_remote`] hosts two cooperating loops: a socket client task that
//! owns the framed channel and exchanges exactly one result per command,
//! and a GUI-affine execution tick that drives the widget. The tick never
//! blocks; operations waiting on a toolkit callback re-arm and are polled
//! again on the next tick. A command received while a page load is in
//! progress is accepted but deferred until the widget reports ready.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::bridge::channel::{ChannelError, FramedChannel};
use crate::bridge::protocol::{
    OpCode, ProtocolError, RequestId, SelectorKind, WireCommand, WireResult,
};
use crate::config::{RemoteConfig, WindowMode};
use crate::widget::WidgetHost;

/// Interval between execution ticks.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Load-lifecycle gate: true only while no navigation is in progress.
///
/// Cloned into whatever wires up the widget's load signals; only
/// [`Readiness::load_started`] and [`Readiness::load_finished`] ever
/// mutate it.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_started(&self) {
        self.ready.store(false, Ordering::SeqCst);
        tracing::debug!("load started, deferring commands");
    }

    pub fn load_finished(&self) {
        self.ready.store(true, Ordering::SeqCst);
        tracing::debug!("load finished, ready for commands");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("failed to connect to driver port {port}: {source}")]
    Connect {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("widget startup failed: {0}")]
    Widget(#[from] crate::widget::WidgetError),
}

/// The single in-flight command, parked between the client task and the
/// execution tick.
struct Pending {
    cmd: WireCommand,
    reply: oneshot::Sender<WireResult>,
    state: OpState,
}

enum OpState {
    NotStarted,
    /// Waiting on a toolkit callback; polled on later ticks.
    InFlight,
}

fn lock_slot(slot: &StdMutex<Option<Pending>>) -> std::sync::MutexGuard<'_, Option<Pending>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One-command-per-tick executor bound to the GUI-affine context.
struct Executor<W> {
    widget: W,
    readiness: Readiness,
    window_mode: WindowMode,
    closed: bool,
}

impl<W: WidgetHost> Executor<W> {
    /// Advance the pending command by one step, completing it if its
    /// widget work has finished. No-op while a load is in progress.
    fn tick(&mut self, slot: &mut Option<Pending>) {
        if !self.readiness.is_ready() {
            return;
        }
        let Some(pending) = slot.as_mut() else {
            return;
        };

        if let Some(result) = self.step(pending) {
            tracing::debug!(request = result.id.0, "command finished");
            let Some(pending) = slot.take() else {
                return;
            };
            if pending.reply.send(result).is_err() {
                tracing::warn!("client task gone before result delivery");
            }
        }
    }

    fn step(&mut self, pending: &mut Pending) -> Option<WireResult> {
        let id = pending.cmd.id;
        match pending.cmd.op {
            OpCode::RunScript => match pending.state {
                OpState::NotStarted => {
                    if let Err(e) = self.widget.begin_script(Path::new(&pending.cmd.arg)) {
                        return Some(WireResult::fault(id, e.to_string()));
                    }
                    pending.state = OpState::InFlight;
                    None
                }
                OpState::InFlight => match self.widget.poll_script() {
                    None => None,
                    Some(Ok(Some(value))) => Some(WireResult::success(id, value)),
                    Some(Ok(None)) => Some(WireResult::done(id)),
                    Some(Err(e)) => Some(WireResult::fault(id, e.to_string())),
                },
            },
            OpCode::Click => match pending.state {
                OpState::NotStarted => {
                    let (kind, selector) = match SelectorKind::split(&pending.cmd.arg) {
                        Ok(parts) => parts,
                        Err(e) => return Some(WireResult::fault(id, e.to_string())),
                    };
                    if let Err(e) = self.widget.begin_element_lookup(kind, selector) {
                        return Some(WireResult::fault(id, e.to_string()));
                    }
                    pending.state = OpState::InFlight;
                    None
                }
                OpState::InFlight => match self.widget.poll_element_position() {
                    None => None,
                    Some(Ok((x, y))) => Some(match self.widget.click_at(x, y) {
                        Ok(()) => WireResult::done(id),
                        Err(e) => WireResult::fault(id, e.to_string()),
                    }),
                    Some(Err(e)) => Some(WireResult::fault(id, e.to_string())),
                },
            },
            OpCode::Navigate => Some(match self.widget.navigate(&pending.cmd.arg) {
                Ok(()) => WireResult::done(id),
                Err(e) => WireResult::fault(id, e.to_string()),
            }),
            OpCode::Hide => Some(match self.widget.hide() {
                Ok(()) => WireResult::done(id),
                Err(e) => WireResult::fault(id, e.to_string()),
            }),
            OpCode::Show => Some(match self.widget.show(self.window_mode) {
                Ok(()) => WireResult::done(id),
                Err(e) => WireResult::fault(id, e.to_string()),
            }),
            OpCode::SetPage => Some(match self.widget.set_page(&pending.cmd.arg) {
                Ok(()) => WireResult::done(id),
                Err(e) => WireResult::fault(id, e.to_string()),
            }),
            OpCode::CurrentUrl => Some(WireResult::success(id, self.widget.current_url())),
            OpCode::Close => {
                self.widget.close();
                self.closed = true;
                Some(WireResult::done(id))
            }
        }
    }
}

/// Socket side of the remote: one framed command in, one framed result
/// out, strictly alternating. Ends the session on peer disconnect, on any
/// malformed frame without a parsable request id, and after answering a
/// close command.
async fn client_loop<S: AsyncRead + AsyncWrite + Unpin>(
    mut channel: FramedChannel<S>,
    slot: Arc<StdMutex<Option<Pending>>>,
    session: CancellationToken,
) {
    loop {
        let raw = match channel.recv().await {
            Ok(raw) => raw,
            Err(ChannelError::Disconnected) => {
                tracing::warn!("driver disconnected, shutting down");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "transport failure");
                break;
            }
        };

        let text = match String::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "non-UTF-8 command payload");
                break;
            }
        };

        let cmd = match WireCommand::decode(&text) {
            Ok(cmd) => cmd,
            Err(ProtocolError::UnknownOperation { request, op }) => {
                // Version mismatch: answer the caller instead of silently
                // dropping the command.
                tracing::error!(request, op, "unknown operation id");
                let fault = WireResult::fault(
                    RequestId(request),
                    format!("unknown operation id {op:02}"),
                );
                if channel.send(fault.encode().as_bytes()).await.is_err() {
                    break;
                }
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "malformed command, closing session");
                break;
            }
        };

        tracing::info!(request = cmd.id.0, op = cmd.op.name(), "command received");
        let is_close = cmd.op == OpCode::Close;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut slot = lock_slot(&slot);
            if slot.is_some() {
                // Lockstep exchange: the driver never sends a second
                // command before consuming the first result.
                tracing::error!("command arrived while one was pending, closing session");
                break;
            }
            *slot = Some(Pending {
                cmd,
                reply: reply_tx,
                state: OpState::NotStarted,
            });
        }

        let result = match reply_rx.await {
            Ok(result) => result,
            Err(_) => break,
        };

        if let Err(e) = channel.send(result.encode().as_bytes()).await {
            tracing::error!(error = %e, "failed to send result");
            break;
        }

        if is_close {
            tracing::info!("close acknowledged, ending session");
            break;
        }
    }

    session.cancel();
}

/// Run the remote end: connect out to the driver, then serve commands
/// until a close command or peer disconnect.
///
/// The caller supplies the widget and the [`Readiness`] handle its load
/// signals are wired to. The returned future is the GUI-affine execution
/// context; widget methods are only ever called from it.
pub async fn run_remote<W: WidgetHost>(
    mut widget: W,
    config: RemoteConfig,
    readiness: Readiness,
) -> Result<(), RemoteError> {
    widget.apply_flags(&config.flags)?;
    widget.navigate(&config.starting_url)?;
    let window_mode = config.window_mode.unwrap_or_default();
    widget.show(window_mode)?;

    let stream = TcpStream::connect(("127.0.0.1", config.connection_port))
        .await
        .map_err(|source| RemoteError::Connect {
            port: config.connection_port,
            source,
        })?;
    tracing::info!(port = config.connection_port, "connected to driver");

    let slot: Arc<StdMutex<Option<Pending>>> = Arc::new(StdMutex::new(None));
    let session = CancellationToken::new();

    let client = tokio::spawn(client_loop(
        FramedChannel::new(stream),
        Arc::clone(&slot),
        session.clone(),
    ));

    let mut executor = Executor {
        widget,
        readiness,
        window_mode,
        closed: false,
    };

    let mut ticks = tokio::time::interval(COMMAND_POLL_INTERVAL);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            _ = ticks.tick() => {
                let mut slot = lock_slot(&slot);
                executor.tick(&mut slot);
            }
        }
    }

    if !executor.closed {
        // Peer disconnect: take the window down with the session.
        executor.widget.close();
    }

    let _ = client.await;
    tracing::info!("remote exiting");
    Ok(())
}
