//! viewlet: remote control of an embedded, GUI-hosted web view.
//!
//! Two processes cooperate over a private loopback protocol: a [`Driver`]
//! that queues commands and correlates results, and a remote
//! ([`remote::run_remote`]) embedded next to the widget toolkit that
//! executes them on the GUI's own cadence. The widget itself stays behind
//! the [`WidgetHost`] seam; rendering, JavaScript semantics and DOM
//! resolution are its problem, not ours.

pub mod bridge;
pub mod config;
pub mod driver;
pub mod logging;
pub mod remote;
pub mod spawn;
pub mod url;
pub mod widget;

pub use bridge::protocol::{OpCode, SelectorKind};
pub use config::{ConfigError, Placement, REMOTE_CONFIG_ENV, RemoteConfig, Stacking, WindowMode};
pub use driver::{Driver, DriverConfig, DriverError};
pub use remote::{COMMAND_POLL_INTERVAL, Readiness, RemoteError, run_remote};
pub use spawn::{ProcessSpawner, RemoteLaunch, RemoteProc, RemoteSpawner, SpawnError};
pub use widget::{HeadlessWidget, ScriptOutcome, WidgetError, WidgetHost};
