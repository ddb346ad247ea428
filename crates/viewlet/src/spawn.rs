//! Remote process supervision.
//!
//! The spawner seam keeps process creation out of the driver so tests can
//! substitute in-process remotes; the default strategy launches a worker
//! binary as a detached child with the config bundle in its environment.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::{Child, Command};

use crate::config::{REMOTE_CONFIG_ENV, RemoteConfig};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn remote process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to encode remote config: {0}")]
    Config(String),
}

/// Everything a spawner needs to start one remote.
#[derive(Debug, Clone)]
pub struct RemoteLaunch {
    pub config: RemoteConfig,
}

/// Handle to a running remote, however it was started.
pub trait RemoteProc: Send {
    /// Whether the remote is still running.
    fn is_alive(&mut self) -> bool;

    /// Forcibly terminate the remote. Best effort, idempotent.
    fn kill(&mut self);

    /// OS process id, when the remote is a real process.
    fn id(&self) -> Option<u32>;
}

/// Extension point for remote start strategies.
pub trait RemoteSpawner: Send + Sync {
    fn spawn(&self, launch: &RemoteLaunch) -> Result<Box<dyn RemoteProc>, SpawnError>;
}

/// Spawns the remote as a detached OS process.
pub struct ProcessSpawner {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Extra environment for the child, on top of the config bundle.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl RemoteSpawner for ProcessSpawner {
    fn spawn(&self, launch: &RemoteLaunch) -> Result<Box<dyn RemoteProc>, SpawnError> {
        let bundle = serde_json::to_string(&launch.config)
            .map_err(|e| SpawnError::Config(e.to_string()))?;

        tracing::debug!(
            program = %self.program,
            port = launch.config.connection_port,
            "spawning remote process"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(REMOTE_CONFIG_ENV, bundle)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let child = command.spawn()?;
        tracing::debug!(pid = child.id(), "remote process started");
        Ok(Box::new(ChildProc { child }))
    }
}

struct ChildProc {
    child: Child,
}

impl RemoteProc for ChildProc {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "kill failed, remote already gone");
        }
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_of_nonexistent_program_fails() {
        let spawner = ProcessSpawner::new("/nonexistent/viewlet-remote");
        let launch = RemoteLaunch {
            config: RemoteConfig {
                starting_url: "http://localhost:1/".to_string(),
                connection_port: 1,
                window_mode: None,
                flags: Vec::new(),
            },
        };
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        assert!(matches!(
            spawner.spawn(&launch),
            Err(SpawnError::Spawn(_))
        ));
    }
}
