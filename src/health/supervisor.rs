//! Process supervisor collaborator
//!
//! Some backends are long-lived local processes (a model server, the OAuth
//! bridge). The health monitor asks a [`ProcessSupervisor`] to (re)start a
//! backend's process when it goes down, and again on each missed probe
//! while the supervisor knows the process has exited. Probes always go to
//! the network, so a backend started some other way still recovers.
//! Routing never talks to the supervisor directly.

use crate::backends::Tier;
use crate::config::Config;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("failed to start '{program}' for {backend}: {reason}")]
    SpawnFailed {
        backend: String,
        program: String,
        reason: String,
    },
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Make sure the process behind `tier` is running, starting it if needed
    async fn ensure_running(&self, tier: Tier, backend: &str) -> Result<(), SupervisorError>;

    /// `false` only when the supervisor knows the process is gone
    fn healthy(&self, tier: Tier) -> bool;
}

/// Supervisor for deployments where backend processes are managed elsewhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSupervisor;

#[async_trait]
impl ProcessSupervisor for NoopSupervisor {
    async fn ensure_running(&self, _tier: Tier, _backend: &str) -> Result<(), SupervisorError> {
        Ok(())
    }

    fn healthy(&self, _tier: Tier) -> bool {
        true
    }
}

/// Runs each backend's configured `ensure_command`
///
/// The spawned child is kept so repeated down transitions do not start a
/// second copy while the first is still alive. Backends without a command
/// are treated like [`NoopSupervisor`].
pub struct CommandSupervisor {
    commands: HashMap<Tier, Vec<String>>,
    children: Mutex<HashMap<Tier, Child>>,
}

impl CommandSupervisor {
    pub fn from_config(config: &Config) -> Self {
        let commands = config
            .backends
            .iter()
            .filter_map(|b| b.ensure_command().map(|cmd| (b.tier(), cmd.to_vec())))
            .collect();
        Self {
            commands,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Whether any backend has a command to run
    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    fn lock_children(&self) -> MutexGuard<'_, HashMap<Tier, Child>> {
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `Some(true)` if a tracked child is still running, `Some(false)` if it
/// exited, `None` if nothing was started for `tier`
fn child_running(children: &mut HashMap<Tier, Child>, tier: Tier) -> Option<bool> {
    let child = children.get_mut(&tier)?;
    match child.try_wait() {
        Ok(None) => Some(true),
        // kept until ensure_running replaces it
        Ok(Some(_)) => Some(false),
        Err(e) => {
            tracing::warn!(tier = %tier, error = %e, "Failed to poll supervised process");
            Some(false)
        }
    }
}

#[async_trait]
impl ProcessSupervisor for CommandSupervisor {
    async fn ensure_running(&self, tier: Tier, backend: &str) -> Result<(), SupervisorError> {
        let Some((program, args)) = self.commands.get(&tier).and_then(|c| c.split_first()) else {
            return Ok(());
        };

        // one lock across check and insert so concurrent calls start one child
        let mut children = self.lock_children();
        if child_running(&mut children, tier) == Some(true) {
            tracing::debug!(backend = %backend, tier = %tier, "Supervised process already running");
            return Ok(());
        }

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed {
                backend: backend.to_string(),
                program: program.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            backend = %backend,
            tier = %tier,
            program = %program,
            pid = ?child.id(),
            "Started backend process"
        );

        children.insert(tier, child);
        Ok(())
    }

    fn healthy(&self, tier: Tier) -> bool {
        // Only a process we started and saw exit counts as known-dead
        child_running(&mut self.lock_children(), tier) != Some(false)
    }
}
