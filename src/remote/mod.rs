// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! RemoteExec — the one capability the orchestrator consumes to reach a
//! node. Deliberately the thinnest possible contract (see spec §4.1): run
//! a shell command on a host, get back whatever it printed and how it
//! exited. A non-zero exit does not itself raise; callers decide.

pub mod ssh;

use std::time::Duration;

use crate::error::Result;

/// Output of a single remote command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `stdout`, trimmed of trailing newlines — most Proxmox command output
    /// is line-oriented and callers generally want this shape.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim_end_matches(['\n', '\r'])
    }
}

/// Runs a shell command on a named host. Implementations execute the
/// command string in a shell on `host`, so remote parameter expansion like
/// `$(hostname)` evaluates on the remote side, not locally.
pub trait RemoteExec: Send + Sync {
    /// Runs `command` on `host`. `timeout` bounds the whole call (connect +
    /// execute); `None` means "whatever the transport defaults to".
    fn run(&self, host: &str, command: &str, timeout: Option<Duration>) -> Result<CommandOutput>;
}
