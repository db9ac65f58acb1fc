// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Scripted fake transport shared by the integration tests, in the style
//! of `jetpack`'s `tests/common/mod.rs`: a concrete fake type rather than
//! a mocking crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use pve_roll::{CommandOutput, PveRollError, RemoteExec, Result};

/// A single scripted response, matched by host and command prefix. `stdouts`
/// holds one or more answers; repeated calls advance through them and then
/// repeat the last one, which is how a test simulates a node settling into
/// a new HA mode after a couple of polls instead of answering statically.
struct Script {
    host: String,
    command_prefix: String,
    stdouts: Vec<String>,
    exit_code: i32,
    cursor: AtomicUsize,
}

/// Records every command issued and answers with the first matching
/// script, falling back to an empty success so un-scripted read-only
/// probes (like a second `whoami`) don't spuriously fail a scenario.
///
/// Scripts are matched in registration order, first match wins — later
/// `.with()` calls for the same `(host, prefix)` pair are never consulted.
pub struct FakeRemoteExec {
    scripts: Vec<Script>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeRemoteExec {
    pub fn new() -> Self {
        Self {
            scripts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, host: &str, command_prefix: &str, stdout: &str) -> Self {
        self.scripts.push(Script {
            host: host.to_string(),
            command_prefix: command_prefix.to_string(),
            stdouts: vec![stdout.to_string()],
            exit_code: 0,
            cursor: AtomicUsize::new(0),
        });
        self
    }

    /// Answers successive matching calls with each entry of `stdouts` in
    /// turn, then repeats the last entry forever.
    pub fn with_sequence(mut self, host: &str, command_prefix: &str, stdouts: &[&str]) -> Self {
        self.scripts.push(Script {
            host: host.to_string(),
            command_prefix: command_prefix.to_string(),
            stdouts: stdouts.iter().map(|s| s.to_string()).collect(),
            exit_code: 0,
            cursor: AtomicUsize::new(0),
        });
        self
    }

    pub fn with_exit_code(mut self, host: &str, command_prefix: &str, stdout: &str, exit_code: i32) -> Self {
        self.scripts.push(Script {
            host: host.to_string(),
            command_prefix: command_prefix.to_string(),
            stdouts: vec![stdout.to_string()],
            exit_code,
            cursor: AtomicUsize::new(0),
        });
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| {
                c.contains("dist-upgrade")
                    || c.contains("reinstall")
                    || c.contains("autoremove")
                    || c.contains("node-maintenance")
                    || c == "reboot"
            })
            .collect()
    }
}

impl Default for FakeRemoteExec {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteExec for FakeRemoteExec {
    fn run(&self, host: &str, command: &str, _timeout: Option<Duration>) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));

        for script in &self.scripts {
            if script.host == host && command.starts_with(script.command_prefix.as_str()) {
                if script.exit_code != 0 {
                    return Err(PveRollError::Remote {
                        host: host.to_string(),
                        command: command.to_string(),
                        detail: format!("exit code {}", script.exit_code),
                    });
                }
                let idx = script.cursor.fetch_add(1, Ordering::Relaxed);
                let idx = idx.min(script.stdouts.len() - 1);
                return Ok(CommandOutput {
                    stdout: script.stdouts[idx].clone(),
                    stderr: String::new(),
                    exit_code: script.exit_code,
                });
            }
        }

        // Default: healthy, empty, zero-count answers for every probe this
        // tool issues — individual tests layer scripts on top for the
        // commands whose answer matters to the scenario under test.
        let stdout = if command.starts_with("pvesh get") {
            "[]".to_string()
        } else if command == "whoami" {
            "root".to_string()
        } else {
            String::new()
        };
        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        })
    }
}
