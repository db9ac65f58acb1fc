// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Main error type for pve-roll operations.
#[derive(Debug, Clone)]
pub enum PveRollError {
    /// Mutually exclusive flags, missing argument, missing value.
    Config(String),

    /// An SSH probe failed within its timeout.
    Unreachable { host: String, detail: String },

    /// `hash pvesh` returned nonzero on a node we expected to be Proxmox.
    NotProxmox { host: String },

    /// A global precondition (offline count, active tasks) did not hold.
    ClusterUnhealthy(String),

    /// A remote command failed, or its transport could not be established.
    Remote {
        host: String,
        command: String,
        detail: String,
    },

    /// JSON returned by a node could not be parsed into the expected shape.
    Json { host: String, detail: String },

    /// A node fan-out aggregate failed: `count` of `total` jobs failed.
    FanOut { count: usize, total: usize },

    /// Other errors, including IO failures surfaced outside a specific host.
    Other(String),
}

impl fmt::Display for PveRollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PveRollError::Config(msg) => write!(f, "configuration error: {msg}"),
            PveRollError::Unreachable { host, detail } => {
                write!(f, "node {host} unreachable: {detail}")
            }
            PveRollError::NotProxmox { host } => {
                write!(f, "node {host} does not appear to be a Proxmox node")
            }
            PveRollError::ClusterUnhealthy(msg) => write!(f, "cluster precondition failed: {msg}"),
            PveRollError::Remote {
                host,
                command,
                detail,
            } => write!(f, "command `{command}` on {host} failed: {detail}"),
            PveRollError::Json { host, detail } => {
                write!(f, "failed to parse JSON from {host}: {detail}")
            }
            PveRollError::FanOut { count, total } => {
                write!(f, "{count} of {total} nodes failed")
            }
            PveRollError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl StdError for PveRollError {}

impl From<io::Error> for PveRollError {
    fn from(err: io::Error) -> Self {
        PveRollError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for PveRollError {
    fn from(err: serde_json::Error) -> Self {
        PveRollError::Json {
            host: String::new(),
            detail: err.to_string(),
        }
    }
}

impl From<String> for PveRollError {
    fn from(err: String) -> Self {
        PveRollError::Config(err)
    }
}

impl From<&str> for PveRollError {
    fn from(err: &str) -> Self {
        PveRollError::Config(err.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PveRollError>;

/// Helper trait mirroring `anyhow::Context`, scoped to this crate's error type.
pub trait ErrorContext<T> {
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for std::result::Result<T, String> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|e| PveRollError::Other(format!("{context}: {e}")))
    }
}

/// Exit codes handed back to the shell. The distilled spec left the nonzero
/// code unspecified; this resolves that open point (see DESIGN.md) so
/// scripts wrapping this tool get a stable signal per error class.
pub fn exit_code_for(err: &PveRollError) -> i32 {
    match err {
        PveRollError::Config(_) => 1,
        PveRollError::Unreachable { .. }
        | PveRollError::NotProxmox { .. }
        | PveRollError::ClusterUnhealthy(_)
        | PveRollError::FanOut { .. } => 2,
        PveRollError::Remote { .. } | PveRollError::Json { .. } | PveRollError::Other(_) => 3,
    }
}
