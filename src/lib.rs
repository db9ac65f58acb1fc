// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logger;
pub mod node_state_machine;
pub mod orchestrator;
pub mod proxmox;
pub mod remote;
pub mod wait;

pub use cli::{CliArgs, ParseOutcome, SeedMode};
pub use cluster::{ClusterInspector, ClusterView, HaMode, Node, UpgradePlan};
pub use config::RunConfig;
pub use error::{exit_code_for, PveRollError, Result};
pub use logger::Logger;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use proxmox::ProxmoxClient;
pub use remote::{ssh::SshRemoteExec, CommandOutput, RemoteExec};
