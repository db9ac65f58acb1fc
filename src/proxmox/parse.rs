// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! JSON shapes returned by `pvesh get <path> --output-form=json`.
//!
//! Parsed in-process with `serde_json` rather than shelling out to `jq`,
//! per spec §9's design note that `jq` is a shell-script artifact a Rust
//! rewrite should not need.

use std::collections::HashMap;

use serde::Deserialize;

use crate::cluster::node::HaMode;

#[derive(Debug, Deserialize)]
pub struct ClusterStatusEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Projects `cluster/status` JSON down to member hostnames or IPs,
/// keeping only `"type": "node"` entries (testable property 2).
pub fn project_cluster_members(entries: &[ClusterStatusEntry], use_ip: bool) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.entry_type == "node")
        .filter_map(|e| {
            if use_ip {
                e.ip.clone()
            } else {
                e.name.clone()
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct HaManagerStatusRaw {
    pub manager_status: ManagerStatusBody,
}

#[derive(Debug, Deserialize, Default)]
pub struct ManagerStatusBody {
    #[serde(default)]
    pub node_status: HashMap<String, String>,
}

/// Aggregated HA manager view: per-node mode strings keyed by the raw
/// hostname, exactly as returned — spec §9 flags the original's lookup as
/// fragile for hostnames with dots, so this never re-derives a key, it
/// only ever looks one up.
#[derive(Debug, Clone, Default)]
pub struct HaManagerStatus {
    pub node_modes: HashMap<String, String>,
}

impl HaManagerStatus {
    pub fn from_raw(raw: HaManagerStatusRaw) -> Self {
        Self {
            node_modes: raw.manager_status.node_status,
        }
    }

    pub fn mode_for(&self, hostname: &str) -> HaMode {
        match self.node_modes.get(hostname).map(String::as_str) {
            Some("online") => HaMode::Online,
            Some("maintenance") => HaMode::Maintenance,
            Some("unknown") => HaMode::Unknown,
            Some(other) => HaMode::Other(other.to_string()),
            None => HaMode::Unknown,
        }
    }

    /// A node counts as offline when the manager reports it `"unknown"` or
    /// omits it entirely — there is no literal `offline_count` field in
    /// the real API payload, so this crate derives it from `node_status`.
    pub fn offline_count(&self) -> usize {
        self.node_modes
            .values()
            .filter(|mode| mode.as_str() == "unknown")
            .count()
    }
}

#[derive(Debug, Deserialize)]
pub struct GuestEntry {
    #[serde(default)]
    pub vmid: Option<u64>,
    #[serde(default)]
    pub status: String,
}

/// Counts guests whose `status != "stopped"`, the running-guest definition
/// used throughout (spec §4.2's `running_lxc`/`running_qemu`).
pub fn count_running(entries: &[GuestEntry]) -> usize {
    entries.iter().filter(|g| g.status != "stopped").count()
}

#[derive(Debug, Deserialize)]
pub struct TaskEntry {
    #[serde(default)]
    pub upid: Option<String>,
}
