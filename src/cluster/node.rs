// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! A single cluster member as seen by the orchestrator.

/// HA manager mode for a node. Modeled as an open set rather than a
/// closed enum of the three known strings — spec §9 calls out that the
/// original script's `.manager_status.node_status.<hostname>` lookup
/// assumes a fixed vocabulary, which is fragile against future Proxmox
/// releases; `Other` absorbs anything unrecognized instead of erroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaMode {
    Online,
    Maintenance,
    Unknown,
    Other(String),
}

impl HaMode {
    pub fn is_online(&self) -> bool {
        matches!(self, HaMode::Online)
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(self, HaMode::Maintenance)
    }
}

impl std::fmt::Display for HaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaMode::Online => write!(f, "online"),
            HaMode::Maintenance => write!(f, "maintenance"),
            HaMode::Unknown => write!(f, "unknown"),
            HaMode::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A discovered or targeted cluster member, as spec §3 defines it.
#[derive(Debug, Clone)]
pub struct Node {
    /// Hostname or IP used to address this node over SSH, exactly as
    /// returned by `cluster/status` or as passed via `--node`.
    pub hostname: String,
    pub reachable: bool,
    pub is_proxmox: bool,
    pub has_updates: bool,
    pub current_mode: HaMode,
    pub running_guest_count: usize,
    pub active_task_count: usize,
    pub expected_kernel: Option<String>,
    pub booted_kernel: Option<String>,
}

impl Node {
    /// A freshly-named node: not yet probed, so every observed attribute
    /// starts at its "don't know yet" value.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            reachable: false,
            is_proxmox: false,
            has_updates: false,
            current_mode: HaMode::Unknown,
            running_guest_count: 0,
            active_task_count: 0,
            expected_kernel: None,
            booted_kernel: None,
        }
    }

    pub fn has_running_guests(&self) -> bool {
        self.running_guest_count > 0
    }

    /// The canonical reboot signal: the kernel GRUB would boot next
    /// differs from the one currently running (spec §3, §4.2).
    pub fn kernel_mismatch(&self) -> bool {
        match (&self.expected_kernel, &self.booted_kernel) {
            (Some(expected), Some(booted)) => expected != booted,
            _ => false,
        }
    }
}
