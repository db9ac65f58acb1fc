// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Cluster-wide discovery, precondition checks, and node fan-out.

pub mod fanout;
pub mod inspector;
pub mod node;

pub use inspector::{ClusterInspector, ClusterView, UpgradePlan};
pub use node::{HaMode, Node};
