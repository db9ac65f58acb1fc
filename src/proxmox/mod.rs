// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! `pvesh`/`apt`/`systemctl` surface this tool drives on each node.

pub mod client;
pub mod parse;

pub use client::ProxmoxClient;
