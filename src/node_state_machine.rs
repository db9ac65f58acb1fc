// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Per-node transition sequence (spec §4.4): pre-check, maintenance entry,
//! drain, upgrade, conditional reboot, cleanup, maintenance exit.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crate::cluster::node::{HaMode, Node};
use crate::error::Result;
use crate::logger::Logger;
use crate::proxmox::client::{ProxmoxClient, LIVENESS_TIMEOUT};
use crate::wait::{wait_until, WaitState};

/// 1s cadence used for HA-mode and offline-count polling.
const HA_POLL_PERIOD: Duration = Duration::from_secs(1);
/// 5s cadence used for guest-drain and task-idle polling.
const SLOW_POLL_PERIOD: Duration = Duration::from_secs(5);
/// Visible warning window before a real reboot, to allow Ctrl-C (spec §4.4).
const REBOOT_WARNING: Duration = Duration::from_secs(5);

/// Per-run options the state machine consults; a narrowed projection of
/// [`crate::config::RunConfig`] so this module doesn't need the whole CLI
/// surface to do its job.
#[derive(Debug, Clone)]
pub struct NodeRunOptions {
    pub use_maintenance_mode: bool,
    pub allow_running_tasks: bool,
    pub allow_running_guests: bool,
    pub dry_run: bool,
    pub force_upgrade: bool,
    pub force_reboot: bool,
    pub pkgs_reinstall: Vec<String>,
}

pub struct NodeStateMachine {
    proxmox: Arc<ProxmoxClient>,
    /// The node cluster-wide HA queries are issued against; stays constant
    /// across the whole run regardless of which node is upgrading.
    seed: String,
    options: NodeRunOptions,
}

impl NodeStateMachine {
    pub fn new(proxmox: Arc<ProxmoxClient>, seed: impl Into<String>, options: NodeRunOptions) -> Self {
        Self {
            proxmox,
            seed: seed.into(),
            options,
        }
    }

    /// Drives `node` through the full transition sequence to completion,
    /// writing each step's observation back onto it (spec §3's `current_mode`,
    /// `running_guest_count`, `expected_kernel`, `booted_kernel`). A failure
    /// at any step aborts the whole run — no attempt is made to unwind a
    /// partially-upgraded node (spec §4.5 step 7).
    pub fn upgrade_node(&self, node: &mut Node, logger: &Logger) -> Result<()> {
        let hostname = node.hostname.clone();
        self.wait_cluster_offline_count_zero(logger)?;

        if self.options.use_maintenance_mode {
            logger.info("entering maintenance mode");
            self.proxmox.enter_maintenance(&hostname)?;
            if !self.options.dry_run {
                node.current_mode = self.wait_ha_mode(&hostname, logger, true)?;
            }
        }

        if !self.options.allow_running_tasks {
            self.wait_tasks_idle(&hostname, logger)?;
        }

        if !self.options.allow_running_guests && !self.options.dry_run {
            self.wait_guests_drained(&hostname, logger)?;
            node.running_guest_count = 0;
        }

        logger.info("running dist-upgrade");
        self.proxmox.apt_dist_upgrade(&hostname)?;

        self.maybe_reboot(node, logger)?;

        if !self.options.pkgs_reinstall.is_empty() {
            logger.info(&format!("reinstalling: {}", self.options.pkgs_reinstall.join(", ")));
            self.proxmox.apt_reinstall(&hostname, &self.options.pkgs_reinstall)?;
        }
        self.proxmox.apt_autoremove_twice(&hostname)?;

        if self.options.use_maintenance_mode {
            self.wait_service_active(&hostname, logger, "pve-ha-lrm")?;
            logger.info("exiting maintenance mode");
            self.proxmox.exit_maintenance(&hostname)?;
            if !self.options.dry_run {
                node.current_mode = self.wait_ha_mode(&hostname, logger, false)?;
            }
        }

        Ok(())
    }

    fn wait_cluster_offline_count_zero(&self, logger: &Logger) -> Result<()> {
        let seed = self.seed.clone();
        wait_until(logger, "cluster offline count to reach zero", None, HA_POLL_PERIOD, || {
            let status = self.proxmox.ha_manager_status(&seed)?;
            let offline = status.offline_count();
            if offline == 0 {
                Ok(WaitState::Done)
            } else {
                Ok(WaitState::Pending(format!("{offline} node(s) offline")))
            }
        })
    }

    fn wait_ha_mode(&self, hostname: &str, logger: &Logger, want_maintenance: bool) -> Result<HaMode> {
        let seed = self.seed.clone();
        let hostname = hostname.to_string();
        let label = if want_maintenance { "HA mode = maintenance" } else { "HA mode = online" };
        let observed = RefCell::new(HaMode::Unknown);
        wait_until(logger, label, None, HA_POLL_PERIOD, || {
            let status = self.proxmox.ha_manager_status(&seed)?;
            let mode = status.mode_for(&hostname);
            let observed_ok = if want_maintenance { mode.is_maintenance() } else { mode.is_online() };
            *observed.borrow_mut() = mode.clone();
            if observed_ok {
                Ok(WaitState::Done)
            } else {
                Ok(WaitState::Pending(mode.to_string()))
            }
        })?;
        Ok(observed.into_inner())
    }

    fn wait_tasks_idle(&self, hostname: &str, logger: &Logger) -> Result<()> {
        wait_until(logger, "active tasks to reach zero", None, SLOW_POLL_PERIOD, || {
            let count = self.proxmox.active_tasks(hostname)?;
            if count == 0 {
                Ok(WaitState::Done)
            } else {
                Ok(WaitState::Pending(format!("{count} active task(s)")))
            }
        })
    }

    fn wait_guests_drained(&self, hostname: &str, logger: &Logger) -> Result<()> {
        wait_until(logger, "running guests to drain", None, SLOW_POLL_PERIOD, || {
            let lxc = self.proxmox.running_lxc(hostname)?;
            let qemu = self.proxmox.running_qemu(hostname)?;
            let total = lxc + qemu;
            if total == 0 {
                Ok(WaitState::Done)
            } else {
                Ok(WaitState::Pending(format!("{total} running guest(s)")))
            }
        })
    }

    fn wait_service_active(&self, hostname: &str, logger: &Logger, service: &str) -> Result<()> {
        wait_until(logger, &format!("{service} active"), None, HA_POLL_PERIOD, || {
            if self.proxmox.service_active(hostname, service)? {
                Ok(WaitState::Done)
            } else {
                Ok(WaitState::Pending(format!("{service} not active yet")))
            }
        })
    }

    /// Reboot iff `force_reboot` or the node's booted kernel no longer
    /// matches what GRUB would boot next. Under `--dry-run` the decision is
    /// logged but never acted on (spec §4.4, testable property 7).
    fn maybe_reboot(&self, node: &mut Node, logger: &Logger) -> Result<()> {
        let hostname = node.hostname.clone();
        let (booted, expected) = self.proxmox.kernel_versions(&hostname)?;
        node.booted_kernel = Some(booted);
        node.expected_kernel = Some(expected);

        let should_reboot = self.options.force_reboot || node.kernel_mismatch();
        if !should_reboot {
            logger.debug("no reboot required");
            return Ok(());
        }
        if self.options.dry_run {
            logger.no_op("reboot");
            return Ok(());
        }

        logger.warn(&format!("rebooting in {}s — Ctrl-C to abort", REBOOT_WARNING.as_secs()));
        sleep(REBOOT_WARNING);

        // Errors here are expected: the connection dies as the node goes
        // down. The post-reboot liveness probe below is authoritative.
        let _ = self.proxmox.reboot(&hostname);
        let _ = self.proxmox.tail_dmesg(&hostname);

        wait_until(logger, "node to come back up", None, HA_POLL_PERIOD, || {
            match self.proxmox.whoami(&hostname, LIVENESS_TIMEOUT) {
                Ok(_) => Ok(WaitState::Done),
                Err(_) => Ok(WaitState::Pending("not yet reachable".into())),
            }
        })
    }
}
