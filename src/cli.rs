// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Hand-rolled argument scanner, in the spirit of `jetpack`'s own
//! `CliParser`: positional/flag dispatch as explicit, testable code rather
//! than a declarative derive macro. This keeps the mutually-exclusive
//! `--cluster-node`/`--node` validation and the value-required-for-flag
//! checks (spec §8 testable property 1) as ordinary control flow.

use crate::error::{PveRollError, Result};

pub const USAGE: &str = "\
pve-roll — rolling upgrade orchestrator for Proxmox VE clusters

USAGE:
    pve-roll (--cluster-node <HOST> | --node <HOST>...) [OPTIONS]

OPTIONS:
    -c, --cluster-node <HOST>      Discover cluster members from this seed node
    -n, --node <HOST>              Upgrade this node (repeatable)
        --ssh-user <USER>          SSH user (default: $PVE_UPGRADE_SSH_USER or \"root\")
        --ssh-option <OPT>         Extra SSH option (repeatable, compatibility no-op)
        --ssh-key-auth-only        Only attempt public-key authentication
        --cluster-node-use-ip      Use discovered nodes' IPs instead of names
        --dry-run                  Log mutating commands instead of running them
        --reinstall <PKG>          Reinstall this package after upgrading (repeatable)
        --force-upgrade            Upgrade every node regardless of available updates
        --force-reboot             Reboot every node regardless of kernel match
        --no-maintenance-mode      Skip HA maintenance-mode transitions
        --allow-running-guests     Don't wait for guests to drain before upgrading
        --allow-running-tasks      Don't wait for active tasks to finish
        --jq-bin <PATH>            Compatibility no-op, accepted and ignored
    -v, --verbose                  Increase log verbosity (repeatable, 0..7)
    -h, --help                     Print this message
    -V, --version                  Print the version
";

/// Seed mode, mirroring spec §3's `RunConfig.seed_mode` before the ssh-user
/// fallback chain is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedMode {
    FromClusterNode(String),
    ExplicitList(Vec<String>),
}

/// Raw parsed arguments, not yet resolved against the environment.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub seed_mode: SeedMode,
    pub ssh_user: Option<String>,
    pub ssh_options: Vec<String>,
    pub ssh_key_auth_only: bool,
    pub cluster_node_use_ip: bool,
    pub dry_run: bool,
    pub pkgs_reinstall: Vec<String>,
    pub force_upgrade: bool,
    pub force_reboot: bool,
    pub use_maintenance_mode: bool,
    pub allow_running_guests: bool,
    pub allow_running_tasks: bool,
    pub jq_path: Option<String>,
    pub verbose: u8,
}

pub enum ParseOutcome {
    Run(CliArgs),
    Help,
    Version,
}

/// Parses `argv` (excluding the program name) into a [`ParseOutcome`].
pub fn parse(argv: &[String]) -> Result<ParseOutcome> {
    let mut cluster_node: Option<String> = None;
    let mut nodes: Vec<String> = Vec::new();
    let mut ssh_user = None;
    let mut ssh_options = Vec::new();
    let mut ssh_key_auth_only = false;
    let mut cluster_node_use_ip = false;
    let mut dry_run = false;
    let mut pkgs_reinstall = Vec::new();
    let mut force_upgrade = false;
    let mut force_reboot = false;
    let mut use_maintenance_mode = true;
    let mut allow_running_guests = false;
    let mut allow_running_tasks = false;
    let mut jq_path = None;
    let mut verbose: u8 = 0;

    let mut iter = argv.iter().peekable();
    let mut take_value = |flag: &str, iter: &mut std::iter::Peekable<std::slice::Iter<String>>| -> Result<String> {
        iter.next()
            .cloned()
            .ok_or_else(|| PveRollError::Config(format!("{flag} requires a value")))
    };

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::Help),
            "-V" | "--version" => return Ok(ParseOutcome::Version),
            "-c" | "--cluster-node" => cluster_node = Some(take_value(arg, &mut iter)?),
            "-n" | "--node" => nodes.push(take_value(arg, &mut iter)?),
            "--ssh-user" => ssh_user = Some(take_value(arg, &mut iter)?),
            "--ssh-option" => ssh_options.push(take_value(arg, &mut iter)?),
            "--ssh-key-auth-only" => ssh_key_auth_only = true,
            "--cluster-node-use-ip" => cluster_node_use_ip = true,
            "--dry-run" => dry_run = true,
            "--reinstall" => pkgs_reinstall.push(take_value(arg, &mut iter)?),
            "--force-upgrade" => force_upgrade = true,
            "--force-reboot" => force_reboot = true,
            "--no-maintenance-mode" => use_maintenance_mode = false,
            "--allow-running-guests" => allow_running_guests = true,
            "--allow-running-tasks" => allow_running_tasks = true,
            "--jq-bin" => jq_path = Some(take_value(arg, &mut iter)?),
            "-v" | "--verbose" => verbose = (verbose + 1).min(7),
            other => {
                return Err(PveRollError::Config(format!(
                    "unknown argument {other}; see --help"
                )))
            }
        }
    }

    let seed_mode = match (cluster_node, nodes.is_empty()) {
        (Some(_), false) => {
            return Err(PveRollError::Config(
                "--cluster-node and --node are mutually exclusive".into(),
            ))
        }
        (Some(host), true) => SeedMode::FromClusterNode(host),
        (None, false) => SeedMode::ExplicitList(nodes),
        (None, true) => {
            return Err(PveRollError::Config(
                "exactly one of --cluster-node or --node is required".into(),
            ))
        }
    };

    Ok(ParseOutcome::Run(CliArgs {
        seed_mode,
        ssh_user,
        ssh_options,
        ssh_key_auth_only,
        cluster_node_use_ip,
        dry_run,
        pkgs_reinstall,
        force_upgrade,
        force_reboot,
        use_maintenance_mode,
        allow_running_guests,
        allow_running_tasks,
        jq_path,
        verbose,
    }))
}
