// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Immutable run configuration, assembled in two steps mirroring
//! `jetpack`'s `JetpackConfig` builder plus environment overlay: parse
//! `argv` into [`crate::cli::CliArgs`], then resolve the SSH user against
//! the environment here.

use crate::cli::{CliArgs, SeedMode};
use crate::error::Result;

pub const SSH_USER_ENV_VAR: &str = "PVE_UPGRADE_SSH_USER";
const DEFAULT_SSH_USER: &str = "root";

/// Fully-resolved, validated configuration for one run. Read-only after
/// construction (spec §5: "the RunConfig is read-only after parsing").
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub seed_mode: SeedMode,
    pub ssh_user: String,
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
    /// Diagnostic-only marker, not a feature: where this config came from.
    /// Useful in error messages and tests, never persisted.
    pub config_source: &'static str,
}

impl RunConfig {
    /// Resolves `ssh_user` from `--ssh-user`, falling back to `env_user`
    /// (normally `$PVE_UPGRADE_SSH_USER`), falling back to `"root"`.
    /// Takes `env_user` as a parameter (rather than reading the process
    /// environment directly) so tests can inject a value.
    pub fn from_cli(args: CliArgs, env_user: Option<String>) -> Result<RunConfig> {
        let ssh_user = args
            .ssh_user
            .or(env_user)
            .unwrap_or_else(|| DEFAULT_SSH_USER.to_string());

        Ok(RunConfig {
            seed_mode: args.seed_mode,
            ssh_user,
            ssh_options: args.ssh_options,
            ssh_key_auth_only: args.ssh_key_auth_only,
            cluster_node_use_ip: args.cluster_node_use_ip,
            dry_run: args.dry_run,
            pkgs_reinstall: args.pkgs_reinstall,
            force_upgrade: args.force_upgrade,
            force_reboot: args.force_reboot,
            use_maintenance_mode: args.use_maintenance_mode,
            allow_running_guests: args.allow_running_guests,
            allow_running_tasks: args.allow_running_tasks,
            jq_path: args.jq_path,
            verbose: args.verbose,
            config_source: "cli",
        })
    }
}
