// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Top-level flow (spec §4.5): validate, discover, check preconditions,
//! build the plan, run each node's state machine in order.

use std::sync::Arc;

use crate::cli::SeedMode;
use crate::cluster::inspector::{ClusterInspector, ClusterView};
use crate::config::RunConfig;
use crate::error::Result;
use crate::logger::Logger;
use crate::node_state_machine::{NodeRunOptions, NodeStateMachine};
use crate::proxmox::client::ProxmoxClient;
use crate::remote::RemoteExec;

/// Outcome of a full run, surfaced to `main` for exit-code/message
/// decisions that aren't errors (e.g. "nothing to do").
pub enum RunOutcome {
    /// No node needed updates; nothing was touched.
    NothingToDo,
    /// The plan ran to completion; these hosts were upgraded, in order.
    Completed(Vec<String>),
}

pub struct Orchestrator {
    proxmox: Arc<ProxmoxClient>,
    logger: Logger,
    config: RunConfig,
}

impl Orchestrator {
    pub fn new(remote: Arc<dyn RemoteExec>, logger: Logger, config: RunConfig) -> Self {
        let proxmox = Arc::new(ProxmoxClient::new(remote, logger.clone(), config.dry_run));
        Self {
            proxmox,
            logger,
            config,
        }
    }

    pub fn run(&self) -> Result<RunOutcome> {
        if self.config.dry_run {
            self.logger.info("=== DRY RUN — no mutating commands will be executed ===");
        }

        let inspector = ClusterInspector::new(Arc::clone(&self.proxmox), self.logger.clone());
        let mut view = self.discover_or_use_explicit(&inspector)?;

        self.logger.info(&format!(
            "checking cluster-wide preconditions across {} node(s)",
            view.nodes.len()
        ));
        inspector.check_preconditions(&mut view, self.config.allow_running_tasks)?;

        let plan = inspector.select_candidates(&mut view, self.config.force_upgrade)?;
        if plan.is_empty() {
            self.logger.info("No nodes need updates. Exiting.");
            return Ok(RunOutcome::NothingToDo);
        }

        let options = NodeRunOptions {
            use_maintenance_mode: self.config.use_maintenance_mode,
            allow_running_tasks: self.config.allow_running_tasks,
            allow_running_guests: self.config.allow_running_guests,
            dry_run: self.config.dry_run,
            force_upgrade: self.config.force_upgrade,
            force_reboot: self.config.force_reboot,
            pkgs_reinstall: self.config.pkgs_reinstall.clone(),
        };
        let machine = NodeStateMachine::new(Arc::clone(&self.proxmox), view.seed.clone(), options);

        for hostname in plan.hosts() {
            let node = view
                .nodes
                .iter_mut()
                .find(|n| &n.hostname == hostname)
                .expect("plan hosts are drawn from view.nodes");
            let node_logger = self.logger.with_prefix(hostname.clone());
            node_logger.info("starting upgrade");
            machine.upgrade_node(node, &node_logger)?;
            node_logger.info("upgrade complete");
        }

        Ok(RunOutcome::Completed(plan.hosts().to_vec()))
    }

    fn discover_or_use_explicit(&self, inspector: &ClusterInspector) -> Result<ClusterView> {
        match &self.config.seed_mode {
            SeedMode::FromClusterNode(seed) => {
                self.logger
                    .info(&format!("discovering cluster members from seed {seed}"));
                inspector.discover(seed, self.config.cluster_node_use_ip)
            }
            SeedMode::ExplicitList(hosts) => inspector.from_explicit_list(hosts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::null_logger;
    use crate::remote::CommandOutput;
    use std::collections::HashMap;
    use std::time::Duration;

    struct ScenarioFake {
        responses: HashMap<(&'static str, &'static str), &'static str>,
    }

    impl RemoteExec for ScenarioFake {
        fn run(&self, host: &str, command: &str, _timeout: Option<Duration>) -> Result<CommandOutput> {
            for ((h, prefix), stdout) in &self.responses {
                if *h == host && command.starts_with(prefix) {
                    return Ok(CommandOutput {
                        stdout: stdout.to_string(),
                        stderr: String::new(),
                        exit_code: 0,
                    });
                }
            }
            if command == "hash pvesh" || command == "whoami" {
                return Ok(CommandOutput { stdout: "root".into(), stderr: String::new(), exit_code: 0 });
            }
            Ok(CommandOutput { stdout: "[]".into(), stderr: String::new(), exit_code: 0 })
        }
    }

    fn base_config(seed_mode: SeedMode) -> RunConfig {
        RunConfig {
            seed_mode,
            ssh_user: "root".into(),
            ssh_options: Vec::new(),
            ssh_key_auth_only: false,
            cluster_node_use_ip: false,
            dry_run: false,
            pkgs_reinstall: Vec::new(),
            force_upgrade: false,
            force_reboot: false,
            use_maintenance_mode: true,
            allow_running_guests: false,
            allow_running_tasks: false,
            jq_path: None,
            verbose: 0,
            config_source: "test",
        }
    }

    #[test]
    fn scenario_a_empty_rollout_exits_with_nothing_to_do() {
        let mut responses = HashMap::new();
        responses.insert(
            ("pve1", "pvesh get cluster/status"),
            r#"[{"type":"node","name":"pve1"},{"type":"node","name":"pve2"}]"#,
        );
        responses.insert(("pve1", "pvesh get cluster/ha/status/manager_status"), r#"{"manager_status":{"node_status":{}}}"#);
        responses.insert(("pve1", "DEBIAN_FRONTEND=noninteractive apt-get -qq -s upgrade"), "");
        responses.insert(("pve2", "DEBIAN_FRONTEND=noninteractive apt-get -qq -s upgrade"), "");
        let remote: Arc<dyn RemoteExec> = Arc::new(ScenarioFake { responses });

        let config = base_config(SeedMode::FromClusterNode("pve1".into()));
        let orchestrator = Orchestrator::new(remote, null_logger(), config);
        let outcome = orchestrator.run().unwrap();
        assert!(matches!(outcome, RunOutcome::NothingToDo));
    }

    #[test]
    fn scenario_d_offline_count_blocks_start() {
        let mut responses = HashMap::new();
        responses.insert(
            ("pve1", "pvesh get cluster/ha/status/manager_status"),
            r#"{"manager_status":{"node_status":{"pve2":"unknown"}}}"#,
        );
        let remote: Arc<dyn RemoteExec> = Arc::new(ScenarioFake { responses });

        let config = base_config(SeedMode::ExplicitList(vec!["pve1".into(), "pve2".into()]));
        let orchestrator = Orchestrator::new(remote, null_logger(), config);
        let err = orchestrator.run().unwrap_err();
        assert!(matches!(err, crate::error::PveRollError::ClusterUnhealthy(_)));
    }
}
