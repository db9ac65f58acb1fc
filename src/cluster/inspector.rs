// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Cluster membership discovery, global preconditions, and upgrade
//! candidate selection (spec §4.3).

use std::sync::Arc;

use crate::cluster::fanout::{fan_out, failure_count, FanOutResult};
use crate::cluster::node::Node;
use crate::error::{PveRollError, Result};
use crate::logger::Logger;
use crate::proxmox::client::{ProxmoxClient, LIVENESS_TIMEOUT, SEED_DISCOVERY_TIMEOUT};

/// Writes each successful fan-out result onto the matching [`Node`] by
/// hostname. Failed jobs are left untouched — the caller turns any failure
/// into a `FanOut` error that aborts the run before the stale value matters.
fn apply_results<T>(nodes: &mut [Node], results: &[FanOutResult<T>], apply: impl Fn(&mut Node, &T)) {
    for r in results {
        if let Ok(value) = &r.result {
            if let Some(node) = nodes.iter_mut().find(|n| n.hostname == r.host) {
                apply(node, value);
            }
        }
    }
}

/// The fixed set of cluster members for one run, plus which of them acted
/// as the seed for cluster-wide queries (spec §3's `ClusterView`).
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub seed: String,
    pub nodes: Vec<Node>,
}

impl ClusterView {
    pub fn hostnames(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.hostname.clone()).collect()
    }
}

/// An ordered list of hostnames to upgrade, built once after global
/// preconditions pass (spec §3's `UpgradePlan`).
#[derive(Debug, Clone)]
pub struct UpgradePlan(pub Vec<String>);

impl UpgradePlan {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hosts(&self) -> &[String] {
        &self.0
    }
}

pub struct ClusterInspector {
    proxmox: Arc<ProxmoxClient>,
    logger: Logger,
}

impl ClusterInspector {
    pub fn new(proxmox: Arc<ProxmoxClient>, logger: Logger) -> Self {
        Self { proxmox, logger }
    }

    /// Probes `seed` for reachability and Proxmox-ness, then discovers the
    /// full member list from `cluster/status`.
    pub fn discover(&self, seed: &str, use_ip: bool) -> Result<ClusterView> {
        self.proxmox
            .whoami(seed, SEED_DISCOVERY_TIMEOUT)
            .map_err(|_| PveRollError::Unreachable {
                host: seed.to_string(),
                detail: "seed node did not respond within the discovery timeout".into(),
            })?;
        if !self.proxmox.has_pvesh(seed)? {
            return Err(PveRollError::NotProxmox {
                host: seed.to_string(),
            });
        }

        let members = self.proxmox.cluster_members(seed, use_ip)?;
        let nodes = members.into_iter().map(Node::new).collect();
        Ok(ClusterView {
            seed: seed.to_string(),
            nodes,
        })
    }

    /// Builds a view directly from an operator-supplied node list. The
    /// first entry acts as seed for cluster-wide queries (HA status); it
    /// need not itself be in the upgrade plan.
    pub fn from_explicit_list(&self, hosts: &[String]) -> Result<ClusterView> {
        let seed = hosts
            .first()
            .ok_or_else(|| PveRollError::Config("explicit node list is empty".into()))?
            .clone();
        Ok(ClusterView {
            seed,
            nodes: hosts.iter().cloned().map(Node::new).collect(),
        })
    }

    /// Runs all four global preconditions from spec §4.3, in order.
    /// Any failure aborts before the plan is built or anything mutates.
    /// Each check writes what it observed back onto `view`'s nodes, so
    /// `Node`'s `reachable`/`is_proxmox`/`current_mode`/`active_task_count`
    /// fields reflect this run's actual probes rather than their
    /// not-yet-probed defaults.
    pub fn check_preconditions(&self, view: &mut ClusterView, allow_running_tasks: bool) -> Result<()> {
        self.check_reachable_and_proxmox(&mut view.nodes)?;
        self.check_ha_healthy(&mut view.nodes, &view.seed)?;
        if !allow_running_tasks {
            self.check_no_active_tasks(&mut view.nodes)?;
        }
        Ok(())
    }

    fn check_reachable_and_proxmox(&self, nodes: &mut [Node]) -> Result<()> {
        let hosts: Vec<String> = nodes.iter().map(|n| n.hostname.clone()).collect();
        let results = fan_out(&hosts, &self.logger, |host, node_logger| {
            self.proxmox
                .whoami(host, LIVENESS_TIMEOUT)
                .map_err(|_| PveRollError::Unreachable {
                    host: host.to_string(),
                    detail: "no SSH response within the liveness timeout".into(),
                })?;
            if !self.proxmox.has_pvesh(host)? {
                node_logger.error("does not appear to be a Proxmox node (hash pvesh failed)");
                return Err(PveRollError::NotProxmox {
                    host: host.to_string(),
                });
            }
            Ok(())
        });

        for r in &results {
            if let Err(e) = &r.result {
                self.logger.error(&format!("{}: {e}", r.host));
            }
        }
        apply_results(nodes, &results, |node, _: &()| {
            node.reachable = true;
            node.is_proxmox = true;
        });

        let failed = failure_count(&results);
        if failed > 0 {
            return Err(PveRollError::FanOut {
                count: failed,
                total: results.len(),
            });
        }
        Ok(())
    }

    fn check_ha_healthy(&self, nodes: &mut [Node], seed: &str) -> Result<()> {
        let status = self.proxmox.ha_manager_status(seed)?;
        for node in nodes.iter_mut() {
            node.current_mode = status.mode_for(&node.hostname);
        }
        let offline = status.offline_count();
        if offline != 0 {
            return Err(PveRollError::ClusterUnhealthy(format!(
                "{offline} node(s) reported offline by the HA manager"
            )));
        }
        Ok(())
    }

    /// "Tasks are present" is the problem condition — spec §9 flags the
    /// original's inverted exit-code-as-count convention; this returns a
    /// plain `tasks_present: bool`-shaped error instead of replicating it.
    fn check_no_active_tasks(&self, nodes: &mut [Node]) -> Result<()> {
        let hosts: Vec<String> = nodes.iter().map(|n| n.hostname.clone()).collect();
        let results = fan_out(&hosts, &self.logger, |host, _| self.proxmox.active_tasks(host));

        let mut offenders = Vec::new();
        for r in &results {
            match &r.result {
                Ok(count) if *count > 0 => offenders.push(r.host.clone()),
                Err(e) => self.logger.error(&format!("{}: {e}", r.host)),
                _ => {}
            }
        }
        apply_results(nodes, &results, |node, count| {
            node.active_task_count = *count;
        });

        let failed = failure_count(&results);
        if failed > 0 {
            return Err(PveRollError::FanOut {
                count: failed,
                total: results.len(),
            });
        }
        if !offenders.is_empty() {
            return Err(PveRollError::ClusterUnhealthy(format!(
                "active tasks present on: {}",
                offenders.join(", ")
            )));
        }
        Ok(())
    }

    /// Runs `apt_update` everywhere, then includes each node in the plan
    /// iff `force_upgrade` or its `apt_simulate_upgrade` stdout is non-empty
    /// (spec §4.3, testable property 3). Order matches `view.nodes`. Also
    /// writes the observed `has_updates` flag back onto each `Node`.
    pub fn select_candidates(&self, view: &mut ClusterView, force_upgrade: bool) -> Result<UpgradePlan> {
        let hosts = view.hostnames();

        let update_results = fan_out(&hosts, &self.logger, |host, _| self.proxmox.apt_update(host));
        let failed = failure_count(&update_results);
        if failed > 0 {
            return Err(PveRollError::FanOut {
                count: failed,
                total: update_results.len(),
            });
        }

        if force_upgrade {
            for node in view.nodes.iter_mut() {
                node.has_updates = true;
            }
            return Ok(UpgradePlan(hosts));
        }

        let simulate_results = fan_out(&hosts, &self.logger, |host, _| {
            self.proxmox.apt_simulate_upgrade(host)
        });
        let failed = failure_count(&simulate_results);
        if failed > 0 {
            return Err(PveRollError::FanOut {
                count: failed,
                total: simulate_results.len(),
            });
        }

        apply_results(&mut view.nodes, &simulate_results, |node, stdout| {
            node.has_updates = !stdout.is_empty();
        });

        let plan = simulate_results
            .into_iter()
            .filter(|r| !r.result.as_ref().map(|s| s.is_empty()).unwrap_or(true))
            .map(|r| r.host)
            .collect();
        Ok(UpgradePlan(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::null_logger;
    use crate::remote::{CommandOutput, RemoteExec};
    use std::collections::HashMap;
    use std::time::Duration;

    struct ScriptedRemoteExec {
        responses: HashMap<(&'static str, &'static str), CommandOutput>,
    }

    impl ScriptedRemoteExec {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
            }
        }

        fn with(mut self, host: &'static str, command_prefix: &'static str, stdout: &str) -> Self {
            self.responses.insert(
                (host, command_prefix),
                CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                },
            );
            self
        }
    }

    impl RemoteExec for ScriptedRemoteExec {
        fn run(&self, host: &str, command: &str, _timeout: Option<Duration>) -> Result<CommandOutput> {
            for ((h, prefix), output) in &self.responses {
                if *h == host && command.starts_with(prefix) {
                    return Ok(output.clone());
                }
            }
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn view_of(hosts: &[&str]) -> ClusterView {
        ClusterView {
            seed: hosts[0].to_string(),
            nodes: hosts.iter().map(|h| Node::new(*h)).collect(),
        }
    }

    #[test]
    fn offline_count_nonzero_blocks_preconditions() {
        let remote = Arc::new(
            ScriptedRemoteExec::new()
                .with("pve1", "pvesh get cluster/ha/status/manager_status", r#"{"manager_status":{"node_status":{"pve1":"online","pve2":"unknown"}}}"#),
        );
        let client = Arc::new(ProxmoxClient::new(remote, null_logger(), false));
        let inspector = ClusterInspector::new(client, null_logger());
        let mut view = view_of(&["pve1", "pve2"]);
        let err = inspector.check_preconditions(&mut view, true).unwrap_err();
        assert!(matches!(err, PveRollError::ClusterUnhealthy(_)));
        assert!(view.nodes.iter().all(|n| n.reachable && n.is_proxmox));
        assert_eq!(view.nodes[1].current_mode, crate::cluster::node::HaMode::Unknown);
    }

    #[test]
    fn candidate_selection_excludes_nodes_with_no_updates() {
        let remote = Arc::new(
            ScriptedRemoteExec::new()
                .with("pve1", "DEBIAN_FRONTEND=noninteractive apt-get -qq -s upgrade", "")
                .with("pve2", "DEBIAN_FRONTEND=noninteractive apt-get -qq -s upgrade", "Inst libc6"),
        );
        let client = Arc::new(ProxmoxClient::new(remote, null_logger(), false));
        let inspector = ClusterInspector::new(client, null_logger());
        let mut view = view_of(&["pve1", "pve2"]);
        let plan = inspector.select_candidates(&mut view, false).unwrap();
        assert_eq!(plan.hosts(), &["pve2".to_string()]);
        assert!(!view.nodes[0].has_updates);
        assert!(view.nodes[1].has_updates);
    }

    #[test]
    fn force_upgrade_includes_every_node_without_probing() {
        let remote = Arc::new(ScriptedRemoteExec::new());
        let client = Arc::new(ProxmoxClient::new(remote, null_logger(), false));
        let inspector = ClusterInspector::new(client, null_logger());
        let mut view = view_of(&["pve1", "pve2"]);
        let plan = inspector.select_candidates(&mut view, true).unwrap();
        assert_eq!(plan.hosts(), &["pve1".to_string(), "pve2".to_string()]);
        assert!(view.nodes.iter().all(|n| n.has_updates));
    }
}
