// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Testable properties 4-7: dry-run purity, transition ordering, and the
//! reboot decision.

mod common;

use std::sync::Arc;

use pve_roll::logger::null_logger;
use pve_roll::node_state_machine::{NodeRunOptions, NodeStateMachine};
use pve_roll::{Node, ProxmoxClient};

use common::FakeRemoteExec;

fn base_options() -> NodeRunOptions {
    NodeRunOptions {
        use_maintenance_mode: true,
        allow_running_tasks: false,
        allow_running_guests: false,
        dry_run: false,
        force_upgrade: false,
        force_reboot: false,
        pkgs_reinstall: Vec::new(),
    }
}

/// `upgrade_node` consults the HA manager status endpoint three times for a
/// maintenance-mode run: the offline-zero wait (mode irrelevant), the enable
/// wait (needs "maintenance"), and the disable wait (needs "online"). A
/// static answer would satisfy the first two and then loop forever on the
/// third, since `wait_until` polls without a timeout in production code.
fn healthy_fake(host: &str) -> FakeRemoteExec {
    FakeRemoteExec::new()
        .with_sequence(
            host,
            "pvesh get cluster/ha/status/manager_status",
            &[
                r#"{"manager_status":{"node_status":{"pve2":"online"}}}"#,
                r#"{"manager_status":{"node_status":{"pve2":"maintenance"}}}"#,
                r#"{"manager_status":{"node_status":{"pve2":"online"}}}"#,
            ],
        )
        .with(host, "pvesh get nodes/$(hostname)/tasks", "[]")
        .with(host, "pvesh get nodes/$(hostname)/lxc", "[]")
        .with(host, "pvesh get nodes/$(hostname)/qemu", "[]")
        .with(host, "uname -r", "6.8.8-1-pve")
        .with(host, "grep vmlinuz", "6.8.8-1-pve")
        .with(host, "systemctl is-active", "active")
}

#[test]
fn dry_run_issues_no_mutating_commands_to_the_transport() {
    let fake = Arc::new(healthy_fake("pve1"));
    let proxmox = Arc::new(ProxmoxClient::new(fake.clone(), null_logger(), true));
    let mut options = base_options();
    options.dry_run = true;
    let machine = NodeStateMachine::new(proxmox, "pve1", options);

    let mut node = Node::new("pve2");
    machine.upgrade_node(&mut node, &null_logger()).unwrap();
    assert!(fake.mutating_calls().is_empty());
}

#[test]
fn matching_kernel_skips_reboot() {
    let fake = Arc::new(healthy_fake("pve1"));
    let proxmox = Arc::new(ProxmoxClient::new(fake.clone(), null_logger(), false));
    let machine = NodeStateMachine::new(proxmox, "pve1", base_options());

    let mut node = Node::new("pve2");
    machine.upgrade_node(&mut node, &null_logger()).unwrap();
    assert!(!fake.mutating_calls().contains(&"reboot".to_string()));
    assert_eq!(node.booted_kernel.as_deref(), Some("6.8.8-1-pve"));
    assert!(!node.kernel_mismatch());
}

#[test]
fn force_reboot_reboots_even_with_matching_kernel() {
    let fake = Arc::new(
        healthy_fake("pve1")
            // After the reboot, the liveness probe targets the node being
            // upgraded ("pve2"), not the seed, and must succeed immediately.
            .with("pve2", "whoami", "root"),
    );
    let proxmox = Arc::new(ProxmoxClient::new(fake.clone(), null_logger(), false));
    let mut options = base_options();
    options.force_reboot = true;
    let machine = NodeStateMachine::new(proxmox, "pve1", options);

    let mut node = Node::new("pve2");
    machine.upgrade_node(&mut node, &null_logger()).unwrap();
    assert!(fake.mutating_calls().contains(&"reboot".to_string()));
}

#[test]
fn allow_running_guests_skips_the_drain_wait() {
    let fake = Arc::new(
        FakeRemoteExec::new()
            .with_sequence(
                "pve1",
                "pvesh get cluster/ha/status/manager_status",
                &[
                    r#"{"manager_status":{"node_status":{"pve2":"online"}}}"#,
                    r#"{"manager_status":{"node_status":{"pve2":"maintenance"}}}"#,
                    r#"{"manager_status":{"node_status":{"pve2":"online"}}}"#,
                ],
            )
            .with("pve1", "pvesh get nodes/$(hostname)/tasks", "[]")
            // Guests report as running, but allow_running_guests should mean
            // this is never consulted.
            .with("pve1", "pvesh get nodes/$(hostname)/lxc", r#"[{"vmid":100,"status":"running"}]"#)
            .with("pve1", "uname -r", "6.8.8-1-pve")
            .with("pve1", "grep vmlinuz", "6.8.8-1-pve")
            .with("pve1", "systemctl is-active", "active"),
    );
    let proxmox = Arc::new(ProxmoxClient::new(fake.clone(), null_logger(), false));
    let mut options = base_options();
    options.allow_running_guests = true;
    let machine = NodeStateMachine::new(proxmox, "pve1", options);

    let mut node = Node::new("pve2");
    machine.upgrade_node(&mut node, &null_logger()).unwrap();
    assert!(!fake.calls().iter().any(|(_, c)| c.contains("qemu")));
    assert_eq!(node.running_guest_count, 0);
}

#[test]
fn no_maintenance_mode_skips_enable_and_disable_calls() {
    let fake = Arc::new(healthy_fake("pve1"));
    let proxmox = Arc::new(ProxmoxClient::new(fake.clone(), null_logger(), false));
    let mut options = base_options();
    options.use_maintenance_mode = false;
    let machine = NodeStateMachine::new(proxmox, "pve1", options);

    let mut node = Node::new("pve2");
    machine.upgrade_node(&mut node, &null_logger()).unwrap();
    assert!(!fake.mutating_calls().iter().any(|c| c.contains("node-maintenance")));
}
