// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

use std::process::ExitCode;
use std::sync::Arc;

use pve_roll::cli::{self, ParseOutcome};
use pve_roll::config::{RunConfig, SSH_USER_ENV_VAR};
use pve_roll::error::exit_code_for;
use pve_roll::logger::{Logger, TerminalSink};
use pve_roll::remote::ssh::{SshConfig, SshRemoteExec};
use pve_roll::remote::RemoteExec;
use pve_roll::{Orchestrator, RunOutcome};

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    match cli::parse(&argv) {
        Ok(ParseOutcome::Help) => {
            termimad::print_text(cli::USAGE);
            ExitCode::SUCCESS
        }
        Ok(ParseOutcome::Version) => {
            println!("pve-roll {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Ok(ParseOutcome::Run(args)) => {
            let verbose = args.verbose;
            let env_user = std::env::var(SSH_USER_ENV_VAR).ok();
            match RunConfig::from_cli(args, env_user) {
                Ok(config) => run(config, verbose),
                Err(e) => fail(&e, verbose),
            }
        }
        Err(e) => fail(&e, 0),
    }
}

fn run(config: RunConfig, verbose: u8) -> ExitCode {
    let logger = Logger::new(verbose, Arc::new(TerminalSink::new()));

    let ssh_config = SshConfig {
        user: config.ssh_user.clone(),
        port: 22,
        key_auth_only: config.ssh_key_auth_only,
        ssh_options: config.ssh_options.clone(),
    };
    let remote: Arc<dyn RemoteExec> = Arc::new(SshRemoteExec::new(ssh_config, logger.clone()));

    let orchestrator = Orchestrator::new(remote, logger.clone(), config);
    match orchestrator.run() {
        Ok(RunOutcome::NothingToDo) => ExitCode::SUCCESS,
        Ok(RunOutcome::Completed(hosts)) => {
            logger.info(&format!("upgraded {} node(s): {}", hosts.len(), hosts.join(", ")));
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e, verbose),
    }
}

fn fail(err: &pve_roll::error::PveRollError, verbose: u8) -> ExitCode {
    let logger = Logger::new(verbose, Arc::new(TerminalSink::new()));
    logger.error(&format!("{err}"));
    if matches!(err, pve_roll::error::PveRollError::Config(_)) {
        eprintln!("see --help for usage");
    }
    ExitCode::from(exit_code_for(err) as u8)
}
