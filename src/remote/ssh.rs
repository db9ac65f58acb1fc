// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! SSH-backed [`RemoteExec`], built on `russh`.
//!
//! One cached session per host, bridged to a synchronous call through an
//! internal single-threaded tokio runtime — the same shape as `jetpack`'s
//! `SshConnection` (`runtime: Mutex<Runtime>`), which lets this type be
//! `Sync` and callable from the `rayon` fan-out pool without every caller
//! needing to be async.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh::client::{self, AuthResult};
use russh::ChannelMsg;
use tokio::runtime::Runtime;

use crate::error::{PveRollError, Result};
use crate::logger::Logger;
use crate::remote::{CommandOutput, RemoteExec};

/// Connection parameters shared across all hosts for one run.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    /// When true, only public-key authentication is attempted
    /// (`PasswordAuthentication=no` in spirit — this client never attempts
    /// password auth to begin with, so this mainly restricts which key
    /// sources are tried).
    pub key_auth_only: bool,
    /// Opaque extra options from `--ssh-option`. A library SSH client has
    /// no command line to append them to; they are accepted for CLI
    /// compatibility and logged at debug level, not interpreted. See
    /// DESIGN.md.
    pub ssh_options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: String::from("root"),
            port: 22,
            key_auth_only: false,
            ssh_options: Vec::new(),
        }
    }
}

struct Handler;

impl client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Equivalent to StrictHostKeyChecking=accept-new: this tool targets
        // nodes the operator already trusts (they're in the same cluster).
        Ok(true)
    }
}

struct Session {
    runtime: Mutex<Runtime>,
    handle: client::Handle<Handler>,
}

/// Executes commands over SSH, caching one session per host for the
/// lifetime of the orchestrator run.
pub struct SshRemoteExec {
    config: SshConfig,
    logger: Logger,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SshRemoteExec {
    pub fn new(config: SshConfig, logger: Logger) -> Self {
        Self {
            config,
            logger,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_connect(&self, host: &str, timeout: Option<Duration>) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.lock().unwrap().get(host) {
            return Ok(Arc::clone(session));
        }

        if self.logger.ssh_verbose_flag() {
            self.logger
                .debug(&format!("ssh: connecting to {host} as {}", self.config.user));
        }
        for opt in &self.config.ssh_options {
            self.logger
                .debug(&format!("ssh: option (compatibility, unused by transport): {opt}"));
        }

        let session = self.connect(host, timeout.unwrap_or(Duration::from_secs(10)))?;
        let session = Arc::new(session);
        self.sessions
            .lock()
            .unwrap()
            .insert(host.to_string(), Arc::clone(&session));
        Ok(session)
    }

    fn connect(&self, host: &str, connect_timeout: Duration) -> Result<Session> {
        let runtime = Runtime::new().map_err(|e| PveRollError::Unreachable {
            host: host.to_string(),
            detail: format!("failed to start async runtime: {e}"),
        })?;

        let connect_str = format!("{host}:{}", self.config.port);
        let addr = connect_str
            .to_socket_addrs()
            .map_err(|e| PveRollError::Unreachable {
                host: host.to_string(),
                detail: format!("unable to resolve {connect_str}: {e}"),
            })?
            .next()
            .ok_or_else(|| PveRollError::Unreachable {
                host: host.to_string(),
                detail: format!("unable to resolve {connect_str}"),
            })?;

        let user = self.config.user.clone();
        let key_auth_only = self.config.key_auth_only;
        let host_owned = host.to_string();

        let handle = runtime.block_on(async move {
            let ssh_config = Arc::new(client::Config::default());
            let mut handle = tokio::time::timeout(
                connect_timeout,
                client::connect(ssh_config, addr, Handler),
            )
            .await
            .map_err(|_| PveRollError::Unreachable {
                host: host_owned.clone(),
                detail: "connection timed out".into(),
            })?
            .map_err(|e| PveRollError::Unreachable {
                host: host_owned.clone(),
                detail: e.to_string(),
            })?;

            authenticate(&mut handle, &user, key_auth_only, &host_owned).await?;
            Ok::<_, PveRollError>(handle)
        })?;

        Ok(Session {
            runtime: Mutex::new(runtime),
            handle,
        })
    }

    fn run_low_level(&self, session: &Session, host: &str, command: &str) -> Result<CommandOutput> {
        let actual_cmd = format!("LANG=C {command}");
        let result = session.runtime.lock().unwrap().block_on(async {
            let mut channel = session
                .handle
                .channel_open_session()
                .await
                .map_err(|e| format!("channel open failed: {e}"))?;
            channel
                .exec(true, actual_cmd.as_bytes())
                .await
                .map_err(|e| format!("exec failed: {e}"))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code: Option<u32> = None;

            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { ref data }) => stdout.extend_from_slice(data),
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => stderr.extend_from_slice(data),
                    Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                    Some(ChannelMsg::Eof) | None => break,
                    _ => {}
                }
            }

            Ok::<_, String>((
                exit_code.unwrap_or(0) as i32,
                String::from_utf8_lossy(&stdout).to_string(),
                String::from_utf8_lossy(&stderr).to_string(),
            ))
        });

        match result {
            Ok((exit_code, stdout, stderr)) => Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            }),
            Err(detail) => Err(PveRollError::Remote {
                host: host.to_string(),
                command: command.to_string(),
                detail,
            }),
        }
    }
}

async fn authenticate(
    handle: &mut client::Handle<Handler>,
    user: &str,
    key_auth_only: bool,
    host: &str,
) -> Result<()> {
    let err = |detail: String| PveRollError::Unreachable {
        host: host.to_string(),
        detail,
    };

    // Try the running SSH agent first — the expected path for a fleet
    // orchestrator, where keys live in the operator's agent, not on disk
    // next to the binary.
    if let Ok(sock) = std::env::var("SSH_AUTH_SOCK") {
        if let Ok(stream) = tokio::net::UnixStream::connect(&sock).await {
            let mut agent = russh::keys::agent::client::AgentClient::connect(stream);
            if let Ok(identities) = agent.request_identities().await {
                for identity in &identities {
                    if let Ok(AuthResult::Success) = handle
                        .authenticate_publickey_with(user, identity.clone(), None, &mut agent)
                        .await
                    {
                        return Ok(());
                    }
                }
            }
        }
    }

    if key_auth_only {
        return Err(err(format!(
            "no agent identity authenticated user {user} and key-auth-only is set"
        )));
    }

    // Fall back to the operator's default key files.
    for candidate in ["id_ed25519", "id_rsa"] {
        let path = dirs_home_ssh(candidate);
        if !path.exists() {
            continue;
        }
        if let Ok(key) = russh::keys::load_secret_key(&path, None) {
            let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None);
            if let Ok(AuthResult::Success) = handle.authenticate_publickey(user, key_with_alg).await
            {
                return Ok(());
            }
        }
    }

    Err(err(format!(
        "no usable identity (agent or ~/.ssh/{{id_ed25519,id_rsa}}) for user {user}"
    )))
}

fn dirs_home_ssh(filename: &str) -> std::path::PathBuf {
    let home = std::env::var("HOME").unwrap_or_default();
    Path::new(&home).join(".ssh").join(filename)
}

impl RemoteExec for SshRemoteExec {
    fn run(&self, host: &str, command: &str, timeout: Option<Duration>) -> Result<CommandOutput> {
        let session = self.get_or_connect(host, timeout)?;
        self.run_low_level(&session, host, command)
    }
}
