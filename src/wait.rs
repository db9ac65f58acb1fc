// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! A single polling-wait shape shared by every place this tool waits for
//! something to settle: HA mode, guest drain, task idle, reboot-up,
//! service-active. Grounded on `jetpack`'s `modules/control/wait_for_host.rs`
//! loop, generalized from "host responds to ping" to "probe returns Done".
//!
//! There is deliberately no retry cap (spec §7, §9): the operator is the
//! timeout, and is expected to interrupt the process if a wait never
//! settles. A `timeout` is accepted only so tests can bound a wait that
//! should never actually need one.

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::error::{PveRollError, Result};
use crate::logger::Logger;

/// What a single probe observed.
pub enum WaitState {
    /// The condition holds; stop polling.
    Done,
    /// Still waiting; the string is a short human-readable description of
    /// what was observed, used for progress logging at verbosity >= 1.
    Pending(String),
}

/// Polls `probe` every `period` until it reports [`WaitState::Done`].
/// `timeout`, when given, bounds the wait and yields
/// `Err(PveRollError::Other)` on expiry; `None` polls forever, which is the
/// production default for every call site.
pub fn wait_until<F>(
    logger: &Logger,
    label: &str,
    timeout: Option<Duration>,
    period: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Result<WaitState>,
{
    let started = Instant::now();
    let mut last_observed = String::new();

    loop {
        match probe()? {
            WaitState::Done => {
                logger.progress_done();
                return Ok(());
            }
            WaitState::Pending(observed) => {
                last_observed = observed;
                logger.progress_tick(&last_observed);
            }
        }

        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                logger.progress_done();
                return Err(PveRollError::Other(format!(
                    "timed out waiting for {label} after {:?}: last observed {last_observed}",
                    started.elapsed()
                )));
            }
        }

        sleep(period);
    }
}
