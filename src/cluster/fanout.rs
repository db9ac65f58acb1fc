// pve-roll
// Rolling upgrade orchestrator for Proxmox VE clusters.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// at your option) any later version.

//! Parallel per-node operation runner with aggregated, non-short-circuiting
//! failure reporting. Grounded on `jetpack`'s `rayon::ThreadPoolBuilder`
//! usage in `api.rs` — the same choice of parallelism primitive, since
//! every job here is a short blocking SSH round-trip rather than an
//! `async` task.

use rayon::prelude::*;

use crate::error::Result;
use crate::logger::{Logger, LEVEL_DEBUG3};

/// Outcome of one node's job within a fan-out call.
pub struct FanOutResult<T> {
    pub host: String,
    pub result: Result<T>,
}

/// Runs `op` for every host in `hosts` concurrently, each given a
/// child logger prefixed with its own hostname (and, at verbosity >= 4, a
/// stable per-job sequence number, so interleaved output stays
/// parseable — spec §4.6). Every job runs to completion; a failing job
/// never cancels the others.
pub fn fan_out<T, F>(hosts: &[String], logger: &Logger, op: F) -> Vec<FanOutResult<T>>
where
    T: Send,
    F: Fn(&str, &Logger) -> Result<T> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(hosts.len().max(1))
        .build();

    let run = |pool_logger: &Logger| -> Vec<FanOutResult<T>> {
        hosts
            .par_iter()
            .enumerate()
            .map(|(idx, host)| {
                let mut node_logger = pool_logger.with_prefix(host.clone());
                if pool_logger.level() >= LEVEL_DEBUG3 {
                    node_logger = node_logger.with_prefix(format!("job{idx}"));
                }
                let result = op(host, &node_logger);
                FanOutResult {
                    host: host.clone(),
                    result,
                }
            })
            .collect()
    };

    match pool {
        Ok(pool) => pool.install(|| run(logger)),
        // A pool failing to spin up (e.g. thread exhaustion) should not
        // stop the probes themselves from running; fall back to rayon's
        // global pool rather than aborting the whole fan-out.
        Err(_) => run(logger),
    }
}

/// Number of jobs whose result was `Err`.
pub fn failure_count<T>(results: &[FanOutResult<T>]) -> usize {
    results.iter().filter(|r| r.result.is_err()).count()
}

/// `true` iff every job in `results` succeeded.
pub fn all_succeeded<T>(results: &[FanOutResult<T>]) -> bool {
    failure_count(results) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PveRollError;
    use crate::logger::null_logger;

    #[test]
    fn runs_every_host_even_when_some_fail() {
        let hosts = vec!["pve1".to_string(), "pve2".to_string(), "pve3".to_string()];
        let logger = null_logger();
        let results = fan_out(&hosts, &logger, |host, _| {
            if host == "pve2" {
                Err(PveRollError::Other("boom".into()))
            } else {
                Ok(())
            }
        });
        assert_eq!(results.len(), 3);
        assert_eq!(failure_count(&results), 1);
        assert!(!all_succeeded(&results));
    }

    #[test]
    fn all_succeeded_true_when_zero_failures() {
        let hosts = vec!["pve1".to_string()];
        let logger = null_logger();
        let results = fan_out(&hosts, &logger, |_, _| Ok(42));
        assert!(all_succeeded(&results));
    }
}
