//! Bounded readiness polling
//!
//! Everything here is built on [`poll_until`]: the same interval/deadline/
//! cancellation contract whether we are waiting on CRDs, workloads, or a
//! raw TCP port. Transient probe errors are logged and polled through;
//! only the deadline or cancellation ends a wait early.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bosun_core::{poll_until, InstallError, PollError, ReadinessTarget, Result};

use crate::probe::ClusterProbe;

/// Polls a set of targets until all exist or a deadline passes
pub struct ReadinessWaiter {
    probe: Arc<dyn ClusterProbe>,
    interval: Duration,
    timeout: Duration,
}

impl ReadinessWaiter {
    pub fn new(probe: Arc<dyn ClusterProbe>, interval: Duration, timeout: Duration) -> Self {
        Self {
            probe,
            interval,
            timeout,
        }
    }

    /// Wait until every target reports present
    ///
    /// Targets are checked each tick and dropped from the outstanding set as
    /// they appear; a target once seen is never re-checked. On timeout the
    /// error carries exactly the targets still outstanding.
    pub async fn wait_for(
        &self,
        targets: Vec<ReadinessTarget>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        debug!(count = targets.len(), timeout = ?self.timeout, "waiting for targets");

        let outstanding = Arc::new(Mutex::new(targets));
        let probe = Arc::clone(&self.probe);

        let result = poll_until(self.interval, self.timeout, cancel, || {
            let probe = Arc::clone(&probe);
            let outstanding = Arc::clone(&outstanding);
            let cancel = cancel.clone();
            async move {
                let mut remaining = outstanding.lock().await;
                let mut still_missing = Vec::with_capacity(remaining.len());

                for target in remaining.iter() {
                    match probe.check(target, &cancel).await {
                        Ok(true) => info!(target = %target, "ready"),
                        Ok(false) => still_missing.push(target.clone()),
                        Err(e) if e.is_cancelled() => {
                            // poll_until observes the token itself; just
                            // keep the target so the set stays accurate.
                            still_missing.push(target.clone());
                        }
                        Err(e) => {
                            warn!(target = %target, error = %e, "probe error, will retry");
                            still_missing.push(target.clone());
                        }
                    }
                }

                *remaining = still_missing;
                if remaining.is_empty() {
                    Some(())
                } else {
                    None
                }
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Cancelled) => Err(InstallError::Cancelled),
            Err(PollError::TimedOut { elapsed }) => {
                let missing = outstanding.lock().await.clone();
                Err(InstallError::ReadinessTimeout { elapsed, missing })
            }
        }
    }
}

/// Wait for a raw TCP connect to succeed against the API endpoint
///
/// Proves the data-plane port is listening before anything speaks HTTP to
/// it. Each attempt is itself bounded by the poll interval.
pub async fn wait_for_api_port(
    addr: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    debug!(addr, "probing API port");
    let result = poll_until(interval, timeout, cancel, || {
        let addr = addr.to_string();
        async move {
            match tokio::time::timeout(interval, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => Some(()),
                Ok(Err(e)) => {
                    debug!(addr = %addr, error = %e, "port not reachable yet");
                    None
                }
                Err(_) => None,
            }
        }
    })
    .await;

    match result {
        Ok(()) => {
            info!(addr, "API port reachable");
            Ok(())
        }
        Err(PollError::Cancelled) => Err(InstallError::Cancelled),
        Err(PollError::TimedOut { .. }) => {
            let attempts = (timeout.as_secs() / interval.as_secs().max(1)).max(1) as u32;
            Err(InstallError::ConnectivityFailure {
                attempts,
                last: format!("API port {} not reachable", addr),
            })
        }
    }
}

/// Confirm the control plane answers, retrying a fixed number of times
pub async fn check_connectivity(
    probe: &dyn ClusterProbe,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut last = String::new();

    for attempt in 1..=attempts {
        match probe.ping(cancel).await {
            Ok(()) => {
                debug!(attempt, "control plane reachable");
                return Ok(());
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "connectivity check failed");
                last = e.to_string();
            }
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(InstallError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(InstallError::ConnectivityFailure { attempts, last })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bosun_core::TargetCategory;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Probe that reports each target present after a configured number of
    /// checks, and the control plane up after a configured number of pings.
    struct ScriptedProbe {
        ready_after: u32,
        checks: AtomicU32,
        pings: AtomicU32,
        ping_ok_after: u32,
    }

    impl ScriptedProbe {
        fn new(ready_after: u32) -> Self {
            Self {
                ready_after,
                checks: AtomicU32::new(0),
                pings: AtomicU32::new(0),
                ping_ok_after: 0,
            }
        }

        fn flaky_ping(ok_after: u32) -> Self {
            Self {
                ready_after: 0,
                checks: AtomicU32::new(0),
                pings: AtomicU32::new(0),
                ping_ok_after: ok_after,
            }
        }
    }

    #[async_trait]
    impl ClusterProbe for ScriptedProbe {
        async fn check(&self, _: &ReadinessTarget, _: &CancellationToken) -> Result<bool> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n > self.ready_after)
        }

        async fn ping(&self, _: &CancellationToken) -> Result<()> {
            let n = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.ping_ok_after {
                Ok(())
            } else {
                Err(InstallError::Api("connection refused".to_string()))
            }
        }

        async fn ensure_namespace(&self, _: &str, _: &CancellationToken) -> Result<()> {
            Ok(())
        }
    }

    fn crd_target(name: &str) -> ReadinessTarget {
        ReadinessTarget::cluster_scoped(TargetCategory::Crd, name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_immediate_success() {
        let waiter = ReadinessWaiter::new(
            Arc::new(ScriptedProbe::new(0)),
            Duration::from_secs(5),
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        waiter
            .wait_for(vec![crd_target("applications.argoproj.io")], &cancel)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_eventual_success() {
        // Two targets, each present from its third check onward.
        let waiter = ReadinessWaiter::new(
            Arc::new(ScriptedProbe::new(4)),
            Duration::from_secs(5),
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        waiter
            .wait_for(
                vec![
                    crd_target("applications.argoproj.io"),
                    crd_target("appprojects.argoproj.io"),
                ],
                &cancel,
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_timeout_names_missing() {
        let waiter = ReadinessWaiter::new(
            Arc::new(ScriptedProbe::new(u32::MAX)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        let cancel = CancellationToken::new();
        let err = waiter
            .wait_for(
                vec![
                    crd_target("applications.argoproj.io"),
                    crd_target("applicationsets.argoproj.io"),
                ],
                &cancel,
            )
            .await
            .unwrap_err();

        match err {
            InstallError::ReadinessTimeout { missing, .. } => {
                assert_eq!(missing.len(), 2);
                assert_eq!(missing[0].name, "applications.argoproj.io");
            }
            other => panic!("expected ReadinessTimeout, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_empty_targets() {
        let waiter = ReadinessWaiter::new(
            Arc::new(ScriptedProbe::new(u32::MAX)),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        waiter.wait_for(vec![], &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cancellation() {
        let waiter = ReadinessWaiter::new(
            Arc::new(ScriptedProbe::new(u32::MAX)),
            Duration::from_secs(5),
            Duration::from_secs(300),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                waiter.wait_for(vec![crd_target("x")], &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_retries_then_succeeds() {
        let probe = ScriptedProbe::flaky_ping(2);
        let cancel = CancellationToken::new();
        check_connectivity(&probe, 3, Duration::from_secs(2), &cancel)
            .await
            .unwrap();
        assert_eq!(probe.pings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_exhausts_attempts() {
        let probe = ScriptedProbe::flaky_ping(u32::MAX);
        let cancel = CancellationToken::new();
        let err = check_connectivity(&probe, 3, Duration::from_secs(2), &cancel)
            .await
            .unwrap_err();
        match err {
            InstallError::ConnectivityFailure { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("connection refused"));
            }
            other => panic!("expected ConnectivityFailure, got {other}"),
        }
    }
}
