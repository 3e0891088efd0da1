//! Reconnect supervisor for the AMI session.
//!
//! States: Disconnected -> Connecting -> Authenticated/Subscribed. On
//! any transport error the supervisor drops back to Disconnected, emits
//! one "connection lost" alert for the whole loss episode and retries
//! with capped exponential backoff. This loop runs for the lifetime of
//! the process and is the only task allowed to sleep indefinitely on
//! backoff.

use crate::{AmiClient, AmiError, AmiResult, ConnectSettings};
use gateway_config::Alert;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub connect: ConnectSettings,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl SupervisorConfig {
    pub fn new(connect: ConnectSettings) -> Self {
        Self {
            connect,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

/// Backoff for the given retry attempt: `base * 2^attempt`, capped.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    std::cmp::min(base.saturating_mul(factor), max)
}

/// Deduplicates loss/recovery alerts: exactly one "lost" per loss
/// episode, one "restored" per recovery, none when nothing was lost.
#[derive(Debug, Default)]
pub struct AlertGate {
    loss_signaled: bool,
}

impl AlertGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message to alert on connection loss, or None if this episode was
    /// already signaled.
    pub fn lost(&mut self) -> Option<&'static str> {
        if self.loss_signaled {
            None
        } else {
            self.loss_signaled = true;
            Some("Lost connection to Asterisk")
        }
    }

    /// Message to alert on recovery, or None if no loss was signaled.
    pub fn recovered(&mut self) -> Option<&'static str> {
        if self.loss_signaled {
            self.loss_signaled = false;
            Some("Asterisk connection restored")
        } else {
            None
        }
    }
}

/// Own the AMI session until shutdown. Returns `Err` only for fatal
/// conditions (rejected credentials); transport churn is absorbed here
/// and is invisible to every other component.
pub async fn run_supervisor(
    client: AmiClient,
    config: SupervisorConfig,
    alerter: Arc<dyn Alert>,
    mut shutdown: watch::Receiver<bool>,
) -> AmiResult<()> {
    let mut gate = AlertGate::new();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match client.connect(&config.connect).await {
            Ok(closed) => {
                attempt = 0;
                info!(host = %config.connect.host, "AMI session established");
                if let Some(message) = gate.recovered() {
                    alerter.alert(message);
                }

                tokio::select! {
                    _ = shutdown.changed() => {
                        if let Err(e) = client.logoff().await {
                            warn!(error = %e, "AMI logoff failed");
                        }
                        return Ok(());
                    }
                    _ = closed => {
                        client.disconnect().await;
                        warn!("AMI session dropped");
                        if let Some(message) = gate.lost() {
                            alerter.alert(message);
                        }
                    }
                }
            }
            Err(AmiError::Authentication(message)) => {
                // Bad credentials never fix themselves; surface to the
                // top-level supervisor.
                return Err(AmiError::Authentication(message));
            }
            Err(e) => {
                warn!(error = %e, attempt, "AMI connect failed");
                if let Some(message) = gate.lost() {
                    alerter.alert(message);
                }
                let delay = backoff_delay(attempt, config.backoff_base, config.backoff_max);
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = shutdown.changed() => return Ok(()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_non_decreasing_and_capped() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);

        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = backoff_delay(attempt, base, max);
            assert!(delay >= previous);
            assert!(delay <= max);
            previous = delay;
        }
        assert_eq!(backoff_delay(0, base, max), Duration::from_secs(5));
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(10));
        assert_eq!(backoff_delay(3, base, max), Duration::from_secs(40));
        assert_eq!(backoff_delay(20, base, max), max);
    }

    #[test]
    fn alert_gate_fires_once_per_episode() {
        let mut gate = AlertGate::new();

        // No recovery alert before any loss.
        assert_eq!(gate.recovered(), None);

        assert!(gate.lost().is_some());
        // Repeated failures within the same episode stay quiet.
        assert_eq!(gate.lost(), None);
        assert_eq!(gate.lost(), None);

        assert!(gate.recovered().is_some());
        assert_eq!(gate.recovered(), None);

        // A new episode alerts again.
        assert!(gate.lost().is_some());
    }
}
