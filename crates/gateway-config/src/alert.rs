//! Emergency alerting.
//!
//! Everything the gateway considers an emergency (lost PBX connection,
//! outbox overload, persistence failure) funnels through one
//! `alert(message)` capability. Delivery to the operator is best-effort;
//! every alert is also logged at ERROR.

use std::time::Duration;
use tracing::error;

const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// The alert capability. Implementations must not block the caller.
pub trait Alert: Send + Sync {
    fn alert(&self, message: &str);
}

/// Production alerter: logs the message and, when a webhook is
/// configured, fires it off on a background task.
pub struct Alerter {
    pbx_name: String,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Alerter {
    pub fn new(pbx_name: &str, webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ALERT_TIMEOUT)
            .build()
            .expect("reqwest client with static settings");
        Self {
            pbx_name: pbx_name.to_string(),
            webhook_url,
            client,
        }
    }
}

impl Alert for Alerter {
    fn alert(&self, message: &str) {
        let text = format!("{}: {}", self.pbx_name, message);
        error!(alert = %text, "ALERT");

        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client.get(&url).query(&[("msgtext", text.as_str())]).send().await;
            if let Err(e) = result {
                error!(error = %e, "Failed to deliver alert webhook");
            }
        });
    }
}
