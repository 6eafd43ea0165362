//! Fire-and-forget error reporting.
//!
//! Caught errors that degrade locally (dropped frames, skipped markets,
//! failed reconnect attempts) are additionally reported here so an operator
//! can see failure rates without any single failure crashing the process.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub trait ErrorMonitor: Send + Sync {
    /// Report a caught error. Must never block or fail the caller.
    fn report(&self, component: &str, detail: &str);
}

/// Monitor that only writes to the log. Default when no webhook is configured.
pub struct LogMonitor;

impl ErrorMonitor for LogMonitor {
    fn report(&self, component: &str, detail: &str) {
        warn!("[{}] {}", component, detail);
    }
}

/// Monitor that POSTs each report to an operator webhook.
pub struct WebhookMonitor {
    client: reqwest::Client,
    url: String,
}

impl WebhookMonitor {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, url }
    }

    /// Build from `MONITOR_WEBHOOK_URL`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var("MONITOR_WEBHOOK_URL").ok().map(Self::new)
    }
}

impl ErrorMonitor for WebhookMonitor {
    fn report(&self, component: &str, detail: &str) {
        let payload = serde_json::json!({
            "component": component,
            "detail": detail,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("monitor report delivered");
                }
                Ok(resp) => {
                    warn!("monitor webhook returned {}", resp.status());
                }
                Err(e) => {
                    warn!("monitor webhook send failed: {}", e);
                }
            }
        });
    }
}

/// Pick the webhook monitor when configured, else fall back to logging.
pub fn monitor_from_env() -> Arc<dyn ErrorMonitor> {
    match WebhookMonitor::from_env() {
        Some(m) => Arc::new(m),
        None => Arc::new(LogMonitor),
    }
}
