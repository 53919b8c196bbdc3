//! Notification sinks that receive freshly computed detection results

use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::NotificationsConfig;
use crate::detection::types::DetectionResult;

/// Timeout for webhook deliveries (10 seconds)
const WEBHOOK_TIMEOUT_MS: u64 = 10_000;

/// Receives detection results; the outcome never affects detection
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    /// Returns whether the notification was delivered
    async fn notify(&self, result: &DetectionResult) -> bool;
}

/// Title, body and attachment color describing `result`
fn summarize(result: &DetectionResult) -> (&'static str, String, &'static str) {
    let strategy = result.strategy.as_deref().unwrap_or("unknown");
    let detected_at = result.detected_at.to_rfc3339();

    if result.success {
        let message = format!(
            "Software: {}\nVersion: {}\nDownload: {}\nDetected at: {}\nStrategy: {}",
            result.name,
            result.version_string().unwrap_or_default(),
            result.download_url.as_deref().unwrap_or("unavailable"),
            detected_at,
            strategy
        );
        ("Version detected", message, "good")
    } else {
        let message = format!(
            "Software: {}\nError: {}\nDetected at: {}\nStrategy: {}",
            result.name,
            result.error.as_deref().unwrap_or("unknown error"),
            detected_at,
            strategy
        );
        ("Version detection failed", message, "danger")
    }
}

/// Writes results to the log
pub struct LogNotifier;

#[async_trait::async_trait]
impl NotificationSink for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, result: &DetectionResult) -> bool {
        let (title, message, _) = summarize(result);
        if result.success {
            info!("{}: {}", title, message.replace('\n', ", "));
        } else {
            warn!("{}: {}", title, message.replace('\n', ", "));
        }
        true
    }
}

/// Posts a chat-webhook (Slack-compatible) message per result
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(WEBHOOK_TIMEOUT_MS))
                .build()?,
            url: url.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, result: &DetectionResult) -> bool {
        let (title, message, color) = summarize(result);
        let payload = json!({
            "text": title,
            "attachments": [{
                "color": color,
                "text": message,
                "ts": result.detected_at.timestamp(),
            }]
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Webhook notification delivered for {}", result.name);
                true
            }
            Ok(response) => {
                warn!("Webhook returned status {} for {}", response.status(), result.name);
                false
            }
            Err(e) => {
                warn!("Webhook notification failed for {}: {}", result.name, e);
                false
            }
        }
    }
}

/// Sinks enabled by `config`: always the log sink, plus the webhook when configured
pub fn sinks_from_config(config: &NotificationsConfig) -> Vec<Box<dyn NotificationSink>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
    if !config.enabled {
        return sinks;
    }

    sinks.push(Box::new(LogNotifier));
    if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        match WebhookNotifier::new(url) {
            Ok(webhook) => sinks.push(Box::new(webhook)),
            Err(e) => warn!("Webhook notifications disabled: {}", e),
        }
    }
    sinks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::error::DetectionError;
    use crate::detection::types::RawRelease;
    use crate::version::VersionParser;
    use mockito::{Matcher, Server};

    fn success() -> DetectionResult {
        DetectionResult::succeeded(
            "Zoom",
            VersionParser::new().parse("5.16.10"),
            RawRelease {
                download_url: Some("https://zoom.us/download".to_string()),
                ..RawRelease::new("5.16.10", "zoom_web")
            },
            "zoom",
        )
    }

    #[test]
    fn summarize_describes_success_and_failure() {
        let (title, message, color) = summarize(&success());
        assert_eq!(title, "Version detected");
        assert_eq!(color, "good");
        assert!(message.contains("Version: 5.16.10"));
        assert!(message.contains("Download: https://zoom.us/download"));

        let failure = DetectionResult::failed("Zoom", &DetectionError::Timeout(500), None);
        let (title, message, color) = summarize(&failure);
        assert_eq!(title, "Version detection failed");
        assert_eq!(color, "danger");
        assert!(message.contains("Error: Timed out after 500 ms"));
        assert!(message.contains("Strategy: unknown"));
    }

    #[tokio::test]
    async fn webhook_posts_slack_payload() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "text": "Version detected"
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();

        assert!(notifier.notify(&success()).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn webhook_reports_rejected_delivery() {
        let mut server = Server::new_async().await;

        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.url())).unwrap();

        assert!(!notifier.notify(&success()).await);
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        assert!(LogNotifier.notify(&success()).await);
    }

    #[test]
    fn sinks_from_config_respects_enabled_flag() {
        assert!(sinks_from_config(&NotificationsConfig::default()).is_empty());

        let sinks = sinks_from_config(&NotificationsConfig {
            enabled: true,
            webhook_url: Some("https://hooks.example.com/x".to_string()),
        });
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["log", "webhook"]);
    }
}
