//! Operator alerting.
//!
//! Every alert is written to the local log under the configured tag; when
//! Telegram credentials are present the message is also pushed there.
//! Delivery is best effort: a failed push is logged and reported, but never
//! fails the operation that raised the alert.

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

use crate::config::AlertsSection;

/// Alert severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "critical" | "crit" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity '{other}' (expected info, warning or critical)"
            )),
        }
    }
}

/// Where an alert ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the local log only.
    LoggedOnly,
    /// Also delivered to Telegram.
    Delivered,
    /// Telegram was configured but the push failed.
    PushFailed,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Alert sink. Cheap to construct per invocation.
pub struct Alerter {
    config: AlertsSection,
    hostname: String,
    client: reqwest::Client,
}

impl Alerter {
    pub fn new(config: AlertsSection) -> Self {
        let hostname = read_hostname();
        Self {
            config,
            hostname,
            client: reqwest::Client::new(),
        }
    }

    /// Raise an alert.
    pub async fn send(&self, severity: Severity, message: &str) -> Delivery {
        let line = format_message(severity, &self.hostname, message);
        match severity {
            Severity::Info => info!(tag = %self.config.syslog_tag, "{line}"),
            Severity::Warning => warn!(tag = %self.config.syslog_tag, "{line}"),
            Severity::Critical => error!(tag = %self.config.syslog_tag, "{line}"),
        }

        if !self.config.enabled {
            return Delivery::LoggedOnly;
        }
        let (Some(token), Some(chat_id)) = (
            self.config.telegram_bot_token.as_deref(),
            self.config.telegram_chat_id.as_deref(),
        ) else {
            warn!("alerts.enabled is set but Telegram credentials are missing");
            return Delivery::LoggedOnly;
        };

        match self.push_telegram(token, chat_id, &line).await {
            Ok(()) => Delivery::Delivered,
            Err(err) => {
                warn!("telegram delivery failed: {err:#}");
                Delivery::PushFailed
            }
        }
    }

    async fn push_telegram(&self, token: &str, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let url = telegram_url(token);
        let body = SendMessage { chat_id, text };
        self.client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn telegram_url(token: &str) -> String {
    format!("https://api.telegram.org/bot{token}/sendMessage")
}

/// `[SEVERITY] host: message`, the shape log scrapers already match on.
pub fn format_message(severity: Severity, hostname: &str, message: &str) -> String {
    format!("[{severity}] {hostname}: {message}")
}

fn read_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "trainbox".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parses_aliases() {
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn message_format_is_stable() {
        let line = format_message(Severity::Critical, "gpubox", "backup failed");
        assert_eq!(line, "[CRITICAL] gpubox: backup failed");
    }

    #[test]
    fn telegram_url_embeds_token() {
        assert_eq!(
            telegram_url("123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[tokio::test]
    async fn disabled_alerts_stay_local() {
        let alerter = Alerter::new(AlertsSection::default());
        let delivery = alerter.send(Severity::Info, "hello").await;
        assert_eq!(delivery, Delivery::LoggedOnly);
    }

    #[tokio::test]
    async fn enabled_without_credentials_stays_local() {
        let config = AlertsSection {
            enabled: true,
            ..Default::default()
        };
        let alerter = Alerter::new(config);
        let delivery = alerter.send(Severity::Warning, "hello").await;
        assert_eq!(delivery, Delivery::LoggedOnly);
    }
}
