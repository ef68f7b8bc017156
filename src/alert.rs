// src/alert.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Something an operator should look at.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: String,
    pub kind: String,
    pub grader: Option<String>,
    pub detail: String,
    pub timestamp: String,
}

impl Incident {
    pub fn new(kind: &str, grader: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            grader: grader.map(str::to_string),
            detail: detail.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Delivery never fails the grading request; sinks log their own errors.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, incident: &Incident);
}

#[derive(Debug, Default, Clone)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, incident: &Incident) {
        log::error!(
            "[{}] {} (grader: {}): {}",
            incident.id,
            incident.kind,
            incident.grader.as_deref().unwrap_or("-"),
            incident.detail
        );
    }
}

/// Logs the incident and posts it as JSON to a webhook.
pub struct WebhookAlerter {
    client: Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Alerter for WebhookAlerter {
    async fn alert(&self, incident: &Incident) {
        LogAlerter.alert(incident).await;

        match self.client.post(&self.url).json(incident).send().await {
            Ok(resp) if resp.status().is_success() => {
                log::debug!("Alert {} delivered", incident.id);
            }
            Ok(resp) => log::warn!("Alert {} rejected with status {}", incident.id, resp.status()),
            Err(e) => log::warn!("Alert {} not delivered: {}", incident.id, e),
        }
    }
}
