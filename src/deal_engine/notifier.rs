//! Fire-and-forget chat webhook delivery

use reqwest::Client;
use std::time::Duration;

use crate::deal_engine::formatter::NotificationPayload;
use crate::deal_engine::scraper::truncate;
use crate::error::{Error, Result};

const MAX_ERROR_BODY: usize = 512;

pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, url }
    }

    /// POST the payload once. Non-success statuses come back as [`Error::Delivery`]; nothing is retried.
    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
        let response = self.client.post(&self.url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Delivery {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        Ok(())
    }
}
