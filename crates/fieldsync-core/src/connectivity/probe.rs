use std::time::Duration;

use reqwest::Url;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::util::is_http_url;

use super::{publish, Reachability};

const PROBE_TIMEOUT_SECS: u64 = 5;

/// Polls the API base URL and publishes reachability.
///
/// Any HTTP response counts as reachable; only transport failures (DNS,
/// connect, timeout) mark the network offline.
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    url: Url,
    interval: Duration,
    client: reqwest::Client,
}

impl HttpReachabilityProbe {
    pub fn new(base_url: &str, interval: Duration) -> Result<Self> {
        let base_url = base_url.trim();
        if !is_http_url(base_url) {
            return Err(Error::Config(
                "probe URL must include http:// or https://".to_string(),
            ));
        }
        let url = Url::parse(base_url)
            .map_err(|error| Error::Config(format!("Invalid probe URL: {error}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Config(format!("Failed to construct HTTP client: {error}")))?;

        Ok(Self {
            url,
            interval,
            client,
        })
    }

    pub async fn check(&self) -> Reachability {
        match self.client.head(self.url.clone()).send().await {
            Ok(response) => {
                tracing::trace!(status = %response.status(), "Reachability probe answered");
                Reachability::Online
            }
            Err(error) => {
                tracing::debug!(%error, "Reachability probe failed");
                Reachability::Offline
            }
        }
    }

    /// Probe on a fixed interval until every receiver is gone.
    pub fn spawn(self, sender: watch::Sender<Reachability>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let reachability = self.check().await;
                if publish(&sender, reachability) {
                    tracing::info!(?reachability, "Reachability changed");
                }
                if sender.is_closed() {
                    break;
                }
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}
