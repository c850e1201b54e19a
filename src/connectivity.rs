//! Network reachability probe.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::client::ClientError;
use crate::config::Config;
use crate::dedup_log::{DedupLogger, LogLevel};

pub const ONLINE_MESSAGE: &str = "Internet is on";
pub const OFFLINE_MESSAGE: &str = "OFFLINE";

/// Answers "is the network reachable right now?".
pub trait Connectivity {
    fn is_online(&self, log: &mut DedupLogger) -> impl Future<Output = bool>;
}

/// Probe issuing a single GET against a well-known host.
///
/// Any HTTP response, whatever its status, counts as reachable. Only a
/// timeout or a failure to connect reports the network as down. The probe
/// never retries; the reporting loop decides when to ask again.
pub struct ConnectivityProbe {
    client: Client,
    target: String,
}

impl ConnectivityProbe {
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_target(config.probe_url.clone(), config.probe_timeout)
    }

    pub fn with_target(target: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            target: target.into(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Connectivity for ConnectivityProbe {
    async fn is_online(&self, log: &mut DedupLogger) -> bool {
        match self.client.get(&self.target).send().await {
            Ok(response) => {
                debug!(target_url = %self.target, status = %response.status(), "Probe answered");
                log.log(ONLINE_MESSAGE, LogLevel::Info);
                true
            }
            Err(e) => {
                debug!(target_url = %self.target, error = %e, "Probe failed");
                log.log(OFFLINE_MESSAGE, LogLevel::Warning);
                false
            }
        }
    }
}
