//! HTTP delivery to the collector endpoint
//!
//! One POST per cycle per exporter, with a bounded timeout. Failures are
//! logged and the envelope is dropped: no retry, no local persistence, no
//! backpressure on the scheduler. Losing one interval of metrics is
//! preferable to blocking or growing unbounded queues on a degraded
//! network.

use crate::error::DeliveryError;
use log::{error, info};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Default outbound request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Owned HTTP client plus the runtime that drives it from exporter threads
pub struct DeliveryClient {
    client: Client,
    runtime: Runtime,
}

impl DeliveryClient {
    /// Client with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| DeliveryError::ClientBuild(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DeliveryError::ClientBuild(e.to_string()))?;

        Ok(Self { client, runtime })
    }

    /// POST a JSON payload; returns whether the collector accepted it
    ///
    /// Any 2xx is success. Anything else, or a transport error, is logged
    /// and reported as failure; the error never crosses the cycle
    /// boundary.
    pub fn deliver<T: Serialize + ?Sized>(&self, context: &str, url: &str, payload: &T) -> bool {
        match self.post(url, payload) {
            Ok(()) => {
                info!("{}: delivered to {}", context, url);
                true
            }
            Err(e) => {
                error!("{}: delivery to {} failed, dropping payload: {}", context, url, e);
                false
            }
        }
    }

    fn post<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<(), DeliveryError> {
        let request = self.client.post(url).json(payload);
        let response = self.runtime.block_on(async move { request.send().await })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::BadStatus(status.as_u16()))
        }
    }
}
