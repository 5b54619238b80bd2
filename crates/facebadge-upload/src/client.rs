//! HTTP delivery to the attendance endpoint.

use crate::payload::Payload;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("endpoint answered HTTP {0}")]
    Status(u16),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Sends one payload. Shared by the kiosk dispatcher and the retry tool so
/// both produce identical requests.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(&self, payload: &Payload) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// POSTs payloads as JSON; any 2xx status is success.
#[derive(Debug, Clone)]
pub struct HttpDelivery {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDelivery {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Deliver for HttpDelivery {
    async fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        let response = self.client.post(&self.endpoint).json(payload).send().await?;
        let status = response.status();
        tracing::debug!(
            action = payload.action().as_str(),
            name = payload.name(),
            status = status.as_u16(),
            "endpoint responded"
        );
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
