//! Position reporting: fire-and-forget POST of each sample.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, trace};
use tracker_core::{encode_report, PositionSample};

/// Sends samples somewhere. Must not block the caller and never reports failure back.
pub trait Reporter: Send + Sync {
    fn report(&self, sample: PositionSample);
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector returned status {0}")]
    Status(u16),
}

#[derive(Clone)]
pub struct HttpReporter {
    http: reqwest::Client,
    url: String,
}

impl HttpReporter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// POST one sample and wait for the status. The response body is not read.
    pub async fn send(&self, sample: &PositionSample) -> Result<(), ReportError> {
        let body = encode_report(sample)?;
        let resp = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

impl Reporter for HttpReporter {
    /// Each report runs on its own task: no queue, no ordering, no retry.
    /// Must be called from within a tokio runtime.
    fn report(&self, sample: PositionSample) {
        let this = self.clone();
        tokio::spawn(async move {
            match this.send(&sample).await {
                Ok(()) => trace!(identity = %sample.identity, "position reported"),
                Err(e) => debug!(identity = %sample.identity, error = %e, "position report dropped"),
            }
        });
    }
}
