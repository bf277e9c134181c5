//! The HTTP half of WHIP: one POST carrying the offer, one DELETE to end
//! the session.

use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use crate::error::WhipError;

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Opaque credential for the signaling requests. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> BearerToken {
        BearerToken(token.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

impl From<String> for BearerToken {
    fn from(token: String) -> Self {
        BearerToken(token)
    }
}

/// A successful signaling answer.
#[derive(Debug)]
pub(crate) struct SignaledAnswer {
    pub sdp: String,
    /// The WHIP session resource, resolved against the endpoint.
    pub resource: Option<Url>,
}

#[derive(Debug)]
pub(crate) struct SignalingClient {
    http: reqwest::Client,
    endpoint: Url,
    token: BearerToken,
    timeout: Duration,
}

impl SignalingClient {
    pub fn new(endpoint: &str, token: BearerToken, timeout: Duration) -> Result<Self, WhipError> {
        let endpoint = Url::parse(endpoint).map_err(|e| WhipError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            reason: e.to_string(),
        })?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(WhipError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "scheme must be http or https".to_owned(),
            });
        }

        Ok(SignalingClient {
            http: reqwest::Client::new(),
            endpoint,
            token,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POSTs `offer` and returns the answer of a `201 Created` response.
    pub async fn post_offer(&self, offer: &str) -> Result<SignaledAnswer, WhipError> {
        info!("📤 Posting offer to {}", self.endpoint);

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .bearer_auth(self.token.expose())
            .timeout(self.timeout)
            .body(offer.to_owned())
            .send()
            .await
            .map_err(WhipError::SignalingRequest)?;

        let status = response.status();
        let resource = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|location| self.endpoint.join(location).ok());
        let body = response.text().await.map_err(WhipError::SignalingRequest)?;

        if status != StatusCode::CREATED {
            return Err(WhipError::SignalingFailed {
                status: status.as_u16(),
                body,
            });
        }

        debug!("📥 Answer SDP:\n{}", body);

        Ok(SignaledAnswer {
            sdp: body,
            resource,
        })
    }

    /// Ends the WHIP session at `resource`.
    pub async fn terminate(&self, resource: &Url) -> Result<(), WhipError> {
        let response = self
            .http
            .delete(resource.clone())
            .bearer_auth(self.token.expose())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(WhipError::SignalingRequest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WhipError::SignalingFailed {
                status: status.as_u16(),
                body,
            });
        }

        info!("WHIP resource {} terminated", resource);
        Ok(())
    }
}
