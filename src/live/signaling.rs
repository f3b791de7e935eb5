//! Live session signaling: short-lived credential plus SDP offer/answer
//! exchange with the realtime endpoint

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::service::LanguageService;
use crate::{Error, Result};

/// Realtime SDP endpoint
pub const DEFAULT_REALTIME_ENDPOINT: &str = "https://api.openai.com/v1/realtime";

/// Upper bound on a single SDP exchange
const EXCHANGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Credential issue and SDP exchange
#[async_trait]
pub trait RealtimeSignaling: Send + Sync {
    /// Obtain a short-lived credential from the trusted intermediary
    async fn credential(&self, model: &str, voice: &str) -> Result<SecretString>;

    /// Send a local offer, returning the remote answer SDP
    async fn exchange(&self, model: &str, credential: &SecretString, offer_sdp: &str) -> Result<String>;
}

/// Credential via the serving layer, SDP over HTTPS to the realtime endpoint
pub struct HttpSignaling {
    service: Arc<dyn LanguageService>,
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSignaling {
    /// # Errors
    ///
    /// Returns error if `endpoint` is not a valid URL
    pub fn new(service: Arc<dyn LanguageService>, endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid realtime endpoint {endpoint}: {e}")))?;
        Ok(Self {
            service,
            client: reqwest::Client::builder()
                .timeout(EXCHANGE_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint,
        })
    }

    fn exchange_url(&self, model: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", model);
        url
    }
}

#[async_trait]
impl RealtimeSignaling for HttpSignaling {
    async fn credential(&self, model: &str, voice: &str) -> Result<SecretString> {
        let token = self.service.realtime_session(model, voice).await?;
        Ok(SecretString::from(token))
    }

    async fn exchange(&self, model: &str, credential: &SecretString, offer_sdp: &str) -> Result<String> {
        tracing::debug!(model, offer_bytes = offer_sdp.len(), "exchanging SDP");

        let response = self
            .client
            .post(self.exchange_url(model))
            .bearer_auth(credential.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .header("OpenAI-Beta", "realtime=v1")
            .body(offer_sdp.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Signaling(format!("SDP exchange failed: {status}")));
        }

        let answer = response.text().await?;
        if answer.trim().is_empty() {
            return Err(Error::Signaling("empty SDP answer".to_string()));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::HttpLanguageService;

    #[test]
    fn test_exchange_url_carries_model() {
        let service = Arc::new(HttpLanguageService::new("http://localhost:8787").unwrap());
        let signaling = HttpSignaling::new(service, DEFAULT_REALTIME_ENDPOINT).unwrap();
        assert_eq!(
            signaling.exchange_url("gpt-4o-mini-realtime-preview").as_str(),
            "https://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let service = Arc::new(HttpLanguageService::new("http://localhost:8787").unwrap());
        assert!(matches!(
            HttpSignaling::new(service, "::"),
            Err(Error::Config(_))
        ));
    }
}
