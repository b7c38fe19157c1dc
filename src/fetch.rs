use std::time::Duration;

use reqwest::{blocking::Client, header::CONTENT_TYPE, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    error::{FetchError, Result},
    types::{SecretDescriptor, SecretRequest},
};

/// Content type the secret service expects for token exchanges.
pub const TOKEN_CONTENT_TYPE: &str = "application/x-api-secrets-token";
/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of encrypted secret descriptors.
pub trait SecretSource: Send + Sync {
    /// Exchanges the request token for the volume's secret descriptors.
    fn fetch(&self, request: &SecretRequest) -> Result<Vec<SecretDescriptor>>;
}

/// Basic-auth credentials for the secret service.
pub struct ServiceCredentials {
    access_key: String,
    secret_key: Secret<String>,
}

impl ServiceCredentials {
    /// Creates credentials from an access key and secret key pair.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: Secret::new(secret_key.into()),
        }
    }

    /// Access key half of the pair.
    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Response shapes across secret service generations.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecretsResponse {
    Bare(Vec<SecretDescriptor>),
    Wrapped { data: Vec<SecretDescriptor> },
}

impl SecretsResponse {
    fn into_descriptors(self) -> Vec<SecretDescriptor> {
        match self {
            Self::Bare(descriptors) | Self::Wrapped { data: descriptors } => descriptors,
        }
    }
}

/// Secret source backed by the secret service HTTP API.
#[derive(Debug)]
pub struct HttpSecretSource {
    endpoint: String,
    credentials: ServiceCredentials,
    client: Client,
}

impl HttpSecretSource {
    /// Builds a source posting tokens to `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        credentials: ServiceCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Transport)?;
        Ok(Self {
            endpoint: endpoint.into(),
            credentials,
            client,
        })
    }

    /// Endpoint receiving token exchanges.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SecretSource for HttpSecretSource {
    fn fetch(&self, request: &SecretRequest) -> Result<Vec<SecretDescriptor>> {
        info!(endpoint = %self.endpoint, volume = %request.volume, "requesting secrets");
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(
                &self.credentials.access_key,
                Some(self.credentials.secret_key.expose_secret()),
            )
            .header(CONTENT_TYPE, TOKEN_CONTENT_TYPE)
            .body(request.token.expose().to_vec())
            .send()
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::UnsuccessfulRequest {
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().map_err(FetchError::Transport)?;
        let descriptors = serde_json::from_slice::<SecretsResponse>(&body)
            .map_err(FetchError::MalformedResponse)?
            .into_descriptors();
        debug!(count = descriptors.len(), "received secret descriptors");
        Ok(descriptors)
    }
}

impl<T> SecretSource for Box<T>
where
    T: SecretSource + ?Sized,
{
    fn fetch(&self, request: &SecretRequest) -> Result<Vec<SecretDescriptor>> {
        (**self).fetch(request)
    }
}
