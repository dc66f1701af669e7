use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, ClientBuilder};
use sedori_config::{RetrySettings, SpApiSettings};
use sedori_types::{Secret, SedoriError, SedoriResult};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Default)]
struct TokenState {
    token: Option<String>,
    expires_at: Option<Instant>,
}

/// LWA refresh-token exchange with expiry-aware caching.
///
/// Refreshes are single-flight: the cache state lock is held across the
/// network call, so concurrent callers await one refresh and share its token.
pub struct TokenCache {
    endpoint: String,
    client_id: Secret,
    client_secret: Secret,
    refresh_token: Secret,
    retry: RetrySettings,
    client: Client,
    state: Mutex<TokenState>,
}

impl TokenCache {
    pub fn new(settings: &SpApiSettings, retry: RetrySettings) -> SedoriResult<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SedoriError::TokenAcquisition(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: settings.token_endpoint.clone(),
            client_id: settings.lwa_client_id.clone(),
            client_secret: settings.lwa_client_secret.clone(),
            refresh_token: settings.refresh_token.clone(),
            retry,
            client,
            state: Mutex::new(TokenState::default()),
        })
    }

    /// A valid access token, refreshed over the network only when the cached
    /// one is missing or inside the expiry margin.
    pub async fn access_token(&self) -> SedoriResult<String> {
        let mut state = self.state.lock().await;

        if let (Some(token), Some(expires_at)) = (&state.token, state.expires_at) {
            if Instant::now() + EXPIRY_MARGIN < expires_at {
                return Ok(token.clone());
            }
        }

        let refreshed = self.refresh_with_retry().await?;
        state.token = Some(refreshed.access_token.clone());
        state.expires_at = Some(Instant::now() + Duration::from_secs(refreshed.expires_in));
        debug!(expires_in = refreshed.expires_in, "LWA token refreshed");
        Ok(refreshed.access_token)
    }

    async fn refresh_with_retry(&self) -> SedoriResult<TokenResponse> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.base_interval())
            .with_max_interval(self.retry.max_interval())
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.refresh_once().await {
                Ok(token) => return Ok(token),
                Err(RefreshError::Fatal(err)) => return Err(err),
                Err(RefreshError::Retryable(detail)) => {
                    if attempt >= self.retry.max_attempts {
                        error!(attempt, detail = %detail, "LWA token refresh retries exhausted");
                        return Err(SedoriError::TokenAcquisition(
                            "unable to refresh LWA token".to_string(),
                        ));
                    }
                    let delay = backoff.next_backoff().unwrap_or(self.retry.max_interval());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn refresh_once(&self) -> Result<TokenResponse, RefreshError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token.expose()),
            ("client_id", self.client_id.expose()),
            ("client_secret", self.client_secret.expose()),
        ];

        let response = match self.client.post(&self.endpoint).form(&form).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(RefreshError::Retryable(format!("timeout: {e}")))
            }
            Err(e) if e.is_connect() => {
                return Err(RefreshError::Retryable(format!("connection error: {e}")))
            }
            Err(e) => {
                return Err(RefreshError::Fatal(SedoriError::TokenAcquisition(format!(
                    "failed to reach token endpoint: {e}"
                ))))
            }
        };

        let status = response.status().as_u16();
        if RETRYABLE_STATUS_CODES.contains(&status) {
            return Err(RefreshError::Retryable(format!("retryable status {status}")));
        }
        if status >= 400 {
            let detail = response.text().await.unwrap_or_default();
            return Err(RefreshError::Fatal(SedoriError::TokenAcquisition(format!(
                "token endpoint error (status={status}, detail={detail})"
            ))));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::Fatal(SedoriError::TokenAcquisition(format!(
                "invalid token payload: {e}"
            ))))
    }
}

enum RefreshError {
    Retryable(String),
    Fatal(SedoriError),
}
