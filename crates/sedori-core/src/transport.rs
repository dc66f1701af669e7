use crate::rate_limit::{CircuitBreaker, KeySemaphore, RequestBudget};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, ClientBuilder};
use sedori_config::RetrySettings;
use sedori_types::{reasons, SedoriError, SedoriResult, ServiceResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Statuses worth retrying; everything else at or above 400 is fatal for the call.
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Which upstream a transport talks to; fatal errors are typed accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    SpApi,
    Keepa,
}

impl ServiceKind {
    pub fn error(&self, detail: String) -> SedoriError {
        match self {
            ServiceKind::SpApi => SedoriError::SpApi(detail),
            ServiceKind::Keepa => SedoriError::Keepa(detail),
        }
    }
}

enum AttemptOutcome {
    Budget,
    Retryable(String),
    Fatal(SedoriError),
}

/// Guards every outbound request with the full resilience stack: circuit
/// breaker gate, per-key budget, per-key in-flight cap, bounded retries with
/// jittered exponential backoff, and outcome classification.
///
/// Ordering per attempt: budget consumption precedes semaphore acquisition
/// precedes the network send. Breaker success/failure is recorded once, after
/// the retry loop terminates.
pub struct RetryingTransport {
    kind: ServiceKind,
    client: Client,
    retry: RetrySettings,
    budget: Arc<RequestBudget>,
    budget_limit: u32,
    semaphore: Arc<KeySemaphore>,
    breaker: Arc<CircuitBreaker>,
}

impl RetryingTransport {
    pub fn new(
        kind: ServiceKind,
        retry: RetrySettings,
        budget: Arc<RequestBudget>,
        budget_limit: u32,
        semaphore: Arc<KeySemaphore>,
        breaker: Arc<CircuitBreaker>,
    ) -> SedoriResult<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| kind.error(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            kind,
            client,
            retry,
            budget,
            budget_limit,
            semaphore,
            breaker,
        })
    }

    /// The underlying HTTP client, for callers that need to build requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Execute one protected call. `build` is invoked once per attempt so each
    /// retry carries fresh headers (notably the SigV4 signing instant).
    pub async fn execute<F>(
        &self,
        key: &str,
        mut build: F,
    ) -> SedoriResult<ServiceResult<reqwest::Response>>
    where
        F: FnMut() -> SedoriResult<reqwest::Request>,
    {
        if self.breaker.allow().is_err() {
            warn!(key, "circuit breaker open; skipping call");
            return Ok(ServiceResult::circuit_open());
        }

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.base_interval())
            .with_max_interval(self.retry.max_interval())
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(key, &mut build).await {
                Ok(response) => {
                    self.breaker.record_success();
                    return Ok(ServiceResult::ok(response));
                }
                Err(AttemptOutcome::Budget) => {
                    warn!(key, "request budget exhausted");
                    return Ok(ServiceResult::degraded(reasons::BUDGET_EXCEEDED));
                }
                Err(AttemptOutcome::Fatal(err)) => {
                    self.breaker.record_failure();
                    return Err(err);
                }
                Err(AttemptOutcome::Retryable(detail)) => {
                    if attempt >= self.retry.max_attempts {
                        error!(key, attempt, detail = %detail, "retries exhausted");
                        self.breaker.record_failure();
                        return Ok(ServiceResult::degraded(reasons::RETRY_EXHAUSTED));
                    }
                    let delay = backoff.next_backoff().unwrap_or(self.retry.max_interval());
                    debug!(key, attempt, ?delay, detail = %detail, "retryable failure; backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_once<F>(&self, key: &str, build: &mut F) -> Result<reqwest::Response, AttemptOutcome>
    where
        F: FnMut() -> SedoriResult<reqwest::Request>,
    {
        match self.budget.consume(key, self.budget_limit) {
            Ok(_) => {}
            Err(SedoriError::BudgetExceeded(_)) => return Err(AttemptOutcome::Budget),
            Err(err) => return Err(AttemptOutcome::Fatal(err)),
        }

        let _permit = self.semaphore.acquire(key).await;

        let request = build().map_err(AttemptOutcome::Fatal)?;
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(AttemptOutcome::Retryable(format!("timeout: {e}")))
            }
            Err(e) if e.is_connect() => {
                return Err(AttemptOutcome::Retryable(format!("connection error: {e}")))
            }
            Err(e) => {
                return Err(AttemptOutcome::Fatal(
                    self.kind.error(format!("request failed: {e}")),
                ))
            }
        };

        let status = response.status().as_u16();
        if RETRYABLE_STATUS_CODES.contains(&status) {
            return Err(AttemptOutcome::Retryable(format!(
                "retryable status {status}"
            )));
        }
        if status >= 400 {
            let detail = response.text().await.unwrap_or_default();
            return Err(AttemptOutcome::Fatal(
                self.kind
                    .error(format!("request failed (status={status}, detail={detail})")),
            ));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_transport(retry: RetrySettings, budget_limit: u32) -> RetryingTransport {
        RetryingTransport::new(
            ServiceKind::SpApi,
            retry,
            Arc::new(RequestBudget::new()),
            budget_limit,
            Arc::new(KeySemaphore::new(1)),
            Arc::new(CircuitBreaker::default()),
        )
        .unwrap()
    }

    fn open_breaker() -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
        breaker.record_failure();
        breaker
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_sending() {
        let transport = RetryingTransport::new(
            ServiceKind::SpApi,
            RetrySettings::default(),
            Arc::new(RequestBudget::new()),
            5,
            Arc::new(KeySemaphore::new(1)),
            open_breaker(),
        )
        .unwrap();

        let mut builds = 0;
        let result = transport
            .execute("spapi:TEST", || {
                builds += 1;
                unreachable!("request must not be built while the breaker is open")
            })
            .await
            .unwrap();

        assert_eq!(builds, 0);
        assert!(result.data.is_none());
        assert!(result.flags.degraded);
        assert!(result.flags.circuit_open);
        assert_eq!(result.flags.reason.as_deref(), Some("circuit_open"));
    }

    #[tokio::test]
    async fn exhausted_budget_degrades_without_sending() {
        let transport = test_transport(RetrySettings::default(), 0);

        let client = transport.client().clone();
        let result = transport
            .execute("spapi:TEST", || {
                Ok(client
                    .get("http://127.0.0.1:1/unreachable")
                    .build()
                    .unwrap())
            })
            .await
            .unwrap();

        assert!(result.data.is_none());
        assert!(result.flags.degraded);
        assert!(!result.flags.circuit_open);
        assert_eq!(result.flags.reason.as_deref(), Some("budget_exceeded"));
    }
}
