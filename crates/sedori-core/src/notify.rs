use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, ClientBuilder};
use sedori_config::{LineSettings, RetrySettings, SlackSettings};
use sedori_types::{SedoriError, SedoriResult};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fan-out to the Slack and LINE channels with retry and backoff.
///
/// A channel is skipped when disabled in configuration or when its
/// credentials are absent. 429 and server errors are retried with
/// random-exponential backoff bounded by the retry settings; other client
/// errors fail the channel immediately.
pub struct Notifier {
    slack: SlackSettings,
    line: LineSettings,
    retry: RetrySettings,
    client: Client,
}

impl Notifier {
    pub fn new(slack: SlackSettings, line: LineSettings, retry: RetrySettings) -> SedoriResult<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SedoriError::Notification(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            slack,
            line,
            retry,
            client,
        })
    }

    /// Post a plain-text summary to the Slack webhook.
    pub async fn post_slack(&self, summary: &str) -> SedoriResult<()> {
        if !self.slack.enabled {
            debug!("slack notifications disabled by configuration");
            return Ok(());
        }
        let Some(webhook) = self.slack.webhook.as_deref() else {
            debug!("slack notification skipped: no webhook configured");
            return Ok(());
        };

        let payload = json!({ "text": summary });
        self.post_with_retry("slack", || self.client.post(webhook).json(&payload))
            .await?;
        info!("slack notification delivered");
        Ok(())
    }

    /// Post a message through LINE Notify.
    pub async fn post_line(&self, summary: &str) -> SedoriResult<()> {
        if !self.line.enabled {
            debug!("LINE notifications disabled by configuration");
            return Ok(());
        }
        let Some(token) = self.line.token.as_ref().filter(|token| !token.is_empty()) else {
            debug!("LINE notification skipped: no access token configured");
            return Ok(());
        };

        self.post_with_retry("LINE", || {
            self.client
                .post(&self.line.endpoint)
                .bearer_auth(token.expose())
                .form(&[("message", summary)])
        })
        .await?;
        info!("LINE notification delivered");
        Ok(())
    }

    async fn post_with_retry<F>(&self, channel: &str, build: F) -> SedoriResult<()>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.base_interval())
            .with_max_interval(self.retry.max_interval())
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let detail = match build().send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status < 400 {
                        return Ok(());
                    }
                    if status != 429 && status < 500 {
                        return Err(SedoriError::Notification(format!(
                            "{channel} request failed: HTTP {status}"
                        )));
                    }
                    format!("transient status {status}")
                }
                Err(e) => format!("transport error: {e}"),
            };

            if attempt >= self.retry.max_attempts {
                return Err(SedoriError::Notification(format!(
                    "{channel} exhausted retry attempts: {detail}"
                )));
            }
            let delay = backoff.next_backoff().unwrap_or(self.retry.max_interval());
            warn!(channel, attempt, ?delay, detail = %detail, "notification failed; retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sedori_types::Secret;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retry() -> RetrySettings {
        RetrySettings {
            max_attempts: 2,
            base: 0.01,
            max_sleep: 0.02,
        }
    }

    fn slack(webhook: Option<String>, enabled: bool) -> SlackSettings {
        SlackSettings {
            enabled,
            webhook,
            token: None,
            channel: None,
        }
    }

    fn line(endpoint: String, token: Option<Secret>) -> LineSettings {
        LineSettings {
            enabled: true,
            token,
            endpoint,
        }
    }

    #[tokio::test]
    async fn slack_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/T000/B000"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/hooks/T000/B000"))
            .and(body_string_contains("profitable"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            slack(Some(format!("{}/hooks/T000/B000", server.uri())), true),
            LineSettings::default(),
            retry(),
        )
        .unwrap();

        notifier.post_slack("profitable listing found").await.unwrap();
    }

    #[tokio::test]
    async fn slack_client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            slack(Some(server.uri()), true),
            LineSettings::default(),
            retry(),
        )
        .unwrap();

        let result = notifier.post_slack("hello").await;
        assert!(matches!(result, Err(SedoriError::Notification(_))));
    }

    #[tokio::test]
    async fn disabled_slack_channel_is_skipped() {
        let notifier = Notifier::new(
            slack(Some("http://127.0.0.1:1/unreachable".to_string()), false),
            LineSettings::default(),
            retry(),
        )
        .unwrap();
        notifier.post_slack("hello").await.unwrap();
    }

    #[tokio::test]
    async fn slack_without_webhook_is_skipped() {
        let notifier = Notifier::new(slack(None, true), LineSettings::default(), retry()).unwrap();
        notifier.post_slack("hello").await.unwrap();
    }

    #[tokio::test]
    async fn line_posts_bearer_token_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/notify"))
            .and(header("authorization", "Bearer line-token"))
            .and(body_string_contains("message="))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(
            slack(None, false),
            line(
                format!("{}/api/notify", server.uri()),
                Some(Secret::new("line-token")),
            ),
            retry(),
        )
        .unwrap();

        notifier.post_line("profitable listing found").await.unwrap();
    }

    #[tokio::test]
    async fn line_without_token_is_skipped() {
        let notifier = Notifier::new(
            slack(None, false),
            line("http://127.0.0.1:1/unreachable".to_string(), None),
            retry(),
        )
        .unwrap();
        notifier.post_line("hello").await.unwrap();
    }
}
