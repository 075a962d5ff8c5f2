use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryConfig {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug)]
pub(crate) enum RequestFailure {
    Request(reqwest::Error),
    Api { status: StatusCode, body: String },
    RetriesExhausted { attempts: u32 },
}

/// Outcome of [`retry_on_timeout`] when no attempt succeeded.
#[derive(Debug)]
pub(crate) enum RetryError<E> {
    /// A non-timeout failure, returned as soon as it happened.
    Failed(E),
    /// Every attempt timed out.
    Exhausted { attempts: u32 },
}

/// Runs `operation` until it succeeds, fails with a non-timeout error, or
/// `retries` attempts have timed out. Sleeps `delay` between attempts only.
pub(crate) async fn retry_on_timeout<T, E, F, Fut>(
    retries: u32,
    delay: Duration,
    is_timeout: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = retries.max(1);

    for attempt in 0..max_attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_timeout(&err) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    "request timed out"
                );
                if attempt + 1 < max_attempts {
                    sleep(delay).await;
                }
            }
            Err(err) => return Err(RetryError::Failed(err)),
        }
    }

    Err(RetryError::Exhausted {
        attempts: max_attempts,
    })
}

/// Posts `payload` and decodes the JSON reply. The body read counts as part of
/// the attempt, so a timeout while streaming it is retried too.
pub(crate) async fn send_chat_request_with_retry<T, R>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    payload: &T,
    config: RetryConfig,
) -> Result<R, RequestFailure>
where
    T: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let result = retry_on_timeout(
        config.retries,
        Duration::from_millis(config.retry_delay_ms),
        is_timeout_failure,
        move |_| async move {
            let response = client
                .post(url)
                .bearer_auth(api_key)
                .timeout(Duration::from_secs(config.timeout_secs))
                .json(payload)
                .send()
                .await
                .map_err(RequestFailure::Request)?;

            let status = response.status();
            if is_accepted_status(status) {
                return response.json::<R>().await.map_err(RequestFailure::Request);
            }

            let body = response.text().await.unwrap_or_default();
            Err(RequestFailure::Api { status, body })
        },
    )
    .await;

    result.map_err(|err| match err {
        RetryError::Failed(failure) => failure,
        RetryError::Exhausted { attempts } => RequestFailure::RetriesExhausted { attempts },
    })
}

fn is_accepted_status(status: StatusCode) -> bool {
    status == StatusCode::OK
}

fn is_timeout_failure(failure: &RequestFailure) -> bool {
    matches!(failure, RequestFailure::Request(source) if source.is_timeout())
}
