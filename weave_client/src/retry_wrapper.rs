use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fetch_config::fetch_config;
use reqwest::{Error as ReqwestError, Response, StatusCode};
use reqwest_retry::{default_on_request_success, Retryable};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{error, info};

use crate::error::WeaveClientError;

#[derive(Debug)]
pub enum RetryableReqwestError {
    FatalError(WeaveClientError),
    RetryableError(WeaveClientError),
}

/// Consumable retry policy for one logical HTTP call. Transient transport
/// errors and retryable status codes re-run the whole request with jittered
/// exponential backoff; fatal errors surface immediately.
pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    no_retry_on_429: bool,
    log_errors_as_info: bool,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str) -> Self {
        Self {
            max_attempts: fetch_config().client.retry_max_attempts,
            base_delay: fetch_config().client.retry_base_delay,
            no_retry_on_429: false,
            log_errors_as_info: false,
            api_tag,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_429_no_retry(mut self) -> Self {
        self.no_retry_on_429 = true;
        self
    }

    /// Demote per-attempt error logging to info. Used by callers with large
    /// retry budgets where repeated failure is expected, not alarming.
    pub fn log_errors_as_info(mut self) -> Self {
        self.log_errors_as_info = true;
        self
    }

    fn process_error_response(&self, try_idx: usize, err: reqwest_middleware::Error) -> RetryableReqwestError {
        let api = &self.api_tag;

        let process_error = |txt, log_as_info, err: reqwest_middleware::Error| {
            let msg = {
                if try_idx > 0 {
                    format!("{txt}: {api} api call failed (retry {try_idx}): {err}")
                } else {
                    format!("{txt}: {api} api call failed: {err}")
                }
            };

            info!(api = self.api_tag, "Connection attempt {}/{}", try_idx + 1, self.max_attempts);

            if self.log_errors_as_info || log_as_info {
                info!("{msg}");
            } else {
                error!("{msg}");
            }

            WeaveClientError::from(err)
        };

        match on_request_failure(&err) {
            Some(Retryable::Fatal) => {
                let client_err = process_error("Fatal Client Error", false, err);
                RetryableReqwestError::FatalError(client_err)
            },
            Some(Retryable::Transient) => {
                let client_err = process_error("Retryable Client Error", true, err);
                RetryableReqwestError::RetryableError(client_err)
            },
            None => {
                let client_err = process_error("Unknown Client Error", true, err);
                RetryableReqwestError::FatalError(client_err)
            },
        }
    }

    fn process_ok_response(&self, try_idx: usize, resp: Response) -> Result<Response, RetryableReqwestError> {
        let retry_str = if try_idx == 0 {
            String::default()
        } else {
            format!(" (retry {try_idx})")
        };

        let api = &self.api_tag;

        let process_error = |context, err: ReqwestError, log_as_info| {
            if self.log_errors_as_info || log_as_info {
                info!("{context}: {api} api call failed{retry_str}: {err}");
            } else {
                error!("{context}: {api} api call failed{retry_str}: {err}");
            }
            WeaveClientError::from(err)
        };

        let retriability = default_on_request_success(&resp);

        match (resp.error_for_status(), retriability) {
            (Err(e), Some(Retryable::Fatal)) => {
                let client_err = process_error("Fatal Error", e, false);
                Err(RetryableReqwestError::FatalError(client_err))
            },
            (Err(e), Some(Retryable::Transient)) => {
                // Intercept the too many requests condition when retrying on 429 is disabled.
                if e.status() == Some(StatusCode::TOO_MANY_REQUESTS) && self.no_retry_on_429 {
                    let client_err = process_error("Too Many Requests (retry on 429 disabled)", e, false);
                    Err(RetryableReqwestError::FatalError(client_err))
                } else {
                    let client_err = process_error("Retryable Error", e, true);
                    Err(RetryableReqwestError::RetryableError(client_err))
                }
            },
            (Err(e), None) => {
                // Shouldn't happen with the upstream classifier, but handle it anyway.
                let client_err = process_error("Unknown Error", e, false);
                Err(RetryableReqwestError::FatalError(client_err))
            },
            (Ok(result), _) => Ok(result),
        }
    }

    /// Run a request and process the result, retrying on transient errors or when process_fn
    /// reports a retryable error.
    ///
    /// `make_request` returns the send future for one attempt, e.g.
    /// `|| client.clone().get(url).send()`. It is re-invoked from scratch on every retry.
    ///
    /// `process_fn` takes a response whose status already passed `error_for_status` and
    /// evaluates it to `Result<T, RetryableReqwestError>`; returning `RetryableError` retries
    /// the whole request, `FatalError` aborts.
    pub async fn run_and_process<T, ReqFut, ReqFn, ProcFut, ProcFn>(
        self,
        make_request: ReqFn,
        process_fn: ProcFn,
    ) -> Result<T, WeaveClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: std::future::Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
        ProcFn: Fn(Response) -> ProcFut + Send + 'static,
        ProcFut: std::future::Future<Output = Result<T, RetryableReqwestError>> + 'static,
    {
        let strategy = ExponentialBackoff::from_millis(self.base_delay.as_millis().min(u64::MAX as u128) as u64)
            .map(jitter)
            .take(self.max_attempts);

        info!(
            api = self.api_tag,
            max_attempts = self.max_attempts,
            base_delay=?self.base_delay,
            no_retry_on_429=self.no_retry_on_429,
            "Retry strategy",
        );

        // RetryIf re-invokes the closure, so everything it captures lives in an Arc.
        let self_ = Arc::new(self);
        let try_count = AtomicUsize::new(0);

        let retry_info = Arc::new((make_request, process_fn, try_count, self_.clone()));

        let result = RetryIf::spawn(
            strategy,
            move || {
                let retry_info = retry_info.clone();

                async move {
                    let (make_request, process_fn, try_count, self_) = retry_info.as_ref();

                    let resp_result = make_request().await;
                    let try_idx = try_count.fetch_add(1, Ordering::Relaxed);

                    let checked_result = match resp_result {
                        Err(e) => Err(self_.process_error_response(try_idx, e)),
                        Ok(resp) => self_.process_ok_response(try_idx, resp),
                    };

                    match checked_result {
                        Ok(ok_response) => process_fn(ok_response).await,
                        Err(e) => Err(e),
                    }
                }
            },
            |err: &RetryableReqwestError| matches!(err, RetryableReqwestError::RetryableError(_)),
        )
        .await;

        match result {
            Ok(r) => Ok(r),
            Err(RetryableReqwestError::FatalError(e)) => {
                // Already logged at classification time.
                Err(e)
            },
            Err(RetryableReqwestError::RetryableError(e)) => {
                if self_.log_errors_as_info {
                    info!("No more retries; aborting: {e}");
                } else {
                    error!("No more retries; aborting: {e}");
                }

                Err(e)
            },
        }
    }

    /// Run a request and deserialize the body as json, retrying the whole connection on
    /// transient errors and on truncated or corrupted bodies.
    pub async fn run_and_extract_json<JsonDest, ReqFn, ReqFut>(
        self,
        make_request: ReqFn,
    ) -> Result<JsonDest, WeaveClientError>
    where
        JsonDest: for<'de> serde::Deserialize<'de>,
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: std::future::Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp: Response| async move {
            let r: Result<JsonDest, reqwest::Error> = resp.json().await;

            match r {
                Ok(v) => Ok(v),
                Err(e) => {
                    if e.is_connect() || e.is_decode() || e.is_body() || e.is_timeout() {
                        // Incomplete or corrupted body, likely a dropped connection.
                        Err(RetryableReqwestError::RetryableError(e.into()))
                    } else {
                        Err(RetryableReqwestError::FatalError(e.into()))
                    }
                },
            }
        })
        .await
    }

    /// Run a request and collect the body as bytes, retrying the whole connection on
    /// transient errors and on bodies that cut off early.
    pub async fn run_and_extract_bytes<ReqFut, ReqFn>(self, make_request: ReqFn) -> Result<Bytes, WeaveClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: std::future::Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp: Response| async move {
            let r: Result<Bytes, reqwest::Error> = resp.bytes().await;

            match r {
                Ok(v) => Ok(v),
                Err(e) => {
                    if e.is_connect() || e.is_decode() || e.is_body() || e.is_timeout() {
                        Err(RetryableReqwestError::RetryableError(e.into()))
                    } else {
                        Err(RetryableReqwestError::FatalError(e.into()))
                    }
                },
            }
        })
        .await
    }

    /// Run a request and hand back the raw response, retrying on transient errors.
    pub async fn run<ReqFut, ReqFn>(self, make_request: ReqFn) -> Result<Response, WeaveClientError>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: std::future::Future<Output = Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp| async move { Ok(resp) }).await
    }
}

/// Like [reqwest_retry::default_on_request_failure], but retries all IOErrors instead of a
/// subset. Some transient errors (e.g. `No buffer space available: (os error 55)`) don't
/// translate to a defined [std::io::ErrorKind] and can't be filtered more precisely.
pub fn on_request_failure(error: &reqwest_middleware::Error) -> Option<Retryable> {
    let reqwest_middleware::Error::Reqwest(error) = error else {
        // A failure in the middleware itself won't get better on retry.
        return Some(Retryable::Fatal);
    };
    if error.is_timeout() || error.is_connect() {
        Some(Retryable::Transient)
    } else if error.is_body() || error.is_decode() || error.is_builder() || error.is_redirect() {
        Some(Retryable::Fatal)
    } else if error.is_request() {
        // hyper::Error(IncompleteMessage) is not correctly handled by reqwest; check whether
        // the error originated in hyper and classify it ourselves. IncompleteMessage means a
        // well formed response was cut off mid-body, which is safe to retry; Canceled means
        // the server closed the connection gracefully.
        if let Some(hyper_error) = get_source_error_type::<hyper::Error>(&error) {
            let is_io_error = get_source_error_type::<std::io::Error>(hyper_error).is_some();
            if hyper_error.is_incomplete_message() || hyper_error.is_canceled() || is_io_error {
                Some(Retryable::Transient)
            } else {
                Some(Retryable::Fatal)
            }
        } else {
            Some(Retryable::Fatal)
        }
    } else {
        // is_status() is left unchecked; statuses are classified from the response itself.
        None
    }
}

/// Downcasts the given err source chain into T.
fn get_source_error_type<T: std::error::Error + 'static>(err: &dyn std::error::Error) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(err) = err.downcast_ref::<T>() {
            return Some(err);
        }

        source = err.source();
    }
    None
}
