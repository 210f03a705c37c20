use std::time::Duration;

crate::config_group!({

    /// Maximum number of retry attempts for a failed HTTP call before the
    /// error is surfaced to the caller.
    ///
    /// Use the environment variable `WEAVE_CLIENT_RETRY_MAX_ATTEMPTS` to set
    /// this value.
    ref retry_max_attempts: usize = 5;

    /// Base delay of the exponential backoff between retries; jitter is
    /// applied on top.
    ///
    /// Use the environment variable `WEAVE_CLIENT_RETRY_BASE_DELAY` to set
    /// this value.
    ref retry_base_delay: Duration = Duration::from_millis(300);

    /// TCP connect timeout applied to every outbound connection.
    ///
    /// Use the environment variable `WEAVE_CLIENT_CONNECT_TIMEOUT` to set
    /// this value.
    ref connect_timeout: Duration = Duration::from_secs(10);

    /// Overall timeout for request/response exchanges that are not streamed
    /// (offset lookups, metadata lookups).
    ///
    /// Use the environment variable `WEAVE_CLIENT_REQUEST_TIMEOUT` to set
    /// this value.
    ref request_timeout: Duration = Duration::from_secs(30);

    /// User agent sent on every request.
    ///
    /// Use the environment variable `WEAVE_CLIENT_USER_AGENT` to set this
    /// value.
    ref user_agent: String = "weave-fetch".to_string();
});
