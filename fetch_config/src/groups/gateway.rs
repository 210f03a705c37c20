use std::time::Duration;

crate::config_group!({

    /// Data inactivity timeout for gateway streams. If no bytes arrive
    /// within this window the stream either errors (below the minimum
    /// viable byte count) or closes as a usable partial object.
    ///
    /// Use the environment variable `WEAVE_GATEWAY_INACTIVITY_TIMEOUT` to
    /// set this value.
    ref inactivity_timeout: Duration = Duration::from_secs(30);

    /// Minimum number of bytes that makes a stalled gateway stream usable
    /// as a partial object instead of a NO_DATA failure.
    ///
    /// Use the environment variable `WEAVE_GATEWAY_MIN_VIABLE_BYTES` to set
    /// this value.
    ref min_viable_bytes: u64 = 4096;

    /// Redirect bound for the non-raw gateway endpoint. The raw endpoint is
    /// always requested redirect-free.
    ///
    /// Use the environment variable `WEAVE_GATEWAY_MAX_REDIRECTS` to set
    /// this value.
    ref max_redirects: usize = 5;
});
