use std::time::Duration;

crate::config_group!({

    /// Maximum number of chunk fetches in flight for one range. Ordering of
    /// the output does not depend on this value.
    ///
    /// Use the environment variable `WEAVE_STREAM_MAX_PARALLEL` to set this
    /// value.
    ref max_parallel: usize = 10;

    /// Timeout for establishing a chunk request and receiving the framed
    /// size header.
    ///
    /// Use the environment variable `WEAVE_STREAM_CHUNK_REQUEST_TIMEOUT` to
    /// set this value.
    ref chunk_request_timeout: Duration = Duration::from_secs(20);

    /// Idle timeout between payload reads on an open chunk response. Firing
    /// destroys the connection and fails the fetch over to the next node.
    ///
    /// Use the environment variable `WEAVE_STREAM_CHUNK_IDLE_TIMEOUT` to set
    /// this value.
    ref chunk_idle_timeout: Duration = Duration::from_secs(15);
});
