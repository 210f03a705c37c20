crate::config_group!({

    /// Capacity of the per-process LRU cache of ledger offset lookups.
    /// Entries are immutable once committed, so there is no TTL.
    ///
    /// Use the environment variable `WEAVE_RESOLVER_OFFSET_CACHE_CAPACITY`
    /// to set this value.
    ref offset_cache_capacity: usize = 4096;

    /// Capacity of the per-process LRU cache of transaction metadata
    /// (tags, parent id) lookups.
    ///
    /// Use the environment variable `WEAVE_RESOLVER_METADATA_CACHE_CAPACITY`
    /// to set this value.
    ref metadata_cache_capacity: usize = 4096;

    /// Retry budget for ledger offset lookups. The source retried these
    /// without bound; a large finite budget keeps that behavior while still
    /// terminating.
    ///
    /// Use the environment variable `WEAVE_RESOLVER_OFFSET_RETRY_ATTEMPTS`
    /// to set this value.
    ref offset_retry_attempts: usize = 100;

    /// Retry budget for ancestor transaction metadata lookups before the
    /// secondary endpoint is consulted.
    ///
    /// Use the environment variable `WEAVE_RESOLVER_METADATA_RETRY_ATTEMPTS`
    /// to set this value.
    ref metadata_retry_attempts: usize = 3;
});
