use std::time::Duration;

crate::config_group!({

    /// Number of leading bytes sampled from the stream for content type
    /// sniffing. Large enough for every magic-byte family we match.
    ///
    /// Use the environment variable `WEAVE_DOWNLOAD_SNIFF_SAMPLE_SIZE` to
    /// set this value.
    ref sniff_sample_size: usize = 4100;

    /// Default wall-clock budget for a batch when the caller does not pass
    /// one explicitly.
    ///
    /// Use the environment variable `WEAVE_DOWNLOAD_BATCH_TIMEOUT` to set
    /// this value.
    ref batch_timeout: Duration = Duration::from_secs(300);
});
