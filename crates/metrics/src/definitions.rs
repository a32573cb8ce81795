//! Metric name and label definitions.
//!
//! Every metric the bot exports is named here so dashboards and code agree.

/// Sticker conversion metrics
pub mod stickers {
    /// Jobs that reached a terminal state
    pub const PROCESSED_TOTAL: &str = "stickerbot_stickers_processed_total";
    /// Jobs that ended in failure
    pub const FAILURES_TOTAL: &str = "stickerbot_stickers_failures_total";
    /// Wall-clock job duration in seconds
    pub const PROCESSING_DURATION_SECONDS: &str = "stickerbot_stickers_processing_duration_seconds";
    /// Jobs currently executing
    pub const ACTIVE_PROCESSES: &str = "stickerbot_stickers_active_processes";
    /// Jobs waiting for a worker slot
    pub const QUEUED: &str = "stickerbot_stickers_queued";
    /// Output size in bytes
    pub const OUTPUT_BYTES: &str = "stickerbot_stickers_output_bytes";
}

/// Admission control metrics
pub mod admission {
    /// Requests rejected by the per-user rate limiter
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "stickerbot_rate_limit_rejections_total";
    /// Messages rejected by the validator, labeled by error code
    pub const VALIDATION_FAILURES_TOTAL: &str = "stickerbot_validation_failures_total";
    /// Users currently tracked by the rate limiter
    pub const TRACKED_USERS: &str = "stickerbot_rate_limit_tracked_users";
}

/// Transcoder subprocess metrics
pub mod transcoder {
    /// Transcoder invocations
    pub const RUNS_TOTAL: &str = "stickerbot_transcoder_runs_total";
    /// Invocations killed on timeout
    pub const TIMEOUTS_TOTAL: &str = "stickerbot_transcoder_timeouts_total";
}

/// Chat transport metrics
pub mod transport {
    pub const MESSAGES_RECEIVED_TOTAL: &str = "stickerbot_messages_received_total";
    pub const REPLIES_SENT_TOTAL: &str = "stickerbot_replies_sent_total";
    pub const SEND_ERRORS_TOTAL: &str = "stickerbot_send_errors_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const VARIANT: &str = "variant";
    pub const SUCCESS: &str = "success";
    pub const ERROR_CODE: &str = "error_code";
    pub const MESSAGE_TYPE: &str = "message_type";
    pub const COMMAND: &str = "command";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Job duration buckets (in seconds)
    /// Covers 10ms (static images) to 2 minutes (long animations)
    pub static PROCESSING_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
        ]
    });

    /// Output size buckets (in bytes)
    /// Covers 4KB to 1MB, around the platform sticker limits
    pub static OUTPUT_SIZE: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            4096.0, 16384.0, 65536.0, 102400.0, 262144.0, 524288.0, 1048576.0,
        ]
    });
}
