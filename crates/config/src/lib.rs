//! Configuration loading, validation and env substitution.
//!
//! Config files: `stickerbot.toml`, `stickerbot.yaml`, or `stickerbot.json`
//! Searched in `./` then `~/.config/stickerbot/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values. Process env vars
//! such as `STICKER_SIZE` override file values after parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load, load_config},
    schema::{
        Environment, LimitsConfig, LoggingConfig, MetricsConfig, RateLimitConfig,
        SchedulerConfig, StickerConfig, StickerbotConfig, StorageConfig, TextConfig,
        TranscoderConfig, WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, check_config},
};
