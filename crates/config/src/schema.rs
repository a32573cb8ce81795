/// Config schema types (sticker defaults, rate limiting, scheduler, transcoder,
/// transport sidecar, logging, metrics).
use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Deployment profile. Selects defaults for values left unset in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerbotConfig {
    pub environment: Environment,
    pub sticker: StickerConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub transcoder: TranscoderConfig,
    pub text: TextConfig,
    pub limits: LimitsConfig,
    pub whatsapp: WhatsAppConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl StickerbotConfig {
    /// Requests admitted per user per window, falling back to the profile default.
    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.rate_limit
            .max_requests
            .unwrap_or(match self.environment {
                Environment::Development => 10,
                Environment::Production => 30,
            })
    }

    /// Directory for transcoder scratch files, falling back to the profile default.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.storage
            .temp_dir
            .clone()
            .unwrap_or_else(|| match self.environment {
                Environment::Development => PathBuf::from("./temp"),
                Environment::Production => PathBuf::from("/tmp"),
            })
    }
}

/// Output sticker defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerConfig {
    /// Square canvas edge in pixels (128–512).
    pub size: u32,
    /// Encoder quality (1–100).
    pub quality: u8,
    /// Encode static stickers losslessly instead of at `quality`.
    pub lossless: bool,
    /// Pack name embedded in sent stickers.
    pub name: String,
    pub author: String,
}

impl Default for StickerConfig {
    fn default() -> Self {
        Self {
            size: 512,
            quality: 80,
            lossless: false,
            name: "Sticker Bot".into(),
            author: "WhatsApp Sticker Bot".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    /// Unset means the profile default (10 in development, 30 in production).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum jobs executing at once.
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Unset means the profile default (`./temp` or `/tmp`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

/// External transcoder used for animated media.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Binary name or path. Bare names are resolved through `PATH`.
    pub binary: String,
    /// Wall-clock limit per invocation; the child is killed on expiry.
    pub timeout_secs: u64,
    /// Passed as `-threads`; 0 lets the transcoder decide.
    pub threads: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".into(),
            timeout_secs: 60,
            threads: 0,
        }
    }
}

/// Text sticker rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// TTF/OTF font file. When unset, well-known system fonts are searched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
    pub font_size: u32,
    pub min_font_size: u32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 48,
            min_font_size: 16,
        }
    }
}

/// Validator ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub image_max_bytes: usize,
    pub document_max_bytes: usize,
    pub body_max_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            image_max_bytes: 10 * 1024 * 1024,
            document_max_bytes: 25 * 1024 * 1024,
            body_max_chars: 4096,
        }
    }
}

/// WhatsApp Web sidecar process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Directory holding the sidecar script. Defaults to `./sidecar`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,
    /// Where the sidecar persists its session.
    pub auth_dir: PathBuf,
    /// Node.js executable.
    pub node: String,
    /// How long to wait for the sidecar to answer one request.
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: None,
            auth_dir: PathBuf::from("./data"),
            node: "node".into(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether processing metrics are aggregated and logged. Defaults to true.
    pub enabled: bool,
    /// Install the Prometheus recorder (needs the `prometheus` feature).
    pub prometheus: bool,
    /// Seconds between snapshot log lines.
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus: false,
            report_interval_secs: 60,
        }
    }
}
