use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::StickerbotConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "stickerbot.toml",
    "stickerbot.yaml",
    "stickerbot.yml",
    "stickerbot.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<StickerbotConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load the config used at startup.
///
/// An explicit `path` must load; otherwise the standard locations are
/// searched:
/// 1. `./stickerbot.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/stickerbot/stickerbot.{toml,yaml,yml,json}` (user-global)
///
/// Env overrides are applied on top in every case.
pub fn load(path: Option<&Path>) -> anyhow::Result<StickerbotConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Returns `StickerbotConfig::default()` if no config file is found or the
/// file fails to parse.
pub fn discover_and_load() -> StickerbotConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    StickerbotConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/stickerbot/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "stickerbot").map(|d| d.config_dir().to_path_buf())
}

/// Apply `STICKER_*`, `RATE_LIMIT_*` and related process env vars on top of
/// the parsed file.
pub fn apply_env_overrides(config: &mut StickerbotConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

pub(crate) fn apply_env_overrides_with(
    config: &mut StickerbotConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    fn parsed<T: FromStr>(name: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<T> {
        let raw = lookup(name)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = name, value = %raw, "ignoring unparsable env override");
                None
            },
        }
    }

    if let Some(env) = lookup("STICKERBOT_ENV").or_else(|| lookup("NODE_ENV")) {
        match env.parse() {
            Ok(env) => config.environment = env,
            Err(e) => warn!(error = %e, "ignoring STICKERBOT_ENV"),
        }
    }
    if let Some(size) = parsed("STICKER_SIZE", &lookup) {
        config.sticker.size = size;
    }
    if let Some(quality) = parsed("STICKER_QUALITY", &lookup) {
        config.sticker.quality = quality;
    }
    if let Some(window) = parsed("RATE_LIMIT_WINDOW_MS", &lookup) {
        config.rate_limit.window_ms = window;
    }
    if let Some(max) = parsed("RATE_LIMIT_MAX_REQUESTS", &lookup) {
        config.rate_limit.max_requests = Some(max);
    }
    if let Some(dir) = lookup("STICKERBOT_TEMP_DIR").filter(|d| !d.trim().is_empty()) {
        config.storage.temp_dir = Some(PathBuf::from(dir));
    }
    if let Some(concurrency) = parsed("STICKERBOT_CONCURRENCY", &lookup) {
        config.scheduler.concurrency = concurrency;
    }
    if let Some(binary) = lookup("FFMPEG_PATH").filter(|b| !b.trim().is_empty()) {
        config.transcoder.binary = binary;
    }
    if let Some(level) = lookup("LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
        config.logging.level = level;
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<StickerbotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::Environment};

    #[test]
    fn loads_toml_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("stickerbot.toml");
        std::fs::write(&toml_path, "[sticker]\nsize = 256\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().sticker.size, 256);

        let yaml_path = dir.path().join("stickerbot.yaml");
        std::fs::write(&yaml_path, "sticker:\n  quality: 55\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().sticker.quality, 55);

        let json_path = dir.path().join("stickerbot.json");
        std::fs::write(&json_path, r#"{"scheduler":{"concurrency":2}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().scheduler.concurrency, 2);
    }

    #[test]
    fn unsupported_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stickerbot.ini");
        std::fs::write(&path, "size=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = StickerbotConfig::default();
        apply_env_overrides_with(&mut cfg, |name| {
            match name {
                "STICKERBOT_ENV" => Some("production"),
                "STICKER_SIZE" => Some("384"),
                "RATE_LIMIT_MAX_REQUESTS" => Some("5"),
                "STICKERBOT_TEMP_DIR" => Some("/scratch"),
                "FFMPEG_PATH" => Some("/opt/ffmpeg/bin/ffmpeg"),
                _ => None,
            }
            .map(String::from)
        });
        assert_eq!(cfg.environment, Environment::Production);
        assert_eq!(cfg.sticker.size, 384);
        assert_eq!(cfg.max_requests(), 5);
        assert_eq!(cfg.temp_dir(), PathBuf::from("/scratch"));
        assert_eq!(cfg.transcoder.binary, "/opt/ffmpeg/bin/ffmpeg");
    }

    #[test]
    fn bad_env_override_keeps_file_value() {
        let mut cfg = StickerbotConfig::default();
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "STICKER_QUALITY").then(|| "very high".to_string())
        });
        assert_eq!(cfg.sticker.quality, 80);
    }
}
