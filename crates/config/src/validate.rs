//! Configuration validation.
//!
//! Detects unknown/misspelled fields in TOML files and range-checks the values
//! the pipeline relies on. Range checks also run on the final config at
//! startup, after env overrides.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::schema::StickerbotConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "range", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "sticker.size"
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

/// Mirrors every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let section = |keys: &[&'static str]| Struct(keys.iter().map(|k| (*k, Leaf)).collect());

    Struct(HashMap::from([
        ("environment", Leaf),
        (
            "sticker",
            section(&["size", "quality", "lossless", "name", "author"]),
        ),
        ("rate_limit", section(&["window_ms", "max_requests"])),
        ("scheduler", section(&["concurrency"])),
        ("storage", section(&["temp_dir"])),
        (
            "transcoder",
            section(&["binary", "timeout_secs", "threads"]),
        ),
        (
            "text",
            section(&["font_path", "font_size", "min_font_size"]),
        ),
        (
            "limits",
            section(&["image_max_bytes", "document_max_bytes", "body_max_chars"]),
        ),
        (
            "whatsapp",
            section(&["sidecar_dir", "auth_dir", "node", "request_timeout_secs"]),
        ),
        ("logging", section(&["level", "json"])),
        (
            "metrics",
            section(&["enabled", "prometheus", "report_interval_secs"]),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        let mut result = ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
        check_ranges(&StickerbotConfig::default(), &mut result.diagnostics);
        return result;
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    match std::fs::read_to_string(&actual_path) {
        Ok(content) if is_toml => {
            let mut result = validate_toml_str(&crate::env_subst::substitute_env(&content));
            result.config_path = Some(actual_path);
            result
        },
        // YAML/JSON: no key walk, but type and range errors still surface.
        Ok(_) => {
            let mut diagnostics = Vec::new();
            match crate::loader::load_config(&actual_path) {
                Ok(config) => check_ranges(&config, &mut diagnostics),
                Err(e) => diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "type-error",
                    path: String::new(),
                    message: e.to_string(),
                }),
            }
            ValidationResult {
                diagnostics,
                config_path: Some(actual_path),
            }
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path),
        },
    }
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<StickerbotConfig>(toml_str) {
        Ok(config) => check_ranges(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Range checks on a fully resolved config (file + profile + env overrides).
#[must_use]
pub fn check_config(config: &StickerbotConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_ranges(config, &mut diagnostics);
    diagnostics
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message,
        });
    }
}

fn check_ranges(config: &StickerbotConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut range = |ok: bool, path: &str, message: String| {
        if !ok {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "range",
                path: path.into(),
                message,
            });
        }
    };

    let size = config.sticker.size;
    range(
        (128..=512).contains(&size),
        "sticker.size",
        format!("must be between 128 and 512, got {size}"),
    );
    let quality = config.sticker.quality;
    range(
        (1..=100).contains(&quality),
        "sticker.quality",
        format!("must be between 1 and 100, got {quality}"),
    );
    let window = config.rate_limit.window_ms;
    range(
        (1_000..=3_600_000).contains(&window),
        "rate_limit.window_ms",
        format!("must be between 1000 and 3600000, got {window}"),
    );
    let max = config.max_requests();
    range(
        (1..=1000).contains(&max),
        "rate_limit.max_requests",
        format!("must be between 1 and 1000, got {max}"),
    );
    range(
        config.scheduler.concurrency > 0,
        "scheduler.concurrency",
        "must be greater than 0".into(),
    );
    range(
        config.transcoder.timeout_secs > 0,
        "transcoder.timeout_secs",
        "must be greater than 0".into(),
    );
    range(
        config.whatsapp.request_timeout_secs > 0,
        "whatsapp.request_timeout_secs",
        "must be greater than 0".into(),
    );
    range(
        config.text.min_font_size > 0 && config.text.min_font_size <= config.text.font_size,
        "text.min_font_size",
        format!(
            "must be between 1 and text.font_size ({}), got {}",
            config.text.font_size, config.text.min_font_size
        ),
    );

    if config.metrics.prometheus && !config.metrics.enabled {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "range",
            path: "metrics.prometheus".into(),
            message: "ignored while metrics.enabled is false".into(),
        });
    }
    if let Some(font) = &config.text.font_path
        && !font.exists()
    {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "file-ref",
            path: "text.font_path".into(),
            message: format!("font file not found: {}", font.display()),
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
