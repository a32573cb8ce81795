use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use stickerbot_config::{
    check_config,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration (file, profile defaults and env overrides).
    Show,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => show(path),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let mut result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    // Env overrides can push a valid file out of range.
    if !result.has_errors()
        && let Ok(config) = stickerbot_config::load(path)
    {
        for d in check_config(&config) {
            let duplicate = result
                .diagnostics
                .iter()
                .any(|seen| seen.path == d.path && seen.message == d.message);
            if !duplicate {
                result.diagnostics.push(d);
            }
        }
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn show(path: Option<&Path>) -> Result<()> {
    let config = stickerbot_config::load(path)?;
    let mut value = serde_json::to_value(&config)?;
    // Fill in the profile-dependent values the file may leave unset.
    value["rate_limit"]["max_requests"] = config.max_requests().into();
    value["storage"]["temp_dir"] = config.temp_dir().display().to_string().into();
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
