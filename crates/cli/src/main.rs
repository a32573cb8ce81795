mod bot;
mod config_commands;
mod convert_commands;
mod health_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "stickerbot",
    version,
    about = "WhatsApp bot that turns media and text into stickers"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to `logging.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of `stickerbot.{toml,yaml,json}`).
    #[arg(long, global = true, env = "STICKERBOT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to WhatsApp and serve sticker requests (default).
    Run,
    /// Convert one file or text offline, without WhatsApp.
    Convert(convert_commands::ConvertArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Print the health report of the running bot.
    Health(health_commands::HealthArgs),
}

/// Initialise tracing. `RUST_LOG` wins over `level`.
fn init_telemetry(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let loaded = stickerbot_config::load(cli.config.as_deref());
    let (level, json) = match &loaded {
        Ok(config) => (
            cli.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone()),
            cli.json_logs || config.logging.json,
        ),
        Err(_) => (
            cli.log_level.clone().unwrap_or_else(|| "info".into()),
            cli.json_logs,
        ),
    };
    init_telemetry(&level, json);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => bot::run(loaded?).await,
        Commands::Convert(args) => convert_commands::handle_convert(args, &loaded?).await,
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        Commands::Health(args) => health_commands::handle_health(args, &loaded?),
    }
}
