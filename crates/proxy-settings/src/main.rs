//! proxy-settings headless entry point.
//!
//! Opens one settings session over the settings file, applies the edits given
//! on the command line the way the settings screen would, and prints every
//! response as JSON on stdout.  Logs go to stderr.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load AppConfig            -- defaults when absent or unreadable
//!  └─ TomlFileBackend::open     -- the settings file
//!  └─ ChannelServiceController  -- local service task (Tokio)
//!  └─ SettingsBridge::open      -- session + event queue
//!       └─ list | get | set ... -- commands, then close (flush)
//!
//! `init-config` stops after the config load: it writes the effective config,
//! with any `--settings` override, back to the config file.
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proxy_settings_core::ServiceState;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use proxy_settings::infrastructure::service::ChannelServiceController;
use proxy_settings::infrastructure::storage::config::{
    init_config_file, load_config, load_config_from, AppConfig,
};
use proxy_settings::infrastructure::storage::settings_file::TomlFileBackend;
use proxy_settings::infrastructure::ui_bridge::{
    apply_edit, close, discard_pending, flush_pending, get_field, list_fields, SettingsBridge,
};

#[derive(Debug, Parser)]
#[command(name = "proxy-settings", version, about = "Inspect and edit proxy client settings")]
struct Cli {
    /// Application config file.  Defaults to the platform config directory.
    #[arg(long, env = "PROXY_SETTINGS_CONFIG")]
    config: Option<PathBuf>,

    /// Settings file.  Overrides `[storage] settings_file`.
    #[arg(long, env = "PROXY_SETTINGS_FILE")]
    settings: Option<PathBuf>,

    /// Treat the proxy service as started, so edits request reloads,
    /// restarts and stops.
    #[arg(long)]
    running: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists every field on the screen with its value.
    List,
    /// Prints one field.
    Get { name: String },
    /// Applies `name=value` edits in order, then sends the pending service action.
    Set {
        #[arg(value_parser = parse_assignment, required = true, value_name = "NAME=VALUE")]
        edits: Vec<(String, String)>,
        /// Leave the service alone even if the edits need it.
        #[arg(long)]
        no_flush: bool,
    },
    /// Writes the effective application config, defaults included, to the
    /// config file.
    InitConfig {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got `{s}`"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let (mut config, config_error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(e) = config_error {
        warn!("failed to load config, using defaults: {e}");
    }

    if let Command::InitConfig { force } = cli.command {
        if let Some(settings) = cli.settings {
            config.storage.settings_file = Some(settings);
        }
        let path = init_config_file(&config, cli.config.as_deref(), force)?;
        info!(path = %path.display(), "config written");
        return Ok(());
    }

    let settings_path = match cli.settings {
        Some(path) => path,
        None => config.settings_path()?,
    };
    let backend = TomlFileBackend::open(&settings_path)
        .with_context(|| format!("opening settings file {}", settings_path.display()))?;

    let initial = if cli.running {
        ServiceState::Started
    } else {
        ServiceState::Stopped
    };
    let (controller, service) = ChannelServiceController::spawn(initial);
    let mut bridge = SettingsBridge::open(
        Box::new(backend),
        Arc::new(controller),
        config.session_options(),
    );
    info!(
        session = %bridge.session.id(),
        settings = %settings_path.display(),
        service = ?initial,
        "proxy-settings started"
    );

    let mut rejected = 0usize;
    match cli.command {
        Command::List => print_json(&list_fields(&bridge))?,
        Command::Get { name } => print_json(&get_field(&bridge, &name))?,
        Command::InitConfig { .. } => {}
        Command::Set { edits, no_flush } => {
            for (name, value) in &edits {
                let result = apply_edit(&mut bridge, name, value);
                if !result.success {
                    rejected += 1;
                }
                print_json(&result)?;
            }
            if no_flush {
                print_json(&discard_pending(&mut bridge))?;
            } else {
                print_json(&flush_pending(&mut bridge))?;
            }
        }
    }

    close(bridge);
    let report = service.await.context("service task panicked")?;
    info!(?report, "service task finished");

    if rejected > 0 {
        anyhow::bail!("{rejected} edit(s) rejected");
    }
    Ok(())
}
