use anyhow::Context;
use clap::Parser;
use coldwatch::config::Config;
use coldwatch::error::ConfigError;
use coldwatch::hub::Snapshot;
use coldwatch::records::Severity;
use coldwatch::MonitorEngineBuilder;
use log::{error, info, warn};
use std::path::PathBuf;

/// Command-line arguments for the cold-chain monitor
#[derive(Parser)]
#[command(
    name = "coldwatch",
    about = "Cold-chain monitor - temperature and humidity alerting for refrigerated storage",
    long_about = "Samples temperature and humidity sensors on a fixed interval, stores every \
                  reading, and raises, escalates and delivers alerts when a reading leaves its \
                  configured range."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run a single sampling tick and print the result as JSON
    #[arg(long)]
    once: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// A missing config file is accepted; defaults are used in its place.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Config path as UTF-8; `Ok(None)` when no config was given
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Load configuration, falling back to defaults when the file is missing or invalid
fn load_config(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(std::path::Path::new(path)) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path, e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

fn log_alerts(snapshot: &Snapshot) {
    if let Snapshot::Alerts(views) = snapshot {
        let mut active = 0;
        for view in views.iter().filter(|view| view.alert.is_active()) {
            active += 1;
            if view.severity == Severity::Critical {
                warn!(
                    "Critical alert {}: {} at {} since {}",
                    view.alert.id,
                    view.alert.dimension,
                    view.alert.observed_value,
                    view.alert.raised_at
                );
            }
        }
        info!("{} active alert(s)", active);
    }
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let engine = MonitorEngineBuilder::from_config(&config)
        .context("Failed to open reading store")?
        .build();

    for definition in &config.sensors {
        let id = engine
            .register_sensor(definition.clone())
            .with_context(|| format!("Failed to register sensor '{}'", definition.name))?;
        info!("Registered sensor '{}' ({})", definition.name, id);
    }
    if engine.sensors().is_empty() {
        warn!("No sensors configured; add [[sensors]] entries to the configuration file");
    }

    let _alert_log = engine.subscribe_alerts(log_alerts);

    if once {
        let report = engine.tick().await;
        let summary = serde_json::json!({
            "tick": report,
            "alerts": engine.alerts(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let (shutdown_sender, mut shutdown_receiver) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    engine.start()?;
    info!("Cold-chain monitor is running. Press Ctrl+C to stop.");

    shutdown_receiver.recv().await;
    engine.stop().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting cold-chain monitor");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };
    let config = load_config(config_path);

    if let Err(e) = run(config, cli.once).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Cold-chain monitor shutdown complete");
}
