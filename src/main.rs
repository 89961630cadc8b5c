use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use ipmi_fand::{
    application::{Application, check_report},
    cli::Cli,
    config::Config,
    logging::init_log,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, source) = Config::load(cli.config)?;

    if cli.check {
        println!("{}", check_report(&config, source.as_deref())?);
        return Ok(());
    }

    init_log(&config.logging, cli.verbose).context("Failed to initialize logging")?;

    info!(
        "Starting {} {}, tick {}s",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.tick_seconds
    );
    match &source {
        Some(path) => info!("Using configuration {}", path.display()),
        None => info!("No configuration file found, using built-in defaults"),
    }

    let result = match Application::builder().with_config(config).build() {
        Ok(app) => app.run().await,
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        error!("{e:#}");
    }

    log::logger().flush();
    result
}
