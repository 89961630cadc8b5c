//! Application entry point and builder pattern implementation.

use std::{future::Future, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config, control_loop::ControlLoop, drivers::IpmiTool, speed_table::SpeedTable,
    transport::ManagementInterface,
};

/// Owns the control loop and the process lifecycle around it.
///
/// # Example
///
/// ```no_run
/// use ipmi_fand::{application::Application, config::Config};
///
/// # async fn example() -> anyhow::Result<()> {
/// let (config, _) = Config::load(None)?;
/// Application::builder()
///     .with_config(config)
///     .build()?
///     .run()
///     .await
/// # }
/// ```
pub struct Application {
    control: ControlLoop,
    shutdown_grace: Duration,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the control loop until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs the control loop until `shutdown` resolves.
    ///
    /// The future yields the name of the stop request for the log. After it
    /// resolves the loop is cancelled and given `shutdown_grace` to finish
    /// its in-flight tick.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let Self {
            mut control,
            shutdown_grace,
        } = self;

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move { control.run(token).await }
        });

        let stop = shutdown.await;
        match &stop {
            Ok(name) => info!("Received {name}, stopping control loop..."),
            Err(e) => error!("Shutdown listener failed: {e:#}"),
        }
        token.cancel();

        match timeout(shutdown_grace, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Control task failed: {e}"),
            Err(_) => warn!("Control loop did not stop within {shutdown_grace:?}"),
        }

        info!("Program exited safely");
        stop.map(|_| ())
    }
}

async fn shutdown_signal() -> Result<&'static str> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Describes temperatures the table leaves to the full-speed fallback.
pub fn coverage_warnings(table: &SpeedTable) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(first) = table.ranges().first().filter(|r| r.min_temp > 0.0) {
        warnings.push(format!(
            "Speed table starts at {}; colder readings run fans at 100%",
            first.min_temp
        ));
    }
    warnings.extend(table.gaps().into_iter().map(|(from, to)| {
        format!("Speed table leaves [{from}, {to}) uncovered; fans run at 100% there")
    }));

    warnings
}

/// Validates `config` and renders the `--check` summary.
pub fn check_report(config: &Config, source: Option<&Path>) -> Result<String> {
    config.validate()?;
    let table = config.speed_table()?;

    let mut report = match source {
        Some(path) => format!("Configuration OK: {}\n", path.display()),
        None => "Configuration OK: built-in defaults\n".to_string(),
    };
    for warning in coverage_warnings(&table) {
        report.push_str(&format!("warning: {warning}\n"));
    }
    report.push_str(&table.to_string());

    Ok(report)
}

/// Builder pattern for creating Application instances.
///
/// The management interface defaults to [`IpmiTool`] built from the
/// configuration; tests inject their own.
pub struct ApplicationBuilder {
    config: Option<Config>,
    interface: Option<Arc<dyn ManagementInterface>>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config: None,
            interface: None,
        }
    }

    /// Sets the configuration for the application.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the management interface.
    pub fn with_interface(mut self, interface: Arc<dyn ManagementInterface>) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Validates the configuration and builds the control loop.
    ///
    /// Fails on any configuration error so that an invalid speed table
    /// never drives the fans.
    pub fn build(self) -> Result<Application> {
        let config = self
            .config
            .ok_or_else(|| anyhow!("Configuration is required"))?;
        config.validate()?;

        let table = config.speed_table()?;
        for warning in coverage_warnings(&table) {
            warn!("{warning}");
        }

        let interface = self
            .interface
            .unwrap_or_else(|| Arc::new(IpmiTool::from_config(&config)));

        let control = ControlLoop::new(
            interface,
            config.sensor.parser(),
            table,
            config.tick_interval(),
        );

        Ok(Application {
            control,
            // Room for one in-flight tick: a sensor query and a set-speed command.
            shutdown_grace: config.command_timeout() * 2 + Duration::from_secs(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        speed_table::{SpeedPercent, SpeedRange},
        transport::{CommandOutput, MockManagementInterface},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[test]
    fn build_requires_config() {
        let err = Application::builder().build().err().unwrap();
        assert!(err.to_string().contains("Configuration is required"));
    }

    #[test]
    fn build_rejects_empty_table() {
        let config = Config {
            speed_table: Vec::new(),
            ..Config::default()
        };

        let result = Application::builder()
            .with_config(config)
            .with_interface(Arc::new(MockManagementInterface::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn build_accepts_table_with_gaps() {
        let config = Config {
            speed_table: vec![range(0.0, 40.0, 20), range(50.0, 70.0, 60)],
            ..Config::default()
        };

        let app = Application::builder()
            .with_config(config)
            .with_interface(Arc::new(MockManagementInterface::new()))
            .build()
            .unwrap();
        assert_eq!(app.shutdown_grace, Duration::from_secs(21));
    }

    fn range(min_temp: f32, max_temp: f32, speed: u8) -> SpeedRange {
        SpeedRange {
            min_temp,
            max_temp,
            speed: SpeedPercent::try_from(speed).unwrap(),
        }
    }

    #[test]
    fn default_table_has_full_coverage() {
        assert!(coverage_warnings(&SpeedTable::default()).is_empty());
    }

    #[test]
    fn check_report_warns_about_gaps_and_late_start() {
        let config = Config {
            speed_table: vec![range(10.0, 40.0, 20), range(50.0, 70.0, 60)],
            ..Config::default()
        };

        let report = check_report(&config, Some(Path::new("/etc/ipmi_fand/config.yml"))).unwrap();
        let lines: Vec<_> = report.lines().collect();

        assert_eq!(lines[0], "Configuration OK: /etc/ipmi_fand/config.yml");
        assert_eq!(
            lines[1],
            "warning: Speed table starts at 10; colder readings run fans at 100%"
        );
        assert_eq!(
            lines[2],
            "warning: Speed table leaves [40, 50) uncovered; fans run at 100% there"
        );
        assert!(lines[3].starts_with("[ 10.0,  40.0) ->  20%"));
    }

    #[test]
    fn check_report_for_defaults_has_no_warnings() {
        let report = check_report(&Config::default(), None).unwrap();
        assert!(report.starts_with("Configuration OK: built-in defaults\n"));
        assert!(!report.contains("warning:"));
        assert!(report.ends_with(">= 100.0 -> 100%"));
    }

    #[test]
    fn check_report_rejects_invalid_config() {
        let config = Config {
            tick_seconds: 0,
            ..Config::default()
        };
        assert!(check_report(&config, None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_shutdown_then_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let mut mock = MockManagementInterface::new();
        mock.expect_invoke_sensor_query().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput::success("CPU1 Temp | 41.000 | degrees C | ok\n"))
        });
        mock.expect_invoke_set_speed()
            .returning(|_| Ok(CommandOutput::success("")));

        let app = Application::builder()
            .with_config(Config::default())
            .with_interface(Arc::new(mock))
            .build()
            .unwrap();

        let result = app
            .run_until(async {
                sleep(Duration::from_secs(11)).await;
                Ok("SIGTERM")
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_shutdown_listener_is_reported() {
        let mut mock = MockManagementInterface::new();
        mock.expect_invoke_sensor_query()
            .returning(|| Ok(CommandOutput::success("")));
        mock.expect_invoke_set_speed().never();

        let app = Application::builder()
            .with_config(Config::default())
            .with_interface(Arc::new(mock))
            .build()
            .unwrap();

        let result = app
            .run_until(async { Err(anyhow!("no signal handler")) })
            .await;
        assert!(result.is_err());
    }
}
