//! Log backends for the `log` facade.

use std::{
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    sync::{Mutex, PoisonError},
    time::SystemTime,
};

use anyhow::{Context, Result, anyhow};
use log::{LevelFilter, Log, Metadata, Record};
use syslog::{BasicLogger, Facility, Formatter3164};

use crate::config::{LogCfg, LogTarget};

/// Installs the configured backend as the global logger.
///
/// `verbose` raises the level to `debug` regardless of the configuration.
pub fn init_log(cfg: &LogCfg, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        cfg.level_filter()?
    };

    match cfg.target {
        LogTarget::File => {
            let logger = LineLogger::open(cfg, level)?;
            install(Box::new(logger), level)
        }
        LogTarget::Console => install(Box::new(LineLogger::console(level)), level),
        LogTarget::Syslog => init_syslog(level),
    }
}

fn init_syslog(level: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: env!("CARGO_PKG_NAME").into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| install(Box::new(BasicLogger::new(logger)), level))
}

fn install(logger: Box<dyn Log>, level: LevelFilter) -> Result<()> {
    log::set_boxed_logger(logger)
        .map(|_| log::set_max_level(level))
        .map_err(|e| anyhow!("{e}"))
}

/// Formats one log line: `"<timestamp> <message>"`.
pub fn format_line(now: SystemTime, message: &str) -> String {
    format!("{} {message}", humantime::format_rfc3339_seconds(now))
}

/// Timestamped line logger writing to an append-only file, stdout, or both.
///
/// The file is opened once and line-buffered, so every record reaches the
/// disk as soon as it is written.
pub struct LineLogger {
    level: LevelFilter,
    file: Option<Mutex<LineWriter<File>>>,
    console: bool,
}

impl LineLogger {
    pub fn open(cfg: &LogCfg, level: LevelFilter) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.path)
            .with_context(|| format!("Failed to open log file: {}", cfg.path.display()))?;

        Ok(Self {
            level,
            file: Some(Mutex::new(LineWriter::new(file))),
            console: cfg.console,
        })
    }

    pub fn console(level: LevelFilter) -> Self {
        Self {
            level,
            file: None,
            console: true,
        }
    }
}

impl Log for LineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_line(SystemTime::now(), &record.args().to_string());

        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(file, "{line}");
        }
        if self.console {
            let _ = writeln!(io::stdout().lock(), "{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(PoisonError::into_inner).flush();
        }
        let _ = io::stdout().flush();
    }
}
