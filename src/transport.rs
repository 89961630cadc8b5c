//! Management interface abstraction.
//!
//! The controller never talks to hardware directly. Sensing and actuation
//! are both a single command invocation that returns an exit status and
//! captured text, so the control logic can run against any implementation
//! of [`ManagementInterface`], including a mock in tests.

use std::{fmt, io, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::speed_table::SpeedPercent;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turns a non-zero exit into a [`CommandFailure`].
    pub fn into_result(self) -> Result<Self, CommandFailure> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CommandFailure::NonZeroExit {
                status: ExitStatus(self.status),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Exit status wrapper with a readable rendering for signal deaths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(pub Option<i32>);

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "exit status {code}"),
            None => write!(f, "termination by signal"),
        }
    }
}

/// The command could not be run to completion.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to collect output of `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// An external command that ran and failed, or never ran at all.
#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("command failed with {status}: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Out-of-band management interface of the host (BMC).
///
/// `Ok` means the command ran and produced output, whatever its exit code;
/// `Err` means it could not be run or did not finish in time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagementInterface: Send + Sync {
    /// Queries the sensor table. Stdout holds one pipe-delimited record per line.
    async fn invoke_sensor_query(&self) -> Result<CommandOutput, TransportError>;

    /// Sets the fan duty cycle for all zones.
    async fn invoke_set_speed(&self, percent: SpeedPercent)
    -> Result<CommandOutput, TransportError>;
}
