//! The closed control loop: sense, map, actuate, sleep.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use log::{error, info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    actuator::{Actuator, ActuatorError},
    sensors::{ReadingParser, SensorError, SensorReader, Temperature},
    speed_table::{SpeedPercent, SpeedTable, map_speed},
    transport::{CommandFailure, ManagementInterface},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between ticks.
    Idle,
    Ticking,
    /// Cancelled; never leaves this state.
    Stopped,
}

/// Result of a single tick. Logged and dropped.
#[derive(Debug)]
pub enum TickOutcome {
    Applied {
        temperature: Temperature,
        speed: SpeedPercent,
    },
    SensorFailed(CommandFailure),
    NoData,
    ActuatorFailed {
        temperature: Temperature,
        error: ActuatorError,
    },
    /// The tick panicked.
    Aborted(String),
}

impl TickOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    fn log(&self) {
        match self {
            Self::Applied { .. } => info!("{self}"),
            Self::NoData => warn!("{self}"),
            _ => error!("{self}"),
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied { temperature, speed } => write!(
                f,
                "Set fan speed to {speed}% for CPU temperature {temperature}"
            ),
            Self::SensorFailed(e) => write!(f, "Error getting CPU temperature: {e}"),
            Self::NoData => f.write_str("No CPU temperature data found"),
            Self::ActuatorFailed { temperature, error } => {
                write!(f, "Error at CPU temperature {temperature}: {error}")
            }
            Self::Aborted(reason) => write!(f, "Control tick aborted: {reason}"),
        }
    }
}

/// Drives [`SensorReader`] → [`map_speed`] → [`Actuator`] once per tick.
///
/// Ticks are strictly sequential and separated by a fixed delay. A failing
/// or panicking tick never ends the loop; only the cancellation token does.
pub struct ControlLoop {
    reader: SensorReader,
    actuator: Actuator,
    table: SpeedTable,
    interval: Duration,
    state: LoopState,
}

impl ControlLoop {
    pub fn new(
        interface: Arc<dyn ManagementInterface>,
        parser: ReadingParser,
        table: SpeedTable,
        interval: Duration,
    ) -> Self {
        Self {
            reader: SensorReader::new(interface.clone(), parser),
            actuator: Actuator::new(interface),
            table,
            interval,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until `token` is cancelled.
    ///
    /// Cancellation is observed before each tick and during the delay; an
    /// in-flight tick always runs to completion.
    pub async fn run(&mut self, token: CancellationToken) {
        info!("Control loop started, interval {:?}", self.interval);

        while !token.is_cancelled() {
            self.tick().await;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }

        self.state = LoopState::Stopped;
        info!("Control loop stopped");
    }

    /// Performs one sense-and-act cycle and logs its outcome.
    pub async fn tick(&mut self) -> TickOutcome {
        self.state = LoopState::Ticking;

        let outcome = AssertUnwindSafe(self.sense_and_act())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| TickOutcome::Aborted(panic_message(&*panic)));
        outcome.log();

        self.state = LoopState::Idle;
        outcome
    }

    async fn sense_and_act(&self) -> TickOutcome {
        let temperature = match self.reader.read_cpu_temperature().await {
            Ok(temperature) => temperature,
            Err(SensorError::CommandFailed(e)) => return TickOutcome::SensorFailed(e),
            Err(SensorError::NoData) => return TickOutcome::NoData,
        };

        let speed = map_speed(temperature, &self.table);

        match self.actuator.set_speed(speed).await {
            Ok(()) => TickOutcome::Applied { temperature, speed },
            Err(error) => TickOutcome::ActuatorFailed { temperature, error },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
