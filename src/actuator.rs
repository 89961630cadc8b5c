//! Fan duty-cycle actuation.

use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::{
    speed_table::SpeedPercent,
    transport::{CommandFailure, ManagementInterface},
};

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("failed to set fan speed to {speed}%: {source}")]
    CommandFailed {
        speed: SpeedPercent,
        #[source]
        source: CommandFailure,
    },
}

/// Sets the fan duty cycle through the management interface.
///
/// One command per call; retrying is left to the next tick.
pub struct Actuator {
    interface: Arc<dyn ManagementInterface>,
}

impl Actuator {
    pub fn new(interface: Arc<dyn ManagementInterface>) -> Self {
        Self { interface }
    }

    pub async fn set_speed(&self, speed: SpeedPercent) -> Result<(), ActuatorError> {
        let output = self
            .interface
            .invoke_set_speed(speed)
            .await
            .map_err(CommandFailure::from)
            .and_then(|output| output.into_result())
            .map_err(|source| ActuatorError::CommandFailed { speed, source })?;

        if !output.stdout.trim().is_empty() {
            debug!("Set speed response: {}", output.stdout.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CommandOutput, MockManagementInterface, TransportError};
    use mockall::predicate::eq;
    use std::io;
    use tokio_test::{assert_err, assert_ok};

    fn speed(value: u8) -> SpeedPercent {
        SpeedPercent::try_from(value).unwrap()
    }

    #[tokio::test]
    async fn successful_command_sets_speed() {
        let mut mock = MockManagementInterface::new();
        mock.expect_invoke_set_speed()
            .with(eq(speed(50)))
            .times(1)
            .returning(|_| Ok(CommandOutput::success("")));

        let actuator = Actuator::new(Arc::new(mock));
        assert_ok!(actuator.set_speed(speed(50)).await);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_with_speed() {
        let mut mock = MockManagementInterface::new();
        mock.expect_invoke_set_speed()
            .times(1)
            .returning(|_| Ok(CommandOutput::failure(1, "Invalid command")));

        let actuator = Actuator::new(Arc::new(mock));
        let err = assert_err!(actuator.set_speed(speed(80)).await);

        let ActuatorError::CommandFailed { speed: failed, source } = err;
        assert_eq!(failed, speed(80));
        assert!(matches!(source, CommandFailure::NonZeroExit { .. }));
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let mut mock = MockManagementInterface::new();
        mock.expect_invoke_set_speed().times(1).returning(|_| {
            Err(TransportError::Spawn {
                command: "ipmitool raw 0x2e 0x30 00 00 20".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        });

        let actuator = Actuator::new(Arc::new(mock));
        let err = actuator.set_speed(speed(20)).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to set fan speed to 20%"));
    }
}
