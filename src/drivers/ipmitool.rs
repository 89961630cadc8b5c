use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use log::debug;
use tokio::{process::Command, time::timeout};

use crate::{
    config::{CommandCfg, Config},
    speed_table::SpeedPercent,
    transport::{CommandOutput, ManagementInterface, TransportError},
};

/// Placeholder replaced by the duty cycle in set-speed arguments.
pub const SPEED_PLACEHOLDER: &str = "{speed}";

/// Management interface backed by local command invocations (`ipmitool`).
///
/// Every invocation is bounded by `timeout`; a child that outlives it is
/// killed so a wedged BMC cannot stall the control loop.
#[derive(Debug, Clone)]
pub struct IpmiTool {
    sensor_query: CommandCfg,
    set_speed: CommandCfg,
    timeout: Duration,
}

impl IpmiTool {
    pub fn new(sensor_query: CommandCfg, set_speed: CommandCfg, timeout: Duration) -> Self {
        Self {
            sensor_query,
            set_speed,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.sensor.command(),
            config.actuator.command(),
            config.command_timeout(),
        )
    }

    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput, TransportError> {
        let command_line = render_command_line(program, args);
        debug!("Executing `{command_line}`");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        // Dropping the pending future on timeout drops the child, which kills it.
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TransportError::TimedOut {
                command: command_line.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| TransportError::Io {
                command: command_line,
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl ManagementInterface for IpmiTool {
    async fn invoke_sensor_query(&self) -> Result<CommandOutput, TransportError> {
        self.execute(&self.sensor_query.program, &self.sensor_query.args)
            .await
    }

    async fn invoke_set_speed(
        &self,
        percent: SpeedPercent,
    ) -> Result<CommandOutput, TransportError> {
        let args = speed_args(&self.set_speed.args, percent);
        self.execute(&self.set_speed.program, &args).await
    }
}

/// Substitutes the duty cycle into the set-speed arguments.
pub fn speed_args(template: &[String], percent: SpeedPercent) -> Vec<String> {
    let value = percent.to_string();
    template
        .iter()
        .map(|arg| arg.replace(SPEED_PLACEHOLDER, &value))
        .collect()
}

fn render_command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
