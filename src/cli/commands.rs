use std::env::VarError;

use tracing::debug;

use crate::{
    config::{resolve_config_path, ConfigOverrides, DriverConfig, DriverConfigFile},
    error::{classify_error_code, FlexvolError, Result},
};

use super::{
    output::{self, DriverOutput, OutputStatus},
    runtime::{self, DriverController},
    Cli, Command, CONFIG_ENV_VAR,
};

pub(crate) fn run(cli: Cli) -> Result<i32> {
    let output = match execute(cli) {
        Ok(output) => output,
        Err(error) => {
            let code = classify_error_code(&error);
            DriverOutput::failure(format!("error[{code}]: {error}"))
        }
    };
    let line = serde_json::to_string(&output)?;
    match output::stdout_line(&line) {
        Ok(OutputStatus::Written | OutputStatus::BrokenPipe) => Ok(output.exit_code()),
        Err(error) => Err(FlexvolError::Io(error)),
    }
}

fn execute(cli: Cli) -> Result<DriverOutput> {
    let controller = load_controller(&cli)?;
    match cli.command {
        Command::Init => {
            controller.init()?;
            Ok(DriverOutput::success())
        }
        Command::Create { options } => {
            let created = controller.create(&options)?;
            Ok(DriverOutput::success()
                .with_device(created.device)
                .with_volume_name(created.name.to_string()))
        }
        Command::Delete { options } => {
            controller.delete(&options)?;
            Ok(DriverOutput::success())
        }
        Command::Attach { params, .. } => {
            let device = controller.attach(&params)?;
            Ok(DriverOutput::success().with_device(device))
        }
        Command::Detach { device } => {
            controller.detach(&device)?;
            Ok(DriverOutput::success())
        }
        Command::Mount {
            target,
            device,
            params,
        } => {
            if params.is_some() {
                debug!("mount options are ignored");
            }
            controller.mount(&target, &device)?;
            Ok(DriverOutput::success())
        }
        Command::Unmount { target } => {
            controller.unmount(&target)?;
            Ok(DriverOutput::success())
        }
        Command::Status { path } => {
            let state = controller.inspect(&path)?;
            Ok(DriverOutput::success().with_state(state))
        }
    }
}

fn load_controller(cli: &Cli) -> Result<DriverController> {
    let env_path = read_config_env_var()?;
    let selection =
        resolve_config_path(cli.config.as_deref(), env_path.as_deref(), cli.no_config)?;
    let file = match selection.path.as_deref() {
        Some(path) => {
            debug!(source = ?selection.source, path = %path.display(), "loading config");
            Some(DriverConfigFile::load_from_path(path)?)
        }
        None => None,
    };
    let config = DriverConfig::resolve(
        file,
        ConfigOverrides {
            root: cli.root.clone(),
            host_key: cli.host_key.clone(),
            service_url: cli.service_url.clone(),
            access_key: cli.access_key.clone(),
            secret_key: cli.secret_key.clone(),
        },
    )?;
    runtime::controller_for_config(config)
}

fn read_config_env_var() -> Result<Option<String>> {
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(FlexvolError::Config(format!(
            "{CONFIG_ENV_VAR} must be valid UTF-8"
        ))),
    }
}
