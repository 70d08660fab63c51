use devlink_device::Device;

use crate::cmd::{lock, ConfigGetArgs, ConfigKeyArgs, ConfigKind, ConfigSetArgs, StartArgs};
use crate::exit::{device_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_config_value, print_done, print_lines, print_status, OutputFormat};

pub async fn status(device: &Device, format: OutputFormat) -> CliResult<i32> {
    let status = device
        .controller()
        .status()
        .await
        .map_err(|err| device_error("status failed", err))?;
    print_status(&status, format);
    Ok(SUCCESS)
}

pub async fn version(device: &Device, format: OutputFormat) -> CliResult<i32> {
    let rows = device
        .controller()
        .version()
        .await
        .map_err(|err| device_error("version failed", err))?;
    print_lines(&rows, format);
    Ok(SUCCESS)
}

pub async fn start(device: &Device, args: StartArgs, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    device
        .controller()
        .start(&args.path)
        .await
        .map_err(|err| device_error("start failed", err))?;
    print_done("start", &args.path, format);
    Ok(SUCCESS)
}

pub async fn stop(device: &Device, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    device
        .controller()
        .stop()
        .await
        .map_err(|err| device_error("stop failed", err))?;
    print_done("stop", "", format);
    Ok(SUCCESS)
}

pub async fn config_get(
    device: &Device,
    args: ConfigGetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let ConfigKeyArgs { namespace, name } = &args.key;
    let controller = device.controller();
    let context = "config get failed";
    match args.kind {
        ConfigKind::Int => {
            let value = controller
                .config_get_int(namespace, name)
                .await
                .map_err(|err| device_error(context, err))?;
            print_config_value(namespace, name, value, format);
        }
        ConfigKind::Float => {
            let value = controller
                .config_get_float(namespace, name)
                .await
                .map_err(|err| device_error(context, err))?;
            print_config_value(namespace, name, value, format);
        }
        ConfigKind::String => {
            let value = controller
                .config_get_string(namespace, name)
                .await
                .map_err(|err| device_error(context, err))?;
            print_config_value(namespace, name, value, format);
        }
    }
    Ok(SUCCESS)
}

pub async fn config_set(
    device: &Device,
    args: ConfigSetArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let ConfigKeyArgs { namespace, name } = &args.key;
    let controller = device.controller();
    let result = match args.kind {
        ConfigKind::Int => {
            let value: i64 = args.value.parse().map_err(|_| {
                CliError::new(USAGE, format!("not an integer: {}", args.value))
            })?;
            lock(device).await?;
            controller.config_set_int(namespace, name, value).await
        }
        ConfigKind::Float => {
            let value: f32 = args.value.parse().map_err(|_| {
                CliError::new(USAGE, format!("not a number: {}", args.value))
            })?;
            lock(device).await?;
            controller.config_set_float(namespace, name, value).await
        }
        ConfigKind::String => {
            lock(device).await?;
            controller.config_set_string(namespace, name, &args.value).await
        }
    };
    result.map_err(|err| device_error("config set failed", err))?;
    print_done("config set", &format!("{namespace}/{name}"), format);
    Ok(SUCCESS)
}

pub async fn config_erase(
    device: &Device,
    args: ConfigKeyArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    lock(device).await?;
    device
        .controller()
        .config_erase(&args.namespace, &args.name)
        .await
        .map_err(|err| device_error("config erase failed", err))?;
    print_done("config erase", &format!("{}/{}", args.namespace, args.name), format);
    Ok(SUCCESS)
}
