use std::path::Path;

use devlink_device::Device;

use crate::cmd::{lock, LsArgs, PathArgs, ReadArgs, ResourceArgs, WriteArgs};
use crate::exit::{device_error, io_error, CliResult, SUCCESS};
use crate::output::{print_done, print_entries, print_raw, print_resources, OutputFormat};

pub async fn ls(device: &Device, args: LsArgs, format: OutputFormat) -> CliResult<i32> {
    let entries = device
        .uploader()
        .list_directory(&args.path)
        .await
        .map_err(|err| device_error("list failed", err))?;
    print_entries(&entries, format);
    Ok(SUCCESS)
}

pub async fn read(device: &Device, args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let data = device
        .uploader()
        .read_file(&args.path)
        .await
        .map_err(|err| device_error("read failed", err))?;
    emit(&data, args.output.as_deref(), format)
}

pub async fn write(device: &Device, args: WriteArgs, format: OutputFormat) -> CliResult<i32> {
    let data = match (&args.data, &args.file) {
        (Some(text), _) => text.as_bytes().to_vec(),
        (None, Some(file)) => {
            std::fs::read(file).map_err(|err| io_error(&format!("read {}", file.display()), err))?
        }
        (None, None) => Vec::new(),
    };
    lock(device).await?;
    device
        .uploader()
        .write_file(&args.path, &data)
        .await
        .map_err(|err| device_error("write failed", err))?;
    print_done("write", &args.path, format);
    Ok(SUCCESS)
}

pub async fn rm(device: &Device, args: PathArgs, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    device
        .uploader()
        .delete_file(&args.path)
        .await
        .map_err(|err| device_error("delete failed", err))?;
    print_done("rm", &args.path, format);
    Ok(SUCCESS)
}

pub async fn mkdir(device: &Device, args: PathArgs, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    device
        .uploader()
        .create_directory(&args.path)
        .await
        .map_err(|err| device_error("mkdir failed", err))?;
    print_done("mkdir", &args.path, format);
    Ok(SUCCESS)
}

pub async fn rmdir(device: &Device, args: PathArgs, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    device
        .uploader()
        .delete_directory(&args.path)
        .await
        .map_err(|err| device_error("rmdir failed", err))?;
    print_done("rmdir", &args.path, format);
    Ok(SUCCESS)
}

pub async fn format(device: &Device, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    device
        .uploader()
        .format_storage()
        .await
        .map_err(|err| device_error("format failed", err))?;
    print_done("format", "", format);
    Ok(SUCCESS)
}

pub async fn resources_ls(device: &Device, format: OutputFormat) -> CliResult<i32> {
    let resources = device
        .uploader()
        .list_resources()
        .await
        .map_err(|err| device_error("resource list failed", err))?;
    print_resources(&resources, format);
    Ok(SUCCESS)
}

pub async fn resources_read(
    device: &Device,
    args: ResourceArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let data = device
        .uploader()
        .read_resource(&args.name)
        .await
        .map_err(|err| device_error("resource read failed", err))?;
    emit(&data, args.output.as_deref(), format)
}

/// Save downloaded bytes to `output`, or dump them to stdout.
fn emit(data: &[u8], output: Option<&Path>, format: OutputFormat) -> CliResult<i32> {
    match output {
        Some(path) => {
            std::fs::write(path, data)
                .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
            print_done("saved", &path.display().to_string(), format);
        }
        None => print_raw(data),
    }
    Ok(SUCCESS)
}
