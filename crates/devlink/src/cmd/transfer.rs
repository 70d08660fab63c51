use devlink_device::sync::{pull as pull_path, push as push_dir, upload_if_different};
use devlink_device::Device;
use tracing::{info, warn};

use crate::cmd::{lock, PullArgs, PushArgs};
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_done, print_report, OutputFormat};

pub async fn pull(device: &Device, args: PullArgs, format: OutputFormat) -> CliResult<i32> {
    pull_path(device.uploader(), &args.from, &args.to)
        .await
        .map_err(|err| device_error("pull failed", err))?;
    print_done("pull", &args.from, format);
    Ok(SUCCESS)
}

pub async fn push(device: &Device, args: PushArgs, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    push_dir(device.uploader(), &args.from, &args.to)
        .await
        .map_err(|err| device_error("push failed", err))?;
    print_done("push", &args.to, format);
    Ok(SUCCESS)
}

pub async fn sync(device: &Device, args: PushArgs, format: OutputFormat) -> CliResult<i32> {
    lock(device).await?;
    let uploader = device.uploader();

    let remote = match uploader.get_dir_hashes(&args.to).await {
        Ok(remote) => remote,
        Err(err) if err.is_timeout() => return Err(device_error("hash listing failed", err)),
        Err(err) => {
            warn!(path = %args.to, %err, "no remote hashes, uploading everything");
            if let Err(err) = uploader.create_directory(&args.to).await {
                info!(path = %args.to, %err, "could not create remote directory");
            }
            Vec::new()
        }
    };

    let report = upload_if_different(uploader, &remote, &args.from, &args.to)
        .await
        .map_err(|err| device_error("sync failed", err))?;
    print_report(&report, format);
    Ok(SUCCESS)
}
