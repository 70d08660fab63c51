//! Moving files between the local filesystem and the device.
//!
//! [`upload_if_different`] is the incremental path: it compares SHA-1 hashes
//! from [`Uploader::get_dir_hashes`] against the local tree and only touches
//! files that changed. The other helpers copy unconditionally.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::error::{DeviceError, Result};
use crate::uploader::{FileHash, Uploader};

/// What to do with one file during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    /// Same content on both sides.
    Noop,
    /// New or changed locally.
    Upload,
    /// Present only on the device.
    Delete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Files whose upload or delete failed. They are logged and skipped.
    pub failed: usize,
}

/// Decide an action for every path in either listing.
///
/// `local` maps relative paths to hex SHA-1; `remote` is the device listing
/// for the same root.
pub fn classify(
    local: &BTreeMap<String, String>,
    remote: &[FileHash],
) -> BTreeMap<String, SyncAction> {
    let mut plan: BTreeMap<String, SyncAction> = remote
        .iter()
        .map(|entry| (entry.path.clone(), SyncAction::Delete))
        .collect();
    let remote: BTreeMap<&str, &str> = remote
        .iter()
        .map(|entry| (entry.path.as_str(), entry.hash.as_str()))
        .collect();

    for (path, hash) in local {
        let action = match remote.get(path.as_str()) {
            Some(remote_hash) if remote_hash.eq_ignore_ascii_case(hash) => SyncAction::Noop,
            _ => SyncAction::Upload,
        };
        trace!(path = %path, ?action, "classified");
        plan.insert(path.clone(), action);
    }
    plan
}

/// Lowercase hex SHA-1 of a file's content.
pub fn file_sha1(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| DeviceError::io(path, e))?;
    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher).map_err(|e| DeviceError::io(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hash every file below `root`, keyed by `/`-separated relative path.
pub fn hash_tree(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        hashes.insert(relative_key(root, entry.path())?, file_sha1(entry.path())?);
    }
    Ok(hashes)
}

/// Make the device directory `to` match the local directory `from`.
///
/// `remote` is the hash listing of `to`. Per-file failures are logged and
/// counted in [`SyncReport::failed`]; the run carries on.
pub async fn upload_if_different(
    uploader: &Uploader,
    remote: &[FileHash],
    from: &Path,
    to: &str,
) -> Result<SyncReport> {
    if !from.is_dir() {
        return Err(DeviceError::Application(format!(
            "{} is not a directory",
            from.display()
        )));
    }

    let plan = classify(&hash_tree(from)?, remote);
    let mut report = SyncReport::default();
    let mut created = HashSet::new();

    for (rel, action) in &plan {
        let dest = remote_join(to, rel);
        match action {
            SyncAction::Noop => {
                debug!(path = %rel, "unchanged, skipping");
                report.unchanged += 1;
            }
            SyncAction::Delete => match uploader.delete_file(&dest).await {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(path = %dest, %err, "failed to delete file");
                    report.failed += 1;
                }
            },
            SyncAction::Upload => {
                create_parents(uploader, to, rel, &mut created).await;
                let result = match fs::read(from.join(rel)) {
                    Ok(data) => uploader.write_file(&dest, &data).await,
                    Err(e) => Err(DeviceError::io(from.join(rel), e)),
                };
                match result {
                    Ok(()) => report.uploaded += 1,
                    Err(err) => {
                        warn!(path = %dest, %err, "failed to upload file");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    info!(
        uploaded = report.uploaded,
        deleted = report.deleted,
        failed = report.failed,
        "files synced"
    );
    Ok(report)
}

/// Create each directory on the way to `rel` below `to`, once per run.
async fn create_parents(uploader: &Uploader, to: &str, rel: &str, created: &mut HashSet<String>) {
    let Some((parents, _)) = rel.rsplit_once('/') else {
        return;
    };
    let mut prefix = String::new();
    for part in parents.split('/').filter(|p| !p.is_empty()) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        if !created.insert(prefix.clone()) {
            continue;
        }
        let dir = remote_join(to, &prefix);
        if let Err(err) = uploader.create_directory(&dir).await {
            // Usually means it already exists.
            debug!(path = %dir, %err, "create directory failed");
        }
    }
}

/// Copy a local file or directory tree to `to` on the device.
pub async fn upload(uploader: &Uploader, from: &Path, to: &str) -> Result<()> {
    info!(from = %from.display(), to, "uploading");
    let meta = fs::metadata(from).map_err(|e| DeviceError::io(from, e))?;
    if !meta.is_dir() && !meta.is_file() {
        return Err(DeviceError::Application(format!(
            "{} is neither a file nor a directory",
            from.display()
        )));
    }
    copy_tree(uploader, WalkDir::new(from), from, to).await
}

/// Copy the contents of local directory `from` into `to` on the device.
pub async fn push(uploader: &Uploader, from: &Path, to: &str) -> Result<()> {
    debug!(from = %from.display(), to, "pushing");
    if !from.is_dir() {
        return Err(DeviceError::Application(format!(
            "source {} must be a directory",
            from.display()
        )));
    }
    copy_tree(uploader, WalkDir::new(from).min_depth(1), from, to).await
}

async fn copy_tree(uploader: &Uploader, walk: WalkDir, from: &Path, to: &str) -> Result<()> {
    // Sorted walk visits a directory before its contents.
    for entry in walk.sort_by_file_name() {
        let entry = entry?;
        let dest = remote_join(to, &relative_key(from, entry.path())?);
        if entry.file_type().is_dir() {
            uploader
                .create_directory(&dest)
                .await
                .map_err(|err| {
                    DeviceError::Application(format!("failed to create directory {dest}: {err}"))
                })?;
        } else if entry.file_type().is_file() {
            let data = fs::read(entry.path()).map_err(|e| DeviceError::io(entry.path(), e))?;
            uploader
                .write_file(&dest, &data)
                .await
                .map_err(|err| {
                    DeviceError::Application(format!("failed to write file {dest}: {err}"))
                })?;
        }
    }
    Ok(())
}

/// Copy device file `from` to local path `to`.
pub async fn pull_file(uploader: &Uploader, from: &str, to: &Path) -> Result<()> {
    info!(from, to = %to.display(), "pulling file");
    let data = uploader.read_file(from).await?;
    fs::write(to, &data).map_err(|e| DeviceError::io(to, e))
}

/// Copy device directory `from` into local directory `to`.
///
/// `to` is created if missing and must be empty.
pub async fn pull_dir(uploader: &Uploader, from: &str, to: &Path) -> Result<()> {
    let mut pending = vec![(from.to_string(), to.to_path_buf())];
    while let Some((remote, local)) = pending.pop() {
        info!(from = %remote, to = %local.display(), "pulling directory");
        let entries = uploader.list_directory(&remote).await?;
        prepare_empty_dir(&local)?;

        for entry in entries {
            let child = remote_join(&remote, &entry.name);
            let target = local.join(&entry.name);
            if entry.is_dir {
                pending.push((child, target));
            } else {
                pull_file(uploader, &child, &target).await?;
            }
        }
    }
    Ok(())
}

/// Copy `from` to `to`, whichever kind of entry it is on the device.
pub async fn pull(uploader: &Uploader, from: &str, to: &Path) -> Result<()> {
    debug!(from, to = %to.display(), "pulling");
    let trimmed = from.trim_end_matches('/');
    let (parent, name) = match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        // Relative paths resolve against the device's working directory.
        None => (".", trimmed),
    };
    if name.is_empty() {
        return pull_dir(uploader, from, to).await;
    }

    let listing = uploader.list_directory(parent).await?;
    match listing.iter().find(|entry| entry.name == name) {
        Some(entry) if entry.is_dir => pull_dir(uploader, trimmed, to).await,
        Some(_) => pull_file(uploader, trimmed, to).await,
        None => Err(DeviceError::Application(format!("{from} not found on device"))),
    }
}

fn prepare_empty_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| DeviceError::io(dir, e))?;
    }
    if !dir.is_dir() {
        return Err(DeviceError::Application(format!(
            "destination {} must be a directory",
            dir.display()
        )));
    }
    let mut contents = fs::read_dir(dir).map_err(|e| DeviceError::io(dir, e))?;
    if contents.next().is_some() {
        return Err(DeviceError::Application(format!(
            "destination directory {} is not empty",
            dir.display()
        )));
    }
    Ok(())
}

/// Device path of `rel` below `root`.
fn remote_join(root: &str, rel: &str) -> String {
    if rel.is_empty() {
        return root.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), rel)
}

fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        DeviceError::Application(format!("{} is outside {}", path.display(), root.display()))
    })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
