//! Uploader protocol (channel 1): the device's filesystem and resources.
//!
//! Requests are one packet: a command byte and, for path operations, a
//! NUL-terminated path. Bulk data travels in data packets that start with
//! `HAS_MORE_DATA` or `LAST_DATA`; the receiver concatenates their bodies
//! until it sees `LAST_DATA`. Uploads are paced by `CONTINUE`
//! acknowledgements from the device.

use std::fmt;

use bytes::{Bytes, BytesMut};
use devlink_mux::{InputPacketCommunicator, OutputPacketCommunicator};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::ProtocolConfig;
use crate::encoding::{put_str, Fields};
use crate::error::{DeviceError, Result};
use crate::pending::{PendingReply, ReplyGuard};

/// SHA-1 digest length in the GET_DIR_HASHES listing.
const HASH_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UploaderCommand {
    ReadFile = 0x01,
    WriteFile = 0x02,
    DeleteFile = 0x03,
    ListDir = 0x04,
    CreateDir = 0x05,
    DeleteDir = 0x06,
    FormatStorage = 0x07,
    ListResources = 0x08,
    ReadResource = 0x09,
    GetDirHashes = 0x0A,
    HasMoreData = 0x10,
    LastData = 0x11,
    Ok = 0x20,
    Error = 0x21,
    NotFound = 0x22,
    Continue = 0x23,
    LockNotOwned = 0x24,
}

impl UploaderCommand {
    pub const ALL: [UploaderCommand; 17] = [
        UploaderCommand::ReadFile,
        UploaderCommand::WriteFile,
        UploaderCommand::DeleteFile,
        UploaderCommand::ListDir,
        UploaderCommand::CreateDir,
        UploaderCommand::DeleteDir,
        UploaderCommand::FormatStorage,
        UploaderCommand::ListResources,
        UploaderCommand::ReadResource,
        UploaderCommand::GetDirHashes,
        UploaderCommand::HasMoreData,
        UploaderCommand::LastData,
        UploaderCommand::Ok,
        UploaderCommand::Error,
        UploaderCommand::NotFound,
        UploaderCommand::Continue,
        UploaderCommand::LockNotOwned,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| *cmd as u8 == byte)
    }

    pub fn name(self) -> &'static str {
        match self {
            UploaderCommand::ReadFile => "READ_FILE",
            UploaderCommand::WriteFile => "WRITE_FILE",
            UploaderCommand::DeleteFile => "DELETE_FILE",
            UploaderCommand::ListDir => "LIST_DIR",
            UploaderCommand::CreateDir => "CREATE_DIR",
            UploaderCommand::DeleteDir => "DELETE_DIR",
            UploaderCommand::FormatStorage => "FORMAT_STORAGE",
            UploaderCommand::ListResources => "LIST_RESOURCES",
            UploaderCommand::ReadResource => "READ_RESOURCE",
            UploaderCommand::GetDirHashes => "GET_DIR_HASHES",
            UploaderCommand::HasMoreData => "HAS_MORE_DATA",
            UploaderCommand::LastData => "LAST_DATA",
            UploaderCommand::Ok => "OK",
            UploaderCommand::Error => "ERROR",
            UploaderCommand::NotFound => "NOT_FOUND",
            UploaderCommand::Continue => "CONTINUE",
            UploaderCommand::LockNotOwned => "LOCK_NOT_OWNED",
        }
    }

    pub fn describe(byte: u8) -> String {
        match Self::from_byte(byte) {
            Some(cmd) => cmd.name().to_string(),
            None => format!("UNKNOWN(0x{byte:02X})"),
        }
    }
}

impl fmt::Display for UploaderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Content hash of a remote file, relative to the listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHash {
    pub path: String,
    /// Lowercase hex SHA-1.
    pub hash: String,
}

/// A read-only resource compiled into the device firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub name: String,
    pub size: u32,
}

/// Client side of the uploader protocol.
pub struct Uploader {
    output: Box<dyn OutputPacketCommunicator>,
    pending: PendingReply,
    config: ProtocolConfig,
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("config", &self.config)
            .field("busy", &self.pending.is_armed())
            .finish()
    }
}

impl Uploader {
    pub fn new(
        input: &dyn InputPacketCommunicator,
        output: impl OutputPacketCommunicator + 'static,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Self::with_config(input, output, cancel, ProtocolConfig::default())
    }

    pub fn with_config(
        input: &dyn InputPacketCommunicator,
        output: impl OutputPacketCommunicator + 'static,
        cancel: CancellationToken,
        config: ProtocolConfig,
    ) -> Result<Self> {
        let pending = PendingReply::new("uploader", cancel);
        input.on_data(pending.consumer())?;
        Ok(Self {
            output: Box::new(output),
            pending,
            config,
        })
    }

    pub async fn read_file(&self, path: &str) -> Result<Bytes> {
        debug!(path, "reading file");
        self.download(UploaderCommand::ReadFile, &path_body(path)?).await
    }

    /// Write `data` to `path`, replacing any existing file.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(path, len = data.len(), "writing file");
        let mut guard = self.pending.arm()?;
        self.send(UploaderCommand::WriteFile, &path_body(path)?)?;
        self.expect(&mut guard, UploaderCommand::Continue).await?;

        let chunk_size = self.output.max_packet_size() - 1;
        let mut chunks = data.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            if chunks.peek().is_none() {
                self.send(UploaderCommand::LastData, chunk)?;
            } else {
                self.send(UploaderCommand::HasMoreData, chunk)?;
                self.expect(&mut guard, UploaderCommand::Continue).await?;
            }
        }
        if data.is_empty() {
            self.send(UploaderCommand::LastData, &[])?;
        }
        self.expect(&mut guard, UploaderCommand::Ok).await?;
        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        debug!(path, "deleting file");
        self.simple(UploaderCommand::DeleteFile, &path_body(path)?).await
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        debug!(path, "listing directory");
        let data = self.download(UploaderCommand::ListDir, &path_body(path)?).await?;
        let mut fields = Fields::new(&data);
        let mut entries = Vec::new();
        while !fields.is_empty() {
            let is_dir = match fields.u8()? {
                b'd' => true,
                b'f' => false,
                other => {
                    return Err(DeviceError::MalformedReply(format!(
                        "unknown entry kind 0x{other:02X}"
                    )))
                }
            };
            entries.push(DirEntry {
                name: fields.str()?,
                is_dir,
            });
        }
        Ok(entries)
    }

    pub async fn create_directory(&self, path: &str) -> Result<()> {
        debug!(path, "creating directory");
        self.simple(UploaderCommand::CreateDir, &path_body(path)?).await
    }

    pub async fn delete_directory(&self, path: &str) -> Result<()> {
        debug!(path, "deleting directory");
        self.simple(UploaderCommand::DeleteDir, &path_body(path)?).await
    }

    /// Erase the whole user filesystem.
    pub async fn format_storage(&self) -> Result<()> {
        debug!("formatting storage");
        self.simple(UploaderCommand::FormatStorage, &[]).await
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>> {
        debug!("listing resources");
        let data = self.download(UploaderCommand::ListResources, &[]).await?;
        let mut fields = Fields::new(&data);
        let mut resources = Vec::new();
        while !fields.is_empty() {
            let name = fields.str()?;
            let size = fields.u32_le()?;
            resources.push(ResourceInfo { name, size });
        }
        Ok(resources)
    }

    pub async fn read_resource(&self, name: &str) -> Result<Bytes> {
        debug!(name, "reading resource");
        self.download(UploaderCommand::ReadResource, &path_body(name)?).await
    }

    /// Hashes of every file below `path`, with paths relative to it.
    pub async fn get_dir_hashes(&self, path: &str) -> Result<Vec<FileHash>> {
        debug!(path, "getting directory hashes");
        let data = self.download(UploaderCommand::GetDirHashes, &path_body(path)?).await?;
        let mut fields = Fields::new(&data);
        let mut hashes = Vec::new();
        while !fields.is_empty() {
            let path = fields.str()?;
            let hash = hex::encode(fields.take(HASH_LEN)?);
            hashes.push(FileHash { path, hash });
        }
        Ok(hashes)
    }

    async fn simple(&self, command: UploaderCommand, body: &[u8]) -> Result<()> {
        let mut guard = self.pending.arm()?;
        self.send(command, body)?;
        self.expect(&mut guard, UploaderCommand::Ok).await?;
        Ok(())
    }

    /// Send a request and collect data packets up to `LAST_DATA`.
    async fn download(&self, command: UploaderCommand, body: &[u8]) -> Result<Bytes> {
        let mut guard = self.pending.arm()?;
        self.send(command, body)?;

        let mut data = BytesMut::new();
        loop {
            let reply = guard.recv(self.config.request_timeout).await?;
            match UploaderCommand::from_byte(reply[0]) {
                Some(UploaderCommand::HasMoreData) => data.extend_from_slice(&reply[1..]),
                Some(UploaderCommand::LastData) => {
                    data.extend_from_slice(&reply[1..]);
                    trace!(%command, len = data.len(), "download complete");
                    return Ok(data.freeze());
                }
                _ => return Err(DeviceError::Protocol(UploaderCommand::describe(reply[0]))),
            }
        }
    }

    async fn expect(&self, guard: &mut ReplyGuard, expected: UploaderCommand) -> Result<Bytes> {
        let reply = guard.recv(self.config.request_timeout).await?;
        trace!(reply = %UploaderCommand::describe(reply[0]), "uploader reply");
        if reply[0] != expected as u8 {
            return Err(DeviceError::Protocol(UploaderCommand::describe(reply[0])));
        }
        Ok(reply.slice(1..))
    }

    fn send(&self, command: UploaderCommand, body: &[u8]) -> Result<()> {
        let mut packet = self.output.build_packet()?;
        let size = 1 + body.len();
        if size > packet.space() {
            return Err(DeviceError::PayloadTooLarge {
                size,
                max: packet.space(),
            });
        }
        packet.put(command as u8);
        packet.write(body);
        packet.send()?;
        Ok(())
    }
}

fn path_body(path: &str) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(path.len() + 1);
    put_str(&mut body, path)?;
    Ok(body)
}
