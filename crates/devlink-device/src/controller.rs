//! Controller protocol (channel 0): program lifecycle, locking and
//! key-value configuration.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use devlink_mux::{InputPacketCommunicator, OutputPacketCommunicator};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ProtocolConfig;
use crate::encoding::put_str;
use crate::error::{DeviceError, Result};
use crate::pending::PendingReply;
use crate::retry::RetryPolicy;

/// Controller command and reply bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControllerCommand {
    Start = 0x01,
    Stop = 0x02,
    Status = 0x03,
    Version = 0x04,
    Lock = 0x10,
    Unlock = 0x11,
    ForceUnlock = 0x12,
    Ok = 0x20,
    Error = 0x21,
    LockNotOwned = 0x22,
    ConfigSet = 0x30,
    ConfigGet = 0x31,
    ConfigErase = 0x32,
}

impl ControllerCommand {
    pub const ALL: [ControllerCommand; 13] = [
        ControllerCommand::Start,
        ControllerCommand::Stop,
        ControllerCommand::Status,
        ControllerCommand::Version,
        ControllerCommand::Lock,
        ControllerCommand::Unlock,
        ControllerCommand::ForceUnlock,
        ControllerCommand::Ok,
        ControllerCommand::Error,
        ControllerCommand::LockNotOwned,
        ControllerCommand::ConfigSet,
        ControllerCommand::ConfigGet,
        ControllerCommand::ConfigErase,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| *cmd as u8 == byte)
    }

    pub fn name(self) -> &'static str {
        match self {
            ControllerCommand::Start => "START",
            ControllerCommand::Stop => "STOP",
            ControllerCommand::Status => "STATUS",
            ControllerCommand::Version => "VERSION",
            ControllerCommand::Lock => "LOCK",
            ControllerCommand::Unlock => "UNLOCK",
            ControllerCommand::ForceUnlock => "FORCE_UNLOCK",
            ControllerCommand::Ok => "OK",
            ControllerCommand::Error => "ERROR",
            ControllerCommand::LockNotOwned => "LOCK_NOT_OWNED",
            ControllerCommand::ConfigSet => "CONFIG_SET",
            ControllerCommand::ConfigGet => "CONFIG_GET",
            ControllerCommand::ConfigErase => "CONFIG_ERASE",
        }
    }

    /// Name of an arbitrary reply byte.
    pub fn describe(byte: u8) -> String {
        match Self::from_byte(byte) {
            Some(cmd) => cmd.name().to_string(),
            None => format!("UNKNOWN(0x{byte:02X})"),
        }
    }
}

impl fmt::Display for ControllerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value type tag carried by CONFIG_SET and CONFIG_GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigType {
    Int64 = 0,
    Float32 = 1,
    String = 2,
}

/// Reply to [`Controller::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramStatus {
    pub running: bool,
    pub exit_code: Option<u8>,
    pub status: String,
}

/// Client side of the controller protocol.
pub struct Controller {
    output: Box<dyn OutputPacketCommunicator>,
    pending: PendingReply,
    config: ProtocolConfig,
    lock_policy: RetryPolicy,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("lock_policy", &self.lock_policy)
            .field("busy", &self.pending.is_armed())
            .finish()
    }
}

impl Controller {
    /// Bind to a channel pair. `cancel` fires when the link goes down.
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
        let pending = PendingReply::new("controller", cancel);
        input.on_data(pending.consumer())?;
        Ok(Self {
            output: Box::new(output),
            pending,
            config,
            lock_policy: RetryPolicy::LOCK,
        })
    }

    /// Replace the retry policy used by [`lock`](Self::lock).
    pub fn with_lock_policy(mut self, policy: RetryPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Start the program at `path` on the device.
    pub async fn start(&self, path: &str) -> Result<()> {
        debug!(path, "starting program");
        if path.as_bytes().contains(&0) {
            return Err(DeviceError::InvalidArgument(format!(
                "{path:?} contains a NUL byte"
            )));
        }
        // START carries the path alone, so it runs to the end of the packet.
        self.call_ok(ControllerCommand::Start, path.as_bytes()).await
    }

    pub async fn stop(&self) -> Result<()> {
        debug!("stopping program");
        self.call_ok(ControllerCommand::Stop, &[]).await
    }

    pub async fn status(&self) -> Result<ProgramStatus> {
        debug!("getting status");
        let data = self
            .call(
                ControllerCommand::Status,
                &[],
                ControllerCommand::Status,
                self.config.request_timeout,
            )
            .await?;
        if data.is_empty() {
            return Err(DeviceError::MalformedReply("empty STATUS reply".into()));
        }
        Ok(ProgramStatus {
            running: data[0] == 1,
            exit_code: data.get(1).copied(),
            status: String::from_utf8_lossy(data.get(2..).unwrap_or_default()).into_owned(),
        })
    }

    /// Version information, one entry per non-empty line.
    pub async fn version(&self) -> Result<Vec<String>> {
        debug!("getting version");
        let data = self
            .call(
                ControllerCommand::Version,
                &[],
                ControllerCommand::Version,
                self.config.request_timeout,
            )
            .await?;
        if data.is_empty() {
            return Err(DeviceError::MalformedReply("empty VERSION reply".into()));
        }
        Ok(String::from_utf8_lossy(&data)
            .split('\n')
            .map(str::trim)
            .filter(|row| !row.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Take the controller lock.
    ///
    /// Attempts that time out are retried per the lock policy. If every
    /// attempt times out this still returns `Ok(())` and only logs a warning.
    pub async fn lock(&self) -> Result<()> {
        debug!("locking controller");
        let policy = self.lock_policy;
        let taken = policy
            .run("lock", |attempt| async move {
                trace!(attempt, "sending LOCK");
                self.call(
                    ControllerCommand::Lock,
                    &[],
                    ControllerCommand::Ok,
                    policy.attempt_timeout,
                )
                .await
                .map(drop)
            })
            .await?;
        if taken.is_none() {
            warn!("controller lock not confirmed by device");
        }
        Ok(())
    }

    pub async fn unlock(&self) -> Result<()> {
        debug!("unlocking controller");
        self.call_ok(ControllerCommand::Unlock, &[]).await
    }

    /// Release a lock held by another client.
    pub async fn force_unlock(&self) -> Result<()> {
        debug!("force unlocking controller");
        self.call_ok(ControllerCommand::ForceUnlock, &[]).await
    }

    pub async fn config_erase(&self, namespace: &str, name: &str) -> Result<()> {
        debug!(namespace, name, "erasing config");
        let body = key(namespace, name)?;
        self.call_ok(ControllerCommand::ConfigErase, &body).await
    }

    pub async fn config_set_string(&self, namespace: &str, name: &str, value: &str) -> Result<()> {
        debug!(namespace, name, "setting string config");
        let mut body = key(namespace, name)?;
        body.push(ConfigType::String as u8);
        put_str(&mut body, value)?;
        self.call_ok(ControllerCommand::ConfigSet, &body).await
    }

    pub async fn config_set_int(&self, namespace: &str, name: &str, value: i64) -> Result<()> {
        debug!(namespace, name, value, "setting int config");
        let mut body = key(namespace, name)?;
        body.push(ConfigType::Int64 as u8);
        body.extend_from_slice(&value.to_le_bytes());
        self.call_ok(ControllerCommand::ConfigSet, &body).await
    }

    pub async fn config_set_float(&self, namespace: &str, name: &str, value: f32) -> Result<()> {
        debug!(namespace, name, value, "setting float config");
        let mut body = key(namespace, name)?;
        body.push(ConfigType::Float32 as u8);
        body.extend_from_slice(&value.to_le_bytes());
        self.call_ok(ControllerCommand::ConfigSet, &body).await
    }

    pub async fn config_get_string(&self, namespace: &str, name: &str) -> Result<String> {
        debug!(namespace, name, "getting string config");
        let data = self.config_get(namespace, name, ConfigType::String, 2).await?;
        let value = &data[1..];
        let value = value.strip_suffix(&[0]).unwrap_or(value);
        Ok(String::from_utf8_lossy(value).into_owned())
    }

    /// Read an INT64 entry.
    ///
    /// The device stores 64 bits but only the low 32 bits are returned.
    pub async fn config_get_int(&self, namespace: &str, name: &str) -> Result<u32> {
        debug!(namespace, name, "getting int config");
        let data = self.config_get(namespace, name, ConfigType::Int64, 9).await?;
        Ok(u32::from_le_bytes([data[1], data[2], data[3], data[4]]))
    }

    pub async fn config_get_float(&self, namespace: &str, name: &str) -> Result<f32> {
        debug!(namespace, name, "getting float config");
        let data = self.config_get(namespace, name, ConfigType::Float32, 5).await?;
        Ok(f32::from_le_bytes([data[1], data[2], data[3], data[4]]))
    }

    /// CONFIG_GET reply data is `[type, value..]`; `min_len` covers both.
    async fn config_get(
        &self,
        namespace: &str,
        name: &str,
        ty: ConfigType,
        min_len: usize,
    ) -> Result<Bytes> {
        let mut body = key(namespace, name)?;
        body.push(ty as u8);
        let data = self
            .call(
                ControllerCommand::ConfigGet,
                &body,
                ControllerCommand::ConfigGet,
                self.config.request_timeout,
            )
            .await?;
        if data.len() < min_len {
            return Err(DeviceError::MalformedReply(format!(
                "CONFIG_GET reply has {} bytes, expected at least {min_len}",
                data.len()
            )));
        }
        Ok(data)
    }

    async fn call_ok(&self, command: ControllerCommand, body: &[u8]) -> Result<()> {
        self.call(command, body, ControllerCommand::Ok, self.config.request_timeout)
            .await
            .map(drop)
    }

    /// Send one request and wait for one reply. Returns the reply data
    /// after the command byte.
    async fn call(
        &self,
        command: ControllerCommand,
        body: &[u8],
        expect: ControllerCommand,
        timeout: Duration,
    ) -> Result<Bytes> {
        let mut guard = self.pending.arm()?;
        self.send(command, body)?;

        let reply = guard.recv(timeout).await?;
        let code = reply[0];
        trace!(
            %command,
            reply = %ControllerCommand::describe(code),
            len = reply.len(),
            "controller reply"
        );
        if code != expect as u8 {
            return Err(DeviceError::Protocol(ControllerCommand::describe(code)));
        }
        Ok(reply.slice(1..))
    }

    fn send(&self, command: ControllerCommand, body: &[u8]) -> Result<()> {
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

fn key(namespace: &str, name: &str) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(namespace.len() + name.len() + 2);
    put_str(&mut body, namespace)?;
    put_str(&mut body, name)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::encoding::Fields;
    use crate::testing::{host_side, link, serve};

    const OK: u8 = ControllerCommand::Ok as u8;
    const ERROR: u8 = ControllerCommand::Error as u8;

    fn controller(host: &Arc<devlink_mux::Mux>) -> Controller {
        let (input, output) = host_side(host, 0);
        Controller::new(&input, output, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn status_reply_is_decoded() {
        let (host, device) = link();
        serve(&device, 0, |req| {
            assert_eq!(req, &[ControllerCommand::Status as u8]);
            vec![vec![ControllerCommand::Status as u8, 1, 0, b'O', b'K']]
        });

        let status = controller(&host).status().await.unwrap();
        assert_eq!(
            status,
            ProgramStatus {
                running: true,
                exit_code: Some(0),
                status: "OK".into(),
            }
        );
    }

    #[tokio::test]
    async fn status_rejected_with_reply_name() {
        let (host, device) = link();
        serve(&device, 0, |_| vec![vec![ERROR]]);

        let err = controller(&host).status().await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(ref name) if name == "ERROR"));
    }

    #[tokio::test]
    async fn unknown_reply_byte_is_named() {
        let (host, device) = link();
        serve(&device, 0, |_| vec![vec![0x7E]]);

        let err = controller(&host).stop().await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(ref name) if name == "UNKNOWN(0x7E)"));
    }

    #[tokio::test]
    async fn version_rows_are_trimmed() {
        let (host, device) = link();
        serve(&device, 0, |_| {
            let mut reply = vec![ControllerCommand::Version as u8];
            reply.extend_from_slice(b" runtime 1.2 \n\nboard esp32\r\n");
            vec![reply]
        });

        let rows = controller(&host).version().await.unwrap();
        assert_eq!(rows, vec!["runtime 1.2", "board esp32"]);
    }

    #[tokio::test]
    async fn start_sends_raw_path() {
        let (host, device) = link();
        serve(&device, 0, |req| {
            assert_eq!(req[0], ControllerCommand::Start as u8);
            assert_eq!(&req[1..], b"/code/index.js");
            vec![vec![OK]]
        });

        controller(&host).start("/code/index.js").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lock_gives_up_silently_after_fifty_attempts() {
        let (host, device) = link();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        serve(&device, 0, move |req| {
            assert_eq!(req, &[ControllerCommand::Lock as u8]);
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });

        controller(&host).lock().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_retries_until_device_answers() {
        let (host, device) = link();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        serve(&device, 0, move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Vec::new()
            } else {
                vec![vec![OK]]
            }
        });

        controller(&host).lock().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_rejection_is_not_retried() {
        let (host, device) = link();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        serve(&device, 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![vec![ControllerCommand::LockNotOwned as u8]]
        });

        let err = controller(&host).lock().await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(ref name) if name == "LOCK_NOT_OWNED"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let (host, _device) = link();
        let err = controller(&host).unlock().await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_request_is_busy() {
        let (host, _device) = link();
        let controller = controller(&host);

        let (first, second) = tokio::join!(controller.status(), async {
            tokio::task::yield_now().await;
            controller.stop().await
        });
        assert!(first.unwrap_err().is_timeout());
        assert!(matches!(second, Err(DeviceError::Busy("controller"))));
    }

    #[tokio::test]
    async fn nul_in_key_is_rejected_before_sending() {
        let (host, device) = link();
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        serve(&device, 0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![vec![OK]]
        });

        let controller = controller(&host);
        let err = controller.config_set_string("ns\0x", "name", "v").await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument(_)));

        let long = "x".repeat(300);
        let err = controller.config_set_string("ns", "name", &long).await.unwrap_err();
        assert!(matches!(err, DeviceError::PayloadTooLarge { .. }));

        controller.stop().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    /// Key-value store speaking the controller config commands.
    fn config_device(device: &Arc<devlink_mux::Mux>) {
        let store: Mutex<HashMap<(String, String), (u8, Vec<u8>)>> = Mutex::new(HashMap::new());
        serve(device, 0, move |req| {
            let mut fields = Fields::new(&req[1..]);
            let ns = fields.str().unwrap();
            let name = fields.str().unwrap();
            let mut store = store.lock().unwrap();
            match ControllerCommand::from_byte(req[0]) {
                Some(ControllerCommand::ConfigSet) => {
                    let ty = fields.u8().unwrap();
                    store.insert((ns, name), (ty, fields.rest().to_vec()));
                    vec![vec![OK]]
                }
                Some(ControllerCommand::ConfigGet) => {
                    let ty = fields.u8().unwrap();
                    match store.get(&(ns, name)) {
                        Some((stored, value)) if *stored == ty => {
                            let mut reply = vec![ControllerCommand::ConfigGet as u8, ty];
                            reply.extend_from_slice(value);
                            vec![reply]
                        }
                        _ => vec![vec![ERROR]],
                    }
                }
                Some(ControllerCommand::ConfigErase) => match store.remove(&(ns, name)) {
                    Some(_) => vec![vec![OK]],
                    None => vec![vec![ERROR]],
                },
                _ => vec![vec![ERROR]],
            }
        });
    }

    #[tokio::test]
    async fn config_string_round_trip() {
        let (host, device) = link();
        config_device(&device);
        let controller = controller(&host);

        controller.config_set_string("wifi", "ssid", "home-net").await.unwrap();
        assert_eq!(controller.config_get_string("wifi", "ssid").await.unwrap(), "home-net");

        controller.config_erase("wifi", "ssid").await.unwrap();
        let err = controller.config_get_string("wifi", "ssid").await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(ref name) if name == "ERROR"));
    }

    #[tokio::test]
    async fn config_int_reads_back_low_word() {
        let (host, device) = link();
        config_device(&device);
        let controller = controller(&host);

        controller.config_set_int("app", "count", 42).await.unwrap();
        assert_eq!(controller.config_get_int("app", "count").await.unwrap(), 42);

        controller.config_set_int("app", "big", 0x1_0000_0007).await.unwrap();
        assert_eq!(controller.config_get_int("app", "big").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn config_float_round_trip() {
        let (host, device) = link();
        config_device(&device);
        let controller = controller(&host);

        controller.config_set_float("app", "gain", 1.5).await.unwrap();
        assert_eq!(controller.config_get_float("app", "gain").await.unwrap(), 1.5);
    }

    #[test]
    fn command_names() {
        assert_eq!(ControllerCommand::ForceUnlock.name(), "FORCE_UNLOCK");
        assert_eq!(ControllerCommand::from_byte(0x31), Some(ControllerCommand::ConfigGet));
        assert_eq!(ControllerCommand::describe(0x05), "UNKNOWN(0x05)");
        for cmd in ControllerCommand::ALL {
            assert_eq!(ControllerCommand::from_byte(cmd as u8), Some(cmd));
        }
    }
}
