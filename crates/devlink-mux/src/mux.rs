use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use devlink_frame::{Frame, Packetizer, FRAME_CAPACITY};
use devlink_transport::{BoxedDuplex, Duplex, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{MuxError, Result};
use crate::packet::Packet;

const READ_CHUNK_SIZE: usize = 1024;

/// Receives every frame decoded on one subscribed channel.
pub trait Consumer: Send + Sync + 'static {
    fn process_packet(&self, data: Bytes);
}

impl<F> Consumer for F
where
    F: Fn(Bytes) + Send + Sync + 'static,
{
    fn process_packet(&self, data: Bytes) {
        self(data)
    }
}

type GlobalCallback = Arc<dyn Fn(u8, Bytes) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;
type EndCallback = Arc<dyn Fn() + Send + Sync>;

/// Configuration for a [`Mux`].
#[derive(Debug, Clone, Default)]
pub struct MuxConfig {
    /// Channels that may be subscribed to or sent on. `None` allows all.
    pub channels: Option<BTreeSet<u8>>,
}

#[derive(Default)]
struct Routes {
    channels: HashMap<u8, Arc<dyn Consumer>>,
    global: Option<GlobalCallback>,
    on_error: Option<ErrorCallback>,
    on_end: Option<EndCallback>,
}

struct Shared {
    routes: Mutex<Routes>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    shutdown: watch::Sender<bool>,
    config: MuxConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn check_channel(&self, channel: u8) -> Result<()> {
        match &self.config.channels {
            Some(active) if !active.contains(&channel) => {
                Err(MuxError::UnsupportedChannel(channel))
            }
            _ => Ok(()),
        }
    }

    fn receive(&self, packetizer: &mut Packetizer, byte: u8) {
        if !packetizer.put(byte) {
            trace!(
                buffered = packetizer.buffered(),
                "frame exceeded buffer bound; resynchronizing"
            );
            packetizer.reset();
            return;
        }
        if !packetizer.is_complete() {
            return;
        }

        let frame = packetizer.decode();
        packetizer.reset();
        if let Some(frame) = frame {
            self.dispatch(frame);
        }
    }

    fn dispatch(&self, frame: Frame) {
        let (consumer, global) = {
            let routes = lock(&self.routes);
            (
                routes.channels.get(&frame.channel).cloned(),
                routes.global.clone(),
            )
        };

        if let Some(consumer) = consumer {
            trace!(channel = frame.channel, len = frame.payload.len(), "dispatching frame");
            consumer.process_packet(frame.payload);
        } else if let Some(global) = global {
            global(frame.channel, frame.payload);
        } else {
            trace!(channel = frame.channel, "no subscriber; dropping frame");
        }
    }

    fn fail(&self, err: TransportError) {
        warn!(%err, "device stream failed");
        lock(&self.outbound).take();
        let callback = lock(&self.routes).on_error.clone();
        if let Some(callback) = callback {
            callback(&err);
        }
    }

    fn end(&self) {
        debug!("device stream ended");
        let callback = lock(&self.routes).on_end.clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Multiplexes logical channels over one duplex byte stream.
///
/// Must be created inside a tokio runtime: the writer task starts
/// immediately so packets can be sent before [`start`](Self::start).
pub struct Mux {
    shared: Arc<Shared>,
    reader: Mutex<Option<ReadHalf<BoxedDuplex>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Mux {
    /// Create a mux with default configuration.
    pub fn new<S: Duplex>(stream: S) -> Self {
        Self::with_config(stream, MuxConfig::default())
    }

    /// Create a mux with explicit configuration.
    pub fn with_config<S: Duplex>(stream: S, config: MuxConfig) -> Self {
        let stream: BoxedDuplex = Box::new(stream);
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
            outbound: Mutex::new(Some(tx)),
            shutdown: shutdown_tx,
            config,
        });

        let writer_task = tokio::spawn(write_loop(writer, rx, shutdown_rx, Arc::clone(&shared)));

        Self {
            shared,
            reader: Mutex::new(Some(reader)),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(Some(writer_task)),
        }
    }

    /// Begin consuming inbound bytes. Calling it again has no effect.
    pub fn start(&self) {
        let Some(reader) = lock(&self.reader).take() else {
            return;
        };
        let task = tokio::spawn(read_loop(reader, Arc::clone(&self.shared)));
        *lock(&self.reader_task) = Some(task);
    }

    /// Start building a packet for `channel`.
    pub fn build_packet(&self, channel: u8) -> Result<Packet> {
        self.shared.check_channel(channel)?;
        let outbound = lock(&self.shared.outbound)
            .clone()
            .ok_or(MuxError::Destroyed)?;
        Ok(Packet::new(channel, self.max_packet_size(), outbound))
    }

    /// Largest payload a single packet can carry.
    ///
    /// One byte of the frame capacity is reserved for the channel marker.
    pub fn max_packet_size(&self) -> usize {
        FRAME_CAPACITY - 1
    }

    /// Route every frame on `channel` to `consumer`, replacing any previous
    /// subscription on that channel.
    pub fn subscribe_channel(&self, channel: u8, consumer: Arc<dyn Consumer>) -> Result<()> {
        self.shared.check_channel(channel)?;
        if lock(&self.shared.routes)
            .channels
            .insert(channel, consumer)
            .is_some()
        {
            debug!(channel, "replaced channel subscription");
        }
        Ok(())
    }

    /// Receive frames on channels without a subscriber.
    pub fn set_global_callback(&self, callback: impl Fn(u8, Bytes) + Send + Sync + 'static) {
        lock(&self.shared.routes).global = Some(Arc::new(callback));
    }

    /// Called once when the stream fails.
    pub fn on_error(&self, callback: impl Fn(&TransportError) + Send + Sync + 'static) {
        lock(&self.shared.routes).on_error = Some(Arc::new(callback));
    }

    /// Called once when the remote end closes the stream.
    pub fn on_end(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.routes).on_end = Some(Arc::new(callback));
    }

    /// Flush pending packets, close the stream and stop reading.
    ///
    /// Completes once every packet sent before the call has been written
    /// and the write side has been shut down. Packets still being built
    /// fail with [`MuxError::Destroyed`] when sent.
    pub async fn destroy(&self) {
        lock(&self.shared.outbound).take();
        self.shared.shutdown.send_replace(true);

        let writer = lock(&self.writer_task).take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(%err, "mux writer task failed");
            }
        }

        let reader = lock(&self.reader_task).take();
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }
        lock(&self.reader).take();
        debug!("mux destroyed");
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        // The writer drains what is queued, then exits on its own.
        self.shared.shutdown.send_replace(true);
        if let Some(reader) = lock(&self.reader_task).take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("config", &self.shared.config)
            .field("started", &lock(&self.reader).is_none())
            .finish()
    }
}

async fn read_loop(mut reader: ReadHalf<BoxedDuplex>, shared: Arc<Shared>) {
    let mut packetizer = Packetizer::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                shared.end();
                return;
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                shared.fail(TransportError::Io(err));
                return;
            }
        };

        for &byte in &chunk[..read] {
            shared.receive(&mut packetizer, byte);
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedDuplex>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    shared: Arc<Shared>,
) {
    let mut stopping = false;
    loop {
        let frame = if stopping {
            outbound.recv().await
        } else {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        // Frames queued before the signal are still written.
                        outbound.close();
                        stopping = true;
                    }
                    continue;
                }
                frame = outbound.recv() => frame,
            }
        };
        let Some(frame) = frame else {
            break;
        };
        let result = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(err) = result {
            shared.fail(TransportError::Io(err));
            return;
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%err, "shutdown of device stream failed");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn pair() -> (Mux, Mux) {
        let (left, right) = tokio::io::duplex(4096);
        let left = Mux::new(left);
        let right = Mux::new(right);
        left.start();
        right.start();
        (left, right)
    }

    fn buffer_consumer() -> (Arc<dyn Consumer>, UnboundedReceiver<Bytes>) {
        let (tx, rx) = unbounded_channel();
        let consumer = move |data: Bytes| {
            let _ = tx.send(data);
        };
        (Arc::new(consumer), rx)
    }

    fn send(mux: &Mux, channel: u8, data: &[u8]) {
        let mut packet = mux.build_packet(channel).unwrap();
        for &byte in data {
            assert!(packet.put(byte));
        }
        packet.send().unwrap();
    }

    fn cases(capacity: usize) -> Vec<(&'static str, u8, Vec<u8>)> {
        let full: Vec<u8> = (0..capacity).map(|i| i as u8).collect();
        vec![
            ("empty packet", 0, vec![]),
            ("single byte", 1, vec![0x01]),
            ("two bytes", 2, vec![0x01, 0x02]),
            ("three bytes", 3, vec![0x01, 0x02, 0x03]),
            ("full packet", 255, full.clone()),
            ("full packet ch1", 1, full),
        ]
    }

    #[tokio::test]
    async fn global_callback_receives_channel_and_payload() {
        let (sender, receiver) = pair();
        let (tx, mut rx) = unbounded_channel();
        receiver.set_global_callback(move |channel, data| {
            let _ = tx.send((channel, data));
        });

        for (name, channel, data) in cases(sender.max_packet_size()) {
            send(&sender, channel, &data);
            let (got_channel, got) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(got_channel, channel, "{name}");
            assert_eq!(got.as_ref(), data.as_slice(), "{name}");
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_consumer_receives_only_its_channel() {
        let (sender, receiver) = pair();
        let (bystander, mut bystander_rx) = buffer_consumer();
        receiver.subscribe_channel(42, bystander).unwrap();

        for (name, channel, data) in cases(sender.max_packet_size()) {
            let (consumer, mut rx) = buffer_consumer();
            receiver.subscribe_channel(channel, consumer).unwrap();

            send(&sender, channel, &data);
            let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(got.as_ref(), data.as_slice(), "{name}");
            assert!(rx.try_recv().is_err(), "{name}: delivered more than once");
        }
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscriber_takes_precedence_over_global_callback() {
        let (sender, receiver) = pair();
        let (global_tx, mut global_rx) = unbounded_channel();
        receiver.set_global_callback(move |channel, _| {
            let _ = global_tx.send(channel);
        });
        let (consumer, mut rx) = buffer_consumer();
        receiver.subscribe_channel(7, consumer).unwrap();

        send(&sender, 7, b"mine");
        send(&sender, 8, b"theirs");

        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().as_ref(), b"mine");
        assert_eq!(timeout(WAIT, global_rx.recv()).await.unwrap(), Some(8));
        assert!(global_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replaced_subscription_supersedes_previous() {
        let (sender, receiver) = pair();
        let (old, mut old_rx) = buffer_consumer();
        let (new, mut new_rx) = buffer_consumer();
        receiver.subscribe_channel(3, old).unwrap();
        receiver.subscribe_channel(3, new).unwrap();

        send(&sender, 3, b"x");
        assert_eq!(timeout(WAIT, new_rx.recv()).await.unwrap().unwrap().as_ref(), b"x");
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn packet_rejects_byte_past_max_size() {
        let (sender, _receiver) = pair();
        let mut packet = sender.build_packet(255).unwrap();
        for i in 0..sender.max_packet_size() {
            assert!(packet.put(i as u8));
        }
        assert_eq!(packet.space(), 0);
        assert!(!packet.put(0));
    }

    #[tokio::test]
    async fn unsolicited_noise_is_dropped() {
        let (raw, far) = tokio::io::duplex(4096);
        let receiver = Mux::new(far);
        let (consumer, mut rx) = buffer_consumer();
        receiver.subscribe_channel(1, consumer).unwrap();
        receiver.start();

        let (_, mut raw_writer) = tokio::io::split(raw);
        raw_writer.write_all(&[0x13, 0x37, 0x99, 0x00]).await.unwrap();

        let mut wire = bytes::BytesMut::new();
        devlink_frame::encode_frame(1, b"clean", &mut wire).unwrap();
        raw_writer.write_all(&wire).await.unwrap();

        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().as_ref(), b"clean");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn active_channel_set_is_enforced() {
        let (stream, _far) = tokio::io::duplex(64);
        let mux = Mux::with_config(
            stream,
            MuxConfig {
                channels: Some([0u8, 1].into_iter().collect()),
            },
        );
        let (consumer, _rx) = buffer_consumer();

        assert!(mux.build_packet(1).is_ok());
        assert!(matches!(
            mux.build_packet(9),
            Err(MuxError::UnsupportedChannel(9))
        ));
        assert!(matches!(
            mux.subscribe_channel(9, consumer),
            Err(MuxError::UnsupportedChannel(9))
        ));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (sender, receiver) = pair();
        receiver.start();
        receiver.start();
        let (consumer, mut rx) = buffer_consumer();
        receiver.subscribe_channel(5, consumer).unwrap();

        send(&sender, 5, b"once");
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().as_ref(), b"once");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn destroy_flushes_and_signals_end() {
        let (sender, receiver) = pair();
        let (consumer, mut rx) = buffer_consumer();
        receiver.subscribe_channel(16, consumer).unwrap();
        let (end_tx, mut end_rx) = unbounded_channel();
        receiver.on_end(move || {
            let _ = end_tx.send(());
        });

        send(&sender, 16, b"last words");
        sender.destroy().await;

        assert_eq!(
            timeout(WAIT, rx.recv()).await.unwrap().unwrap().as_ref(),
            b"last words"
        );
        assert_eq!(timeout(WAIT, end_rx.recv()).await.unwrap(), Some(()));
        assert!(matches!(sender.build_packet(16), Err(MuxError::Destroyed)));
    }

    #[tokio::test]
    async fn destroy_does_not_wait_for_packets_in_progress() {
        let (sender, receiver) = pair();
        let (consumer, mut rx) = buffer_consumer();
        receiver.subscribe_channel(2, consumer).unwrap();

        send(&sender, 2, b"queued");
        let mut held = sender.build_packet(2).unwrap();
        held.write(b"late");
        timeout(WAIT, sender.destroy()).await.unwrap();

        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().unwrap().as_ref(), b"queued");
        assert!(matches!(held.send(), Err(MuxError::Destroyed)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_the_mux_closes_the_stream() {
        let (sender, receiver) = pair();
        let (end_tx, mut end_rx) = unbounded_channel();
        receiver.on_end(move || {
            let _ = end_tx.send(());
        });

        send(&sender, 4, b"bye");
        drop(sender);
        assert_eq!(timeout(WAIT, end_rx.recv()).await.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn send_after_destroy_fails() {
        let (sender, _receiver) = pair();
        let packet = sender.build_packet(0).unwrap();
        sender.destroy().await;
        assert!(matches!(packet.send(), Err(MuxError::Destroyed)));
    }

    struct ResetStream;

    impl AsyncRead for ResetStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        }
    }

    impl AsyncWrite for ResetStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn read_failure_reports_error_and_stops_sending() {
        let mux = Mux::new(ResetStream);
        let (err_tx, mut err_rx) = unbounded_channel();
        mux.on_error(move |err| {
            let _ = err_tx.send(err.to_string());
        });
        mux.start();

        let message = timeout(WAIT, err_rx.recv()).await.unwrap().unwrap();
        assert!(message.contains("transport I/O error"));
        assert!(matches!(mux.build_packet(0), Err(MuxError::Destroyed)));
    }
}
