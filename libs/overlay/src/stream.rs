use std::future::Future;
use std::io;
use std::sync::Arc;

use bufferpool::{Buf as _, Buffer, BufferPool};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// How many outbound packets may be queued before further writes are dropped.
const WRITE_QUEUE_SIZE: usize = 1000;
/// How many read packets may be queued for dispatch.
const DISPATCH_QUEUE_SIZE: usize = 1000;

/// An async byte-stream device.
///
/// One `read_some` is assumed to yield exactly one packet, which holds for TUN
/// descriptors opened without the per-packet info header. Transports that
/// interleave packet boundaries within a read cannot back this trait.
pub trait StreamDevice: Send + Sync + 'static {
    fn read_some(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    fn write(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl StreamDevice for tun::Tun {
    async fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        tun::Tun::read_some(self, buf).await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        tun::Tun::write(self, buf).await
    }
}

/// A server for stream descriptors, treating each read as one packet.
///
/// Construction wires everything up but starts nothing; call
/// [`start`](Self::start) to begin the perpetual read loop. Writes enqueued
/// before `start` are flushed once it runs.
pub struct StreamServer<D: StreamDevice> {
    device: Arc<D>,
    callback: Arc<dyn Fn(Buffer<Vec<u8>>) + Send + Sync>,
    outbound_tx: mpsc::Sender<Buffer<Vec<u8>>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Buffer<Vec<u8>>>>>,
    buffer_size: usize,
}

impl<D: StreamDevice> StreamServer<D> {
    /// Wraps `device`; `callback` will run once per read packet of at least one byte.
    pub fn new(
        callback: impl Fn(Buffer<Vec<u8>>) + Send + Sync + 'static,
        device: Arc<D>,
        buffer_size: usize,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(WRITE_QUEUE_SIZE);

        Self {
            device,
            callback: Arc::new(callback),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            buffer_size,
        }
    }

    /// Spawns the read loop, the callback dispatcher and the write task.
    ///
    /// Calling `start` a second time has no effect.
    pub fn start(&self) {
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            return;
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(DISPATCH_QUEUE_SIZE);

        tokio::spawn(read_loop(self.device.clone(), inbound_tx, self.buffer_size));
        tokio::spawn(dispatch_loop(inbound_rx, self.callback.clone()));
        tokio::spawn(write_loop(self.device.clone(), outbound_rx));
    }

    /// Queues `buffer` to be written to the device in full, returning once queued.
    ///
    /// Write failures and short writes are logged, never retried, and never
    /// reported to the caller.
    pub fn write(&self, buffer: Buffer<Vec<u8>>) {
        if let Err(e) = self.outbound_tx.try_send(buffer) {
            tracing::warn!("Dropping outbound packet: {e}");
        }
    }
}

async fn read_loop<D: StreamDevice>(
    device: Arc<D>,
    inbound_tx: mpsc::Sender<Buffer<Vec<u8>>>,
    buffer_size: usize,
) {
    let pool = BufferPool::<Vec<u8>>::new(buffer_size);

    loop {
        let mut buffer = pool.pull();
        buffer.resize_to(buffer_size);

        let bytes_read = match device.read_some(&mut buffer).await {
            Ok(bytes_read) => bytes_read,
            Err(e) => {
                tracing::error!("Error reading: {e}");
                break;
            }
        };

        if bytes_read == 0 {
            tracing::error!("Read zero bytes, stopping read loop");
            break;
        }

        buffer.truncate(bytes_read);

        if inbound_tx.send(buffer).await.is_err() {
            break;
        }
    }
}

async fn dispatch_loop(
    mut inbound_rx: mpsc::Receiver<Buffer<Vec<u8>>>,
    callback: Arc<dyn Fn(Buffer<Vec<u8>>) + Send + Sync>,
) {
    while let Some(buffer) = inbound_rx.recv().await {
        (callback)(buffer);
    }
}

async fn write_loop<D: StreamDevice>(
    device: Arc<D>,
    mut outbound_rx: mpsc::Receiver<Buffer<Vec<u8>>>,
) {
    while let Some(buffer) = outbound_rx.recv().await {
        match device.write(&buffer).await {
            Ok(0) => tracing::warn!("Wrote zero bytes"),
            Ok(n) if n != buffer.len() => {
                tracing::warn!("Short write: {n} of {} bytes", buffer.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Error writing: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Yields each scripted read once, then stays pending forever.
    struct ScriptedDevice {
        reads: std::sync::Mutex<VecDeque<io::Result<Vec<u8>>>>,
        written: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedDevice {
        fn new(reads: impl IntoIterator<Item = io::Result<Vec<u8>>>) -> Arc<Self> {
            Arc::new(Self {
                reads: std::sync::Mutex::new(reads.into_iter().collect()),
                written: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    impl StreamDevice for ScriptedDevice {
        async fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
            let next = self.reads.lock().unwrap().pop_front();

            match next {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }

        async fn write(&self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().push(buf.to_vec());

            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn read_invokes_callback_and_rearms() {
        let device = ScriptedDevice::new([Ok(vec![0xff]), Ok(vec![0xab, 0xcd])]);
        let (tx, mut rx) = mpsc::channel(8);

        let server = StreamServer::new(
            move |buffer: Buffer<Vec<u8>>| {
                tx.try_send(buffer.to_vec()).unwrap();
            },
            device,
            1500,
        );
        server.start();

        let bytes = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("callback to fire within one second")
            .unwrap();
        assert_eq!(bytes, vec![0xff]);

        let bytes = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("second callback to fire within one second")
            .unwrap();
        assert_eq!(bytes, vec![0xab, 0xcd]);
    }

    #[tokio::test]
    async fn nothing_happens_before_start() {
        let device = ScriptedDevice::new([Ok(vec![0xff])]);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);

        let _server = StreamServer::new(
            move |buffer: Buffer<Vec<u8>>| {
                tx.try_send(buffer.to_vec()).unwrap();
            },
            device.clone(),
            1500,
        );

        let result = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "no read should happen before start");
        assert_eq!(device.reads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_byte_read_stops_loop_without_callback() {
        let device = ScriptedDevice::new([Ok(vec![]), Ok(vec![0xff])]);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);

        let server = StreamServer::new(
            move |buffer: Buffer<Vec<u8>>| {
                tx.try_send(buffer.to_vec()).unwrap();
            },
            device.clone(),
            1500,
        );
        server.start();

        let result = timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(
            matches!(result, Err(_) | Ok(None)),
            "callback should not fire after a zero-byte read"
        );
        assert_eq!(device.reads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn read_error_stops_loop_without_callback() {
        let device = ScriptedDevice::new([
            Err(io::Error::new(io::ErrorKind::Interrupted, "operation canceled")),
            Ok(vec![0xff]),
        ]);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);

        let server = StreamServer::new(
            move |buffer: Buffer<Vec<u8>>| {
                tx.try_send(buffer.to_vec()).unwrap();
            },
            device.clone(),
            1500,
        );
        server.start();

        let result = timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(
            matches!(result, Err(_) | Ok(None)),
            "callback should not fire after a read error"
        );
        assert_eq!(device.reads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_enqueued_before_start_flush_after_start() {
        let device = ScriptedDevice::new([]);

        let server = StreamServer::new(|_| {}, device.clone(), 1500);

        let pool = BufferPool::new(1500);
        server.write(pool.pull_initialised(b"early"));

        server.start();

        timeout(Duration::from_secs(1), async {
            loop {
                if !device.written.lock().unwrap().is_empty() {
                    break;
                }

                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("write to reach the device within one second");

        assert_eq!(device.written.lock().unwrap()[0], b"early".to_vec());
    }
}
