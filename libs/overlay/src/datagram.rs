use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bufferpool::{Buf as _, Buffer, BufferPool};
use tokio::sync::mpsc;

/// How many outbound datagrams may be queued before further sends are dropped.
const SEND_QUEUE_SIZE: usize = 1000;
/// How many received datagrams may be queued for dispatch.
const DISPATCH_QUEUE_SIZE: usize = 1000;

/// An async datagram socket; receiving yields the sender's endpoint alongside the bytes.
pub trait DatagramSocket: Send + Sync + 'static {
    type Endpoint: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, Self::Endpoint)>> + Send;

    fn send_to(
        &self,
        buf: &[u8],
        dst: Self::Endpoint,
    ) -> impl Future<Output = io::Result<usize>> + Send;
}

impl DatagramSocket for tokio::net::UdpSocket {
    type Endpoint = SocketAddr;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        tokio::net::UdpSocket::recv_from(self, buf).await
    }

    async fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        tokio::net::UdpSocket::send_to(self, buf, dst).await
    }
}

/// A server for datagram sockets.
///
/// Runs a perpetual receive loop with a single outstanding receive, handing
/// each datagram of at least one byte to the read callback in arrival order.
/// The callback runs on its own task, so callback latency never stalls the
/// receive hot path.
pub struct DatagramServer<S: DatagramSocket> {
    outbound_tx: mpsc::Sender<(S::Endpoint, Buffer<Vec<u8>>)>,
}

impl<S: DatagramSocket> DatagramServer<S> {
    /// Wraps `socket` and immediately begins receiving.
    ///
    /// `buffer_size` is the per-datagram buffer capacity (the packet size).
    pub fn new(
        socket: Arc<S>,
        callback: impl Fn(S::Endpoint, Buffer<Vec<u8>>) + Send + Sync + 'static,
        buffer_size: usize,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(DISPATCH_QUEUE_SIZE);

        tokio::spawn(receive_loop(socket.clone(), inbound_tx, buffer_size));
        tokio::spawn(dispatch_loop(inbound_rx, callback));
        tokio::spawn(send_loop(socket, outbound_rx));

        Self { outbound_tx }
    }

    /// Queues `buffer` for sending to `destination`, returning once queued.
    ///
    /// Send failures are logged and the datagram dropped; they are never
    /// retried and never reported to the caller.
    pub fn send_to(&self, destination: S::Endpoint, buffer: Buffer<Vec<u8>>) {
        if let Err(e) = self.outbound_tx.try_send((destination, buffer)) {
            tracing::warn!("Dropping outbound datagram: {e}");
        }
    }
}

async fn receive_loop<S: DatagramSocket>(
    socket: Arc<S>,
    inbound_tx: mpsc::Sender<(S::Endpoint, Buffer<Vec<u8>>)>,
    buffer_size: usize,
) {
    let pool = BufferPool::<Vec<u8>>::new(buffer_size);

    loop {
        let mut buffer = pool.pull();
        buffer.resize_to(buffer_size);

        let (bytes_read, sender) = match socket.recv_from(&mut buffer).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::error!("Error receiving datagram: {e}");
                break;
            }
        };

        if bytes_read == 0 {
            tracing::error!("Received zero bytes, stopping receive loop");
            break;
        }

        buffer.truncate(bytes_read);

        if inbound_tx.send((sender, buffer)).await.is_err() {
            break;
        }
    }
}

async fn dispatch_loop<E, F>(mut inbound_rx: mpsc::Receiver<(E, Buffer<Vec<u8>>)>, callback: F)
where
    F: Fn(E, Buffer<Vec<u8>>),
{
    while let Some((sender, buffer)) = inbound_rx.recv().await {
        (callback)(sender, buffer);
    }
}

async fn send_loop<S: DatagramSocket>(
    socket: Arc<S>,
    mut outbound_rx: mpsc::Receiver<(S::Endpoint, Buffer<Vec<u8>>)>,
) {
    while let Some((destination, buffer)) = outbound_rx.recv().await {
        match socket.send_to(&buffer, destination.clone()).await {
            Ok(n) if n != buffer.len() => {
                tracing::warn!(dst = ?destination, "Short send: {n} of {} bytes", buffer.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(dst = ?destination, "Error sending datagram: {e}"),
        }
    }
}
