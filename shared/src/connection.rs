//! One background thread per UDP socket.
//!
//! The simulation thread never touches the socket. It pushes outgoing
//! transfers with [`ConnectionThread::enqueue`] and collects received ones
//! once per frame with [`ConnectionThread::drain_incoming`]. The I/O thread
//! waits on two things at once: the socket becoming readable and a wake
//! channel that carries exactly one token per enqueued transfer. Each token
//! pops and sends exactly one transfer.
//!
//! Failures stay on the I/O thread: a failed send or receive is logged and
//! the loop carries on; undecodable datagrams are dropped.

use crate::transfer::{Transfer, TransferBuilder};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Largest datagram accepted from the socket, the UDP payload limit over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to start I/O runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("failed to spawn I/O thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Counters kept by the I/O thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub received: u64,
    pub sent: u64,
    /// Datagrams that failed to decode.
    pub dropped: u64,
    /// Wake tokens consumed.
    pub wakes: u64,
}

#[derive(Default)]
struct Shared {
    incoming: Mutex<Vec<Transfer>>,
    outgoing: Mutex<VecDeque<Transfer>>,
    received: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    wakes: AtomicU64,
}

/// Handle to the I/O thread owning one UDP socket.
///
/// Dropping the handle closes the wake channel; the thread sends whatever
/// was already enqueued and exits.
pub struct ConnectionThread {
    shared: Arc<Shared>,
    wake: mpsc::UnboundedSender<()>,
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ConnectionThread {
    /// Binds `addr` and starts the I/O thread. Servers pass their fixed
    /// port; clients pass port 0 for an ephemeral one.
    pub fn bind(addr: SocketAddr) -> Result<Self, ConnectionError> {
        let bind_error = |source| ConnectionError::Bind { addr, source };
        let socket = std::net::UdpSocket::bind(addr).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(ConnectionError::Runtime)?;

        let shared = Arc::new(Shared::default());
        let (wake, wake_rx) = mpsc::unbounded_channel();

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("udp-{}", local_addr))
            .spawn(move || runtime.block_on(io_loop(socket, thread_shared, wake_rx)))
            .map_err(ConnectionError::Spawn)?;

        debug!("Connection thread started on {}", local_addr);

        Ok(Self {
            shared,
            wake,
            local_addr,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queues `transfer` for sending and wakes the I/O thread once.
    pub fn enqueue(&self, transfer: Transfer) {
        self.shared.outgoing.lock().push_back(transfer);
        if self.wake.send(()).is_err() {
            warn!("I/O thread on {} has stopped, transfer not sent", self.local_addr);
        }
    }

    /// Takes everything received since the last call.
    pub fn drain_incoming(&self) -> Vec<Transfer> {
        std::mem::take(&mut *self.shared.incoming.lock())
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            received: self.shared.received.load(Ordering::Relaxed),
            sent: self.shared.sent.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            wakes: self.shared.wakes.load(Ordering::Relaxed),
        }
    }

    /// Sends everything already queued, then stops the thread and waits for it.
    pub fn shutdown(self) -> ConnectionStats {
        let Self {
            shared,
            wake,
            handle,
            local_addr,
        } = self;
        drop(wake);
        if handle.join().is_err() {
            error!("I/O thread on {} panicked", local_addr);
        }
        ConnectionStats {
            received: shared.received.load(Ordering::Relaxed),
            sent: shared.sent.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
            wakes: shared.wakes.load(Ordering::Relaxed),
        }
    }
}

async fn io_loop(
    socket: std::net::UdpSocket,
    shared: Arc<Shared>,
    mut wake_rx: mpsc::UnboundedReceiver<()>,
) {
    let socket = match UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to register UDP socket with the I/O runtime: {}", e);
            return;
        }
    };

    let mut builder = TransferBuilder::new();
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, addr)) => {
                    builder.set_source(addr);
                    match builder.decode(&buffer[..len]) {
                        Ok(transfer) => {
                            shared.incoming.lock().push(transfer);
                            shared.received.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            shared.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!("Dropping datagram from {}: {}", addr, e);
                        }
                    }
                }
                Err(e) => warn!("Error receiving datagram: {}", e),
            },

            token = wake_rx.recv() => {
                if token.is_none() {
                    debug!("Wake channel closed, I/O thread exiting");
                    break;
                }
                shared.wakes.fetch_add(1, Ordering::Relaxed);

                let next = shared.outgoing.lock().pop_front();
                let Some(transfer) = next else {
                    warn!("Woken with an empty outgoing queue");
                    continue;
                };
                let Some(destination) = transfer.destination() else {
                    warn!("Outgoing transfer has no destination, skipping");
                    continue;
                };
                match socket.send_to(transfer.payload(), destination).await {
                    Ok(_) => {
                        shared.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("Error sending to {}: {}", destination, e),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TYPE_KEY;
    use crate::MessageType;
    use std::time::{Duration, Instant};

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let connection = ConnectionThread::bind(loopback()).unwrap();
        assert_ne!(connection.local_addr().port(), 0);
        assert_eq!(connection.stats(), ConnectionStats::default());
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let first = ConnectionThread::bind(loopback()).unwrap();
        let taken = first.local_addr();
        assert!(matches!(
            ConnectionThread::bind(taken),
            Err(ConnectionError::Bind { .. })
        ));
    }

    #[test]
    fn test_send_and_receive_between_threads() {
        let a = ConnectionThread::bind(loopback()).unwrap();
        let b = ConnectionThread::bind(loopback()).unwrap();

        let mut builder = TransferBuilder::new();
        builder
            .add(TYPE_KEY, MessageType::Hello)
            .set_destination(b.local_addr());
        a.enqueue(builder.encode(true).unwrap());

        assert!(wait_for(|| b.stats().received == 1));
        let received = b.drain_incoming();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].source(), Some(a.local_addr()));
        assert_eq!(received[0].message_type().unwrap(), MessageType::Hello);
        assert!(b.drain_incoming().is_empty());
    }

    #[test]
    fn test_garbage_datagram_is_dropped() {
        let connection = ConnectionThread::bind(loopback()).unwrap();
        let raw = std::net::UdpSocket::bind(loopback()).unwrap();
        raw.send_to(b"not a transfer", connection.local_addr()).unwrap();

        assert!(wait_for(|| connection.stats().dropped == 1));
        assert!(connection.drain_incoming().is_empty());
    }

    #[test]
    fn test_every_enqueue_sends_exactly_once() {
        let receiver = std::net::UdpSocket::bind(loopback()).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let connection = Arc::new(ConnectionThread::bind(loopback()).unwrap());

        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let connection = Arc::clone(&connection);
                let destination = receiver.local_addr().unwrap();
                thread::spawn(move || {
                    let mut builder = TransferBuilder::new();
                    for i in 0..5i64 {
                        builder
                            .add(TYPE_KEY, MessageType::UpdateInput)
                            .add("seq", worker * 100 + i)
                            .set_destination(destination);
                        connection.enqueue(builder.encode(true).unwrap());
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let connection = Arc::try_unwrap(connection).ok().unwrap();
        let stats = connection.shutdown();
        assert_eq!(stats.wakes, 20);
        assert_eq!(stats.sent, 20);

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let mut count = 0;
        while receiver.recv_from(&mut buffer).is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
