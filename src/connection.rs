//! Shared connection to a doozerd cluster.
//!
//! One TCP socket multiplexes every caller's requests. Each request gets a
//! tag from the [`PendingTable`], goes out through the socket's writer task
//! and is resolved by the receive loop when the response with the same tag
//! comes back.
//!
//! # Lifecycle
//!
//! ```text
//! disconnected ──reconnect──► connecting ──first address that answers──► ready
//!      ▲                          │                                        │
//!      │                   every round failed                      I/O or framing fault
//!      │                          ▼                                        │
//!      └────────────────── Connect error ◄──────────── reconnect ◄─────────┘
//! ```
//!
//! Every adopted socket gets a new generation number. A reconnect requested
//! because of a fault seen on generation `G` is skipped when a newer
//! generation is already live, so a burst of failing senders rebuilds the
//! socket once. Requests still pending when a socket is adopted are written
//! to it again.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::codec::ProtoCodec;
use crate::config::{ClientConfig, DEFAULT_RETRY_WAIT};
use crate::error::{classify, DoozerError, Result};
use crate::pending::{PendingGuard, PendingTable, Registration};
use crate::protocol::{FrameBuffer, Request, Response, FRAME_HEADER_SIZE};
use crate::transport;
use crate::writer::{spawn_writer_task, WriterHandle};

/// Size of each socket read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A multiplexed, self-healing connection to one node of a cluster.
///
/// Dropping the connection aborts its background tasks; it never reconnects
/// afterwards.
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    config: ClientConfig,
    /// Normalized and shuffled once.
    addrs: Vec<String>,
    /// Next address to try.
    cursor: AtomicUsize,
    pending: PendingTable,
    link: Mutex<Link>,
    ready: watch::Sender<bool>,
    /// Serializes reconnects.
    reconnecting: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// The live socket, if any.
#[derive(Default)]
struct Link {
    generation: u64,
    address: Option<String>,
    writer: Option<WriterHandle>,
    writer_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<()>>,
}

/// A write that did not make it onto the socket.
struct WriteFailure {
    /// Generation the write was attempted on.
    generation: u64,
    error: DoozerError,
}

impl Connection {
    /// Create an unconnected connection. Addresses are normalized and shuffled.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut addrs: Vec<String> = config.addrs.iter().map(|a| transport::normalize_addr(a)).collect();
        transport::shuffle_addrs(&mut addrs);

        let (ready, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                addrs,
                cursor: AtomicUsize::new(0),
                pending: PendingTable::new(),
                link: Mutex::new(Link::default()),
                ready,
                reconnecting: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect to the first reachable address.
    pub async fn connect(&self) -> Result<()> {
        self.reconnect().await
    }

    /// Drop the current socket (if any) and connect again.
    ///
    /// Tries every address once per round, sleeping between rounds with a
    /// doubling backoff. Fails with [`DoozerError::Connect`] when every round
    /// fails.
    pub async fn reconnect(&self) -> Result<()> {
        reconnect_after(&self.shared, None, true).await
    }

    /// Close the socket and stop the receive loop. Idempotent.
    ///
    /// Pending requests stay registered and are retransmitted by the next
    /// successful connect.
    pub async fn disconnect(&self) {
        let _serial = self.shared.reconnecting.lock().await;
        self.shared.teardown(true);
    }

    /// Send a request and wait for its response.
    ///
    /// If the write fails the connection is rebuilt; with `retry` the request
    /// is written once more, otherwise the write error is returned.
    pub async fn send(&self, request: Request, retry: bool) -> Result<Response> {
        send_request(&self.shared, request, retry).await
    }

    /// Address of the live socket.
    pub fn address(&self) -> Option<String> {
        self.shared.link().address.clone()
    }

    /// Every address this connection may use, in the order they are tried.
    pub fn addrs(&self) -> &[String] {
        &self.shared.addrs
    }

    /// Check if a socket is live and accepting writes.
    pub fn is_ready(&self) -> bool {
        *self.shared.ready.borrow()
    }

    /// Generation of the most recently adopted socket (0 before the first).
    pub fn generation(&self) -> u64 {
        self.shared.link().generation
    }

    /// Number of tags in use, including requests whose caller gave up before
    /// the server answered.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Configuration this connection was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.teardown(true);
    }
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Forget the live socket. The receive loop is left running when it is
    /// the caller.
    fn teardown(&self, kill_loop: bool) {
        let (writer_task, recv_task) = {
            let mut link = self.link();
            if let Some(address) = link.address.take() {
                debug!(addr = %address, generation = link.generation, "Closing connection");
            }
            link.writer = None;
            (link.writer_task.take(), link.recv_task.take())
        };

        self.ready.send_replace(false);

        if let Some(task) = writer_task {
            task.abort();
        }
        if kill_loop {
            if let Some(task) = recv_task {
                task.abort();
            }
        }
    }

    /// Wait for the readiness gate, bounded by the ready timeout.
    async fn wait_ready(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DoozerError::Closed);
        }

        let timeout = self.config.ready_timeout();
        let mut ready = self.ready.subscribe();
        let outcome = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|changed| changed.map(|_| ()));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DoozerError::Closed),
            Err(_) => Err(DoozerError::NotReady(timeout)),
        }
    }
}

/// Rebuild the socket unless a generation newer than `observed` is live.
async fn reconnect_after(shared: &Arc<Shared>, observed: Option<u64>, kill_loop: bool) -> Result<()> {
    let _serial = shared.reconnecting.lock().await;

    if shared.is_closed() {
        return Err(DoozerError::Closed);
    }
    if let Some(observed) = observed {
        let link = shared.link();
        let live = link.writer.as_ref().is_some_and(|writer| !writer.is_closed());
        if link.generation > observed && live {
            debug!(observed, generation = link.generation, "Newer connection already live");
            return Ok(());
        }
    }

    debug!("Reconnecting");
    shared.teardown(kill_loop);

    let connect_timeout = shared.config.connect_timeout().unwrap_or(DEFAULT_RETRY_WAIT);
    let mut backoff = shared.config.initial_backoff();

    for round in 1..=shared.config.connect_rounds {
        for _ in 0..shared.addrs.len() {
            if shared.is_closed() {
                return Err(DoozerError::Closed);
            }

            let index = shared.cursor.fetch_add(1, Ordering::Relaxed) % shared.addrs.len();
            let addr = &shared.addrs[index];
            debug!(addr = %addr, round, "Connecting");

            match transport::connect(addr, connect_timeout).await {
                Ok(_) if shared.is_closed() => return Err(DoozerError::Closed),
                Ok(stream) => {
                    adopt(shared, addr, stream).await;
                    return Ok(());
                }
                Err(e) => info!(addr = %addr, error = %e, "Failed to connect"),
            }
        }

        debug!(?backoff, round, "Waiting to reconnect");
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }

    error!("Could not connect to any of the configured addresses");
    Err(DoozerError::Connect {
        addrs: shared.addrs.clone(),
    })
}

/// Make `stream` the live socket: open the gate, start its receive loop and
/// resend pending requests.
async fn adopt(shared: &Arc<Shared>, addr: &str, stream: TcpStream) {
    let (reader, write_half) = stream.into_split();
    let (writer, writer_task) = spawn_writer_task(write_half, shared.config.channel_capacity);

    let generation = {
        let mut link = shared.link();
        link.generation += 1;
        link.address = Some(addr.to_string());
        link.writer = Some(writer.clone());
        link.writer_task = Some(writer_task);
        link.generation
    };
    info!(addr = %addr, generation, "Connected");
    shared.ready.send_replace(true);

    // The receive loop must be running before the backlog is written.
    let recv_task = spawn_recv_loop(shared.clone(), reader, generation);
    shared.link().recv_task = Some(recv_task);

    let packets = shared.pending.claim_for_retransmit(generation);
    for (tag, packet) in packets {
        debug!(tag, generation, "Retransmitting request");
        if let Err(e) = writer.send(packet).await {
            // The caller will time out.
            warn!(tag, error = %e, "Failed to retransmit request");
        }
    }
}

fn spawn_recv_loop<R>(shared: Arc<Shared>, reader: R, generation: u64) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(recv_loop(shared, reader, generation))
}

async fn recv_loop<R>(shared: Arc<Shared>, reader: R, generation: u64)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    debug!(generation, "Receive loop started");

    match read_responses(&shared.pending, reader).await {
        Ok(()) => warn!(generation, "Connection closed by server"),
        Err(e) => warn!(generation, error = %e, "Lost connection"),
    }

    if shared.is_closed() {
        return;
    }
    // The reconnect spawns the next loop.
    if let Err(e) = reconnect_after(&shared, Some(generation), false).await {
        error!(generation, error = %e, "Reconnect from receive loop failed");
    }
}

/// Read frames until EOF or a fault, resolving each response.
async fn read_responses<R: AsyncRead + Unpin>(pending: &PendingTable, mut reader: R) -> Result<()> {
    let mut frame_buffer = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(DoozerError::Io(e)),
        };

        for body in frame_buffer.push(&buf[..n])? {
            let response: Response = ProtoCodec::decode(&body)?;
            let tag = response.tag();
            trace!(tag, len = body.len(), "Received response");
            if !pending.resolve(response) {
                debug!(tag, "Discarding response with no waiting request");
            }
        }
    }
}

/// Wait for the gate, claim the entry for the live generation and write it.
///
/// A request already written on the live generation by a retransmit is not
/// written again.
async fn transmit(shared: &Shared, tag: i32, packet: Bytes) -> std::result::Result<(), WriteFailure> {
    let observed = shared.link().generation;
    if let Err(error) = shared.wait_ready().await {
        return Err(WriteFailure {
            generation: observed,
            error,
        });
    }

    let (generation, writer) = {
        let link = shared.link();
        (link.generation, link.writer.clone())
    };
    let Some(writer) = writer else {
        return Err(WriteFailure {
            generation,
            error: DoozerError::ConnectionClosed,
        });
    };

    if !shared.pending.claim(tag, generation) {
        trace!(tag, generation, "Request already written on this connection");
        return Ok(());
    }
    writer
        .send(packet)
        .await
        .map_err(|error| WriteFailure { generation, error })
}

async fn send_request(shared: &Arc<Shared>, mut request: Request, retry: bool) -> Result<Response> {
    if shared.is_closed() {
        return Err(DoozerError::Closed);
    }

    let Registration { tag, packet, response } = shared.pending.register(&mut request)?;
    let guard = PendingGuard::new(&shared.pending, tag);
    debug!(tag, verb = ?request.verb(), len = packet.len() - FRAME_HEADER_SIZE, "Sending request");

    if let Err(failure) = transmit(shared, tag, packet.clone()).await {
        warn!(tag, error = %failure.error, "Error sending request");
        if !retry {
            // Released first, so the reconnect won't resend it.
            drop(guard);
            reconnect_after(shared, Some(failure.generation), true).await?;
            return Err(failure.error);
        }
        reconnect_after(shared, Some(failure.generation), true).await?;
        debug!(tag, "Retrying request");
        transmit(shared, tag, packet).await.map_err(|failure| failure.error)?;
    }

    let timeout = shared.config.request_timeout();
    let response = match tokio::time::timeout(timeout, response).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => return Err(DoozerError::ConnectionClosed),
        Err(_) => {
            debug!(tag, ?timeout, "Request timed out");
            return Err(DoozerError::Timeout { tag, timeout });
        }
    };
    drop(guard);

    classify(request, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, Verb};
    use tokio::io::duplex;

    fn response_frame(tag: i32, rev: i64) -> Bytes {
        let response = Response {
            tag: Some(tag),
            rev: Some(rev),
            ..Default::default()
        };
        build_frame(&ProtoCodec::encode(&response))
    }

    #[tokio::test]
    async fn test_read_responses_resolves_out_of_order() {
        let pending = PendingTable::new();
        let first = pending.register(&mut Request::new(Verb::Rev)).unwrap();
        let second = pending.register(&mut Request::new(Verb::Rev)).unwrap();

        let (mut server, client) = duplex(4096);
        let reader = tokio::spawn(async move { read_responses(&pending, client).await });

        use tokio::io::AsyncWriteExt;
        let mut bytes = response_frame(second.tag, 20).to_vec();
        bytes.extend_from_slice(&response_frame(99, 0));
        bytes.extend_from_slice(&response_frame(first.tag, 10));
        // Split mid-frame.
        server.write_all(&bytes[..5]).await.unwrap();
        server.write_all(&bytes[5..]).await.unwrap();

        assert_eq!(second.response.await.unwrap().rev(), 20);
        assert_eq!(first.response.await.unwrap().rev(), 10);

        drop(server);
        assert!(reader.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_responses_rejects_oversized_frame() {
        let pending = PendingTable::new();
        let (mut server, client) = duplex(64);

        use tokio::io::AsyncWriteExt;
        server.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let err = read_responses(&pending, client).await.unwrap_err();
        assert!(matches!(err, DoozerError::Framing(_)));
    }

    #[tokio::test]
    async fn test_read_responses_rejects_garbage_body() {
        let pending = PendingTable::new();
        let (mut server, client) = duplex(64);

        use tokio::io::AsyncWriteExt;
        server.write_all(&build_frame(&[0xff, 0xff, 0xff])).await.unwrap();

        let err = read_responses(&pending, client).await.unwrap_err();
        assert!(matches!(err, DoozerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_send_without_reachable_node_fails() {
        let config = ClientConfig {
            ready_timeout_ms: 10,
            connect_timeout_ms: Some(10),
            connect_rounds: 1,
            ..ClientConfig::new(["127.0.0.1:1"])
        };
        let connection = Connection::new(config).unwrap();

        let err = connection.send(Request::new(Verb::Rev), false).await.unwrap_err();
        // The reconnect after the failed write cannot reach port 1 either.
        assert!(matches!(err, DoozerError::Connect { .. }), "{:?}", err);
        assert_eq!(connection.pending_count(), 0);
        assert!(!connection.is_ready());
    }

    #[test]
    fn test_new_normalizes_addresses() {
        let connection = Connection::new(ClientConfig::new(["10.0.0.1", "10.0.0.2:9000"])).unwrap();
        let mut addrs = connection.addrs().to_vec();
        addrs.sort();
        assert_eq!(addrs, vec!["10.0.0.1:8046", "10.0.0.2:9000"]);
        assert_eq!(connection.address(), None);
        assert_eq!(connection.generation(), 0);
    }

    #[test]
    fn test_new_rejects_empty_config() {
        assert!(Connection::new(ClientConfig::new(Vec::<String>::new())).is_err());
    }
}
