//! In-process fake doozerd for integration tests.
//!
//! Speaks the real wire format over TCP and keeps a small in-memory tree:
//! revision-checked SET/DEL, GET, REV, STAT, GETDIR, WALK (`/prefix/**`
//! globs), parked WAITs and NOP/ACCESS. A few switches make it misbehave:
//!
//! - a request whose tag is still outstanding on its connection is answered
//!   with TAG_IN_USE, as doozerd does
//! - paths under `/mute` are never answered
//! - paths under `/slow` are answered after [`SLOW_DELAY`]
//! - GET of `/err/<n>` answers with error code `n`
//! - [`Behavior::drop_first_request`] closes the first connection right after
//!   reading a request, without answering it
//! - [`Behavior::stray_responses`] precedes every answer with a response for
//!   [`STRAY_TAG`], which no client request uses

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use doozer_client::codec::ProtoCodec;
use doozer_client::protocol::{build_frame, flags, ErrorCode, Request, Response, Verb};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

pub const SLOW_DELAY: Duration = Duration::from_millis(100);
pub const STRAY_TAG: i32 = 1 << 30;

/// Install a test subscriber once. `RUST_LOG=doozer_client=debug` shows the
/// client's logs for a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An address nothing listens on.
pub async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub drop_first_request: bool,
    pub stray_responses: bool,
}

pub struct FakeServer {
    addr: String,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

struct ServerState {
    behavior: Behavior,
    drop_next: AtomicBool,
    connections: AtomicUsize,
    store: Mutex<Store>,
    requests: Mutex<Vec<Request>>,
}

#[derive(Default)]
struct Store {
    rev: i64,
    files: BTreeMap<String, File>,
    changes: Vec<Response>,
    waiters: Vec<Waiter>,
}

struct File {
    value: Vec<u8>,
    rev: i64,
}

struct Waiter {
    conn: usize,
    tag: i32,
    glob: String,
    rev: i64,
    tx: mpsc::UnboundedSender<Response>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    pub async fn start_with(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(ServerState {
            drop_next: AtomicBool::new(behavior.drop_first_request),
            behavior,
            connections: AtomicUsize::new(0),
            store: Mutex::new(Store::default()),
            requests: Mutex::new(Vec::new()),
        });
        let task = tokio::spawn(accept_loop(listener, state.clone()));
        Self { addr, state, task }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Every request read so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Stop listening and close every connection.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    // Dropped on abort, which closes every connection.
    let mut conns = JoinSet::new();
    while let Ok((stream, _)) = listener.accept().await {
        let conn = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
        conns.spawn(serve(stream, conn, state.clone()));
    }
}

async fn serve(stream: TcpStream, conn: usize, state: Arc<ServerState>) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();
    // Tags the server still owes a response on.
    let outstanding = Arc::new(Mutex::new(HashSet::new()));

    let answered = outstanding.clone();
    let write_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            // A TAG_IN_USE answer leaves the original request outstanding.
            if response.err_code != Some(ErrorCode::TagInUse as i32) {
                answered.lock().unwrap().remove(&response.tag());
            }
            let frame = build_frame(&ProtoCodec::encode(&response));
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let mut head = [0u8; 4];
        if reader.read_exact(&mut head).await.is_err() {
            break;
        }
        let mut body = vec![0u8; u32::from_be_bytes(head) as usize];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        let Ok(request) = ProtoCodec::decode::<Request>(&body) else {
            break;
        };
        state.requests.lock().unwrap().push(request.clone());

        if state.drop_next.swap(false, Ordering::SeqCst) {
            break;
        }
        if state.behavior.stray_responses {
            let _ = tx.send(Response {
                tag: Some(STRAY_TAG),
                rev: Some(-1),
                ..Default::default()
            });
        }

        if !outstanding.lock().unwrap().insert(request.tag()) {
            let _ = tx.send(Response {
                tag: Some(request.tag()),
                err_code: Some(ErrorCode::TagInUse as i32),
                ..Default::default()
            });
            continue;
        }

        let path = request.path().to_string();
        if path.starts_with("/mute") {
            continue;
        }
        let Some(response) = state.handle(conn, &request, &tx) else {
            continue;
        };
        if path.starts_with("/slow") {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SLOW_DELAY).await;
                let _ = tx.send(response);
            });
        } else {
            let _ = tx.send(response);
        }
    }

    write_task.abort();
    state.store.lock().unwrap().waiters.retain(|w| w.conn != conn);
}

impl ServerState {
    /// Answer a request, or park it (WAIT) and return `None`.
    fn handle(&self, conn: usize, request: &Request, tx: &mpsc::UnboundedSender<Response>) -> Option<Response> {
        let mut store = self.store.lock().unwrap();
        let tag = request.tag();
        let path = request.path();

        let mut response = Response {
            tag: Some(tag),
            ..Default::default()
        };
        let fail = |mut response: Response, code: ErrorCode| {
            response.err_code = Some(code as i32);
            Some(response)
        };

        match Verb::try_from(request.verb.unwrap_or_default()) {
            Ok(Verb::Rev) => response.rev = Some(store.rev),
            Ok(Verb::Get) => {
                if let Some(code) = path.strip_prefix("/err/") {
                    response.err_code = code.parse().ok();
                    return Some(response);
                }
                match store.files.get(path) {
                    Some(file) => {
                        response.value = Some(file.value.clone());
                        response.rev = Some(file.rev);
                    }
                    None => response.rev = Some(0),
                }
            }
            Ok(Verb::Set) => {
                let current = store.files.get(path).map_or(0, |f| f.rev);
                if request.rev() != -1 && request.rev() != current {
                    return fail(response, ErrorCode::RevMismatch);
                }
                store.rev += 1;
                let rev = store.rev;
                store.files.insert(
                    path.to_string(),
                    File {
                        value: request.value().to_vec(),
                        rev,
                    },
                );
                store.notify(Response {
                    path: Some(path.to_string()),
                    value: Some(request.value().to_vec()),
                    rev: Some(rev),
                    flags: Some(flags::SET),
                    ..Default::default()
                });
                response.rev = Some(rev);
            }
            Ok(Verb::Del) => {
                let Some(current) = store.files.get(path).map(|f| f.rev) else {
                    return fail(response, ErrorCode::NoEnt);
                };
                if request.rev() != -1 && request.rev() != current {
                    return fail(response, ErrorCode::RevMismatch);
                }
                store.files.remove(path);
                store.rev += 1;
                let rev = store.rev;
                store.notify(Response {
                    path: Some(path.to_string()),
                    rev: Some(rev),
                    flags: Some(flags::DEL),
                    ..Default::default()
                });
                response.rev = Some(rev);
            }
            Ok(Verb::Wait) => {
                let seen = store
                    .changes
                    .iter()
                    .find(|c| c.rev() >= request.rev() && glob_match(path, c.path()))
                    .cloned();
                match seen {
                    Some(mut change) => {
                        change.tag = Some(tag);
                        return Some(change);
                    }
                    None => {
                        store.waiters.push(Waiter {
                            conn,
                            tag,
                            glob: path.to_string(),
                            rev: request.rev(),
                            tx: tx.clone(),
                        });
                        return None;
                    }
                }
            }
            Ok(Verb::Stat) => {
                let (len, rev) = store
                    .files
                    .get(path)
                    .map_or((0, 0), |f| (f.value.len() as i32, f.rev));
                response.len = Some(len);
                response.rev = Some(rev);
            }
            Ok(Verb::Getdir) => {
                let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
                let names: BTreeSet<&str> = store
                    .files
                    .keys()
                    .filter_map(|key| key.strip_prefix(prefix.as_str()))
                    .filter_map(|rest| rest.split('/').next())
                    .collect();
                match names.iter().nth(request.offset() as usize) {
                    Some(name) => {
                        response.path = Some(name.to_string());
                        response.rev = Some(store.rev);
                    }
                    None => return fail(response, ErrorCode::Range),
                }
            }
            Ok(Verb::Walk) => {
                let entry = store
                    .files
                    .iter()
                    .filter(|(key, _)| glob_match(path, key))
                    .nth(request.offset() as usize);
                match entry {
                    Some((key, file)) => {
                        response.path = Some(key.clone());
                        response.value = Some(file.value.clone());
                        response.rev = Some(file.rev);
                    }
                    None => return fail(response, ErrorCode::Range),
                }
            }
            Ok(Verb::Nop) | Ok(Verb::Access) => {}
            _ => return fail(response, ErrorCode::UnknownVerb),
        }

        Some(response)
    }
}

impl Store {
    fn notify(&mut self, change: Response) {
        self.changes.push(change.clone());
        let (ready, parked): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.rev <= change.rev() && glob_match(&w.glob, change.path()));
        self.waiters = parked;
        for waiter in ready {
            let mut response = change.clone();
            response.tag = Some(waiter.tag);
            let _ = waiter.tx.send(response);
        }
    }
}

/// Exact paths and `/prefix/**`.
fn glob_match(glob: &str, path: &str) -> bool {
    match glob.strip_suffix("/**") {
        Some(prefix) => path.starts_with(prefix) && path[prefix.len()..].starts_with('/'),
        None => glob == path,
    }
}
