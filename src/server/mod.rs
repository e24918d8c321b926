//! Multi-instance pipe server.
//!
//! One listener thread accepts clients and hands each a dedicated worker.
//! Workers poll their stream, frame messages on the `\r\n\r\n` delimiter,
//! pass complete frames to the injected handler and write the serialized
//! response back. The server never interprets command text.

pub mod pipe;

use crate::protocol::{
    self, find_delimiter, CommandRequest, CommandResponse, HeartbeatMessage, MAX_MESSAGE_SIZE,
    MESSAGE_DELIMITER,
};
use pipe::{PipeListener, PipeStream, PollRead};
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_INSTANCES: u32 = 10;
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between accept attempts after a pipe-creation failure.
const CREATE_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Pause between polls on an idle connection.
const IDLE_POLL_DELAY: Duration = Duration::from_millis(10);
/// Pause between accept polls when no client is pending.
const ACCEPT_POLL_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("pipe server is already running")]
    AlreadyRunning,
    #[error("pipe creation failed: {0}")]
    CreationFailed(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct PipeServerConfig {
    pub pipe_name: String,
    pub max_instances: u32,
    pub buffer_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// When set, a worker with no traffic for this long sends a heartbeat.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for PipeServerConfig {
    fn default() -> Self {
        PipeServerConfig {
            pipe_name: pipe::default_pipe_name(),
            max_instances: DEFAULT_MAX_INSTANCES,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            heartbeat_interval: None,
        }
    }
}

/// Installed once at server start; maps a parsed request to its response.
pub type MessageHandler = Arc<dyn Fn(CommandRequest) -> CommandResponse + Send + Sync>;

/// Supplies `session_info` for heartbeat messages.
pub type SessionInfoSource = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionStats {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

pub struct ClientConnection {
    id: String,
    active: AtomicBool,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    stats: Mutex<ConnectionStats>,
}

impl ClientConnection {
    fn new(id: String) -> Self {
        let now = Instant::now();
        ClientConnection {
            id,
            active: AtomicBool::new(true),
            connected_at: now,
            last_activity: Mutex::new(now),
            stats: Mutex::new(ConnectionStats::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap()
    }

    pub fn stats(&self) -> ConnectionStats {
        *self.stats.lock().unwrap()
    }

    fn record_read(&self, bytes: usize) {
        let mut stats = self.stats.lock().unwrap();
        stats.messages_received += 1;
        stats.bytes_received += bytes as u64;
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn record_write(&self, bytes: usize) {
        let mut stats = self.stats.lock().unwrap();
        stats.messages_sent += 1;
        stats.bytes_sent += bytes as u64;
        *self.last_activity.lock().unwrap() = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages_processed: u64,
    pub total_errors: u64,
    pub uptime: Duration,
}

struct Shared {
    config: PipeServerConfig,
    running: AtomicBool,
    connections: RwLock<Vec<Arc<ClientConnection>>>,
    stats: Mutex<ServerStats>,
    started_at: Mutex<Option<Instant>>,
    handler: MessageHandler,
    session_info: Option<SessionInfoSource>,
}

impl Shared {
    fn count_error(&self) {
        self.stats.lock().unwrap().total_errors += 1;
    }
}

pub struct PipeServer {
    shared: Arc<Shared>,
    listener_thread: Mutex<Option<JoinHandle<()>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PipeServer {
    pub fn new(
        config: PipeServerConfig,
        handler: MessageHandler,
        session_info: Option<SessionInfoSource>,
    ) -> Self {
        PipeServer {
            shared: Arc::new(Shared {
                config,
                running: AtomicBool::new(false),
                connections: RwLock::new(Vec::new()),
                stats: Mutex::new(ServerStats::default()),
                started_at: Mutex::new(None),
                handler,
                session_info,
            }),
            listener_thread: Mutex::new(None),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn start(&self) -> Result<(), ServerError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = match pipe::bind(&self.shared.config) {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(ServerError::CreationFailed(e));
            }
        };

        *self.shared.started_at.lock().unwrap() = Some(Instant::now());
        log::info!(
            target: "server",
            "pipe server listening on {}",
            self.shared.config.pipe_name
        );

        let shared = Arc::clone(&self.shared);
        let workers = Arc::clone(&self.workers);
        let handle = thread::Builder::new()
            .name("vibedbg-listener".to_string())
            .spawn(move || listener_loop(shared, workers, listener))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                ServerError::CreationFailed(e)
            })?;
        *self.listener_thread.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Stop the server, join the listener and every worker and drop all
    /// connections. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        log::info!(target: "server", "stopping pipe server");
        pipe::wake(&self.shared.config.pipe_name);

        if let Some(listener) = self.listener_thread.lock().unwrap().take() {
            let _ = listener.join();
        }
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }

        let mut connections = self.shared.connections.write().unwrap();
        for connection in connections.iter() {
            connection.mark_inactive();
        }
        connections.clear();
        self.shared.stats.lock().unwrap().active_connections = 0;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn active_connection_ids(&self) -> Vec<String> {
        self.shared
            .connections
            .read()
            .unwrap()
            .iter()
            .filter(|connection| connection.is_active())
            .map(|connection| connection.id().to_string())
            .collect()
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = *self.shared.stats.lock().unwrap();
        if let Some(started_at) = *self.shared.started_at.lock().unwrap() {
            stats.uptime = started_at.elapsed();
        }
        stats
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Timestamp + counter, unique within the process lifetime.
fn generate_connection_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "conn_{}_{}",
        protocol::now_millis(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn listener_loop(
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    mut listener: Box<dyn PipeListener>,
) {
    while shared.running.load(Ordering::SeqCst) {
        let active = shared.stats.lock().unwrap().active_connections;
        if active >= shared.config.max_instances as u64 {
            thread::sleep(CREATE_RETRY_DELAY);
            continue;
        }

        match listener.poll_accept() {
            Ok(Some(stream)) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break; // the shutdown wake-up connection
                }

                let connection = Arc::new(ClientConnection::new(generate_connection_id()));
                log::info!(target: "server", "client connected: {}", connection.id());
                shared
                    .connections
                    .write()
                    .unwrap()
                    .push(Arc::clone(&connection));
                {
                    let mut stats = shared.stats.lock().unwrap();
                    stats.total_connections += 1;
                    stats.active_connections += 1;
                }

                let worker_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("vibedbg-conn-{}", connection.id()))
                    .spawn(move || worker_loop(worker_shared, connection, stream));
                match spawned {
                    Ok(handle) => workers.lock().unwrap().push(handle),
                    Err(e) => {
                        log::error!(target: "server", "worker spawn failed: {e}");
                        shared.count_error();
                    }
                }
            }
            Ok(None) => thread::sleep(ACCEPT_POLL_DELAY),
            Err(e) => {
                log::warn!(target: "server", "accept failed: {e}");
                shared.count_error();
                thread::sleep(CREATE_RETRY_DELAY);
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>, connection: Arc<ClientConnection>, mut stream: Box<dyn PipeStream>) {
    let mut buffer: Vec<u8> = Vec::with_capacity(shared.config.buffer_size);
    let mut chunk = vec![0u8; shared.config.buffer_size];
    // Set after an over-limit frame: drop bytes until the next delimiter.
    let mut discarding = false;
    let mut last_activity = Instant::now();

    while shared.running.load(Ordering::SeqCst) && connection.is_active() {
        match stream.poll_read(&mut chunk) {
            Ok(PollRead::Data(n)) => {
                connection.record_read(n);
                last_activity = Instant::now();
                buffer.extend_from_slice(&chunk[..n]);
                if drain_frames(&shared, &connection, stream.as_mut(), &mut buffer, &mut discarding)
                    .is_err()
                {
                    break;
                }
            }
            Ok(PollRead::WouldBlock) => {
                if let Some(interval) = shared.config.heartbeat_interval {
                    if last_activity.elapsed() >= interval {
                        if send_heartbeat(&shared, &connection, stream.as_mut()).is_err() {
                            break;
                        }
                        last_activity = Instant::now();
                    }
                }
                thread::sleep(IDLE_POLL_DELAY);
            }
            Ok(PollRead::Disconnected) => {
                log::info!(target: "server", "client disconnected: {}", connection.id());
                break;
            }
            Err(e) => {
                // Transient read failure, the connection may still recover.
                log::warn!(target: "server", "read failed on {}: {e}", connection.id());
                shared.count_error();
                thread::sleep(IDLE_POLL_DELAY);
            }
        }
    }

    detach_connection(&shared, &connection);
}

/// Dispatch every complete frame in `buffer`, retaining the unfinished tail.
fn drain_frames(
    shared: &Shared,
    connection: &ClientConnection,
    stream: &mut dyn PipeStream,
    buffer: &mut Vec<u8>,
    discarding: &mut bool,
) -> Result<(), ()> {
    loop {
        if *discarding {
            match find_delimiter(buffer) {
                Some(pos) => {
                    buffer.drain(..pos + MESSAGE_DELIMITER.len());
                    *discarding = false;
                }
                None => {
                    buffer.clear();
                    return Ok(());
                }
            }
        }

        let Some(pos) = find_delimiter(buffer) else {
            if buffer.len() > MAX_MESSAGE_SIZE {
                log::warn!(
                    target: "server",
                    "{}: buffered {} bytes without a delimiter, discarding",
                    connection.id(),
                    buffer.len()
                );
                shared.count_error();
                buffer.clear();
                *discarding = true;
                respond(
                    shared,
                    connection,
                    stream,
                    CommandResponse::fail("unknown", "Failed to parse command"),
                )?;
            }
            return Ok(());
        };

        let frame_len = pos + MESSAGE_DELIMITER.len();
        let frame: Vec<u8> = buffer.drain(..frame_len).collect();
        handle_frame(shared, connection, stream, &frame)?;
    }
}

/// Parse one framed message, run the handler, write the response.
/// `Err` means the connection is gone.
fn handle_frame(
    shared: &Shared,
    connection: &ClientConnection,
    stream: &mut dyn PipeStream,
    frame: &[u8],
) -> Result<(), ()> {
    if !protocol::validate_message_size(frame.len()) {
        log::warn!(
            target: "server",
            "{}: rejecting {}-byte message",
            connection.id(),
            frame.len()
        );
        shared.count_error();
        return respond(
            shared,
            connection,
            stream,
            CommandResponse::fail("unknown", "Failed to parse command"),
        );
    }

    let response = match protocol::parse_command(frame) {
        Ok(request) => {
            log::debug!(
                target: "server",
                "{}: request {} `{}`",
                connection.id(),
                request.request_id,
                request.command
            );
            (shared.handler)(request)
        }
        Err(e) => {
            log::warn!(target: "server", "{}: unparsable message: {e}", connection.id());
            shared.count_error();
            CommandResponse::fail("unknown", "Failed to parse command")
        }
    };

    respond(shared, connection, stream, response)
}

fn respond(
    shared: &Shared,
    connection: &ClientConnection,
    stream: &mut dyn PipeStream,
    response: CommandResponse,
) -> Result<(), ()> {
    let bytes = match protocol::serialize_response(&response) {
        Ok(bytes) => bytes,
        Err(e) => {
            // Response built by us failed to serialize; last-resort raw error.
            log::error!(target: "server", "response serialization failed: {e}");
            shared.count_error();
            let mut raw = br#"{"protocol_version":1,"message_type":3,"payload":{"type":"error","error_message":"Failed to serialize response"}}"#.to_vec();
            raw.extend_from_slice(MESSAGE_DELIMITER);
            raw
        }
    };

    if let Err(e) = stream.write_all(&bytes).and_then(|_| stream.flush()) {
        log::info!(target: "server", "{}: write failed: {e}", connection.id());
        connection.mark_inactive();
        return Err(());
    }

    connection.record_write(bytes.len());
    shared.stats.lock().unwrap().total_messages_processed += 1;
    Ok(())
}

fn send_heartbeat(
    shared: &Shared,
    connection: &ClientConnection,
    stream: &mut dyn PipeStream,
) -> Result<(), ()> {
    let session_info = shared
        .session_info
        .as_ref()
        .map(|source| source())
        .unwrap_or(Value::Null);
    let heartbeat = HeartbeatMessage::new(session_info);

    let Ok(bytes) = protocol::serialize_heartbeat(&heartbeat) else {
        shared.count_error();
        return Ok(());
    };
    if stream.write_all(&bytes).and_then(|_| stream.flush()).is_err() {
        connection.mark_inactive();
        return Err(());
    }
    connection.record_write(bytes.len());
    Ok(())
}

fn detach_connection(shared: &Shared, connection: &Arc<ClientConnection>) {
    connection.mark_inactive();
    let mut connections = shared.connections.write().unwrap();
    let before = connections.len();
    connections.retain(|candidate| !Arc::ptr_eq(candidate, connection));
    if connections.len() != before {
        let mut stats = shared.stats.lock().unwrap();
        stats.active_connections = stats.active_connections.saturating_sub(1);
    }
}
