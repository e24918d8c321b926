//! Shared fixtures: a scriptable debugger adapter and a small pipe client.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vibedbg::debugger::{AdapterError, CommandOutcome, DebuggerAdapter, OutputSink};
use vibedbg::protocol::{
    self, CommandRequest, CommandResponse, MESSAGE_DELIMITER,
};
use vibedbg::server::PipeServerConfig;

/// Adapter double: records every executed command and prints a canned line
/// through the installed output sink.
pub struct MockAdapter {
    pub calls: Mutex<Vec<String>>,
    sink: Mutex<Option<Arc<dyn OutputSink>>>,
    pub delay: Option<Duration>,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(MockAdapter {
            calls: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            delay: None,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl DebuggerAdapter for MockAdapter {
    fn execute_text_command(
        &self,
        text: &str,
        _timeout: Duration,
    ) -> Result<CommandOutcome, AdapterError> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.write(&format!("output of {text}"));
        }
        Ok(CommandOutcome::ok(""))
    }

    fn read_memory(&self, _: u64, _: usize) -> Result<Vec<u8>, AdapterError> {
        Ok(Vec::new())
    }

    fn resolve_symbol(&self, name: &str) -> Result<u64, AdapterError> {
        Err(AdapterError::SymbolNotFound(name.to_string()))
    }

    fn symbol_at(&self, address: u64) -> Result<(String, u64), AdapterError> {
        Err(AdapterError::NoSymbolAtAddress(address))
    }

    fn current_pid(&self) -> Result<u32, AdapterError> {
        Ok(1234)
    }

    fn current_tid(&self) -> Result<u32, AdapterError> {
        Ok(1)
    }

    fn current_process_name(&self) -> Result<String, AdapterError> {
        Ok("target.exe".to_string())
    }

    fn swap_output_sink(&self, sink: Option<Arc<dyn OutputSink>>) -> Option<Arc<dyn OutputSink>> {
        std::mem::replace(&mut self.sink.lock().unwrap(), sink)
    }
}

/// Config pointing at a unique throwaway endpoint.
pub fn test_config() -> PipeServerConfig {
    PipeServerConfig {
        pipe_name: std::env::temp_dir()
            .join(format!("vibedbg_test_{}.sock", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned(),
        ..Default::default()
    }
}

/// Minimal pipe client speaking the framed JSON protocol.
#[cfg(unix)]
pub struct PipeClient {
    stream: std::os::unix::net::UnixStream,
    buffer: Vec<u8>,
}

#[cfg(unix)]
impl PipeClient {
    /// Connect, retrying briefly while the listener comes up.
    pub fn connect(pipe_name: &str) -> Self {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match std::os::unix::net::UnixStream::connect(pipe_name) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(Duration::from_secs(10)))
                        .expect("set read timeout");
                    return PipeClient {
                        stream,
                        buffer: Vec::new(),
                    };
                }
                Err(e) if Instant::now() < deadline => {
                    let _ = e;
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => panic!("connect to {pipe_name}: {e}"),
            }
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write");
        self.stream.flush().expect("flush");
    }

    pub fn send_command(&mut self, request_id: &str, command: &str) {
        let mut request = CommandRequest::new(command);
        request.request_id = request_id.to_string();
        let bytes = protocol::serialize_command(&request).expect("serialize");
        self.send_raw(&bytes);
    }

    /// Next framed response, blocking up to the stream read timeout.
    pub fn read_response(&mut self) -> CommandResponse {
        let frame = self.read_frame();
        protocol::parse_response(&frame).expect("parse response")
    }

    /// `None` when no complete frame shows up within `window`.
    pub fn try_read_frame(&mut self, window: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + window;
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(pos) = protocol::find_delimiter(&self.buffer) {
                let frame_len = pos + MESSAGE_DELIMITER.len();
                let frame: Vec<u8> = self.buffer.drain(..frame_len).collect();
                return Some(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.stream
                .set_read_timeout(Some(remaining))
                .expect("set read timeout");

            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => panic!("read: {e}"),
            }
        }
    }

    fn read_frame(&mut self) -> Vec<u8> {
        self.try_read_frame(Duration::from_secs(10))
            .expect("response frame")
    }
}
