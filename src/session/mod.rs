//! Thread-safe snapshot of the debugging session.
//!
//! The store is created empty at extension start and filled lazily on the
//! first read: querying the current process and thread during extension
//! init would re-enter the debugger interfaces mid-setup. Sub-queries are
//! allowed to fail (no target yet); the corresponding fields simply stay
//! empty and the store still counts as initialized.

use crate::debugger::DebuggerAdapter;
use crate::weak_error;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Common user-mode primitives offered to clients as a starting point.
pub const SUGGESTED_COMMANDS: &[&str] = &[
    "k",    // Stack trace
    "r",    // Registers
    "u",    // Unassemble
    "d",    // Display memory
    "~",    // List threads
    "lm",   // List modules
    "!peb", // Process environment block
    "dt",   // Display type
    "bp",   // Set breakpoint
    "g",    // Go/continue
    "p",    // Step over
    "t",    // Step into
];

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub process_id: u32,
    pub process_name: String,
    pub image_path: String,
    pub is_attached: bool,
    pub attach_time: SystemTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadInfo {
    pub thread_id: u32,
    pub process_id: u32,
    pub is_current: bool,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub is_connected: bool,
    pub is_target_running: bool,
    pub session_start: SystemTime,
    pub current_process: Option<ProcessInfo>,
    pub current_thread: Option<ThreadInfo>,
    pub metadata: Value,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            is_connected: false,
            is_target_running: false,
            session_start: SystemTime::now(),
            current_process: None,
            current_thread: None,
            metadata: Value::Null,
        }
    }
}

/// Multi-reader single-writer store over [`SessionState`].
pub struct SessionStore {
    adapter: Arc<dyn DebuggerAdapter>,
    state: RwLock<SessionState>,
    initialized: AtomicBool,
}

impl SessionStore {
    /// Construction only; the debugger is not queried until the first read.
    pub fn new(adapter: Arc<dyn DebuggerAdapter>) -> Self {
        SessionStore {
            adapter,
            state: RwLock::new(SessionState::default()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Current state, triggering lazy initialization if needed.
    pub fn snapshot(&self) -> SessionState {
        self.ensure_initialized();
        self.state.read().unwrap().clone()
    }

    /// Replace the whole state. The store counts as initialized afterwards.
    pub fn update(&self, new_state: SessionState) {
        *self.state.write().unwrap() = new_state;
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn switch_to_thread(&self, thread_id: u32) {
        let mut state = self.state.write().unwrap();
        match &mut state.current_thread {
            Some(thread) => {
                thread.thread_id = thread_id;
                thread.is_current = true;
            }
            None => {
                state.current_thread = Some(ThreadInfo {
                    thread_id,
                    process_id: state
                        .current_process
                        .as_ref()
                        .map(|p| p.process_id)
                        .unwrap_or(0),
                    is_current: true,
                    state: "Running".to_string(),
                });
            }
        }
    }

    pub fn suggested_commands(&self) -> &'static [&'static str] {
        SUGGESTED_COMMANDS
    }

    /// Machine-readable snapshot, carried in `session_data` and heartbeats.
    pub fn session_json(&self) -> Value {
        let state = self.snapshot();
        let mut session = json!({
            "connected": state.is_connected,
            "target_running": state.is_target_running,
            "session_start": state
                .session_start
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        });

        if let Some(process) = &state.current_process {
            session["current_process"] = json!({
                "process_id": process.process_id,
                "process_name": process.process_name,
                "image_path": process.image_path,
                "is_attached": process.is_attached,
            });
        }
        if let Some(thread) = &state.current_thread {
            session["current_thread"] = json!({
                "thread_id": thread.thread_id,
                "process_id": thread.process_id,
                "is_current": thread.is_current,
                "state": thread.state,
            });
        }

        session
    }

    /// Human-readable status block for the host `status` command.
    pub fn format_status(&self) -> String {
        let state = self.snapshot();
        let mut status = String::from("VibeDbg Status:\n");
        let _ = writeln!(
            status,
            "  Connected: {}",
            if state.is_connected { "Yes" } else { "No" }
        );
        let _ = writeln!(
            status,
            "  Target Running: {}",
            if state.is_target_running { "Yes" } else { "No" }
        );
        if let Some(process) = &state.current_process {
            let _ = writeln!(
                status,
                "  Current Process: {} (PID: {})",
                process.process_name, process.process_id
            );
        }
        if let Some(thread) = &state.current_thread {
            let _ = writeln!(
                status,
                "  Current Thread: {} (TID: {})",
                thread.state, thread.thread_id
            );
        }
        status
    }

    fn ensure_initialized(&self) {
        if self.initialized.load(Ordering::SeqCst) {
            return;
        }

        let mut state = self.state.write().unwrap();
        if self.initialized.load(Ordering::SeqCst) {
            return; // lost the init race
        }

        log::info!(target: "session", "initializing session state");
        state.is_connected = true;

        let pid = weak_error!(self.adapter.current_pid(), "current process query:");
        let name = weak_error!(
            self.adapter.current_process_name(),
            "current process name query:"
        );
        if let (Some(process_id), Some(process_name)) = (pid, name) {
            state.current_process = Some(ProcessInfo {
                process_id,
                process_name,
                image_path: String::new(),
                is_attached: true,
                attach_time: SystemTime::now(),
            });
        }

        if let Some(thread_id) = weak_error!(self.adapter.current_tid(), "current thread query:") {
            state.current_thread = Some(ThreadInfo {
                thread_id,
                process_id: state
                    .current_process
                    .as_ref()
                    .map(|p| p.process_id)
                    .unwrap_or(0),
                is_current: true,
                state: "Running".to_string(),
            });
        }

        self.initialized.store(true, Ordering::SeqCst);
    }
}
