//! Capture of debugger text output around a single command invocation.
//!
//! The debugger prints through an installed output callback. For the
//! duration of one command the engine swaps its own sink in, lets the
//! command run, then restores whatever was installed before. The swap and
//! restore are tied to a guard so the previous callback comes back on every
//! exit path.

use super::DebuggerAdapter;
use std::sync::{Arc, Mutex};

/// Hard cap on captured text per command.
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Appended once when the cap is hit; further chunks are dropped.
pub const TRUNCATION_SENTINEL: &str = "\n[Output truncated - maximum size exceeded]\n";

/// Receiver of debugger output text. Invoked from whatever thread the host
/// debugger happens to print on.
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);
}

#[derive(Default)]
struct CaptureState {
    output: String,
    truncated: bool,
    extension_error_seen: bool,
    export_error_seen: bool,
}

/// Accumulates everything a command prints, classifying a few well-known
/// noise lines on the way. Scoped to one invocation, never reused across
/// commands.
#[derive(Default)]
pub struct OutputCapture {
    state: Mutex<CaptureState>,
}

impl OutputCapture {
    pub fn new() -> Self {
        OutputCapture::default()
    }

    /// Captured text so far.
    pub fn contents(&self) -> String {
        self.state.lock().expect("not poisoned").output.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("not poisoned");
        *state = CaptureState::default();
    }

    fn append(&self, text: &str) {
        let mut state = self.state.lock().expect("not poisoned");
        if state.truncated {
            return;
        }
        if state.output.len() + text.len() > MAX_OUTPUT_SIZE {
            state.output.push_str(TRUNCATION_SENTINEL);
            state.truncated = true;
            return;
        }

        if is_cache_warning(text) {
            state.output.push_str("Note: ");
            state.output.push_str(text);
            state.output.push('\n');
        } else if is_extension_error(text) {
            if !state.extension_error_seen {
                let rewritten = rewrite_extension_error(text);
                state.output.push_str(&rewritten);
                state.extension_error_seen = true;
            }
        } else if is_export_error(text) {
            if !state.export_error_seen {
                let rewritten = rewrite_export_error(text);
                state.output.push_str(&rewritten);
                state.export_error_seen = true;
            }
        } else {
            state.output.push_str(text);
        }
    }
}

impl OutputSink for OutputCapture {
    fn write(&self, text: &str) {
        self.append(text);
    }
}

fn is_cache_warning(text: &str) -> bool {
    text.contains(".cache forcedecodeuser is not enabled")
}

fn is_extension_error(text: &str) -> bool {
    text.contains("is not extension gallery command")
}

fn is_export_error(text: &str) -> bool {
    text.contains("No export") && text.contains("found")
}

fn rewrite_extension_error(text: &str) -> String {
    let command = text
        .split(" is not extension gallery command")
        .next()
        .unwrap_or("")
        .trim();
    if command == "modinfo" {
        "Note: The !modinfo command is not available. Using alternative lmv command instead.\n"
            .to_string()
    } else {
        format!(
            "Error: Command '{command}' is not available. Make sure the required extension is loaded.\n"
        )
    }
}

fn rewrite_export_error(text: &str) -> String {
    let command = text
        .split("No export ")
        .nth(1)
        .and_then(|rest| rest.split(" found").next())
        .unwrap_or("")
        .trim();
    format!("Note: Command '{command}' is not available in the current debugging context.\n")
}

/// Installs a capture as the adapter's output sink and restores the previous
/// sink on drop, error paths included.
pub struct CaptureGuard<'a> {
    adapter: &'a dyn DebuggerAdapter,
    capture: Arc<OutputCapture>,
    previous: Option<Arc<dyn OutputSink>>,
}

impl<'a> CaptureGuard<'a> {
    pub fn install(adapter: &'a dyn DebuggerAdapter) -> Self {
        let capture = Arc::new(OutputCapture::new());
        let previous = adapter.swap_output_sink(Some(capture.clone()));
        CaptureGuard {
            adapter,
            capture,
            previous,
        }
    }

    /// Captured text so far.
    pub fn contents(&self) -> String {
        self.capture.contents()
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.adapter.swap_output_sink(self.previous.take());
    }
}
