//! The seam to the host debugger.
//!
//! The core never names the host's interface set: everything it needs is
//! behind [`DebuggerAdapter`]. Host glue implements the trait on top of the
//! native control/data-spaces/registers/symbols interfaces and hands an
//! `Arc<dyn DebuggerAdapter>` to the extension controller.

pub mod capture;

use std::sync::Arc;
use std::time::Duration;

pub use capture::{CaptureGuard, OutputCapture, OutputSink};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("debugger client is not connected")]
    NotConnected,
    #[error("command execution failed with status {0:#x}")]
    CommandFailed(i32),
    #[error("memory access failed at {0:#x}")]
    MemoryAccess(u64),
    #[error("symbol `{0}` not found")]
    SymbolNotFound(String),
    #[error("no symbol at address {0:#x}")]
    NoSymbolAtAddress(u64),
    #[error("no current process")]
    NoCurrentProcess,
    #[error("no current thread")]
    NoCurrentThread,
    #[error("adapter: {0}")]
    Other(anyhow::Error),
}

/// What one debugger command invocation produced.
///
/// A command that the debugger itself rejected still comes back as `Ok`:
/// `success` is false and `status` carries the host status code. `Err` is
/// reserved for seam-level failures (lost client, dead interface).
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub success: bool,
    pub raw_output: String,
    pub status: i32,
}

impl CommandOutcome {
    pub fn ok(raw_output: impl Into<String>) -> Self {
        CommandOutcome {
            success: true,
            raw_output: raw_output.into(),
            status: 0,
        }
    }

    pub fn failed(status: i32) -> Self {
        CommandOutcome {
            success: false,
            raw_output: String::new(),
            status,
        }
    }
}

/// Debugger primitives used by the core. All operations return a result
/// carrying a status; none panic.
///
/// `execute_text_command` blocks for the duration of the command; the given
/// timeout is a hint for the host side, the engine bounds its own wait.
pub trait DebuggerAdapter: Send + Sync {
    fn execute_text_command(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<CommandOutcome, AdapterError>;

    fn read_memory(&self, address: u64, len: usize) -> Result<Vec<u8>, AdapterError>;

    fn resolve_symbol(&self, name: &str) -> Result<u64, AdapterError>;

    /// Nearest symbol at `address` together with the displacement from its base.
    fn symbol_at(&self, address: u64) -> Result<(String, u64), AdapterError>;

    fn current_pid(&self) -> Result<u32, AdapterError>;

    fn current_tid(&self) -> Result<u32, AdapterError>;

    fn current_process_name(&self) -> Result<String, AdapterError>;

    /// Install `sink` as the debugger's text-output callback, returning the
    /// previously installed one. `None` uninstalls. This is the interception
    /// point [`CaptureGuard`] uses around each command invocation.
    fn swap_output_sink(&self, sink: Option<Arc<dyn OutputSink>>)
        -> Option<Arc<dyn OutputSink>>;
}
