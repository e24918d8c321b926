//! Extension lifecycle controller.
//!
//! Owns the whole stack: session store, command engine, router and pipe
//! server, built in dependency order and torn down in reverse. The pipe
//! server and engine receive narrow capabilities only (a handler closure,
//! the adapter trait object); nothing points back at the controller.
//!
//! The host glue talks to the module-level functions ([`connect`],
//! [`disconnect`], [`status`], [`execute`], [`version()`], [`help()`])
//! which manage the single process-wide instance.

use crate::debugger::DebuggerAdapter;
use crate::engine::router::CommandRouter;
use crate::engine::{CommandEngine, ExecutionOptions};
use crate::protocol::{now_millis, CommandRequest, CommandResponse};
use crate::server::{MessageHandler, PipeServer, PipeServerConfig, SessionInfoSource};
use crate::session::SessionStore;
use crate::version;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("extension is already initialized")]
    AlreadyInitialized,
    #[error("extension initialization failed")]
    InitializationFailed,
    #[error("debugger interface acquisition failed")]
    DebuggerInterfaceError,
    #[error("communication setup failed: {0}")]
    CommunicationSetupFailed(#[from] crate::server::ServerError),
    #[error("extension not initialized")]
    NotInitialized,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionStats {
    pub total_commands: u64,
    pub successful_commands: u64,
    pub failed_commands: u64,
    pub total_connections: u64,
    pub uptime: Duration,
}

#[derive(Default)]
struct CommandCounters {
    total: u64,
    successful: u64,
    failed: u64,
}

pub struct Extension {
    session: Arc<SessionStore>,
    engine: Arc<CommandEngine>,
    router: Arc<CommandRouter>,
    server: PipeServer,
    counters: Arc<Mutex<CommandCounters>>,
    initialized: Arc<AtomicBool>,
    init_time: Instant,
}

impl Extension {
    /// Bring the whole stack up: session store, engine (starts its
    /// workers), router, then the pipe server with the message handler
    /// installed. A failed server start tears everything down again.
    pub fn initialize(
        adapter: Arc<dyn DebuggerAdapter>,
        config: PipeServerConfig,
    ) -> Result<Self, ExtensionError> {
        log::info!(target: "extension", "initializing {}", version::EXTENSION_NAME);

        // Session state queries are deferred to first use: querying the
        // current process mid-init would re-enter the debugger interfaces.
        let session = Arc::new(SessionStore::new(Arc::clone(&adapter)));
        let engine = CommandEngine::new(adapter, Arc::clone(&session));
        let router = Arc::new(CommandRouter::new(Arc::clone(&engine)));

        let counters = Arc::new(Mutex::new(CommandCounters::default()));
        let initialized = Arc::new(AtomicBool::new(false));

        let handler: MessageHandler = {
            let engine = Arc::clone(&engine);
            let router = Arc::clone(&router);
            let counters = Arc::clone(&counters);
            let initialized = Arc::clone(&initialized);
            Arc::new(move |request: CommandRequest| {
                handle_request(&engine, &router, &counters, &initialized, request)
            })
        };
        let session_info: SessionInfoSource = {
            let session = Arc::clone(&session);
            Arc::new(move || session.session_json())
        };

        let server = PipeServer::new(config, handler, Some(session_info));
        server.start()?;
        // Give the listener a moment to reach its accept state.
        std::thread::sleep(Duration::from_millis(100));

        initialized.store(true, Ordering::SeqCst);
        log::info!(target: "extension", "extension initialized");

        Ok(Extension {
            session,
            engine,
            router,
            server,
            counters,
            initialized,
            init_time: Instant::now(),
        })
    }

    /// Inverse-order teardown. Safe to call repeatedly; the engine workers
    /// are joined when the extension is dropped.
    pub fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!(target: "extension", "shutting down");
        self.server.stop();
        self.engine.cancel_all_pending();
    }

    /// Run one command the same way pipe clients do: routed first, generic
    /// pass-through otherwise. Returns printable text either way.
    pub fn execute_text(&self, command: &str) -> String {
        let (_, text) = run_command(
            &self.engine,
            &self.router,
            &self.counters,
            command,
            None,
        );
        text
    }

    pub fn status(&self) -> String {
        self.session.format_status()
    }

    pub fn statistics(&self) -> ExtensionStats {
        let counters = self.counters.lock().unwrap();
        ExtensionStats {
            total_commands: counters.total,
            successful_commands: counters.successful,
            failed_commands: counters.failed,
            total_connections: self.server.stats().total_connections,
            uptime: self.init_time.elapsed(),
        }
    }

    pub fn server(&self) -> &PipeServer {
        &self.server
    }
}

impl Drop for Extension {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Routed-or-generic execution shared by the pipe handler and the host
/// `execute` command. Returns `(success, printable text)`.
fn run_command(
    engine: &Arc<CommandEngine>,
    router: &CommandRouter,
    counters: &Mutex<CommandCounters>,
    command: &str,
    timeout: Option<Duration>,
) -> (bool, String) {
    let outcome = match router.route(command) {
        Some(output) => (true, output),
        None => {
            let options = ExecutionOptions {
                timeout,
                ..Default::default()
            };
            let result = engine.execute(command, &options);
            if result.success {
                (true, result.output)
            } else {
                (false, result.error_message)
            }
        }
    };

    let mut counters = counters.lock().unwrap();
    counters.total += 1;
    if outcome.0 {
        counters.successful += 1;
    } else {
        counters.failed += 1;
    }

    outcome
}

fn handle_request(
    engine: &Arc<CommandEngine>,
    router: &CommandRouter,
    counters: &Mutex<CommandCounters>,
    initialized: &AtomicBool,
    request: CommandRequest,
) -> CommandResponse {
    let started = Instant::now();

    if !initialized.load(Ordering::SeqCst) {
        return CommandResponse::fail(request.request_id, "Extension not initialized");
    }

    let (success, text) = run_command(
        engine,
        router,
        counters,
        &request.command,
        Some(request.timeout()),
    );

    CommandResponse {
        request_id: request.request_id,
        success,
        output: if success { text.clone() } else { String::new() },
        error_message: if success { String::new() } else { text },
        execution_time_ms: started.elapsed().as_millis() as u64,
        session_data: Value::Null,
        timestamp: now_millis(),
    }
}

// ------------------------------ host command surface ------------------------------------------

static INSTANCE: Lazy<Mutex<Option<Extension>>> = Lazy::new(|| Mutex::new(None));

/// Wire the host-provided log sink into the global proxy. Called by the host
/// glue before or right after [`connect`]; until then logging is a no-op.
pub fn install_logger<L: log::Log + 'static>(logger: L, level: log::LevelFilter) {
    crate::logging::LOGGER_SWITCHER.switch(logger, level);
}

/// Host `connect` command: bring the extension up with default settings.
pub fn connect(adapter: Arc<dyn DebuggerAdapter>) -> Result<(), ExtensionError> {
    connect_with(adapter, PipeServerConfig::default())
}

pub fn connect_with(
    adapter: Arc<dyn DebuggerAdapter>,
    config: PipeServerConfig,
) -> Result<(), ExtensionError> {
    let mut slot = INSTANCE.lock().unwrap();
    if slot.is_some() {
        return Err(ExtensionError::AlreadyInitialized);
    }
    *slot = Some(Extension::initialize(adapter, config)?);
    Ok(())
}

/// Host `disconnect` command. Idempotent.
pub fn disconnect() {
    if let Some(extension) = INSTANCE.lock().unwrap().take() {
        extension.shutdown();
    }
}

/// Host `status` command.
pub fn status() -> Result<String, ExtensionError> {
    let slot = INSTANCE.lock().unwrap();
    let extension = slot.as_ref().ok_or(ExtensionError::NotInitialized)?;
    Ok(extension.status())
}

/// Host `execute` command: free-form command text, printable result.
pub fn execute(command: &str) -> Result<String, ExtensionError> {
    let slot = INSTANCE.lock().unwrap();
    let extension = slot.as_ref().ok_or(ExtensionError::NotInitialized)?;
    Ok(extension.execute_text(command))
}

/// Host `version` command.
pub fn version() -> String {
    version::banner()
}

/// Host `help` command.
pub fn help() -> &'static str {
    HELP_TEXT
}

const HELP_TEXT: &str = r#"VibeDbg Command Help:

Basic Commands:
  version              - Show extension version
  status               - Show current status
  help                 - Show this help

Execution Control:
  g                    - Continue execution
  p                    - Step over
  t                    - Step into
  gu                   - Step out
  gh / gn              - Continue with exception handled / not handled

Breakpoints:
  bp <addr-or-symbol>  - Set breakpoint
  bc|bd|be <id>        - Clear / disable / enable breakpoint
  bl                   - List breakpoints

Processes and Threads:
  ~                    - List threads
  !process             - List processes
  .attach <hex-pid>    - Attach to process
  .detach              - Detach from current process
  .create <path>       - Create process for debugging
  .restart / .kill     - Restart / terminate target process

Inspection:
  k                    - Stack trace
  r                    - Registers
  lm                   - List modules
  db|dd|dw|dq <addr> [L<count>] - Display memory

Analysis:
  .dump <path>         - Load crash dump
  !analyze             - Analyze crash (verbose)
  analyze_deadlock     - Threads, stacks, locks and critical sections

Anything else is passed to the debugger verbatim.
"#;
