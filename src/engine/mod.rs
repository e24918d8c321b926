//! Command execution engine.
//!
//! Runs one command, or a batch, safely, synchronously or asynchronously.
//! Every invocation goes through the same pipeline: validation (length cap,
//! dangerous-prefix denylist), sanitization, session snapshot, a
//! capture-wrapped adapter call bounded by a timeout, statistics.
//!
//! Timeouts bound the wait on the result, not the adapter call itself: the
//! call runs on its own thread and may outlive a timed-out task. Adapter
//! invocations are serialized behind a single lock until the host documents
//! its thread-safety contract.

pub mod router;

use crate::debugger::{CaptureGuard, DebuggerAdapter};
use crate::protocol::now_millis;
use crate::session::SessionStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Commands longer than this are rejected before reaching the debugger.
pub const MAX_COMMAND_LENGTH: usize = 1024;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Execution-control and analysis commands routinely run much longer.
pub const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const WORKER_COUNT: usize = 2;

/// Upper bound on queued (not yet started) async tasks. A submission over
/// the bound is dropped and its handle resolves to `None`.
pub const MAX_PENDING_TASKS: usize = 256;

/// Prefixes that can destabilize or destructively modify the debuggee or
/// host. Applied to generic pass-through text; typed routes are vetted by
/// the router instead.
pub const DANGEROUS_PREFIXES: &[&str] = &[
    "ed ", "eb ", "ew ", "eq ", // memory editing
    ".reboot", ".crash", // system control
    "!process 0 7",  // can stall the whole target
    ".detach", ".kill", // destructive process control
    "sxe", "sxd", // exception handling changes
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid command")]
    InvalidCommand,
    #[error("command execution failed")]
    CommandFailed,
    #[error("command timed out")]
    Timeout,
    #[error("internal executor error")]
    InternalError,
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Run the length/denylist validation before executing.
    pub validate: bool,
    /// Overrides the per-command default timeout.
    pub timeout: Option<Duration>,
    /// Additional attempts after a timeout. Other errors never retry.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions {
            validate: true,
            timeout: None,
            retry_count: 0,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ExecutionOptions {
    /// Options for commands already vetted by a typed route.
    pub fn unvalidated() -> Self {
        ExecutionOptions {
            validate: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error_message: String,
    pub execution_time: Duration,
    pub command_executed: String,
    pub timestamp: i64,
    /// Failure classification, `None` on success.
    pub error: Option<ExecutionError>,
}

impl CommandResult {
    fn rejected(command: &str, message: &str, error: ExecutionError) -> Self {
        CommandResult {
            success: false,
            output: String::new(),
            error_message: message.to_string(),
            execution_time: Duration::ZERO,
            command_executed: command.to_string(),
            timestamp: now_millis(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub results: Vec<CommandResult>,
    pub successful_commands: usize,
    pub failed_commands: usize,
    pub total_execution_time: Duration,
    pub all_successful: bool,
}

/// Called after each batch item with `(completed, total)`.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub total_commands: u64,
    pub successful_commands: u64,
    pub failed_commands: u64,
    pub timed_out_commands: u64,
    pub total_execution_time: Duration,
    pub average_execution_time: Duration,
}

/// Receiver side of a queued asynchronous execution.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the task resolves. `None` if it was cancelled before
    /// starting.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

type Task = Box<dyn FnOnce() + Send>;

struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    shutdown: AtomicBool,
}

pub struct CommandEngine {
    adapter: Arc<dyn DebuggerAdapter>,
    session: Arc<SessionStore>,
    exec_lock: Arc<Mutex<()>>,
    queue: Arc<TaskQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Mutex<EngineStats>,
}

impl CommandEngine {
    pub fn new(adapter: Arc<dyn DebuggerAdapter>, session: Arc<SessionStore>) -> Arc<Self> {
        let queue = Arc::new(TaskQueue {
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let workers = (0..WORKER_COUNT)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::Builder::new()
                    .name(format!("vibedbg-engine-{i}"))
                    .spawn(move || worker_loop(queue))
                    .expect("spawn engine worker")
            })
            .collect();

        Arc::new(CommandEngine {
            adapter,
            session,
            exec_lock: Arc::new(Mutex::new(())),
            queue,
            workers: Mutex::new(workers),
            stats: Mutex::new(EngineStats::default()),
        })
    }

    /// Execute one command on the calling thread.
    pub fn execute(&self, command: &str, options: &ExecutionOptions) -> CommandResult {
        let mut attempt = 0;
        loop {
            let result = self.execute_inner(command, options);
            let timed_out = result.error == Some(ExecutionError::Timeout);
            if !timed_out || attempt >= options.retry_count {
                return result;
            }
            attempt += 1;
            log::debug!(
                target: "engine",
                "retrying `{command}` after timeout, attempt {attempt}/{}",
                options.retry_count
            );
            thread::sleep(options.retry_delay);
        }
    }

    /// Queue a command for one of the engine workers.
    pub fn execute_async(
        self: &Arc<Self>,
        command: String,
        options: ExecutionOptions,
    ) -> TaskHandle<CommandResult> {
        let engine = Arc::clone(self);
        let (tx, rx) = mpsc::channel();
        self.submit(Box::new(move || {
            let result = engine.execute(&command, &options);
            let _ = tx.send(result);
        }));
        TaskHandle { rx }
    }

    /// Execute commands in order; failures do not abort the batch.
    pub fn execute_batch(
        &self,
        commands: &[String],
        options: &ExecutionOptions,
        progress: Option<&(dyn Fn(usize, usize) + Send)>,
    ) -> BatchResult {
        let start = Instant::now();
        let mut batch = BatchResult {
            results: Vec::with_capacity(commands.len()),
            ..Default::default()
        };

        for (i, command) in commands.iter().enumerate() {
            let result = self.execute(command, options);
            if result.success {
                batch.successful_commands += 1;
            } else {
                batch.failed_commands += 1;
            }
            batch.results.push(result);

            if let Some(progress) = progress {
                progress(i + 1, commands.len());
            }
        }

        batch.total_execution_time = start.elapsed();
        batch.all_successful = batch.failed_commands == 0;
        batch
    }

    /// Queue a whole batch as one worker task.
    pub fn execute_batch_async(
        self: &Arc<Self>,
        commands: Vec<String>,
        options: ExecutionOptions,
        progress: Option<ProgressCallback>,
    ) -> TaskHandle<BatchResult> {
        let engine = Arc::clone(self);
        let (tx, rx) = mpsc::channel();
        self.submit(Box::new(move || {
            let result = engine.execute_batch(&commands, &options, progress.as_deref());
            let _ = tx.send(result);
        }));
        TaskHandle { rx }
    }

    /// Drop all not-yet-started tasks. In-flight work is not interrupted.
    pub fn cancel_all_pending(&self) {
        self.queue.tasks.lock().unwrap().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.queue.tasks.lock().unwrap().len()
    }

    pub fn is_busy(&self) -> bool {
        self.pending_count() > 0
    }

    /// Suggested commands starting with `partial`.
    pub fn command_suggestions(&self, partial: &str) -> Vec<String> {
        self.session
            .suggested_commands()
            .iter()
            .filter(|suggestion| suggestion.starts_with(partial))
            .map(|suggestion| suggestion.to_string())
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = *self.stats.lock().unwrap();
        if stats.total_commands > 0 {
            stats.average_execution_time = stats.total_execution_time / stats.total_commands as u32;
        }
        stats
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap() = EngineStats::default();
    }

    fn submit(&self, task: Task) {
        let mut tasks = self.queue.tasks.lock().unwrap();
        if tasks.len() >= MAX_PENDING_TASKS {
            log::warn!(target: "engine", "task queue full, dropping submission");
            return;
        }
        tasks.push_back(task);
        drop(tasks);
        self.queue.available.notify_one();
    }

    fn execute_inner(&self, command: &str, options: &ExecutionOptions) -> CommandResult {
        let command = command.trim();
        log::debug!(target: "engine", "executing `{command}`");

        if options.validate {
            if let Err(message) = validate_command(command) {
                log::warn!(target: "engine", "rejected `{command}`: {message}");
                let result = CommandResult::rejected(command, message, ExecutionError::InvalidCommand);
                self.count_failure(ExecutionError::InvalidCommand, Duration::ZERO);
                return result;
            }
        }

        if !sanitize_command(command) {
            log::warn!(target: "engine", "sanitizer rejected `{command}`");
            let result =
                CommandResult::rejected(command, "Failed to prepare command", ExecutionError::InvalidCommand);
            self.count_failure(ExecutionError::InvalidCommand, Duration::ZERO);
            return result;
        }

        // Triggers lazy session initialization on the first command.
        let _ = self.session.snapshot();

        let timeout = options.timeout.unwrap_or_else(|| default_timeout_for(command));
        let start = Instant::now();
        let outcome = self.run_bounded(command.to_string(), timeout);
        let elapsed = start.elapsed();

        match outcome {
            Ok(output) => {
                self.count_success(elapsed);
                CommandResult {
                    success: true,
                    output,
                    error_message: String::new(),
                    execution_time: elapsed,
                    command_executed: command.to_string(),
                    timestamp: now_millis(),
                    error: None,
                }
            }
            Err(error) => {
                self.count_failure(error, elapsed);
                let message = match error {
                    ExecutionError::Timeout => "Operation timed out",
                    ExecutionError::InternalError => "Internal executor error",
                    _ => "Command execution failed",
                };
                CommandResult {
                    success: false,
                    output: String::new(),
                    error_message: message.to_string(),
                    execution_time: elapsed,
                    command_executed: command.to_string(),
                    timestamp: now_millis(),
                    error: Some(error),
                }
            }
        }
    }

    /// Run the adapter call on its own thread and wait for at most `timeout`.
    /// On expiry the call thread keeps running to completion; the capture
    /// guard restores the previous output sink when it finishes.
    fn run_bounded(&self, command: String, timeout: Duration) -> Result<String, ExecutionError> {
        let adapter = Arc::clone(&self.adapter);
        let exec_lock = Arc::clone(&self.exec_lock);
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name("vibedbg-exec".to_string())
            .spawn(move || {
                let _serialized = exec_lock.lock().unwrap();
                let capture = CaptureGuard::install(adapter.as_ref());
                let outcome = adapter.execute_text_command(&command, timeout);
                let captured = capture.contents();
                drop(capture);
                let _ = tx.send((outcome, captured));
            });
        if spawned.is_err() {
            return Err(ExecutionError::InternalError);
        }

        match rx.recv_timeout(timeout) {
            Ok((Ok(outcome), captured)) if outcome.success => {
                if captured.is_empty() {
                    Ok(outcome.raw_output)
                } else {
                    Ok(captured)
                }
            }
            Ok((Ok(outcome), _)) => {
                log::warn!(target: "engine", "debugger rejected command, status {:#x}", outcome.status);
                Err(ExecutionError::CommandFailed)
            }
            Ok((Err(e), _)) => {
                log::error!(target: "engine", "adapter failure: {e:#}");
                Err(ExecutionError::CommandFailed)
            }
            Err(RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::InternalError),
        }
    }

    fn count_success(&self, elapsed: Duration) {
        let mut stats = self.stats.lock().unwrap();
        stats.total_commands += 1;
        stats.successful_commands += 1;
        stats.total_execution_time += elapsed;
    }

    fn count_failure(&self, error: ExecutionError, elapsed: Duration) {
        let mut stats = self.stats.lock().unwrap();
        stats.total_commands += 1;
        stats.failed_commands += 1;
        stats.total_execution_time += elapsed;
        if error == ExecutionError::Timeout {
            stats.timed_out_commands += 1;
        }
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.queue.shutdown.store(true, Ordering::SeqCst);
        self.queue.available.notify_all();
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(queue: Arc<TaskQueue>) {
    loop {
        let task = {
            let mut tasks = queue.tasks.lock().unwrap();
            loop {
                if let Some(task) = tasks.pop_front() {
                    break Some(task);
                }
                if queue.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                tasks = queue.available.wait(tasks).unwrap();
            }
        };

        match task {
            Some(task) => task(),
            None => break,
        }
    }
}

/// Empty, over-long and denylisted commands never reach the debugger.
pub fn validate_command(command: &str) -> Result<(), &'static str> {
    if command.is_empty() {
        return Err("Invalid command syntax: empty command");
    }
    if command.len() > MAX_COMMAND_LENGTH {
        return Err("Invalid command syntax: command too long");
    }
    if is_dangerous_command(command) {
        return Err("Invalid command syntax: unsafe command rejected");
    }
    Ok(())
}

/// True when the lower-cased command starts with a denylisted prefix.
pub fn is_dangerous_command(command: &str) -> bool {
    let lowered = command.to_lowercase();
    DANGEROUS_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Rejects text containing filesystem-destructive words.
fn sanitize_command(command: &str) -> bool {
    !command.contains("rm ") && !command.contains("del ")
}

/// 60 s for prefixes known to run long, 30 s otherwise.
pub fn default_timeout_for(command: &str) -> Duration {
    let lowered = command.to_lowercase();
    if lowered.starts_with('g') || lowered.starts_with("!analyze") {
        LONG_COMMAND_TIMEOUT
    } else {
        DEFAULT_COMMAND_TIMEOUT
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::debugger::{AdapterError, CommandOutcome, OutputSink};
    use std::sync::atomic::AtomicUsize;

    /// Adapter that records invocations and replays scripted behavior.
    pub(crate) struct ScriptedAdapter {
        pub calls: Mutex<Vec<String>>,
        pub sink: Mutex<Option<Arc<dyn OutputSink>>>,
        pub delay: Option<Duration>,
        pub fail: bool,
        pub silent: bool,
    }

    impl ScriptedAdapter {
        pub fn new() -> Self {
            ScriptedAdapter {
                calls: Mutex::new(vec![]),
                sink: Mutex::new(None),
                delay: None,
                fail: false,
                silent: false,
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl DebuggerAdapter for ScriptedAdapter {
        fn execute_text_command(
            &self,
            text: &str,
            _timeout: Duration,
        ) -> Result<CommandOutcome, AdapterError> {
            self.calls.lock().unwrap().push(text.to_string());
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail {
                return Ok(CommandOutcome::failed(-1));
            }
            if !self.silent {
                if let Some(sink) = self.sink.lock().unwrap().as_ref() {
                    sink.write(&format!("output of {text}"));
                }
            }
            Ok(CommandOutcome::ok(""))
        }

        fn read_memory(&self, _: u64, _: usize) -> Result<Vec<u8>, AdapterError> {
            Ok(vec![])
        }

        fn resolve_symbol(&self, name: &str) -> Result<u64, AdapterError> {
            Err(AdapterError::SymbolNotFound(name.to_string()))
        }

        fn symbol_at(&self, address: u64) -> Result<(String, u64), AdapterError> {
            Err(AdapterError::NoSymbolAtAddress(address))
        }

        fn current_pid(&self) -> Result<u32, AdapterError> {
            Ok(1)
        }

        fn current_tid(&self) -> Result<u32, AdapterError> {
            Ok(1)
        }

        fn current_process_name(&self) -> Result<String, AdapterError> {
            Ok("target.exe".to_string())
        }

        fn swap_output_sink(
            &self,
            sink: Option<Arc<dyn OutputSink>>,
        ) -> Option<Arc<dyn OutputSink>> {
            std::mem::replace(&mut self.sink.lock().unwrap(), sink)
        }
    }

    fn engine_with(adapter: Arc<ScriptedAdapter>) -> Arc<CommandEngine> {
        let session = Arc::new(SessionStore::new(adapter.clone()));
        CommandEngine::new(adapter, session)
    }

    #[test]
    fn executes_and_captures_output() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let engine = engine_with(adapter.clone());

        let result = engine.execute("lm", &ExecutionOptions::default());
        assert!(result.success);
        assert_eq!(result.output, "output of lm");
        assert_eq!(adapter.call_count(), 1);
    }

    #[test]
    fn rejects_dangerous_commands_without_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let engine = engine_with(adapter.clone());

        for command in ["ed 0x1000 0x41", ".reboot", "!process 0 7", "SXE av", ".kill"] {
            let result = engine.execute(command, &ExecutionOptions::default());
            assert!(!result.success, "{command} must be rejected");
            assert!(!result.error_message.is_empty());
        }
        assert_eq!(adapter.call_count(), 0);
    }

    #[test]
    fn rejects_destructive_words_without_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let engine = engine_with(adapter.clone());

        for command in ["shell rm -rf /", "shell del c:\\windows"] {
            let result = engine.execute(command, &ExecutionOptions::default());
            assert!(!result.success);
        }
        assert_eq!(adapter.call_count(), 0);
    }

    #[test]
    fn command_length_boundary() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let engine = engine_with(adapter.clone());

        let ok = engine.execute(&"x".repeat(MAX_COMMAND_LENGTH), &ExecutionOptions::default());
        assert!(ok.success);

        let too_long =
            engine.execute(&"x".repeat(MAX_COMMAND_LENGTH + 1), &ExecutionOptions::default());
        assert!(!too_long.success);
        assert_eq!(adapter.call_count(), 1);
    }

    #[test]
    fn empty_command_rejected() {
        let engine = engine_with(Arc::new(ScriptedAdapter::new()));
        let result = engine.execute("   ", &ExecutionOptions::default());
        assert!(!result.success);
        assert_eq!(result.error, Some(ExecutionError::InvalidCommand));
    }

    #[test]
    fn timeout_is_enforced_and_counted() {
        let mut adapter = ScriptedAdapter::new();
        adapter.delay = Some(Duration::from_millis(300));
        let engine = engine_with(Arc::new(adapter));

        let options = ExecutionOptions {
            timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let result = engine.execute("k", &options);
        assert!(!result.success);
        assert_eq!(result.error, Some(ExecutionError::Timeout));
        assert_eq!(engine.stats().timed_out_commands, 1);
    }

    #[test]
    fn retry_applies_only_to_timeouts() {
        let mut adapter = ScriptedAdapter::new();
        adapter.delay = Some(Duration::from_millis(100));
        let adapter = Arc::new(adapter);
        let engine = engine_with(adapter.clone());

        let options = ExecutionOptions {
            timeout: Some(Duration::from_millis(10)),
            retry_count: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result = engine.execute("k", &options);
        assert!(!result.success);
        assert_eq!(result.error, Some(ExecutionError::Timeout));

        // Each attempt runs on a detached call thread which may finish after
        // the timed-out wait; give all three a moment to reach the adapter.
        let deadline = Instant::now() + Duration::from_secs(2);
        while adapter.call_count() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(adapter.call_count(), 3);

        let failing = Arc::new(ScriptedAdapter {
            fail: true,
            ..ScriptedAdapter::new()
        });
        let engine = engine_with(failing.clone());
        let result = engine.execute("k", &options);
        assert!(!result.success);
        assert_eq!(failing.call_count(), 1);
    }

    #[test]
    fn batch_continues_after_failures() {
        let adapter = Arc::new(ScriptedAdapter::new());
        let engine = engine_with(adapter);

        let commands = vec!["lm".to_string(), "ed 0x0 0x0".to_string(), "k".to_string()];
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_callback = seen.clone();
        let batch = engine.execute_batch(
            &commands,
            &ExecutionOptions::default(),
            Some(&move |done, total| {
                assert_eq!(total, 3);
                seen_in_callback.store(done, Ordering::SeqCst);
            }),
        );

        assert_eq!(batch.results.len(), 3);
        assert_eq!(batch.successful_commands, 2);
        assert_eq!(batch.failed_commands, 1);
        assert!(!batch.all_successful);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn async_execution_resolves() {
        let engine = engine_with(Arc::new(ScriptedAdapter::new()));
        let handle = engine.execute_async("lm".to_string(), ExecutionOptions::default());
        let result = handle.wait().expect("task ran");
        assert!(result.success);
    }

    #[test]
    fn cancel_drops_pending_but_not_in_flight() {
        let mut adapter = ScriptedAdapter::new();
        adapter.delay = Some(Duration::from_millis(200));
        let engine = engine_with(Arc::new(adapter));

        // Two tasks occupy both workers, the third stays queued.
        let first = engine.execute_async("k".to_string(), ExecutionOptions::default());
        let second = engine.execute_async("r".to_string(), ExecutionOptions::default());
        let third = engine.execute_async("lm".to_string(), ExecutionOptions::default());

        thread::sleep(Duration::from_millis(50));
        engine.cancel_all_pending();
        assert_eq!(engine.pending_count(), 0);
        assert!(!engine.is_busy());

        assert!(third.wait().is_none());
        assert!(first.wait().is_some());
        assert!(second.wait().is_some());
    }

    #[test]
    fn stats_totals_add_up() {
        let engine = engine_with(Arc::new(ScriptedAdapter::new()));
        engine.execute("lm", &ExecutionOptions::default());
        engine.execute("ed 0x0 1", &ExecutionOptions::default());
        engine.execute("k", &ExecutionOptions::default());

        let stats = engine.stats();
        assert_eq!(stats.total_commands, 3);
        assert_eq!(
            stats.total_commands,
            stats.successful_commands + stats.failed_commands
        );

        engine.reset_stats();
        assert_eq!(engine.stats().total_commands, 0);
    }

    #[test]
    fn default_timeouts_by_prefix() {
        assert_eq!(default_timeout_for("g"), LONG_COMMAND_TIMEOUT);
        assert_eq!(default_timeout_for("!analyze -v"), LONG_COMMAND_TIMEOUT);
        assert_eq!(default_timeout_for("lm"), DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn suggestions_filter_by_prefix() {
        let engine = engine_with(Arc::new(ScriptedAdapter::new()));
        let all = engine.command_suggestions("");
        assert_eq!(all.len(), crate::session::SUGGESTED_COMMANDS.len());
        assert_eq!(engine.command_suggestions("!"), vec!["!peb".to_string()]);
    }
}
