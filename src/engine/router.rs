//! Recognizes well-known command shapes and dispatches them to typed
//! handlers; everything else falls through to generic pass-through.
//!
//! Routing matches on the lower-cased first token; parameters keep their
//! original case (symbols and image paths are case-sensitive). A recognized
//! route with a malformed argument answers with a user-visible `Error: …`
//! line instead of invoking the debugger.

use super::{CommandEngine, ExecutionOptions};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Words that disqualify a command from typed execution wherever they appear.
pub const SAFETY_DENYWORDS: &[&str] = &["format", "del", "rmdir", "erase", "delete"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    StackTrace,
    ListThreads,
    ListProcesses,
    ListModules,
    ShowRegisters,
    Continue,
    StepOver,
    StepInto,
    StepOut,
    ContinueExceptionHandled,
    ContinueExceptionNotHandled,
    ListBreakpoints,
    SetBreakpoint,
    ClearBreakpoint,
    DisableBreakpoint,
    EnableBreakpoint,
    AttachProcess,
    DetachProcess,
    CreateProcess,
    RestartProcess,
    TerminateProcess,
    LoadDump,
    AnalyzeCrash,
    AnalyzeDeadlock,
    MemoryDisplay,
}

struct RouteSpec {
    tokens: &'static [&'static str],
    route: Route,
}

/// First-token dispatch table, aliases included.
static ROUTES: &[RouteSpec] = &[
    RouteSpec {
        tokens: &["k", "kn", "kl", "kp", "kv"],
        route: Route::StackTrace,
    },
    RouteSpec {
        tokens: &["~"],
        route: Route::ListThreads,
    },
    RouteSpec {
        tokens: &["!process", "!processes"],
        route: Route::ListProcesses,
    },
    RouteSpec {
        tokens: &["lm", "!modules"],
        route: Route::ListModules,
    },
    RouteSpec {
        tokens: &["r", "registers"],
        route: Route::ShowRegisters,
    },
    RouteSpec {
        tokens: &["g", "go"],
        route: Route::Continue,
    },
    RouteSpec {
        tokens: &["p", "step"],
        route: Route::StepOver,
    },
    RouteSpec {
        tokens: &["t", "trace"],
        route: Route::StepInto,
    },
    RouteSpec {
        tokens: &["gu", "stepout"],
        route: Route::StepOut,
    },
    RouteSpec {
        tokens: &["gh"],
        route: Route::ContinueExceptionHandled,
    },
    RouteSpec {
        tokens: &["gn"],
        route: Route::ContinueExceptionNotHandled,
    },
    RouteSpec {
        tokens: &["bl", "breakpoints"],
        route: Route::ListBreakpoints,
    },
    RouteSpec {
        tokens: &["bp", "breakpoint"],
        route: Route::SetBreakpoint,
    },
    RouteSpec {
        tokens: &["bc", "clear"],
        route: Route::ClearBreakpoint,
    },
    RouteSpec {
        tokens: &["bd", "disable"],
        route: Route::DisableBreakpoint,
    },
    RouteSpec {
        tokens: &["be", "enable"],
        route: Route::EnableBreakpoint,
    },
    RouteSpec {
        tokens: &[".attach"],
        route: Route::AttachProcess,
    },
    RouteSpec {
        tokens: &[".detach"],
        route: Route::DetachProcess,
    },
    RouteSpec {
        tokens: &[".create"],
        route: Route::CreateProcess,
    },
    RouteSpec {
        tokens: &[".restart"],
        route: Route::RestartProcess,
    },
    RouteSpec {
        tokens: &[".kill"],
        route: Route::TerminateProcess,
    },
    RouteSpec {
        tokens: &[".dump"],
        route: Route::LoadDump,
    },
    RouteSpec {
        tokens: &["!analyze"],
        route: Route::AnalyzeCrash,
    },
    RouteSpec {
        tokens: &["analyze_deadlock"],
        route: Route::AnalyzeDeadlock,
    },
    RouteSpec {
        tokens: &["db", "dd", "dw", "dq"],
        route: Route::MemoryDisplay,
    },
];

fn lookup(token: &str) -> Option<Route> {
    ROUTES
        .iter()
        .find(|spec| spec.tokens.contains(&token))
        .map(|spec| spec.route)
}

static MEMORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(db|dd|dw|dq)\s+(0x[0-9a-f]+|[0-9a-f]+)(?:\s+l(0x[0-9a-f]+|[0-9a-f]+))?")
        .expect("must compile")
});

const DEFAULT_MEMORY_BYTES: u64 = 0x100;

pub struct CommandRouter {
    engine: Arc<CommandEngine>,
}

impl CommandRouter {
    pub fn new(engine: Arc<CommandEngine>) -> Self {
        CommandRouter { engine }
    }

    /// Try to dispatch `command` to a typed handler. `None` means "no route":
    /// the caller runs the original text through the engine verbatim.
    pub fn route(&self, command: &str) -> Option<String> {
        let original = command.trim();
        let mut parts = original.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("");
        if first.is_empty() {
            return None;
        }
        let params = parts.next().unwrap_or("").trim();
        let token = first.to_lowercase();

        let route = lookup(&token)?;
        log::debug!(target: "router", "`{original}` routed as {route:?}");

        match route {
            Route::StackTrace => Some(self.run("k")),
            Route::ListThreads => Some(self.run("~")),
            Route::ListProcesses => Some(self.run("!process 0 0")),
            Route::ListModules => Some(self.run("lm")),
            Route::ShowRegisters => Some(self.run("r")),
            Route::Continue => Some(self.run("g")),
            Route::StepOver => Some(self.run("p")),
            Route::StepInto => Some(self.run("t")),
            Route::StepOut => Some(self.run("gu")),
            Route::ContinueExceptionHandled => Some(self.run("gh")),
            Route::ContinueExceptionNotHandled => Some(self.run("gn")),
            Route::ListBreakpoints => Some(self.run("bl")),
            Route::SetBreakpoint => self.set_breakpoint(params),
            Route::ClearBreakpoint => self.breakpoint_by_id("bc", params),
            Route::DisableBreakpoint => self.breakpoint_by_id("bd", params),
            Route::EnableBreakpoint => self.breakpoint_by_id("be", params),
            Route::AttachProcess => self.attach_process(params),
            Route::DetachProcess => Some(self.run(".detach")),
            Route::CreateProcess => self.with_path(".create", params),
            Route::RestartProcess => Some(self.run(".restart")),
            Route::TerminateProcess => Some(self.run(".kill")),
            Route::LoadDump => self.with_path(".dump", params),
            Route::AnalyzeCrash => Some(self.run("!analyze -v")),
            Route::AnalyzeDeadlock => Some(self.analyze_deadlock()),
            Route::MemoryDisplay => self.memory_display(original),
        }
    }

    fn set_breakpoint(&self, params: &str) -> Option<String> {
        if params.is_empty() {
            return None;
        }
        if looks_like_address(params) {
            return Some(match parse_hex(params) {
                Ok(address) => self.run(&format!("bp 0x{address:x}")),
                Err(_) => format!("Error: Invalid address format '{params}'"),
            });
        }
        Some(self.run(&format!("bp {params}")))
    }

    fn breakpoint_by_id(&self, emit: &str, params: &str) -> Option<String> {
        if params.is_empty() {
            return None;
        }
        Some(match params.parse::<u32>() {
            Ok(id) => self.run(&format!("{emit} {id}")),
            Err(_) => format!("Error: Invalid breakpoint ID format '{params}'"),
        })
    }

    fn attach_process(&self, params: &str) -> Option<String> {
        if params.is_empty() {
            return None;
        }
        Some(match parse_hex(params) {
            Ok(pid) => self.run(&format!(".attach 0x{pid:x}")),
            Err(_) => format!("Error: Invalid process ID format '{params}'"),
        })
    }

    fn with_path(&self, emit: &str, params: &str) -> Option<String> {
        if params.is_empty() {
            return None;
        }
        Some(self.run(&format!("{emit} {params}")))
    }

    fn memory_display(&self, original: &str) -> Option<String> {
        let captures = MEMORY_RE.captures(original)?;
        let kind = captures[1].to_lowercase();

        let parsed: Result<(u64, u64), ()> = (|| {
            let address = parse_hex(&captures[2])?;
            let count = match captures.get(3) {
                Some(count) => parse_hex(count.as_str())?,
                None => DEFAULT_MEMORY_BYTES,
            };
            let count = match kind.as_str() {
                "dw" => count.checked_mul(2).ok_or(())?,
                "dq" => count.checked_mul(8).ok_or(())?,
                _ => count,
            };
            Ok((address, count))
        })();

        Some(match parsed {
            Ok((address, count)) => self.run(&format!("{kind} 0x{address:x} L0x{count:x}")),
            Err(_) => format!("Error: Invalid memory address/size format in command '{original}'"),
        })
    }

    /// Four-part deadlock report: threads, all stacks, locks, critical
    /// sections, concatenated under labeled sections.
    fn analyze_deadlock(&self) -> String {
        [
            ("Thread Analysis", "~"),
            ("Stack Traces", "~*k"),
            ("Lock Analysis", "!locks"),
            ("Critical Sections", "!critsec"),
        ]
        .iter()
        .map(|(title, command)| format!("=== {title} ===\n{}", self.run(command)))
        .join("\n\n")
    }

    /// Execute an emitted command string. Typed routes skip the engine's
    /// prefix denylist; the textual safety filter still applies.
    fn run(&self, command: &str) -> String {
        log::info!(target: "router", "executing `{command}`");

        if !is_command_safe(command) {
            return format_error("Invalid or unsafe command", "");
        }

        let result = self.engine.execute(command, &ExecutionOptions::unvalidated());
        if result.success {
            if result.output.is_empty() {
                "Command executed successfully".to_string()
            } else {
                result.output
            }
        } else {
            format_error(&result.error_message, "command execution")
        }
    }
}

/// Hex-prefixed, or starting with a hex digit: treated as an address.
fn looks_like_address(params: &str) -> bool {
    params.starts_with("0x")
        || params.starts_with("0X")
        || params
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_hexdigit())
}

fn parse_hex(text: &str) -> Result<u64, ()> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).map_err(|_| ())
}

fn is_command_safe(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    !SAFETY_DENYWORDS.iter().any(|word| lowered.contains(word))
}

fn format_error(error: &str, context: &str) -> String {
    let error = if error.is_empty() { "Unknown error" } else { error };
    if context.is_empty() {
        format!("Error: {error}")
    } else {
        format!("Error in {context}: {error}")
    }
}
