//! VibeDbg, an in-process bridge between a native Windows debugger and an
//! out-of-process AI assistant.
//!
//! The assistant connects over a local pipe and sends framed JSON commands;
//! the extension validates and routes them, executes them against the live
//! debugger through the [`debugger::DebuggerAdapter`] seam, captures the
//! textual output and replies with a structured response.
//!
//! Subsystems, leaves first: [`handle`] (owned OS handles), [`debugger`]
//! (adapter seam and output capture), [`session`] (session state store),
//! [`protocol`] (wire codec), [`engine`] (command execution and routing),
//! [`server`] (pipe server), [`extension`] (controller and host commands).

pub mod debugger;
pub mod engine;
pub mod extension;
pub mod handle;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod version;
