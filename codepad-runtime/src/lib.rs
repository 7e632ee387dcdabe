//! Codepad Runtime - Sandboxed execution of learner JavaScript
//!
//! This crate runs small, frequently broken JavaScript programs written by
//! learners and reports what they did. It includes:
//!
//! - **Capability surfaces**: the exact set of free variables a program sees
//! - **Timer tracking**: run-scoped `setTimeout`/`setInterval` with bulk cancel
//! - **Execution host**: QuickJS-backed compile-and-invoke with resource limits
//! - **Line mapping**: learner line numbers recovered from engine stack traces
//! - **Output aggregation**: an ordered log with a flat string projection
//! - **Keyboard dispatch**: key handlers and held-key polling for the canvas
//!
//! ## Variants
//!
//! The same execution contract backs three output sinks:
//!
//! 1. **Canvas**: drawing primitives over a 400×400 grid plus keyboard input
//! 2. **Console**: `printData` and a `console` object feeding the output log
//! 3. **Page**: a whole HTML document loaded into an isolated frame, with
//!    console calls forwarded back over a message channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use codepad_runtime::{Recorder, RuntimeConfig, Sandbox, Variant};
//! use std::time::Duration;
//!
//! let recorder = Recorder::new();
//! let mut sandbox = Sandbox::new(Variant::Console, RuntimeConfig::default(), recorder.clone())?;
//!
//! sandbox.set_code("printData(1 + 1); console.error('bad')");
//! // The console variant waits for typing to settle
//! sandbox.advance(Duration::from_millis(500));
//!
//! assert_eq!(recorder.lines(), vec!["2", "Error: bad (line 1)"]);
//! assert_eq!(recorder.error().map(|e| e.message), Some("bad".to_string()));
//! # Ok::<(), codepad_runtime::RuntimeError>(())
//! ```
//!
//! ## Time
//!
//! Nothing here reads the wall clock to schedule work. Each sandbox owns a
//! virtual clock; [`Sandbox::advance`] moves it forward and fires whatever
//! became due, in due-time order. Hosts that want real time advance the
//! clock by the elapsed wall time.
//!
//! ## Safety
//!
//! This isolates against mistakes, not attackers. Every run executes with:
//!
//! - Memory limits (default: 16MB)
//! - A per-entry execution timeout (default: 5 seconds)
//! - A fresh global environment
//! - Nothing reachable outside its capability surface but the language builtins

pub mod abi;
pub mod config;
pub mod engine;
pub mod host;
pub mod keyboard;
pub mod lines;
pub mod output;
pub mod sandbox;
pub mod surface;
pub mod timers;
pub mod variant;

// Re-export main types
pub use abi::{CanvasSize, RuntimeError, RuntimeLimits, RuntimeResult};

pub use codepad_types::{ConsoleLevel, ErrorInfo, FrameMessage, OutputKind, Variant};

pub use config::{ConfigError, RuntimeConfig};

pub use engine::{ExecutionHost, ExecutionResult};

pub use keyboard::{Direction, KeyOutcome};

pub use lines::{LineMapper, WRAPPER_LINE_OFFSET};

pub use output::{format_data, DataValue, OutputItem, OutputLog, OutputPayload};

pub use sandbox::{NullObserver, Recorded, Recorder, Sandbox, SandboxObserver};

pub use surface::CapabilitySurface;

pub use timers::{TimerHandle, TimerKind, TrackedTimer};

pub use variant::{Canvas, DocumentFrame, DrawCommand, FrameError, MessagePort, ScriptFrame};

#[cfg(test)]
mod tests;
