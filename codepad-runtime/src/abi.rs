//! Runtime limits and error types
//!
//! Types shared by the execution host, the variant renderers and the
//! sandbox instance.

use serde::{Deserialize, Serialize};

/// Logical size of the drawing surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self {
            width: 400,
            height: 400,
        }
    }
}

/// Runtime limits for JavaScript execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Maximum heap in bytes (default: 16MB)
    pub max_memory: usize,
    /// Maximum native stack used by the engine in bytes (default: 512KB)
    pub max_stack_size: usize,
    /// Maximum time for one synchronous entry into user code (default: 5000ms)
    pub max_execution_time_ms: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_memory: 16 * 1024 * 1024, // 16MB
            max_stack_size: 512 * 1024,   // 512KB
            max_execution_time_ms: 5000,  // 5 seconds
        }
    }
}

/// Error types for runtime operations
///
/// These are host failures. Failures of the learner's program never become a
/// `RuntimeError`; they are converted to `ErrorInfo` at the sandbox boundary.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("JavaScript engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
