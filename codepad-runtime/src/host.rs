//! Host-side state reachable from capability functions
//!
//! Every binding handed to user code closes over one shared [`RunHost`]. It
//! holds the output log, the current error, the drawing surface and the
//! keyboard state of a mounted sandbox.

use crate::abi::CanvasSize;
use crate::keyboard::{KeyBindings, KeyState};
use crate::lines::LineMapper;
use crate::output::{DataValue, OutputLog};
use crate::variant::canvas::Canvas;
use codepad_types::ErrorInfo;
use rquickjs::{Function, Persistent};
use std::cell::RefCell;
use std::rc::Rc;

/// Key handler saved across `Context::with` scopes
pub type KeyCallback = Persistent<Function<'static>>;

/// State shared between the sandbox and the host functions of its runs
pub struct RunHost {
    pub log: OutputLog,
    pub error: Option<ErrorInfo>,
    pub canvas: Canvas,
    pub keys: KeyState,
    pub bindings: KeyBindings<KeyCallback>,
    pub mapper: LineMapper,
}

pub type SharedHost = Rc<RefCell<RunHost>>;

impl RunHost {
    pub fn new(canvas: CanvasSize, mapper: LineMapper) -> Self {
        Self {
            log: OutputLog::new(),
            error: None,
            canvas: Canvas::new(canvas),
            keys: KeyState::new(),
            bindings: KeyBindings::new(),
            mapper,
        }
    }

    pub fn shared(canvas: CanvasSize, mapper: LineMapper) -> SharedHost {
        Rc::new(RefCell::new(Self::new(canvas, mapper)))
    }

    /// Append a printed value
    pub fn emit(&mut self, value: DataValue, line: Option<u32>) {
        self.log.push_value(value, line);
    }

    /// Append an error item and make it the current error
    pub fn report_error(&mut self, info: ErrorInfo) {
        self.log.push_error(info.clone());
        self.error = Some(info);
    }

    /// Append an error item without touching the current error
    pub fn log_error(&mut self, info: ErrorInfo) {
        self.log.push_error(info);
    }

    /// Reset everything a new run must not inherit. Held keys survive.
    pub fn reset_for_run(&mut self) {
        self.log.clear();
        self.error = None;
        self.canvas.clear();
        self.bindings.clear();
    }

    /// Drop the run's key handlers
    pub fn dispose_run(&mut self) {
        self.bindings.clear();
    }
}
