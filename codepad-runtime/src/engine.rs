//! QuickJS execution host
//!
//! This module owns the embedded JavaScript runtime. It compiles learner
//! source as the body of a function whose parameters are exactly the names of
//! the capability surface, invokes it once with the surface values, and
//! normalizes whatever was thrown into an [`ErrorInfo`].

use crate::abi::{RuntimeLimits, RuntimeResult};
use crate::lines::LineMapper;
use crate::output::{format_data, DataValue};
use crate::surface::CapabilitySurface;
use codepad_types::ErrorInfo;
use parking_lot::Mutex;
use rquickjs::context::EvalOptions;
use rquickjs::prelude::Rest;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the synthesized wrapper function
pub const WRAPPER_NAME: &str = "__codepad_program__";

/// Upper bound on promise jobs drained after one entry into user code
const MAX_JOBS_PER_ENTRY: usize = 100_000;

/// Property tagging a rejected promise until a handler shows up
const REJECTION_KEY: &str = "__codepad_rejection__";

/// Outcome of one synchronous entry into user code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Ok,
    Failed(ErrorInfo),
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionResult::Ok)
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            ExecutionResult::Ok => None,
            ExecutionResult::Failed(info) => Some(info),
        }
    }
}

/// Deadline checked by the engine's interrupt handler
#[derive(Debug, Default)]
struct Watchdog {
    deadline: Mutex<Option<Instant>>,
    tripped: AtomicBool,
}

impl Watchdog {
    fn should_interrupt(&self) -> bool {
        let expired = matches!(*self.deadline.lock(), Some(deadline) if Instant::now() >= deadline);
        if expired {
            self.tripped.store(true, Ordering::SeqCst);
        }
        expired
    }

    fn arm(&self, budget: Duration) {
        self.tripped.store(false, Ordering::SeqCst);
        *self.deadline.lock() = Some(Instant::now() + budget);
    }

    fn disarm(&self) {
        *self.deadline.lock() = None;
    }
}

/// Promise rejections without a handler, collected during one entry
#[derive(Debug, Default)]
struct Rejections {
    mapper: LineMapper,
    next_id: u32,
    pending: Vec<(u32, ErrorInfo)>,
}

/// Embedded JavaScript runtime with resource limits
///
/// One host exists per mounted sandbox (and one per loaded page frame). Each
/// run gets its own [`Context`] so globals never leak from one run to the next.
pub struct ExecutionHost {
    runtime: Runtime,
    watchdog: Arc<Watchdog>,
    rejections: Arc<Mutex<Rejections>>,
    limits: RuntimeLimits,
}

impl ExecutionHost {
    /// Create a runtime with memory, stack and time limits applied
    pub fn new(limits: &RuntimeLimits) -> RuntimeResult<Self> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(limits.max_memory);
        runtime.set_max_stack_size(limits.max_stack_size);

        let watchdog = Arc::new(Watchdog::default());
        let handler = Arc::clone(&watchdog);
        runtime.set_interrupt_handler(Some(Box::new(move || handler.should_interrupt())));

        let rejections = Arc::new(Mutex::new(Rejections::default()));
        let tracker = Arc::clone(&rejections);
        runtime.set_host_promise_rejection_tracker(Some(Box::new(
            move |ctx, promise, reason, is_handled| {
                track_rejection(&tracker, &ctx, &promise, &reason, is_handled);
            },
        )));

        Ok(Self {
            runtime,
            watchdog,
            rejections,
            limits: limits.clone(),
        })
    }

    /// Line mapping applied to unhandled promise rejections
    pub fn with_line_mapper(self, mapper: LineMapper) -> Self {
        self.rejections.lock().mapper = mapper;
        self
    }

    /// Unhandled rejections from the last entry, oldest first
    pub fn take_rejections(&self) -> Vec<ErrorInfo> {
        self.rejections
            .lock()
            .pending
            .drain(..)
            .map(|(_, info)| info)
            .collect()
    }

    /// Fresh global environment for one run
    pub fn new_context(&self) -> RuntimeResult<Context> {
        Ok(Context::full(&self.runtime)?)
    }

    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    /// Run one synchronous entry into user code under the execution-time
    /// budget, then drain the promise jobs it queued.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        self.rejections.lock().pending.clear();
        self.watchdog
            .arm(Duration::from_millis(self.limits.max_execution_time_ms));
        let result = f();
        self.drain_jobs();
        self.watchdog.disarm();
        result
    }

    /// Whether the last entry was interrupted by the deadline
    pub fn timed_out(&self) -> bool {
        self.watchdog.tripped.load(Ordering::SeqCst)
    }

    /// Error reported for an interrupted entry
    pub fn timeout_error(&self) -> ErrorInfo {
        ErrorInfo::new(format!(
            "Execution timed out after {} ms",
            self.limits.max_execution_time_ms
        ))
    }

    fn drain_jobs(&self) -> usize {
        let mut ran = 0;
        while ran < MAX_JOBS_PER_ENTRY {
            match self.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(_) => {
                    tracing::warn!("promise job raised an exception");
                    ran += 1;
                }
            }
        }
        ran
    }
}

/// Engine hook for promise rejections. A rejection is pending until a
/// handler is attached to the same promise within the entry.
fn track_rejection<'js>(
    rejections: &Mutex<Rejections>,
    ctx: &Ctx<'js>,
    promise: &Value<'js>,
    reason: &Value<'js>,
    is_handled: bool,
) {
    let Some(promise) = promise.as_object() else {
        return;
    };
    if is_handled {
        if let Ok(Some(id)) = promise.get::<_, Option<u32>>(REJECTION_KEY) {
            rejections.lock().pending.retain(|(pending, _)| *pending != id);
        }
        return;
    }

    // Normalizing can run user getters, so the lock is not held meanwhile
    let mapper = rejections.lock().mapper;
    let info = match reason.as_exception() {
        Some(exception) => normalize_error(ctx, CaughtError::Exception(exception.clone()), &mapper),
        None => error_from_value(ctx, reason, &mapper),
    };
    let id = {
        let mut rejections = rejections.lock();
        let id = rejections.next_id;
        rejections.next_id = rejections.next_id.wrapping_add(1);
        rejections.pending.push((id, info));
        id
    };
    if promise.set(REJECTION_KEY, id).is_err() {
        let _ = ctx.catch();
    }
}

/// Evaluation options for learner code: sloppy mode, like `new Function`
pub fn eval_options() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.strict = false;
    options
}

/// Source of the wrapper function around the learner's program
pub fn wrap_source(names: &[&str], source: &str) -> String {
    format!(
        "(function {WRAPPER_NAME}({}) {{\n{source}\n}})",
        names.join(", ")
    )
}

/// Compile `source` against the surface and invoke it once
pub fn run_program<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    surface: CapabilitySurface<'js>,
    mapper: &LineMapper,
) -> ExecutionResult {
    let wrapped = wrap_source(&surface.names(), source);
    let result = ctx
        .eval_with_options::<Function, _>(wrapped, eval_options())
        .and_then(|program| program.call::<_, ()>((Rest(surface.into_values()),)));

    match result.catch(ctx) {
        Ok(()) => ExecutionResult::Ok,
        Err(err) => ExecutionResult::Failed(normalize_error(ctx, err, mapper)),
    }
}

/// Normalize anything thrown into `{message, line?}`
pub fn normalize_error<'js>(
    ctx: &Ctx<'js>,
    err: CaughtError<'js>,
    mapper: &LineMapper,
) -> ErrorInfo {
    match err {
        CaughtError::Exception(exception) => {
            let message = exception
                .message()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Unknown error".to_string());
            let line = exception
                .stack()
                .and_then(|stack| mapper.thrown_line(&stack))
                .or_else(|| {
                    exception
                        .get::<_, Option<i32>>("lineNumber")
                        .ok()
                        .flatten()
                        .map(|line| mapper.map_engine_line(i64::from(line)))
                });
            ErrorInfo::at(message, line)
        }
        CaughtError::Value(value) => error_from_value(ctx, &value, mapper),
        CaughtError::Error(err) => ErrorInfo::new(err.to_string()),
    }
}

/// A thrown non-Error value: Error-like objects keep their message and
/// stack, everything else becomes its string form without a line.
fn error_from_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>, mapper: &LineMapper) -> ErrorInfo {
    if let Some(obj) = value.as_object() {
        if let Ok(Some(message)) = obj.get::<_, Option<String>>("message") {
            let line = obj
                .get::<_, Option<String>>("stack")
                .ok()
                .flatten()
                .and_then(|stack| mapper.thrown_line(&stack));
            return ErrorInfo::at(message, line);
        }
    }
    ErrorInfo::new(format_data(&DataValue::capture(ctx, value)))
}
