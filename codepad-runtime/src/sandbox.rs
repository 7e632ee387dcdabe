//! Sandbox instance
//!
//! A [`Sandbox`] is one mounted sandbox component and the owner of every
//! resource whose lifetime is tied to it: the engine, the timer queue, the
//! held-key set and the output log. Runs come and go underneath it.
//!
//! Two teardown levels exist. [`Sandbox::dispose_run`] ends the current run
//! (timers, key handlers, page frame and JavaScript context) and is invoked
//! before every new run. [`Sandbox::dispose`] additionally forgets held keys
//! and refuses any further run; it is also performed on drop.

use crate::abi::RuntimeResult;
use crate::config::RuntimeConfig;
use crate::engine::{normalize_error, run_program, ExecutionHost, ExecutionResult};
use crate::host::{KeyCallback, RunHost, SharedHost};
use crate::keyboard::{is_space_key, Direction, KeyOutcome};
use crate::lines::LineMapper;
use crate::output::{DataValue, OutputItem};
use crate::timers::{JsTimers, SharedTimers};
use crate::variant::console::WARN_MARKER;
use crate::variant::page::{self, DocumentFrame, MessagePort, ScriptFrame, LOAD_FAILURE};
use crate::variant::{canvas, console, Canvas};
use codepad_types::{ConsoleLevel, ErrorInfo, FrameMessage, Variant};
use rquickjs::{CatchResultExt, Context, Ctx, Function};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// Receives the `onOutput`/`onError` notifications of a sandbox
pub trait SandboxObserver {
    fn on_output(&mut self, lines: &[String]);
    fn on_error(&mut self, error: Option<&ErrorInfo>);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SandboxObserver for NullObserver {
    fn on_output(&mut self, _lines: &[String]) {}
    fn on_error(&mut self, _error: Option<&ErrorInfo>) {}
}

/// What a [`Recorder`] has been told so far
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub lines: Vec<String>,
    pub error: Option<ErrorInfo>,
    pub output_calls: usize,
    pub error_calls: usize,
    /// Every projection delivered, oldest first
    pub history: Vec<Vec<String>>,
}

/// Observer that records notifications; clones share the record
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    inner: Rc<RefCell<Recorded>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Recorded {
        self.inner.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.inner.borrow().lines.clone()
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.inner.borrow().error.clone()
    }

    pub fn output_calls(&self) -> usize {
        self.inner.borrow().output_calls
    }

    pub fn error_calls(&self) -> usize {
        self.inner.borrow().error_calls
    }
}

impl SandboxObserver for Recorder {
    fn on_output(&mut self, lines: &[String]) {
        let mut inner = self.inner.borrow_mut();
        inner.lines = lines.to_vec();
        inner.history.push(lines.to_vec());
        inner.output_calls += 1;
    }

    fn on_error(&mut self, error: Option<&ErrorInfo>) {
        let mut inner = self.inner.borrow_mut();
        inner.error = error.cloned();
        inner.error_calls += 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRun {
    due: Duration,
}

/// First argument handed to a key callback
enum KeyArg {
    Key(String),
    Direction(Direction),
    None,
}

/// One mounted sandbox
pub struct Sandbox {
    variant: Variant,
    config: RuntimeConfig,
    observer: Box<dyn SandboxObserver>,
    code: Option<String>,
    pending: Option<PendingRun>,
    runs: u64,
    disposed: bool,
    notified_lines: Option<Vec<String>>,
    notified_error: Option<Option<ErrorInfo>>,
    document: Option<String>,
    port: MessagePort,
    frame: Option<Box<dyn DocumentFrame>>,
    run: Option<Context>,
    host: SharedHost,
    timers: SharedTimers,
    engine: ExecutionHost,
}

impl Sandbox {
    /// Mount a sandbox. The page variant gets a [`ScriptFrame`].
    pub fn new(
        variant: Variant,
        config: RuntimeConfig,
        observer: impl SandboxObserver + 'static,
    ) -> RuntimeResult<Self> {
        let frame: Option<Box<dyn DocumentFrame>> = match variant {
            Variant::Page => Some(Box::new(ScriptFrame::new(config.limits.clone()))),
            _ => None,
        };
        Self::mount(variant, config, Box::new(observer), frame)
    }

    /// Mount a page sandbox that loads documents into `frame`
    pub fn with_frame(
        config: RuntimeConfig,
        observer: impl SandboxObserver + 'static,
        frame: impl DocumentFrame + 'static,
    ) -> RuntimeResult<Self> {
        Self::mount(Variant::Page, config, Box::new(observer), Some(Box::new(frame)))
    }

    fn mount(
        variant: Variant,
        config: RuntimeConfig,
        observer: Box<dyn SandboxObserver>,
        frame: Option<Box<dyn DocumentFrame>>,
    ) -> RuntimeResult<Self> {
        let mapper = LineMapper::new(config.line_offset);
        let engine = ExecutionHost::new(&config.limits)?.with_line_mapper(mapper);
        let host = RunHost::shared(config.canvas, LineMapper::new(config.line_offset));
        tracing::debug!(%variant, "sandbox mounted");
        Ok(Self {
            variant,
            config,
            observer,
            code: None,
            pending: None,
            runs: 0,
            disposed: false,
            notified_lines: None,
            notified_error: None,
            document: None,
            port: MessagePort::new(),
            frame,
            run: None,
            host,
            timers: JsTimers::shared(),
            engine,
        })
    }

    /// The code prop changed
    pub fn set_code(&mut self, code: impl Into<String>) {
        if self.disposed {
            tracing::warn!("ignoring code change on a disposed sandbox");
            return;
        }
        let code = code.into();
        if self.code.as_deref() == Some(code.as_str()) {
            return;
        }
        self.code = Some(code);

        if self.variant.is_debounced() {
            self.dispose_run();
            let due = self.now() + self.config.debounce();
            self.pending = Some(PendingRun { due });
            tracing::debug!(due_ms = due.as_millis() as u64, "run scheduled");
        } else {
            self.pending = None;
            self.start_run();
        }
    }

    /// Run the current code now, flushing a pending debounced run
    pub fn rerun(&mut self) {
        if self.disposed {
            return;
        }
        self.pending = None;
        self.start_run();
    }

    /// Let `dt` of virtual time pass: due timers fire in order and a pending
    /// debounced run starts at its due time.
    pub fn advance(&mut self, dt: Duration) {
        if self.disposed {
            return;
        }
        let target = self.now() + dt;
        loop {
            let next_timer = self.timers.borrow().queue.next_due().filter(|due| *due <= target);
            let next_run = self.pending.map(|p| p.due).filter(|due| *due <= target);
            match (next_timer, next_run) {
                (Some(timer), run) if run.map_or(true, |run| timer <= run) => {
                    self.fire_timer(target);
                    self.notify(false);
                }
                (_, Some(run)) => {
                    self.timers.borrow_mut().queue.set_now(run);
                    self.pending = None;
                    self.start_run();
                }
                _ => break,
            }
        }
        self.timers.borrow_mut().queue.set_now(target);

        if let Some(frame) = self.frame.as_mut() {
            frame.advance(dt);
            self.drain_frame_messages();
        }
        self.notify(false);
    }

    /// Native key-down event
    pub fn key_down(&mut self, key: &str) -> KeyOutcome {
        let mut outcome = KeyOutcome::default();
        if self.disposed {
            return outcome;
        }
        self.host.borrow_mut().keys.press(key);
        if self.variant != Variant::Canvas {
            return outcome;
        }

        let handlers: Vec<(KeyCallback, KeyArg)> = {
            let host = self.host.borrow();
            let bindings = &host.bindings;
            let mut handlers = Vec::new();
            if let Some(callback) = &bindings.key_press {
                handlers.push((callback.clone(), KeyArg::Key(key.to_string())));
            }
            if let (Some(callback), Some(direction)) =
                (&bindings.arrow_keys, Direction::from_key(key))
            {
                handlers.push((callback.clone(), KeyArg::Direction(direction)));
            }
            if let Some(callback) = bindings.space_bar.as_ref().filter(|_| is_space_key(key)) {
                handlers.push((callback.clone(), KeyArg::None));
            }
            handlers
        };

        for (callback, arg) in handlers {
            let prevented = Rc::new(Cell::new(false));
            let flag = prevented.clone();
            self.enter_run(move |ctx| {
                let function = callback.restore(ctx)?;
                let prevent = Function::new(ctx.clone(), move || flag.set(true))?
                    .with_name("preventDefault")?;
                match arg {
                    KeyArg::Key(key) => function.call::<_, ()>((key, prevent)),
                    KeyArg::Direction(direction) => {
                        function.call::<_, ()>((direction.as_str(), prevent))
                    }
                    KeyArg::None => function.call::<_, ()>((prevent,)),
                }
            });
            outcome.handled += 1;
            outcome.default_prevented |= prevented.get();
        }

        self.notify(false);
        outcome
    }

    /// Native key-up event
    pub fn key_up(&mut self, key: &str) {
        self.host.borrow_mut().keys.release(key);
    }

    /// User-triggered clear of the output log
    pub fn clear_output(&mut self) {
        self.host.borrow_mut().log.clear();
        self.notify(false);
    }

    /// End the current run: cancel its timers, drop its key handlers, unload
    /// the page and drop the JavaScript context. Held keys are kept.
    pub fn dispose_run(&mut self) {
        let cancelled = self.timers.borrow_mut().cancel_all();
        self.host.borrow_mut().dispose_run();
        if let Some(frame) = self.frame.as_mut() {
            frame.unload();
        }
        self.port.drain();
        self.document = None;
        if self.run.take().is_some() || cancelled > 0 {
            tracing::debug!(cancelled, "run disposed");
        }
    }

    /// Teardown. No run starts afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.dispose_run();
        self.pending = None;
        self.host.borrow_mut().keys.clear();
        self.disposed = true;
        tracing::debug!(runs = self.runs, "sandbox disposed");
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn has_pending_run(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of runs started since mount
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn output(&self) -> Vec<OutputItem> {
        self.host.borrow().log.items().to_vec()
    }

    /// The flat projection handed to `onOutput`
    pub fn lines(&self) -> Vec<String> {
        self.host.borrow().log.lines()
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.host.borrow().error.clone()
    }

    pub fn canvas(&self) -> Canvas {
        self.host.borrow().canvas.clone()
    }

    /// The document handed to the page frame, console shim included
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// Live timers of the current run, including those inside a page frame
    pub fn live_timers(&self) -> usize {
        let frame = self.frame.as_ref().map_or(0, |frame| frame.live_timers());
        self.timers.borrow().live() + frame
    }

    pub fn held_keys(&self) -> Vec<String> {
        self.host.borrow().keys.held().map(str::to_string).collect()
    }

    /// Virtual time since mount
    pub fn now(&self) -> Duration {
        self.timers.borrow().queue.now()
    }

    fn start_run(&mut self) {
        let Some(code) = self.code.clone() else {
            return;
        };
        self.dispose_run();
        self.host.borrow_mut().reset_for_run();
        self.runs += 1;
        tracing::debug!(variant = %self.variant, run = self.runs, "run started");

        match self.variant {
            Variant::Page => self.load_page(&code),
            Variant::Canvas | Variant::Console => self.run_script(&code),
        }

        tracing::debug!(
            run = self.runs,
            items = self.host.borrow().log.len(),
            timers = self.live_timers(),
            failed = self.host.borrow().error.is_some(),
            "run finished"
        );
        self.notify(true);
    }

    fn run_script(&mut self, code: &str) {
        let context = match self.engine.new_context() {
            Ok(context) => context,
            Err(err) => {
                self.host.borrow_mut().report_error(ErrorInfo::new(err.to_string()));
                return;
            }
        };

        let (host, timers, variant) = (&self.host, &self.timers, self.variant);
        let mapper = host.borrow().mapper;
        let result = self.engine.enter(|| {
            context.with(|ctx| {
                let surface = match variant {
                    Variant::Canvas => canvas::surface(&ctx, host, timers),
                    _ => console::surface(&ctx, host, timers),
                };
                match surface {
                    Ok(surface) => run_program(&ctx, code, surface, &mapper),
                    Err(err) => ExecutionResult::Failed(ErrorInfo::new(err.to_string())),
                }
            })
        });
        let result = if self.engine.timed_out() {
            ExecutionResult::Failed(self.engine.timeout_error())
        } else {
            result
        };

        if let ExecutionResult::Failed(info) = result {
            self.host.borrow_mut().report_error(info);
        }
        self.report_rejections();
        self.run = Some(context);
    }

    fn load_page(&mut self, code: &str) {
        if let Err(info) = page::validate_document(code) {
            self.host.borrow_mut().report_error(info);
            return;
        }
        let document = page::inject_console_shim(code);
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        if let Err(err) = frame.load(&document, self.port.clone()) {
            tracing::warn!(%err, "preview failed to load");
            self.host
                .borrow_mut()
                .report_error(ErrorInfo::new(format!("{LOAD_FAILURE}: {err}")));
        }
        self.document = Some(document);
        self.drain_frame_messages();
    }

    fn drain_frame_messages(&mut self) {
        for raw in self.port.drain() {
            let Some(FrameMessage::Console { level, message }) = page::parse_message(&raw) else {
                tracing::debug!(raw = %raw, "ignoring frame message");
                continue;
            };
            let mut host = self.host.borrow_mut();
            match level {
                ConsoleLevel::Log | ConsoleLevel::Debug => {
                    host.emit(DataValue::String(message), None)
                }
                ConsoleLevel::Warn => {
                    host.emit(DataValue::String(format!("{WARN_MARKER}{message}")), None)
                }
                ConsoleLevel::Error => host.log_error(ErrorInfo::new(message)),
            }
        }
    }

    fn fire_timer(&mut self, until: Duration) {
        let fired = self.timers.borrow_mut().pop_due(until);
        if let Some(fired) = fired {
            self.enter_run(|ctx| fired.callback.invoke(ctx));
        }
    }

    /// Deferred entry into the current run. Whatever it throws is reported
    /// and goes no further.
    fn enter_run<F>(&self, f: F)
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()>,
    {
        let Some(context) = &self.run else {
            return;
        };
        let mapper = self.host.borrow().mapper;
        let failure = self.engine.enter(|| {
            context.with(|ctx| {
                f(&ctx)
                    .catch(&ctx)
                    .err()
                    .map(|err| normalize_error(&ctx, err, &mapper))
            })
        });
        let failure = if self.engine.timed_out() {
            Some(self.engine.timeout_error())
        } else {
            failure
        };
        if let Some(info) = failure {
            self.host.borrow_mut().report_error(info);
        }
        self.report_rejections();
    }

    /// Promises rejected without a handler during the last entry
    fn report_rejections(&self) {
        for info in self.engine.take_rejections() {
            self.host.borrow_mut().report_error(info);
        }
    }

    /// Tell the observer about changes; `force` reports both values as-is
    fn notify(&mut self, force: bool) {
        let (lines, error) = {
            let host = self.host.borrow();
            (host.log.lines(), host.error.clone())
        };
        if force || self.notified_lines.as_ref() != Some(&lines) {
            self.observer.on_output(&lines);
            self.notified_lines = Some(lines);
        }
        if force || self.notified_error.as_ref() != Some(&error) {
            self.observer.on_error(error.as_ref());
            self.notified_error = Some(error);
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.dispose();
    }
}
