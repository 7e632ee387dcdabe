//! Page (iframe) variant
//!
//! The learner's source is a whole HTML document. After a structural check
//! a console shim is injected and the document is loaded into a
//! [`DocumentFrame`], the isolated browsing context. The frame talks back only
//! through a [`MessagePort`] carrying JSON text, which the host parses
//! defensively.
//!
//! [`ScriptFrame`] is the built-in frame: a separate QuickJS runtime per load
//! that runs the document's inline scripts against a small `window` stand-in.

use crate::abi::{RuntimeError, RuntimeLimits};
use crate::engine::{eval_options, normalize_error, ExecutionHost};
use crate::lines::LineMapper;
use crate::surface::{timer_bindings, CapabilitySurface};
use crate::timers::{JsTimers, SharedTimers};
use codepad_types::{ErrorInfo, FrameMessage};
use once_cell::sync::Lazy;
use regex::Regex;
use rquickjs::prelude::Opt;
use rquickjs::{CatchResultExt, Context, Ctx, Function, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Message reported when the document fails the structural check
pub const INVALID_DOCUMENT: &str = "Invalid HTML: document must include <!DOCTYPE html> or <html>";

/// Prefix of load failures
pub const LOAD_FAILURE: &str = "Failed to load preview";

/// Script injected into every previewed document. It replaces `console` with
/// forwarders that post `{type: "console", level, message}` to the parent.
pub const CONSOLE_SHIM: &str = r#"(function () {
  function describe(value) {
    if (value === null) return 'null';
    if (value === undefined) return 'undefined';
    var kind = typeof value;
    if (kind === 'string') return value;
    if (kind === 'number' || kind === 'boolean' || kind === 'bigint') return String(value);
    if (kind === 'symbol') return value.toString();
    if (kind === 'function') return '[Function' + (value.name ? ': ' + value.name : '') + ']';
    if (typeof Node !== 'undefined' && value instanceof Node) return '[' + (value.nodeName || 'Node') + ']';
    if (typeof Event !== 'undefined' && value instanceof Event) return '[Event ' + value.type + ']';
    try {
      var json = JSON.stringify(value);
      return json === undefined ? String(value) : json;
    } catch (e) {
      return '[object Object]';
    }
  }
  function forward(level, args) {
    var parts = [];
    for (var i = 0; i < args.length; i++) parts.push(describe(args[i]));
    try {
      window.parent.postMessage({ type: 'console', level: level, message: parts.join(' ') }, '*');
    } catch (e) {}
  }
  var original = window.console || {};
  var shim = {};
  var levels = { log: 'log', info: 'log', debug: 'debug', warn: 'warn', error: 'error' };
  Object.keys(levels).forEach(function (name) {
    shim[name] = function () {
      forward(levels[name], arguments);
      if (typeof original[name] === 'function') original[name].apply(original, arguments);
    };
  });
  window.console = shim;
  window.onerror = function (message, source, line) {
    forward('error', [line ? message + ' (line ' + line + ')' : message]);
    return true;
  };
})();"#;

/// Installs the `window` stand-in of a [`ScriptFrame`]. Called with the
/// global object and the native message poster.
const FRAME_BOOTSTRAP: &str = r#"(function (global, post) {
  var listeners = { DOMContentLoaded: [], load: [] };
  function listen(type, fn) {
    if (listeners[type] && typeof fn === 'function') listeners[type].push(fn);
  }
  function fail(e) {
    if (typeof global.onerror === 'function') {
      var message = e && e.message ? e.message : String(e);
      global.onerror(message, 'about:srcdoc', (e && e.lineNumber) || 0, 0, e);
    }
  }
  global.window = global;
  global.self = global;
  global.parent = {
    postMessage: function (data) { post(JSON.stringify(data)); }
  };
  global.top = global.parent;
  global.addEventListener = listen;
  global.removeEventListener = function () {};
  global.document = {
    readyState: 'loading',
    addEventListener: listen,
    removeEventListener: function () {},
    getElementById: function () { return null; },
    querySelector: function () { return null; },
    querySelectorAll: function () { return []; }
  };
  global.__codepad_fire__ = function (type) {
    global.document.readyState = type === 'load' ? 'complete' : 'interactive';
    var fns = listeners[type] || [];
    for (var i = 0; i < fns.length; i++) {
      try { fns[i].call(global, { type: type }); } catch (e) { fail(e); }
    }
  };
})"#;

static HEAD_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</head\s*>").expect("valid head regex"));
static BODY_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<body\b").expect("valid body regex"));
static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| {
        Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("valid script regex")
    });
static SRC_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsrc\s*=").expect("valid src regex"));
static TYPE_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\btype\s*=\s*["']?([^"'\s>]*)"#).expect("valid type regex"));

/// Minimal well-formedness check, run before anything executes
pub fn validate_document(source: &str) -> Result<(), ErrorInfo> {
    let lower = source.to_ascii_lowercase();
    if lower.contains("<html") || lower.contains("<!doctype") {
        Ok(())
    } else {
        Err(ErrorInfo::new(INVALID_DOCUMENT))
    }
}

/// Insert the console shim before `</head>`, else before `<body`, else at
/// the very start of the document
pub fn inject_console_shim(source: &str) -> String {
    let tag = format!("<script>{CONSOLE_SHIM}</script>");
    let at = HEAD_CLOSE_RE
        .find(source)
        .or_else(|| BODY_OPEN_RE.find(source))
        .map(|m| m.start())
        .unwrap_or(0);
    let mut document = String::with_capacity(source.len() + tag.len());
    document.push_str(&source[..at]);
    document.push_str(&tag);
    document.push_str(&source[at..]);
    document
}

/// Inline JavaScript blocks of a document, in document order
pub fn extract_scripts(document: &str) -> Vec<String> {
    SCRIPT_RE
        .captures_iter(document)
        .filter(|caps| {
            let attrs = &caps[1];
            if SRC_ATTR_RE.is_match(attrs) {
                return false;
            }
            match TYPE_ATTR_RE.captures(attrs) {
                Some(ty) => matches!(
                    ty[1].to_ascii_lowercase().as_str(),
                    ""
                        | "text/javascript"
                        | "application/javascript"
                        | "text/ecmascript"
                        | "application/ecmascript"
                ),
                None => true,
            }
        })
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Decode one raw cross-frame message. Anything that is not a console
/// message is rejected.
pub fn parse_message(raw: &str) -> Option<FrameMessage> {
    match serde_json::from_str::<FrameMessage>(raw) {
        Ok(FrameMessage::Unknown) => None,
        Ok(message) => Some(message),
        Err(err) => {
            tracing::debug!(%err, "undecodable frame message");
            None
        }
    }
}

/// Parent end of the cross-frame channel
#[derive(Debug, Clone, Default)]
pub struct MessagePort {
    queue: Rc<RefCell<VecDeque<String>>>,
}

impl MessagePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, message: impl Into<String>) {
        self.queue.borrow_mut().push_back(message.into());
    }

    /// Take every queued message in posting order
    pub fn drain(&self) -> Vec<String> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{0}")]
    Engine(#[from] RuntimeError),

    #[error("could not prepare document: {0}")]
    Bootstrap(String),

    #[error("{0}")]
    Refused(String),
}

/// An isolated browsing context for previewed documents
pub trait DocumentFrame {
    /// Load a document, replacing whatever was loaded before
    fn load(&mut self, document: &str, port: MessagePort) -> Result<(), FrameError>;

    /// Let `elapsed` of virtual time pass inside the frame
    fn advance(&mut self, elapsed: Duration);

    /// Tear the loaded document down
    fn unload(&mut self);

    /// Timers scheduled by the loaded document
    fn live_timers(&self) -> usize {
        0
    }
}

struct LoadedFrame {
    timers: SharedTimers,
    context: Context,
    engine: ExecutionHost,
}

impl LoadedFrame {
    /// Run one entry into the document's code; uncaught errors go to `onerror`
    fn enter<F>(&self, f: F)
    where
        F: for<'js> FnOnce(&Ctx<'js>) -> rquickjs::Result<()>,
    {
        let mapper = LineMapper::new(0);
        let failure = self.engine.enter(|| {
            self.context.with(|ctx| {
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
            self.report_uncaught(info);
        }
        for info in self.engine.take_rejections() {
            self.report_uncaught(info);
        }
    }

    fn report_uncaught(&self, info: ErrorInfo) {
        let handled = self.engine.enter(|| {
            self.context.with(|ctx| {
                let handler = ctx.globals().get::<_, Option<Function>>("onerror").ok().flatten();
                match handler {
                    Some(handler) => handler
                        .call::<_, Value>((
                            info.message.as_str(),
                            "about:srcdoc",
                            info.line.unwrap_or(0),
                            0,
                        ))
                        .catch(&ctx)
                        .is_ok(),
                    None => false,
                }
            })
        });
        if !handled {
            tracing::debug!(error = %info, "uncaught error in preview");
        }
    }
}

impl Drop for LoadedFrame {
    fn drop(&mut self) {
        self.timers.borrow_mut().cancel_all();
    }
}

/// Built-in frame running inline scripts on its own QuickJS runtime
pub struct ScriptFrame {
    limits: RuntimeLimits,
    loaded: Option<LoadedFrame>,
}

impl ScriptFrame {
    pub fn new(limits: RuntimeLimits) -> Self {
        Self { limits, loaded: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }
}

impl Default for ScriptFrame {
    fn default() -> Self {
        Self::new(RuntimeLimits::default())
    }
}

fn install_window<'js>(
    ctx: &Ctx<'js>,
    timers: &SharedTimers,
    port: &MessagePort,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let mut surface = CapabilitySurface::new();
    timer_bindings(ctx, &mut surface, timers)?;
    for (name, value) in surface.into_bindings() {
        globals.set(name, value)?;
    }

    let port = port.clone();
    let post = Function::new(ctx.clone(), move |data: Opt<Value<'js>>| {
        if let Some(text) = data.0.and_then(|v| v.as_string().and_then(|s| s.to_string().ok())) {
            port.post(text);
        }
    })?
    .with_name("postMessage")?;

    let bootstrap: Function = ctx.eval_with_options(FRAME_BOOTSTRAP, eval_options())?;
    bootstrap.call::<_, ()>((globals, post))
}

impl DocumentFrame for ScriptFrame {
    fn load(&mut self, document: &str, port: MessagePort) -> Result<(), FrameError> {
        self.unload();

        let engine = ExecutionHost::new(&self.limits)?.with_line_mapper(LineMapper::new(0));
        let context = engine.new_context()?;
        let timers = JsTimers::shared();
        context
            .with(|ctx| {
                install_window(&ctx, &timers, &port)
                    .catch(&ctx)
                    .map_err(|err| err.to_string())
            })
            .map_err(FrameError::Bootstrap)?;

        let frame = LoadedFrame {
            timers,
            context,
            engine,
        };
        let scripts = extract_scripts(document);
        tracing::debug!(scripts = scripts.len(), "loading preview document");
        for script in &scripts {
            frame.enter(|ctx| ctx.eval_with_options::<(), _>(script.as_str(), eval_options()));
        }
        for event in ["DOMContentLoaded", "load"] {
            frame.enter(|ctx| {
                let fire: Function = ctx.globals().get("__codepad_fire__")?;
                fire.call::<_, ()>((event,))
            });
        }

        self.loaded = Some(frame);
        Ok(())
    }

    fn advance(&mut self, elapsed: Duration) {
        let Some(frame) = &self.loaded else {
            return;
        };
        let target = frame.timers.borrow().queue.now() + elapsed;
        loop {
            let fired = frame.timers.borrow_mut().pop_due(target);
            let Some(fired) = fired else {
                break;
            };
            frame.enter(|ctx| fired.callback.invoke(ctx));
        }
        frame.timers.borrow_mut().queue.set_now(target);
    }

    fn unload(&mut self) {
        if self.loaded.take().is_some() {
            tracing::debug!("preview document unloaded");
        }
    }

    fn live_timers(&self) -> usize {
        self.loaded.as_ref().map_or(0, |frame| frame.timers.borrow().live())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codepad_types::ConsoleLevel;

    #[test]
    fn test_validation() {
        assert!(validate_document("<!DOCTYPE html><p>x</p>").is_ok());
        assert!(validate_document("<HTML><body></body></HTML>").is_ok());
        assert_eq!(
            validate_document("<div>no doctype</div>").unwrap_err().message,
            INVALID_DOCUMENT
        );
    }

    #[test]
    fn test_shim_goes_before_head_close() {
        let doc = inject_console_shim("<html><head><title>t</title></HEAD><body></body></html>");
        let shim = doc.find("<script>").unwrap();
        assert!(shim < doc.find("</HEAD>").unwrap());
        assert!(doc.find("<title>").unwrap() < shim);
    }

    #[test]
    fn test_shim_falls_back_to_body_then_prepend() {
        let doc = inject_console_shim("<html><body><p>x</p></body></html>");
        assert!(doc.find("<script>").unwrap() < doc.find("<body>").unwrap());

        let doc = inject_console_shim("<!doctype html><p>x</p>");
        assert!(doc.starts_with("<script>"));
    }

    #[test]
    fn test_extract_scripts_skips_external_and_data_blocks() {
        let doc = r#"<script>a()</script>
<script src="lib.js"></script>
<script type="application/json">{"x":1}</script>
<SCRIPT type="text/javascript">b()</SCRIPT>"#;
        assert_eq!(extract_scripts(doc), vec!["a()", "b()"]);
    }

    #[test]
    fn test_parse_message_is_defensive() {
        assert_eq!(
            parse_message(r#"{"type":"console","level":"warn","message":"hi"}"#),
            Some(FrameMessage::Console {
                level: ConsoleLevel::Warn,
                message: "hi".into()
            })
        );
        assert_eq!(parse_message(r#"{"type":"resize","height":10}"#), None);
        assert_eq!(parse_message(r#"{"type":"console","level":"shout","message":"x"}"#), None);
        assert_eq!(parse_message(r#""just text""#), None);
        assert_eq!(parse_message("not json"), None);
    }

    fn load(source: &str) -> (ScriptFrame, MessagePort) {
        let mut frame = ScriptFrame::default();
        let port = MessagePort::new();
        frame.load(&inject_console_shim(source), port.clone()).unwrap();
        (frame, port)
    }

    fn console_messages(port: &MessagePort) -> Vec<(ConsoleLevel, String)> {
        port.drain()
            .iter()
            .filter_map(|raw| match parse_message(raw) {
                Some(FrameMessage::Console { level, message }) => Some((level, message)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_script_frame_forwards_console() {
        let (_frame, port) = load(
            "<!DOCTYPE html><html><head></head><body><script>console.log('hi', [1, 2]); console.warn({a: 1});</script></body></html>",
        );
        assert_eq!(
            console_messages(&port),
            vec![
                (ConsoleLevel::Log, "hi [1,2]".to_string()),
                (ConsoleLevel::Warn, r#"{"a":1}"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_script_frame_reports_uncaught_errors() {
        let (_frame, port) = load(
            "<html><body><script>missing();</script>\
             <script>console.log('after');</script></body></html>",
        );
        let messages = console_messages(&port);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, ConsoleLevel::Error);
        assert!(messages[0].1.contains("not defined"), "{}", messages[0].1);
        assert_eq!(messages[1], (ConsoleLevel::Log, "after".to_string()));
    }

    #[test]
    fn test_script_frame_timers_and_unload() {
        let (mut frame, port) = load(
            "<html><body><script>setInterval(function () { console.log('tick'); }, 100);</script></body></html>",
        );
        frame.advance(Duration::from_millis(250));
        assert_eq!(console_messages(&port).len(), 2);
        assert_eq!(frame.live_timers(), 1);

        frame.unload();
        assert!(!frame.is_loaded());
        frame.advance(Duration::from_millis(1000));
        assert!(port.is_empty());
    }

    #[test]
    fn test_dom_content_loaded_listeners_run() {
        let (_frame, port) = load(
            "<html><body><script>document.addEventListener('DOMContentLoaded', function () { console.debug(document.readyState); });</script></body></html>",
        );
        assert_eq!(
            console_messages(&port),
            vec![(ConsoleLevel::Debug, "interactive".to_string())]
        );
    }
}
