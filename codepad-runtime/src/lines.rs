//! Line mapping
//!
//! Learner code is compiled as the body of a synthesized wrapper function, so
//! engine line numbers are shifted by the wrapper header. The mapper parses
//! QuickJS stack text, picks the relevant frame and subtracts the offset.
//!
//! Stack lines look like one of:
//!
//! ```text
//!     at undefinedFn (eval_script:4)
//!     at <anonymous> (eval_script:4:9)
//!     at printData (native)
//!     at eval_script:3
//! ```
//!
//! The mapping is best-effort: the offset is a tunable constant checked by
//! tests, not an exact contract.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lines added by the wrapper template before the learner's first line
pub const WRAPPER_LINE_OFFSET: u32 = 1;

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*at\s+(?:(?P<func>.*?)\s+\((?P<loc>[^()]*)\)|(?P<bare>\S+))\s*$")
        .expect("valid frame regex")
});

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>.*?):(?P<line>\d+)(?::(?P<col>\d+))?$").expect("valid location regex")
});

/// One parsed stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub native: bool,
}

/// Parse the frames of a stack trace, innermost first
pub fn parse_stack(stack: &str) -> Vec<StackFrame> {
    stack.lines().filter_map(parse_frame).collect()
}

fn parse_frame(line: &str) -> Option<StackFrame> {
    let caps = FRAME_RE.captures(line)?;
    let function = caps.name("func").map(|m| m.as_str().to_string());
    let location = caps
        .name("loc")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default();

    if location == "native" {
        return Some(StackFrame {
            function,
            file: None,
            line: None,
            column: None,
            native: true,
        });
    }

    let (file, line, column) = match LOCATION_RE.captures(location) {
        Some(loc) => (
            Some(loc["file"].to_string()),
            loc["line"].parse().ok(),
            loc.name("col").and_then(|c| c.as_str().parse().ok()),
        ),
        None => (Some(location.to_string()), None, None),
    };

    Some(StackFrame {
        function,
        file,
        line,
        column,
        native: false,
    })
}

/// Recovers learner-facing line numbers from engine positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMapper {
    offset: u32,
}

impl LineMapper {
    pub fn new(offset: u32) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Map an engine line to a 1-based learner line
    pub fn map_engine_line(&self, line: i64) -> u32 {
        let mapped = line - i64::from(self.offset);
        mapped.clamp(1, i64::from(u32::MAX)) as u32
    }

    /// Line of a thrown exception: the innermost frame with a position
    pub fn thrown_line(&self, stack: &str) -> Option<u32> {
        parse_stack(stack)
            .into_iter()
            .find_map(|frame| frame.line)
            .map(|line| self.map_engine_line(i64::from(line)))
    }

    /// Line of a host-function call site, from a stack captured inside the
    /// host function. Everything up to and including the first native frame
    /// (the host function itself) is skipped; without a native frame the
    /// capturing frame is skipped instead.
    pub fn call_site_line(&self, stack: &str) -> Option<u32> {
        let frames = parse_stack(stack);
        let caller = match frames.iter().position(|f| f.native) {
            Some(native) => frames[native + 1..].iter().find_map(|f| f.line),
            None => frames.iter().filter_map(|f| f.line).nth(1),
        };
        caller.map(|line| self.map_engine_line(i64::from(line)))
    }
}

impl Default for LineMapper {
    fn default() -> Self {
        Self::new(WRAPPER_LINE_OFFSET)
    }
}
