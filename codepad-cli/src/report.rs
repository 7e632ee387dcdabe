//! Machine-readable run reports.

use codepad_runtime::{DrawCommand, ErrorInfo, OutputItem, Sandbox};
use serde::Serialize;

pub const SCHEMA_VERSION: &str = "2026-10-codepad-v1";

/// Everything a `codepad run --json` caller gets back
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub schema_version: &'static str,
    pub variant: String,
    /// Virtual milliseconds elapsed since the sandbox was mounted
    pub elapsed_ms: u64,
    pub runs: u64,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub output: Vec<OutputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub canvas: Vec<DrawCommand>,
    pub live_timers: usize,
}

impl RunReport {
    pub fn collect(sandbox: &Sandbox, lines: Vec<String>, error: Option<ErrorInfo>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            variant: sandbox.variant().to_string(),
            elapsed_ms: sandbox.now().as_millis() as u64,
            runs: sandbox.runs(),
            lines,
            error,
            output: sandbox.output(),
            canvas: sandbox.canvas().commands().to_vec(),
            live_timers: sandbox.live_timers(),
        }
    }

    /// Text rendering: the projection, then the error line if any
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("✗ {error}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(lines: &[&str], error: Option<ErrorInfo>) -> RunReport {
        RunReport {
            schema_version: SCHEMA_VERSION,
            variant: "console".to_string(),
            elapsed_ms: 0,
            runs: 1,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            error,
            output: Vec::new(),
            canvas: Vec::new(),
            live_timers: 0,
        }
    }

    #[test]
    fn test_render_text_appends_error() {
        let error = ErrorInfo::at("bad", Some(1));
        let text = report(&["2", "Error: bad (line 1)"], Some(error)).render_text();
        assert_eq!(text, "2\nError: bad (line 1)\n✗ Error: bad (line 1)\n");
    }

    #[test]
    fn test_json_omits_empty_fields() {
        let json = serde_json::to_value(report(&["ok"], None)).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("canvas").is_none());
        assert_eq!(json["lines"][0], "ok");
    }
}
