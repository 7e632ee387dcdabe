//! Shared types for codepad
//!
//! This crate provides the data that crosses the sandbox boundary: the error
//! info handed to the host page, output kinds, the variant selector, and the
//! cross-frame message schema used by the page preview.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error surfaced to the host page (drives inline editor highlighting)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at(message: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// Kind of an output log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Log,
    Error,
}

/// The three output sinks sharing one execution contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// 2D drawing canvas with keyboard input
    Canvas,
    /// Structured data console
    Console,
    /// Full HTML document preview in an isolated frame
    Page,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Canvas => "canvas",
            Variant::Console => "console",
            Variant::Page => "page",
        }
    }

    /// Whether a code change is debounced before re-running
    pub fn is_debounced(&self) -> bool {
        matches!(self, Variant::Console)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "canvas" => Ok(Variant::Canvas),
            "console" | "data" => Ok(Variant::Console),
            "page" | "iframe" | "html" => Ok(Variant::Page),
            other => Err(format!("unknown variant: {other}")),
        }
    }
}

/// Console level forwarded from a page preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
    Debug,
}

/// Message posted from the sandboxed document to its parent
///
/// Only `{type: "console", level, message}` carries meaning; every other
/// `type` decodes to [`FrameMessage::Unknown`] and is ignored by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameMessage {
    Console { level: ConsoleLevel, message: String },
    #[serde(other)]
    Unknown,
}
