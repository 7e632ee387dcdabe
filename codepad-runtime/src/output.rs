//! Output aggregation
//!
//! An append-only log of everything a run emits. Items are never edited or
//! removed except by an explicit clear. The host page does not see the items
//! themselves, only the flat string projection produced by [`OutputLog::lines`].

use chrono::{DateTime, Utc};
use codepad_types::{ErrorInfo, OutputKind};
use rquickjs::{Ctx, Value};
use serde::{Deserialize, Serialize};

/// Deepest array nesting captured from a JavaScript value
pub const MAX_CAPTURE_DEPTH: usize = 8;

/// Placeholder for objects that cannot be serialized
pub const OPAQUE_OBJECT: &str = "[object Object]";

/// Host-side snapshot of a JavaScript value, taken when it is emitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DataValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<DataValue>),
    /// JSON text of a plain object
    Object(String),
    /// Function name (empty for anonymous functions)
    Function(String),
    /// Anything else, already rendered
    Opaque(String),
}

impl DataValue {
    /// Capture a JavaScript value. Never throws: values that cannot be
    /// serialized become [`DataValue::Opaque`].
    pub fn capture<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Self {
        Self::capture_at(ctx, value, 0)
    }

    fn capture_at<'js>(ctx: &Ctx<'js>, value: &Value<'js>, depth: usize) -> Self {
        if value.is_undefined() {
            return DataValue::Undefined;
        }
        if value.is_null() {
            return DataValue::Null;
        }
        if let Some(b) = value.as_bool() {
            return DataValue::Bool(b);
        }
        if let Some(n) = value.as_number() {
            return DataValue::Number(n);
        }
        if let Some(s) = value.as_string() {
            return DataValue::String(s.to_string().unwrap_or_default());
        }
        if value.is_function() {
            let name = value
                .as_object()
                .and_then(|obj| obj.get::<_, Option<String>>("name").ok().flatten())
                .unwrap_or_default();
            return DataValue::Function(name);
        }
        if let Some(array) = value.as_array() {
            if depth >= MAX_CAPTURE_DEPTH {
                return DataValue::Opaque("[Array]".to_string());
            }
            let items = array
                .iter::<Value>()
                .map(|item| match item {
                    Ok(item) => Self::capture_at(ctx, &item, depth + 1),
                    Err(_) => DataValue::Opaque(OPAQUE_OBJECT.to_string()),
                })
                .collect();
            return DataValue::Array(items);
        }
        if let Some(exception) = value.as_exception() {
            let name = exception
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| "Error".to_string());
            let message = exception.message().unwrap_or_default();
            return DataValue::Opaque(format!("{name}: {message}"));
        }
        if value.is_object() {
            return match ctx.json_stringify(value.clone()) {
                Ok(Some(json)) => match json.to_string() {
                    Ok(json) => DataValue::Object(json),
                    Err(_) => DataValue::Opaque(OPAQUE_OBJECT.to_string()),
                },
                _ => {
                    // A failed stringify leaves the exception pending.
                    let _ = ctx.catch();
                    DataValue::Opaque(OPAQUE_OBJECT.to_string())
                }
            };
        }
        DataValue::Opaque(format!("[{:?}]", value.type_of()))
    }

    /// Flat rendering used in the host projection (strings unquoted)
    pub fn render(&self) -> String {
        format_data(self)
    }
}

/// Render a value the way the output projection shows it
pub fn format_data(value: &DataValue) -> String {
    match value {
        DataValue::String(s) => s.clone(),
        other => format_nested(other),
    }
}

/// Structured rendering: strings are quoted
fn format_nested(value: &DataValue) -> String {
    match value {
        DataValue::Undefined => "undefined".to_string(),
        DataValue::Null => "null".to_string(),
        DataValue::Bool(b) => b.to_string(),
        DataValue::Number(n) => format_number(*n),
        DataValue::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\"")),
        DataValue::Array(items) => {
            let rendered: Vec<String> = items.iter().map(format_nested).collect();
            format!("Array({}) [{}]", items.len(), rendered.join(", "))
        }
        DataValue::Object(json) => json.clone(),
        DataValue::Function(name) if name.is_empty() => "[Function (anonymous)]".to_string(),
        DataValue::Function(name) => format!("[Function: {name}]"),
        DataValue::Opaque(text) => text.clone(),
    }
}

/// Number rendering matching JavaScript's `String(n)`
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    // Shortest round-trip digits, e.g. "1.1805916207174113e21"
    let sci = format!("{:e}", n.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let point = exponent + 1;

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{sign}{}", exponent.unsigned_abs())
        } else {
            format!("{first}.{rest}e{sign}{}", exponent.unsigned_abs())
        }
    };

    if n < 0.0 {
        format!("-{body}")
    } else {
        body
    }
}

/// Payload of an output item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPayload {
    Value(DataValue),
    Error(ErrorInfo),
}

/// One entry in the output log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputItem {
    pub sequence_id: u64,
    pub kind: OutputKind,
    pub payload: OutputPayload,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
}

impl OutputItem {
    /// One line of the flat projection
    pub fn render(&self) -> String {
        match &self.payload {
            OutputPayload::Value(value) => format_data(value),
            OutputPayload::Error(info) => info.to_string(),
        }
    }
}

/// Sequential, append-only output log
#[derive(Debug)]
pub struct OutputLog {
    items: Vec<OutputItem>,
    next_sequence: u64,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            next_sequence: 1,
        }
    }

    fn push(&mut self, kind: OutputKind, payload: OutputPayload, source_line: Option<u32>) -> u64 {
        let sequence_id = self.next_sequence;
        self.next_sequence += 1;
        self.items.push(OutputItem {
            sequence_id,
            kind,
            payload,
            timestamp: Utc::now(),
            source_line,
        });
        sequence_id
    }

    /// Append a printed value
    pub fn push_value(&mut self, value: DataValue, source_line: Option<u32>) -> u64 {
        self.push(OutputKind::Log, OutputPayload::Value(value), source_line)
    }

    /// Append an error item
    pub fn push_error(&mut self, info: ErrorInfo) -> u64 {
        let line = info.line;
        self.push(OutputKind::Error, OutputPayload::Error(info), line)
    }

    pub fn items(&self) -> &[OutputItem] {
        &self.items
    }

    /// The flat projection handed to the host page
    pub fn lines(&self) -> Vec<String> {
        self.items.iter().map(OutputItem::render).collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &OutputItem> {
        self.items.iter().filter(|item| item.kind == OutputKind::Error)
    }

    /// Remove every item. The sequence counter keeps counting.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}
