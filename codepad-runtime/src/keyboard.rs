//! Keyboard dispatch for the canvas variant
//!
//! Held keys are tracked for the sandbox's whole mounted lifetime, since they
//! mirror the physical keyboard rather than program state. Handlers belong to
//! a run. Each category holds at most one live handler: registering a new one
//! replaces the previous one instead of stacking listeners across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Normalized arrow-key direction passed to `onArrowKeys` callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Map a `KeyboardEvent.key` value to a direction
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowUp" => Some(Direction::Up),
            "ArrowDown" => Some(Direction::Down),
            "ArrowLeft" => Some(Direction::Left),
            "ArrowRight" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// Whether a key value is the spacebar
pub fn is_space_key(key: &str) -> bool {
    matches!(key, " " | "Spacebar" | "Space")
}

/// Set of currently depressed keys
#[derive(Debug, Default, Clone)]
pub struct KeyState {
    held: BTreeSet<String>,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, key: &str) {
        self.held.insert(key.to_string());
    }

    pub fn release(&mut self, key: &str) {
        self.held.remove(key);
    }

    pub fn is_pressed(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    pub fn held(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}

/// Live key handlers of the current run, one per category
#[derive(Debug, Clone)]
pub struct KeyBindings<C> {
    pub key_press: Option<C>,
    pub arrow_keys: Option<C>,
    pub space_bar: Option<C>,
}

impl<C> KeyBindings<C> {
    pub fn new() -> Self {
        Self {
            key_press: None,
            arrow_keys: None,
            space_bar: None,
        }
    }

    /// Replace the `onKeyPress` handler, returning the previous one
    pub fn set_key_press(&mut self, callback: C) -> Option<C> {
        self.key_press.replace(callback)
    }

    /// Replace the `onArrowKeys` handler, returning the previous one
    pub fn set_arrow_keys(&mut self, callback: C) -> Option<C> {
        self.arrow_keys.replace(callback)
    }

    /// Replace the `onSpaceBar` handler, returning the previous one
    pub fn set_space_bar(&mut self, callback: C) -> Option<C> {
        self.space_bar.replace(callback)
    }

    pub fn is_empty(&self) -> bool {
        self.key_press.is_none() && self.arrow_keys.is_none() && self.space_bar.is_none()
    }

    pub fn clear(&mut self) {
        self.key_press = None;
        self.arrow_keys = None;
        self.space_bar = None;
    }
}

impl<C> Default for KeyBindings<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of delivering a key-down event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyOutcome {
    /// A handler called `preventDefault`
    pub default_prevented: bool,
    /// Number of handlers invoked
    pub handled: usize,
}
