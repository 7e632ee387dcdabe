//! Variant renderers
//!
//! Each variant builds its own capability surface and owns its own output
//! sink: a retained canvas, the data console, or a previewed page.

pub mod canvas;
pub mod console;
pub mod page;

pub use canvas::{Canvas, DrawCommand};
pub use page::{DocumentFrame, FrameError, MessagePort, ScriptFrame};
