//! Canvas variant
//!
//! The drawing surface is a retained display list over a fixed logical grid
//! with `(0, 0)` at the top-left. Rectangles and pixels anchor at their
//! top-left corner, circles at their center. Colors are passed through
//! unvalidated, exactly as a 2D context would receive them.

use crate::abi::CanvasSize;
use crate::host::SharedHost;
use crate::surface::{timer_bindings, CapabilitySurface};
use crate::timers::SharedTimers;
use rquickjs::prelude::Opt;
use rquickjs::{convert::Coerced, Ctx, Function, Persistent};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

const DEFAULT_COLOR: &str = "black";

/// One drawing primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DrawCommand {
    Pixel { x: f64, y: f64, color: String },
    Circle { cx: f64, cy: f64, r: f64, color: String },
    Line { x1: f64, y1: f64, x2: f64, y2: f64, color: String },
    Rect { x: f64, y: f64, w: f64, h: f64, color: String },
    Text { x: f64, y: f64, text: String, color: String },
}

impl DrawCommand {
    /// Commands with non-finite geometry draw nothing, like a 2D context
    fn is_drawable(&self) -> bool {
        let finite = |coords: &[f64]| coords.iter().all(|c| c.is_finite());
        match self {
            DrawCommand::Pixel { x, y, .. } | DrawCommand::Text { x, y, .. } => finite(&[*x, *y]),
            DrawCommand::Circle { cx, cy, r, .. } => finite(&[*cx, *cy, *r]),
            DrawCommand::Line { x1, y1, x2, y2, .. } => finite(&[*x1, *y1, *x2, *y2]),
            DrawCommand::Rect { x, y, w, h, .. } => finite(&[*x, *y, *w, *h]),
        }
    }
}

/// Retained drawing surface owned by the active run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Canvas {
    pub size: CanvasSize,
    commands: Vec<DrawCommand>,
}

impl Canvas {
    pub fn new(size: CanvasSize) -> Self {
        Self {
            size,
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    /// `clearCanvas` semantics: the surface is blank again
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn is_blank(&self) -> bool {
        self.commands.is_empty()
    }

    /// Render the display list as a standalone SVG document
    pub fn to_svg(&self) -> String {
        let CanvasSize { width, height } = self.size;
        let mut svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">\n"
        );
        let _ = writeln!(svg, "  <rect width=\"{width}\" height=\"{height}\" fill=\"white\"/>");

        for command in self.commands.iter().filter(|c| c.is_drawable()) {
            let _ = match command {
                DrawCommand::Pixel { x, y, color } => writeln!(
                    svg,
                    "  <rect x=\"{x}\" y=\"{y}\" width=\"1\" height=\"1\" fill=\"{}\"/>",
                    escape(color)
                ),
                DrawCommand::Circle { cx, cy, r, color } => writeln!(
                    svg,
                    "  <circle cx=\"{cx}\" cy=\"{cy}\" r=\"{}\" fill=\"{}\"/>",
                    r.abs(),
                    escape(color)
                ),
                DrawCommand::Line { x1, y1, x2, y2, color } => writeln!(
                    svg,
                    "  <line x1=\"{x1}\" y1=\"{y1}\" x2=\"{x2}\" y2=\"{y2}\" stroke=\"{}\"/>",
                    escape(color)
                ),
                DrawCommand::Rect { x, y, w, h, color } => {
                    // Negative extents grow up/left from the anchor.
                    let (x, w) = if *w < 0.0 { (x + w, -w) } else { (*x, *w) };
                    let (y, h) = if *h < 0.0 { (y + h, -h) } else { (*y, *h) };
                    writeln!(
                        svg,
                        "  <rect x=\"{x}\" y=\"{y}\" width=\"{w}\" height=\"{h}\" fill=\"{}\"/>",
                        escape(color)
                    )
                }
                DrawCommand::Text { x, y, text, color } => writeln!(
                    svg,
                    "  <text x=\"{x}\" y=\"{y}\" fill=\"{}\" dominant-baseline=\"hanging\">{}</text>",
                    escape(color),
                    escape(text)
                ),
            };
        }
        svg.push_str("</svg>\n");
        svg
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn num(value: Opt<Coerced<f64>>) -> f64 {
    value.0.map(|c| c.0).unwrap_or(f64::NAN)
}

fn color(value: Opt<Coerced<String>>) -> String {
    value.0.map(|c| c.0).unwrap_or_else(|| DEFAULT_COLOR.to_string())
}

/// Build the canvas variant's capability surface
pub fn surface<'js>(
    ctx: &Ctx<'js>,
    host: &SharedHost,
    timers: &SharedTimers,
) -> rquickjs::Result<CapabilitySurface<'js>> {
    let mut surface = CapabilitySurface::new();

    let h = host.clone();
    surface.insert_function(
        ctx,
        "drawPixel",
        move |x: Opt<Coerced<f64>>, y: Opt<Coerced<f64>>, c: Opt<Coerced<String>>| {
            h.borrow_mut().canvas.push(DrawCommand::Pixel {
                x: num(x),
                y: num(y),
                color: color(c),
            });
        },
    )?;

    let h = host.clone();
    surface.insert_function(
        ctx,
        "drawCircle",
        move |cx: Opt<Coerced<f64>>,
              cy: Opt<Coerced<f64>>,
              r: Opt<Coerced<f64>>,
              c: Opt<Coerced<String>>| {
            h.borrow_mut().canvas.push(DrawCommand::Circle {
                cx: num(cx),
                cy: num(cy),
                r: num(r),
                color: color(c),
            });
        },
    )?;

    let h = host.clone();
    surface.insert_function(
        ctx,
        "drawLine",
        move |x1: Opt<Coerced<f64>>,
              y1: Opt<Coerced<f64>>,
              x2: Opt<Coerced<f64>>,
              y2: Opt<Coerced<f64>>,
              c: Opt<Coerced<String>>| {
            h.borrow_mut().canvas.push(DrawCommand::Line {
                x1: num(x1),
                y1: num(y1),
                x2: num(x2),
                y2: num(y2),
                color: color(c),
            });
        },
    )?;

    let h = host.clone();
    surface.insert_function(
        ctx,
        "drawRect",
        move |x: Opt<Coerced<f64>>,
              y: Opt<Coerced<f64>>,
              w: Opt<Coerced<f64>>,
              hgt: Opt<Coerced<f64>>,
              c: Opt<Coerced<String>>| {
            h.borrow_mut().canvas.push(DrawCommand::Rect {
                x: num(x),
                y: num(y),
                w: num(w),
                h: num(hgt),
                color: color(c),
            });
        },
    )?;

    let h = host.clone();
    surface.insert_function(
        ctx,
        "drawText",
        move |x: Opt<Coerced<f64>>,
              y: Opt<Coerced<f64>>,
              text: Opt<Coerced<String>>,
              c: Opt<Coerced<String>>| {
            h.borrow_mut().canvas.push(DrawCommand::Text {
                x: num(x),
                y: num(y),
                text: text.0.map(|t| t.0).unwrap_or_else(|| "undefined".to_string()),
                color: color(c),
            });
        },
    )?;

    let h = host.clone();
    surface.insert_function(ctx, "clearCanvas", move || h.borrow_mut().canvas.clear())?;

    let h = host.clone();
    surface.insert_function(ctx, "onKeyPress", move |ctx: Ctx<'js>, callback: Function<'js>| {
        h.borrow_mut().bindings.set_key_press(Persistent::save(&ctx, callback));
    })?;

    let h = host.clone();
    surface.insert_function(ctx, "onArrowKeys", move |ctx: Ctx<'js>, callback: Function<'js>| {
        h.borrow_mut().bindings.set_arrow_keys(Persistent::save(&ctx, callback));
    })?;

    let h = host.clone();
    surface.insert_function(ctx, "onSpaceBar", move |ctx: Ctx<'js>, callback: Function<'js>| {
        h.borrow_mut().bindings.set_space_bar(Persistent::save(&ctx, callback));
    })?;

    let h = host.clone();
    surface.insert_function(ctx, "isKeyPressed", move |key: Opt<Coerced<String>>| {
        key.0.is_some_and(|key| h.borrow().keys.is_pressed(&key.0))
    })?;

    timer_bindings(ctx, &mut surface, timers)?;
    Ok(surface)
}
