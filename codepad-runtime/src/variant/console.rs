//! Data-console variant
//!
//! `printData` and a `console`-shaped object feed the output log. Only the
//! listed safe globals are passed in as parameters; they shadow nothing and
//! exist so learner code reads the same as it would in a browser.

use crate::host::SharedHost;
use crate::lines::LineMapper;
use crate::output::{format_data, DataValue};
use crate::surface::{timer_bindings, CapabilitySurface};
use crate::timers::SharedTimers;
use codepad_types::ErrorInfo;
use rquickjs::prelude::{Opt, Rest};
use rquickjs::{Ctx, Function, Object, Value};

/// Prefix of `console.warn` output
pub const WARN_MARKER: &str = "Warning: ";

/// Globals handed to learner code by reference
pub const SAFE_GLOBALS: [&str; 11] = [
    "Math",
    "Date",
    "JSON",
    "Array",
    "Object",
    "String",
    "Number",
    "Boolean",
    "parseInt",
    "parseFloat",
    "isNaN",
];

/// Line of the learner statement that called the current host function
pub fn call_site_line(ctx: &Ctx<'_>, mapper: &LineMapper) -> Option<u32> {
    match ctx.eval::<Option<String>, _>("new Error().stack") {
        Ok(stack) => stack.and_then(|stack| mapper.call_site_line(&stack)),
        Err(_) => {
            let _ = ctx.catch();
            None
        }
    }
}

fn emit(ctx: &Ctx<'_>, host: &SharedHost, value: DataValue) {
    let mapper = host.borrow().mapper;
    let line = call_site_line(ctx, &mapper);
    host.borrow_mut().emit(value, line);
}

/// Flat renderings of `console` arguments joined with a space
fn join_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> String {
    args.iter()
        .map(|arg| format_data(&DataValue::capture(ctx, arg)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn console_value<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> DataValue {
    match args {
        [single] => DataValue::capture(ctx, single),
        _ => DataValue::String(join_args(ctx, args)),
    }
}

/// Build the data-console variant's capability surface
pub fn surface<'js>(
    ctx: &Ctx<'js>,
    host: &SharedHost,
    timers: &SharedTimers,
) -> rquickjs::Result<CapabilitySurface<'js>> {
    let mut surface = CapabilitySurface::new();

    let h = host.clone();
    surface.insert_function(ctx, "printData", move |ctx: Ctx<'js>, value: Opt<Value<'js>>| {
        let value = value
            .0
            .map(|v| DataValue::capture(&ctx, &v))
            .unwrap_or(DataValue::Undefined);
        emit(&ctx, &h, value);
    })?;

    let console = Object::new(ctx.clone())?;
    for name in ["log", "info", "debug"] {
        let h = host.clone();
        let method = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let value = console_value(&ctx, &args.0);
            emit(&ctx, &h, value);
        })?
        .with_name(name)?;
        console.set(name, method)?;
    }

    let h = host.clone();
    let warn = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        let value = DataValue::String(format!("{WARN_MARKER}{}", join_args(&ctx, &args.0)));
        emit(&ctx, &h, value);
    })?
    .with_name("warn")?;
    console.set("warn", warn)?;

    let h = host.clone();
    let error = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        let message = join_args(&ctx, &args.0);
        let mapper = h.borrow().mapper;
        let line = call_site_line(&ctx, &mapper);
        h.borrow_mut().report_error(ErrorInfo::at(message, line));
    })?
    .with_name("error")?;
    console.set("error", error)?;

    surface.insert("console", console.into_value());

    for name in SAFE_GLOBALS {
        surface.insert_global(ctx, name)?;
    }

    timer_bindings(ctx, &mut surface, timers)?;
    Ok(surface)
}
