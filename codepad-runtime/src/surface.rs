//! Capability surface builder
//!
//! A [`CapabilitySurface`] is the ordered set of names that appear as free
//! variables inside learner code. The variant modules build one per run; the
//! execution host turns its names into the wrapper's parameter list and its
//! values into the positional arguments.

use crate::timers::{delay_from_ms, JsCallback, SharedTimers, TimerHandle};
use rquickjs::function::IntoJsFunc;
use rquickjs::prelude::{Opt, Rest};
use rquickjs::{convert::Coerced, Ctx, Exception, Function, Persistent, Value};

/// Ordered binding name → value mapping for one run
pub struct CapabilitySurface<'js> {
    bindings: Vec<(&'static str, Value<'js>)>,
}

impl<'js> CapabilitySurface<'js> {
    pub fn new() -> Self {
        Self { bindings: Vec::new() }
    }

    /// Bind `name`, replacing an earlier binding of the same name in place
    pub fn insert(&mut self, name: &'static str, value: Value<'js>) {
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.bindings.push((name, value)),
        }
    }

    /// Bind a host function under `name`
    pub fn insert_function<F, P>(
        &mut self,
        ctx: &Ctx<'js>,
        name: &'static str,
        f: F,
    ) -> rquickjs::Result<()>
    where
        F: IntoJsFunc<'js, P> + 'js,
    {
        let function = Function::new(ctx.clone(), f)?.with_name(name)?;
        self.insert(name, function.into_value());
        Ok(())
    }

    /// Bind a global of the context (e.g. `Math`) under its own name
    pub fn insert_global(&mut self, ctx: &Ctx<'js>, name: &'static str) -> rquickjs::Result<()> {
        let value: Value<'js> = ctx.globals().get(name)?;
        self.insert(name, value);
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.bindings.iter().map(|(name, _)| *name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.iter().any(|(n, _)| *n == name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn into_bindings(self) -> Vec<(&'static str, Value<'js>)> {
        self.bindings
    }

    pub fn into_values(self) -> Vec<Value<'js>> {
        self.bindings.into_iter().map(|(_, value)| value).collect()
    }
}

impl<'js> Default for CapabilitySurface<'js> {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of every timer binding, in surface order
pub const TIMER_BINDINGS: [&str; 4] =
    ["setTimeout", "setInterval", "clearTimeout", "clearInterval"];

/// Add the run-tracked `setTimeout`/`setInterval`/`clear*` wrappers
pub fn timer_bindings<'js>(
    ctx: &Ctx<'js>,
    surface: &mut CapabilitySurface<'js>,
    timers: &SharedTimers,
) -> rquickjs::Result<()> {
    let t = timers.clone();
    surface.insert_function(
        ctx,
        "setTimeout",
        move |ctx: Ctx<'js>,
              callback: Value<'js>,
              delay: Opt<Coerced<f64>>,
              args: Rest<Value<'js>>| {
            let callback = save_callback(&ctx, "setTimeout", callback, args)?;
            let delay = delay_from_ms(delay.0.map(|d| d.0));
            Ok::<_, rquickjs::Error>(t.borrow_mut().set_timeout(delay, callback).0)
        },
    )?;

    let t = timers.clone();
    surface.insert_function(
        ctx,
        "setInterval",
        move |ctx: Ctx<'js>,
              callback: Value<'js>,
              period: Opt<Coerced<f64>>,
              args: Rest<Value<'js>>| {
            let callback = save_callback(&ctx, "setInterval", callback, args)?;
            let period = delay_from_ms(period.0.map(|d| d.0));
            Ok::<_, rquickjs::Error>(t.borrow_mut().set_interval(period, callback).0)
        },
    )?;

    for name in ["clearTimeout", "clearInterval"] {
        let t = timers.clone();
        surface.insert_function(ctx, name, move |handle: Opt<Value<'js>>| {
            if let Some(handle) = handle.0.as_ref().and_then(timer_handle) {
                t.borrow_mut().clear(handle);
            }
        })?;
    }
    Ok(())
}

fn save_callback<'js>(
    ctx: &Ctx<'js>,
    caller: &str,
    callback: Value<'js>,
    args: Rest<Value<'js>>,
) -> rquickjs::Result<JsCallback> {
    let Some(function) = callback.into_function() else {
        return Err(Exception::throw_type(ctx, &format!("{caller}: callback is not a function")));
    };
    Ok(JsCallback {
        function: Persistent::save(ctx, function),
        args: args.0.into_iter().map(|arg| Persistent::save(ctx, arg)).collect(),
    })
}

fn timer_handle(value: &Value<'_>) -> Option<TimerHandle> {
    let n = value.as_number()?;
    (n.is_finite() && n >= 1.0 && n <= f64::from(u32::MAX)).then(|| TimerHandle(n as u32))
}
