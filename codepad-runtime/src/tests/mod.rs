//! Cross-module tests for codepad-runtime

#[cfg(test)]
mod integration_tests {
    use crate::{
        abi::{CanvasSize, RuntimeLimits},
        engine::{run_program, ExecutionHost, ExecutionResult},
        host::RunHost,
        lines::LineMapper,
        output::OutputPayload,
        timers::JsTimers,
        variant::{canvas, console},
    };
    use std::time::Duration;

    /// Run `source` through the given surface builder on a fresh engine and
    /// return the resulting host plus the execution result.
    fn execute(
        source: &str,
        build: for<'js> fn(
            &rquickjs::Ctx<'js>,
            &crate::host::SharedHost,
            &crate::timers::SharedTimers,
        ) -> rquickjs::Result<crate::surface::CapabilitySurface<'js>>,
    ) -> (crate::host::SharedHost, ExecutionResult) {
        let engine = ExecutionHost::new(&RuntimeLimits::default()).unwrap();
        let context = engine.new_context().unwrap();
        let host = RunHost::shared(CanvasSize::default(), LineMapper::default());
        let timers = JsTimers::shared();
        let result = engine.enter(|| {
            context.with(|ctx| {
                let surface = build(&ctx, &host, &timers).unwrap();
                run_program(&ctx, source, surface, &LineMapper::default())
            })
        });
        timers.borrow_mut().cancel_all();
        host.borrow_mut().dispose_run();
        (host, result)
    }

    #[test]
    fn test_error_line_tracks_source_line() {
        // Runtime error on each line of a ten-line snippet
        for target in 1..=10u32 {
            let source: String = (1..=10)
                .map(|line| {
                    if line == target {
                        "undefinedFn();\n".to_string()
                    } else {
                        format!("let v{line} = {line};\n")
                    }
                })
                .collect();
            let (_, result) = execute(&source, console::surface);
            let line = result.error().and_then(|e| e.line).unwrap();
            assert!(line >= 1);
            assert!(line.abs_diff(target) <= 1, "expected about {target}, got {line}");
        }
    }

    #[test]
    fn test_error_inside_nested_function_reports_throw_site() {
        let source = "function inner() {\n  return missing.value;\n}\n\ninner();\n";
        let (_, result) = execute(source, console::surface);
        let info = result.error().cloned().unwrap();
        assert!(info.line.unwrap().abs_diff(2) <= 1, "{info:?}");
    }

    #[test]
    fn test_print_lines_follow_call_sites() {
        let (host, result) = execute("printData('a');\n\n\nprintData('b');", console::surface);
        assert!(result.is_ok());
        let lines: Vec<u32> = host
            .borrow()
            .log
            .items()
            .iter()
            .filter_map(|item| item.source_line)
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].abs_diff(1) <= 1);
        assert!(lines[1].abs_diff(4) <= 1);
    }

    #[test]
    fn test_thrown_error_object_keeps_message() {
        let (_, result) = execute("throw { message: 'custom', code: 7 };", console::surface);
        assert_eq!(result.error().map(|e| e.message.as_str()), Some("custom"));

        let (_, result) = execute("throw 42;", console::surface);
        assert_eq!(result.error().map(|e| (e.message.as_str(), e.line)), Some(("42", None)));
    }

    #[test]
    fn test_canvas_surface_draws_and_tracks_timers() {
        let (host, result) = execute(
            "drawCircle(200, 200, 50, 'red');\ndrawText(10, 10, 'hi', 'black');\nclearCanvas();\ndrawLine(0, 0, 5, 5);",
            canvas::surface,
        );
        assert!(result.is_ok());
        let host = host.borrow();
        assert!(matches!(
            host.canvas.commands(),
            [canvas::DrawCommand::Line { color, .. }] if color == "black"
        ));
    }

    #[test]
    fn test_console_surface_hides_canvas_bindings() {
        let (_, result) = execute("drawPixel(0, 0);", console::surface);
        assert!(result.error().unwrap().message.contains("drawPixel"));
    }

    #[test]
    fn test_globals_do_not_leak_between_contexts() {
        let engine = ExecutionHost::new(&RuntimeLimits::default()).unwrap();
        let first = engine.new_context().unwrap();
        engine.enter(|| first.with(|ctx| ctx.eval::<(), _>("globalThis.leak = 1;").unwrap()));

        let second = engine.new_context().unwrap();
        let leaked: bool = engine.enter(|| {
            second.with(|ctx| ctx.eval("typeof leak !== 'undefined'").unwrap())
        });
        assert!(!leaked);
    }

    #[test]
    fn test_promise_jobs_run_after_entry() {
        let (host, result) = execute(
            "printData('sync');\nPromise.resolve().then(() => printData('micro'));",
            console::surface,
        );
        assert!(result.is_ok());
        assert_eq!(host.borrow().log.lines(), vec!["sync", "micro"]);
    }

    #[test]
    fn test_timer_callback_order_matches_schedule() {
        let engine = ExecutionHost::new(&RuntimeLimits::default()).unwrap();
        let context = engine.new_context().unwrap();
        let host = RunHost::shared(CanvasSize::default(), LineMapper::default());
        let timers = JsTimers::shared();
        engine.enter(|| {
            context.with(|ctx| {
                let surface = console::surface(&ctx, &host, &timers).unwrap();
                let source = "setTimeout(() => printData('C'), 20);\n\
                              setTimeout(() => printData('B'), 10);\n\
                              printData('A');";
                assert!(run_program(&ctx, source, surface, &LineMapper::default()).is_ok());
            })
        });

        loop {
            let fired = timers.borrow_mut().pop_due(Duration::from_millis(100));
            let Some(fired) = fired else { break };
            engine.enter(|| context.with(|ctx| fired.callback.invoke(&ctx).unwrap()));
        }

        let lines = host.borrow().log.lines();
        assert_eq!(lines, vec!["A", "B", "C"]);
        assert!(host
            .borrow()
            .log
            .items()
            .iter()
            .all(|item| matches!(item.payload, OutputPayload::Value(_))));
    }
}
