//! End-to-end tests for mounted sandboxes

use codepad_runtime::{
    format_data, DataValue, DocumentFrame, ErrorInfo, FrameError, MessagePort, OutputKind, Recorder,
    RuntimeConfig, Sandbox, Variant,
};
use std::time::Duration;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn mount(variant: Variant) -> (Sandbox, Recorder) {
    let recorder = Recorder::new();
    let sandbox = Sandbox::new(variant, RuntimeConfig::default(), recorder.clone()).unwrap();
    (sandbox, recorder)
}

/// Set code on a console sandbox and let the debounce elapse
fn run_console(sandbox: &mut Sandbox, code: &str) {
    sandbox.set_code(code);
    sandbox.advance(ms(500));
}

#[test]
fn test_canvas_clean_run_reports_no_error() {
    let (mut sandbox, recorder) = mount(Variant::Canvas);
    sandbox.set_code("drawCircle(200,200,50,'red'); drawText(10,10,'hi','black');");

    assert_eq!(recorder.error_calls(), 1);
    assert_eq!(recorder.error(), None);
    assert!(recorder.lines().is_empty());
    assert_eq!(sandbox.canvas().commands().len(), 2);
}

#[test]
fn test_console_print_and_error() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(&mut sandbox, "printData(1+1); console.error('bad')");

    let items = sandbox.output();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].kind, OutputKind::Log);
    assert_eq!(recorder.lines()[0], "2");
    assert_eq!(items[1].kind, OutputKind::Error);
    assert!(recorder.lines()[1].contains("bad"));
    assert_eq!(recorder.error().map(|e| e.message), Some("bad".to_string()));
}

#[test]
fn test_undefined_function_line() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(&mut sandbox, "let a = 1;\nlet b = a + 1;\nundefinedFn();\nprintData(b);\n");

    let error = recorder.error().unwrap();
    assert!(
        error.message.contains("not defined") || error.message.contains("not a function"),
        "{}",
        error.message
    );
    let line = error.line.unwrap();
    assert!(line >= 1);
    assert!(line.abs_diff(3) <= 1, "line {line}");
}

#[test]
fn test_code_change_stops_old_interval() {
    let ticks = |lines: &[String]| lines.iter().filter(|l| *l == "tick").count();

    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(&mut sandbox, "setInterval(() => printData('tick'), 10)");
    sandbox.advance(ms(1000));
    assert!(ticks(&recorder.lines()) >= 90);

    sandbox.set_code("printData('once')");
    assert_eq!(sandbox.live_timers(), 0);
    let ticks_at_change = ticks(&recorder.lines());
    let seen = recorder.snapshot().history.len();
    sandbox.advance(ms(2000));

    assert_eq!(recorder.lines(), vec!["once"]);
    let history = recorder.snapshot().history;
    assert!(history[seen..].iter().all(|lines| ticks(lines) <= ticks_at_change));
    assert_eq!(sandbox.live_timers(), 0);
}

#[test]
fn test_page_without_doctype_is_rejected() {
    let (mut sandbox, recorder) = mount(Variant::Page);
    sandbox.set_code("<div>no doctype</div>");

    assert_eq!(
        recorder.error(),
        Some(ErrorInfo::new(
            "Invalid HTML: document must include <!DOCTYPE html> or <html>"
        ))
    );
    assert_eq!(recorder.lines().len(), 1);
    assert!(sandbox.document().is_none());
}

#[test]
fn test_arrow_keys_deliver_direction_once_per_event() {
    let (mut sandbox, recorder) = mount(Variant::Canvas);
    sandbox.set_code(
        "let count = 0;\n\
         onArrowKeys(function (direction, preventDefault) {\n\
           count += 1;\n\
           drawText(0, count, direction + ':' + count);\n\
           preventDefault();\n\
         });",
    );

    let outcome = sandbox.key_down("ArrowUp");
    assert_eq!(outcome.handled, 1);
    assert!(outcome.default_prevented);
    sandbox.key_up("ArrowUp");

    let texts: Vec<String> = sandbox
        .canvas()
        .commands()
        .iter()
        .filter_map(|c| match c {
            codepad_runtime::DrawCommand::Text { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["up:1"]);

    assert_eq!(sandbox.key_down("w").handled, 0);
    assert_eq!(recorder.error(), None);
}

#[test]
fn test_only_latest_runs_timers_survive() {
    let (mut sandbox, _) = mount(Variant::Canvas);
    for n in 1..=5 {
        let code = format!(
            "for (let i = 0; i < {n}; i++) setInterval(() => drawPixel(i, i), 10);\nsetTimeout(() => {{}}, 1000); // run {n}"
        );
        sandbox.set_code(code);
        sandbox.advance(ms(35));
    }
    assert_eq!(sandbox.live_timers(), 5 + 1);
}

#[test]
fn test_async_output_keeps_order() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "printData('A');\nprintData('B');\nsetTimeout(() => printData('C'), 50);",
    );
    assert_eq!(recorder.lines(), vec!["A", "B"]);

    sandbox.advance(ms(50));
    assert_eq!(recorder.lines(), vec!["A", "B", "C"]);
    let ids: Vec<u64> = sandbox.output().iter().map(|i| i.sequence_id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_failing_callback_is_isolated() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "printData('before');\n\
         setTimeout(() => { throw new Error('late'); }, 10);\n\
         setInterval(() => printData('alive'), 25);",
    );
    sandbox.advance(ms(60));

    let lines = recorder.lines();
    assert_eq!(lines[0], "before");
    assert!(lines.iter().any(|l| l.starts_with("Error: late")));
    assert_eq!(lines.iter().filter(|l| *l == "alive").count(), 2);
    assert_eq!(recorder.error().map(|e| e.message), Some("late".to_string()));

    // The sandbox still accepts and runs new code
    run_console(&mut sandbox, "printData('next')");
    assert_eq!(recorder.lines(), vec!["next"]);
    assert_eq!(recorder.error(), None);
}

#[test]
fn test_failing_key_handler_is_isolated() {
    let (mut sandbox, recorder) = mount(Variant::Canvas);
    sandbox.set_code(
        "onKeyPress(function (key) {\n  if (key === 'x') nope();\n  drawPixel(1, 1);\n});",
    );

    sandbox.key_down("x");
    assert!(recorder.error().unwrap().message.contains("nope"));
    sandbox.key_down("y");
    assert_eq!(sandbox.canvas().commands().len(), 1);
}

#[test]
fn test_identical_reruns_produce_identical_output() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "printData([1, 'two', { three: 3 }]);\nconsole.warn('w');\nconsole.error('e');",
    );
    let first = recorder.lines();

    sandbox.rerun();
    let second = recorder.lines();
    assert_eq!(first, second);
    assert_eq!(second.len(), 3);
    assert_eq!(second[1], "Warning: w");
}

#[test]
fn test_format_data_is_stable() {
    let (mut sandbox, _) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "printData({a: 1, b: [1, 2, 'x', null]});\nprintData([1, 2, 'x', null]);",
    );
    let items = sandbox.output();
    let render = |i: usize| match &items[i].payload {
        codepad_runtime::OutputPayload::Value(v) => format_data(v),
        other => panic!("unexpected payload {other:?}"),
    };

    assert_eq!(render(0), render(0));
    assert_eq!(render(0), r#"{"a":1,"b":[1,2,"x",null]}"#);
    insta::assert_snapshot!(render(1), @r#"Array(4) [1, 2, "x", null]"#);
    assert_eq!(
        format_data(&DataValue::Array(vec![DataValue::Array(vec![DataValue::Null])])),
        "Array(1) [Array(1) [null]]"
    );
}

#[test]
fn test_page_console_forwarding() {
    let (mut sandbox, recorder) = mount(Variant::Page);
    sandbox.set_code(
        "<!DOCTYPE html><html><head><title>p</title></head><body>\n\
         <script>console.log('hello', 1); console.warn('careful'); console.error('broken');</script>\n\
         <script>setTimeout(function () { console.debug('later'); }, 100);</script>\n\
         </body></html>",
    );
    assert_eq!(recorder.lines(), vec!["hello 1", "Warning: careful", "Error: broken"]);
    assert_eq!(recorder.error(), None);
    assert!(sandbox.document().unwrap().contains("window.parent.postMessage"));

    sandbox.advance(ms(100));
    assert_eq!(recorder.lines().last().map(String::as_str), Some("later"));
}

#[test]
fn test_page_reload_discards_previous_document() {
    let (mut sandbox, recorder) = mount(Variant::Page);
    sandbox.set_code(
        "<html><body><script>\
         setInterval(function () { console.log('old'); }, 10);\
         </script></body></html>",
    );
    sandbox.advance(ms(30));
    assert_eq!(recorder.lines().len(), 3);

    sandbox.set_code("<html><body><script>console.log('new');</script></body></html>");
    sandbox.advance(ms(100));
    assert_eq!(recorder.lines(), vec!["new"]);
}

struct UnreachableFrame;

impl DocumentFrame for UnreachableFrame {
    fn load(&mut self, _document: &str, _port: MessagePort) -> Result<(), FrameError> {
        Err(FrameError::Refused("network unreachable".to_string()))
    }

    fn advance(&mut self, _elapsed: Duration) {}

    fn unload(&mut self) {}
}

#[test]
fn test_page_load_failure() {
    let recorder = Recorder::new();
    let mut sandbox =
        Sandbox::with_frame(RuntimeConfig::default(), recorder.clone(), UnreachableFrame).unwrap();
    sandbox.set_code("<!doctype html><p>hi</p>");

    assert_eq!(
        recorder.error(),
        Some(ErrorInfo::new("Failed to load preview: network unreachable"))
    );
    assert_eq!(recorder.lines(), vec!["Error: Failed to load preview: network unreachable"]);
}

#[test]
fn test_drop_disposes_everything() {
    let recorder = Recorder::new();
    {
        let mut sandbox =
            Sandbox::new(Variant::Canvas, RuntimeConfig::default(), recorder.clone()).unwrap();
        sandbox.set_code("setInterval(() => drawPixel(0, 0), 1); onKeyPress(() => {});");
        sandbox.advance(ms(10));
    }
    assert_eq!(recorder.error(), None);
}

#[test]
fn test_async_callback_failure_is_reported() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "printData('before');\nsetTimeout(async () => {\n  undefinedFn();\n}, 10);",
    );
    sandbox.advance(ms(100));

    let lines = recorder.lines();
    assert_eq!(lines[0], "before");
    assert!(lines.iter().any(|l| l.contains("undefinedFn")), "{lines:?}");
    let error = recorder.error().unwrap();
    assert!(error.message.contains("undefinedFn"), "{error:?}");
    assert!(error.line.unwrap().abs_diff(3) <= 1, "{error:?}");
}

#[test]
fn test_async_key_handler_failure_is_reported() {
    let (mut sandbox, recorder) = mount(Variant::Canvas);
    sandbox.set_code(
        "onKeyPress(async function (key) {\n  await null;\n  throw new Error('async ' + key);\n});",
    );
    assert_eq!(recorder.error(), None);

    sandbox.key_down("q");
    assert_eq!(recorder.error().map(|e| e.message), Some("async q".to_string()));
}

#[test]
fn test_caught_rejection_stays_quiet() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "Promise.reject(new Error('x')).catch(() => printData('caught'));\n\
         (async () => { try { await Promise.reject(1); } catch (e) { printData('inner'); } })();",
    );
    assert_eq!(recorder.error(), None);
    let mut lines = recorder.lines();
    lines.sort();
    assert_eq!(lines, vec!["caught", "inner"]);
}

#[test]
fn test_numbers_print_like_javascript() {
    let (mut sandbox, recorder) = mount(Variant::Console);
    run_console(
        &mut sandbox,
        "printData(1e21);\nprintData(1e-7);\nprintData(2 ** 70);\n\
         printData(String(1e21));\nprintData([1e21, 0.5]);",
    );
    assert_eq!(
        recorder.lines(),
        vec![
            "1e+21",
            "1e-7",
            "1.1805916207174113e+21",
            "1e+21",
            "Array(2) [1e+21, 0.5]"
        ]
    );
}

#[test]
fn test_page_live_timers_count_frame_timers() {
    let (mut sandbox, _) = mount(Variant::Page);
    sandbox.set_code(
        "<html><body><script>\
         setInterval(function () {}, 10); setTimeout(function () {}, 500);\
         </script></body></html>",
    );
    assert_eq!(sandbox.live_timers(), 2);

    sandbox.advance(ms(600));
    assert_eq!(sandbox.live_timers(), 1);

    sandbox.set_code("<html><body></body></html>");
    assert_eq!(sandbox.live_timers(), 0);
}
