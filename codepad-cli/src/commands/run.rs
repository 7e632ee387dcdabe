//! One-shot run of a program file.

use super::{load_config, resolve_variant};
use crate::report::RunReport;
use anyhow::{anyhow, bail, Context, Result};
use codepad_runtime::{Recorder, Sandbox};
use codepad_types::Variant;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

pub struct RunOptions {
    pub variant: Option<Variant>,
    pub duration_ms: u64,
    pub presses: Vec<String>,
    pub hold_ms: u64,
    pub json: bool,
    pub svg: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyEvent {
    Down(String),
    Up(String),
}

/// Parse `KEY@MS`; the key may itself contain `@`
fn parse_press(press: &str) -> Result<(u64, String)> {
    let Some((key, at)) = press.rsplit_once('@') else {
        bail!("invalid --press {press:?}: expected KEY@MS");
    };
    if key.is_empty() {
        bail!("invalid --press {press:?}: missing key");
    }
    let at = at
        .parse::<u64>()
        .with_context(|| format!("invalid --press {press:?}: bad time"))?;
    Ok((at, key.to_string()))
}

/// Expand presses into a time-ordered down/up schedule
fn key_schedule(presses: &[String], hold_ms: u64) -> Result<Vec<(u64, KeyEvent)>> {
    let mut events = Vec::with_capacity(presses.len() * 2);
    for press in presses {
        let (at, key) = parse_press(press)?;
        events.push((at, KeyEvent::Down(key.clone())));
        events.push((at + hold_ms, KeyEvent::Up(key)));
    }
    // Stable: a release never overtakes the press scheduled before it
    events.sort_by_key(|(at, _)| *at);
    Ok(events)
}

/// Run `file` for a stretch of virtual time and report what it produced
pub fn run_file(config_path: &Path, file: &Path, opts: RunOptions) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let source = fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let variant = resolve_variant(file, opts.variant);
    let schedule = key_schedule(&opts.presses, opts.hold_ms)?;

    let recorder = Recorder::new();
    let debounce = config.debounce();
    let mut sandbox = Sandbox::new(variant, config, recorder.clone())
        .map_err(|err| anyhow!("Failed to start sandbox: {err}"))?;
    tracing::debug!(%variant, file = %file.display(), "running");

    sandbox.set_code(source);
    if sandbox.has_pending_run() {
        sandbox.advance(debounce);
    }

    let start = sandbox.now();
    let end = start + Duration::from_millis(opts.duration_ms);
    for (at, event) in schedule {
        let at = start + Duration::from_millis(at);
        if at > end {
            break;
        }
        sandbox.advance(at.saturating_sub(sandbox.now()));
        match event {
            KeyEvent::Down(key) => {
                let outcome = sandbox.key_down(&key);
                tracing::debug!(%key, handled = outcome.handled, "key down");
            }
            KeyEvent::Up(key) => sandbox.key_up(&key),
        }
    }
    sandbox.advance(end.saturating_sub(sandbox.now()));

    let report = RunReport::collect(&sandbox, recorder.lines(), recorder.error());

    if let Some(out) = &opts.svg {
        fs::write(out, sandbox.canvas().to_svg())
            .with_context(|| format!("Failed to write {:?}", out))?;
        if !opts.json {
            eprintln!("Wrote {:?}", out);
        }
    }
    sandbox.dispose();

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    Ok(if report.error.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_press() {
        assert_eq!(parse_press("ArrowUp@100").unwrap(), (100, "ArrowUp".to_string()));
        assert_eq!(parse_press("@@5").unwrap(), (5, "@".to_string()));
        assert!(parse_press("ArrowUp").is_err());
        assert!(parse_press("@10").is_err());
        assert!(parse_press("x@soon").is_err());
    }

    #[test]
    fn test_key_schedule_orders_events() {
        let presses = vec!["b@200".to_string(), "a@0".to_string()];
        let schedule = key_schedule(&presses, 50).unwrap();
        assert_eq!(
            schedule,
            vec![
                (0, KeyEvent::Down("a".into())),
                (50, KeyEvent::Up("a".into())),
                (200, KeyEvent::Down("b".into())),
                (250, KeyEvent::Up("b".into())),
            ]
        );
    }
}
