//! Re-run a program whenever its file changes.

use super::{load_config, resolve_variant};
use anyhow::{anyhow, Context, Result};
use codepad_runtime::{ErrorInfo, Sandbox, SandboxObserver};
use codepad_types::Variant;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_millis(16);

/// Prints projection changes as they arrive
#[derive(Default)]
struct PrintObserver {
    printed: Vec<String>,
    error: Option<ErrorInfo>,
}

impl SandboxObserver for PrintObserver {
    fn on_output(&mut self, lines: &[String]) {
        if lines.starts_with(&self.printed) {
            for line in &lines[self.printed.len()..] {
                println!("{line}");
            }
        } else {
            println!("──── re-run ────");
            for line in lines {
                println!("{line}");
            }
        }
        self.printed = lines.to_vec();
    }

    fn on_error(&mut self, error: Option<&ErrorInfo>) {
        if let Some(error) = error {
            if self.error.as_ref() != Some(error) {
                eprintln!("✗ {error}");
            }
        }
        self.error = error.cloned();
    }
}

fn is_edit(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

pub async fn watch_file(config_path: &Path, file: &Path, variant: Option<Variant>) -> Result<()> {
    let config = load_config(config_path)?;
    let variant = resolve_variant(file, variant);
    let file_name = file
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| anyhow!("{:?} is not a file path", file))?;
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    let mut sandbox = Sandbox::new(variant, config, PrintObserver::default())
        .map_err(|err| anyhow!("Failed to start sandbox: {err}"))?;
    let source = fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    sandbox.set_code(source);

    println!("Watching {:?} as {variant} (Ctrl+C to stop)...", file);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut _watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        notify::Config::default(),
    )
    .context("Failed to initialize watcher")?;

    // Editors often replace the file, so watch its directory
    _watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(ev) => {
                        let touched = is_edit(&ev.kind)
                            && ev
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(file_name.as_os_str()));
                        if !touched {
                            continue;
                        }
                        match fs::read_to_string(file) {
                            Ok(source) => sandbox.set_code(source),
                            Err(err) => eprintln!("Failed to read {:?}: {err}", file),
                        }
                    }
                    Err(err) => eprintln!("Watcher error: {err}"),
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                sandbox.advance(now - last_tick);
                last_tick = now;
            }
            _ = &mut shutdown => {
                println!("Stopping");
                break;
            }
        }
    }

    sandbox.dispose();
    Ok(())
}
