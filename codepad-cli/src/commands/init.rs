//! Init command implementation.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../../../codepad.yml.example");

/// Write a starter `codepad.yml` into `path`
pub fn init_project(path: Option<&Path>) -> Result<()> {
    let root = path.unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(root).with_context(|| format!("Failed to create {:?}", root))?;

    let config_path = root.join("codepad.yml");
    if config_path.exists() {
        println!("codepad.yml already exists at {:?}", config_path);
        return Ok(());
    }

    fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {:?}", config_path))?;

    println!("✓ codepad initialized in {:?}", root);
    println!("  - Edit codepad.yml to change limits and the debounce delay");
    println!("  - Try: codepad run main.js --variant canvas --svg out.svg");
    Ok(())
}
