//! CLI command implementations.

pub mod init;
pub mod run;
pub mod watch;

pub use init::init_project;
pub use run::{run_file, RunOptions};
pub use watch::watch_file;

use anyhow::{Context, Result};
use codepad_runtime::RuntimeConfig;
use codepad_types::Variant;
use std::path::Path;

/// Load `codepad.yml`, falling back to defaults when it does not exist
pub(crate) fn load_config(config_path: &Path) -> Result<RuntimeConfig> {
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        return Ok(RuntimeConfig::default());
    }
    RuntimeConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))
}

/// Pick a variant from the file extension when none was given
pub(crate) fn resolve_variant(file: &Path, variant: Option<Variant>) -> Variant {
    if let Some(variant) = variant {
        return variant;
    }
    match file.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => Variant::Page,
        _ => Variant::Console,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_variant_from_extension() {
        assert_eq!(resolve_variant(Path::new("index.html"), None), Variant::Page);
        assert_eq!(resolve_variant(Path::new("main.js"), None), Variant::Console);
        assert_eq!(
            resolve_variant(Path::new("main.js"), Some(Variant::Canvas)),
            Variant::Canvas
        );
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/codepad.yml")).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }
}
