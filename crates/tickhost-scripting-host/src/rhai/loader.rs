use anyhow::{Context, Result};
use std::path::Path;

use super::RhaiScript;
use crate::config::ScriptingConfig;
use crate::script_scanner::{script_name, SCRIPT_EXTENSION};

/// Read every `*.rhai` file in `dir`, sorted by name, skipping scripts
/// disabled in their `[scripting.config.<name>]` table
pub fn load_rhai_scripts(dir: &Path, config: &ScriptingConfig) -> Result<Vec<RhaiScript>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Reading script directory {}", dir.display()))?;

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(SCRIPT_EXTENSION))
        .collect();
    paths.sort();

    let mut scripts = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = script_name(&path) else {
            continue;
        };
        if !config.is_script_enabled(&name) {
            tracing::info!(
                target: "scripting",
                script = name.as_str(),
                "Script disabled in config, skipping"
            );
            continue;
        }
        let script = RhaiScript::from_file(&path)
            .with_context(|| format!("Reading script {}", path.display()))?
            .with_config(config.script_config(&name));
        scripts.push(script);
    }

    tracing::info!(
        target: "scripting",
        "Found {} script(s) in {}",
        scripts.len(),
        dir.display()
    );
    Ok(scripts)
}
