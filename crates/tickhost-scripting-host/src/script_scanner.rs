//! Change detection over the script directory for hot reload

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

pub const SCRIPT_EXTENSION: &str = "rhai";

/// Changes since the previous scan, each list sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub added: Vec<PathBuf>,
    pub changed: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty() || !self.removed.is_empty()
    }
}

pub struct ScriptScanner {
    script_dir: PathBuf,
    scan_interval: Duration,
    last_scan: Option<Instant>,
    known: BTreeMap<PathBuf, SystemTime>,
}

impl ScriptScanner {
    /// Files already present count as known, not added
    pub fn new(script_dir: impl Into<PathBuf>, scan_interval: Duration) -> Self {
        let script_dir = script_dir.into();
        let known = scripts_in(&script_dir);
        Self {
            script_dir,
            scan_interval,
            last_scan: None,
            known,
        }
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    pub fn should_scan(&self) -> bool {
        self.last_scan
            .map_or(true, |last| last.elapsed() >= self.scan_interval)
    }

    pub fn scan(&mut self) -> ScanResult {
        self.last_scan = Some(Instant::now());
        let current = scripts_in(&self.script_dir);
        let mut result = ScanResult::default();

        for (path, modified) in &current {
            match self.known.get(path) {
                None => result.added.push(path.clone()),
                Some(previous) if previous != modified => result.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        result.removed = self
            .known
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();

        if result.has_changes() {
            tracing::debug!(
                target: "scripting",
                added = result.added.len(),
                changed = result.changed.len(),
                removed = result.removed.len(),
                "Script directory changed: {}",
                self.script_dir.display()
            );
        }
        self.known = current;
        result
    }
}

/// Script name for a file in the script directory (its file stem)
pub fn script_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

fn scripts_in(dir: &Path) -> BTreeMap<PathBuf, SystemTime> {
    let mut scripts = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(
                target: "scripting",
                "Cannot read script directory {}: {}",
                dir.display(),
                e
            );
            return scripts;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }
        match entry.metadata().and_then(|metadata| metadata.modified()) {
            Ok(modified) => {
                scripts.insert(path, modified);
            }
            Err(e) => tracing::warn!(
                target: "scripting",
                "Failed to read modification time of {}: {}",
                path.display(),
                e
            ),
        }
    }
    scripts
}
