use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The only thing the module persists between runs.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModuleState {
    #[serde(default)]
    pub is_enabled: bool,
}

impl ModuleState {
    /// Reads the state file, creating it disabled when it does not exist yet.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let state = Self::default();
            state.save(path)?;
            tracing::info!(path = %path.display(), "created module state file");
            return Ok(state);
        }
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create state dir {}", dir.display()))?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize module state")?;
        std::fs::write(path, raw).with_context(|| format!("write {}", path.display()))
    }
}
