//! Path Utilities
//!
//! Where the tool keeps its files when no explicit home is given.

use std::path::{Path, PathBuf};

use crate::error::{FlowError, FlowResult};

/// Get the default base directory (`~/.auth-tool/`)
pub fn auth_tool_dir() -> FlowResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FlowError::Storage("Could not determine home directory".into()))?;
    Ok(home.join(".auth-tool"))
}

/// Local state: the pending attempt and the selected configuration.
pub fn state_file(base: &Path) -> PathBuf {
    base.join("state.json")
}

/// Named configurations.
pub fn configurations_file(base: &Path) -> PathBuf {
    base.join("configurations.json")
}
