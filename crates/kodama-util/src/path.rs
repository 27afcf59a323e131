//! Path utilities.
//!
//! Resolves the XDG-style directory layout kodama persists into, and provides
//! the traversal checks used before touching any user-supplied path.

use crate::error::{Error, Result};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Directory name used under the XDG data and config roots.
pub const APP_DIR: &str = "kodama-claude";

/// Every well-known location kodama reads or writes.
///
/// ```text
/// $XDG_DATA_HOME/kodama-claude/
///   snapshots/<uuid>.json
///   snapshots/archive/<uuid>.json
///   .trash/<id>_<stamp>.json
///   .trash/metadata.json
///   events.jsonl
///   .session
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoragePaths {
    pub data: PathBuf,
    pub config: PathBuf,
    pub snapshots: PathBuf,
    pub archive: PathBuf,
    pub events: PathBuf,
    pub session: PathBuf,
    pub trash: PathBuf,
    pub trash_metadata: PathBuf,
}

impl StoragePaths {
    /// Resolve the layout from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve the layout from an arbitrary variable lookup.
    ///
    /// `HOME` is only required when one of the XDG overrides is missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let home = var("HOME");

        let xdg_data = match var("XDG_DATA_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(require_home(&home)?).join(".local").join("share"),
        };
        let xdg_config = match var("XDG_CONFIG_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(require_home(&home)?).join(".config"),
        };

        for base in [&xdg_data, &xdg_config] {
            if !base.is_absolute() {
                return Err(Error::invalid_base(format!(
                    "base directory must be absolute: {}",
                    base.display()
                )));
            }
        }

        Ok(Self::under(xdg_data.join(APP_DIR), xdg_config.join(APP_DIR)))
    }

    /// Build the layout below explicit data and config roots.
    pub fn under(data: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        let data = data.into();
        let snapshots = data.join("snapshots");
        let trash = data.join(".trash");
        Self {
            archive: snapshots.join("archive"),
            events: data.join("events.jsonl"),
            session: data.join(".session"),
            trash_metadata: trash.join("metadata.json"),
            config: config.into(),
            snapshots,
            trash,
            data,
        }
    }
}

fn require_home(home: &Option<String>) -> Result<&str> {
    home.as_deref()
        .ok_or_else(Error::missing_home)
}

/// Whether a path contains a `..` component.
pub fn has_parent_component(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Find the closest ancestor of `path` that exists on disk.
pub fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().skip(1).find(|p| p.exists()).map(Path::to_path_buf)
}
