//! Mapping of (repository, event) to the script that handles it
//!
//! Scripts live at `<root>/<repo>/<event>.sh`. Both names come straight from
//! the request, so they are validated before the filesystem is touched.

use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const SCRIPT_EXTENSION: &str = "sh";

/// Why a (repo, event) pair has no runnable script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid {field} name {value:?}")]
    InvalidName { field: &'static str, value: String },

    #[error("no script at {0}")]
    NotFound(PathBuf),
}

/// Script selected for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTarget {
    pub root: PathBuf,
    pub repo: String,
    pub event: String,
}

impl ScriptTarget {
    /// Validate both names; nothing is read from disk here.
    pub fn new(
        root: impl Into<PathBuf>,
        repo: impl Into<String>,
        event: impl Into<String>,
    ) -> Result<Self, ResolveError> {
        let repo = repo.into();
        let event = event.into();
        validate_name("repo", &repo)?;
        validate_name("event", &event)?;
        Ok(Self {
            root: root.into(),
            repo,
            event,
        })
    }

    /// `<root>/<repo>/<event>.sh`
    pub fn path(&self) -> PathBuf {
        self.root
            .join(&self.repo)
            .join(format!("{}.{}", self.event, SCRIPT_EXTENSION))
    }

    /// Return the script path if it exists as a regular file.
    pub fn locate(&self) -> Result<PathBuf, ResolveError> {
        let path = self.path();
        // Names are single normal components, so the join cannot climb out.
        debug_assert!(contained_in(&self.root, &path));
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => {
                debug!("{} exists but is not a file", path.display());
                Err(ResolveError::NotFound(path))
            }
            Err(_) => Err(ResolveError::NotFound(path)),
        }
    }
}

/// Resolve `<root>/<repo>/<event>.sh`, rejecting unsafe names first.
pub fn resolve(root: &Path, repo: &str, event: &str) -> Result<PathBuf, ResolveError> {
    ScriptTarget::new(root, repo, event)?.locate()
}

/// A name must be exactly one normal path component.
fn validate_name(field: &'static str, value: &str) -> Result<(), ResolveError> {
    let invalid = || ResolveError::InvalidName {
        field,
        value: value.to_string(),
    };

    if value.is_empty() || value.starts_with('.') {
        return Err(invalid());
    }
    if value
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(invalid());
    }
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

fn contained_in(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
        && path
            .strip_prefix(root)
            .map(|rest| rest.components().all(|c| matches!(c, Component::Normal(_))))
            .unwrap_or(false)
}
