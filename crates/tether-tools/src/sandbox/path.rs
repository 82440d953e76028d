//! Physical path resolution
//!
//! Resolution happens component by component so that `..` is applied to the
//! symlink-resolved parent, never to the textual one. Components that do not
//! exist yet are appended lexically.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` / `~/` against `home`.
pub(crate) fn expand_tilde(raw: &str, home: Option<&Path>) -> PathBuf {
    match (raw, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (r, Some(home)) if r.starts_with("~/") => home.join(&r[2..]),
        (r, _) => PathBuf::from(r),
    }
}

/// Resolve `path` (absolute) to its physical form.
///
/// Returns `None` for dangling or looping symlinks: where such a link points
/// cannot be known until something is written through it.
pub(crate) fn resolve_physical(path: &Path) -> Option<PathBuf> {
    let mut current = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => current.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // `current` is always symlink-free here
                current.pop();
            }
            Component::Normal(name) => {
                current.push(name);
                if let Ok(meta) = fs::symlink_metadata(&current) {
                    if meta.file_type().is_symlink() {
                        current = fs::canonicalize(&current).ok()?;
                    }
                }
            }
        }
    }
    Some(current)
}

/// Whether a command-line token should be treated as a filesystem path.
///
/// Any token with a separator counts, so that relative paths are resolved
/// through workspace symlinks too.
pub(crate) fn looks_like_path(token: &str) -> bool {
    token.contains('/') || token == "~" || token == ".."
}

/// Strip shell quoting and trailing punctuation from a token.
pub(crate) fn clean_token(token: &str) -> &str {
    token
        .trim_start_matches(['"', '\'', '(', '`', '<', '>'])
        .trim_end_matches(['"', '\'', ')', '`', ',', ';', ':', '!', '?'])
}
