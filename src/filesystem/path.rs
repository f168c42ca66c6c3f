// src/filesystem/path.rs

//! Path sanitization for reference names and placement targets
//!
//! Reference names and directive targets come from generation units, so
//! they are treated as untrusted: absolute paths are made relative and any
//! `..` component is rejected outright.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Path validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path traversal detected: {0}")]
    Traversal(String),

    #[error("empty path after sanitization: {0:?}")]
    Empty(String),
}

/// Sanitize an untrusted relative path
///
/// - `..` components are rejected
/// - `.` components are skipped
/// - leading slashes are stripped
///
/// ```
/// use canonstore::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("docs/report.docx").unwrap(), PathBuf::from("docs/report.docx"));
/// assert_eq!(sanitize_path("/docs/report.docx").unwrap(), PathBuf::from("docs/report.docx"));
/// assert!(sanitize_path("../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let path_str = path.as_ref().to_string_lossy();
    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Traversal(path_str.to_string())),
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(PathError::Empty(path_str.to_string()));
    }

    Ok(normalized)
}

/// Join an untrusted path under `root`, refusing anything that escapes it
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path.as_ref())?);

    // Symlinks inside root can still point outside of it
    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(PathError::Traversal(format!(
            "{} escapes {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Validate a reference name and return it in normalized `a/b/c` form
///
/// Names are free-form slash-separated paths. Each segment must be
/// non-empty and may not start with a dot, which keeps names from
/// colliding with staging files.
pub fn normalize_reference_name(name: &str) -> Result<String, PathError> {
    let sanitized = sanitize_path(name)?;
    let mut segments = Vec::new();
    for component in sanitized.components() {
        let segment = component.as_os_str().to_string_lossy();
        if segment.starts_with('.') || segment.contains('\\') {
            return Err(PathError::Traversal(name.to_string()));
        }
        segments.push(segment.into_owned());
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path_normal() {
        assert_eq!(
            sanitize_path("word/document.xml").unwrap(),
            PathBuf::from("word/document.xml")
        );
        assert_eq!(
            sanitize_path("///a/./b").unwrap(),
            PathBuf::from("a/b")
        );
    }

    #[test]
    fn test_sanitize_path_traversal_rejected() {
        assert!(sanitize_path("..").is_err());
        assert!(sanitize_path("a/../../b").is_err());
        assert!(sanitize_path("/a/../b").is_err());
    }

    #[test]
    fn test_sanitize_path_empty_rejected() {
        assert!(matches!(sanitize_path(""), Err(PathError::Empty(_))));
        assert!(matches!(sanitize_path("/"), Err(PathError::Empty(_))));
        assert!(matches!(sanitize_path("./"), Err(PathError::Empty(_))));
    }

    #[test]
    fn test_safe_join() {
        let root = PathBuf::from("/tmp/placement-root");
        assert_eq!(
            safe_join(&root, "src/lib.rs").unwrap(),
            PathBuf::from("/tmp/placement-root/src/lib.rs")
        );
        assert!(safe_join(&root, "../etc/passwd").is_err());
    }

    #[test]
    fn test_normalize_reference_name() {
        assert_eq!(
            normalize_reference_name("/processed//abc").unwrap(),
            "processed/abc"
        );
        assert!(normalize_reference_name("processed/.hidden").is_err());
        assert!(normalize_reference_name("../escape").is_err());
        assert!(normalize_reference_name("").is_err());
    }
}
