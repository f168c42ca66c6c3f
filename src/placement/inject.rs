// src/placement/inject.rs

//! Splicing for the non-overwrite modes
//!
//! Everything here is pure: given the current target and the content to
//! place, compute the new target, or `None` when the content is already in
//! place.
//!
//! `append` and `prepend` work on raw bytes and never add separators of
//! their own; see [`concat`]. The inject modes are line oriented and need
//! UTF-8 text; see [`splice`].
//!
//! With markers enabled the inserted region is wrapped in begin/end lines
//! carrying the content's SHA-256, and a begin line with the same hash
//! anywhere in the target means the region is present. Without markers the
//! inject modes require the exact inserted lines to already sit at the
//! resolved position. Byte concatenation has no such position; the engine
//! keeps a placement record for it instead.

use super::directive::{Anchor, OperationMode};
use crate::error::DirectiveError;
use crate::hash;
use std::path::Path;

const MARKER_BEGIN: &str = "canonstore:begin";
const MARKER_END: &str = "canonstore:end";

/// Knobs for one splice
#[derive(Debug, Clone, Copy, Default)]
pub struct SpliceOptions<'a> {
    /// Comment prefix for marker lines; `None` disables markers
    pub markers: Option<&'a str>,
    /// Inject at the end when an anchor is missing
    pub fallback_to_end: bool,
    /// Skip the already-in-place checks
    pub force: bool,
}

/// `text` with a final newline, unless it is empty
fn terminated(text: &str) -> String {
    let mut owned = text.to_string();
    if !owned.is_empty() && !owned.ends_with('\n') {
        owned.push('\n');
    }
    owned
}

fn begin_marker(prefix: &str, digest: &str) -> String {
    format!("{prefix} {MARKER_BEGIN} {digest}")
}

/// The block that gets inserted, wrapped in markers when enabled
fn insertion_block(content: &str, markers: Option<&str>) -> String {
    let body = terminated(content);
    match markers {
        Some(prefix) => {
            let digest = hash::sha256(content.as_bytes());
            format!(
                "{}\n{body}{prefix} {MARKER_END} {digest}\n",
                begin_marker(prefix, &digest)
            )
        }
        None => body,
    }
}

/// Whether a marked region for `content` is already present
///
/// Scans byte lines, so the target need not be UTF-8.
pub fn has_marked_region(target: &[u8], content: &[u8], prefix: &str) -> bool {
    let begin = begin_marker(prefix, &hash::sha256(content));
    target
        .split(|&b| b == b'\n')
        .any(|line| line.trim_ascii_end() == begin.as_bytes())
}

/// `current ++ content` for append, `content ++ current` for prepend
///
/// Without markers the bytes are joined exactly as given. With markers the
/// content is wrapped in marker lines, which do need line breaks around
/// them. Returns `None` for the other modes.
pub fn concat(current: &[u8], content: &[u8], mode: &OperationMode, markers: Option<&str>) -> Option<Vec<u8>> {
    let block = match markers {
        Some(prefix) => {
            let digest = hash::sha256(content);
            let mut block = begin_marker(prefix, &digest).into_bytes();
            block.push(b'\n');
            block.extend_from_slice(content);
            if !content.is_empty() && !content.ends_with(b"\n") {
                block.push(b'\n');
            }
            block.extend_from_slice(format!("{prefix} {MARKER_END} {digest}\n").as_bytes());
            block
        }
        None => content.to_vec(),
    };

    let mut out = Vec::with_capacity(current.len() + block.len() + 1);
    match mode {
        OperationMode::Append => {
            out.extend_from_slice(current);
            if markers.is_some() && !current.is_empty() && !current.ends_with(b"\n") {
                out.push(b'\n');
            }
            out.extend_from_slice(&block);
        }
        OperationMode::Prepend => {
            out.extend_from_slice(&block);
            out.extend_from_slice(current);
        }
        _ => return None,
    }
    Some(out)
}

fn at_tail(lines: &[&str], block: &[&str]) -> bool {
    !block.is_empty() && lines.ends_with(block)
}

/// Splice `content` into `target` according to an inject `mode`
///
/// Returns `Ok(None)` when the content is already in place. `path` is only
/// used for error reporting.
pub fn splice(
    target: &str,
    content: &str,
    mode: &OperationMode,
    options: SpliceOptions<'_>,
    path: &Path,
) -> Result<Option<String>, DirectiveError> {
    if !options.force
        && let Some(prefix) = options.markers
        && has_marked_region(target.as_bytes(), content.as_bytes(), prefix)
    {
        return Ok(None);
    }

    let target = terminated(target);
    let block = insertion_block(content, options.markers);
    let lines: Vec<&str> = target.split_inclusive('\n').collect();
    let block_lines: Vec<&str> = block.split_inclusive('\n').collect();
    let check = !options.force;

    let position = match mode {
        OperationMode::InjectAtLine(line) => {
            let wanted = line.saturating_sub(1);
            if wanted >= lines.len() {
                // Out of range clamps to the end
                if check && at_tail(&lines, &block_lines) {
                    return Ok(None);
                }
                lines.len()
            } else {
                if check && !block_lines.is_empty() && lines[wanted..].starts_with(&block_lines) {
                    return Ok(None);
                }
                wanted
            }
        }
        OperationMode::InjectAt { anchor } => {
            let found = match anchor {
                Anchor::Before(text) | Anchor::After(text) => {
                    lines.iter().position(|line| line.contains(text.as_str()))
                }
                Anchor::Unspecified => None,
            };
            match (anchor, found) {
                (Anchor::After(_), Some(index)) => {
                    if check && !block_lines.is_empty() && lines[index + 1..].starts_with(&block_lines) {
                        return Ok(None);
                    }
                    index + 1
                }
                (Anchor::Before(_), Some(index)) => {
                    if check && !block_lines.is_empty() && lines[..index].ends_with(&block_lines) {
                        return Ok(None);
                    }
                    index
                }
                (Anchor::Before(text) | Anchor::After(text), None) if !options.fallback_to_end => {
                    return Err(DirectiveError::AnchorNotFound {
                        path: path.to_path_buf(),
                        anchor: text.clone(),
                    });
                }
                _ => {
                    if check && at_tail(&lines, &block_lines) {
                        return Ok(None);
                    }
                    lines.len()
                }
            }
        }
        OperationMode::Write | OperationMode::Skip | OperationMode::Append | OperationMode::Prepend => {
            return Err(DirectiveError::InvalidDirective(format!(
                "{} is not a line splicing mode",
                mode.name()
            )));
        }
    };

    let mut spliced = String::with_capacity(target.len() + block.len());
    for line in &lines[..position] {
        spliced.push_str(line);
    }
    spliced.push_str(&block);
    for line in &lines[position..] {
        spliced.push_str(line);
    }
    Ok(Some(spliced))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(target: &str, content: &str, mode: OperationMode) -> Option<String> {
        splice(target, content, &mode, SpliceOptions::default(), Path::new("t")).unwrap()
    }

    fn after(anchor: &str) -> OperationMode {
        OperationMode::InjectAt {
            anchor: Anchor::After(anchor.to_string()),
        }
    }

    fn before(anchor: &str) -> OperationMode {
        OperationMode::InjectAt {
            anchor: Anchor::Before(anchor.to_string()),
        }
    }

    #[test]
    fn test_inject_at_line() {
        let out = apply("a\nb\nc\n", "X", OperationMode::InjectAtLine(2)).unwrap();
        assert_eq!(out, "a\nX\nb\nc\n");
        // Already there
        assert_eq!(apply(&out, "X", OperationMode::InjectAtLine(2)), None);
    }

    #[test]
    fn test_inject_at_line_clamps() {
        let out = apply("a\nb", "X", OperationMode::InjectAtLine(99)).unwrap();
        assert_eq!(out, "a\nb\nX\n");
        assert_eq!(apply(&out, "X", OperationMode::InjectAtLine(99)), None);

        assert_eq!(apply("", "X", OperationMode::InjectAtLine(1)).unwrap(), "X\n");
    }

    #[test]
    fn test_inject_after_and_before_anchor() {
        let target = "fn main() {\n    // routes\n}\n";
        let out = apply(target, "    route(\"/\");", after("// routes")).unwrap();
        assert_eq!(out, "fn main() {\n    // routes\n    route(\"/\");\n}\n");
        assert_eq!(apply(&out, "    route(\"/\");", after("// routes")), None);

        let html = "<html>\n<body>\n</body>\n</html>\n";
        let out = apply(html, "<p>hi</p>", before("</body>")).unwrap();
        assert_eq!(out, "<html>\n<body>\n<p>hi</p>\n</body>\n</html>\n");
        assert_eq!(apply(&out, "<p>hi</p>", before("</body>")), None);
    }

    #[test]
    fn test_first_matching_line_wins() {
        let out = apply("x\nmark 1\nmark 2\n", "Y", after("mark")).unwrap();
        assert_eq!(out, "x\nmark 1\nY\nmark 2\n");
    }

    #[test]
    fn test_missing_anchor() {
        let err = splice("a\n", "X", &after("nope"), SpliceOptions::default(), Path::new("t.txt")).unwrap_err();
        assert_eq!(
            err,
            DirectiveError::AnchorNotFound {
                path: "t.txt".into(),
                anchor: "nope".to_string()
            }
        );

        let options = SpliceOptions {
            fallback_to_end: true,
            ..Default::default()
        };
        let out = splice("a\n", "X", &after("nope"), options, Path::new("t.txt")).unwrap();
        assert_eq!(out.as_deref(), Some("a\nX\n"));
    }

    #[test]
    fn test_unspecified_anchor_goes_to_end() {
        let mode = OperationMode::InjectAt {
            anchor: Anchor::Unspecified,
        };
        assert_eq!(apply("a\n", "X", mode.clone()).unwrap(), "a\nX\n");
        assert_eq!(apply("a\nX\n", "X", mode), None);
    }

    #[test]
    fn test_concat_is_exact_bytes() {
        let append = concat(b"a", b"b", &OperationMode::Append, None).unwrap();
        assert_eq!(append, b"ab");
        let prepend = concat(b"b", b"a", &OperationMode::Prepend, None).unwrap();
        assert_eq!(prepend, b"ab");

        // Not UTF-8, no separators added
        let binary = concat(&[0x89, b'P'], &[0xff, 0x00], &OperationMode::Append, None).unwrap();
        assert_eq!(binary, [0x89, b'P', 0xff, 0x00]);
        assert_eq!(concat(b"", b"x", &OperationMode::Append, None).unwrap(), b"x");
        assert_eq!(concat(b"a", b"b", &OperationMode::Write, None), None);
    }

    #[test]
    fn test_concat_with_markers() {
        let digest = hash::sha256(b"b");
        let out = concat(b"a", b"b", &OperationMode::Append, Some("#")).unwrap();
        assert_eq!(
            out,
            format!("a\n# canonstore:begin {digest}\nb\n# canonstore:end {digest}\n").into_bytes()
        );
        assert!(has_marked_region(&out, b"b", "#"));

        let out = concat(&[0xfe, b'\n'], b"b", &OperationMode::Prepend, Some("#")).unwrap();
        assert!(out.ends_with(&[0xfe, b'\n']));
        assert!(has_marked_region(&out, b"b", "#"));
        assert!(!has_marked_region(&out, b"c", "#"));
    }

    #[test]
    fn test_force_duplicates() {
        let options = SpliceOptions {
            force: true,
            ..Default::default()
        };
        let mode = OperationMode::InjectAtLine(99);
        let out = splice("a\nb\n", "b", &mode, options, Path::new("t")).unwrap();
        assert_eq!(out.as_deref(), Some("a\nb\nb\n"));
    }

    #[test]
    fn test_markers() {
        let options = SpliceOptions {
            markers: Some("//"),
            ..Default::default()
        };
        let digest = hash::sha256(b"X");
        let out = splice("a\nb\n", "X", &OperationMode::InjectAtLine(2), options, Path::new("t"))
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            format!("a\n// canonstore:begin {digest}\nX\n// canonstore:end {digest}\nb\n")
        );

        // Detected anywhere, even when the directive now points elsewhere
        let again = splice(&out, "X", &OperationMode::InjectAtLine(1), options, Path::new("t")).unwrap();
        assert_eq!(again, None);

        // Different content gets its own region
        let other = splice(&out, "Y", &OperationMode::InjectAtLine(99), options, Path::new("t"))
            .unwrap()
            .unwrap();
        let y = hash::sha256(b"Y");
        assert!(other.ends_with(&format!("Y\n// canonstore:end {y}\n")));
        assert!(has_marked_region(other.as_bytes(), b"X", "//"));
    }

    #[test]
    fn test_non_line_modes_are_not_spliced() {
        for mode in [OperationMode::Write, OperationMode::Append, OperationMode::Prepend] {
            assert!(matches!(
                splice("", "x", &mode, SpliceOptions::default(), Path::new("t")),
                Err(DirectiveError::InvalidDirective(_))
            ));
        }
    }
}
