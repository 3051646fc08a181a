//! Relative path extraction.
//!
//! Event paths are absolute; uploads are addressed relative to the watch
//! root's basename. The translation is purely textual so that it behaves the
//! same for POSIX and Windows style event paths.

/// Returns the part of `event_path` after the first occurrence of `basename`.
///
/// Backslash separators are converted to `/` and one leading `/` is removed.
/// If `basename` does not occur in the path (or is empty) the path is returned
/// unchanged; callers must tolerate that degenerate output.
///
/// Note that the match is a substring search: a parent directory whose name
/// contains `basename` anchors the result earlier than the watch root itself.
///
/// # Examples
///
/// ```
/// use ac_watcher::relative_path;
///
/// assert_eq!(relative_path("/home/u/proj/sub/a.py", "proj"), "sub/a.py");
/// assert_eq!(relative_path(r"C:\work\proj\sub\a.py", "proj"), "sub/a.py");
/// assert_eq!(relative_path("sub/a.py", "proj"), "sub/a.py");
/// ```
#[must_use]
pub fn relative_path(event_path: &str, basename: &str) -> String {
    if basename.is_empty() {
        return event_path.to_owned();
    }
    let Some(index) = event_path.find(basename) else {
        return event_path.to_owned();
    };

    let tail = event_path[index + basename.len()..]
        .replace("\\\\", "/")
        .replace('\\', "/");
    match tail.strip_prefix('/') {
        Some(stripped) => stripped.to_owned(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_file() {
        assert_eq!(relative_path("/home/u/proj/sub/a.py", "proj"), "sub/a.py");
    }

    #[test]
    fn test_file_directly_under_root() {
        assert_eq!(relative_path("/w/proj/a.py", "proj"), "a.py");
    }

    #[test]
    fn test_windows_separators() {
        assert_eq!(relative_path(r"C:\\dev\\proj\\pkg\\mod.py", "proj"), "pkg/mod.py");
        assert_eq!(relative_path(r"C:\dev\proj\pkg\mod.py", "proj"), "pkg/mod.py");
    }

    #[test]
    fn test_missing_basename_returns_input_unchanged() {
        assert_eq!(relative_path("/other/tree/a.py", "proj"), "/other/tree/a.py");
        assert_eq!(relative_path(r"lib\a.py", "proj"), r"lib\a.py");
        assert_eq!(relative_path("sub/a.py", ""), "sub/a.py");
    }

    #[test]
    fn test_idempotent_on_relative_input() {
        let once = relative_path("sub/a.py", "proj");
        assert_eq!(relative_path(&once, "proj"), once);
    }

    #[test]
    fn test_first_occurrence_wins() {
        // The basename also appears deeper in the path.
        assert_eq!(relative_path("/w/proj/proj/a.py", "proj"), "proj/a.py");
        // A parent whose name contains the basename anchors early.
        assert_eq!(relative_path("/w/myproj/proj/a.py", "proj"), "proj/a.py");
    }

    #[test]
    fn test_deterministic() {
        let a = relative_path("/home/u/proj/sub/a.py", "proj");
        let b = relative_path("/home/u/proj/sub/a.py", "proj");
        assert_eq!(a, b);
    }

    #[test]
    fn test_root_itself() {
        assert_eq!(relative_path("/w/proj", "proj"), "");
    }
}
