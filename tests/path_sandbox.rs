//! Property-based coverage of the workspace path sandbox: every relative
//! path built only from normal segments should resolve under the root, and
//! any path containing a `..` segment must always be rejected.

use std::path::PathBuf;

use labyard::error::AppError;
use labyard::security::safe_path;
use proptest::prelude::*;

fn root() -> PathBuf {
    PathBuf::from("/workspace")
}

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,8}"
}

proptest! {
    #[test]
    fn safe_segments_always_resolve_under_root(segments in prop::collection::vec(segment(), 1..6)) {
        let relative = segments.join("/");
        let resolved = safe_path(&root(), &relative).unwrap();
        prop_assert!(resolved.starts_with(root()));
    }

    #[test]
    fn traversal_segments_are_always_rejected(
        prefix in prop::collection::vec(segment(), 0..3),
        suffix in prop::collection::vec(segment(), 0..3),
    ) {
        let mut parts = prefix;
        parts.push("..".to_string());
        parts.extend(suffix);
        let relative = parts.join("/");
        let result = safe_path(&root(), &relative);
        prop_assert!(matches!(result, Err(AppError::PathEscapesWorkspace(_))));
    }

    #[test]
    fn nul_bytes_are_always_rejected(segments in prop::collection::vec(segment(), 1..4)) {
        let relative = format!("{}\0suffix", segments.join("/"));
        let result = safe_path(&root(), &relative);
        prop_assert!(matches!(result, Err(AppError::PathContainsNul)));
    }
}
