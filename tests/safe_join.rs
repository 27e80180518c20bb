//! Property tests for path containment (spec §8 invariant 5): `safe_join`
//! must never resolve outside the vault root.

use std::path::Path;

use commy_sync::item::safe_join;
use proptest::prelude::*;

#[test]
fn traversal_attempts_are_rejected() {
    let root = Path::new("/vaults/alice/v1");
    for candidate in [
        "../escape.txt",
        "a/../../b.txt",
        "/etc/passwd",
        "a/b/../../../c.txt",
    ] {
        assert!(
            safe_join(root, candidate).is_err(),
            "expected {candidate} to be rejected"
        );
    }
}

#[test]
fn ordinary_relative_paths_stay_under_root() {
    let root = Path::new("/vaults/alice/v1");
    for candidate in ["a.txt", "dir/b.txt", "dir/sub/c.txt"] {
        let resolved = safe_join(root, candidate).unwrap();
        assert!(resolved.starts_with(root));
    }
}

proptest! {
    #[test]
    fn safe_join_never_escapes_root(segments in prop::collection::vec("[a-zA-Z0-9_.]{1,8}", 1..6)) {
        let root = Path::new("/vaults/alice/v1");
        let candidate = segments.join("/");
        if let Ok(resolved) = safe_join(root, &candidate) {
            prop_assert!(resolved.starts_with(root));
        }
    }

    #[test]
    fn safe_join_rejects_any_parent_segment(
        prefix in prop::collection::vec("[a-zA-Z0-9_]{1,6}", 0..4),
        suffix in prop::collection::vec("[a-zA-Z0-9_]{1,6}", 0..4),
    ) {
        let root = Path::new("/vaults/alice/v1");
        let mut parts = prefix;
        parts.push("..".to_string());
        parts.extend(suffix);
        let candidate = parts.join("/");
        prop_assert!(safe_join(root, &candidate).is_err());
    }
}
