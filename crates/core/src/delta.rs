//! Thin wrapper around the diff/match/patch primitive.
//!
//! The algorithm itself (Myers diff, the delta text format, patch
//! application) is an external collaborator per the specification — this
//! module exists only to give the sync engine a small, stable surface
//! (`diff`, `to_delta`, `from_delta`, `make_patches`, `apply_patches`,
//! `post_image`) instead of spreading `diff-match-patch-rs` calls across
//! [`crate::engine`], and to implement MobWrite's specific percent-encoding
//! rules for the `+text` tokens inside a delta and for raw (`R:`) payloads.

use diff_match_patch_rs::{DiffMatchPatch, Efficient, PatchInput};

/// A diff produced against a pair of texts, in MobWrite's preferred
/// (Unicode-scalar-aware) representation.
pub type Diffs = Vec<diff_match_patch_rs::Diff<char>>;

/// A patch ready for application against a (possibly different) base text.
pub type Patches = Vec<diff_match_patch_rs::Patch<char>>;

/// Error produced when a client-supplied delta cannot be expanded against
/// the server's shadow, or a delta/patch payload is otherwise malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delta expansion failed: {0}")]
pub struct DeltaExpansionError(pub String);

fn engine() -> DiffMatchPatch {
    DiffMatchPatch::new()
}

/// Computes the diff turning `old` into `new`, then runs the efficiency
/// cleanup pass the spec requires before delta encoding (`diff_main` +
/// `diff_cleanupEfficiency`).
pub fn diff(old: &str, new: &str) -> Diffs {
    let dmp = engine();
    let mut diffs = dmp
        .diff_main::<Efficient>(old, new)
        .unwrap_or_else(|_| Vec::new());
    dmp.diff_cleanup_efficiency(&mut diffs);
    diffs
}

/// Encodes a diff as the comma-separated `=N`/`-N`/`+text` delta format.
pub fn to_delta(diffs: &Diffs) -> String {
    let dmp = engine();
    dmp.diff_to_delta(diffs).unwrap_or_default()
}

/// Decodes a delta against the base text it was computed from, the
/// "expand the delta" step of §4.2.6. Fails if `delta` does not describe a
/// text of the same length as `base` (the client's shadow diverged from
/// what the server expects).
pub fn from_delta(base: &str, delta: &str) -> Result<Diffs, DeltaExpansionError> {
    let dmp = engine();
    dmp.diff_from_delta(base, delta)
        .map_err(|err| DeltaExpansionError(err.to_string()))
}

/// Returns the post-image text described by a diff (`diff_text2`): what the
/// client had after applying its own edit.
pub fn post_image(diffs: &Diffs) -> String {
    diff_match_patch_rs::DiffMatchPatch::diff_text2(diffs)
}

/// Builds patches describing `diffs` against `base`, for later application
/// to a (possibly concurrently modified) master text.
pub fn make_patches(base: &str, diffs: &Diffs) -> Patches {
    let dmp = engine();
    dmp.patch_make(PatchInput::new_diffs(base, diffs))
        .unwrap_or_default()
}

/// Applies `patches` to `text`, returning the merged result and, per hunk,
/// whether it applied cleanly. Application is always best-effort: even a
/// partial failure returns the server's best reconstruction rather than an
/// error, matching the "proceed with the best-effort merged result" rule.
pub fn apply_patches(patches: &Patches, text: &str) -> (String, Vec<bool>) {
    let dmp = engine();
    dmp.patch_apply(patches, text)
        .unwrap_or_else(|_| (text.to_string(), vec![false; patches.len()]))
}

/// Returns `true` if any hunk of `diffs` is a non-equal (insert/delete) op.
pub fn has_changes(diffs: &Diffs) -> bool {
    diffs
        .iter()
        .any(|d| d.op() != diff_match_patch_rs::Ops::Equal)
}

/// Characters MobWrite additionally leaves unescaped on top of the
/// standard unreserved set, matching the Python reference implementation's
/// `urllib.quote(text, "!~*'();/?:@&=+$,#")` safe-list.
const EXTRA_SAFE: &[u8] = b"!~*'();/?:@&=+$,#";

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') || EXTRA_SAFE.contains(&byte)
}

/// Percent-encodes `text` using MobWrite's wire-format safe-list rather
/// than a generic URL-encoder's (narrower) one.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.as_bytes() {
        if is_unreserved(*byte) {
            out.push(*byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Percent-decodes `text`, then validates the result as UTF-8, mirroring
/// "URL-unescape then UTF-8" from §4.2.5.
pub fn unquote(text: &str) -> Result<String, DeltaExpansionError> {
    urlencoding::decode(text)
        .map(|cow| cow.into_owned())
        .map_err(|err| DeltaExpansionError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_identical_pair() {
        let diffs = diff("Hello", "Hello");
        let delta = to_delta(&diffs);
        assert_eq!(delta, "=5");
        assert!(!has_changes(&diffs));
    }

    #[test]
    fn detects_an_insertion() {
        let diffs = diff("Hello", "Hello world");
        assert!(has_changes(&diffs));
        assert_eq!(post_image(&diffs), "Hello world");
    }

    #[test]
    fn quote_preserves_mobwrite_safe_set() {
        let quoted = quote("a b!~*'();/?:@&=+$,#c");
        assert_eq!(quoted, "a%20b!~*'();/?:@&=+$,#c");
    }

    #[test]
    fn unquote_rejects_invalid_percent_escapes() {
        assert!(unquote("%zz").is_err());
    }

    #[test]
    fn unquote_decodes_space_and_plain_text() {
        assert_eq!(unquote("a%20b").unwrap(), "a b");
    }

    #[test]
    fn from_delta_rejects_length_mismatch() {
        let diffs = diff("Hello", "Hello world");
        let delta = to_delta(&diffs);
        assert!(from_delta("nope", &delta).is_err());
    }

    #[test]
    fn patches_apply_cleanly_on_unmodified_base() {
        let base = "Hello";
        let diffs = diff(base, "Hello world");
        let patches = make_patches(base, &diffs);
        let (merged, results) = apply_patches(&patches, base);
        assert_eq!(merged, "Hello world");
        assert!(results.iter().all(|ok| *ok));
    }
}
