// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! String-table indices and the sentinels every backend must never
//! assign to a real entry.

/// An index into a backend's string table, or one of the sentinels
/// below.
pub type Idx = u32;

/// Not a valid index; absence of a result.
pub const IDX_INVALID: Idx = 0xffff_ffff;
/// Query-field wildcard (`#`): matches both concrete values and `WIDE`.
pub const IDX_ANY: Idx = 0xffff_fffe;
/// Stored-field wildcard (`*`): matches any queried value.
pub const IDX_WIDE: Idx = 0xffff_fffd;
/// Lookup miss under non-creating mode.
pub const IDX_NONE: Idx = 0xffff_fffc;
/// Highest index a real string-table entry may take.
pub const IDX_MAX: Idx = 0xffff_fff7;

/// Wire encoding of the `WIDE` sentinel.
pub const WIDE_CHAR: char = '*';
/// Wire encoding of the `ANY` sentinel.
pub const ANY_CHAR: char = '#';

/// Whether `text` denotes `ANY`: absent, empty, or the lone `#` char.
pub fn is_any(text: Option<&str>) -> bool {
    match text {
        None => true,
        Some(t) => t.is_empty() || t == "#",
    }
}

/// Whether `text` denotes `ANY` or `WIDE`: absent, empty, `#`, or `*`.
pub fn is_any_or_wide(text: Option<&str>) -> bool {
    match text {
        None => true,
        Some(t) => t.is_empty() || t == "#" || t == "*",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_absent_empty_and_hash() {
        assert!(is_any(None));
        assert!(is_any(Some("")));
        assert!(is_any(Some("#")));
        assert!(!is_any(Some("alice")));
        assert!(!is_any(Some("*")));
    }

    #[test]
    fn any_or_wide_also_matches_star() {
        assert!(is_any_or_wide(Some("*")));
        assert!(!is_any_or_wide(Some("alice")));
    }
}
