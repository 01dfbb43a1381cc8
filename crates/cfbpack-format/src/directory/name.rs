//! Entry name validation and ordering
//!
//! Siblings are ordered by name length in UTF-16 code units first, then by
//! code unit after simple upper-case folding. Two names that compare equal
//! under this ordering cannot share a parent.

use crate::error::{CfbError, CfbResult};
use std::cmp::Ordering;

/// Longest name in UTF-16 code units (the 32nd slot holds the terminator)
pub const MAX_NAME_UNITS: usize = 31;

/// Characters that may not appear in an entry name
const RESERVED_CHARS: [char; 4] = ['/', '\\', ':', '!'];

/// Validate a name and encode it as UTF-16 code units
pub fn encode_name(name: &str) -> CfbResult<Vec<u16>> {
    let invalid = |reason| CfbError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains(RESERVED_CHARS) {
        return Err(invalid("name contains one of / \\ : !"));
    }
    if name.contains('\0') {
        return Err(invalid("name contains NUL"));
    }

    let units: Vec<u16> = name.encode_utf16().collect();
    if units.len() > MAX_NAME_UNITS {
        return Err(invalid("name longer than 31 UTF-16 code units"));
    }
    Ok(units)
}

/// Compare two encoded names in directory order
pub fn compare_names(a: &[u16], b: &[u16]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .map(|&u| fold_unit(u))
            .cmp(b.iter().map(|&u| fold_unit(u)))
    })
}

/// Simple upper-case mapping of one code unit
///
/// Surrogates and characters whose upper case is not a single BMP
/// character are left unchanged.
fn fold_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u16::try_from(u32::from(u)).unwrap_or(unit),
        _ => unit,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_shorter_names_sort_first() {
        assert_eq!(compare_names(&units("zz"), &units("aaa")), Ordering::Less);
        assert_eq!(compare_names(&units("b"), &units("a")), Ordering::Greater);
    }

    #[test]
    fn test_comparison_ignores_case() {
        assert_eq!(
            compare_names(&units("Report.TXT"), &units("report.txt")),
            Ordering::Equal
        );
        assert_eq!(compare_names(&units("éa"), &units("ÉA")), Ordering::Equal);
        assert_eq!(compare_names(&units("a"), &units("B")), Ordering::Less);
    }

    #[test]
    fn test_multi_char_uppercase_left_alone() {
        // 'ß' upper-cases to "SS", which is not a simple mapping
        assert_eq!(fold_unit('ß' as u16), 'ß' as u16);
        assert_ne!(compare_names(&units("ß"), &units("s")), Ordering::Equal);
    }

    #[test]
    fn test_encode_rejects_bad_names() {
        for bad in ["", "a/b", "a\\b", "c:", "wow!", "nul\0"] {
            let err = encode_name(bad).unwrap_err();
            assert!(err.is_validation_error(), "{bad:?} should be rejected");
        }
        assert!(encode_name(&"x".repeat(32)).is_err());
        assert_eq!(encode_name(&"x".repeat(31)).unwrap().len(), 31);
    }

    #[test]
    fn test_encode_counts_utf16_units() {
        // Astral characters take two units each
        let name = "😀".repeat(15);
        assert_eq!(encode_name(&name).unwrap().len(), 30);
        assert!(encode_name(&"😀".repeat(16)).is_err());
    }
}
